//! Configuration for the debugger core.
//!
//! Values can be built in code or loaded from TOML:
//!
//! ```toml
//! [reclamation]
//! grace_count = 16
//! interval_ms = 250
//! ```

use serde::Deserialize;

use crate::error::DebugResult;

/// Reclamation (fallow sweep) policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReclamationConfig {
    /// Number of fallow records retained before eviction begins (default: 64)
    pub grace_count: u32,
    /// Sweep period in milliseconds; 0 disables the sweeper (default: 1000)
    pub interval_ms: u32,
}

impl Default for ReclamationConfig {
    fn default() -> Self {
        Self {
            grace_count: 64,
            interval_ms: 1000,
        }
    }
}

/// Debugger configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Fallow sweep policy
    pub reclamation: ReclamationConfig,
}

impl DebugConfig {
    /// Create a config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> DebugResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Set the fallow grace count
    pub fn grace_count(mut self, count: u32) -> Self {
        self.reclamation.grace_count = count;
        self
    }

    /// Set the sweep interval in milliseconds (0 disables the sweeper)
    pub fn sweep_interval_ms(mut self, interval_ms: u32) -> Self {
        self.reclamation.interval_ms = interval_ms;
        self
    }

    /// Config with the background sweeper disabled
    pub fn without_sweeper() -> Self {
        Self::default().sweep_interval_ms(0)
    }
}
