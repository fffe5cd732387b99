//! Debugger error types

use thiserror::Error;

use crate::record::ScriptId;

/// Errors surfaced by the instrumentation core
#[derive(Debug, Error)]
pub enum DebugError {
    /// Operation on an invalidated record, a resumed suspend state, or a
    /// continue-state accessor that does not match the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Evaluation requested against a frame that is no longer suspended
    #[error("invalid frame: the owning thread is no longer suspended")]
    InvalidFrame,

    /// Trap offset outside the function's code
    #[error("pc {pc} out of range for script of length {len}")]
    PcOutOfRange {
        /// Requested offset
        pc: u32,
        /// Instruction count of the script
        len: u32,
    },

    /// No live record for the given script
    #[error("script {0} is not known to the registry")]
    ScriptNotFound(ScriptId),

    /// Compile or runtime failure while evaluating debugger code
    #[error("evaluation failed: {0}")]
    EvalFailure(String),

    /// Internal list discipline violated
    #[error("lifecycle contract violated: {0}")]
    ContractViolation(&'static str),

    /// Malformed configuration text
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Background sweeper could not be started
    #[error("sweeper error: {0}")]
    Sweeper(String),
}

impl DebugError {
    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create an evaluation failure
    pub fn eval_failure(msg: impl Into<String>) -> Self {
        Self::EvalFailure(msg.into())
    }

    /// Whether this error reports a lifetime-contract violation by the embedder
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_) | Self::InvalidFrame)
    }
}

/// Result type for debugger operations
pub type DebugResult<T> = std::result::Result<T, DebugError>;

/// Report a broken list-membership precondition.
///
/// Panics in debug builds. Release builds log and let the caller skip the
/// mutation.
#[track_caller]
pub(crate) fn contract_violation(what: &'static str) -> DebugError {
    if cfg!(debug_assertions) {
        panic!("lifecycle contract violated: {what}");
    }
    tracing::error!(violation = what, "lifecycle contract violated");
    DebugError::ContractViolation(what)
}
