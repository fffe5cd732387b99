//! # Otter Debug
//!
//! Debugger instrumentation core for a bytecode interpreter.
//!
//! ## Design
//!
//! - **Script records**: per-function side table keyed by [`ScriptId`], reference
//!   counted by live calls and kept on an active or fallow list
//! - **Traps**: packed bit table per function; a single flag keeps the
//!   per-instruction check to two relaxed loads when nothing is set
//! - **Interrupts**: global one-shot, delivered to exactly one thread
//! - **Suspend states**: frame and pc views valid only while the hook runs
//! - **Reclamation**: background sweeper evicts fallow records past a grace count
//!
//! The interpreter implements [`InterpreterContext`] and calls the
//! [`InterpreterHooks`] that [`DebugManager::attach`] installs.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod frame;
pub mod hooks;
pub mod host;
pub mod lifecycle;
pub mod line_map;
pub mod manager;
pub mod record;
pub mod registry;
pub mod reporter;
pub mod sweeper;
pub mod trap;

pub use config::{DebugConfig, ReclamationConfig};
pub use error::{DebugError, DebugResult};
pub use frame::{ContinueState, ProgramCounter, StackFrame, SuspendedPc, ThreadSuspendState};
pub use hooks::{
    BreakReason, CallEvent, CallHook, CallPhase, DebugBreakHook, DebugErrorReporter,
    ErrorDisposition, InstructionHook, InterruptHook, ScriptEvent, ScriptHook,
};
pub use host::{
    Activation, CallInfo, CallKind, CallOutcome, ContextId, ErrorReport, ErrorReporter,
    EvalRequest, EvalToken, HookDisposition, HookToken, HostValue, InterpreterContext,
    InterpreterHooks, ReportOutcome,
};
pub use lifecycle::{LifecycleTracker, Membership};
pub use line_map::{LineEntry, LineMap};
pub use manager::{DebugManager, DebuggerCore};
pub use record::{ScriptDescriptor, ScriptDescriptorBuilder, ScriptId, ScriptRecord};
pub use registry::ScriptRegistry;
pub use reporter::ChainedReporter;
pub use sweeper::ReclamationSweeper;
pub use trap::TrapTable;
