//! Debugger-side hook types.
//!
//! Every hook slot holds at most one hook. Setters replace the current hook
//! and return the previous one.

use std::sync::Arc;

use crate::frame::{ProgramCounter, ThreadSuspendState};
use crate::host::{CallKind, ErrorReport};
use crate::record::{ScriptId, ScriptRecord};

/// Script lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptEvent {
    /// A record was created for a newly seen script
    Loaded,
    /// The sweeper evicted a long-fallow record
    Reclaimed,
    /// The interpreter unloaded the script
    Unloaded,
}

/// Whether a call hook fires before or after the call body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// Before the first instruction
    Before,
    /// After the call finished
    After,
}

/// Argument of a [`CallHook`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallEvent {
    /// Call, construct or top-level execute
    pub kind: CallKind,
    /// Before or after the body
    pub phase: CallPhase,
    /// Callee
    pub script: ScriptId,
}

/// Why the debug-break hook fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakReason {
    /// The error reporter chose [`ErrorDisposition::Debug`]
    Error(ErrorReport),
    /// A `debugger` statement
    DebuggerStatement,
}

/// What the debugger's error reporter wants done with a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Forward to the previously installed reporter
    PassAlong,
    /// Suppress; the interpreter raises a generic evaluator error
    Return,
    /// Suppress and invoke the debug-break hook at the error site
    Debug,
}

/// Runs at a trapped instruction
pub type InstructionHook = Arc<dyn Fn(&ThreadSuspendState, ProgramCounter) + Send + Sync>;

/// Runs once per [`send_interrupt`](crate::DebugManager::send_interrupt)
pub type InterruptHook = Arc<dyn Fn(&ThreadSuspendState, ProgramCounter) + Send + Sync>;

/// Runs on `debugger` statements and on errors routed to the debugger
pub type DebugBreakHook = Arc<dyn Fn(&ThreadSuspendState, &BreakReason) + Send + Sync>;

/// Runs around calls, constructions and top-level executions
pub type CallHook = Arc<dyn Fn(&ThreadSuspendState, &CallEvent) + Send + Sync>;

/// Observes script records being created and evicted
pub type ScriptHook = Arc<dyn Fn(ScriptEvent, &Arc<ScriptRecord>) + Send + Sync>;

/// Decides how an interpreter error is handled while the debugger is attached
pub type DebugErrorReporter = Arc<dyn Fn(&ErrorReport) -> ErrorDisposition + Send + Sync>;
