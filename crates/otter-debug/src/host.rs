//! The interpreter boundary.
//!
//! The host interpreter implements [`InterpreterContext`] for each execution
//! context and calls the [`InterpreterHooks`] installed on it at its
//! instrumentation points:
//!
//! ```ignore
//! let token = hooks.enter(&ctx, &CallInfo::new(CallKind::Call, Some(&descriptor)), eval);
//! loop {
//!     if token.wants_instruction_hook() {
//!         match hooks.instruction(&ctx, &token, pc) {
//!             HookDisposition::Continue => {}
//!             HookDisposition::Return(value) => break /* return value */,
//!             HookDisposition::Throw(error) => break /* throw error */,
//!         }
//!     }
//!     // ... execute the instruction at pc ...
//! }
//! hooks.exit(&ctx, token, &outcome); // before the activation is popped
//! ```
//!
//! A call that originates from debugger evaluation passes the [`EvalToken`]
//! it was handed in [`EvalRequest`] to every nested `enter`, which turns all
//! hooks for that call into no-ops.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::DebugResult;
use crate::record::{ScriptDescriptor, ScriptId, ScriptRecord};

/// An interpreter value the debugger carries but never inspects
#[derive(Clone)]
pub struct HostValue(Arc<dyn Any + Send + Sync>);

impl HostValue {
    /// Wrap a host value
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the value as `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostValue(..)")
    }
}

/// Identity of an interpreter execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

/// Kind of call-style instrumentation point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Ordinary function call
    Call,
    /// `new` / constructor invocation
    Construct,
    /// Top-level script execution
    Execute,
}

/// What the interpreter knows about a call at entry
#[derive(Debug, Clone, Copy)]
pub struct CallInfo<'a> {
    /// Call kind
    pub kind: CallKind,
    /// Callee script, `None` for native functions
    pub script: Option<&'a ScriptDescriptor>,
}

impl<'a> CallInfo<'a> {
    /// Create call info
    pub fn new(kind: CallKind, script: Option<&'a ScriptDescriptor>) -> Self {
        Self { kind, script }
    }
}

/// How a call finished
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// Normal return
    Returned(Option<HostValue>),
    /// Exception thrown out of the call
    Threw(HostValue),
}

/// One interpreter call activation, as seen from the debugger
#[derive(Debug, Clone)]
pub struct Activation {
    /// Script being executed, `None` for native frames
    pub script: Option<ScriptId>,
    /// Current instruction offset
    pub pc: u32,
    /// Function name if known
    pub function_name: Option<String>,
    /// How this activation was entered
    pub kind: CallKind,
}

impl Activation {
    /// Whether this is a native (non-bytecode) frame
    pub fn is_native(&self) -> bool {
        self.script.is_none()
    }
}

/// Instruction to the interpreter after a hook returns
#[derive(Debug, Clone, Default)]
pub enum HookDisposition {
    /// Proceed with the instruction
    #[default]
    Continue,
    /// Return from the current frame immediately
    Return(Option<HostValue>),
    /// Throw from the current instruction
    Throw(HostValue),
}

impl HookDisposition {
    /// Whether the interpreter proceeds normally
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

static NEXT_EVAL_ID: AtomicU64 = AtomicU64::new(1);

/// Proof that the current call path originates from debugger evaluation.
///
/// Tokens are minted by the debugger, handed to the interpreter in an
/// [`EvalRequest`], and must be passed back to every nested
/// [`InterpreterHooks::enter`]. They cannot leave the evaluating thread.
#[derive(Debug)]
pub struct EvalToken {
    id: u64,
    _not_send: PhantomData<*const ()>,
}

impl EvalToken {
    pub(crate) fn new() -> Self {
        Self {
            id: NEXT_EVAL_ID.fetch_add(1, Ordering::Relaxed),
            _not_send: PhantomData,
        }
    }

    /// Unique id of this evaluation
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Code to evaluate in a suspended frame
#[derive(Debug)]
pub struct EvalRequest<'a> {
    /// Frame depth counted from the innermost activation
    pub frame_depth: usize,
    /// Source text
    pub source: &'a str,
    /// File name used for error attribution
    pub filename: &'a str,
    /// Line number of the first source line
    pub base_line: u32,
    /// Compile without optimizing tiers
    pub interpreted_only: bool,
    /// Re-entrancy token for nested calls
    pub token: &'a EvalToken,
}

/// Returned by [`InterpreterHooks::enter`], handed back to
/// [`InterpreterHooks::exit`]. Holds a reference on the callee's record.
#[derive(Debug)]
pub struct HookToken {
    record: Option<Arc<ScriptRecord>>,
    kind: CallKind,
    bypass: bool,
}

impl HookToken {
    pub(crate) fn tracked(kind: CallKind, record: Arc<ScriptRecord>) -> Self {
        Self {
            record: Some(record),
            kind,
            bypass: false,
        }
    }

    /// Token for a call the debugger does not track (native callee, or no
    /// record could be taken)
    pub fn untracked(kind: CallKind) -> Self {
        Self {
            record: None,
            kind,
            bypass: false,
        }
    }

    pub(crate) fn bypass(kind: CallKind) -> Self {
        Self {
            record: None,
            kind,
            bypass: true,
        }
    }

    /// Record the call holds a reference on
    pub fn record(&self) -> Option<&Arc<ScriptRecord>> {
        self.record.as_ref()
    }

    pub(crate) fn take_record(&mut self) -> Option<Arc<ScriptRecord>> {
        self.record.take()
    }

    /// Call kind
    pub fn kind(&self) -> CallKind {
        self.kind
    }

    /// Whether this call runs on behalf of debugger evaluation
    pub fn is_bypass(&self) -> bool {
        self.bypass
    }

    /// Per-instruction fast path
    #[inline]
    pub fn wants_instruction_hook(&self) -> bool {
        self.record
            .as_ref()
            .is_some_and(|r| r.wants_instruction_hook())
    }
}

/// An error or warning raised by the interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Message text
    pub message: String,
    /// File the error was raised in
    pub filename: Option<String>,
    /// Line the error was raised at
    pub line: u32,
    /// Warnings are reported but do not abort execution
    pub is_warning: bool,
}

impl ErrorReport {
    /// Create an error report
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            filename: None,
            line: 0,
            is_warning: false,
        }
    }

    /// Attach a source location
    pub fn at(mut self, filename: impl Into<String>, line: u32) -> Self {
        self.filename = Some(filename.into());
        self.line = line;
        self
    }
}

/// What an error reporter did with a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Reported through the normal channel
    Reported,
    /// Swallowed; the interpreter raises a generic evaluator error instead
    Suppressed,
}

/// Interpreter-side error reporter slot
pub trait ErrorReporter: Send + Sync {
    /// Handle a report raised in `ctx`
    fn report(&self, ctx: &Arc<dyn InterpreterContext>, report: &ErrorReport) -> ReportOutcome;
}

/// Services the debugger needs from one interpreter execution context
pub trait InterpreterContext: Send + Sync {
    /// Stable identity of this context
    fn id(&self) -> ContextId;

    /// Replace the installed hooks, returning the previous ones
    fn swap_hooks(
        &self,
        hooks: Option<Arc<dyn InterpreterHooks>>,
    ) -> Option<Arc<dyn InterpreterHooks>>;

    /// Replace the installed error reporter, returning the previous one
    fn swap_error_reporter(
        &self,
        reporter: Option<Arc<dyn ErrorReporter>>,
    ) -> Option<Arc<dyn ErrorReporter>>;

    /// Toggle source-text tracking, returning the previous setting
    fn set_source_tracking(&self, enabled: bool) -> bool;

    /// Number of live activations
    fn activation_count(&self) -> usize;

    /// Activation at `depth`, 0 being the innermost
    fn activation(&self, depth: usize) -> Option<Activation>;

    /// Compile and run code in the scope of the activation at
    /// `request.frame_depth`, returning the stringified result
    fn evaluate(&self, request: &EvalRequest<'_>) -> DebugResult<String>;
}

/// Instrumentation points the interpreter calls, implemented by the debugger
pub trait InterpreterHooks: Send + Sync {
    /// A function or script was compiled
    fn script_loaded(&self, script: &ScriptDescriptor);

    /// A function or script was discarded
    fn script_unloaded(&self, id: ScriptId);

    /// Before a call, construction or top-level execution
    fn enter(
        &self,
        ctx: &Arc<dyn InterpreterContext>,
        call: &CallInfo<'_>,
        eval: Option<&EvalToken>,
    ) -> HookToken;

    /// After the call finished, before its activation is popped
    fn exit(&self, ctx: &Arc<dyn InterpreterContext>, token: HookToken, outcome: &CallOutcome);

    /// The instruction at `pc` is trapped
    fn trapped(
        &self,
        ctx: &Arc<dyn InterpreterContext>,
        token: &HookToken,
        pc: u32,
    ) -> HookDisposition;

    /// The current script carries a pending interrupt
    fn interrupted(
        &self,
        ctx: &Arc<dyn InterpreterContext>,
        token: &HookToken,
        pc: u32,
    ) -> HookDisposition;

    /// A `debugger` statement was executed
    fn debugger_statement(
        &self,
        ctx: &Arc<dyn InterpreterContext>,
        token: &HookToken,
        pc: u32,
    ) -> HookDisposition;

    /// Interrupt check followed by trap check, for interpreters that only
    /// have one per-instruction call site
    fn instruction(
        &self,
        ctx: &Arc<dyn InterpreterContext>,
        token: &HookToken,
        pc: u32,
    ) -> HookDisposition {
        let Some(record) = token.record() else {
            return HookDisposition::Continue;
        };
        if record.interrupt_pending() {
            let disposition = self.interrupted(ctx, token, pc);
            if !disposition.is_continue() {
                return disposition;
            }
        }
        if record.has_traps() {
            return self.trapped(ctx, token, pc);
        }
        HookDisposition::Continue
    }
}
