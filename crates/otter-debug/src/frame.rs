//! Suspended-thread views handed to debugger hooks.
//!
//! A [`ThreadSuspendState`] exists for exactly one hook invocation. Frames
//! and program counters derived from it share its lifetime: once the hook
//! returns and the interpreter resumes, every accessor fails with
//! [`DebugError::InvalidState`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{DebugError, DebugResult};
use crate::host::{Activation, HookDisposition, HostValue, InterpreterContext};
use crate::record::{ScriptId, ScriptRecord};
use crate::registry::ScriptRegistry;

/// A bytecode position: script plus instruction offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramCounter {
    /// Script
    pub script: ScriptId,
    /// Instruction offset within the script
    pub offset: u32,
}

impl ProgramCounter {
    /// Create a program counter
    pub fn new(script: ScriptId, offset: u32) -> Self {
        Self { script, offset }
    }
}

impl fmt::Display for ProgramCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.script, self.offset)
    }
}

/// How the interpreter proceeds once the hook returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContinueState {
    /// Keep executing
    #[default]
    Run,
    /// Return from the current frame with the stored return value
    Return,
    /// Throw the stored exception
    Throw,
    /// The thread has resumed; set by the core only
    Dead,
}

#[derive(Debug, Default)]
struct Continuation {
    state: ContinueState,
    return_value: Option<HostValue>,
    exception: Option<HostValue>,
}

#[derive(Debug)]
struct FrameData {
    depth: usize,
    activation: Activation,
    record: Option<Arc<ScriptRecord>>,
}

struct Suspension {
    context: Arc<dyn InterpreterContext>,
    registry: Arc<ScriptRegistry>,
    valid: AtomicBool,
    /// Frames built so far, indexed by depth from the innermost activation
    frames: Mutex<Vec<Arc<FrameData>>>,
    continuation: Mutex<Continuation>,
}

impl Suspension {
    fn check_valid(&self) -> DebugResult<()> {
        if self.valid.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DebugError::invalid_state("thread is no longer suspended"))
        }
    }

    fn frame_at(&self, depth: usize) -> DebugResult<Option<Arc<FrameData>>> {
        self.check_valid()?;
        let mut frames = self.frames.lock();
        while frames.len() <= depth {
            let next = frames.len();
            let Some(activation) = self.context.activation(next) else {
                return Ok(None);
            };
            let record = activation.script.and_then(|id| self.registry.lookup(id));
            frames.push(Arc::new(FrameData {
                depth: next,
                activation,
                record,
            }));
        }
        Ok(Some(frames[depth].clone()))
    }
}

/// The state of a thread stopped at an instrumentation point
#[derive(Clone)]
pub struct ThreadSuspendState {
    inner: Arc<Suspension>,
}

impl ThreadSuspendState {
    pub(crate) fn new(context: Arc<dyn InterpreterContext>, registry: Arc<ScriptRegistry>) -> Self {
        Self {
            inner: Arc::new(Suspension {
                context,
                registry,
                valid: AtomicBool::new(true),
                frames: Mutex::new(Vec::new()),
                continuation: Mutex::new(Continuation::default()),
            }),
        }
    }

    /// Whether the thread is still suspended
    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    /// The innermost frame, `None` if the stack is empty
    pub fn current_frame(&self) -> DebugResult<Option<StackFrame>> {
        Ok(self.inner.frame_at(0)?.map(|data| StackFrame {
            suspension: self.inner.clone(),
            data,
        }))
    }

    /// Number of activations on the suspended stack
    pub fn frame_count(&self) -> DebugResult<usize> {
        self.inner.check_valid()?;
        Ok(self.inner.context.activation_count())
    }

    /// Every frame, base first and the current frame last
    pub fn stack(&self) -> DebugResult<Vec<StackFrame>> {
        let mut frames = Vec::new();
        let mut depth = 0;
        while let Some(data) = self.inner.frame_at(depth)? {
            frames.push(StackFrame {
                suspension: self.inner.clone(),
                data,
            });
            depth += 1;
        }
        frames.reverse();
        Ok(frames)
    }

    /// Current continue state
    pub fn continue_state(&self) -> DebugResult<ContinueState> {
        self.inner.check_valid()?;
        Ok(self.inner.continuation.lock().state)
    }

    /// Choose how the interpreter proceeds. `Dead` cannot be selected.
    pub fn set_continue_state(&self, state: ContinueState) -> DebugResult<()> {
        self.inner.check_valid()?;
        if state == ContinueState::Dead {
            return Err(DebugError::invalid_state(
                "the dead continue state is reserved for resumed threads",
            ));
        }
        self.inner.continuation.lock().state = state;
        Ok(())
    }

    /// Value returned from the current frame. Requires [`ContinueState::Return`].
    pub fn return_value(&self) -> DebugResult<Option<HostValue>> {
        let continuation = self.continuation_in(ContinueState::Return)?;
        Ok(continuation.return_value.clone())
    }

    /// Set the value to return. Requires [`ContinueState::Return`].
    pub fn set_return_value(&self, value: Option<HostValue>) -> DebugResult<()> {
        let mut continuation = self.continuation_in(ContinueState::Return)?;
        continuation.return_value = value;
        Ok(())
    }

    /// Exception to throw. Requires [`ContinueState::Throw`].
    pub fn exception(&self) -> DebugResult<Option<HostValue>> {
        let continuation = self.continuation_in(ContinueState::Throw)?;
        Ok(continuation.exception.clone())
    }

    /// Set the exception to throw. Requires [`ContinueState::Throw`].
    pub fn set_exception(&self, value: HostValue) -> DebugResult<()> {
        let mut continuation = self.continuation_in(ContinueState::Throw)?;
        continuation.exception = Some(value);
        Ok(())
    }

    fn continuation_in(
        &self,
        expected: ContinueState,
    ) -> DebugResult<parking_lot::MutexGuard<'_, Continuation>> {
        self.inner.check_valid()?;
        let continuation = self.inner.continuation.lock();
        if continuation.state != expected {
            return Err(DebugError::invalid_state(format!(
                "continue state is {:?}, expected {:?}",
                continuation.state, expected
            )));
        }
        Ok(continuation)
    }

    /// Invalidate the state and turn the chosen continue state into a
    /// disposition for the interpreter
    pub(crate) fn resume(&self) -> HookDisposition {
        let mut continuation = self.inner.continuation.lock();
        if !self.inner.valid.swap(false, Ordering::AcqRel) {
            return HookDisposition::Continue;
        }
        let state = std::mem::replace(&mut continuation.state, ContinueState::Dead);
        self.inner.frames.lock().clear();
        match state {
            ContinueState::Run | ContinueState::Dead => HookDisposition::Continue,
            ContinueState::Return => HookDisposition::Return(continuation.return_value.take()),
            ContinueState::Throw => match continuation.exception.take() {
                Some(exception) => HookDisposition::Throw(exception),
                None => {
                    warn!("throw requested without an exception, continuing");
                    HookDisposition::Continue
                }
            },
        }
    }

    pub(crate) fn context(&self) -> &Arc<dyn InterpreterContext> {
        &self.inner.context
    }
}

impl fmt::Debug for ThreadSuspendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSuspendState")
            .field("context", &self.inner.context.id())
            .field("valid", &self.is_valid())
            .field("continue_state", &self.inner.continuation.lock().state)
            .finish()
    }
}

/// One activation on a suspended stack
#[derive(Clone)]
pub struct StackFrame {
    suspension: Arc<Suspension>,
    data: Arc<FrameData>,
}

impl StackFrame {
    /// Whether the owning thread is still suspended
    pub fn is_valid(&self) -> bool {
        self.suspension.valid.load(Ordering::Acquire)
    }

    /// Distance from the innermost frame (0 = current)
    pub fn depth(&self) -> usize {
        self.data.depth
    }

    /// The calling frame, `None` at the base of the stack
    pub fn caller(&self) -> DebugResult<Option<StackFrame>> {
        Ok(self
            .suspension
            .frame_at(self.data.depth + 1)?
            .map(|data| StackFrame {
                suspension: self.suspension.clone(),
                data,
            }))
    }

    /// Position of this frame
    pub fn pc(&self) -> DebugResult<SuspendedPc> {
        self.suspension.check_valid()?;
        Ok(SuspendedPc {
            suspension: self.suspension.clone(),
            data: self.data.clone(),
        })
    }

    /// Script executing in this frame, `None` for native frames
    pub fn script(&self) -> DebugResult<Option<Arc<ScriptRecord>>> {
        self.suspension.check_valid()?;
        Ok(self.data.record.clone())
    }

    /// Function name if known
    pub fn function_name(&self) -> DebugResult<Option<String>> {
        self.suspension.check_valid()?;
        Ok(self.data.activation.function_name.clone().or_else(|| {
            self.data
                .record
                .as_ref()
                .and_then(|r| r.function_name().map(str::to_owned))
        }))
    }

    /// Current source line, `None` for native frames
    pub fn line(&self) -> DebugResult<Option<u32>> {
        self.pc()?.line()
    }

    /// Whether this is a native frame
    pub fn is_native(&self) -> DebugResult<bool> {
        self.suspension.check_valid()?;
        Ok(self.data.activation.is_native())
    }

    pub(crate) fn context(&self) -> &Arc<dyn InterpreterContext> {
        &self.suspension.context
    }
}

impl fmt::Debug for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackFrame")
            .field("depth", &self.data.depth)
            .field("activation", &self.data.activation)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// A program counter tied to a suspended frame
#[derive(Clone)]
pub struct SuspendedPc {
    suspension: Arc<Suspension>,
    data: Arc<FrameData>,
}

impl SuspendedPc {
    /// Whether the owning thread is still suspended
    pub fn is_valid(&self) -> bool {
        self.suspension.valid.load(Ordering::Acquire)
    }

    /// Script and offset, `None` for native frames
    pub fn program_counter(&self) -> DebugResult<Option<ProgramCounter>> {
        self.suspension.check_valid()?;
        let activation = &self.data.activation;
        Ok(activation
            .script
            .map(|script| ProgramCounter::new(script, activation.pc)))
    }

    /// Source line, derived from the script's line map
    pub fn line(&self) -> DebugResult<Option<u32>> {
        self.suspension.check_valid()?;
        Ok(self
            .data
            .record
            .as_ref()
            .map(|record| record.line_for_pc(self.data.activation.pc)))
    }
}

impl fmt::Debug for SuspendedPc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendedPc")
            .field("script", &self.data.activation.script)
            .field("offset", &self.data.activation.pc)
            .field("valid", &self.is_valid())
            .finish()
    }
}
