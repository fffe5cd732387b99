//! Debugger façade.
//!
//! [`DebugManager`] is what an embedder's debugger talks to. It owns the
//! script registry, the reclamation sweeper and a [`DebuggerCore`], the
//! [`InterpreterHooks`] implementation installed on every attached context.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use scopeguard::defer;
use tracing::{debug, trace, warn};

use crate::config::DebugConfig;
use crate::error::{DebugError, DebugResult};
use crate::frame::{ProgramCounter, StackFrame, ThreadSuspendState};
use crate::hooks::{
    BreakReason, CallEvent, CallHook, CallPhase, DebugBreakHook, DebugErrorReporter,
    ErrorDisposition, InstructionHook, InterruptHook, ScriptHook,
};
use crate::host::{
    CallInfo, CallKind, CallOutcome, ContextId, ErrorReport, ErrorReporter, EvalRequest,
    EvalToken, HookDisposition, HookToken, InterpreterContext, InterpreterHooks,
};
use crate::record::{ScriptDescriptor, ScriptId, ScriptRecord};
use crate::registry::ScriptRegistry;
use crate::reporter::ChainedReporter;
use crate::sweeper::ReclamationSweeper;

fn replace_slot<T>(slot: &RwLock<Option<T>>, value: Option<T>) -> Option<T> {
    std::mem::replace(&mut *slot.write(), value)
}

/// The hook set installed on attached interpreter contexts
pub struct DebuggerCore {
    registry: Arc<ScriptRegistry>,
    instruction_hooks: RwLock<FxHashMap<ProgramCounter, InstructionHook>>,
    interrupt_hook: RwLock<Option<InterruptHook>>,
    debug_break_hook: RwLock<Option<DebugBreakHook>>,
    call_hook: RwLock<Option<CallHook>>,
    error_reporter: RwLock<Option<DebugErrorReporter>>,
}

impl DebuggerCore {
    fn new(registry: Arc<ScriptRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            instruction_hooks: RwLock::new(FxHashMap::default()),
            interrupt_hook: RwLock::new(None),
            debug_break_hook: RwLock::new(None),
            call_hook: RwLock::new(None),
            error_reporter: RwLock::new(None),
        })
    }

    /// Script registry shared with the manager
    pub fn registry(&self) -> &Arc<ScriptRegistry> {
        &self.registry
    }

    fn suspend(&self, ctx: &Arc<dyn InterpreterContext>) -> ThreadSuspendState {
        ThreadSuspendState::new(ctx.clone(), self.registry.clone())
    }

    fn fire_call_hook(
        &self,
        ctx: &Arc<dyn InterpreterContext>,
        kind: CallKind,
        phase: CallPhase,
        script: ScriptId,
    ) {
        let hook = self.call_hook.read().clone();
        let Some(hook) = hook else {
            return;
        };
        let state = self.suspend(ctx);
        hook(&state, &CallEvent { kind, phase, script });
        // Call hooks observe only; their continue state is discarded
        let _ = state.resume();
    }

    pub(crate) fn error_disposition(&self, report: &ErrorReport) -> ErrorDisposition {
        let reporter = self.error_reporter.read().clone();
        reporter.map_or(ErrorDisposition::PassAlong, |reporter| reporter(report))
    }

    pub(crate) fn break_on_error(&self, ctx: &Arc<dyn InterpreterContext>, report: &ErrorReport) {
        let hook = self.debug_break_hook.read().clone();
        let Some(hook) = hook else {
            trace!("error routed to debugger without a debug-break hook");
            return;
        };
        let state = self.suspend(ctx);
        hook(&state, &BreakReason::Error(report.clone()));
        let _ = state.resume();
    }

    fn drop_instruction_hooks(&self, script: ScriptId) -> usize {
        let mut hooks = self.instruction_hooks.write();
        let before = hooks.len();
        hooks.retain(|pc, _| pc.script != script);
        before - hooks.len()
    }
}

impl InterpreterHooks for DebuggerCore {
    fn script_loaded(&self, script: &ScriptDescriptor) {
        self.registry.resolve_or_create(script);
    }

    fn script_unloaded(&self, id: ScriptId) {
        let dropped = self.drop_instruction_hooks(id);
        if dropped > 0 {
            debug!(script = %id, dropped, "instruction hooks dropped on unload");
        }
        self.registry.script_unloaded(id);
    }

    fn enter(
        &self,
        ctx: &Arc<dyn InterpreterContext>,
        call: &CallInfo<'_>,
        eval: Option<&EvalToken>,
    ) -> HookToken {
        if let Some(token) = eval {
            trace!(eval = token.id(), "call made by debugger evaluation");
            return HookToken::bypass(call.kind);
        }
        let Some(descriptor) = call.script else {
            return HookToken::untracked(call.kind);
        };

        match self.registry.acquire(descriptor) {
            Ok(record) => {
                self.fire_call_hook(ctx, call.kind, CallPhase::Before, record.id());
                HookToken::tracked(call.kind, record)
            }
            Err(e) => {
                warn!(script = %descriptor.id, error = %e, "could not track call");
                HookToken::untracked(call.kind)
            }
        }
    }

    fn exit(&self, ctx: &Arc<dyn InterpreterContext>, mut token: HookToken, outcome: &CallOutcome) {
        let Some(record) = token.take_record() else {
            return;
        };
        if record.is_valid() {
            self.fire_call_hook(ctx, token.kind(), CallPhase::After, record.id());
        }
        trace!(
            script = %record.id(),
            threw = matches!(outcome, CallOutcome::Threw(_)),
            "call finished"
        );
        if let Err(e) = self.registry.release(&record, false) {
            warn!(script = %record.id(), error = %e, "release failed");
        }
    }

    fn trapped(
        &self,
        ctx: &Arc<dyn InterpreterContext>,
        token: &HookToken,
        pc: u32,
    ) -> HookDisposition {
        let Some(record) = token.record() else {
            return HookDisposition::Continue;
        };
        if !record.is_trapped(pc) {
            return HookDisposition::Continue;
        }

        let location = ProgramCounter::new(record.id(), pc);
        let hook = self.instruction_hooks.read().get(&location).cloned();
        let Some(hook) = hook else {
            return HookDisposition::Continue;
        };
        trace!(pc = %location, "trap hit");
        let state = self.suspend(ctx);
        hook(&state, location);
        state.resume()
    }

    fn interrupted(
        &self,
        ctx: &Arc<dyn InterpreterContext>,
        token: &HookToken,
        pc: u32,
    ) -> HookDisposition {
        let Some(record) = token.record() else {
            return HookDisposition::Continue;
        };
        if !self.registry.claim_interrupt(record) {
            return HookDisposition::Continue;
        }

        let location = ProgramCounter::new(record.id(), pc);
        debug!(pc = %location, "interrupt delivered");
        let hook = self.interrupt_hook.read().clone();
        let Some(hook) = hook else {
            return HookDisposition::Continue;
        };
        let state = self.suspend(ctx);
        hook(&state, location);
        state.resume()
    }

    fn debugger_statement(
        &self,
        ctx: &Arc<dyn InterpreterContext>,
        token: &HookToken,
        _pc: u32,
    ) -> HookDisposition {
        if token.is_bypass() {
            return HookDisposition::Continue;
        }
        let hook = self.debug_break_hook.read().clone();
        let Some(hook) = hook else {
            return HookDisposition::Continue;
        };
        let state = self.suspend(ctx);
        hook(&state, &BreakReason::DebuggerStatement);
        state.resume()
    }
}

impl std::fmt::Debug for DebuggerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebuggerCore")
            .field("registry", &self.registry)
            .field("instruction_hooks", &self.instruction_hooks.read().len())
            .finish_non_exhaustive()
    }
}

struct Attachment {
    context: Arc<dyn InterpreterContext>,
    previous_hooks: Option<Arc<dyn InterpreterHooks>>,
    previous_reporter: Option<Arc<dyn ErrorReporter>>,
}

/// Entry point for debuggers
pub struct DebugManager {
    core: Arc<DebuggerCore>,
    sweeper: ReclamationSweeper,
    attached: Mutex<FxHashMap<ContextId, Attachment>>,
}

impl DebugManager {
    /// Create a manager and start the sweeper as configured
    pub fn new(config: DebugConfig) -> DebugResult<Self> {
        let registry = ScriptRegistry::new(config.reclamation.grace_count);
        let sweeper = ReclamationSweeper::new(Arc::downgrade(&registry));
        sweeper.configure(config.reclamation.interval_ms)?;
        Ok(Self {
            core: DebuggerCore::new(registry),
            sweeper,
            attached: Mutex::new(FxHashMap::default()),
        })
    }

    /// Script registry
    pub fn registry(&self) -> &Arc<ScriptRegistry> {
        &self.core.registry
    }

    /// Background sweeper
    pub fn sweeper(&self) -> &ReclamationSweeper {
        &self.sweeper
    }

    /// Install the debugger's hooks and reporter on `ctx`
    pub fn attach(&self, ctx: &Arc<dyn InterpreterContext>) -> DebugResult<()> {
        let mut attached = self.attached.lock();
        let id = ctx.id();
        if attached.contains_key(&id) {
            return Err(DebugError::invalid_state(format!(
                "context {id:?} is already attached"
            )));
        }

        let previous_hooks = ctx.swap_hooks(Some(self.core.clone() as Arc<dyn InterpreterHooks>));
        let previous_reporter =
            Arc::new(ChainedReporter::new(Arc::downgrade(&self.core))).install(ctx);

        attached.insert(
            id,
            Attachment {
                context: ctx.clone(),
                previous_hooks,
                previous_reporter,
            },
        );
        debug!(context = ?id, "debugger attached");
        Ok(())
    }

    /// Restore the hooks and reporter `ctx` had before [`attach`](Self::attach)
    pub fn detach(&self, ctx: &Arc<dyn InterpreterContext>) -> DebugResult<()> {
        let id = ctx.id();
        let attachment = self.attached.lock().remove(&id).ok_or_else(|| {
            DebugError::invalid_state(format!("context {id:?} is not attached"))
        })?;
        self.restore(id, attachment);
        Ok(())
    }

    fn restore(&self, id: ContextId, attachment: Attachment) {
        let Attachment {
            context,
            previous_hooks,
            previous_reporter,
        } = attachment;

        let installed = context.swap_hooks(previous_hooks);
        let ours = installed.is_some_and(|hooks| {
            std::ptr::addr_eq(Arc::as_ptr(&hooks), Arc::as_ptr(&self.core))
        });
        if !ours {
            warn!(context = ?id, "hooks were replaced while the debugger was attached");
        }
        context.swap_error_reporter(previous_reporter);
        debug!(context = ?id, "debugger detached");
    }

    /// Whether `id` is attached
    pub fn is_attached(&self, id: ContextId) -> bool {
        self.attached.lock().contains_key(&id)
    }

    /// Install (`Some`) or remove (`None`) the hook at `pc`, returning the
    /// previous one. Installing sets the trap, removing clears it.
    pub fn set_instruction_hook(
        &self,
        pc: ProgramCounter,
        hook: Option<InstructionHook>,
    ) -> DebugResult<Option<InstructionHook>> {
        let record = self
            .registry()
            .lookup(pc.script)
            .ok_or(DebugError::ScriptNotFound(pc.script))?;

        let mut hooks = self.core.instruction_hooks.write();
        match hook {
            Some(hook) => {
                record.set_trap(pc.offset)?;
                trace!(%pc, "instruction hook set");
                Ok(hooks.insert(pc, hook))
            }
            None => {
                record.clear_trap(pc.offset)?;
                trace!(%pc, "instruction hook cleared");
                Ok(hooks.remove(&pc))
            }
        }
    }

    /// Hook installed at `pc`
    pub fn get_instruction_hook(&self, pc: ProgramCounter) -> Option<InstructionHook> {
        self.core.instruction_hooks.read().get(&pc).cloned()
    }

    /// Remove every trap and instruction hook on `script`, returning how many
    /// traps were set
    pub fn clear_all_traps(&self, script: ScriptId) -> DebugResult<u32> {
        let record = self
            .registry()
            .lookup(script)
            .ok_or(DebugError::ScriptNotFound(script))?;
        let cleared = record.clear_all_traps()?;
        self.core.drop_instruction_hooks(script);
        Ok(cleared)
    }

    /// Replace the interrupt hook
    pub fn set_interrupt_hook(&self, hook: Option<InterruptHook>) -> Option<InterruptHook> {
        replace_slot(&self.core.interrupt_hook, hook)
    }

    /// Replace the debug-break hook
    pub fn set_debug_break_hook(&self, hook: Option<DebugBreakHook>) -> Option<DebugBreakHook> {
        replace_slot(&self.core.debug_break_hook, hook)
    }

    /// Replace the call hook
    pub fn set_call_hook(&self, hook: Option<CallHook>) -> Option<CallHook> {
        replace_slot(&self.core.call_hook, hook)
    }

    /// Replace the script load/evict hook
    pub fn set_script_hook(&self, hook: Option<ScriptHook>) -> Option<ScriptHook> {
        self.registry().set_script_hook(hook)
    }

    /// Replace the debugger's error reporter
    pub fn set_error_reporter(
        &self,
        reporter: Option<DebugErrorReporter>,
    ) -> Option<DebugErrorReporter> {
        replace_slot(&self.core.error_reporter, reporter)
    }

    /// Ask the next instrumentation point on any thread to call the
    /// interrupt hook, once
    pub fn send_interrupt(&self) {
        self.registry().send_interrupt();
    }

    /// Withdraw an undelivered interrupt
    pub fn clear_interrupt(&self) {
        self.registry().clear_interrupt();
    }

    /// Evaluate `source` in the scope of `frame`.
    ///
    /// Calls made by the evaluated code do not fire debugger hooks. Compile
    /// and runtime failures yield `Ok(None)`.
    pub fn evaluate_in_frame(
        &self,
        frame: &StackFrame,
        source: &str,
        filename: &str,
        base_line: u32,
    ) -> DebugResult<Option<String>> {
        if !frame.is_valid() {
            return Err(DebugError::InvalidFrame);
        }

        let ctx = frame.context().clone();
        let token = EvalToken::new();
        let tracking = ctx.set_source_tracking(false);
        defer! {
            ctx.set_source_tracking(tracking);
        }

        let request = EvalRequest {
            frame_depth: frame.depth(),
            source,
            filename,
            base_line,
            interpreted_only: true,
            token: &token,
        };
        match ctx.evaluate(&request) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                debug!(error = %e, filename, base_line, "evaluation in frame failed");
                Ok(None)
            }
        }
    }

    /// Change the fallow grace count and sweep period (0 stops the sweeper)
    pub fn configure_reclamation(&self, grace_count: u32, interval_ms: u32) -> DebugResult<()> {
        self.registry().set_grace_count(grace_count);
        self.sweeper.configure(interval_ms)
    }

    /// Run one sweep pass on the calling thread
    pub fn sweep_now(&self) -> usize {
        self.registry().sweep()
    }

    /// Look up the record for a live script
    pub fn script(&self, id: ScriptId) -> Option<Arc<ScriptRecord>> {
        self.registry().lookup(id)
    }
}

impl Drop for DebugManager {
    fn drop(&mut self) {
        let attached: Vec<_> = self.attached.lock().drain().collect();
        for (id, attachment) in attached {
            self.restore(id, attachment);
        }
        self.sweeper.stop();
    }
}

impl std::fmt::Debug for DebugManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugManager")
            .field("core", &self.core)
            .field("sweeper", &self.sweeper)
            .field("attached", &self.attached.lock().len())
            .finish()
    }
}
