//! Mock interpreter shared by the integration tests.
#![allow(dead_code)]

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use otter_debug::{
    Activation, CallInfo, CallKind, CallOutcome, ContextId, DebugError, DebugResult,
    ErrorReport, ErrorReporter, EvalRequest, EvalToken, HookDisposition, HookToken, LineMap,
    InterpreterContext, InterpreterHooks, ReportOutcome, ScriptDescriptor, ScriptId,
};
use parking_lot::{Mutex, RwLock};
use tracing_subscriber::EnvFilter;

/// Install a test subscriber, honouring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A function of `code_len` instructions, four instructions per source line
pub fn script(id: u64, name: &str, code_len: u32) -> ScriptDescriptor {
    let base_line = 10;
    let map = LineMap::from_pairs((0..code_len).step_by(4).map(|pc| (pc, base_line + pc / 4)));
    ScriptDescriptor::builder(ScriptId(id), "test.js")
        .function_name(name)
        .base_line(base_line)
        .line_extent(code_len.div_ceil(4))
        .code_len(code_len)
        .line_map(map)
        .build()
}

/// Evaluation callback run by [`MockContext::evaluate`]
pub type Evaluator =
    Arc<dyn Fn(&MockContext, &EvalRequest<'_>) -> DebugResult<String> + Send + Sync>;

/// Reporter standing in for the embedder's own error output
#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<String>>,
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, _ctx: &Arc<dyn InterpreterContext>, report: &ErrorReport) -> ReportOutcome {
        self.reports.lock().push(report.message.clone());
        ReportOutcome::Reported
    }
}

/// One interpreter execution context with a simulated call stack
pub struct MockContext {
    id: ContextId,
    this: Weak<MockContext>,
    hooks: RwLock<Option<Arc<dyn InterpreterHooks>>>,
    reporter: RwLock<Option<Arc<dyn ErrorReporter>>>,
    reporter_swaps: AtomicUsize,
    source_tracking: AtomicBool,
    stack: Mutex<Vec<Activation>>,
    evaluator: RwLock<Option<Evaluator>>,
}

impl MockContext {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: ContextId(id),
            this: this.clone(),
            hooks: RwLock::new(None),
            reporter: RwLock::new(None),
            reporter_swaps: AtomicUsize::new(0),
            source_tracking: AtomicBool::new(true),
            stack: Mutex::new(Vec::new()),
            evaluator: RwLock::new(None),
        })
    }

    pub fn as_dyn(&self) -> Arc<dyn InterpreterContext> {
        self.this.upgrade().expect("context alive")
    }

    pub fn hooks(&self) -> Option<Arc<dyn InterpreterHooks>> {
        self.hooks.read().clone()
    }

    pub fn reporter(&self) -> Option<Arc<dyn ErrorReporter>> {
        self.reporter.read().clone()
    }

    /// Number of `swap_error_reporter` calls so far
    pub fn reporter_swaps(&self) -> usize {
        self.reporter_swaps.load(Ordering::SeqCst)
    }

    pub fn source_tracking(&self) -> bool {
        self.source_tracking.load(Ordering::SeqCst)
    }

    /// Install the embedder's own reporter
    pub fn install_reporter(&self, reporter: Arc<dyn ErrorReporter>) {
        *self.reporter.write() = Some(reporter);
    }

    pub fn set_evaluator(&self, evaluator: Evaluator) {
        *self.evaluator.write() = Some(evaluator);
    }

    pub fn depth(&self) -> usize {
        self.stack.lock().len()
    }

    pub fn load(&self, script: &ScriptDescriptor) {
        if let Some(hooks) = self.hooks() {
            hooks.script_loaded(script);
        }
    }

    pub fn unload(&self, id: ScriptId) {
        if let Some(hooks) = self.hooks() {
            hooks.script_unloaded(id);
        }
    }

    /// Push an activation and run the entry hook
    pub fn enter(
        &self,
        script: Option<&ScriptDescriptor>,
        kind: CallKind,
        eval: Option<&EvalToken>,
    ) -> HookToken {
        self.stack.lock().push(Activation {
            script: script.map(|s| s.id),
            pc: 0,
            function_name: script.and_then(|s| s.function_name.clone()),
            kind,
        });
        match self.hooks() {
            Some(hooks) => hooks.enter(&self.as_dyn(), &CallInfo::new(kind, script), eval),
            None => HookToken::untracked(kind),
        }
    }

    /// Move the innermost activation to `pc` and run the instruction hooks
    pub fn step(&self, token: &HookToken, pc: u32) -> HookDisposition {
        if let Some(top) = self.stack.lock().last_mut() {
            top.pc = pc;
        }
        if !token.wants_instruction_hook() {
            return HookDisposition::Continue;
        }
        match self.hooks() {
            Some(hooks) => hooks.instruction(&self.as_dyn(), token, pc),
            None => HookDisposition::Continue,
        }
    }

    pub fn debugger_statement(&self, token: &HookToken, pc: u32) -> HookDisposition {
        if let Some(top) = self.stack.lock().last_mut() {
            top.pc = pc;
        }
        match self.hooks() {
            Some(hooks) => hooks.debugger_statement(&self.as_dyn(), token, pc),
            None => HookDisposition::Continue,
        }
    }

    /// Run the exit hook and pop the activation
    pub fn exit(&self, token: HookToken, outcome: CallOutcome) {
        if let Some(hooks) = self.hooks() {
            hooks.exit(&self.as_dyn(), token, &outcome);
        }
        self.stack.lock().pop();
    }

    /// Execute `pcs` of `script` as one call, stopping at the first
    /// non-continue disposition
    pub fn run(
        &self,
        script: &ScriptDescriptor,
        pcs: Range<u32>,
        eval: Option<&EvalToken>,
    ) -> HookDisposition {
        let token = self.enter(Some(script), CallKind::Call, eval);
        let mut disposition = HookDisposition::Continue;
        for pc in pcs {
            disposition = self.step(&token, pc);
            if !disposition.is_continue() {
                break;
            }
        }
        let outcome = match &disposition {
            HookDisposition::Throw(error) => CallOutcome::Threw(error.clone()),
            HookDisposition::Return(value) => CallOutcome::Returned(value.clone()),
            HookDisposition::Continue => CallOutcome::Returned(None),
        };
        self.exit(token, outcome);
        disposition
    }

    /// Raise an error through the installed reporter
    pub fn report_error(&self, report: &ErrorReport) -> ReportOutcome {
        match self.reporter() {
            Some(reporter) => reporter.report(&self.as_dyn(), report),
            None => ReportOutcome::Reported,
        }
    }
}

impl InterpreterContext for MockContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn swap_hooks(
        &self,
        hooks: Option<Arc<dyn InterpreterHooks>>,
    ) -> Option<Arc<dyn InterpreterHooks>> {
        std::mem::replace(&mut *self.hooks.write(), hooks)
    }

    fn swap_error_reporter(
        &self,
        reporter: Option<Arc<dyn ErrorReporter>>,
    ) -> Option<Arc<dyn ErrorReporter>> {
        self.reporter_swaps.fetch_add(1, Ordering::SeqCst);
        std::mem::replace(&mut *self.reporter.write(), reporter)
    }

    fn set_source_tracking(&self, enabled: bool) -> bool {
        self.source_tracking.swap(enabled, Ordering::SeqCst)
    }

    fn activation_count(&self) -> usize {
        self.stack.lock().len()
    }

    fn activation(&self, depth: usize) -> Option<Activation> {
        self.stack.lock().iter().rev().nth(depth).cloned()
    }

    fn evaluate(&self, request: &EvalRequest<'_>) -> DebugResult<String> {
        let evaluator = self.evaluator.read().clone();
        match evaluator {
            Some(evaluator) => evaluator(self, request),
            None => Err(DebugError::eval_failure("no evaluator installed")),
        }
    }
}
