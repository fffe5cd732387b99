//! DebugManager: attach/detach, hooks, error reporting and evaluation.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use common::{MockContext, RecordingReporter, init_tracing, script};
use otter_debug::{
    BreakReason, CallEvent, CallInfo, CallKind, CallOutcome, CallPhase, DebugConfig, DebugError,
    DebugManager, ErrorDisposition, ErrorReport, ErrorReporter, EvalRequest, EvalToken, HookDisposition,
    HookToken, InterpreterContext, InterpreterHooks, ProgramCounter, ReportOutcome,
    ScriptDescriptor, ScriptId, StackFrame, ThreadSuspendState,
};
use parking_lot::Mutex;

fn manager() -> DebugManager {
    DebugManager::new(DebugConfig::without_sweeper()).unwrap()
}

/// Hooks the embedder had installed before the debugger arrived
struct EmbedderHooks;

impl InterpreterHooks for EmbedderHooks {
    fn script_loaded(&self, _script: &ScriptDescriptor) {}

    fn script_unloaded(&self, _id: ScriptId) {}

    fn enter(
        &self,
        _ctx: &Arc<dyn InterpreterContext>,
        call: &CallInfo<'_>,
        _eval: Option<&EvalToken>,
    ) -> HookToken {
        HookToken::untracked(call.kind)
    }

    fn exit(&self, _ctx: &Arc<dyn InterpreterContext>, _token: HookToken, _outcome: &CallOutcome) {}

    fn trapped(&self, _: &Arc<dyn InterpreterContext>, _: &HookToken, _: u32) -> HookDisposition {
        HookDisposition::Continue
    }

    fn interrupted(&self, _: &Arc<dyn InterpreterContext>, _: &HookToken, _: u32) -> HookDisposition {
        HookDisposition::Continue
    }

    fn debugger_statement(
        &self,
        _: &Arc<dyn InterpreterContext>,
        _: &HookToken,
        _: u32,
    ) -> HookDisposition {
        HookDisposition::Continue
    }
}

#[test]
fn test_attach_detach_restores_previous() {
    init_tracing();
    let manager = manager();
    let ctx = MockContext::new(1);
    let dyn_ctx = ctx.as_dyn();

    let original_hooks: Arc<dyn InterpreterHooks> = Arc::new(EmbedderHooks);
    let original_reporter: Arc<dyn ErrorReporter> = Arc::new(RecordingReporter::default());
    dyn_ctx.swap_hooks(Some(original_hooks.clone()));
    dyn_ctx.swap_error_reporter(Some(original_reporter.clone()));

    manager.attach(&dyn_ctx).unwrap();
    assert!(manager.is_attached(dyn_ctx.id()));
    assert!(!Arc::ptr_eq(&ctx.hooks().unwrap(), &original_hooks));
    assert!(!Arc::ptr_eq(&ctx.reporter().unwrap(), &original_reporter));

    manager.detach(&dyn_ctx).unwrap();
    assert!(!manager.is_attached(dyn_ctx.id()));
    assert!(Arc::ptr_eq(&ctx.hooks().unwrap(), &original_hooks));
    assert!(Arc::ptr_eq(&ctx.reporter().unwrap(), &original_reporter));
}

#[test]
fn test_attach_twice_and_unknown_detach() {
    let manager = manager();
    let ctx = MockContext::new(1).as_dyn();

    assert!(manager.detach(&ctx).unwrap_err().is_invalid_state());
    manager.attach(&ctx).unwrap();
    assert!(manager.attach(&ctx).unwrap_err().is_invalid_state());
}

#[test]
fn test_drop_detaches_everything() {
    let ctx = MockContext::new(1);
    {
        let manager = manager();
        manager.attach(&ctx.as_dyn()).unwrap();
        assert!(ctx.hooks().is_some());
        assert!(ctx.reporter().is_some());
    }
    assert!(ctx.hooks().is_none());
    assert!(ctx.reporter().is_none());
}

#[test]
fn test_call_hook_phases() {
    let manager = manager();
    let ctx = MockContext::new(1);
    manager.attach(&ctx.as_dyn()).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    manager.set_call_hook(Some(Arc::new(
        move |state: &ThreadSuspendState, event: &CallEvent| {
            assert_eq!(state.frame_count().unwrap(), 1);
            sink.lock().push(*event);
        },
    )));

    let f = script(3, "ctor", 4);
    let token = ctx.enter(Some(&f), CallKind::Construct, None);
    ctx.exit(token, CallOutcome::Returned(None));

    assert_eq!(
        *events.lock(),
        vec![
            CallEvent {
                kind: CallKind::Construct,
                phase: CallPhase::Before,
                script: f.id,
            },
            CallEvent {
                kind: CallKind::Construct,
                phase: CallPhase::After,
                script: f.id,
            },
        ]
    );
}

#[test]
fn test_trap_without_hook_continues() {
    let manager = manager();
    let ctx = MockContext::new(1);
    manager.attach(&ctx.as_dyn()).unwrap();
    let f = script(1, "f", 8);
    ctx.load(&f);

    let record = manager.script(f.id).unwrap();
    record.set_trap(2).unwrap();
    assert!(ctx.run(&f, 0..8, None).is_continue());
}

#[test]
fn test_clear_all_traps_drops_hooks() {
    let manager = manager();
    let ctx = MockContext::new(1);
    manager.attach(&ctx.as_dyn()).unwrap();
    let f = script(1, "f", 8);
    ctx.load(&f);

    let hits = Arc::new(AtomicUsize::new(0));
    for pc in [1, 4, 6] {
        let hits = hits.clone();
        manager
            .set_instruction_hook(
                ProgramCounter::new(f.id, pc),
                Some(Arc::new(move |_: &ThreadSuspendState, _: ProgramCounter| {
                    hits.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
    }
    ctx.run(&f, 0..8, None);
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    assert_eq!(manager.clear_all_traps(f.id).unwrap(), 3);
    assert!(manager.get_instruction_hook(ProgramCounter::new(f.id, 4)).is_none());
    ctx.run(&f, 0..8, None);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[test]
fn test_reporter_pass_along() {
    let manager = manager();
    let ctx = MockContext::new(1);
    let original = Arc::new(RecordingReporter::default());
    ctx.install_reporter(original.clone());
    manager.attach(&ctx.as_dyn()).unwrap();

    // No debugger reporter: everything passes along
    assert_eq!(ctx.report_error(&ErrorReport::error("first")), ReportOutcome::Reported);

    manager.set_error_reporter(Some(Arc::new(|_: &ErrorReport| ErrorDisposition::PassAlong)));
    assert_eq!(ctx.report_error(&ErrorReport::error("second")), ReportOutcome::Reported);

    assert_eq!(*original.reports.lock(), vec!["first".to_string(), "second".to_string()]);
}

#[test]
fn test_attach_installs_reporter_in_one_swap() {
    let manager = manager();
    let ctx = MockContext::new(1);
    let original = Arc::new(RecordingReporter::default());
    ctx.install_reporter(original.clone());
    let before = ctx.reporter_swaps();

    let sent = AtomicUsize::new(0);
    let attached = std::sync::atomic::AtomicBool::new(false);
    std::thread::scope(|s| {
        s.spawn(|| {
            while !attached.load(Ordering::SeqCst) {
                ctx.report_error(&ErrorReport::error("concurrent"));
                sent.fetch_add(1, Ordering::SeqCst);
            }
        });
        manager.attach(&ctx.as_dyn()).unwrap();
        attached.store(true, Ordering::SeqCst);
    });

    assert_eq!(ctx.reporter_swaps(), before + 1);
    assert_eq!(original.reports.lock().len(), sent.load(Ordering::SeqCst));

    manager.detach(&ctx.as_dyn()).unwrap();
    assert_eq!(ctx.reporter_swaps(), before + 2);
}

#[test]
fn test_reporter_return_suppresses() {
    let manager = manager();
    let ctx = MockContext::new(1);
    let original = Arc::new(RecordingReporter::default());
    ctx.install_reporter(original.clone());
    manager.attach(&ctx.as_dyn()).unwrap();

    manager.set_error_reporter(Some(Arc::new(|_: &ErrorReport| ErrorDisposition::Return)));
    assert_eq!(ctx.report_error(&ErrorReport::error("hidden")), ReportOutcome::Suppressed);
    assert!(original.reports.lock().is_empty());
}

#[test]
fn test_reporter_debug_breaks() {
    let manager = manager();
    let ctx = MockContext::new(1);
    let original = Arc::new(RecordingReporter::default());
    ctx.install_reporter(original.clone());
    manager.attach(&ctx.as_dyn()).unwrap();

    let breaks = Arc::new(Mutex::new(Vec::new()));
    let sink = breaks.clone();
    manager.set_debug_break_hook(Some(Arc::new(
        move |state: &ThreadSuspendState, reason: &BreakReason| {
            let line = state
                .current_frame()
                .unwrap()
                .and_then(|frame| frame.line().unwrap());
            sink.lock().push((reason.clone(), line));
        },
    )));
    manager.set_error_reporter(Some(Arc::new(|report: &ErrorReport| {
        if report.is_warning {
            ErrorDisposition::PassAlong
        } else {
            ErrorDisposition::Debug
        }
    })));

    let f = script(1, "f", 8);
    let token = ctx.enter(Some(&f), CallKind::Call, None);
    ctx.step(&token, 5);
    let report = ErrorReport::error("bad").at("test.js", 11);
    assert_eq!(ctx.report_error(&report), ReportOutcome::Suppressed);
    ctx.exit(token, CallOutcome::Returned(None));

    assert_eq!(*breaks.lock(), vec![(BreakReason::Error(report), Some(11))]);
    assert!(original.reports.lock().is_empty());
}

#[test]
fn test_debugger_statement() {
    let manager = manager();
    let ctx = MockContext::new(1);
    manager.attach(&ctx.as_dyn()).unwrap();

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = reasons.clone();
    manager.set_debug_break_hook(Some(Arc::new(
        move |_: &ThreadSuspendState, reason: &BreakReason| {
            sink.lock().push(reason.clone());
        },
    )));

    let f = script(1, "f", 4);
    let token = ctx.enter(Some(&f), CallKind::Call, None);
    assert!(ctx.debugger_statement(&token, 2).is_continue());
    ctx.exit(token, CallOutcome::Returned(None));

    assert_eq!(*reasons.lock(), vec![BreakReason::DebuggerStatement]);
}

#[test]
fn test_evaluation_does_not_retrigger_hooks() {
    init_tracing();
    let manager = Arc::new(manager());
    let ctx = MockContext::new(1);
    manager.attach(&ctx.as_dyn()).unwrap();

    let s = script(7, "s", 8);
    ctx.load(&s);

    let trap_hits = Arc::new(AtomicUsize::new(0));
    let trap_sink = trap_hits.clone();
    manager
        .set_instruction_hook(
            ProgramCounter::new(s.id, 1),
            Some(Arc::new(move |_: &ThreadSuspendState, _: ProgramCounter| {
                trap_sink.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

    let nested = s.clone();
    ctx.set_evaluator(Arc::new(move |ctx: &MockContext, request: &EvalRequest<'_>| {
        assert!(!ctx.source_tracking());
        assert!(request.interpreted_only);
        assert_eq!(request.frame_depth, 0);
        ctx.run(&nested, 0..8, Some(request.token));
        Ok(format!("{}:{}", request.filename, request.source))
    }));

    let call_events = Arc::new(Mutex::new(Vec::new()));
    let results = Arc::new(Mutex::new(Vec::new()));
    let weak: Weak<DebugManager> = Arc::downgrade(&manager);
    let (event_sink, result_sink) = (call_events.clone(), results.clone());
    manager.set_call_hook(Some(Arc::new(
        move |state: &ThreadSuspendState, event: &CallEvent| {
            event_sink.lock().push(event.phase);
            if event.phase != CallPhase::Before {
                return;
            }
            let Some(manager) = weak.upgrade() else {
                return;
            };
            let frame = state.current_frame().unwrap().unwrap();
            let value = manager
                .evaluate_in_frame(&frame, "s()", "<eval>", 1)
                .unwrap();
            result_sink.lock().push(value);
        },
    )));

    assert!(ctx.run(&s, 0..8, None).is_continue());

    assert_eq!(*call_events.lock(), vec![CallPhase::Before, CallPhase::After]);
    assert_eq!(*results.lock(), vec![Some("<eval>:s()".to_string())]);
    assert_eq!(trap_hits.load(Ordering::SeqCst), 1);
    assert!(ctx.source_tracking());
    assert_eq!(manager.script(s.id).unwrap().ref_count(), 0);
}

#[test]
fn test_evaluate_in_stale_frame() {
    let manager = manager();
    let ctx = MockContext::new(1);
    manager.attach(&ctx.as_dyn()).unwrap();
    let f = script(1, "f", 4);
    ctx.load(&f);

    let frames: Arc<Mutex<Vec<StackFrame>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = frames.clone();
    manager
        .set_instruction_hook(
            ProgramCounter::new(f.id, 0),
            Some(Arc::new(move |state: &ThreadSuspendState, _: ProgramCounter| {
                sink.lock().push(state.current_frame().unwrap().unwrap());
            })),
        )
        .unwrap();
    ctx.run(&f, 0..4, None);

    let frame = frames.lock().pop().unwrap();
    assert!(matches!(
        manager.evaluate_in_frame(&frame, "1", "<eval>", 1),
        Err(DebugError::InvalidFrame)
    ));
}

#[test]
fn test_evaluation_failure_is_swallowed() {
    let manager = Arc::new(manager());
    let ctx = MockContext::new(1);
    manager.attach(&ctx.as_dyn()).unwrap();
    ctx.set_evaluator(Arc::new(|_: &MockContext, _: &EvalRequest<'_>| {
        Err(DebugError::eval_failure("SyntaxError: unexpected end of input"))
    }));

    let outcome = Arc::new(Mutex::new(None));
    let sink = outcome.clone();
    let weak = Arc::downgrade(&manager);
    manager.set_debug_break_hook(Some(Arc::new(
        move |state: &ThreadSuspendState, _: &BreakReason| {
            let frame = state.current_frame().unwrap().unwrap();
            if let Some(manager) = weak.upgrade() {
                *sink.lock() = Some(manager.evaluate_in_frame(&frame, "(", "<eval>", 1));
            }
        },
    )));

    let f = script(1, "f", 4);
    let token = ctx.enter(Some(&f), CallKind::Call, None);
    assert!(ctx.debugger_statement(&token, 1).is_continue());
    ctx.exit(token, CallOutcome::Returned(None));

    assert!(matches!(*outcome.lock(), Some(Ok(None))));
    assert!(ctx.source_tracking());
}
