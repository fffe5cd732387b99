//! Error-reporter override chain.
//!
//! While attached, the debugger's [`ChainedReporter`] sits in the context's
//! reporter slot in front of whatever was installed before. The debugger's
//! [`DebugErrorReporter`](crate::hooks::DebugErrorReporter) decides per report
//! whether it is forwarded, suppressed, or routed to the debug-break hook.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::trace;

use crate::hooks::ErrorDisposition;
use crate::host::{ErrorReport, ErrorReporter, InterpreterContext, ReportOutcome};
use crate::manager::DebuggerCore;

/// Reporter installed on attached contexts
pub struct ChainedReporter {
    core: Weak<DebuggerCore>,
    /// Written once, while installing; readers block until then
    previous: RwLock<Option<Arc<dyn ErrorReporter>>>,
}

impl ChainedReporter {
    pub(crate) fn new(core: Weak<DebuggerCore>) -> Self {
        Self {
            core,
            previous: RwLock::new(None),
        }
    }

    /// Swap this reporter into `ctx` and link the displaced one behind it.
    /// Reports raised during the swap wait for the link instead of skipping
    /// the previous reporter.
    pub(crate) fn install(
        self: &Arc<Self>,
        ctx: &Arc<dyn InterpreterContext>,
    ) -> Option<Arc<dyn ErrorReporter>> {
        let mut slot = self.previous.write();
        let previous = ctx.swap_error_reporter(Some(self.clone() as Arc<dyn ErrorReporter>));
        *slot = previous.clone();
        previous
    }

    /// The reporter this one forwards to
    pub fn previous(&self) -> Option<Arc<dyn ErrorReporter>> {
        self.previous.read().clone()
    }

    fn pass_along(&self, ctx: &Arc<dyn InterpreterContext>, report: &ErrorReport) -> ReportOutcome {
        match self.previous() {
            Some(previous) => previous.report(ctx, report),
            None => ReportOutcome::Reported,
        }
    }
}

impl ErrorReporter for ChainedReporter {
    fn report(&self, ctx: &Arc<dyn InterpreterContext>, report: &ErrorReport) -> ReportOutcome {
        let Some(core) = self.core.upgrade() else {
            return self.pass_along(ctx, report);
        };

        let disposition = core.error_disposition(report);
        trace!(?disposition, message = %report.message, "error report");
        match disposition {
            ErrorDisposition::PassAlong => self.pass_along(ctx, report),
            ErrorDisposition::Return => ReportOutcome::Suppressed,
            ErrorDisposition::Debug => {
                core.break_on_error(ctx, report);
                ReportOutcome::Suppressed
            }
        }
    }
}

impl std::fmt::Debug for ChainedReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainedReporter")
            .field("core_alive", &(self.core.strong_count() > 0))
            .field("has_previous", &self.previous.read().is_some())
            .finish()
    }
}
