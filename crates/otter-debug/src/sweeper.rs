//! Background reclamation of fallow script records.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info_span, trace, warn};

use crate::error::{DebugError, DebugResult};
use crate::registry::ScriptRegistry;

const THREAD_NAME: &str = "otter-debug-sweeper";

struct SweeperShared {
    /// Current tick period
    interval_ms: AtomicU32,
    /// Completed sweep passes
    ticks: AtomicU64,
    /// Mutex for condvar
    mutex: Mutex<()>,
    /// Wakes the worker early on stop or reconfiguration
    condvar: Condvar,
}

/// One spawned thread and its private stop request
struct Worker {
    handle: JoinHandle<()>,
    discontinue: Arc<AtomicBool>,
}

/// Periodically evicts fallow records beyond the registry's grace count
pub struct ReclamationSweeper {
    registry: Weak<ScriptRegistry>,
    shared: Arc<SweeperShared>,
    /// Background thread, `None` when stopped
    worker: Mutex<Option<Worker>>,
}

impl ReclamationSweeper {
    /// Create a stopped sweeper for `registry`
    pub fn new(registry: Weak<ScriptRegistry>) -> Self {
        Self {
            registry,
            shared: Arc::new(SweeperShared {
                interval_ms: AtomicU32::new(0),
                ticks: AtomicU64::new(0),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Set the tick period. 0 stops the thread; a non-zero period starts it
    /// if needed, otherwise takes effect at the next wake-up.
    pub fn configure(&self, interval_ms: u32) -> DebugResult<()> {
        if interval_ms == 0 {
            self.stop();
            return Ok(());
        }

        let mut worker = self.worker.lock();
        {
            let _guard = self.shared.mutex.lock();
            self.shared.interval_ms.store(interval_ms, Ordering::Release);
            self.shared.condvar.notify_all();
        }
        match worker.take() {
            Some(running) if !running.handle.is_finished() => {
                *worker = Some(running);
                debug!(interval_ms, "sweeper interval changed");
                return Ok(());
            }
            Some(dead) => {
                if dead.handle.join().is_err() {
                    warn!("sweeper thread panicked, restarting");
                }
            }
            None => {}
        }

        let discontinue = Arc::new(AtomicBool::new(false));
        let shared = self.shared.clone();
        let registry = self.registry.clone();
        let stop = discontinue.clone();
        let handle = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || run(shared, stop, registry))
            .map_err(|e| DebugError::Sweeper(e.to_string()))?;
        *worker = Some(Worker {
            handle,
            discontinue,
        });
        debug!(interval_ms, "sweeper started");
        Ok(())
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(&self) {
        let handle = {
            let mut worker = self.worker.lock();
            let Some(Worker {
                handle,
                discontinue,
            }) = worker.take()
            else {
                return;
            };
            let _guard = self.shared.mutex.lock();
            discontinue.store(true, Ordering::Release);
            self.shared.interval_ms.store(0, Ordering::Release);
            self.shared.condvar.notify_all();
            handle
        };
        if handle.thread().id() != std::thread::current().id() {
            let _ = handle.join();
        }
        debug!("sweeper stopped");
    }

    /// Whether the background thread is running
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Current tick period in milliseconds, 0 when stopped
    pub fn interval_ms(&self) -> u32 {
        self.shared.interval_ms.load(Ordering::Acquire)
    }

    /// Number of sweep passes completed by the background thread
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }
}

impl Drop for ReclamationSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ReclamationSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReclamationSweeper")
            .field("running", &self.is_running())
            .field("interval_ms", &self.interval_ms())
            .field("ticks", &self.ticks())
            .finish()
    }
}

fn run(
    shared: Arc<SweeperShared>,
    discontinue: Arc<AtomicBool>,
    registry: Weak<ScriptRegistry>,
) {
    let _span = info_span!("sweeper").entered();
    loop {
        {
            let mut guard = shared.mutex.lock();
            if discontinue.load(Ordering::Acquire) {
                break;
            }
            let interval = shared.interval_ms.load(Ordering::Acquire);
            shared
                .condvar
                .wait_for(&mut guard, Duration::from_millis(u64::from(interval)));
            if discontinue.load(Ordering::Acquire) {
                break;
            }
        }

        let Some(registry) = registry.upgrade() else {
            trace!("registry dropped, sweeper exiting");
            break;
        };
        let evicted = registry.sweep();
        shared.ticks.fetch_add(1, Ordering::AcqRel);
        if evicted > 0 {
            debug!(evicted, fallow = registry.fallow_count(), "sweep pass");
        } else {
            trace!("sweep pass, nothing to evict");
        }
    }
}
