//! Script registry: identity → record side table.
//!
//! The registry owns the lifecycle tracker and drives every active/fallow
//! transition from reference-count changes:
//!
//! | Transition | Effect |
//! |---|---|
//! | first sight of a `ScriptId` | new record, fallow tail, `Loaded` event |
//! | `ref_count` 0 → 1 | fallow → active, pending interrupt stamped |
//! | `ref_count` 1 → 0 | active → fallow tail, or eviction if removal was requested |
//! | sweep | fallow head evicted while `fallow > grace` |
//!
//! Lock order is map shard → tracker. Nothing touches the map while holding
//! the tracker lock, and hooks are never called with either lock held.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;
use tracing::{debug, trace, warn};

use crate::error::{DebugError, DebugResult};
use crate::hooks::{ScriptEvent, ScriptHook};
use crate::lifecycle::LifecycleTracker;
use crate::record::{ScriptDescriptor, ScriptId, ScriptRecord};

/// Attempts made by [`ScriptRegistry::acquire`] before giving up on a script
/// that keeps being reclaimed underneath it
const ACQUIRE_ATTEMPTS: usize = 3;

/// Side table of debug metadata for every live compiled function
pub struct ScriptRegistry {
    records: DashMap<ScriptId, Arc<ScriptRecord>, FxBuildHasher>,
    tracker: LifecycleTracker,
    grace_count: AtomicU32,
    interrupt_pending: AtomicBool,
    script_hook: RwLock<Option<ScriptHook>>,
}

impl ScriptRegistry {
    /// Create an empty registry retaining up to `grace_count` fallow records
    pub fn new(grace_count: u32) -> Arc<Self> {
        Arc::new(Self {
            records: DashMap::with_hasher(FxBuildHasher),
            tracker: LifecycleTracker::new(),
            grace_count: AtomicU32::new(grace_count),
            interrupt_pending: AtomicBool::new(false),
            script_hook: RwLock::new(None),
        })
    }

    /// The underlying lifecycle lists
    pub fn tracker(&self) -> &LifecycleTracker {
        &self.tracker
    }

    /// Install the script load/evict observer, returning the previous one
    pub fn set_script_hook(&self, hook: Option<ScriptHook>) -> Option<ScriptHook> {
        std::mem::replace(&mut *self.script_hook.write(), hook)
    }

    fn notify(&self, event: ScriptEvent, record: &Arc<ScriptRecord>) {
        let hook = self.script_hook.read().clone();
        if let Some(hook) = hook {
            hook(event, record);
        }
    }

    /// Record for `descriptor.id`, created (and announced) on first sight
    pub fn resolve_or_create(&self, descriptor: &ScriptDescriptor) -> Arc<ScriptRecord> {
        if let Some(record) = self.records.get(&descriptor.id) {
            return record.value().clone();
        }

        let mut created = false;
        let record = self
            .records
            .entry(descriptor.id)
            .or_insert_with(|| {
                let record = ScriptRecord::new(descriptor);
                let tracked = self.tracker.lock().add_fallow(&record);
                debug_assert!(tracked.is_ok(), "fresh record already tracked");
                created = true;
                record
            })
            .value()
            .clone();

        if created {
            debug!(script = %descriptor.id, name = descriptor.display_name(), "script record created");
            self.notify(ScriptEvent::Loaded, &record);
        }
        record
    }

    /// Live record for `id`
    pub fn lookup(&self, id: ScriptId) -> Option<Arc<ScriptRecord>> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    /// Snapshot of every live record
    pub fn records(&self) -> Vec<Arc<ScriptRecord>> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    /// Number of live records (active + fallow, excluding pending removals)
    pub fn live_count(&self) -> usize {
        self.records.len()
    }

    /// Number of active records
    pub fn active_count(&self) -> usize {
        self.tracker.active_len()
    }

    /// Number of fallow records
    pub fn fallow_count(&self) -> usize {
        self.tracker.fallow_len()
    }

    /// Fallow records retained before eviction begins
    pub fn grace_count(&self) -> u32 {
        self.grace_count.load(Ordering::Relaxed)
    }

    /// Change the fallow grace count; takes effect at the next sweep
    pub fn set_grace_count(&self, count: u32) {
        self.grace_count.store(count, Ordering::Relaxed);
    }

    /// Take a reference on `record`, moving it to the active list on 0 → 1
    pub fn activate(&self, record: &Arc<ScriptRecord>) -> DebugResult<()> {
        let mut lists = self.tracker.lock();
        if !record.is_valid() {
            return Err(DebugError::invalid_state(format!(
                "cannot activate invalidated script {}",
                record.id()
            )));
        }
        if lists.membership(record).is_none() {
            return Err(DebugError::invalid_state(format!(
                "script {} is being reclaimed",
                record.id()
            )));
        }

        let count = record.ref_count();
        if count == 0 {
            lists.move_fallow_to_active(record)?;
            if self.interrupt_pending.load(Ordering::Acquire) {
                record.set_interrupt(true);
            }
            trace!(script = %record.id(), "script active");
        }
        record.store_ref_count(count + 1);
        Ok(())
    }

    /// Drop a reference on `record`.
    ///
    /// On the last reference the record is evicted when `remove` is set (or
    /// an unload arrived while it was running), otherwise it is retired to the
    /// fallow tail.
    pub fn release(&self, record: &Arc<ScriptRecord>, remove: bool) -> DebugResult<()> {
        let evict = {
            let mut lists = self.tracker.lock();
            let count = record.ref_count();
            if count == 0 {
                return Err(DebugError::invalid_state(format!(
                    "unbalanced release of script {}",
                    record.id()
                )));
            }
            record.store_ref_count(count - 1);
            if count > 1 {
                false
            } else if remove || record.remove_on_release() {
                lists.remove(record)?;
                true
            } else {
                lists.move_active_to_fallow_tail(record)?;
                trace!(script = %record.id(), "script fallow");
                false
            }
        };

        if evict {
            self.finish_eviction(record, ScriptEvent::Unloaded);
        }
        Ok(())
    }

    /// Resolve and activate in one step.
    ///
    /// A record popped by a concurrent sweep is still valid for a moment but
    /// no longer tracked; in that case the stale mapping is dropped and a
    /// fresh record is created.
    pub fn acquire(&self, descriptor: &ScriptDescriptor) -> DebugResult<Arc<ScriptRecord>> {
        for _ in 0..ACQUIRE_ATTEMPTS {
            let record = self.resolve_or_create(descriptor);
            match self.activate(&record) {
                Ok(()) => return Ok(record),
                Err(e) if e.is_invalid_state() => {
                    trace!(script = %descriptor.id, "stale record, retrying");
                    self.records
                        .remove_if(&descriptor.id, |_, r| Arc::ptr_eq(r, &record));
                }
                Err(e) => return Err(e),
            }
        }
        Err(DebugError::invalid_state(format!(
            "script {} could not be activated",
            descriptor.id
        )))
    }

    /// The interpreter reports that `id` was unloaded.
    ///
    /// Idle records are evicted immediately; running ones are evicted when
    /// their last call returns.
    pub fn script_unloaded(&self, id: ScriptId) {
        let Some((_, record)) = self.records.remove(&id) else {
            trace!(script = %id, "unload of unknown script");
            return;
        };

        let evict = {
            let mut lists = self.tracker.lock();
            if record.ref_count() == 0 && lists.membership(&record).is_some() {
                lists.remove(&record).is_ok()
            } else {
                record.mark_remove_on_release();
                false
            }
        };

        if evict {
            self.finish_eviction(&record, ScriptEvent::Unloaded);
        } else {
            debug!(script = %id, refs = record.ref_count(), "unload deferred until last call returns");
        }
    }

    fn finish_eviction(&self, record: &Arc<ScriptRecord>, event: ScriptEvent) {
        self.records
            .remove_if(&record.id(), |_, r| Arc::ptr_eq(r, record));
        self.notify(event, record);
        if record.invalidate() {
            debug!(script = %record.id(), ?event, "script record invalidated");
        }
    }

    /// Evict fallow records beyond the configured grace count
    pub fn sweep(&self) -> usize {
        self.sweep_with_grace(self.grace_count())
    }

    /// Evict oldest fallow records while more than `grace` remain.
    /// Returns the number evicted.
    pub fn sweep_with_grace(&self, grace: u32) -> usize {
        let mut evicted = 0;
        loop {
            let record = {
                let mut lists = self.tracker.lock();
                if lists.fallow_len() <= grace as usize {
                    break;
                }
                match lists.pop_fallow_head() {
                    Some(record) => record,
                    None => break,
                }
            };
            if record.ref_count() != 0 {
                warn!(script = %record.id(), "referenced record found on the fallow list");
            }
            self.finish_eviction(&record, ScriptEvent::Reclaimed);
            evicted += 1;
        }
        evicted
    }

    /// Raise the global one-shot interrupt and stamp every active record
    pub fn send_interrupt(&self) {
        let lists = self.tracker.lock();
        self.interrupt_pending.store(true, Ordering::Release);
        let mut stamped = 0usize;
        for record in lists.active() {
            record.set_interrupt(true);
            stamped += 1;
        }
        debug!(stamped, "interrupt requested");
    }

    /// Withdraw a pending interrupt
    pub fn clear_interrupt(&self) {
        let lists = self.tracker.lock();
        self.interrupt_pending.store(false, Ordering::Release);
        for record in lists.active() {
            record.set_interrupt(false);
        }
    }

    /// Whether an interrupt is waiting to be delivered
    pub fn interrupt_pending(&self) -> bool {
        self.interrupt_pending.load(Ordering::Acquire)
    }

    /// Try to consume the pending interrupt from an instrumentation point in
    /// `record`. Exactly one caller wins per [`send_interrupt`](Self::send_interrupt).
    pub fn claim_interrupt(&self, record: &ScriptRecord) -> bool {
        if !record.take_interrupt() {
            return false;
        }
        let lists = self.tracker.lock();
        if self
            .interrupt_pending
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        for active in lists.active() {
            active.set_interrupt(false);
        }
        true
    }
}

impl std::fmt::Debug for ScriptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRegistry")
            .field("live", &self.live_count())
            .field("active", &self.active_count())
            .field("fallow", &self.fallow_count())
            .field("grace_count", &self.grace_count())
            .finish()
    }
}
