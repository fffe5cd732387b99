//! Active/fallow list discipline for script records.
//!
//! ## Design
//!
//! - **Arena**: records live in a `Vec` of slots addressed by a stable
//!   [`SlotHandle`] (index + generation), so a freed and reused slot is never
//!   mistaken for the record that used to occupy it
//! - **Handle-linked lists**: `prev`/`next` are slot indices; moving a record
//!   between lists is an O(1) splice
//! - **One lock**: every list mutation happens under the tracker mutex
//!
//! Each primitive checks the record's current membership first. A mismatch is
//! an internal bug and is reported through `contract_violation`.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::{Mutex, MutexGuard};

use crate::error::{DebugResult, contract_violation};
use crate::record::{ScriptRecord, UNLINKED};

/// Stable handle to an arena slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    index: u32,
    generation: u32,
}

impl SlotHandle {
    fn pack(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    fn unpack(raw: u64) -> Option<Self> {
        (raw != UNLINKED).then_some(Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        })
    }

    /// Slot index
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Which list a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// At least one call in progress
    Active,
    /// Not executing, retained for reuse
    Fallow,
}

#[derive(Debug, Default)]
struct Slot {
    record: Option<Arc<ScriptRecord>>,
    generation: u32,
    list: Option<Membership>,
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ListEnds {
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

/// List state, only reachable through [`LifecycleTracker::lock`]
#[derive(Debug, Default)]
pub struct TrackerState {
    slots: Vec<Slot>,
    free: Vec<u32>,
    active: ListEnds,
    fallow: ListEnds,
}

impl TrackerState {
    fn ends(&self, list: Membership) -> ListEnds {
        match list {
            Membership::Active => self.active,
            Membership::Fallow => self.fallow,
        }
    }

    fn ends_mut(&mut self, list: Membership) -> &mut ListEnds {
        match list {
            Membership::Active => &mut self.active,
            Membership::Fallow => &mut self.fallow,
        }
    }

    /// Slot index of `record` if it is linked into this tracker
    fn locate(&self, record: &Arc<ScriptRecord>) -> Option<u32> {
        let handle = SlotHandle::unpack(record.link.load(Ordering::Acquire))?;
        let slot = self.slots.get(handle.index as usize)?;
        let same = slot.generation == handle.generation
            && slot.record.as_ref().is_some_and(|r| Arc::ptr_eq(r, record));
        same.then_some(handle.index)
    }

    /// Current list of `record`, `None` if it is not tracked
    pub fn membership(&self, record: &Arc<ScriptRecord>) -> Option<Membership> {
        self.locate(record)
            .and_then(|idx| self.slots[idx as usize].list)
    }

    fn link_tail(&mut self, idx: u32, list: Membership) {
        let tail = self.ends(list).tail;
        {
            let slot = &mut self.slots[idx as usize];
            slot.prev = tail;
            slot.next = None;
            slot.list = Some(list);
        }
        match tail {
            Some(t) => self.slots[t as usize].next = Some(idx),
            None => self.ends_mut(list).head = Some(idx),
        }
        let ends = self.ends_mut(list);
        ends.tail = Some(idx);
        ends.len += 1;
    }

    fn unlink(&mut self, idx: u32) -> Option<Membership> {
        let (prev, next, list) = {
            let slot = &mut self.slots[idx as usize];
            let list = slot.list.take()?;
            (slot.prev.take(), slot.next.take(), list)
        };
        match prev {
            Some(p) => self.slots[p as usize].next = next,
            None => self.ends_mut(list).head = next,
        }
        match next {
            Some(n) => self.slots[n as usize].prev = prev,
            None => self.ends_mut(list).tail = prev,
        }
        self.ends_mut(list).len -= 1;
        Some(list)
    }

    fn allocate(&mut self, record: &Arc<ScriptRecord>) -> u32 {
        let idx = match self.free.pop() {
            Some(idx) => idx,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[idx as usize];
        slot.record = Some(record.clone());
        let handle = SlotHandle {
            index: idx,
            generation: slot.generation,
        };
        record.link.store(handle.pack(), Ordering::Release);
        idx
    }

    fn release_slot(&mut self, idx: u32) -> Option<Arc<ScriptRecord>> {
        let slot = &mut self.slots[idx as usize];
        let record = slot.record.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(idx);
        if let Some(record) = &record {
            record.link.store(UNLINKED, Ordering::Release);
        }
        record
    }

    fn add(&mut self, record: &Arc<ScriptRecord>, list: Membership) -> DebugResult<SlotHandle> {
        if self.locate(record).is_some() {
            return Err(contract_violation("record added while already tracked"));
        }
        let idx = self.allocate(record);
        self.link_tail(idx, list);
        Ok(SlotHandle {
            index: idx,
            generation: self.slots[idx as usize].generation,
        })
    }

    /// Track a new record at the active tail
    pub fn add_active(&mut self, record: &Arc<ScriptRecord>) -> DebugResult<SlotHandle> {
        self.add(record, Membership::Active)
    }

    /// Track a new record at the fallow tail
    pub fn add_fallow(&mut self, record: &Arc<ScriptRecord>) -> DebugResult<SlotHandle> {
        self.add(record, Membership::Fallow)
    }

    /// Stop tracking a record, returning the list it was in
    pub fn remove(&mut self, record: &Arc<ScriptRecord>) -> DebugResult<Membership> {
        let Some(idx) = self.locate(record) else {
            return Err(contract_violation("removing a record that is not tracked"));
        };
        let list = self.unlink(idx);
        self.release_slot(idx);
        list.ok_or_else(|| contract_violation("tracked record linked into no list"))
    }

    fn move_between(
        &mut self,
        record: &Arc<ScriptRecord>,
        from: Membership,
        to: Membership,
        what: &'static str,
    ) -> DebugResult<()> {
        match self.locate(record) {
            Some(idx) if self.slots[idx as usize].list == Some(from) => {
                self.unlink(idx);
                self.link_tail(idx, to);
                Ok(())
            }
            _ => Err(contract_violation(what)),
        }
    }

    /// Fallow → active (0→1 reference transition)
    pub fn move_fallow_to_active(&mut self, record: &Arc<ScriptRecord>) -> DebugResult<()> {
        self.move_between(
            record,
            Membership::Fallow,
            Membership::Active,
            "activating a record that is not fallow",
        )
    }

    /// Active → fallow tail (1→0 reference transition)
    pub fn move_active_to_fallow_tail(&mut self, record: &Arc<ScriptRecord>) -> DebugResult<()> {
        self.move_between(
            record,
            Membership::Active,
            Membership::Fallow,
            "retiring a record that is not active",
        )
    }

    /// Oldest fallow record
    pub fn fallow_head(&self) -> Option<Arc<ScriptRecord>> {
        self.fallow
            .head
            .and_then(|idx| self.slots[idx as usize].record.clone())
    }

    /// Remove and return the oldest fallow record
    pub fn pop_fallow_head(&mut self) -> Option<Arc<ScriptRecord>> {
        let idx = self.fallow.head?;
        self.unlink(idx);
        self.release_slot(idx)
    }

    /// Number of active records
    pub fn active_len(&self) -> usize {
        self.active.len
    }

    /// Number of fallow records
    pub fn fallow_len(&self) -> usize {
        self.fallow.len
    }

    fn walk(&self, list: Membership) -> impl Iterator<Item = &Arc<ScriptRecord>> + '_ {
        let mut cursor = self.ends(list).head;
        std::iter::from_fn(move || {
            let idx = cursor?;
            let slot = &self.slots[idx as usize];
            cursor = slot.next;
            slot.record.as_ref()
        })
    }

    /// Active records, oldest first
    pub fn active(&self) -> impl Iterator<Item = &Arc<ScriptRecord>> + '_ {
        self.walk(Membership::Active)
    }

    /// Fallow records, oldest first
    pub fn fallow(&self) -> impl Iterator<Item = &Arc<ScriptRecord>> + '_ {
        self.walk(Membership::Fallow)
    }
}

/// Owner of the active and fallow lists
#[derive(Debug, Default)]
pub struct LifecycleTracker {
    state: Mutex<TrackerState>,
}

impl LifecycleTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the lists. Keep the guard short-lived: it serializes every
    /// activation and release in the process.
    pub fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock()
    }

    /// Number of active records
    pub fn active_len(&self) -> usize {
        self.state.lock().active_len()
    }

    /// Number of fallow records
    pub fn fallow_len(&self) -> usize {
        self.state.lock().fallow_len()
    }

    /// List a record belongs to
    pub fn membership(&self, record: &Arc<ScriptRecord>) -> Option<Membership> {
        self.state.lock().membership(record)
    }
}
