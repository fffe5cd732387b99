//! Per-function debug metadata.
//!
//! A [`ScriptRecord`] is the side-table entry the debugger keeps for one
//! compiled function or top-level script. The interpreter only hands out a
//! [`ScriptId`]; the record never owns the interpreter's function object.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{DebugError, DebugResult};
use crate::line_map::LineMap;
use crate::trap::TrapTable;

/// Opaque identity of a compiled function, minted by the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptId(pub u64);

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the interpreter reports about a compiled function when it is loaded
/// or first called
#[derive(Debug, Clone)]
pub struct ScriptDescriptor {
    /// Function identity
    pub id: ScriptId,
    /// Source file or URL
    pub filename: Arc<str>,
    /// Function name (`None` for top-level scripts and anonymous functions)
    pub function_name: Option<String>,
    /// First source line
    pub base_line: u32,
    /// Number of source lines spanned
    pub line_extent: u32,
    /// Number of instruction offsets
    pub code_len: u32,
    /// pc → line table
    pub line_map: LineMap,
}

impl ScriptDescriptor {
    /// Create a new descriptor builder
    pub fn builder(id: ScriptId, filename: impl Into<Arc<str>>) -> ScriptDescriptorBuilder {
        ScriptDescriptorBuilder::new(id, filename)
    }

    /// Get the function name or `<top-level>`
    pub fn display_name(&self) -> &str {
        self.function_name.as_deref().unwrap_or("<top-level>")
    }
}

/// Builder for [`ScriptDescriptor`]
#[derive(Debug)]
pub struct ScriptDescriptorBuilder {
    id: ScriptId,
    filename: Arc<str>,
    function_name: Option<String>,
    base_line: u32,
    line_extent: u32,
    code_len: u32,
    line_map: LineMap,
}

impl ScriptDescriptorBuilder {
    /// Create a builder for the given identity and file
    pub fn new(id: ScriptId, filename: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            filename: filename.into(),
            function_name: None,
            base_line: 1,
            line_extent: 0,
            code_len: 0,
            line_map: LineMap::new(),
        }
    }

    /// Set function name
    pub fn function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = Some(name.into());
        self
    }

    /// Set first source line
    pub fn base_line(mut self, line: u32) -> Self {
        self.base_line = line;
        self
    }

    /// Set number of source lines spanned
    pub fn line_extent(mut self, extent: u32) -> Self {
        self.line_extent = extent;
        self
    }

    /// Set instruction count
    pub fn code_len(mut self, len: u32) -> Self {
        self.code_len = len;
        self
    }

    /// Set the line table
    pub fn line_map(mut self, map: LineMap) -> Self {
        self.line_map = map;
        self
    }

    /// Build the descriptor
    pub fn build(self) -> ScriptDescriptor {
        ScriptDescriptor {
            id: self.id,
            filename: self.filename,
            function_name: self.function_name,
            base_line: self.base_line,
            line_extent: self.line_extent,
            code_len: self.code_len,
            line_map: self.line_map,
        }
    }
}

/// Packed `SlotHandle` value meaning "not linked into any list"
pub(crate) const UNLINKED: u64 = u64::MAX;

/// Debug metadata for one compiled function
pub struct ScriptRecord {
    id: ScriptId,
    filename: Arc<str>,
    function_name: Option<String>,
    base_line: u32,
    end_line: u32,
    code_len: u32,
    line_map: LineMap,

    valid: AtomicBool,
    /// Mutated only under the lifecycle tracker lock
    ref_count: AtomicU32,
    /// Packed tracker slot handle, mutated only under the tracker lock
    pub(crate) link: AtomicU64,
    remove_on_release: AtomicBool,

    interrupt_flag: AtomicBool,
    has_traps: AtomicBool,
    traps: Mutex<TrapTable>,
}

impl ScriptRecord {
    pub(crate) fn new(descriptor: &ScriptDescriptor) -> Arc<Self> {
        let extent_end = descriptor
            .base_line
            .saturating_add(descriptor.line_extent.saturating_sub(1));
        let end_line = descriptor
            .line_map
            .max_line()
            .map_or(extent_end, |max| max.max(extent_end));

        Arc::new(Self {
            id: descriptor.id,
            filename: descriptor.filename.clone(),
            function_name: descriptor.function_name.clone(),
            base_line: descriptor.base_line,
            end_line,
            code_len: descriptor.code_len,
            line_map: descriptor.line_map.clone(),
            valid: AtomicBool::new(true),
            ref_count: AtomicU32::new(0),
            link: AtomicU64::new(UNLINKED),
            remove_on_release: AtomicBool::new(false),
            interrupt_flag: AtomicBool::new(false),
            has_traps: AtomicBool::new(false),
            traps: Mutex::new(TrapTable::new(descriptor.code_len)),
        })
    }

    /// Function identity
    pub fn id(&self) -> ScriptId {
        self.id
    }

    /// Source file or URL
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Function name, `None` for top-level scripts
    pub fn function_name(&self) -> Option<&str> {
        self.function_name.as_deref()
    }

    /// First source line
    pub fn base_line(&self) -> u32 {
        self.base_line
    }

    /// Last source line
    pub fn end_line(&self) -> u32 {
        self.end_line
    }

    /// Number of instruction offsets
    pub fn code_len(&self) -> u32 {
        self.code_len
    }

    /// The immutable pc → line table
    pub fn line_map(&self) -> &LineMap {
        &self.line_map
    }

    /// Source line for `pc`; offsets before the first entry map to the base line
    pub fn line_for_pc(&self, pc: u32) -> u32 {
        self.line_map.line_for_pc(pc).unwrap_or(self.base_line)
    }

    /// First pc of the closest line at or after `line`
    pub fn pc_for_line(&self, line: u32) -> Option<u32> {
        self.line_map.pc_for_line(line)
    }

    /// Whether the record is still live. `false` is terminal.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Number of calls currently executing this script
    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub(crate) fn store_ref_count(&self, count: u32) {
        self.ref_count.store(count, Ordering::Release);
    }

    /// Whether any trap is set on this script
    #[inline]
    pub fn has_traps(&self) -> bool {
        self.has_traps.load(Ordering::Acquire)
    }

    /// Whether an interrupt has been stamped on this script
    #[inline]
    pub fn interrupt_pending(&self) -> bool {
        self.interrupt_flag.load(Ordering::Acquire)
    }

    /// Interpreter fast path: whether instruction hooks need to run at all
    #[inline]
    pub fn wants_instruction_hook(&self) -> bool {
        self.has_traps.load(Ordering::Relaxed) || self.interrupt_flag.load(Ordering::Relaxed)
    }

    pub(crate) fn set_interrupt(&self, on: bool) {
        self.interrupt_flag.store(on, Ordering::Release);
    }

    pub(crate) fn take_interrupt(&self) -> bool {
        self.interrupt_flag.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn mark_remove_on_release(&self) {
        self.remove_on_release.store(true, Ordering::Release);
    }

    pub(crate) fn remove_on_release(&self) -> bool {
        self.remove_on_release.load(Ordering::Acquire)
    }

    fn check_valid(&self) -> DebugResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(DebugError::invalid_state(format!(
                "script {} has been invalidated",
                self.id
            )))
        }
    }

    /// Set a trap at `pc`. Returns `false` if one was already set.
    pub fn set_trap(&self, pc: u32) -> DebugResult<bool> {
        let mut traps = self.traps.lock();
        self.check_valid()?;
        if pc >= traps.len() {
            return Err(DebugError::PcOutOfRange {
                pc,
                len: traps.len(),
            });
        }
        let inserted = traps.insert(pc);
        if inserted && traps.count() == 1 {
            self.has_traps.store(true, Ordering::Release);
        }
        Ok(inserted)
    }

    /// Clear the trap at `pc`. Returns `false` if none was set.
    pub fn clear_trap(&self, pc: u32) -> DebugResult<bool> {
        let mut traps = self.traps.lock();
        self.check_valid()?;
        let removed = traps.remove(pc);
        if removed && traps.count() == 0 {
            self.has_traps.store(false, Ordering::Release);
        }
        Ok(removed)
    }

    /// Clear every trap, returning how many were set
    pub fn clear_all_traps(&self) -> DebugResult<u32> {
        let mut traps = self.traps.lock();
        self.check_valid()?;
        let cleared = traps.count();
        traps.clear();
        self.has_traps.store(false, Ordering::Release);
        Ok(cleared)
    }

    /// Whether `pc` is trapped
    pub fn is_trapped(&self, pc: u32) -> bool {
        self.traps.lock().contains(pc)
    }

    /// Number of traps set
    pub fn trap_count(&self) -> u32 {
        self.traps.lock().count()
    }

    /// Trapped offsets in ascending order
    pub fn traps(&self) -> Vec<u32> {
        self.traps.lock().iter().collect()
    }

    /// Mark the record dead. Returns `true` only for the call that did it.
    pub(crate) fn invalidate(&self) -> bool {
        let mut traps = self.traps.lock();
        if !self.valid.swap(false, Ordering::AcqRel) {
            return false;
        }
        traps.clear();
        self.has_traps.store(false, Ordering::Release);
        self.interrupt_flag.store(false, Ordering::Release);
        true
    }
}

impl fmt::Debug for ScriptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptRecord")
            .field("id", &self.id)
            .field("filename", &self.filename)
            .field("function_name", &self.function_name)
            .field("lines", &(self.base_line..=self.end_line))
            .field("valid", &self.is_valid())
            .field("ref_count", &self.ref_count())
            .field("has_traps", &self.has_traps())
            .finish()
    }
}
