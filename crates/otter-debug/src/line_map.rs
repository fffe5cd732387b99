//! Program counter to source line mapping

/// A single line table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    /// Instruction offset where this line starts
    pub pc: u32,
    /// Source line (1-indexed)
    pub line: u32,
}

/// Ordered pc → line table for one compiled function.
///
/// Entries are kept sorted by `pc`. A pc between two entries belongs to the
/// earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMap {
    entries: Vec<LineEntry>,
}

impl LineMap {
    /// Create an empty line map
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from `(pc, line)` pairs in any order
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, u32)>) -> Self {
        let mut entries: Vec<LineEntry> = pairs
            .into_iter()
            .map(|(pc, line)| LineEntry { pc, line })
            .collect();
        entries.sort_by_key(|e| e.pc);
        entries.dedup_by_key(|e| e.pc);
        Self { entries }
    }

    /// Append an entry. Entries must be added in pc order.
    pub fn add(&mut self, pc: u32, line: u32) {
        debug_assert!(
            self.entries.last().is_none_or(|last| last.pc < pc),
            "line map entries must be added in increasing pc order"
        );
        self.entries.push(LineEntry { pc, line });
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in pc order
    pub fn entries(&self) -> &[LineEntry] {
        &self.entries
    }

    /// Source line for an instruction offset
    pub fn line_for_pc(&self, pc: u32) -> Option<u32> {
        let idx = self.entries.binary_search_by_key(&pc, |e| e.pc);

        match idx {
            Ok(i) => Some(self.entries[i].line),
            Err(i) if i > 0 => Some(self.entries[i - 1].line),
            _ => None,
        }
    }

    /// Lowest instruction offset for the closest line at or after `line`.
    ///
    /// Returns `None` when every mapped line precedes `line`.
    pub fn pc_for_line(&self, line: u32) -> Option<u32> {
        let mut best: Option<LineEntry> = None;
        for entry in self.entries.iter().filter(|e| e.line >= line) {
            match best {
                Some(b) if b.line <= entry.line => {}
                _ => best = Some(*entry),
            }
        }
        best.map(|e| e.pc)
    }

    /// Highest mapped line
    pub fn max_line(&self) -> Option<u32> {
        self.entries.iter().map(|e| e.line).max()
    }

    /// Whether lines never decrease as pc grows
    pub fn is_monotonic(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].line <= w[1].line)
    }
}
