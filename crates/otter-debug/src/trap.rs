//! Packed breakpoint bit table.
//!
//! One bit per instruction offset. The table itself is not synchronized; a
//! [`ScriptRecord`](crate::ScriptRecord) keeps it behind its own lock and
//! mirrors `count > 0` into an atomic fast-path flag.

const WORD_BITS: u32 = u64::BITS;

/// Bit-vector of trapped instruction offsets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrapTable {
    words: Vec<u64>,
    len: u32,
    count: u32,
}

impl TrapTable {
    /// Create an empty table covering `len` instruction offsets
    pub fn new(len: u32) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS) as usize],
            len,
            count: 0,
        }
    }

    /// Number of addressable offsets
    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the table addresses no offsets at all
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of set traps
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    fn slot(pc: u32) -> (usize, u64) {
        ((pc / WORD_BITS) as usize, 1u64 << (pc % WORD_BITS))
    }

    /// Whether `pc` is trapped. Out-of-range offsets are never trapped.
    #[inline]
    pub fn contains(&self, pc: u32) -> bool {
        if pc >= self.len {
            return false;
        }
        let (word, mask) = Self::slot(pc);
        self.words[word] & mask != 0
    }

    /// Set the bit for `pc`. Returns `false` if it was already set.
    ///
    /// # Panics
    /// Panics if `pc` is out of range; callers check against [`len`](Self::len).
    pub fn insert(&mut self, pc: u32) -> bool {
        assert!(pc < self.len, "trap offset {pc} out of range {}", self.len);
        let (word, mask) = Self::slot(pc);
        if self.words[word] & mask != 0 {
            return false;
        }
        self.words[word] |= mask;
        self.count += 1;
        true
    }

    /// Clear the bit for `pc`. Returns `false` if it was not set.
    pub fn remove(&mut self, pc: u32) -> bool {
        if !self.contains(pc) {
            return false;
        }
        let (word, mask) = Self::slot(pc);
        self.words[word] &= !mask;
        self.count -= 1;
        true
    }

    /// Clear every bit
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
        self.count = 0;
    }

    /// Trapped offsets in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let base = i as u32 * WORD_BITS;
            (0..WORD_BITS)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| base + bit)
        })
    }
}
