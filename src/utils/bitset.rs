//! Dense bit sets keyed by arena index.
//!
//! Used wherever a pass needs a scratch set of blocks or definitions: loop membership,
//! visited sets of traversals and the reachability marks of unreachable code elimination.

/// A fixed-width set of small integers backed by 64-bit words.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// Creates an empty set able to hold indices `0..capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        BitSet {
            words: vec![0; capacity.div_ceil(64)],
            len: capacity,
        }
    }

    /// Number of indices this set can hold.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.len
    }

    /// Adds `index`, returning `true` if it was not present before.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.capacity()`.
    pub fn insert(&mut self, index: usize) -> bool {
        assert!(index < self.len, "bit index {index} out of range {}", self.len);
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let fresh = *word & mask == 0;
        *word |= mask;
        fresh
    }

    /// Removes `index`, returning `true` if it was present.
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let present = *word & mask != 0;
        *word &= !mask;
        present
    }

    /// Tests membership. Indices beyond the capacity are never members.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Number of members.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns `true` if no index is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Removes every member.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Iterates over members in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(i * 64 + bit)
            })
        })
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
