//! A growable bitmap marking which entity slots hold a value.

use bitvec::vec::BitVec;

/// Presence bits are allocated in blocks of this many slots.
const BLOCK_BITS: usize = 64;

/// A fixed-granularity growable bitmap over entity slots.
///
/// Capacity only ever grows, and growth preserves existing bits.
/// The number of set bits is tracked so that [`len`](Self::len) is O(1).
#[derive(Debug, Default)]
pub struct PresenceSet {
    bits: BitVec,
    len:  usize,
}

impl PresenceSet {
    /// Creates an empty set.
    pub fn new() -> Self { Self::default() }

    /// Grows the bitmap to cover `index`, rounded up to the block granularity.
    ///
    /// Growth is geometric: the new capacity is at least double the old one
    /// to amortize reallocation over repeated single-slot extensions.
    pub fn grow_to(&mut self, index: usize) {
        if index < self.bits.len() {
            return;
        }
        let blocks = index / BLOCK_BITS + 1;
        let target = (blocks * BLOCK_BITS).max(self.bits.len() * 2);
        self.bits.resize(target, false);
    }

    /// Whether the bit for `index` is set. Out-of-capacity indices read as unset.
    pub fn contains(&self, index: usize) -> bool {
        match self.bits.get(index) {
            Some(bit) => *bit,
            None => false,
        }
    }

    /// Sets the bit for `index`, growing if needed.
    /// Returns `false` if the bit was already set.
    pub fn set(&mut self, index: usize) -> bool {
        self.grow_to(index);
        if *self.bits.get(index).expect("grown to cover index") {
            return false;
        }
        self.bits.set(index, true);
        self.len += 1;
        true
    }

    /// Clears the bit for `index`. Returns `false` if the bit was not set.
    pub fn clear(&mut self, index: usize) -> bool {
        if !self.contains(index) {
            return false;
        }
        self.bits.set(index, false);
        self.len -= 1;
        true
    }

    /// The number of set bits.
    pub fn len(&self) -> usize { self.len }

    /// Whether no bits are set.
    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// The number of slots currently covered by the bitmap.
    pub fn capacity(&self) -> usize { self.bits.len() }

    /// Iterates over the indices of set bits in increasing order.
    ///
    /// The iterator is lazy, finite and restartable;
    /// callers must not grow or mutate the set while iterating.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ { self.bits.iter_ones() }
}
