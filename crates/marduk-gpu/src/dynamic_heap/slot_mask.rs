use std::fmt;

/// Maximum number of root slots a dynamic heap tracks.
pub const MAX_DESCRIPTOR_TABLES: usize = 32;

/// Set of root slots, one bit per slot.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct SlotMask(u32);

impl SlotMask {
    pub const EMPTY: SlotMask = SlotMask(0);

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        SlotMask(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn insert(&mut self, slot: usize) {
        debug_assert!(slot < MAX_DESCRIPTOR_TABLES, "root slot {slot} out of range");
        self.0 |= 1 << slot;
    }

    #[inline]
    pub fn remove(&mut self, slot: usize) {
        debug_assert!(slot < MAX_DESCRIPTOR_TABLES, "root slot {slot} out of range");
        self.0 &= !(1 << slot);
    }

    #[inline]
    pub fn contains(self, slot: usize) -> bool {
        slot < MAX_DESCRIPTOR_TABLES && self.0 & (1 << slot) != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Set slots, lowest first.
    pub fn iter(self) -> SlotIter {
        SlotIter(self.0)
    }
}

impl fmt::Debug for SlotMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotMask({:#034b})", self.0)
    }
}

pub struct SlotIter(u32);

impl Iterator for SlotIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let slot = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(slot)
    }
}

impl IntoIterator for SlotMask {
    type Item = usize;
    type IntoIter = SlotIter;

    fn into_iter(self) -> SlotIter {
        self.iter()
    }
}
