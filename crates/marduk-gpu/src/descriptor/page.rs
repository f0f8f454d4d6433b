use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use crate::native::{CpuDescriptorHandle, DescriptorHeapType, NativeDescriptorHeap};

/// Fixed-capacity block of descriptor slots with a coalescing free list.
///
/// Free blocks are indexed twice:
/// - by offset, to find neighbours when a block is returned
/// - by `(size, offset)`, to find the smallest block that fits a request
///
/// Both indices always describe the same set of blocks.
///
/// Freed blocks are not reusable immediately; they wait in a stale queue until
/// [`release_stale_descriptors`](Self::release_stale_descriptors), because the
/// GPU may still read them.
pub struct DescriptorPage {
    heap: Arc<dyn NativeDescriptorHeap>,
    base: CpuDescriptorHandle,
    increment: u32,
    capacity: u32,
    num_free_handles: u32,

    free_by_offset: BTreeMap<u32, u32>,
    free_by_size: BTreeSet<(u32, u32)>,

    stale: VecDeque<(u32, u32)>,
}

impl DescriptorPage {
    pub(crate) fn new(heap: Arc<dyn NativeDescriptorHeap>, increment: u32) -> Self {
        let capacity = heap.capacity();
        let mut page = Self {
            base: heap.cpu_start(),
            heap,
            increment,
            capacity,
            num_free_handles: 0,
            free_by_offset: BTreeMap::new(),
            free_by_size: BTreeSet::new(),
            stale: VecDeque::new(),
        };
        page.add_new_block(0, capacity);
        page
    }

    #[inline]
    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap.heap_type()
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn num_free_handles(&self) -> u32 {
        self.num_free_handles
    }

    /// Whether a contiguous run of `count` slots is currently free.
    pub fn has_space(&self, count: u32) -> bool {
        self.free_by_size.range((count, 0)..).next().is_some()
    }

    pub fn free_block_count(&self) -> usize {
        debug_assert_eq!(self.free_by_offset.len(), self.free_by_size.len());
        self.free_by_offset.len()
    }

    /// Free blocks as `(offset, size)` in offset order.
    pub fn free_blocks(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.free_by_offset.iter().map(|(&offset, &size)| (offset, size))
    }

    /// Carves `count` slots out of the smallest free block that can hold them.
    ///
    /// Returns the slot offset and the CPU handle of the first slot.
    pub(crate) fn allocate(&mut self, count: u32) -> Option<(u32, CpuDescriptorHandle)> {
        if count == 0 || count > self.num_free_handles {
            return None;
        }

        let &(block_size, offset) = self.free_by_size.range((count, 0)..).next()?;
        self.free_by_size.remove(&(block_size, offset));
        self.free_by_offset.remove(&offset);

        if block_size > count {
            self.insert_block(offset + count, block_size - count);
        }

        self.num_free_handles -= count;
        Some((offset, self.base.offset(offset, self.increment)))
    }

    /// Queues a block for reclamation at the next stale release.
    pub(crate) fn free(&mut self, offset: u32, count: u32) {
        debug_assert!(offset + count <= self.capacity, "freeing a block outside this page");
        self.stale.push_back((offset, count));
    }

    #[inline]
    pub fn stale_count(&self) -> usize {
        self.stale.len()
    }

    /// Returns every stale block to the free list.
    pub fn release_stale_descriptors(&mut self) {
        while let Some((offset, count)) = self.stale.pop_front() {
            self.free_block(offset, count);
        }
    }

    fn add_new_block(&mut self, offset: u32, count: u32) {
        self.insert_block(offset, count);
        self.num_free_handles += count;
    }

    fn insert_block(&mut self, offset: u32, size: u32) {
        self.free_by_offset.insert(offset, size);
        self.free_by_size.insert((size, offset));
    }

    fn remove_block(&mut self, offset: u32, size: u32) {
        self.free_by_offset.remove(&offset);
        self.free_by_size.remove(&(size, offset));
    }

    fn free_block(&mut self, offset: u32, count: u32) {
        let mut offset = offset;
        let mut size = count;

        let prev = self
            .free_by_offset
            .range(..offset)
            .next_back()
            .map(|(&o, &s)| (o, s));
        if let Some((prev_offset, prev_size)) = prev {
            if prev_offset + prev_size == offset {
                self.remove_block(prev_offset, prev_size);
                offset = prev_offset;
                size += prev_size;
            }
        }

        let next = self
            .free_by_offset
            .range(offset + size..)
            .next()
            .map(|(&o, &s)| (o, s));
        if let Some((next_offset, next_size)) = next {
            if offset + size == next_offset {
                self.remove_block(next_offset, next_size);
                size += next_size;
            }
        }

        self.insert_block(offset, size);
        self.num_free_handles += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeDevice;
    use crate::native::soft::SoftDevice;

    fn page(capacity: u32) -> DescriptorPage {
        let device = SoftDevice::new();
        let heap = device
            .create_descriptor_heap(DescriptorHeapType::CbvSrvUav, capacity, false)
            .unwrap();
        let increment = device.descriptor_handle_increment_size(DescriptorHeapType::CbvSrvUav);
        DescriptorPage::new(heap, increment)
    }

    #[test]
    fn allocate_free_release_restores_free_handles() {
        let mut page = page(64);
        let before = page.num_free_handles();

        let (a, _) = page.allocate(10).unwrap();
        let (b, _) = page.allocate(7).unwrap();
        assert_eq!(page.num_free_handles(), before - 17);

        page.free(a, 10);
        page.free(b, 7);
        // Deferred until the stale queue is released.
        assert_eq!(page.num_free_handles(), before - 17);

        page.release_stale_descriptors();
        assert_eq!(page.num_free_handles(), before);
        assert_eq!(page.free_blocks().collect::<Vec<_>>(), vec![(0, 64)]);
    }

    #[test]
    fn adjacent_blocks_coalesce_into_one() {
        let mut page = page(8);
        let (a, _) = page.allocate(4).unwrap();
        let (b, _) = page.allocate(4).unwrap();
        assert_eq!((a, b), (0, 4));
        assert_eq!(page.free_block_count(), 0);

        page.free(a, 4);
        page.free(b, 4);
        page.release_stale_descriptors();

        assert_eq!(page.free_blocks().collect::<Vec<_>>(), vec![(0, 8)]);
    }

    #[test]
    fn merges_with_following_block() {
        let mut page = page(16);
        let (a, _) = page.allocate(4).unwrap();
        let (_b, _) = page.allocate(4).unwrap();

        page.free(a, 4);
        page.release_stale_descriptors();

        // [0,4) is free, [4,8) in use, [8,16) free.
        assert_eq!(page.free_blocks().collect::<Vec<_>>(), vec![(0, 4), (8, 8)]);

        page.free(4, 4);
        page.release_stale_descriptors();
        assert_eq!(page.free_blocks().collect::<Vec<_>>(), vec![(0, 16)]);
    }

    #[test]
    fn picks_the_smallest_adequate_block() {
        let mut page = page(32);
        let (a, _) = page.allocate(8).unwrap(); // [0,8)
        let (_, _) = page.allocate(1).unwrap(); // [8,9)
        let (c, _) = page.allocate(3).unwrap(); // [9,12)
        let (_, _) = page.allocate(1).unwrap(); // [12,13)

        page.free(a, 8);
        page.free(c, 3);
        page.release_stale_descriptors();

        // Free: [0,8), [9,12), [13,32). A 3-slot request fits [9,12) exactly.
        let (offset, _) = page.allocate(3).unwrap();
        assert_eq!(offset, 9);
    }

    #[test]
    fn stale_blocks_are_not_reused_before_release() {
        let mut page = page(4);
        let (a, _) = page.allocate(4).unwrap();
        page.free(a, 4);

        assert!(page.allocate(1).is_none());
        assert!(!page.has_space(1));

        page.release_stale_descriptors();
        assert!(page.has_space(4));
    }

    #[test]
    fn handles_advance_by_increment() {
        let mut page = page(8);
        let (_, first) = page.allocate(2).unwrap();
        let (_, second) = page.allocate(1).unwrap();
        assert_eq!(second, first.offset(2, 32));
    }
}
