use std::fmt;
use std::sync::Arc;

use crate::native::CpuDescriptorHandle;

use super::allocator::AllocatorArena;

/// A contiguous run of CPU descriptors carved out of a [`DescriptorPage`](super::DescriptorPage).
///
/// Move-only. Dropping it (or calling [`free`](Self::free)) hands the block back
/// to its page's stale queue; the slots become reusable after the next
/// `release_stale_descriptors`. A freed allocation is null, so freeing twice
/// is a no-op.
pub struct DescriptorAllocation {
    base: CpuDescriptorHandle,
    count: u32,
    increment: u32,
    page: usize,
    offset: u32,
    arena: Option<Arc<AllocatorArena>>,
}

impl DescriptorAllocation {
    /// The null allocation: zero handle, zero descriptors.
    pub fn null() -> Self {
        Self {
            base: CpuDescriptorHandle::NULL,
            count: 0,
            increment: 0,
            page: 0,
            offset: 0,
            arena: None,
        }
    }

    pub(crate) fn new(
        base: CpuDescriptorHandle,
        count: u32,
        increment: u32,
        page: usize,
        offset: u32,
        arena: Arc<AllocatorArena>,
    ) -> Self {
        Self {
            base,
            count,
            increment,
            page,
            offset,
            arena: Some(arena),
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.base.is_null()
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Index of the owning page within its allocator.
    #[inline]
    pub fn page(&self) -> usize {
        self.page
    }

    /// Handle of descriptor `index` within this allocation.
    pub fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle {
        debug_assert!(index < self.count, "descriptor index {index} out of {}", self.count);
        self.base.offset(index, self.increment)
    }

    /// Returns the block to its page and leaves this allocation null.
    pub fn free(&mut self) {
        if let Some(arena) = self.arena.take() {
            arena.free(self.page, self.offset, self.count);
        }
        self.base = CpuDescriptorHandle::NULL;
        self.count = 0;
    }
}

impl Default for DescriptorAllocation {
    fn default() -> Self {
        Self::null()
    }
}

impl Drop for DescriptorAllocation {
    fn drop(&mut self) {
        self.free();
    }
}

impl fmt::Debug for DescriptorAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorAllocation")
            .field("base", &self.base)
            .field("count", &self.count)
            .field("page", &self.page)
            .field("offset", &self.offset)
            .finish()
    }
}
