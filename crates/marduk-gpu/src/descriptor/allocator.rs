use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::native::{DescriptorHeapType, NativeDevice};

use super::{DescriptorAllocation, DescriptorPage};

struct PagePool {
    pages: Vec<DescriptorPage>,
    /// Pages that still report free handles.
    available: BTreeSet<usize>,
    descriptors_per_page: u32,
}

/// Pages of one descriptor type. Allocations refer back to it by page index.
pub(crate) struct AllocatorArena {
    heap_type: DescriptorHeapType,
    increment: u32,
    device: Arc<dyn NativeDevice>,
    pool: Mutex<PagePool>,
}

impl AllocatorArena {
    pub(crate) fn free(&self, page: usize, offset: u32, count: u32) {
        let mut pool = self.pool.lock();
        match pool.pages.get_mut(page) {
            Some(page) => page.free(offset, count),
            None => debug_assert!(false, "descriptor allocation refers to unknown page {page}"),
        }
    }
}

/// Variable-size CPU descriptor allocator for a single heap type.
///
/// Grows by whole pages on demand; a request larger than the current page
/// size raises the page size for every page created afterwards.
pub struct DescriptorAllocator {
    arena: Arc<AllocatorArena>,
}

impl DescriptorAllocator {
    pub fn new(
        device: Arc<dyn NativeDevice>,
        heap_type: DescriptorHeapType,
        descriptors_per_page: u32,
    ) -> Self {
        debug_assert!(descriptors_per_page > 0);
        Self {
            arena: Arc::new(AllocatorArena {
                heap_type,
                increment: device.descriptor_handle_increment_size(heap_type),
                device,
                pool: Mutex::new(PagePool {
                    pages: Vec::new(),
                    available: BTreeSet::new(),
                    descriptors_per_page,
                }),
            }),
        }
    }

    #[inline]
    pub fn heap_type(&self) -> DescriptorHeapType {
        self.arena.heap_type
    }

    /// Allocates `count` contiguous descriptors.
    ///
    /// Exhaustion grows the pool. If the native heap for a new page cannot be
    /// created, the failure is logged and a null allocation is returned.
    pub fn allocate(&self, count: u32) -> DescriptorAllocation {
        debug_assert!(count > 0, "allocating zero descriptors");

        let mut pool = self.arena.pool.lock();
        let PagePool {
            pages,
            available,
            descriptors_per_page,
        } = &mut *pool;

        let mut found = None;
        let mut exhausted = Vec::new();
        for &index in available.iter() {
            let page = &mut pages[index];
            let result = page.allocate(count);
            if page.num_free_handles() == 0 {
                exhausted.push(index);
            }
            if let Some((offset, handle)) = result {
                found = Some((index, offset, handle));
                break;
            }
        }
        for index in exhausted {
            available.remove(&index);
        }

        let (index, offset, handle) = match found {
            Some(found) => found,
            None => {
                *descriptors_per_page = (*descriptors_per_page).max(count);
                let heap = match self.arena.device.create_descriptor_heap(
                    self.arena.heap_type,
                    *descriptors_per_page,
                    false,
                ) {
                    Ok(heap) => heap,
                    Err(err) => {
                        log::error!(
                            "failed to create {:?} descriptor page ({} descriptors): {err}",
                            self.arena.heap_type,
                            descriptors_per_page
                        );
                        return DescriptorAllocation::null();
                    }
                };

                let index = pages.len();
                let mut page = DescriptorPage::new(heap, self.arena.increment);
                log::debug!(
                    "{:?} descriptor allocator: page {} created ({} descriptors)",
                    self.arena.heap_type,
                    index,
                    page.capacity()
                );

                let Some((offset, handle)) = page.allocate(count) else {
                    log::error!("fresh descriptor page cannot hold {count} descriptors");
                    return DescriptorAllocation::null();
                };
                if page.num_free_handles() > 0 {
                    available.insert(index);
                }
                pages.push(page);
                (index, offset, handle)
            }
        };

        DescriptorAllocation::new(
            handle,
            count,
            self.arena.increment,
            index,
            offset,
            self.arena.clone(),
        )
    }

    /// Reclaims every block freed since the last call.
    ///
    /// Call once per safe point (e.g. frame end) when the GPU can no longer be
    /// reading descriptors freed before it.
    pub fn release_stale_descriptors(&self) {
        let mut pool = self.arena.pool.lock();
        let PagePool {
            pages, available, ..
        } = &mut *pool;

        for (index, page) in pages.iter_mut().enumerate() {
            page.release_stale_descriptors();
            if page.num_free_handles() > 0 {
                available.insert(index);
            }
        }
    }

    pub fn page_count(&self) -> usize {
        self.arena.pool.lock().pages.len()
    }

    /// Free handles across all pages, excluding stale blocks.
    pub fn num_free_handles(&self) -> u32 {
        self.arena
            .pool
            .lock()
            .pages
            .iter()
            .map(DescriptorPage::num_free_handles)
            .sum()
    }
}
