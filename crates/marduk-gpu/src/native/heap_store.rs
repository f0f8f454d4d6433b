use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{
    CpuDescriptorHandle, DescriptorHeapId, DescriptorHeapType, DescriptorView,
    GpuDescriptorHandle, NativeDescriptorHeap,
};

/// Tag bit distinguishing GPU handles from CPU handles in the emulated address space.
const GPU_HANDLE_TAG: u64 = 1 << 63;
const SLOT_BITS: u32 = 32;

/// Descriptor heap whose slots live in CPU memory.
///
/// Handles encode `heap id << 32 | slot * increment`, so a handle can be
/// mapped back to its heap without a pointer.
pub(crate) struct StoredHeap {
    id: DescriptorHeapId,
    heap_type: DescriptorHeapType,
    shader_visible: bool,
    slots: Mutex<Vec<Option<DescriptorView>>>,
}

impl NativeDescriptorHeap for StoredHeap {
    fn id(&self) -> DescriptorHeapId {
        self.id
    }

    fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    fn capacity(&self) -> u32 {
        self.slots.lock().len() as u32
    }

    fn cpu_start(&self) -> CpuDescriptorHandle {
        CpuDescriptorHandle(u64::from(self.id.0) << SLOT_BITS)
    }

    fn gpu_start(&self) -> Option<GpuDescriptorHandle> {
        self.shader_visible
            .then(|| GpuDescriptorHandle(GPU_HANDLE_TAG | (u64::from(self.id.0) << SLOT_BITS)))
    }
}

/// Registry of emulated descriptor heaps, shared by the CPU-backed backends.
pub(crate) struct HeapStore {
    increments: [u32; DescriptorHeapType::COUNT],
    // Ids start at 1 so that no heap ever owns the null handle.
    next_id: AtomicU32,
    heaps: Mutex<HashMap<u32, Weak<StoredHeap>>>,
}

impl HeapStore {
    pub(crate) fn new(increments: [u32; DescriptorHeapType::COUNT]) -> Self {
        Self {
            increments,
            next_id: AtomicU32::new(1),
            heaps: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub(crate) fn increment(&self, heap_type: DescriptorHeapType) -> u32 {
        self.increments[heap_type.index()]
    }

    pub(crate) fn create(
        &self,
        heap_type: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
    ) -> Arc<StoredHeap> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let heap = Arc::new(StoredHeap {
            id: DescriptorHeapId(id),
            heap_type,
            shader_visible: shader_visible && heap_type.is_shader_visible(),
            slots: Mutex::new(vec![None; capacity as usize]),
        });

        let mut heaps = self.heaps.lock();
        heaps.retain(|_, h| h.strong_count() > 0);
        heaps.insert(id, Arc::downgrade(&heap));
        heap
    }

    fn locate(&self, raw: u64, heap_type: DescriptorHeapType) -> Option<(Arc<StoredHeap>, usize)> {
        let raw = raw & !GPU_HANDLE_TAG;
        let id = (raw >> SLOT_BITS) as u32;
        let offset = raw & ((1u64 << SLOT_BITS) - 1);
        let increment = u64::from(self.increment(heap_type));
        if offset % increment != 0 {
            return None;
        }

        let heap = self.heaps.lock().get(&id)?.upgrade()?;
        if heap.heap_type != heap_type {
            return None;
        }
        Some((heap, (offset / increment) as usize))
    }

    pub(crate) fn write(
        &self,
        heap_type: DescriptorHeapType,
        dst: CpuDescriptorHandle,
        view: Option<DescriptorView>,
    ) {
        match self.locate(dst.0, heap_type) {
            Some((heap, index)) => match heap.slots.lock().get_mut(index) {
                Some(slot) => *slot = view,
                None => log::error!("descriptor write past the end of heap {:?}", heap.id),
            },
            None => log::error!("descriptor write to unknown handle {:#x}", dst.0),
        }
    }

    pub(crate) fn read(
        &self,
        heap_type: DescriptorHeapType,
        src: CpuDescriptorHandle,
    ) -> Option<DescriptorView> {
        if src.is_null() {
            return None;
        }
        let (heap, index) = self.locate(src.0, heap_type)?;
        let slots = heap.slots.lock();
        slots.get(index).copied().flatten()
    }

    pub(crate) fn read_gpu(
        &self,
        heap_type: DescriptorHeapType,
        src: GpuDescriptorHandle,
    ) -> Option<DescriptorView> {
        if src.0 & GPU_HANDLE_TAG == 0 {
            return None;
        }
        let (heap, index) = self.locate(src.0, heap_type)?;
        if !heap.shader_visible {
            return None;
        }
        let slots = heap.slots.lock();
        slots.get(index).copied().flatten()
    }

    pub(crate) fn copy(
        &self,
        heap_type: DescriptorHeapType,
        dst: CpuDescriptorHandle,
        srcs: &[CpuDescriptorHandle],
    ) {
        // Read everything first: sources and destination may share a heap.
        let views: Vec<Option<DescriptorView>> =
            srcs.iter().map(|&src| self.read(heap_type, src)).collect();

        let increment = self.increment(heap_type);
        for (i, view) in views.into_iter().enumerate() {
            self.write(heap_type, dst.offset(i as u32, increment), view);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::ResourceId;

    fn store() -> HeapStore {
        HeapStore::new([32, 16, 8, 8])
    }

    #[test]
    fn write_then_read_round_trips_through_handles() {
        let store = store();
        let heap = store.create(DescriptorHeapType::CbvSrvUav, 4, false);
        let slot = heap.cpu_start().offset(2, 32);

        store.write(
            DescriptorHeapType::CbvSrvUav,
            slot,
            Some(DescriptorView::ShaderResource(ResourceId(7))),
        );

        assert_eq!(
            store.read(DescriptorHeapType::CbvSrvUav, slot),
            Some(DescriptorView::ShaderResource(ResourceId(7)))
        );
        assert_eq!(store.read(DescriptorHeapType::CbvSrvUav, heap.cpu_start()), None);
    }

    #[test]
    fn copies_into_shader_visible_heap() {
        let store = store();
        let cpu = store.create(DescriptorHeapType::CbvSrvUav, 2, false);
        let gpu = store.create(DescriptorHeapType::CbvSrvUav, 2, true);
        store.write(
            DescriptorHeapType::CbvSrvUav,
            cpu.cpu_start(),
            Some(DescriptorView::UnorderedAccess(ResourceId(3))),
        );

        store.copy(
            DescriptorHeapType::CbvSrvUav,
            gpu.cpu_start().offset(1, 32),
            &[cpu.cpu_start()],
        );

        let handle = gpu.gpu_start().unwrap().offset(1, 32);
        assert_eq!(
            store.read_gpu(DescriptorHeapType::CbvSrvUav, handle),
            Some(DescriptorView::UnorderedAccess(ResourceId(3)))
        );
        assert!(cpu.gpu_start().is_none());
    }

    #[test]
    fn rtv_heaps_are_never_shader_visible() {
        let store = store();
        let heap = store.create(DescriptorHeapType::Rtv, 1, true);
        assert!(heap.gpu_start().is_none());
    }
}
