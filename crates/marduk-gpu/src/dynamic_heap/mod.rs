//! Shader-visible descriptor staging.
//!
//! Descriptors are staged per root slot while recording and copied into a
//! shader-visible heap in one go right before the draw or dispatch that uses
//! them. Switching to a new shader-visible heap invalidates every table copied
//! into the previous one, so all tables are marked stale on a switch.

mod heap;
mod slot_mask;

pub use heap::DynamicDescriptorHeap;
pub use slot_mask::{MAX_DESCRIPTOR_TABLES, SlotIter, SlotMask};

use crate::native::{CommandStream, DescriptorHeapId, DescriptorHeapType, NativeCommand};

/// Shader-visible heaps currently bound on a command list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundHeaps {
    heaps: [Option<DescriptorHeapId>; DescriptorHeapType::SHADER_VISIBLE.len()],
}

impl BoundHeaps {
    /// Binds `id` for `heap_type`. Returns whether the binding changed.
    pub fn set(&mut self, heap_type: DescriptorHeapType, id: DescriptorHeapId) -> bool {
        debug_assert!(heap_type.is_shader_visible());
        let slot = &mut self.heaps[heap_type.index()];
        let changed = *slot != Some(id);
        *slot = Some(id);
        changed
    }

    pub fn get(&self, heap_type: DescriptorHeapType) -> Option<DescriptorHeapId> {
        self.heaps.get(heap_type.index()).copied().flatten()
    }

    /// Records the binding of every heap set so far.
    pub fn record(&self, stream: &mut CommandStream) {
        let ids: Vec<DescriptorHeapId> = self.heaps.iter().flatten().copied().collect();
        if !ids.is_empty() {
            stream.record(NativeCommand::SetDescriptorHeaps(ids));
        }
    }

    pub fn clear(&mut self) {
        self.heaps = Default::default();
    }
}
