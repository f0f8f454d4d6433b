use std::sync::Arc;

use anyhow::Result;

use crate::command::CommandQueue;
use crate::descriptor::{DescriptorAllocation, DescriptorAllocator};
use crate::native::{
    CpuDescriptorHandle, DescriptorHeapType, DescriptorView, NativeDevice, QueueType, ResourceId,
    ResourceStates,
};
use crate::state::GlobalResourceState;

use super::DeviceInit;

/// Owns the queues, descriptor allocators and committed resource states of
/// one native device.
///
/// `Device` is `Sync`: command lists can be recorded on any thread and
/// submitted to any queue through a shared reference.
pub struct Device {
    /// Native device every object is created from.
    native: Arc<dyn NativeDevice>,

    /// Parameters the device was created with.
    init: DeviceInit,

    /// Committed resource states shared by all queues.
    global: Arc<GlobalResourceState>,

    /// One queue per [`QueueType`], indexed by [`QueueType::index`].
    queues: Vec<CommandQueue>,

    /// One CPU descriptor allocator per [`DescriptorHeapType`].
    allocators: Vec<DescriptorAllocator>,
}

impl Device {
    /// Creates the direct, compute and copy queues and the descriptor allocators.
    pub fn new(native: Arc<dyn NativeDevice>, init: DeviceInit) -> Result<Self> {
        let global = Arc::new(GlobalResourceState::new());

        let queues = QueueType::ALL
            .into_iter()
            .map(|queue_type| {
                CommandQueue::new(native.clone(), queue_type, global.clone(), init.clone())
            })
            .collect::<Result<Vec<_>>>()?;

        let allocators = DescriptorHeapType::ALL
            .into_iter()
            .map(|heap_type| {
                DescriptorAllocator::new(native.clone(), heap_type, init.descriptors_per_page)
            })
            .collect();

        log::info!("device created on the {} backend", native.backend_name());

        Ok(Self {
            native,
            init,
            global,
            queues,
            allocators,
        })
    }

    #[inline]
    pub fn native(&self) -> &Arc<dyn NativeDevice> {
        &self.native
    }

    #[inline]
    pub fn init(&self) -> &DeviceInit {
        &self.init
    }

    pub fn get_command_queue(&self, queue_type: QueueType) -> &CommandQueue {
        &self.queues[queue_type.index()]
    }

    /// Allocates `count` contiguous CPU descriptors.
    ///
    /// Returns a null allocation if the native heap could not be created.
    pub fn allocate_descriptors(
        &self,
        heap_type: DescriptorHeapType,
        count: u32,
    ) -> DescriptorAllocation {
        self.allocators[heap_type.index()].allocate(count)
    }

    pub fn descriptor_allocator(&self, heap_type: DescriptorHeapType) -> &DescriptorAllocator {
        &self.allocators[heap_type.index()]
    }

    #[inline]
    pub fn descriptor_handle_increment_size(&self, heap_type: DescriptorHeapType) -> u32 {
        self.native.descriptor_handle_increment_size(heap_type)
    }

    /// Returns freed descriptors to their pages.
    ///
    /// Call once the GPU can no longer reference them, e.g. after a frame's
    /// fence value completed.
    pub fn release_stale_descriptors(&self) {
        for allocator in &self.allocators {
            allocator.release_stale_descriptors();
        }
    }

    /// Blocks until every queue is idle.
    pub fn flush_all_queues(&self) {
        for queue in &self.queues {
            queue.flush();
        }
    }

    /// Writes a view into the descriptor at `dst`.
    pub fn create_view(&self, dst: CpuDescriptorHandle, view: DescriptorView) {
        self.native.create_view(dst, view);
    }

    /// Starts tracking a resource created in `state`.
    pub fn register_resource(&self, resource: ResourceId, state: ResourceStates) {
        self.global.register_resource(resource, state);
    }

    /// Stops tracking a destroyed resource.
    pub fn unregister_resource(&self, resource: ResourceId) {
        self.global.unregister_resource(resource);
    }

    pub fn global_states(&self) -> &GlobalResourceState {
        &self.global
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.flush_all_queues();
        log::debug!("device dropped");
    }
}
