//! Native GPU boundary.
//!
//! This module defines what the submission layer needs from a platform API:
//! - queues that execute recorded [`CommandStream`]s and signal a fence
//! - fences with a non-blocking completed-value query and a blocking wait
//! - descriptor heaps (CPU-only and shader-visible) and descriptor copies
//! - pinned upload memory addressable by the GPU
//!
//! Two backends implement it: [`soft`] (always available, used by tests) and
//! `wgpu_backend` (behind the `wgpu` feature).

use std::sync::Arc;
use std::time::Duration;

mod fence;
mod heap_store;
mod root_signature;
pub mod soft;
mod stream;
mod types;
#[cfg(feature = "wgpu")]
pub mod wgpu_backend;

pub use fence::CpuFence;
pub use root_signature::{DescriptorRange, DescriptorRangeType, RootParameter, RootSignature};
pub use stream::{CommandStream, NativeCommand};
pub use types::{
    ALL_SUBRESOURCES, Barrier, CpuDescriptorHandle, DescriptorHeapId, DescriptorHeapType,
    DescriptorView, GpuDescriptorHandle, NativeError, PipelineKind, QueueType, ResourceId,
    ResourceStates, RootViewKind,
};

/// GPU-incremented monotonic counter.
pub trait NativeFence: Send + Sync {
    /// Highest value the GPU has completed.
    fn completed_value(&self) -> u64;

    /// Blocks until `value` is completed or `timeout` expires.
    ///
    /// `None` waits forever. Returns whether the value was reached.
    fn wait(&self, value: u64, timeout: Option<Duration>) -> bool;
}

/// Hardware queue with its own fence.
pub trait NativeQueue: Send + Sync {
    fn queue_type(&self) -> QueueType;

    /// The fence this queue signals.
    fn fence(&self) -> Arc<dyn NativeFence>;

    /// Submits closed streams in order.
    fn execute(&self, streams: &[&CommandStream]);

    /// Enqueues a GPU-side write of `value` to this queue's fence.
    fn signal(&self, value: u64);

    /// Makes the queue stall on the GPU until `fence` reaches `value`.
    fn wait(&self, fence: &dyn NativeFence, value: u64);
}

/// Contiguous array of descriptor slots.
pub trait NativeDescriptorHeap: Send + Sync {
    fn id(&self) -> DescriptorHeapId;
    fn heap_type(&self) -> DescriptorHeapType;
    fn capacity(&self) -> u32;
    fn cpu_start(&self) -> CpuDescriptorHandle;
    /// `None` for heaps that are not shader visible.
    fn gpu_start(&self) -> Option<GpuDescriptorHandle>;
}

/// Pinned memory that the CPU writes and the GPU reads.
pub trait NativeUploadBuffer: Send + Sync {
    fn size(&self) -> u64;
    fn gpu_address(&self) -> u64;
    fn write(&self, offset: u64, data: &[u8]);
    fn read(&self, offset: u64, len: u64) -> Vec<u8>;
}

/// Factory for every native object the submission layer uses.
pub trait NativeDevice: Send + Sync {
    fn backend_name(&self) -> &'static str;

    fn create_queue(&self, queue_type: QueueType) -> Result<Arc<dyn NativeQueue>, NativeError>;

    fn create_descriptor_heap(
        &self,
        heap_type: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<Arc<dyn NativeDescriptorHeap>, NativeError>;

    fn create_upload_buffer(&self, size: u64) -> Result<Arc<dyn NativeUploadBuffer>, NativeError>;

    fn descriptor_handle_increment_size(&self, heap_type: DescriptorHeapType) -> u32;

    /// Writes a view into the descriptor at `dst`.
    fn create_view(&self, dst: CpuDescriptorHandle, view: DescriptorView);

    /// Copies each source descriptor into consecutive slots starting at `dst`.
    ///
    /// Null sources clear the destination slot.
    fn copy_descriptors(
        &self,
        heap_type: DescriptorHeapType,
        dst: CpuDescriptorHandle,
        srcs: &[CpuDescriptorHandle],
    );
}
