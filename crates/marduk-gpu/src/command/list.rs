use std::any::Any;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytemuck::Pod;

use crate::device::DeviceInit;
use crate::dynamic_heap::{BoundHeaps, DynamicDescriptorHeap};
use crate::native::{
    ALL_SUBRESOURCES, CommandStream, CpuDescriptorHandle, DescriptorHeapType,
    NativeCommand, NativeDevice, PipelineKind, QueueType, ResourceId, ResourceStates,
    RootSignature,
};
use crate::state::{CommitEpoch, ResourceStateTracker};
use crate::upload::{UploadAllocator, align_up};

/// Alignment of constant buffer data in upload memory.
const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Alignment of staged buffer copies.
const COPY_ALIGNMENT: u64 = 4;

/// A recordable batch of GPU work.
///
/// A list is owned by one thread from the moment it is handed out by
/// [`CommandQueue::get_command_list`](super::CommandQueue::get_command_list)
/// until it is executed. After execution it is reset and recycled by the
/// queue once the GPU finished with it.
pub struct CommandList {
    /// Queue family this list can be submitted to.
    list_type: QueueType,

    /// Recorded native commands.
    stream: CommandStream,

    /// Barriers and resource states of this list.
    tracker: ResourceStateTracker,

    /// Transient memory for constants and buffer uploads.
    upload: UploadAllocator,

    /// Staging for shader-visible descriptors, indexed like
    /// [`DescriptorHeapType::SHADER_VISIBLE`].
    dynamic_heaps: [DynamicDescriptorHeap; 2],

    /// Shader-visible heaps currently bound.
    bound_heaps: BoundHeaps,

    /// Root signature of the last `set_root_signature` call and the pipeline it was bound for.
    root_signature: Option<(Arc<RootSignature>, PipelineKind)>,

    /// Objects kept alive until the GPU finished with this list.
    tracked_objects: Vec<Arc<dyn Any + Send + Sync>>,
}

impl CommandList {
    pub fn new(device: Arc<dyn NativeDevice>, list_type: QueueType, init: &DeviceInit) -> Self {
        let dynamic_heaps = DescriptorHeapType::SHADER_VISIBLE.map(|heap_type| {
            DynamicDescriptorHeap::new(
                device.clone(),
                heap_type,
                init.dynamic_descriptors_per_heap,
            )
        });

        Self {
            list_type,
            stream: CommandStream::new(list_type),
            tracker: ResourceStateTracker::new(),
            upload: UploadAllocator::new(device, init.upload_page_size),
            dynamic_heaps,
            bound_heaps: BoundHeaps::default(),
            root_signature: None,
            tracked_objects: Vec::new(),
        }
    }

    #[inline]
    pub fn list_type(&self) -> QueueType {
        self.list_type
    }

    #[inline]
    pub fn stream(&self) -> &CommandStream {
        &self.stream
    }

    #[inline]
    pub fn tracker(&self) -> &ResourceStateTracker {
        &self.tracker
    }

    #[inline]
    pub fn upload_allocator(&self) -> &UploadAllocator {
        &self.upload
    }

    pub fn dynamic_heap(&self, heap_type: DescriptorHeapType) -> &DynamicDescriptorHeap {
        &self.dynamic_heaps[heap_type.index()]
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.stream.is_closed()
    }

    pub fn tracked_object_count(&self) -> usize {
        self.tracked_objects.len()
    }

    /// Transitions `resource` (or one subresource) to `after`.
    ///
    /// The "before" state is derived; with `flush` the barrier is recorded
    /// right away instead of at the next draw, dispatch or copy.
    pub fn transition_barrier(
        &mut self,
        resource: ResourceId,
        after: ResourceStates,
        subresource: u32,
        flush: bool,
    ) {
        self.tracker.transition_resource(resource, after, subresource);
        if flush {
            self.flush_resource_barriers();
        }
    }

    pub fn uav_barrier(&mut self, resource: Option<ResourceId>, flush: bool) {
        self.tracker.uav_barrier(resource);
        if flush {
            self.flush_resource_barriers();
        }
    }

    pub fn aliasing_barrier(
        &mut self,
        before: Option<ResourceId>,
        after: Option<ResourceId>,
        flush: bool,
    ) {
        self.tracker.aliasing_barrier(before, after);
        if flush {
            self.flush_resource_barriers();
        }
    }

    /// Records any buffered barriers.
    pub fn flush_resource_barriers(&mut self) {
        self.tracker.flush_resource_barriers(&mut self.stream);
    }

    pub fn copy_resource(&mut self, dst: ResourceId, src: ResourceId) {
        self.transition_barrier(dst, ResourceStates::COPY_DEST, ALL_SUBRESOURCES, false);
        self.transition_barrier(src, ResourceStates::COPY_SOURCE, ALL_SUBRESOURCES, false);
        self.flush_resource_barriers();

        self.stream.record(NativeCommand::CopyResource { dst, src });
    }

    /// Stages `data` in upload memory and copies it to the start of `dst`.
    ///
    /// The copy is zero-padded to a multiple of [`COPY_ALIGNMENT`] bytes.
    pub fn copy_buffer(&mut self, dst: ResourceId, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let size = align_up(data.len() as u64, COPY_ALIGNMENT);
        let allocation = self
            .upload
            .allocate(size, COPY_ALIGNMENT)
            .context("failed to stage buffer upload")?;
        if size == data.len() as u64 {
            allocation.write(data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(size as usize, 0);
            allocation.write(&padded);
        }

        self.transition_barrier(dst, ResourceStates::COPY_DEST, ALL_SUBRESOURCES, true);
        self.stream.record(NativeCommand::CopyBufferRegion {
            dst,
            dst_offset: 0,
            src_address: allocation.gpu_address(),
            size,
        });
        Ok(())
    }

    pub fn copy_buffer_pod<T: Pod>(&mut self, dst: ResourceId, data: &[T]) -> Result<()> {
        self.copy_buffer(dst, bytemuck::cast_slice(data))
    }

    /// Binds `signature` and lays out the descriptor staging for it.
    ///
    /// Binding the signature that is already bound for `pipeline` does nothing.
    pub fn set_root_signature(&mut self, signature: Arc<RootSignature>, pipeline: PipelineKind) {
        if let Some((current, bound_for)) = &self.root_signature {
            if current.id() == signature.id() && *bound_for == pipeline {
                return;
            }
        }

        for heap in &mut self.dynamic_heaps {
            heap.parse_root_signature(&signature);
        }
        self.stream.record(NativeCommand::SetRootSignature {
            pipeline,
            id: signature.id(),
        });
        self.track_object(signature.clone());
        self.root_signature = Some((signature, pipeline));
    }

    /// Uploads `data` and binds it as an inline constant buffer at `slot`.
    pub fn set_dynamic_constant_buffer<T: Pod>(&mut self, slot: usize, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let allocation = self
            .upload
            .allocate(bytes.len() as u64, CONSTANT_BUFFER_ALIGNMENT)
            .context("failed to allocate dynamic constant buffer")?;
        allocation.write(bytes);

        self.cbv_srv_uav_heap().stage_inline_cbv(slot, allocation.gpu_address());
        Ok(())
    }

    /// Transitions `resource` to `state` and stages the SRV at `src` into the
    /// table at `slot`.
    pub fn set_shader_resource_view(
        &mut self,
        slot: usize,
        offset: u32,
        resource: ResourceId,
        state: ResourceStates,
        src: CpuDescriptorHandle,
    ) {
        self.transition_barrier(resource, state, ALL_SUBRESOURCES, false);
        self.cbv_srv_uav_heap().stage_descriptors(slot, offset, 1, src);
    }

    pub fn set_unordered_access_view(
        &mut self,
        slot: usize,
        offset: u32,
        resource: ResourceId,
        src: CpuDescriptorHandle,
    ) {
        self.transition_barrier(resource, ResourceStates::UNORDERED_ACCESS, ALL_SUBRESOURCES, false);
        self.cbv_srv_uav_heap().stage_descriptors(slot, offset, 1, src);
    }

    pub fn set_sampler(&mut self, slot: usize, offset: u32, src: CpuDescriptorHandle) {
        self.dynamic_heaps[DescriptorHeapType::Sampler.index()].stage_descriptors(slot, offset, 1, src);
    }

    pub fn set_inline_srv(&mut self, slot: usize, address: u64) {
        self.cbv_srv_uav_heap().stage_inline_srv(slot, address);
    }

    pub fn set_inline_uav(&mut self, slot: usize, address: u64) {
        self.cbv_srv_uav_heap().stage_inline_uav(slot, address);
    }

    pub fn set_32bit_constants(&mut self, slot: u32, values: &[u32]) {
        self.stream.record(NativeCommand::SetRoot32BitConstants {
            pipeline: self.pipeline(),
            slot,
            values: values.to_vec(),
        });
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    ) -> Result<()> {
        self.prepare(PipelineKind::Graphics)?;
        self.stream.record(NativeCommand::Draw {
            vertex_count,
            instance_count,
            start_vertex,
            start_instance,
        });
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) -> Result<()> {
        self.prepare(PipelineKind::Graphics)?;
        self.stream.record(NativeCommand::DrawIndexed {
            index_count,
            instance_count,
            start_index,
            base_vertex,
            start_instance,
        });
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.prepare(PipelineKind::Compute)?;
        self.stream.record(NativeCommand::Dispatch { x, y, z });
        Ok(())
    }

    /// Keeps `object` alive until this list is reset.
    pub fn track_object(&mut self, object: Arc<dyn Any + Send + Sync>) {
        self.tracked_objects.push(object);
    }

    /// Closes the list for submission.
    ///
    /// First-use transitions are resolved against the committed states into
    /// `pending`, which must run right before this list. Returns whether
    /// `pending` received any barriers.
    pub fn close(&mut self, pending: &mut CommandList, epoch: &mut CommitEpoch<'_>) -> bool {
        self.flush_resource_barriers();

        let count = epoch.flush_pending_resource_barriers(&mut self.tracker, &mut pending.stream);
        epoch.commit_final_resource_states(&mut self.tracker);
        self.stream.close();

        count > 0
    }

    /// Closes a list that has no pending companion (the companion itself).
    pub(crate) fn seal(&mut self) {
        self.flush_resource_barriers();
        self.stream.close();
    }

    /// Clears all recorded state so the list can be recorded again.
    ///
    /// Only valid once the GPU finished executing it.
    pub fn reset(&mut self) {
        self.stream.reset();
        self.tracker.reset();
        self.upload.reset();
        for heap in &mut self.dynamic_heaps {
            heap.reset();
        }
        self.bound_heaps.clear();
        self.root_signature = None;
        self.tracked_objects.clear();
    }

    fn cbv_srv_uav_heap(&mut self) -> &mut DynamicDescriptorHeap {
        &mut self.dynamic_heaps[DescriptorHeapType::CbvSrvUav.index()]
    }

    fn pipeline(&self) -> PipelineKind {
        self.root_signature
            .as_ref()
            .map_or(PipelineKind::Graphics, |(_, pipeline)| *pipeline)
    }

    fn prepare(&mut self, pipeline: PipelineKind) -> Result<()> {
        self.flush_resource_barriers();
        for heap in &mut self.dynamic_heaps {
            heap.commit_staged_descriptors(&mut self.stream, &mut self.bound_heaps, pipeline)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandList")
            .field("list_type", &self.list_type)
            .field("commands", &self.stream.commands().len())
            .field("closed", &self.stream.is_closed())
            .field("pending_barriers", &self.tracker.pending_barriers().len())
            .field("tracked_objects", &self.tracked_objects.len())
            .finish()
    }
}
