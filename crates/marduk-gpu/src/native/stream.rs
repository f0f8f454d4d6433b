use super::{
    Barrier, DescriptorHeapId, GpuDescriptorHandle, PipelineKind, QueueType, ResourceId,
    RootViewKind,
};

/// A single recorded GPU command.
///
/// Backends translate these at submission time; the submission layer never
/// talks to a native API while recording.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCommand {
    ResourceBarriers(Vec<Barrier>),
    CopyResource {
        dst: ResourceId,
        src: ResourceId,
    },
    /// Copies `size` bytes from upload memory at `src_address` into a buffer.
    CopyBufferRegion {
        dst: ResourceId,
        dst_offset: u64,
        src_address: u64,
        size: u64,
    },
    SetRootSignature {
        pipeline: PipelineKind,
        id: u64,
    },
    /// Binds the shader-visible heaps, one per shader-visible heap type.
    SetDescriptorHeaps(Vec<DescriptorHeapId>),
    SetRootDescriptorTable {
        pipeline: PipelineKind,
        slot: u32,
        base: GpuDescriptorHandle,
    },
    SetRootView {
        pipeline: PipelineKind,
        slot: u32,
        kind: RootViewKind,
        address: u64,
    },
    SetRoot32BitConstants {
        pipeline: PipelineKind,
        slot: u32,
        values: Vec<u32>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
}

/// Recorded, unit-submittable batch of native commands.
///
/// Recording after [`close`](Self::close) is a contract violation.
#[derive(Debug)]
pub struct CommandStream {
    list_type: QueueType,
    commands: Vec<NativeCommand>,
    closed: bool,
}

impl CommandStream {
    pub fn new(list_type: QueueType) -> Self {
        Self {
            list_type,
            commands: Vec::new(),
            closed: false,
        }
    }

    #[inline]
    pub fn list_type(&self) -> QueueType {
        self.list_type
    }

    #[inline]
    pub fn record(&mut self, command: NativeCommand) {
        debug_assert!(!self.closed, "recording into a closed command stream");
        log::trace!("{} stream: {:?}", self.list_type.name(), command);
        self.commands.push(command);
    }

    #[inline]
    pub fn commands(&self) -> &[NativeCommand] {
        &self.commands
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Clears recorded commands and reopens the stream. Keeps capacity for reuse.
    pub fn reset(&mut self) {
        self.commands.clear();
        self.closed = false;
    }
}
