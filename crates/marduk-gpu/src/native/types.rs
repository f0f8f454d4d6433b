use bitflags::bitflags;

/// Subresource index meaning "every subresource of the resource".
pub const ALL_SUBRESOURCES: u32 = u32::MAX;

/// Identity of a native GPU resource (buffer or texture).
///
/// The submission layer never owns resources; it only tracks how they are used.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourceId(pub u64);

bitflags! {
    /// Usage state of a resource (or of one of its subresources).
    ///
    /// Read states may be combined; write states are exclusive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceStates: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
        const DEPTH_WRITE = 1 << 4;
        const DEPTH_READ = 1 << 5;
        const NON_PIXEL_SHADER_RESOURCE = 1 << 6;
        const PIXEL_SHADER_RESOURCE = 1 << 7;
        const INDIRECT_ARGUMENT = 1 << 9;
        const COPY_DEST = 1 << 10;
        const COPY_SOURCE = 1 << 11;
        const PRESENT = 0;
        const GENERIC_READ = Self::VERTEX_AND_CONSTANT_BUFFER.bits()
            | Self::INDEX_BUFFER.bits()
            | Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits()
            | Self::INDIRECT_ARGUMENT.bits()
            | Self::COPY_SOURCE.bits();
    }
}

/// A declared change in how a resource may be accessed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Barrier {
    /// State transition of one subresource, or all of them with [`ALL_SUBRESOURCES`].
    Transition {
        resource: ResourceId,
        subresource: u32,
        before: ResourceStates,
        after: ResourceStates,
    },
    /// Orders unordered-access writes. `None` covers every UAV access.
    Uav { resource: Option<ResourceId> },
    /// Switches which of two placed resources owns aliased memory.
    Aliasing {
        before: Option<ResourceId>,
        after: Option<ResourceId>,
    },
}

impl Barrier {
    #[inline]
    pub fn transition(
        resource: ResourceId,
        before: ResourceStates,
        after: ResourceStates,
        subresource: u32,
    ) -> Self {
        Barrier::Transition {
            resource,
            subresource,
            before,
            after,
        }
    }
}

/// Hardware queue family a command list is recorded for and submitted to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum QueueType {
    Direct,
    Compute,
    Copy,
}

impl QueueType {
    pub const ALL: [QueueType; 3] = [QueueType::Direct, QueueType::Compute, QueueType::Copy];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            QueueType::Direct => 0,
            QueueType::Compute => 1,
            QueueType::Copy => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            QueueType::Direct => "direct",
            QueueType::Compute => "compute",
            QueueType::Copy => "copy",
        }
    }
}

/// Kind of descriptor a heap stores.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DescriptorHeapType {
    /// Constant buffer, shader resource and unordered access views.
    CbvSrvUav,
    Sampler,
    /// Render target views (never shader visible).
    Rtv,
    /// Depth stencil views (never shader visible).
    Dsv,
}

impl DescriptorHeapType {
    pub const COUNT: usize = 4;
    pub const ALL: [DescriptorHeapType; Self::COUNT] = [
        DescriptorHeapType::CbvSrvUav,
        DescriptorHeapType::Sampler,
        DescriptorHeapType::Rtv,
        DescriptorHeapType::Dsv,
    ];

    /// Heap types that can be bound to a command list for shader access.
    pub const SHADER_VISIBLE: [DescriptorHeapType; 2] =
        [DescriptorHeapType::CbvSrvUav, DescriptorHeapType::Sampler];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            DescriptorHeapType::CbvSrvUav => 0,
            DescriptorHeapType::Sampler => 1,
            DescriptorHeapType::Rtv => 2,
            DescriptorHeapType::Dsv => 3,
        }
    }

    #[inline]
    pub fn is_shader_visible(self) -> bool {
        matches!(self, DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler)
    }
}

/// CPU-side descriptor address. Zero is the null handle.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Ord, PartialOrd)]
pub struct CpuDescriptorHandle(pub u64);

impl CpuDescriptorHandle {
    pub const NULL: CpuDescriptorHandle = CpuDescriptorHandle(0);

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Handle `index` descriptors past this one.
    #[inline]
    pub fn offset(self, index: u32, increment: u32) -> Self {
        CpuDescriptorHandle(self.0 + u64::from(index) * u64::from(increment))
    }
}

/// GPU-side descriptor address, only valid inside a shader-visible heap.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct GpuDescriptorHandle(pub u64);

impl GpuDescriptorHandle {
    #[inline]
    pub fn offset(self, index: u32, increment: u32) -> Self {
        GpuDescriptorHandle(self.0 + u64::from(index) * u64::from(increment))
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DescriptorHeapId(pub u32);

/// Which root signature a binding applies to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

impl PipelineKind {
    #[inline]
    pub fn index(self) -> usize {
        match self {
            PipelineKind::Graphics => 0,
            PipelineKind::Compute => 1,
        }
    }
}

/// Root descriptor bound by GPU address rather than through a table.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RootViewKind {
    Cbv,
    Srv,
    Uav,
}

/// Contents of a single descriptor slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DescriptorView {
    ConstantBuffer { address: u64, size: u32 },
    ShaderResource(ResourceId),
    UnorderedAccess(ResourceId),
    Sampler { id: u32 },
    RenderTarget(ResourceId),
    DepthStencil(ResourceId),
}

/// Failures reported by a native backend.
#[derive(Debug, thiserror::Error)]
pub enum NativeError {
    #[error("out of device memory while creating {0}")]
    OutOfMemory(&'static str),
    #[error("{0} is not supported by the {1} backend")]
    Unsupported(&'static str, &'static str),
    #[error("device lost")]
    DeviceLost,
}
