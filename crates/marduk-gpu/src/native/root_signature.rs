use std::sync::atomic::{AtomicU64, Ordering};

use super::{DescriptorHeapType, RootViewKind};

/// Descriptor class of a table range.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DescriptorRangeType {
    Srv,
    Uav,
    Cbv,
    Sampler,
}

impl DescriptorRangeType {
    #[inline]
    pub fn heap_type(self) -> DescriptorHeapType {
        match self {
            DescriptorRangeType::Sampler => DescriptorHeapType::Sampler,
            _ => DescriptorHeapType::CbvSrvUav,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DescriptorRange {
    pub range_type: DescriptorRangeType,
    pub count: u32,
}

impl DescriptorRange {
    pub fn new(range_type: DescriptorRangeType, count: u32) -> Self {
        Self { range_type, count }
    }
}

/// One root signature slot.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RootParameter {
    /// A table of descriptors copied into the shader-visible heap.
    DescriptorTable(Vec<DescriptorRange>),
    /// A descriptor bound directly by GPU address.
    View(RootViewKind),
    /// Inline 32-bit constants.
    Constants { count: u32 },
}

/// Binding-layout contract between a command list and its shaders.
///
/// Only the layout is modelled; shader compatibility is the pipeline's concern.
#[derive(Debug)]
pub struct RootSignature {
    id: u64,
    parameters: Vec<RootParameter>,
}

static NEXT_ROOT_SIGNATURE_ID: AtomicU64 = AtomicU64::new(1);

impl RootSignature {
    pub fn new(parameters: Vec<RootParameter>) -> Self {
        Self {
            id: NEXT_ROOT_SIGNATURE_ID.fetch_add(1, Ordering::Relaxed),
            parameters,
        }
    }

    /// Unique identity used when binding the signature on a command list.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn parameters(&self) -> &[RootParameter] {
        &self.parameters
    }

    /// Bit `i` is set when slot `i` is a descriptor table drawing from `heap_type`.
    ///
    /// Slots past 32 cannot be represented and are ignored.
    pub fn descriptor_table_bitmask(&self, heap_type: DescriptorHeapType) -> u32 {
        self.parameters
            .iter()
            .enumerate()
            .take(32)
            .filter(|(_, p)| match p {
                RootParameter::DescriptorTable(ranges) => ranges
                    .first()
                    .is_some_and(|r| r.range_type.heap_type() == heap_type),
                _ => false,
            })
            .fold(0u32, |mask, (i, _)| mask | (1 << i))
    }

    /// Total descriptors declared by the table at `slot` (zero for non-table slots).
    pub fn num_descriptors(&self, slot: usize) -> u32 {
        match self.parameters.get(slot) {
            Some(RootParameter::DescriptorTable(ranges)) => ranges.iter().map(|r| r.count).sum(),
            _ => 0,
        }
    }
}
