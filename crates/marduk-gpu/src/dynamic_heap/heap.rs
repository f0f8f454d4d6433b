use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};

use crate::native::{
    CommandStream, CpuDescriptorHandle, DescriptorHeapType, GpuDescriptorHandle, NativeCommand,
    NativeDescriptorHeap, NativeDevice, PipelineKind, RootSignature, RootViewKind,
};

use super::{BoundHeaps, MAX_DESCRIPTOR_TABLES, SlotMask};

#[derive(Debug, Copy, Clone, Default)]
struct TableCacheEntry {
    count: u32,
    /// Index of the table's first descriptor in the staging array.
    base: usize,
}

/// Inline root views of one kind, with their stale slots.
#[derive(Debug, Clone)]
struct InlineViews {
    kind: RootViewKind,
    addresses: [u64; MAX_DESCRIPTOR_TABLES],
    stale: SlotMask,
}

impl InlineViews {
    fn new(kind: RootViewKind) -> Self {
        Self {
            kind,
            addresses: [0; MAX_DESCRIPTOR_TABLES],
            stale: SlotMask::EMPTY,
        }
    }

    fn stage(&mut self, slot: usize, address: u64) {
        assert!(slot < MAX_DESCRIPTOR_TABLES, "root slot {slot} out of range");
        self.addresses[slot] = address;
        self.stale.insert(slot);
    }

    fn commit(&mut self, stream: &mut CommandStream, pipeline: PipelineKind) {
        for slot in self.stale {
            stream.record(NativeCommand::SetRootView {
                pipeline,
                slot: slot as u32,
                kind: self.kind,
                address: self.addresses[slot],
            });
        }
        self.stale.clear();
    }

    fn reset(&mut self) {
        self.addresses = [0; MAX_DESCRIPTOR_TABLES];
        self.stale.clear();
    }
}

/// Stages CPU descriptors per root slot and copies them into shader-visible
/// heaps right before a draw or dispatch.
///
/// Not synchronized: owned by exactly one command list.
pub struct DynamicDescriptorHeap {
    device: Arc<dyn NativeDevice>,
    heap_type: DescriptorHeapType,
    descriptors_per_heap: u32,
    increment: u32,

    staging: Vec<CpuDescriptorHandle>,
    cache: [TableCacheEntry; MAX_DESCRIPTOR_TABLES],
    table_mask: SlotMask,
    stale_tables: SlotMask,

    inline_cbv: InlineViews,
    inline_srv: InlineViews,
    inline_uav: InlineViews,

    heaps: Vec<Arc<dyn NativeDescriptorHeap>>,
    available: VecDeque<Arc<dyn NativeDescriptorHeap>>,
    current: Option<Arc<dyn NativeDescriptorHeap>>,
    current_cpu: CpuDescriptorHandle,
    current_gpu: GpuDescriptorHandle,
    num_free_handles: u32,
}

impl DynamicDescriptorHeap {
    pub fn new(
        device: Arc<dyn NativeDevice>,
        heap_type: DescriptorHeapType,
        descriptors_per_heap: u32,
    ) -> Self {
        debug_assert!(
            heap_type.is_shader_visible(),
            "{heap_type:?} descriptors cannot be bound to a command list"
        );
        Self {
            increment: device.descriptor_handle_increment_size(heap_type),
            device,
            heap_type,
            descriptors_per_heap,
            staging: vec![CpuDescriptorHandle::NULL; descriptors_per_heap as usize],
            cache: [TableCacheEntry::default(); MAX_DESCRIPTOR_TABLES],
            table_mask: SlotMask::EMPTY,
            stale_tables: SlotMask::EMPTY,
            inline_cbv: InlineViews::new(RootViewKind::Cbv),
            inline_srv: InlineViews::new(RootViewKind::Srv),
            inline_uav: InlineViews::new(RootViewKind::Uav),
            heaps: Vec::new(),
            available: VecDeque::new(),
            current: None,
            current_cpu: CpuDescriptorHandle::NULL,
            current_gpu: GpuDescriptorHandle::default(),
            num_free_handles: 0,
        }
    }

    #[inline]
    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    /// Shader-visible heaps created so far.
    #[inline]
    pub fn heap_count(&self) -> usize {
        self.heaps.len()
    }

    /// Free slots left in the current shader-visible heap.
    #[inline]
    pub fn num_free_handles(&self) -> u32 {
        self.num_free_handles
    }

    /// Slots whose staged tables changed since the last commit.
    #[inline]
    pub fn stale_tables(&self) -> SlotMask {
        self.stale_tables
    }

    /// Lays out the staging array for the descriptor tables of `signature`.
    ///
    /// Previously staged descriptors are discarded.
    pub fn parse_root_signature(&mut self, signature: &RootSignature) {
        self.stale_tables.clear();
        self.table_mask = SlotMask::from_bits(signature.descriptor_table_bitmask(self.heap_type));
        self.cache = [TableCacheEntry::default(); MAX_DESCRIPTOR_TABLES];

        let mut offset = 0usize;
        for slot in self.table_mask {
            let count = signature.num_descriptors(slot);
            self.cache[slot] = TableCacheEntry { count, base: offset };
            offset += count as usize;
        }

        assert!(
            offset <= self.descriptors_per_heap as usize,
            "root signature needs {offset} {:?} descriptors, dynamic heaps hold {}",
            self.heap_type,
            self.descriptors_per_heap
        );
        self.staging[..offset].fill(CpuDescriptorHandle::NULL);
    }

    /// Stages `count` consecutive CPU descriptors starting at `src` into the
    /// table at `slot`, starting `offset` descriptors into the table.
    pub fn stage_descriptors(
        &mut self,
        slot: usize,
        offset: u32,
        count: u32,
        src: CpuDescriptorHandle,
    ) {
        assert!(
            slot < MAX_DESCRIPTOR_TABLES,
            "root slot {slot} exceeds the {MAX_DESCRIPTOR_TABLES} slot limit"
        );
        let entry = self.cache[slot];
        assert!(
            offset + count <= entry.count,
            "staging {count} descriptors at offset {offset} overflows the {} descriptor table in slot {slot}",
            entry.count
        );

        let start = entry.base + offset as usize;
        for (i, dst) in self.staging[start..start + count as usize].iter_mut().enumerate() {
            *dst = src.offset(i as u32, self.increment);
        }
        self.stale_tables.insert(slot);
    }

    pub fn stage_inline_cbv(&mut self, slot: usize, address: u64) {
        self.inline_cbv.stage(slot, address);
    }

    pub fn stage_inline_srv(&mut self, slot: usize, address: u64) {
        self.inline_srv.stage(slot, address);
    }

    pub fn stage_inline_uav(&mut self, slot: usize, address: u64) {
        self.inline_uav.stage(slot, address);
    }

    /// Descriptors the next commit will copy.
    pub fn stale_descriptor_count(&self) -> u32 {
        self.stale_tables.iter().map(|slot| self.cache[slot].count).sum()
    }

    /// Copies every stale table into the shader-visible heap and binds it,
    /// then binds the stale inline views.
    pub fn commit_staged_descriptors(
        &mut self,
        stream: &mut CommandStream,
        bound: &mut BoundHeaps,
        pipeline: PipelineKind,
    ) -> Result<()> {
        let needed = self.stale_descriptor_count();
        if needed > 0 {
            if self.current.is_none() || self.num_free_handles < needed {
                self.switch_heap(stream, bound)?;
            }

            for slot in self.stale_tables {
                let entry = self.cache[slot];
                let srcs = &self.staging[entry.base..entry.base + entry.count as usize];
                self.device.copy_descriptors(self.heap_type, self.current_cpu, srcs);

                stream.record(NativeCommand::SetRootDescriptorTable {
                    pipeline,
                    slot: slot as u32,
                    base: self.current_gpu,
                });
                self.advance(entry.count);
            }
            self.stale_tables.clear();
        }

        self.inline_cbv.commit(stream, pipeline);
        self.inline_srv.commit(stream, pipeline);
        self.inline_uav.commit(stream, pipeline);
        Ok(())
    }

    /// Copies a single CPU descriptor into the shader-visible heap and returns
    /// its GPU handle.
    pub fn copy_descriptor(
        &mut self,
        stream: &mut CommandStream,
        bound: &mut BoundHeaps,
        src: CpuDescriptorHandle,
    ) -> Result<GpuDescriptorHandle> {
        if self.current.is_none() || self.num_free_handles < 1 {
            self.switch_heap(stream, bound)?;
        }

        let gpu = self.current_gpu;
        self.device.copy_descriptors(self.heap_type, self.current_cpu, &[src]);
        self.advance(1);
        Ok(gpu)
    }

    /// Returns every shader-visible heap to the pool and clears staged state.
    ///
    /// Only valid once the GPU finished with the list that used this heap.
    pub fn reset(&mut self) {
        self.available = self.heaps.iter().cloned().collect();
        self.current = None;
        self.current_cpu = CpuDescriptorHandle::NULL;
        self.current_gpu = GpuDescriptorHandle::default();
        self.num_free_handles = 0;

        self.table_mask.clear();
        self.stale_tables.clear();
        self.cache = [TableCacheEntry::default(); MAX_DESCRIPTOR_TABLES];
        self.staging.fill(CpuDescriptorHandle::NULL);

        self.inline_cbv.reset();
        self.inline_srv.reset();
        self.inline_uav.reset();
    }

    fn advance(&mut self, count: u32) {
        self.current_cpu = self.current_cpu.offset(count, self.increment);
        self.current_gpu = self.current_gpu.offset(count, self.increment);
        self.num_free_handles -= count;
    }

    fn switch_heap(&mut self, stream: &mut CommandStream, bound: &mut BoundHeaps) -> Result<()> {
        let heap = self.request_heap()?;
        let gpu = heap.gpu_start().ok_or_else(|| {
            anyhow!("{:?} heap {:?} is not shader visible", self.heap_type, heap.id())
        })?;

        self.current_cpu = heap.cpu_start();
        self.current_gpu = gpu;
        self.num_free_handles = heap.capacity();

        if bound.set(self.heap_type, heap.id()) {
            bound.record(stream);
        }
        self.current = Some(heap);

        // Tables copied into the previous heap are gone once it is unbound.
        self.stale_tables = self.table_mask;
        Ok(())
    }

    fn request_heap(&mut self) -> Result<Arc<dyn NativeDescriptorHeap>> {
        if let Some(heap) = self.available.pop_front() {
            return Ok(heap);
        }

        let heap = self
            .device
            .create_descriptor_heap(self.heap_type, self.descriptors_per_heap, true)
            .inspect_err(|err| log::error!("failed to create shader-visible heap: {err}"))
            .with_context(|| {
                format!(
                    "failed to create a {} descriptor shader-visible {:?} heap",
                    self.descriptors_per_heap, self.heap_type
                )
            })?;

        log::debug!(
            "dynamic {:?} heap: heap {} created",
            self.heap_type,
            self.heaps.len()
        );
        self.heaps.push(heap.clone());
        Ok(heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::soft::SoftDevice;
    use crate::native::{
        DescriptorRange, DescriptorRangeType, DescriptorView, QueueType, ResourceId,
        RootParameter,
    };

    struct Fixture {
        soft: SoftDevice,
        heap: DynamicDescriptorHeap,
        cpu: Arc<dyn NativeDescriptorHeap>,
        stream: CommandStream,
        bound: BoundHeaps,
    }

    fn fixture(descriptors_per_heap: u32) -> Fixture {
        let soft = SoftDevice::new();
        let device: Arc<dyn NativeDevice> = Arc::new(soft.clone());
        let cpu = device
            .create_descriptor_heap(DescriptorHeapType::CbvSrvUav, 16, false)
            .unwrap();
        let inc = device.descriptor_handle_increment_size(DescriptorHeapType::CbvSrvUav);
        for i in 0..16 {
            device.create_view(
                cpu.cpu_start().offset(i, inc),
                DescriptorView::ShaderResource(ResourceId(u64::from(i) + 100)),
            );
        }

        Fixture {
            heap: DynamicDescriptorHeap::new(
                device,
                DescriptorHeapType::CbvSrvUav,
                descriptors_per_heap,
            ),
            soft,
            cpu,
            stream: CommandStream::new(QueueType::Direct),
            bound: BoundHeaps::default(),
        }
    }

    fn two_tables() -> RootSignature {
        RootSignature::new(vec![
            RootParameter::DescriptorTable(vec![DescriptorRange::new(DescriptorRangeType::Srv, 2)]),
            RootParameter::View(RootViewKind::Cbv),
            RootParameter::DescriptorTable(vec![DescriptorRange::new(DescriptorRangeType::Uav, 2)]),
        ])
    }

    fn table_bindings(stream: &CommandStream) -> Vec<(u32, GpuDescriptorHandle)> {
        stream
            .commands()
            .iter()
            .filter_map(|cmd| match cmd {
                NativeCommand::SetRootDescriptorTable { slot, base, .. } => Some((*slot, *base)),
                _ => None,
            })
            .collect()
    }

    fn heap_bindings(stream: &CommandStream) -> usize {
        stream
            .commands()
            .iter()
            .filter(|cmd| matches!(cmd, NativeCommand::SetDescriptorHeaps(_)))
            .count()
    }

    #[test]
    fn commit_copies_staged_tables_into_the_visible_heap() {
        let mut f = fixture(8);
        let inc = f.soft.descriptor_handle_increment_size(DescriptorHeapType::CbvSrvUav);
        f.heap.parse_root_signature(&two_tables());
        f.heap.stage_descriptors(0, 0, 2, f.cpu.cpu_start());
        f.heap.stage_descriptors(2, 1, 1, f.cpu.cpu_start().offset(5, inc));
        assert_eq!(f.heap.stale_descriptor_count(), 4);

        f.heap
            .commit_staged_descriptors(&mut f.stream, &mut f.bound, PipelineKind::Graphics)
            .unwrap();

        let tables = table_bindings(&f.stream);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].0, 0);
        assert_eq!(tables[1].0, 2);
        assert_eq!(tables[1].1, tables[0].1.offset(2, inc));

        let read = |h| f.soft.read_gpu_descriptor(DescriptorHeapType::CbvSrvUav, h);
        assert_eq!(read(tables[0].1), Some(DescriptorView::ShaderResource(ResourceId(100))));
        assert_eq!(
            read(tables[0].1.offset(1, inc)),
            Some(DescriptorView::ShaderResource(ResourceId(101)))
        );
        // Unstaged table entries stay empty.
        assert_eq!(read(tables[1].1), None);
        assert_eq!(
            read(tables[1].1.offset(1, inc)),
            Some(DescriptorView::ShaderResource(ResourceId(105)))
        );

        assert_eq!(heap_bindings(&f.stream), 1);
        assert_eq!(f.heap.num_free_handles(), 4);
        assert!(f.heap.stale_tables().is_empty());
    }

    #[test]
    fn nothing_stale_records_nothing() {
        let mut f = fixture(8);
        f.heap.parse_root_signature(&two_tables());
        f.heap
            .commit_staged_descriptors(&mut f.stream, &mut f.bound, PipelineKind::Compute)
            .unwrap();
        assert!(f.stream.is_empty());
        assert_eq!(f.heap.heap_count(), 0);
    }

    #[test]
    fn heap_switch_rebinds_every_table() {
        let mut f = fixture(4);
        f.heap.parse_root_signature(&two_tables());
        f.heap.stage_descriptors(0, 0, 2, f.cpu.cpu_start());
        f.heap.stage_descriptors(2, 0, 2, f.cpu.cpu_start());
        f.heap
            .commit_staged_descriptors(&mut f.stream, &mut f.bound, PipelineKind::Graphics)
            .unwrap();
        assert_eq!(f.heap.num_free_handles(), 0);

        // Only slot 0 changed, but the new heap has neither table.
        f.heap.stage_descriptors(0, 0, 2, f.cpu.cpu_start());
        f.heap
            .commit_staged_descriptors(&mut f.stream, &mut f.bound, PipelineKind::Graphics)
            .unwrap();

        assert_eq!(f.heap.heap_count(), 2);
        assert_eq!(heap_bindings(&f.stream), 2);
        let slots: Vec<u32> = table_bindings(&f.stream).iter().map(|(s, _)| *s).collect();
        assert_eq!(slots, vec![0, 2, 0, 2]);
    }

    #[test]
    fn inline_views_bind_without_copies() {
        let mut f = fixture(8);
        f.heap.parse_root_signature(&two_tables());
        f.heap.stage_inline_cbv(1, 0x1000);
        f.heap.stage_inline_uav(3, 0x2000);
        f.heap
            .commit_staged_descriptors(&mut f.stream, &mut f.bound, PipelineKind::Graphics)
            .unwrap();

        assert_eq!(
            f.stream.commands(),
            &[
                NativeCommand::SetRootView {
                    pipeline: PipelineKind::Graphics,
                    slot: 1,
                    kind: RootViewKind::Cbv,
                    address: 0x1000,
                },
                NativeCommand::SetRootView {
                    pipeline: PipelineKind::Graphics,
                    slot: 3,
                    kind: RootViewKind::Uav,
                    address: 0x2000,
                },
            ]
        );
        assert_eq!(f.heap.heap_count(), 0);
    }

    #[test]
    fn copy_descriptor_returns_a_gpu_handle() {
        let mut f = fixture(8);
        let inc = f.soft.descriptor_handle_increment_size(DescriptorHeapType::CbvSrvUav);
        let gpu = f
            .heap
            .copy_descriptor(&mut f.stream, &mut f.bound, f.cpu.cpu_start().offset(3, inc))
            .unwrap();
        assert_eq!(
            f.soft.read_gpu_descriptor(DescriptorHeapType::CbvSrvUav, gpu),
            Some(DescriptorView::ShaderResource(ResourceId(103)))
        );
        assert_eq!(f.heap.num_free_handles(), 7);
    }

    #[test]
    fn reset_reuses_heaps() {
        let mut f = fixture(4);
        f.heap.parse_root_signature(&two_tables());
        f.heap.stage_descriptors(0, 0, 2, f.cpu.cpu_start());
        f.heap
            .commit_staged_descriptors(&mut f.stream, &mut f.bound, PipelineKind::Graphics)
            .unwrap();

        f.heap.reset();
        f.stream.reset();
        f.bound = BoundHeaps::default();

        f.heap.parse_root_signature(&two_tables());
        f.heap.stage_descriptors(0, 0, 2, f.cpu.cpu_start());
        f.heap
            .commit_staged_descriptors(&mut f.stream, &mut f.bound, PipelineKind::Graphics)
            .unwrap();
        assert_eq!(f.heap.heap_count(), 1);
    }

    #[test]
    #[should_panic(expected = "overflows")]
    fn staging_past_the_table_panics() {
        let mut f = fixture(8);
        f.heap.parse_root_signature(&two_tables());
        f.heap.stage_descriptors(0, 1, 2, f.cpu.cpu_start());
    }

    #[test]
    fn heap_creation_failure_is_an_error() {
        let mut f = fixture(8);
        f.heap.parse_root_signature(&two_tables());
        f.heap.stage_descriptors(0, 0, 1, f.cpu.cpu_start());
        f.soft.set_fail_creation(true);
        assert!(
            f.heap
                .commit_staged_descriptors(&mut f.stream, &mut f.bound, PipelineKind::Graphics)
                .is_err()
        );
    }
}
