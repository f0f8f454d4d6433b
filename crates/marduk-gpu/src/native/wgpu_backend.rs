//! wgpu backend.
//!
//! wgpu exposes a single queue and tracks resource states itself, so:
//! - every [`QueueType`] maps onto the same `wgpu::Queue`, each with its own fence
//! - fences advance from `on_submitted_work_done` callbacks, driven by polling
//! - barriers and binding commands are accepted and dropped; only copies are
//!   translated (pipeline content lives above this layer)
//! - descriptor heaps are emulated in CPU memory
//! - upload memory is a CPU shadow flushed with `write_buffer` before use

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use super::heap_store::HeapStore;
use super::{
    CommandStream, CpuDescriptorHandle, CpuFence, DescriptorHeapType, DescriptorView,
    NativeCommand, NativeDescriptorHeap, NativeDevice, NativeError, NativeFence, NativeQueue,
    NativeUploadBuffer, QueueType, ResourceId,
};

const UPLOAD_ADDRESS_BASE: u64 = 0x1_0000_0000;
const UPLOAD_ADDRESS_ALIGNMENT: u64 = 64 * 1024;

struct WgpuUploadBuffer {
    address: u64,
    buffer: wgpu::Buffer,
    shadow: Mutex<Vec<u8>>,
    dirty: Mutex<Option<Range<u64>>>,
}

impl WgpuUploadBuffer {
    /// Pushes CPU writes made since the last flush to the GPU copy.
    fn flush(&self, queue: &wgpu::Queue) {
        let Some(range) = self.dirty.lock().take() else { return };
        let shadow = self.shadow.lock();
        let start = range.start & !(wgpu::COPY_BUFFER_ALIGNMENT - 1);
        let end = range
            .end
            .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
            .min(shadow.len() as u64);
        queue.write_buffer(&self.buffer, start, &shadow[start as usize..end as usize]);
    }
}

impl NativeUploadBuffer for WgpuUploadBuffer {
    fn size(&self) -> u64 {
        self.shadow.lock().len() as u64
    }

    fn gpu_address(&self) -> u64 {
        self.address
    }

    fn write(&self, offset: u64, data: &[u8]) {
        let start = offset as usize;
        self.shadow.lock()[start..start + data.len()].copy_from_slice(data);

        let written = offset..offset + data.len() as u64;
        let mut dirty = self.dirty.lock();
        *dirty = Some(match dirty.take() {
            Some(d) => d.start.min(written.start)..d.end.max(written.end),
            None => written,
        });
    }

    fn read(&self, offset: u64, len: u64) -> Vec<u8> {
        let start = offset as usize;
        self.shadow.lock()[start..start + len as usize].to_vec()
    }
}

struct WgpuShared {
    device: wgpu::Device,
    queue: wgpu::Queue,
    heaps: HeapStore,
    uploads: Mutex<BTreeMap<u64, Arc<WgpuUploadBuffer>>>,
    next_upload_address: AtomicU64,
    buffers: Mutex<HashMap<ResourceId, wgpu::Buffer>>,
    next_resource: AtomicU64,
}

impl WgpuShared {
    fn upload_at(&self, address: u64) -> Option<(Arc<WgpuUploadBuffer>, u64)> {
        let uploads = self.uploads.lock();
        let (&base, buffer) = uploads.range(..=address).next_back()?;
        Some((buffer.clone(), address - base))
    }

    fn encode(&self, encoder: &mut wgpu::CommandEncoder, command: &NativeCommand) {
        let aligned = |v: u64| v % wgpu::COPY_BUFFER_ALIGNMENT == 0;

        match command {
            NativeCommand::CopyBufferRegion {
                dst,
                dst_offset,
                src_address,
                size,
            } => {
                let Some((upload, src_offset)) = self.upload_at(*src_address) else {
                    log::error!("wgpu: copy from unmapped upload address {src_address:#x}");
                    return;
                };
                let buffers = self.buffers.lock();
                let Some(dst_buffer) = buffers.get(dst) else {
                    log::error!("wgpu: copy into unregistered buffer {dst:?}");
                    return;
                };
                if !(aligned(src_offset) && aligned(*dst_offset) && aligned(*size)) {
                    log::error!("wgpu: unaligned buffer copy of {size} bytes dropped");
                    return;
                }
                upload.flush(&self.queue);
                encoder.copy_buffer_to_buffer(&upload.buffer, src_offset, dst_buffer, *dst_offset, *size);
            }
            NativeCommand::CopyResource { dst, src } => {
                let buffers = self.buffers.lock();
                let (Some(src_buffer), Some(dst_buffer)) = (buffers.get(src), buffers.get(dst)) else {
                    log::error!("wgpu: copy between unregistered resources {src:?} -> {dst:?}");
                    return;
                };
                let size = src_buffer.size().min(dst_buffer.size());
                encoder.copy_buffer_to_buffer(src_buffer, 0, dst_buffer, 0, size);
            }
            other => log::trace!("wgpu: {other:?} is tracked by wgpu; dropped"),
        }
    }
}

/// Native device backed by a `wgpu::Device` and its queue.
#[derive(Clone)]
pub struct WgpuDevice {
    shared: Arc<WgpuShared>,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            shared: Arc::new(WgpuShared {
                device,
                queue,
                heaps: HeapStore::new([32, 16, 8, 8]),
                uploads: Mutex::new(BTreeMap::new()),
                next_upload_address: AtomicU64::new(UPLOAD_ADDRESS_BASE),
                buffers: Mutex::new(HashMap::new()),
                next_resource: AtomicU64::new(1),
            }),
        }
    }

    /// Creates a device without a surface, blocking on adapter/device acquisition.
    pub fn new_headless() -> Result<Self> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });

            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .context("failed to find a suitable GPU adapter")?;

            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("marduk-gpu device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await
                .context("failed to create wgpu device/queue")?;

            Ok(Self::new(device, queue))
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.shared.device
    }

    /// Makes a wgpu buffer addressable by copy commands.
    pub fn register_buffer(&self, buffer: wgpu::Buffer) -> ResourceId {
        let id = ResourceId(self.shared.next_resource.fetch_add(1, Ordering::Relaxed));
        self.shared.buffers.lock().insert(id, buffer);
        id
    }

    pub fn buffer(&self, id: ResourceId) -> Option<wgpu::Buffer> {
        self.shared.buffers.lock().get(&id).cloned()
    }
}

impl NativeDevice for WgpuDevice {
    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn create_queue(&self, queue_type: QueueType) -> Result<Arc<dyn NativeQueue>, NativeError> {
        Ok(Arc::new(WgpuQueue {
            queue_type,
            fence: Arc::new(WgpuFence {
                inner: CpuFence::new(),
                device: self.shared.device.clone(),
            }),
            shared: self.shared.clone(),
        }))
    }

    fn create_descriptor_heap(
        &self,
        heap_type: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<Arc<dyn NativeDescriptorHeap>, NativeError> {
        Ok(self.shared.heaps.create(heap_type, capacity, shader_visible))
    }

    fn create_upload_buffer(&self, size: u64) -> Result<Arc<dyn NativeUploadBuffer>, NativeError> {
        let size = size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self.shared.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("marduk upload page"),
            size,
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let reserved = size.div_ceil(UPLOAD_ADDRESS_ALIGNMENT).max(1) * UPLOAD_ADDRESS_ALIGNMENT;
        let address = self
            .shared
            .next_upload_address
            .fetch_add(reserved, Ordering::Relaxed);

        let upload = Arc::new(WgpuUploadBuffer {
            address,
            buffer,
            shadow: Mutex::new(vec![0; size as usize]),
            dirty: Mutex::new(None),
        });
        self.shared.uploads.lock().insert(address, upload.clone());
        Ok(upload)
    }

    fn descriptor_handle_increment_size(&self, heap_type: DescriptorHeapType) -> u32 {
        self.shared.heaps.increment(heap_type)
    }

    fn create_view(&self, dst: CpuDescriptorHandle, view: DescriptorView) {
        let heap_type = match view {
            DescriptorView::Sampler { .. } => DescriptorHeapType::Sampler,
            DescriptorView::RenderTarget(_) => DescriptorHeapType::Rtv,
            DescriptorView::DepthStencil(_) => DescriptorHeapType::Dsv,
            _ => DescriptorHeapType::CbvSrvUav,
        };
        self.shared.heaps.write(heap_type, dst, Some(view));
    }

    fn copy_descriptors(
        &self,
        heap_type: DescriptorHeapType,
        dst: CpuDescriptorHandle,
        srcs: &[CpuDescriptorHandle],
    ) {
        self.shared.heaps.copy(heap_type, dst, srcs);
    }
}

struct WgpuFence {
    inner: CpuFence,
    device: wgpu::Device,
}

impl NativeFence for WgpuFence {
    fn completed_value(&self) -> u64 {
        self.inner.completed_value()
    }

    fn wait(&self, value: u64, timeout: Option<Duration>) -> bool {
        let poll = || {
            let _ = self.device.poll(wgpu::PollType::Poll);
        };
        self.inner.wait_with(value, timeout, Some(&poll))
    }
}

struct WgpuQueue {
    queue_type: QueueType,
    fence: Arc<WgpuFence>,
    shared: Arc<WgpuShared>,
}

impl NativeQueue for WgpuQueue {
    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn fence(&self) -> Arc<dyn NativeFence> {
        self.fence.clone()
    }

    fn execute(&self, streams: &[&CommandStream]) {
        let mut encoder = self
            .shared
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("marduk submission encoder"),
            });

        for stream in streams {
            for command in stream.commands() {
                self.shared.encode(&mut encoder, command);
            }
        }

        self.shared.queue.submit(std::iter::once(encoder.finish()));
    }

    fn signal(&self, value: u64) {
        self.fence.inner.mark_signaled(value);
        let fence = self.fence.clone();
        self.shared
            .queue
            .on_submitted_work_done(move || fence.inner.complete_to(value));
    }

    fn wait(&self, _fence: &dyn NativeFence, value: u64) {
        // All queue types share one wgpu queue, which is already ordered.
        log::trace!("wgpu {} queue: wait for {value} is implicit", self.queue_type.name());
    }
}
