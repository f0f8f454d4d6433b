//! Software GPU backend.
//!
//! Executes command streams on the calling thread and keeps an event log of
//! everything it ran, so ordering can be asserted in tests. Fences either
//! complete as soon as they are signaled (the default) or only when
//! [`SoftDevice::complete_all`] is called, which lets tests observe work that
//! is still "in flight".

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use super::heap_store::HeapStore;
use super::{
    CommandStream, CpuDescriptorHandle, CpuFence, DescriptorHeapType, DescriptorView,
    GpuDescriptorHandle, NativeCommand, NativeDescriptorHeap, NativeDevice, NativeError,
    NativeFence, NativeQueue, NativeUploadBuffer, QueueType, ResourceId,
};

const UPLOAD_ADDRESS_BASE: u64 = 0x1_0000_0000;
const UPLOAD_ADDRESS_ALIGNMENT: u64 = 64 * 1024;

/// Something the software GPU did, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub enum SoftEvent {
    /// A stream was submitted; its commands follow as `Executed` events.
    Submitted { queue: QueueType, commands: usize },
    Executed { queue: QueueType, command: NativeCommand },
    Signaled { queue: QueueType, value: u64 },
    Waited { queue: QueueType, value: u64 },
}

struct SoftUploadBuffer {
    address: u64,
    data: Mutex<Vec<u8>>,
}

impl NativeUploadBuffer for SoftUploadBuffer {
    fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn gpu_address(&self) -> u64 {
        self.address
    }

    fn write(&self, offset: u64, data: &[u8]) {
        let start = offset as usize;
        self.data.lock()[start..start + data.len()].copy_from_slice(data);
    }

    fn read(&self, offset: u64, len: u64) -> Vec<u8> {
        let start = offset as usize;
        self.data.lock()[start..start + len as usize].to_vec()
    }
}

struct SoftShared {
    heaps: HeapStore,
    auto_complete: AtomicBool,
    fail_creation: AtomicBool,
    fences: Mutex<Vec<Arc<CpuFence>>>,
    events: Mutex<Vec<SoftEvent>>,
    uploads: Mutex<BTreeMap<u64, Arc<SoftUploadBuffer>>>,
    next_upload_address: AtomicU64,
    buffers: Mutex<HashMap<ResourceId, Vec<u8>>>,
    next_resource: AtomicU64,
}

impl SoftShared {
    fn check_creation(&self, what: &'static str) -> Result<(), NativeError> {
        if self.fail_creation.load(Ordering::Acquire) {
            return Err(NativeError::OutOfMemory(what));
        }
        Ok(())
    }

    fn upload_bytes(&self, address: u64, size: u64) -> Option<Vec<u8>> {
        let uploads = self.uploads.lock();
        let (&base, buffer) = uploads.range(..=address).next_back()?;
        let offset = address - base;
        if offset + size > buffer.size() {
            return None;
        }
        Some(buffer.read(offset, size))
    }

    fn run(&self, queue: QueueType, command: &NativeCommand) {
        match command {
            NativeCommand::CopyBufferRegion {
                dst,
                dst_offset,
                src_address,
                size,
            } => match self.upload_bytes(*src_address, *size) {
                Some(bytes) => {
                    let mut buffers = self.buffers.lock();
                    let target = buffers.entry(*dst).or_default();
                    let start = *dst_offset as usize;
                    if target.len() < start + bytes.len() {
                        target.resize(start + bytes.len(), 0);
                    }
                    target[start..start + bytes.len()].copy_from_slice(&bytes);
                }
                None => log::error!("soft gpu: copy from unmapped address {src_address:#x}"),
            },
            NativeCommand::CopyResource { dst, src } => {
                let mut buffers = self.buffers.lock();
                let bytes = buffers.get(src).cloned().unwrap_or_default();
                buffers.insert(*dst, bytes);
            }
            _ => {}
        }

        self.events.lock().push(SoftEvent::Executed {
            queue,
            command: command.clone(),
        });
    }
}

/// Handle to the software GPU. Cheap to clone.
#[derive(Clone)]
pub struct SoftDevice {
    shared: Arc<SoftShared>,
}

impl SoftDevice {
    /// Creates a device whose fences complete as soon as they are signaled.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SoftShared {
                heaps: HeapStore::new([32, 16, 8, 8]),
                auto_complete: AtomicBool::new(true),
                fail_creation: AtomicBool::new(false),
                fences: Mutex::new(Vec::new()),
                events: Mutex::new(Vec::new()),
                uploads: Mutex::new(BTreeMap::new()),
                next_upload_address: AtomicU64::new(UPLOAD_ADDRESS_BASE),
                buffers: Mutex::new(HashMap::new()),
                next_resource: AtomicU64::new(1),
            }),
        }
    }

    /// Creates a device whose fences only advance on [`complete_all`](Self::complete_all).
    pub fn with_manual_completion() -> Self {
        let device = Self::new();
        device.set_auto_complete(false);
        device
    }

    pub fn set_auto_complete(&self, enabled: bool) {
        self.shared.auto_complete.store(enabled, Ordering::Release);
        if enabled {
            self.complete_all();
        }
    }

    /// Makes every subsequent native object creation fail.
    pub fn set_fail_creation(&self, fail: bool) {
        self.shared.fail_creation.store(fail, Ordering::Release);
    }

    /// Completes all work signaled so far on every queue.
    pub fn complete_all(&self) {
        for fence in self.shared.fences.lock().iter() {
            fence.complete_signaled();
        }
    }

    pub fn events(&self) -> Vec<SoftEvent> {
        self.shared.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.shared.events.lock().clear();
    }

    /// Commands executed on `queue`, in order.
    pub fn executed_commands(&self, queue: QueueType) -> Vec<NativeCommand> {
        self.shared
            .events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SoftEvent::Executed { queue: q, command } if *q == queue => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Creates a zero-filled buffer resource owned by the software GPU.
    pub fn create_buffer(&self, size: usize) -> ResourceId {
        let id = ResourceId(self.shared.next_resource.fetch_add(1, Ordering::Relaxed));
        self.shared.buffers.lock().insert(id, vec![0; size]);
        id
    }

    pub fn buffer_contents(&self, id: ResourceId) -> Vec<u8> {
        self.shared.buffers.lock().get(&id).cloned().unwrap_or_default()
    }

    pub fn read_descriptor(
        &self,
        heap_type: DescriptorHeapType,
        handle: CpuDescriptorHandle,
    ) -> Option<DescriptorView> {
        self.shared.heaps.read(heap_type, handle)
    }

    pub fn read_gpu_descriptor(
        &self,
        heap_type: DescriptorHeapType,
        handle: GpuDescriptorHandle,
    ) -> Option<DescriptorView> {
        self.shared.heaps.read_gpu(heap_type, handle)
    }

    pub fn upload_buffer_count(&self) -> usize {
        self.shared.uploads.lock().len()
    }
}

impl Default for SoftDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeDevice for SoftDevice {
    fn backend_name(&self) -> &'static str {
        "soft"
    }

    fn create_queue(&self, queue_type: QueueType) -> Result<Arc<dyn NativeQueue>, NativeError> {
        self.shared.check_creation("command queue")?;
        let fence = Arc::new(CpuFence::new());
        self.shared.fences.lock().push(fence.clone());
        Ok(Arc::new(SoftQueue {
            queue_type,
            fence,
            shared: self.shared.clone(),
        }))
    }

    fn create_descriptor_heap(
        &self,
        heap_type: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<Arc<dyn NativeDescriptorHeap>, NativeError> {
        self.shared.check_creation("descriptor heap")?;
        Ok(self.shared.heaps.create(heap_type, capacity, shader_visible))
    }

    fn create_upload_buffer(&self, size: u64) -> Result<Arc<dyn NativeUploadBuffer>, NativeError> {
        self.shared.check_creation("upload buffer")?;
        let reserved = size.div_ceil(UPLOAD_ADDRESS_ALIGNMENT).max(1) * UPLOAD_ADDRESS_ALIGNMENT;
        let address = self
            .shared
            .next_upload_address
            .fetch_add(reserved, Ordering::Relaxed);
        let buffer = Arc::new(SoftUploadBuffer {
            address,
            data: Mutex::new(vec![0; size as usize]),
        });
        self.shared.uploads.lock().insert(address, buffer.clone());
        Ok(buffer)
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

struct SoftQueue {
    queue_type: QueueType,
    fence: Arc<CpuFence>,
    shared: Arc<SoftShared>,
}

impl NativeQueue for SoftQueue {
    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn fence(&self) -> Arc<dyn NativeFence> {
        self.fence.clone()
    }

    fn execute(&self, streams: &[&CommandStream]) {
        for stream in streams {
            debug_assert!(stream.is_closed(), "executing an open command stream");
            self.shared.events.lock().push(SoftEvent::Submitted {
                queue: self.queue_type,
                commands: stream.commands().len(),
            });
            for command in stream.commands() {
                self.shared.run(self.queue_type, command);
            }
        }
    }

    fn signal(&self, value: u64) {
        self.shared.events.lock().push(SoftEvent::Signaled {
            queue: self.queue_type,
            value,
        });
        self.fence.mark_signaled(value);
        if self.shared.auto_complete.load(Ordering::Acquire) {
            self.fence.complete_to(value);
        }
    }

    fn wait(&self, _fence: &dyn NativeFence, value: u64) {
        // Work runs eagerly on submit, so cross-queue ordering needs no stall.
        self.shared.events.lock().push(SoftEvent::Waited {
            queue: self.queue_type,
            value,
        });
    }
}
