use std::time::Duration;

/// Initialization parameters for the submission layer.
///
/// Keep this structure stable and minimal. Add configuration only when a
/// concrete workload requires it.
#[derive(Debug, Clone)]
pub struct DeviceInit {
    /// Descriptors per CPU descriptor page.
    ///
    /// Larger requests create a page of the requested size instead.
    pub descriptors_per_page: u32,

    /// Descriptors per shader-visible heap of a command list.
    ///
    /// Bounds the total descriptor table size of a root signature.
    pub dynamic_descriptors_per_heap: u32,

    /// Size of one upload page in bytes.
    ///
    /// Bounds the size of a single upload allocation.
    pub upload_page_size: u64,

    /// How long [`CommandQueue::wait_for_frame`](crate::command::CommandQueue::wait_for_frame)
    /// waits before giving up.
    pub frame_latency_timeout: Duration,
}

impl Default for DeviceInit {
    fn default() -> Self {
        Self {
            descriptors_per_page: 256,
            dynamic_descriptors_per_heap: 1024,
            upload_page_size: 2 * 1024 * 1024,
            frame_latency_timeout: Duration::from_secs(1),
        }
    }
}
