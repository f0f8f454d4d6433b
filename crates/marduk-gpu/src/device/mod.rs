//! Device-level ownership.
//!
//! This module is responsible for:
//! - creating the direct, compute and copy queues of a native device
//! - owning one CPU descriptor allocator per heap type
//! - owning the committed resource states the queues share

mod gpu;
mod init;

pub use gpu::Device;
pub use init::DeviceInit;
