//! CPU descriptor allocation.
//!
//! Descriptors created here live in CPU-only heaps. They are copied into a
//! shader-visible heap by [`crate::dynamic_heap`] right before use, so the
//! allocator only has to deal with variable-size blocks and deferred reuse.

mod allocation;
mod allocator;
mod page;

pub use allocation::DescriptorAllocation;
pub use allocator::DescriptorAllocator;
pub use page::DescriptorPage;
