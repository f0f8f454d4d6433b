//! Transient upload memory.
//!
//! Each command list owns an [`UploadAllocator`]: a pool of fixed-size pages
//! of pinned memory with a bump pointer. Pages are rewound together when the
//! list is reset, which only happens after the GPU finished reading them.

mod allocator;
mod page;

pub use allocator::UploadAllocator;
pub use page::{UploadAllocation, UploadPage};

/// Rounds `value` up to a multiple of `alignment` (a power of two).
#[inline]
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two(), "alignment {alignment} is not a power of two");
    (value + alignment - 1) & !(alignment - 1)
}
