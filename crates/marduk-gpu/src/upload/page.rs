use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;

use crate::native::NativeUploadBuffer;

use super::align_up;

/// A sub-range of upload memory, valid until its page is reset.
#[derive(Clone)]
pub struct UploadAllocation {
    buffer: Arc<dyn NativeUploadBuffer>,
    offset: u64,
    size: u64,
    gpu_address: u64,
}

impl UploadAllocation {
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Address the GPU reads this allocation from.
    #[inline]
    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    /// Copies `data` to the start of the allocation.
    pub fn write(&self, data: &[u8]) {
        debug_assert!(
            data.len() as u64 <= self.size,
            "writing {} bytes into a {} byte upload allocation",
            data.len(),
            self.size
        );
        self.buffer.write(self.offset, data);
    }

    pub fn write_pod<T: Pod>(&self, data: &[T]) {
        self.write(bytemuck::cast_slice(data));
    }

    /// Reads the allocation back (the memory is CPU visible).
    pub fn read(&self) -> Vec<u8> {
        self.buffer.read(self.offset, self.size)
    }
}

impl fmt::Debug for UploadAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadAllocation")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("gpu_address", &format_args!("{:#x}", self.gpu_address))
            .finish()
    }
}

/// One fixed-size page of upload memory with a bump pointer.
pub struct UploadPage {
    buffer: Arc<dyn NativeUploadBuffer>,
    page_size: u64,
    offset: u64,
}

impl UploadPage {
    pub(crate) fn new(buffer: Arc<dyn NativeUploadBuffer>) -> Self {
        Self {
            page_size: buffer.size(),
            buffer,
            offset: 0,
        }
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn has_space(&self, size: u64, alignment: u64) -> bool {
        align_up(self.offset, alignment) + align_up(size, alignment) <= self.page_size
    }

    /// Bump-allocates `size` bytes. The caller checks [`has_space`](Self::has_space) first.
    pub(crate) fn allocate(&mut self, size: u64, alignment: u64) -> UploadAllocation {
        debug_assert!(self.has_space(size, alignment));

        let offset = align_up(self.offset, alignment);
        self.offset = offset + align_up(size, alignment);

        UploadAllocation {
            buffer: self.buffer.clone(),
            offset,
            size,
            gpu_address: self.buffer.gpu_address() + offset,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.offset = 0;
    }
}
