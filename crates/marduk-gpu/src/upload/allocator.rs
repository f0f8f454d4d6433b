use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::native::NativeDevice;

use super::{UploadAllocation, UploadPage, align_up};

/// Linear allocator over a pool of upload pages.
///
/// Not synchronized: owned by exactly one command list.
pub struct UploadAllocator {
    device: Arc<dyn NativeDevice>,
    page_size: u64,
    pages: Vec<UploadPage>,
    available: VecDeque<usize>,
    current: Option<usize>,
}

impl UploadAllocator {
    pub fn new(device: Arc<dyn NativeDevice>, page_size: u64) -> Self {
        Self {
            device,
            page_size,
            pages: Vec::new(),
            available: VecDeque::new(),
            current: None,
        }
    }

    #[inline]
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[UploadPage] {
        &self.pages
    }

    /// Allocates `size` bytes aligned to `alignment` (a power of two).
    ///
    /// # Panics
    /// Panics if the aligned request is larger than a page.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<UploadAllocation> {
        assert!(
            align_up(size, alignment) <= self.page_size,
            "upload of {size} bytes exceeds the {} byte page size",
            self.page_size
        );

        let fits = self
            .current
            .is_some_and(|i| self.pages[i].has_space(size, alignment));
        let index = match self.current {
            Some(index) if fits => index,
            _ => {
                let index = self.request_page()?;
                self.current = Some(index);
                index
            }
        };

        Ok(self.pages[index].allocate(size, alignment))
    }

    /// Makes every page available again, rewound to offset zero.
    ///
    /// Only valid once the GPU finished with every allocation handed out.
    pub fn reset(&mut self) {
        self.current = None;
        self.available.clear();
        for (index, page) in self.pages.iter_mut().enumerate() {
            page.reset();
            self.available.push_back(index);
        }
    }

    fn request_page(&mut self) -> Result<usize> {
        if let Some(index) = self.available.pop_front() {
            return Ok(index);
        }

        let buffer = self
            .device
            .create_upload_buffer(self.page_size)
            .inspect_err(|err| log::error!("failed to create upload page: {err}"))
            .with_context(|| format!("failed to create a {} byte upload page", self.page_size))?;

        log::debug!("upload allocator: page {} created", self.pages.len());
        self.pages.push(UploadPage::new(buffer));
        Ok(self.pages.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::soft::SoftDevice;

    fn allocator(page_size: u64) -> (SoftDevice, UploadAllocator) {
        let soft = SoftDevice::new();
        let allocator = UploadAllocator::new(Arc::new(soft.clone()), page_size);
        (soft, allocator)
    }

    #[test]
    fn small_allocations_share_a_page() {
        let (_soft, mut upload) = allocator(1024);
        let a = upload.allocate(100, 16).unwrap();
        let b = upload.allocate(100, 16).unwrap();
        assert_eq!(upload.page_count(), 1);
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 112);
        assert_eq!(b.gpu_address(), a.gpu_address() + 112);
    }

    #[test]
    fn overflow_lands_on_a_second_page_and_reset_rewinds_both() {
        let (soft, mut upload) = allocator(1024);
        let a = upload.allocate(600, 256).unwrap();
        let b = upload.allocate(600, 256).unwrap();

        assert_eq!(upload.page_count(), 2);
        assert_eq!(soft.upload_buffer_count(), 2);
        assert_ne!(a.gpu_address() & !0xffff, b.gpu_address() & !0xffff);

        upload.reset();
        assert!(upload.pages().iter().all(|p| p.offset() == 0));

        // Recycled pages are reused before new ones are created.
        let _ = upload.allocate(600, 256).unwrap();
        let _ = upload.allocate(600, 256).unwrap();
        assert_eq!(upload.page_count(), 2);
        assert_eq!(soft.upload_buffer_count(), 2);
    }

    #[test]
    fn writes_are_visible_through_the_allocation() {
        let (_soft, mut upload) = allocator(256);
        let a = upload.allocate(16, 4).unwrap();
        a.write_pod(&[1u32, 2, 3, 4]);
        assert_eq!(a.read(), bytemuck::cast_slice::<u32, u8>(&[1, 2, 3, 4]).to_vec());
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn oversize_request_panics() {
        let (_soft, mut upload) = allocator(256);
        let _ = upload.allocate(257, 1);
    }

    #[test]
    fn page_creation_failure_is_an_error() {
        let (soft, mut upload) = allocator(256);
        soft.set_fail_creation(true);
        assert!(upload.allocate(16, 16).is_err());
    }
}
