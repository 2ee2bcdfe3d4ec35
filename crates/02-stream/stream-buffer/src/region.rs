//! Aligned host allocations owned by stream strategies.
//!
//! Pinned-memory streaming registers a page-aligned host block with the
//! driver; the staging and re-upload strategies keep a private scratch block
//! the producer writes into. Native targets prefer anonymous `mmap` regions,
//! which are page aligned. When the mapping does not satisfy the requested
//! alignment, or on WebAssembly, an aligned heap allocation is used instead.
//! Regions are always zero-filled.

use crate::{StreamError, StreamResult};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// Page granularity required for host memory handed to the driver.
pub const PAGE_ALIGNMENT: usize = 4096;

#[derive(Debug)]
enum Backing {
    #[cfg(not(target_arch = "wasm32"))]
    Mapped(memmap2::MmapMut),
    Heap { ptr: NonNull<u8>, layout: Layout },
}

/// Contiguous host memory with a guaranteed alignment.
#[derive(Debug)]
pub struct HostRegion {
    len: usize,
    alignment: usize,
    backing: Backing,
}

impl HostRegion {
    /// Allocates `len` zeroed bytes aligned to `alignment` (a non-zero power of two).
    pub fn new_aligned(len: usize, alignment: usize) -> StreamResult<Self> {
        let failed = StreamError::HostAllocationFailed {
            size: len,
            alignment,
        };
        if len == 0 || alignment == 0 || !alignment.is_power_of_two() {
            return Err(failed);
        }

        #[cfg(not(target_arch = "wasm32"))]
        {
            if let Some(map) = Self::mapped(len, alignment) {
                return Ok(Self {
                    len,
                    alignment,
                    backing: Backing::Mapped(map),
                });
            }
        }

        let layout = Layout::from_size_align(len, alignment).map_err(|_| failed.clone())?;
        // SAFETY: `layout` has a non-zero size, checked above.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(failed)?;
        Ok(Self {
            len,
            alignment,
            backing: Backing::Heap { ptr, layout },
        })
    }

    /// Page-aligned region whose length is rounded up to a whole number of pages.
    pub fn pages(len: usize) -> StreamResult<Self> {
        let rounded = len
            .checked_next_multiple_of(PAGE_ALIGNMENT)
            .ok_or(StreamError::HostAllocationFailed {
                size: len,
                alignment: PAGE_ALIGNMENT,
            })?;
        Self::new_aligned(rounded, PAGE_ALIGNMENT)
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn mapped(len: usize, alignment: usize) -> Option<memmap2::MmapMut> {
        // Anonymous mappings are zero-filled by the OS.
        let map = memmap2::MmapOptions::new().len(len).map_anon().ok()?;
        (map.as_ptr() as usize % alignment == 0).then_some(map)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn as_ptr(&self) -> *const u8 {
        match &self.backing {
            #[cfg(not(target_arch = "wasm32"))]
            Backing::Mapped(map) => map.as_ptr(),
            Backing::Heap { ptr, .. } => ptr.as_ptr(),
        }
    }

    pub fn as_non_null(&mut self) -> NonNull<u8> {
        let raw = match &mut self.backing {
            #[cfg(not(target_arch = "wasm32"))]
            Backing::Mapped(map) => map.as_mut_ptr(),
            Backing::Heap { ptr, .. } => ptr.as_ptr(),
        };
        // SAFETY: both backings hold a live, non-null allocation.
        unsafe { NonNull::new_unchecked(raw) }
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the allocation spans `len` bytes, zeroed at creation, for the life of `self`.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }
}

// SAFETY: a region uniquely owns its allocation, like a `Box<[u8]>`.
unsafe impl Send for HostRegion {}

impl Drop for HostRegion {
    fn drop(&mut self) {
        if let Backing::Heap { ptr, layout } = &self.backing {
            unsafe {
                // SAFETY: allocated in `new_aligned` with this exact layout.
                dealloc(ptr.as_ptr(), *layout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_round_up_and_align() {
        let region = HostRegion::pages(5000).expect("allocate pages");
        assert_eq!(region.len(), 2 * PAGE_ALIGNMENT);
        assert_eq!(region.as_ptr() as usize % PAGE_ALIGNMENT, 0);
        assert!(region.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn rejects_bad_requests() {
        assert!(HostRegion::new_aligned(0, 64).is_err());
        assert_eq!(
            HostRegion::new_aligned(128, 48).unwrap_err(),
            StreamError::HostAllocationFailed {
                size: 128,
                alignment: 48
            }
        );
    }

    #[test]
    fn writes_through_pointer_are_visible() {
        let mut region = HostRegion::new_aligned(256, 64).unwrap();
        let ptr = region.as_non_null();
        unsafe { ptr.as_ptr().add(10).write(0x5A) };
        assert_eq!(region.as_slice()[10], 0x5A);
    }

    #[test]
    fn over_aligned_region_is_zeroed() {
        // Wider than a page, so the mapping usually misses and the heap path runs.
        let region = HostRegion::new_aligned(300, 1 << 16).unwrap();
        assert_eq!(region.as_ptr() as usize % (1 << 16), 0);
        assert_eq!(region.alignment(), 1 << 16);
        assert!(region.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn region_moves_across_threads() {
        let region = HostRegion::pages(10).unwrap();
        let len = std::thread::spawn(move || region.len()).join().unwrap();
        assert_eq!(len, PAGE_ALIGNMENT);
    }
}
