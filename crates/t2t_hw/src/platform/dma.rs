use crate::error::AllocationError;
use std::io;
use std::ptr::NonNull;
use t2t_common::HUGEPAGE_SIZE;
use tracing::{debug, info, warn};

/// How a DMA region should be backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaPolicy {
    /// Try 2 MiB huge pages before ordinary pages.
    pub hugepages: bool,
    /// Lock the pages into physical memory.
    pub lock: bool,
}

impl DmaPolicy {
    /// Huge pages and mlock, as required by real hardware.
    pub const DEVICE: Self = Self {
        hugepages: true,
        lock: true,
    };

    /// Ordinary unlocked pages, for software-only backends.
    pub const ANONYMOUS: Self = Self {
        hugepages: false,
        lock: false,
    };
}

/// Anonymous memory the device writes records into.
///
/// The region is zero-filled and pre-faulted. It is unlocked and unmapped on
/// drop; callers must make sure the device no longer targets it by then.
#[derive(Debug)]
pub struct DmaRegion {
    ptr: NonNull<u8>,
    len: usize,
    hugepages: bool,
    locked: bool,
}

// SAFETY: the region is owned exclusively; sharing it across threads is the
// producer/consumer protocol's business, enforced by the ring indices.
unsafe impl Send for DmaRegion {}
// SAFETY: see above.
unsafe impl Sync for DmaRegion {}

fn map_anonymous(len: usize, extra_flags: libc::c_int) -> io::Result<NonNull<u8>> {
    // SAFETY: anonymous private mapping; checked against MAP_FAILED.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_POPULATE | extra_flags,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(ptr.cast::<u8>()).ok_or_else(|| io::Error::other("mmap returned null"))
}

impl DmaRegion {
    /// Allocates at least `size` bytes according to `policy`.
    ///
    /// A failed huge-page mapping falls back to ordinary pages, and a failed
    /// `mlock` leaves the region unlocked; both are logged as degraded modes.
    /// Only a failure of the ordinary mapping is an error.
    pub fn allocate(size: usize, policy: DmaPolicy) -> Result<Self, AllocationError> {
        if size == 0 {
            return Err(AllocationError {
                size,
                source: io::Error::new(io::ErrorKind::InvalidInput, "zero-sized DMA region"),
            });
        }

        let mut mapping = None;
        if policy.hugepages {
            let len = size.div_ceil(HUGEPAGE_SIZE) * HUGEPAGE_SIZE;
            match map_anonymous(len, libc::MAP_HUGETLB) {
                Ok(ptr) => mapping = Some((ptr, len, true)),
                Err(e) => warn!(
                    size = len,
                    error = %e,
                    "huge pages unavailable, using regular pages for DMA (degraded)"
                ),
            }
        }

        let (ptr, len, hugepages) = match mapping {
            Some(m) => m,
            None => {
                let ptr = map_anonymous(size, 0).map_err(|source| AllocationError { size, source })?;
                (ptr, size, false)
            }
        };

        let mut locked = false;
        if policy.lock {
            // SAFETY: ptr/len describe the mapping created above.
            if unsafe { libc::mlock(ptr.as_ptr().cast(), len) } == 0 {
                locked = true;
            } else {
                warn!(
                    size = len,
                    error = %io::Error::last_os_error(),
                    "cannot lock DMA memory, pages may migrate (degraded)"
                );
            }
        }

        info!(size = len, hugepages, locked, "allocated DMA region");
        Ok(Self {
            ptr,
            len,
            hugepages,
            locked,
        })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Virtual address of the first byte.
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_hugepage(&self) -> bool {
        self.hugepages
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe a live mapping owned by this value.
        unsafe {
            if self.locked {
                libc::munlock(self.ptr.as_ptr().cast(), self.len);
            }
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
        debug!(size = self.len, "released DMA region");
    }
}
