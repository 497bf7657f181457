use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr::NonNull;

/// A device register window mapped into the process.
///
/// Accesses are volatile 32-bit loads and stores. The mapping is released on
/// drop.
#[derive(Debug)]
pub struct MmioRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is process-wide and owned exclusively by this value.
unsafe impl Send for MmioRegion {}
// SAFETY: every access is a single volatile load or store of a naturally
// aligned word; concurrent access has hardware register semantics.
unsafe impl Sync for MmioRegion {}

impl MmioRegion {
    /// Maps `len` bytes of `fd` starting at `offset` as shared read/write.
    pub fn map(fd: BorrowedFd<'_>, len: usize, offset: u64) -> io::Result<Self> {
        let offset = libc::off_t::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "mmap offset out of range"))?;
        // SAFETY: a fresh shared mapping of a valid descriptor; the result is
        // checked against MAP_FAILED before use.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                offset,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned null"))?;
        Ok(Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn in_bounds(&self, offset: usize) -> bool {
        offset % 4 == 0 && offset.checked_add(4).is_some_and(|end| end <= self.len)
    }

    /// Reads the register at `offset`, or `None` when it lies outside the
    /// window or is unaligned.
    pub fn try_read32(&self, offset: usize) -> Option<u32> {
        // SAFETY: bounds and alignment checked; the mapping is live.
        self.in_bounds(offset)
            .then(|| unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() })
    }

    /// Reads the register at `offset`. Reads outside a window smaller than
    /// the register map return all ones, as an absent PCIe register does.
    pub fn read32(&self, offset: usize) -> u32 {
        self.try_read32(offset).unwrap_or(u32::MAX)
    }

    /// Writes the register at `offset`. Out-of-range writes are dropped.
    pub fn write32(&self, offset: usize, value: u32) {
        if self.in_bounds(offset) {
            // SAFETY: bounds and alignment checked; the mapping is live.
            unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value) }
        }
    }
}

impl Drop for MmioRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe a mapping created by `map` and not yet
        // released.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsFd;

    #[test]
    fn maps_a_file_and_accesses_words() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[0u8; 4096]).unwrap();

        let region = MmioRegion::map(file.as_fd(), 4096, 0).unwrap();
        region.write32(0x10, 0xDEAD_BEEF);
        assert_eq!(region.read32(0x10), 0xDEAD_BEEF);
        assert_eq!(region.try_read32(4096), None);
        assert_eq!(region.try_read32(3), None);
        assert_eq!(region.len(), 4096);
    }

    #[test]
    fn short_window_reads_ones_and_drops_writes() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[0u8; 4096]).unwrap();

        let region = MmioRegion::map(file.as_fd(), 256, 0).unwrap();
        region.write32(0x300, 0x1234);
        assert_eq!(region.read32(0x300), u32::MAX);
        assert_eq!(region.read32(0xFC), 0);
    }
}
