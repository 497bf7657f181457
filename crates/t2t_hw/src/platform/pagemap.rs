//! Physical address lookup through `/proc/self/pagemap`.
//!
//! Each virtual page has a 64-bit entry: bit 63 is "present" and bits 0..55
//! hold the page frame number. Unprivileged readers see a zero PFN.

use crate::error::AddressResolutionError;
use std::fs::File;
use std::os::unix::fs::FileExt;

const PAGEMAP: &str = "/proc/self/pagemap";
const ENTRY_SIZE: u64 = 8;
const PRESENT: u64 = 1 << 63;
const PFN_MASK: u64 = (1 << 55) - 1;

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).ok().filter(|&s| s > 0).unwrap_or(4096)
}

/// Extracts the page frame number from a pagemap entry.
pub fn decode_entry(entry: u64) -> Result<u64, PfnError> {
    if entry & PRESENT == 0 {
        return Err(PfnError::NotPresent);
    }
    match entry & PFN_MASK {
        0 => Err(PfnError::Hidden),
        pfn => Ok(pfn),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PfnError {
    NotPresent,
    Hidden,
}

/// Resolves the physical address of `[vaddr, vaddr + len)`.
///
/// The device takes a single base address, so every page of the range must
/// map to consecutive frames.
pub fn resolve(vaddr: usize, len: usize) -> Result<u64, AddressResolutionError> {
    let file = File::open(PAGEMAP).map_err(AddressResolutionError::Pagemap)?;
    let page = page_size();
    let first_page = vaddr / page;
    let last_page = (vaddr + len.max(1) - 1) / page;

    let mut base_pfn = 0;
    for (i, vpage) in (first_page..=last_page).enumerate() {
        let mut buf = [0u8; 8];
        file.read_exact_at(&mut buf, vpage as u64 * ENTRY_SIZE)
            .map_err(AddressResolutionError::Pagemap)?;
        let pfn = decode_entry(u64::from_le_bytes(buf)).map_err(|e| match e {
            PfnError::NotPresent => AddressResolutionError::NotPresent {
                vaddr: vpage * page,
            },
            PfnError::Hidden => AddressResolutionError::PfnHidden,
        })?;
        if i == 0 {
            base_pfn = pfn;
        } else if pfn != base_pfn + i as u64 {
            return Err(AddressResolutionError::NotContiguous {
                offset: vpage * page - vaddr,
            });
        }
    }

    Ok(base_pfn * page as u64 + (vaddr % page) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_present_entries() {
        assert_eq!(decode_entry(PRESENT | 0x1234), Ok(0x1234));
        assert_eq!(decode_entry(0x1234), Err(PfnError::NotPresent));
        assert_eq!(decode_entry(PRESENT), Err(PfnError::Hidden));
        // soft-dirty and exclusive bits sit above the PFN field
        assert_eq!(decode_entry(PRESENT | (1 << 55) | (1 << 56) | 7), Ok(7));
    }

    #[test]
    fn resolution_never_panics_without_privileges() {
        let value = 0u64;
        let addr = &value as *const u64 as usize;
        match resolve(addr, 8) {
            Ok(_)
            | Err(AddressResolutionError::PfnHidden)
            | Err(AddressResolutionError::Pagemap(_)) => {}
            Err(e) => panic!("unexpected resolution failure: {e}"),
        }
    }
}
