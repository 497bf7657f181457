//! Operating-system access to the device.
//!
//! A backend maps the control BAR and provides DMA-capable memory together
//! with the bus address the device must be programmed with. The UIO and VFIO
//! backends talk to real hardware; the simulated backend is a software
//! register file used by tests and the `--backend sim` mode of the CLI.

pub mod discovery;
pub mod dma;
pub mod mmio;
pub mod pagemap;
pub mod sim;
pub mod uio;
pub mod vfio;

use crate::error::{AddressResolutionError, AllocationError};
use dma::DmaRegion;
use std::fmt;
use t2t_core::ProtocolViolation;

/// Which backend a handle was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Uio,
    Vfio,
    Simulated,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Uio => "uio",
            BackendKind::Vfio => "vfio",
            BackendKind::Simulated => "sim",
        })
    }
}

/// A memory region the device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarRegion {
    pub index: u8,
    pub size: u64,
    pub mapped: bool,
}

/// Validates a register offset against a window of `len` bytes.
pub fn check_register(offset: usize, len: usize) -> Result<(), ProtocolViolation> {
    if offset % 4 != 0 {
        return Err(ProtocolViolation::UnalignedRegister { offset });
    }
    if offset.checked_add(4).is_none_or(|end| end > len) {
        return Err(ProtocolViolation::RegisterOutOfRange { offset });
    }
    Ok(())
}

pub(crate) fn read_region(region: &mmio::MmioRegion, offset: usize) -> crate::Result<u32> {
    check_register(offset, region.len())?;
    Ok(region.read32(offset))
}

/// Capabilities every backend provides.
///
/// Register accessors take byte offsets that the caller has already validated
/// against [`PlatformAccess::bar_size`]. Memory ordering is the caller's
/// responsibility; backends issue plain volatile accesses.
pub trait PlatformAccess: Send {
    fn kind(&self) -> BackendKind;

    /// Size of the control register window in bytes.
    fn bar_size(&self) -> usize;

    fn read32(&self, offset: usize) -> u32;

    fn write32(&self, offset: usize, value: u32);

    /// Reads a word from any BAR, mapping it first if needed.
    fn read_bar32(&mut self, bar: u8, offset: usize) -> crate::Result<u32>;

    /// The regions the device exposes, without mapping them.
    fn bar_regions(&mut self) -> Vec<BarRegion>;

    fn alloc_dma(&mut self, size: usize) -> Result<DmaRegion, AllocationError>;

    /// Bus address the device must use to reach `region`.
    fn resolve_dma_address(&mut self, region: &DmaRegion) -> Result<u64, AddressResolutionError>;

    /// Tears down any device-side mapping of `region` before it is freed.
    fn release_dma(&mut self, _region: &DmaRegion) {}
}
