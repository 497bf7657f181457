use super::discovery;
use super::dma::{DmaPolicy, DmaRegion};
use super::mmio::MmioRegion;
use super::{BackendKind, BarRegion, PlatformAccess, pagemap, read_region};
use crate::error::{AddressResolutionError, AllocationError, SetupError};
use std::fs::{File, OpenOptions};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use t2t_common::BAR0_SIZE;
use tracing::{debug, info, warn};

/// UIO exposes at most this many maps per device.
const MAX_MAPS: usize = 5;

/// Backend for a device bound to `uio_pci_generic` or a UIO stub driver.
///
/// Map N of `/dev/uioN` is mapped at offset `N * page_size`. DMA addresses
/// come from the pagemap walk; there is no IOMMU mapping.
pub struct UioPlatform {
    control: MmioRegion,
    extra: [Option<MmioRegion>; MAX_MAPS - 1],
    file: File,
    index: u32,
    sys: PathBuf,
}

impl UioPlatform {
    pub fn open(bdf: &str) -> Result<Self, SetupError> {
        Self::open_in(Path::new(discovery::SYSFS), bdf)
    }

    pub(crate) fn open_in(sys: &Path, bdf: &str) -> Result<Self, SetupError> {
        let class = sys.join("class/uio");
        if !class.is_dir() {
            return Err(SetupError::NoDevice {
                what: format!("{} missing, uio driver not loaded", class.display()),
            });
        }
        let index = discovery::find_uio(sys, bdf).ok_or_else(|| SetupError::NoDevice {
            what: format!("no uio device for {bdf}"),
        })?;

        let path = PathBuf::from(format!("/dev/uio{index}"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&path)
            .map_err(|e| SetupError::open(&path, e))?;

        let size = discovery::uio_map_size(sys, index, 0).unwrap_or(BAR0_SIZE);
        let control = MmioRegion::map(file.as_fd(), size, 0).map_err(|source| SetupError::Map {
            what: "uio map0 (control registers)",
            source,
        })?;
        if size < BAR0_SIZE {
            warn!(size, expected = BAR0_SIZE, "uio map0 is smaller than the register map");
        }
        info!(bdf, uio = index, size, "mapped control registers through uio");

        Ok(Self {
            control,
            extra: Default::default(),
            file,
            index,
            sys: sys.to_path_buf(),
        })
    }

    fn map(&mut self, bar: u8) -> crate::Result<&MmioRegion> {
        if bar == 0 {
            return Ok(&self.control);
        }
        let slot = usize::from(bar) - 1;
        if slot >= self.extra.len() {
            return Err(SetupError::NoBar { bar }.into());
        }
        if self.extra[slot].is_none() {
            let size =
                discovery::uio_map_size(&self.sys, self.index, bar).ok_or(SetupError::NoBar { bar })?;
            // SAFETY: sysconf has no preconditions.
            let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) }.max(4096) as u64;
            let region = MmioRegion::map(self.file.as_fd(), size, u64::from(bar) * page)
                .map_err(|source| SetupError::Map {
                    what: "uio map",
                    source,
                })?;
            debug!(uio = self.index, map = bar, size, "mapped uio region");
            self.extra[slot] = Some(region);
        }
        self.extra[slot]
            .as_ref()
            .ok_or_else(|| SetupError::NoBar { bar }.into())
    }
}

impl PlatformAccess for UioPlatform {
    fn kind(&self) -> BackendKind {
        BackendKind::Uio
    }

    fn bar_size(&self) -> usize {
        self.control.len()
    }

    fn read32(&self, offset: usize) -> u32 {
        self.control.read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        self.control.write32(offset, value)
    }

    fn read_bar32(&mut self, bar: u8, offset: usize) -> crate::Result<u32> {
        read_region(self.map(bar)?, offset)
    }

    fn bar_regions(&mut self) -> Vec<BarRegion> {
        (0..MAX_MAPS as u8)
            .filter_map(|i| {
                let size = discovery::uio_map_size(&self.sys, self.index, i)?;
                let mapped = i == 0 || self.extra[usize::from(i) - 1].is_some();
                Some(BarRegion {
                    index: i,
                    size: size as u64,
                    mapped,
                })
            })
            .collect()
    }

    fn alloc_dma(&mut self, size: usize) -> Result<DmaRegion, AllocationError> {
        DmaRegion::allocate(size, DmaPolicy::DEVICE)
    }

    fn resolve_dma_address(&mut self, region: &DmaRegion) -> Result<u64, AddressResolutionError> {
        pagemap::resolve(region.addr(), region.len())
    }
}
