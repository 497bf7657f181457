use super::discovery;
use super::dma::{DmaPolicy, DmaRegion};
use super::mmio::MmioRegion;
use super::{BackendKind, BarRegion, PlatformAccess, pagemap, read_region};
use crate::error::{AddressResolutionError, AllocationError, SetupError};
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io;
use std::mem::size_of;
use std::os::fd::{AsFd, AsRawFd, FromRawFd};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Linux VFIO ioctl numbers, `_IO(';', 100 + n)`.
mod ioctls {
    use libc::c_ulong;

    const fn io(nr: u8) -> c_ulong {
        ((b';' as c_ulong) << 8) | (100 + nr) as c_ulong
    }

    pub const GET_API_VERSION: c_ulong = io(0);
    pub const CHECK_EXTENSION: c_ulong = io(1);
    pub const SET_IOMMU: c_ulong = io(2);
    pub const GROUP_GET_STATUS: c_ulong = io(3);
    pub const GROUP_SET_CONTAINER: c_ulong = io(4);
    pub const GROUP_GET_DEVICE_FD: c_ulong = io(6);
    pub const DEVICE_GET_INFO: c_ulong = io(7);
    pub const DEVICE_GET_REGION_INFO: c_ulong = io(8);
    pub const IOMMU_MAP_DMA: c_ulong = io(13);
    pub const IOMMU_UNMAP_DMA: c_ulong = io(14);

    pub const API_VERSION: i32 = 0;
    pub const TYPE1_IOMMU: libc::c_ulong = 1;
    pub const GROUP_FLAGS_VIABLE: u32 = 1 << 0;
    pub const REGION_INFO_FLAG_MMAP: u32 = 1 << 2;
    pub const DMA_MAP_FLAG_READ: u32 = 1 << 0;
    pub const DMA_MAP_FLAG_WRITE: u32 = 1 << 1;
}

#[repr(C)]
#[derive(Debug, Default)]
struct GroupStatus {
    argsz: u32,
    flags: u32,
}

#[repr(C)]
#[derive(Debug, Default)]
struct DeviceInfo {
    argsz: u32,
    flags: u32,
    num_regions: u32,
    num_irqs: u32,
}

#[repr(C)]
#[derive(Debug, Default)]
struct RegionInfo {
    argsz: u32,
    flags: u32,
    index: u32,
    cap_offset: u32,
    size: u64,
    offset: u64,
}

#[repr(C)]
#[derive(Debug, Default)]
struct DmaMap {
    argsz: u32,
    flags: u32,
    vaddr: u64,
    iova: u64,
    size: u64,
}

#[repr(C)]
#[derive(Debug, Default)]
struct DmaUnmap {
    argsz: u32,
    flags: u32,
    iova: u64,
    size: u64,
}

/// PCI BARs are regions 0 through 5 of a vfio-pci device.
const MAX_BARS: usize = 6;

/// First IOVA handed out for DMA mappings.
const IOVA_BASE: u64 = 0x1_0000_0000;

#[derive(Debug, Clone, Copy)]
struct IommuMapping {
    vaddr: usize,
    iova: u64,
    size: u64,
}

/// Backend for a device bound to `vfio-pci`.
///
/// Fields are declared in reverse acquisition order so that BAR mappings are
/// released before the device descriptor, the device before its group, and
/// the group before the container.
pub struct VfioPlatform {
    bars: [Option<MmioRegion>; MAX_BARS],
    mappings: Vec<IommuMapping>,
    next_iova: u64,
    num_regions: u32,
    device: File,
    _group: File,
    container: File,
}

fn last_error(step: &str) -> SetupError {
    SetupError::iommu(format!("{step}: {}", io::Error::last_os_error()))
}

fn open_rw(path: &Path) -> Result<File, SetupError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| SetupError::open(path, e))
}

impl VfioPlatform {
    pub fn open(bdf: &str) -> Result<Self, SetupError> {
        let sys = Path::new(discovery::SYSFS);
        let group_id = discovery::iommu_group(sys, bdf).ok_or_else(|| {
            SetupError::iommu(format!("{bdf} has no IOMMU group (is the IOMMU enabled?)"))
        })?;
        info!(bdf, group = group_id, "opening VFIO device");

        let container = open_rw(Path::new("/dev/vfio/vfio"))?;

        // SAFETY: container is an open VFIO container; the ioctl takes no argument.
        let version = unsafe { libc::ioctl(container.as_raw_fd(), ioctls::GET_API_VERSION as _) };
        if version != ioctls::API_VERSION {
            return Err(SetupError::iommu(format!(
                "unsupported VFIO API version {version}"
            )));
        }

        // SAFETY: the extension id is passed by value.
        let type1 = unsafe {
            libc::ioctl(
                container.as_raw_fd(),
                ioctls::CHECK_EXTENSION as _,
                ioctls::TYPE1_IOMMU,
            )
        };
        if type1 != 1 {
            return Err(SetupError::iommu("type 1 IOMMU not supported"));
        }

        let group_path = PathBuf::from(format!("/dev/vfio/{group_id}"));
        let group = open_rw(&group_path)?;

        let mut status = GroupStatus {
            argsz: size_of::<GroupStatus>() as u32,
            flags: 0,
        };
        // SAFETY: status is a live repr(C) struct matching vfio_group_status.
        let ret = unsafe {
            libc::ioctl(
                group.as_raw_fd(),
                ioctls::GROUP_GET_STATUS as _,
                &raw mut status,
            )
        };
        if ret < 0 || status.flags & ioctls::GROUP_FLAGS_VIABLE == 0 {
            return Err(SetupError::iommu(format!(
                "group {group_id} not viable, bind every device in it to vfio-pci"
            )));
        }

        let container_fd = container.as_raw_fd();
        // SAFETY: the kernel reads one int through the pointer.
        let ret = unsafe {
            libc::ioctl(
                group.as_raw_fd(),
                ioctls::GROUP_SET_CONTAINER as _,
                &raw const container_fd,
            )
        };
        if ret < 0 {
            return Err(last_error("attach group to container"));
        }

        // SAFETY: the IOMMU type is passed by value.
        let ret = unsafe {
            libc::ioctl(
                container.as_raw_fd(),
                ioctls::SET_IOMMU as _,
                ioctls::TYPE1_IOMMU,
            )
        };
        if ret < 0 {
            return Err(last_error("select type 1 IOMMU"));
        }

        let name = CString::new(bdf).map_err(|_| SetupError::NoDevice {
            what: format!("invalid PCI address {bdf:?}"),
        })?;
        // SAFETY: name is NUL-terminated and outlives the call.
        let device_fd = unsafe {
            libc::ioctl(
                group.as_raw_fd(),
                ioctls::GROUP_GET_DEVICE_FD as _,
                name.as_ptr(),
            )
        };
        if device_fd < 0 {
            return Err(last_error("get device descriptor"));
        }
        // SAFETY: device_fd is a fresh descriptor we now own.
        let device = unsafe { File::from_raw_fd(device_fd) };

        let mut dev_info = DeviceInfo {
            argsz: size_of::<DeviceInfo>() as u32,
            ..Default::default()
        };
        // SAFETY: dev_info matches vfio_device_info.
        let ret = unsafe {
            libc::ioctl(
                device.as_raw_fd(),
                ioctls::DEVICE_GET_INFO as _,
                &raw mut dev_info,
            )
        };
        if ret < 0 {
            return Err(last_error("query device info"));
        }
        debug!(
            regions = dev_info.num_regions,
            irqs = dev_info.num_irqs,
            "VFIO device info"
        );

        let mut platform = Self {
            bars: Default::default(),
            mappings: Vec::new(),
            next_iova: IOVA_BASE,
            num_regions: dev_info.num_regions,
            device,
            _group: group,
            container,
        };
        platform.map_bar(0)?;
        Ok(platform)
    }

    fn region_info(&self, index: u8) -> Option<RegionInfo> {
        if u32::from(index) >= self.num_regions {
            return None;
        }
        let mut info = RegionInfo {
            argsz: size_of::<RegionInfo>() as u32,
            index: u32::from(index),
            ..Default::default()
        };
        // SAFETY: info matches vfio_region_info.
        let ret = unsafe {
            libc::ioctl(
                self.device.as_raw_fd(),
                ioctls::DEVICE_GET_REGION_INFO as _,
                &raw mut info,
            )
        };
        (ret >= 0 && info.size > 0).then_some(info)
    }

    /// Maps BAR `index` on first use.
    pub fn map_bar(&mut self, index: u8) -> Result<&MmioRegion, SetupError> {
        let slot = usize::from(index);
        if slot >= MAX_BARS {
            return Err(SetupError::NoBar { bar: index });
        }
        if self.bars[slot].is_none() {
            let info = self
                .region_info(index)
                .ok_or(SetupError::NoBar { bar: index })?;
            if info.flags & ioctls::REGION_INFO_FLAG_MMAP == 0 {
                return Err(SetupError::NoBar { bar: index });
            }
            let size = usize::try_from(info.size).map_err(|_| SetupError::NoBar { bar: index })?;
            let region = MmioRegion::map(self.device.as_fd(), size, info.offset)
                .map_err(|source| SetupError::Map { what: "VFIO BAR", source })?;
            info!(bar = index, size, "mapped BAR");
            self.bars[slot] = Some(region);
        }
        self.bars[slot].as_ref().ok_or(SetupError::NoBar { bar: index })
    }

    fn control(&self) -> Option<&MmioRegion> {
        self.bars[0].as_ref()
    }

    fn iommu_map(&mut self, region: &DmaRegion) -> io::Result<u64> {
        let iova = self.next_iova;
        let map = DmaMap {
            argsz: size_of::<DmaMap>() as u32,
            flags: ioctls::DMA_MAP_FLAG_READ | ioctls::DMA_MAP_FLAG_WRITE,
            vaddr: region.addr() as u64,
            iova,
            size: region.len() as u64,
        };
        // SAFETY: map describes memory owned by `region` for its lifetime.
        let ret = unsafe {
            libc::ioctl(
                self.container.as_raw_fd(),
                ioctls::IOMMU_MAP_DMA as _,
                &raw const map,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        self.next_iova += map.size.next_multiple_of(t2t_common::HUGEPAGE_SIZE as u64);
        self.mappings.push(IommuMapping {
            vaddr: region.addr(),
            iova,
            size: map.size,
        });
        Ok(iova)
    }

    fn iommu_unmap(&self, mapping: IommuMapping) {
        let unmap = DmaUnmap {
            argsz: size_of::<DmaUnmap>() as u32,
            flags: 0,
            iova: mapping.iova,
            size: mapping.size,
        };
        // SAFETY: unmap names a mapping created by iommu_map.
        let ret = unsafe {
            libc::ioctl(
                self.container.as_raw_fd(),
                ioctls::IOMMU_UNMAP_DMA as _,
                &raw const unmap,
            )
        };
        if ret < 0 {
            warn!(iova = mapping.iova, error = %io::Error::last_os_error(), "IOMMU unmap failed");
        } else {
            debug!(iova = mapping.iova, size = mapping.size, "IOMMU unmapped");
        }
    }
}

impl PlatformAccess for VfioPlatform {
    fn kind(&self) -> BackendKind {
        BackendKind::Vfio
    }

    fn bar_size(&self) -> usize {
        self.control().map_or(0, MmioRegion::len)
    }

    fn read32(&self, offset: usize) -> u32 {
        self.control().map_or(u32::MAX, |r| r.read32(offset))
    }

    fn write32(&self, offset: usize, value: u32) {
        if let Some(r) = self.control() {
            r.write32(offset, value);
        }
    }

    fn read_bar32(&mut self, bar: u8, offset: usize) -> crate::Result<u32> {
        read_region(self.map_bar(bar)?, offset)
    }

    fn bar_regions(&mut self) -> Vec<BarRegion> {
        (0..MAX_BARS as u8)
            .filter_map(|i| {
                let info = self.region_info(i)?;
                Some(BarRegion {
                    index: i,
                    size: info.size,
                    mapped: self.bars[usize::from(i)].is_some(),
                })
            })
            .collect()
    }

    fn alloc_dma(&mut self, size: usize) -> Result<DmaRegion, AllocationError> {
        DmaRegion::allocate(size, DmaPolicy::DEVICE)
    }

    fn resolve_dma_address(&mut self, region: &DmaRegion) -> Result<u64, AddressResolutionError> {
        match self.iommu_map(region) {
            Ok(iova) => {
                info!(iova, size = region.len(), "IOMMU mapped DMA region");
                Ok(iova)
            }
            Err(e) => {
                warn!(error = %e, "IOMMU mapping failed, falling back to physical address");
                pagemap::resolve(region.addr(), region.len())
            }
        }
    }

    fn release_dma(&mut self, region: &DmaRegion) {
        let addr = region.addr();
        let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.mappings)
            .into_iter()
            .partition(|m| m.vaddr == addr);
        self.mappings = kept;
        for mapping in gone {
            self.iommu_unmap(mapping);
        }
    }
}

impl Drop for VfioPlatform {
    fn drop(&mut self) {
        for mapping in std::mem::take(&mut self.mappings) {
            self.iommu_unmap(mapping);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ioctl_numbers_match_kernel_headers() {
        assert_eq!(ioctls::GET_API_VERSION, 0x3B64);
        assert_eq!(ioctls::GROUP_GET_DEVICE_FD, 0x3B6A);
        assert_eq!(ioctls::IOMMU_MAP_DMA, 0x3B71);
        assert_eq!(ioctls::IOMMU_UNMAP_DMA, 0x3B72);
    }

    #[test]
    fn ioctl_structs_match_kernel_layout() {
        assert_eq!(size_of::<GroupStatus>(), 8);
        assert_eq!(size_of::<DeviceInfo>(), 16);
        assert_eq!(size_of::<RegionInfo>(), 32);
        assert_eq!(size_of::<DmaMap>(), 32);
        assert_eq!(size_of::<DmaUnmap>(), 24);
    }
}
