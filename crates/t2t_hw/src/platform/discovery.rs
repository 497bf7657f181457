//! PCI and UIO lookups in sysfs.
//!
//! Every function takes the sysfs mount point so tests can run against a
//! scratch directory tree.

use std::fs;
use std::path::{Path, PathBuf};
use t2t_common::{DEVICE_ID, VENDOR_ID};

pub const SYSFS: &str = "/sys";

/// Adds the default PCI domain to a short `bus:dev.fn` address.
pub fn normalize_bdf(bdf: &str) -> String {
    let bdf = bdf.trim();
    if bdf.matches(':').count() == 1 {
        format!("0000:{bdf}")
    } else {
        bdf.to_string()
    }
}

pub fn pci_device_dir(sys: &Path, bdf: &str) -> PathBuf {
    sys.join("bus/pci/devices").join(bdf)
}

fn read_hex(path: &Path) -> Option<u64> {
    let text = fs::read_to_string(path).ok()?;
    let text = text.trim();
    u64::from_str_radix(text.trim_start_matches("0x"), 16).ok()
}

/// First PCI function whose vendor/device ids match the T2T image.
pub fn find_first_bdf(sys: &Path) -> Option<String> {
    let mut names: Vec<String> = fs::read_dir(sys.join("bus/pci/devices"))
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();

    names.into_iter().find(|name| {
        let dir = pci_device_dir(sys, name);
        read_hex(&dir.join("vendor")) == Some(u64::from(VENDOR_ID))
            && read_hex(&dir.join("device")) == Some(u64::from(DEVICE_ID))
    })
}

/// Name of the kernel driver bound to `bdf`, if any.
pub fn bound_driver(sys: &Path, bdf: &str) -> Option<String> {
    let link = fs::read_link(pci_device_dir(sys, bdf).join("driver")).ok()?;
    Some(link.file_name()?.to_string_lossy().into_owned())
}

/// IOMMU group number of `bdf`.
pub fn iommu_group(sys: &Path, bdf: &str) -> Option<u32> {
    let link = fs::read_link(pci_device_dir(sys, bdf).join("iommu_group")).ok()?;
    link.file_name()?.to_str()?.parse().ok()
}

/// Index `N` of the `/sys/class/uio/uioN` entry that belongs to `bdf`.
pub fn find_uio(sys: &Path, bdf: &str) -> Option<u32> {
    let mut found: Vec<u32> = fs::read_dir(sys.join("class/uio"))
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let index: u32 = name.strip_prefix("uio")?.parse().ok()?;
            let resolved = fs::canonicalize(e.path().join("device")).ok()?;
            resolved.to_string_lossy().contains(bdf).then_some(index)
        })
        .collect();
    found.sort_unstable();
    found.first().copied()
}

/// Size of mapping `map` of `uioN`, from `maps/mapM/size`.
pub fn uio_map_size(sys: &Path, index: u32, map: u8) -> Option<usize> {
    let path = sys
        .join("class/uio")
        .join(format!("uio{index}"))
        .join(format!("maps/map{map}/size"));
    read_hex(&path).and_then(|s| usize::try_from(s).ok())
}
