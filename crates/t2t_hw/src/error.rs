use std::io;
use std::path::PathBuf;
use t2t_core::{FormatError, ProtocolViolation};
use thiserror::Error;

/// The device could not be opened. No handle is produced.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(
        "no T2T device found: {what} (is the uio driver loaded, or the device bound to vfio-pci?)"
    )]
    NoDevice { what: String },

    #[error("permission denied opening {}: run as root or grant access to the device node", path.display())]
    Permission { path: PathBuf, source: io::Error },

    #[error(
        "IOMMU setup failed: {reason} (is the IOMMU enabled and every device in the group bound to vfio-pci?)"
    )]
    Iommu { reason: String },

    #[error("cannot map {what}: {source}")]
    Map {
        what: &'static str,
        source: io::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("BAR{bar} is not available on this device")]
    NoBar { bar: u8 },
}

impl SetupError {
    /// Classifies a failure to open a device node or sysfs file.
    pub(crate) fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::PermissionDenied => SetupError::Permission { path, source },
            io::ErrorKind::NotFound => SetupError::NoDevice {
                what: format!("{} does not exist", path.display()),
            },
            _ => SetupError::Io { path, source },
        }
    }

    pub(crate) fn iommu(reason: impl Into<String>) -> Self {
        SetupError::Iommu {
            reason: reason.into(),
        }
    }
}

/// DMA memory could not be obtained even from ordinary pages.
#[derive(Debug, Error)]
#[error("cannot allocate {size} bytes of DMA memory: {source}")]
pub struct AllocationError {
    pub size: usize,
    pub source: io::Error,
}

/// The bus address of a DMA region could not be determined.
///
/// Never fatal: the ring is then programmed with base address 0.
#[derive(Debug, Error)]
pub enum AddressResolutionError {
    #[error("cannot read /proc/self/pagemap: {0}")]
    Pagemap(#[source] io::Error),

    #[error("page at {vaddr:#x} is not resident")]
    NotPresent { vaddr: usize },

    #[error("page frame numbers are hidden (CAP_SYS_ADMIN required)")]
    PfnHidden,

    #[error("DMA region is not physically contiguous at offset {offset:#x}")]
    NotContiguous { offset: usize },

    #[error("backend cannot translate DMA addresses")]
    Unsupported,
}

/// Errors returned by [`crate::DeviceHandle`] operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("DMA ring has not been initialized")]
    RingNotInitialized,

    #[error("DMA ring already has a consumer")]
    RingBusy,
}

pub type Result<T> = std::result::Result<T, DeviceError>;
