//! Userspace driver for the T2T tick-to-trade accelerator.
//!
//! The device is reached through PCIe BAR0 for control and through a
//! host-memory ring for decision records. This crate owns both: it maps the
//! registers, speaks the register protocol, and consumes the ring.

#[cfg(not(target_os = "linux"))]
compile_error!("t2t_hw requires Linux (UIO, VFIO and /proc/self/pagemap)");

/// Device handle and register protocol.
///
/// [`DeviceHandle`] is the only way to touch the device. It applies the
/// configuration in the order the hardware expects (CTRL last), stages and
/// commits symbol tables, programs reference prices, reads counters and the
/// latency histogram, and owns the DMA ring memory. Every register write is
/// followed by a store barrier so that writes reach the device in program
/// order.
pub mod device;

/// Error types for setup, allocation and protocol failures.
///
/// Setup errors carry enough context for an operator to fix the environment:
/// a missing driver, permissions, or an unviable IOMMU group.
pub mod error;

/// Operating-system backends: UIO, VFIO and the software model.
pub mod platform;

/// Consumer side of the decision-record ring.
///
/// Records are read in the order the device produced them. The producer
/// index is read with acquire semantics before any record it covers, and the
/// consumer index is published with release semantics after the records it
/// frees.
pub mod ring;

/// Cancellation flag for long-running polling loops.
pub mod shutdown;

pub use device::{
    BackendChoice, DeviceHandle, DeviceState, EnableGuard, LatencyHistogram, Statistics,
};
pub use error::{AddressResolutionError, AllocationError, DeviceError, Result, SetupError};
pub use platform::sim::{SimProducer, SimState};
pub use platform::{BackendKind, BarRegion, PlatformAccess};
pub use ring::DmaRing;
pub use shutdown::ShutdownToken;
