//! Hardware-free logic for the T2T tick-to-trade accelerator.
//!
//! This crate holds everything about the device contract that can be reasoned
//! about without touching hardware: the 64-byte decision record, fixed-point
//! prices, clock conversion, configuration register encoding, symbol keys, and
//! the index arithmetic of the DMA ring. The driver crate builds on these
//! pieces; tests exercise them directly.

#[cfg(target_endian = "big")]
compile_error!("The T2T record and register layouts are little-endian only.");

/// Cycle-counter to wall-time conversion.
///
/// Hardware timestamps count cycles of the core clock. Latency figures are
/// derived by scaling cycle deltas by the clock period.
pub mod clock;

/// Device configuration and its register encoding.
///
/// `DeviceConfig` is the software view of every risk and control parameter.
/// The encoding functions turn a configuration into the ordered register
/// writes the device expects, and rebuild a configuration from register
/// values read back from hardware.
pub mod config;

/// Fixed-point price conversion.
///
/// Every price on the wire is an unsigned integer scaled by 10^4.
pub mod price;

/// Zero-copy view of the 64-byte decision record written by the FPGA.
///
/// The record layout is the binary contract with hardware. Accessors decode
/// risk flags, side, and latency without copying the underlying bytes.
pub mod record;

/// Index arithmetic for the DMA ring.
///
/// Ring depth is a power of two so slot positions are derived by masking.
/// Producer and consumer indices are compared modulo the depth.
pub mod ring;

/// Symbol keys for the on-device symbol table.
///
/// Symbols are stored as 8-byte space-padded keys split into two 32-bit
/// little-endian words.
pub mod symbol;

use thiserror::Error;

/// A memory region could not be viewed as a decision record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The region is shorter than one record.
    ///
    /// This is the only content-related failure: every 64-byte bit pattern is
    /// a structurally valid record.
    #[error("record region too short: {len} bytes, need 64")]
    TooShort { len: usize },

    /// The region does not start on a 64-byte boundary.
    ///
    /// Records in the DMA ring are always cache-line aligned. Unaligned
    /// sources, such as dump files, go through the copying decoder instead.
    #[error("record region at {addr:#x} is not 64-byte aligned")]
    Misaligned { addr: usize },
}

/// A request was rejected locally before reaching hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// Symbol and reference-price tables hold 1024 entries.
    #[error("symbol index {index} out of range (table holds 1024 entries)")]
    SymbolIndexOutOfRange { index: u16 },

    /// Ring depth must be a power of two between 2 and 65536.
    #[error("invalid ring depth {depth}: must be a power of two in 2..=65536")]
    InvalidRingDepth { depth: usize },

    /// The register offset lies outside the control BAR.
    #[error("register offset {offset:#x} outside the control region")]
    RegisterOutOfRange { offset: usize },

    /// Registers are 32-bit and must be accessed on 4-byte boundaries.
    #[error("register offset {offset:#x} is not 4-byte aligned")]
    UnalignedRegister { offset: usize },
}
