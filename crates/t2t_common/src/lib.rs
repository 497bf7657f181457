//! Hardware contract shared by every crate that talks to the T2T accelerator.
//!
//! This crate holds the control/status register map, control-bit layout,
//! symbol-table commands, and the sizing constants of the DMA ring. The values
//! must match the FPGA's register package; nothing here performs I/O.

#![no_std]

/// Control/status register offsets within BAR0.
///
/// All registers are 32 bits wide and naturally aligned. Offsets are byte
/// offsets from the start of the mapped control region.
pub mod csr {
    /// Build identifier. The upper 16 bits read `0x5432` ("T2") on a valid image.
    pub const BUILD_ID: usize = 0x000;

    /// Control bit field. See [`crate::ctrl`] for the bit assignments.
    ///
    /// Writing this register is what starts side effects inside the device, so
    /// it is always programmed after every parameter it depends on.
    pub const CTRL: usize = 0x004;

    /// Price band in basis points around the reference price (low 16 bits).
    pub const PRICE_BAND_BPS: usize = 0x008;

    /// Token bucket: low 16 bits are the refill rate, high 16 bits the burst size.
    pub const TOKEN_RATE: usize = 0x00C;

    /// Signed 32-bit absolute position limit.
    pub const POSITION_LIMIT: usize = 0x010;

    /// Staleness timeout in microseconds.
    pub const STALE_USEC: usize = 0x014;

    /// Sequence-gap threshold before records are marked stale.
    pub const SEQ_GAP_THR: usize = 0x018;

    /// Kill switch. Bit 0 halts decision output regardless of the enable bit.
    pub const KILL: usize = 0x01C;

    /// Symbol-table staging window: low word of the 8-byte key.
    pub const SYMTAB_KEY_LO: usize = 0x020;

    /// Symbol-table staging window: high word of the 8-byte key.
    pub const SYMTAB_KEY_HI: usize = 0x024;

    /// Symbol-table staging window: 10-bit table index.
    pub const SYMTAB_INDEX: usize = 0x028;

    /// Symbol-table command register. See [`crate::symtab`].
    pub const SYMTAB_COMMIT: usize = 0x040;

    /// First sequence number the decoder expects.
    pub const EXPECTED_SEQ: usize = 0x050;

    /// Expected UDP destination port (low 16 bits).
    pub const EXPECTED_PORT: usize = 0x054;

    /// Multicast MAC, low 32 bits.
    pub const MCAST_MAC_LO: usize = 0x058;

    /// Multicast MAC, high 16 bits.
    pub const MCAST_MAC_HI: usize = 0x05C;

    /// Reference-price table address (symbol index).
    pub const REF_PRICE_ADDR: usize = 0x060;

    /// Reference-price table data. Writing this register commits the entry
    /// addressed by [`REF_PRICE_ADDR`].
    pub const REF_PRICE_DATA: usize = 0x064;

    /// First of [`crate::LAT_HIST_BINS`] consecutive latency histogram bins.
    pub const LAT_HIST_BASE: usize = 0x100;

    /// Packets dropped at the MAC.
    pub const DROPS: usize = 0x180;
    /// Frames with a bad CRC.
    pub const CRC_BAD: usize = 0x184;
    /// Sequence gaps observed by the decoder.
    pub const SEQ_GAPS: usize = 0x188;
    /// Decisions accepted by the risk gate.
    pub const ACCEPTS: usize = 0x18C;
    /// Decisions blocked by the risk gate.
    pub const BLOCKS: usize = 0x190;
    /// Packets received.
    pub const RX_PACKETS: usize = 0x194;
    /// Bytes received.
    pub const RX_BYTES: usize = 0x198;
    /// Packets the parser accepted.
    pub const PARSED_PACKETS: usize = 0x19C;
    /// Market-data messages decoded.
    pub const MESSAGES: usize = 0x1A0;
    /// Order-book updates applied.
    pub const BOOK_UPDATES: usize = 0x1A4;
    /// Order-book memory bank conflicts.
    pub const BANK_CONFLICTS: usize = 0x1A8;
    /// Records written to the DMA ring.
    pub const DMA_RECORDS: usize = 0x1AC;
    /// Records dropped because the DMA ring was full.
    pub const DMA_DROPS: usize = 0x1B0;

    /// DMA ring bus address, low 32 bits.
    pub const RING_BASE_LO: usize = 0x300;
    /// DMA ring bus address, high 32 bits.
    pub const RING_BASE_HI: usize = 0x304;
    /// DMA ring depth in records.
    pub const RING_LEN: usize = 0x308;

    /// Hardware producer index (read-only to software, low 16 bits).
    pub const PROD_IDX: usize = 0x320;

    /// Consumer index published by software so hardware can reclaim slots.
    pub const CONS_IDX_SHADOW: usize = 0x324;

    /// Interrupt coalescing threshold (low 16 bits).
    pub const MSIX_CFG: usize = 0x328;
}

/// Bit assignments of [`csr::CTRL`].
pub mod ctrl {
    /// Start the decision pipeline.
    pub const ENABLE: u32 = 1 << 0;
    /// Accept frames regardless of destination MAC.
    pub const PROMISCUOUS: u32 = 1 << 1;
    /// Accept frames addressed to the configured multicast MAC.
    pub const MCAST_ENABLE: u32 = 1 << 2;
    /// Drop frames whose IPv4 header checksum is wrong.
    pub const CHECK_IP_CSUM: u32 = 1 << 3;
    /// Enforce the expected sequence number.
    pub const SEQ_CHECK_EN: u32 = 1 << 4;
    /// Raise MSI-X interrupts once the coalescing threshold is reached.
    pub const MSIX_ENABLE: u32 = 1 << 5;
}

/// Commands accepted by [`csr::SYMTAB_COMMIT`].
pub mod symtab {
    /// Copy the key/index window into the shadow table.
    pub const STAGE: u32 = 1;
    /// Swap the shadow table into the active table in one step.
    pub const COMMIT: u32 = 2;
}

/// PCI vendor id of the board (Intel FPGA).
pub const VENDOR_ID: u16 = 0x1172;

/// PCI device id of the T2T image.
pub const DEVICE_ID: u16 = 0x0001;

/// Size of the control register BAR.
pub const BAR0_SIZE: usize = 4096;

/// Expected value of the upper half of [`csr::BUILD_ID`].
pub const BUILD_ID_MAGIC: u32 = 0x5432;

/// Core clock of the timestamp counters, in hertz.
pub const CLOCK_HZ: u64 = 300_000_000;

/// Size of one decision record in the DMA ring.
pub const RECORD_SIZE: usize = 64;

/// Default ring depth. Producer and consumer indices are 16 bits wide, so
/// this is also the largest depth the device supports.
pub const RING_ENTRIES: usize = 65_536;

/// Number of entries in the on-device symbol table.
pub const SYMBOL_TABLE_SIZE: usize = 1024;

/// Width of a symbol key in bytes.
pub const SYMBOL_KEY_LEN: usize = 8;

/// Number of latency histogram bins.
pub const LAT_HIST_BINS: usize = 256;

/// Clock cycles covered by one latency histogram bin.
pub const LAT_HIST_BIN_CYCLES: u64 = 4;

/// Fixed-point scale of every price field (one unit is 0.0001).
pub const PRICE_SCALE: u32 = 10_000;

/// Huge page size used for DMA allocations.
pub const HUGEPAGE_SIZE: usize = 2 * 1024 * 1024;
