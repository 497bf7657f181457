use crate::FormatError;
use crate::clock::ClockRate;
use crate::price::FixedPrice;
use core::mem::{align_of, offset_of, size_of};
use t2t_common::RECORD_SIZE;

/// Bit assignments of [`DecisionRecord::flags`].
pub mod flags {
    /// The risk gate accepted the decision.
    pub const ACCEPTED: u8 = 1 << 0;
    /// The decision was taken on stale market data.
    pub const STALE: u8 = 1 << 1;
    /// Rejected by the price band around the reference price.
    pub const PRICE_BAND: u8 = 1 << 2;
    /// Rejected by the token bucket rate limiter.
    pub const TOKEN_BUCKET: u8 = 1 << 3;
    /// Rejected by the position limit.
    pub const POSITION: u8 = 1 << 4;
    /// Rejected because the kill switch was active.
    pub const KILL: u8 = 1 << 5;

    /// Mask of the four rejection-reason bits.
    pub const REASON_MASK: u8 = 0b0011_1100;
    pub const REASON_SHIFT: u32 = 2;
}

/// One trade decision as written by the FPGA into the DMA ring.
///
/// The layout is byte-for-byte the hardware layout. Every field is naturally
/// aligned at its offset, so `repr(C)` introduces no padding; the compile-time
/// assertions below pin each offset and the total size. The reserved words are
/// carried through untouched and may be populated by future hardware.
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecisionRecord {
    /// Sequence number from the market-data decoder.
    pub seq: u32,
    pub reserved0: u32,
    /// Cycle counter at packet ingress.
    pub ts_ingress: u64,
    /// Cycle counter at risk decision completion.
    pub ts_decision: u64,
    /// Index into the on-device symbol table.
    pub symbol_idx: u16,
    /// Raw side byte; see [`DecisionRecord::side`].
    pub side: u8,
    /// Risk flags; see [`flags`].
    pub flags: u8,
    pub quantity: u32,
    /// Fixed-point price, scale 10^4.
    pub price: u32,
    /// Reference mid-price at decision time, scale 10^4.
    pub ref_price: u32,
    /// Spread in basis points.
    pub feature0: u32,
    /// Order-book imbalance ratio.
    pub feature1: i32,
    pub feature2: u32,
    /// Advisory CRC-16; never validated by the codec.
    pub payload_crc16: u16,
    pub reserved1: [u8; 10],
}

const _: () = {
    assert!(size_of::<DecisionRecord>() == RECORD_SIZE);
    assert!(align_of::<DecisionRecord>() == RECORD_SIZE);
    assert!(offset_of!(DecisionRecord, seq) == 0);
    assert!(offset_of!(DecisionRecord, reserved0) == 4);
    assert!(offset_of!(DecisionRecord, ts_ingress) == 8);
    assert!(offset_of!(DecisionRecord, ts_decision) == 16);
    assert!(offset_of!(DecisionRecord, symbol_idx) == 24);
    assert!(offset_of!(DecisionRecord, side) == 26);
    assert!(offset_of!(DecisionRecord, flags) == 27);
    assert!(offset_of!(DecisionRecord, quantity) == 28);
    assert!(offset_of!(DecisionRecord, price) == 32);
    assert!(offset_of!(DecisionRecord, ref_price) == 36);
    assert!(offset_of!(DecisionRecord, feature0) == 40);
    assert!(offset_of!(DecisionRecord, feature1) == 44);
    assert!(offset_of!(DecisionRecord, feature2) == 48);
    assert!(offset_of!(DecisionRecord, payload_crc16) == 52);
    assert!(offset_of!(DecisionRecord, reserved1) == 54);
};

/// Order side of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
    /// A value the current image does not define.
    Other(u8),
}

impl From<u8> for Side {
    fn from(raw: u8) -> Self {
        match raw {
            0 => Side::Bid,
            1 => Side::Ask,
            other => Side::Other(other),
        }
    }
}

/// A risk check that blocked a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    PriceBand,
    TokenBucket,
    PositionLimit,
    KillSwitch,
}

impl RejectReason {
    /// Every reason with its flag bit, in bit order.
    pub const ALL: [(u8, RejectReason); 4] = [
        (flags::PRICE_BAND, RejectReason::PriceBand),
        (flags::TOKEN_BUCKET, RejectReason::TokenBucket),
        (flags::POSITION, RejectReason::PositionLimit),
        (flags::KILL, RejectReason::KillSwitch),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::PriceBand => "price_band",
            RejectReason::TokenBucket => "token_bucket",
            RejectReason::PositionLimit => "position_limit",
            RejectReason::KillSwitch => "kill_switch",
        }
    }
}

/// Iterator over the rejection bits set in a flags byte.
#[derive(Debug, Clone)]
pub struct RejectReasons {
    flags: u8,
    next: usize,
}

impl Iterator for RejectReasons {
    type Item = RejectReason;

    fn next(&mut self) -> Option<RejectReason> {
        while self.next < RejectReason::ALL.len() {
            let (bit, reason) = RejectReason::ALL[self.next];
            self.next += 1;
            if self.flags & bit != 0 {
                return Some(reason);
            }
        }
        None
    }
}

impl DecisionRecord {
    /// Views the first 64 bytes of `bytes` as a record without copying.
    ///
    /// Any bit pattern is a valid record. The region must be at least one
    /// record long and start on a 64-byte boundary.
    pub fn view(bytes: &[u8]) -> Result<&DecisionRecord, FormatError> {
        if bytes.len() < RECORD_SIZE {
            return Err(FormatError::TooShort { len: bytes.len() });
        }
        let addr = bytes.as_ptr() as usize;
        if addr % RECORD_SIZE != 0 {
            return Err(FormatError::Misaligned { addr });
        }
        // SAFETY: the region is long enough and suitably aligned, every field
        // is a plain integer so all bit patterns are valid, and the returned
        // reference borrows `bytes`.
        Ok(unsafe { &*bytes.as_ptr().cast::<DecisionRecord>() })
    }

    /// Decodes a record by copying from an arbitrarily aligned buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<DecisionRecord, FormatError> {
        if bytes.len() < RECORD_SIZE {
            return Err(FormatError::TooShort { len: bytes.len() });
        }
        // SAFETY: at least 64 readable bytes; read_unaligned tolerates any
        // alignment and every bit pattern is valid.
        Ok(unsafe { bytes.as_ptr().cast::<DecisionRecord>().read_unaligned() })
    }

    /// The raw 64 bytes of the record, in wire order.
    pub fn as_bytes(&self) -> &[u8; RECORD_SIZE] {
        // SAFETY: the struct is exactly 64 bytes with no padding.
        unsafe { &*(self as *const DecisionRecord).cast::<[u8; RECORD_SIZE]>() }
    }

    pub fn accepted(&self) -> bool {
        self.flags & flags::ACCEPTED != 0
    }

    pub fn stale(&self) -> bool {
        self.flags & flags::STALE != 0
    }

    /// The 4-bit rejection code in flag bits 2..=5. Zero means no rejection.
    pub fn rejection_reason(&self) -> u8 {
        (self.flags & flags::REASON_MASK) >> flags::REASON_SHIFT
    }

    /// The individual risk checks that fired for this record.
    pub fn rejection_reasons(&self) -> RejectReasons {
        RejectReasons {
            flags: self.flags,
            next: 0,
        }
    }

    pub fn side(&self) -> Side {
        Side::from(self.side)
    }

    pub fn price_as_decimal(&self) -> FixedPrice {
        FixedPrice::from_raw(self.price)
    }

    pub fn ref_price_as_decimal(&self) -> FixedPrice {
        FixedPrice::from_raw(self.ref_price)
    }

    /// True when the decision timestamp precedes the ingress timestamp.
    pub fn timestamps_inverted(&self) -> bool {
        self.ts_decision < self.ts_ingress
    }

    /// Cycles from ingress to decision, saturating at zero.
    pub fn latency_cycles(&self) -> u64 {
        self.ts_decision.saturating_sub(self.ts_ingress)
    }

    /// Tick-to-decision latency at the device clock.
    pub fn latency_ns(&self) -> u64 {
        self.latency_ns_at(ClockRate::DEVICE)
    }

    pub fn latency_ns_at(&self, clock: ClockRate) -> u64 {
        clock.cycles_to_ns(self.latency_cycles())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(64))]
    struct Aligned([u8; 128]);

    #[test]
    fn record_is_one_cache_line() {
        assert_eq!(size_of::<DecisionRecord>(), 64);
        assert_eq!(align_of::<DecisionRecord>(), 64);
    }

    #[test]
    fn view_reads_fields_at_hardware_offsets() {
        let mut buf = Aligned([0; 128]);
        buf.0[0..4].copy_from_slice(&42u32.to_le_bytes());
        buf.0[8..16].copy_from_slice(&1000u64.to_le_bytes());
        buf.0[16..24].copy_from_slice(&1300u64.to_le_bytes());
        buf.0[24..26].copy_from_slice(&17u16.to_le_bytes());
        buf.0[26] = 1;
        buf.0[27] = flags::ACCEPTED;
        buf.0[28..32].copy_from_slice(&100u32.to_le_bytes());
        buf.0[32..36].copy_from_slice(&1_502_500u32.to_le_bytes());
        buf.0[44..48].copy_from_slice(&(-7i32).to_le_bytes());
        buf.0[52..54].copy_from_slice(&0xBEEFu16.to_le_bytes());
        buf.0[63] = 0xAA;

        let rec = DecisionRecord::view(&buf.0).unwrap();
        assert_eq!(rec.seq, 42);
        assert_eq!(rec.symbol_idx, 17);
        assert_eq!(rec.side(), Side::Ask);
        assert!(rec.accepted());
        assert!(!rec.stale());
        assert_eq!(rec.quantity, 100);
        assert_eq!(rec.price_as_decimal().to_string(), "150.2500");
        assert_eq!(rec.feature1, -7);
        assert_eq!(rec.payload_crc16, 0xBEEF);
        assert_eq!(rec.reserved1[9], 0xAA);
        assert_eq!(rec.latency_ns(), 1000);
        assert_eq!(&rec.as_bytes()[..], &buf.0[..64]);
    }

    #[test]
    fn short_region_is_rejected() {
        let buf = Aligned([0; 128]);
        assert_eq!(
            DecisionRecord::view(&buf.0[..63]),
            Err(FormatError::TooShort { len: 63 })
        );
        assert!(DecisionRecord::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn misaligned_view_is_rejected_but_copy_succeeds() {
        let mut buf = Aligned([0; 128]);
        buf.0[1..5].copy_from_slice(&9u32.to_le_bytes());
        assert!(matches!(
            DecisionRecord::view(&buf.0[1..65]),
            Err(FormatError::Misaligned { .. })
        ));
        assert_eq!(DecisionRecord::from_bytes(&buf.0[1..65]).unwrap().seq, 9);
    }

    #[test]
    fn inverted_timestamps_saturate_to_zero() {
        let rec = DecisionRecord {
            ts_ingress: 500,
            ts_decision: 100,
            ..Default::default()
        };
        assert!(rec.timestamps_inverted());
        assert_eq!(rec.latency_cycles(), 0);
        assert_eq!(rec.latency_ns(), 0);
    }

    #[test]
    fn rejection_bits_decode_individually() {
        let rec = DecisionRecord {
            flags: flags::STALE | flags::PRICE_BAND | flags::KILL,
            ..Default::default()
        };
        assert_eq!(rec.rejection_reason(), 0b1001);
        let reasons: Vec<_> = rec.rejection_reasons().collect();
        assert_eq!(
            reasons,
            vec![RejectReason::PriceBand, RejectReason::KillSwitch]
        );
        assert!(rec.stale());
        assert!(!rec.accepted());
    }

    #[test]
    fn unknown_side_is_preserved() {
        assert_eq!(Side::from(0), Side::Bid);
        assert_eq!(Side::from(7), Side::Other(7));
    }
}
