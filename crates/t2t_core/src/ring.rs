use crate::ProtocolViolation;
use t2t_common::{RECORD_SIZE, RING_ENTRIES};

/// Depth and mask of a DMA ring.
///
/// Indices are the 16-bit values exchanged with hardware through PROD_IDX and
/// CONS_IDX_SHADOW; they are always kept reduced modulo the depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGeometry {
    depth: u32,
    mask: u32,
}

impl RingGeometry {
    pub const MIN_DEPTH: usize = 2;
    pub const MAX_DEPTH: usize = RING_ENTRIES;

    pub fn new(depth: usize) -> Result<Self, ProtocolViolation> {
        if !(Self::MIN_DEPTH..=Self::MAX_DEPTH).contains(&depth) || !depth.is_power_of_two() {
            return Err(ProtocolViolation::InvalidRingDepth { depth });
        }
        let depth = depth as u32;
        Ok(Self {
            depth,
            mask: depth - 1,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth as usize
    }

    /// Size of the ring in bytes.
    pub fn bytes(&self) -> usize {
        self.depth() * RECORD_SIZE
    }

    /// Reduces a raw register value to a ring index.
    pub fn index(&self, raw: u32) -> u16 {
        (raw & self.mask) as u16
    }

    /// Slot position of `index` in the ring.
    pub fn slot(&self, index: u16) -> usize {
        (u32::from(index) & self.mask) as usize
    }

    pub fn advance(&self, index: u16) -> u16 {
        self.advance_by(index, 1)
    }

    pub fn advance_by(&self, index: u16, n: usize) -> u16 {
        ((u32::from(index) as usize).wrapping_add(n) as u32 & self.mask) as u16
    }

    /// Records between `consumer` and `producer`, walking forward.
    pub fn pending(&self, producer: u16, consumer: u16) -> usize {
        (u32::from(producer).wrapping_sub(u32::from(consumer)) & self.mask) as usize
    }

    pub fn is_empty(&self, producer: u16, consumer: u16) -> bool {
        self.index(u32::from(producer)) == self.index(u32::from(consumer))
    }

    /// One slot is always left free, so a full ring holds `depth - 1` records.
    pub fn is_full(&self, producer: u16, consumer: u16) -> bool {
        self.advance(producer) == self.index(u32::from(consumer))
    }

    /// Maximum number of records the ring can hold at once.
    pub fn capacity(&self) -> usize {
        self.depth() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_must_be_power_of_two_in_range() {
        assert!(RingGeometry::new(0).is_err());
        assert!(RingGeometry::new(1).is_err());
        assert!(RingGeometry::new(100).is_err());
        assert!(RingGeometry::new(131_072).is_err());
        assert!(RingGeometry::new(2).is_ok());
        assert_eq!(RingGeometry::new(65_536).map(|g| g.bytes()), Ok(4 * 1024 * 1024));
    }

    #[test]
    fn indices_wrap_at_depth() {
        let g = RingGeometry::new(8).unwrap();
        assert_eq!(g.advance(7), 0);
        assert_eq!(g.advance_by(6, 5), 3);
        assert_eq!(g.pending(2, 6), 4);
        assert_eq!(g.pending(6, 6), 0);
    }

    #[test]
    fn full_depth_ring_uses_whole_u16_range() {
        let g = RingGeometry::new(65_536).unwrap();
        assert_eq!(g.advance(u16::MAX), 0);
        assert_eq!(g.pending(1, u16::MAX), 2);
        assert!(g.is_full(u16::MAX - 1, u16::MAX));
    }

    #[test]
    fn full_and_empty_are_exclusive() {
        let g = RingGeometry::new(4).unwrap();
        assert!(g.is_empty(1, 1));
        assert!(!g.is_full(1, 1));
        assert!(g.is_full(0, 1));
        assert_eq!(g.pending(0, 1), g.capacity());
    }
}
