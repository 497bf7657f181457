use t2t_common::CLOCK_HZ;

/// Frequency of the counter that stamps `ts_ingress` and `ts_decision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockRate {
    hz: u64,
}

impl ClockRate {
    /// The 300 MHz core clock of the shipped image.
    pub const DEVICE: Self = Self { hz: CLOCK_HZ };

    /// Returns `None` for a zero frequency.
    pub const fn from_hz(hz: u64) -> Option<Self> {
        if hz == 0 { None } else { Some(Self { hz }) }
    }

    /// Returns `None` for zero or for a rate beyond `u64::MAX` hertz.
    pub const fn from_mhz(mhz: u64) -> Option<Self> {
        match mhz.checked_mul(1_000_000) {
            Some(hz) => Self::from_hz(hz),
            None => None,
        }
    }

    pub const fn hz(self) -> u64 {
        self.hz
    }

    /// Converts a cycle count to nanoseconds, rounding to nearest.
    ///
    /// The intermediate product is computed in 128 bits so the full range of
    /// a 64-bit counter converts without overflow.
    pub fn cycles_to_ns(self, cycles: u64) -> u64 {
        let hz = u128::from(self.hz);
        let ns = (u128::from(cycles) * 1_000_000_000 + hz / 2) / hz;
        u64::try_from(ns).unwrap_or(u64::MAX)
    }

    /// Nanoseconds per cycle as a float, for display.
    pub fn period_ns(self) -> f64 {
        1e9 / self.hz as f64
    }
}

impl Default for ClockRate {
    fn default() -> Self {
        Self::DEVICE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_clock_converts_300_cycles_to_one_microsecond() {
        assert_eq!(ClockRate::DEVICE.cycles_to_ns(300), 1000);
    }

    #[test]
    fn zero_frequency_is_rejected() {
        assert!(ClockRate::from_hz(0).is_none());
        assert_eq!(ClockRate::from_mhz(250).map(ClockRate::hz), Some(250_000_000));
    }

    #[test]
    fn absurd_megahertz_is_rejected() {
        assert!(ClockRate::from_mhz(u64::MAX).is_none());
        assert!(ClockRate::from_mhz(u64::MAX / 1_000_000 + 1).is_none());
        assert!(ClockRate::from_mhz(u64::MAX / 1_000_000).is_some());
    }

    #[test]
    fn conversion_does_not_overflow_at_counter_limit() {
        let clk = ClockRate::from_hz(1_000_000_000).unwrap();
        assert_eq!(clk.cycles_to_ns(u64::MAX), u64::MAX);
    }
}
