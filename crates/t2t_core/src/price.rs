use core::fmt;
use core::str::FromStr;
use t2t_common::PRICE_SCALE;

/// Converts a raw fixed-point price to its decimal value.
pub fn to_decimal(raw: u32) -> f64 {
    f64::from(raw) / f64::from(PRICE_SCALE)
}

/// Converts a decimal price to fixed point, rounding half up.
///
/// Returns `None` for negative, non-finite, or out-of-range values.
pub fn from_decimal(value: f64) -> Option<u32> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let scaled = (value * f64::from(PRICE_SCALE) + 0.5).floor();
    if scaled > f64::from(u32::MAX) {
        return None;
    }
    Some(scaled as u32)
}

/// A fixed-point price with four implied decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FixedPrice(u32);

impl FixedPrice {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn from_decimal(value: f64) -> Option<Self> {
        from_decimal(value).map(Self)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn to_decimal(self) -> f64 {
        to_decimal(self.0)
    }
}

impl fmt::Display for FixedPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:04}", self.0 / PRICE_SCALE, self.0 % PRICE_SCALE)
    }
}

/// Error returned when a price string cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid price {0:?}")]
pub struct ParsePriceError(pub String);

impl FromStr for FixedPrice {
    type Err = ParsePriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<f64>()
            .ok()
            .and_then(FixedPrice::from_decimal)
            .ok_or_else(|| ParsePriceError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn display_pads_fraction() {
        assert_eq!(FixedPrice::from_raw(1_502_500).to_string(), "150.2500");
        assert_eq!(FixedPrice::from_raw(5).to_string(), "0.0005");
    }

    #[test]
    fn rounds_half_up() {
        assert_eq!(from_decimal(150.25), Some(1_502_500));
        assert_eq!(from_decimal(0.00005), Some(1));
        assert_eq!(from_decimal(0.00004), Some(0));
    }

    #[test]
    fn rejects_unrepresentable_values() {
        assert_eq!(from_decimal(-1.0), None);
        assert_eq!(from_decimal(f64::NAN), None);
        assert_eq!(from_decimal(1e12), None);
        assert!("abc".parse::<FixedPrice>().is_err());
    }

    #[test]
    fn decimal_round_trip_recovers_nearest_tick() {
        let mut rng = rand::thread_rng();
        for _ in 0..10_000 {
            let cents: u64 = rng.gen_range(1..=10_000_000);
            let x = cents as f64 / 100.0;
            let back = to_decimal(from_decimal(x).unwrap());
            assert!((back - x).abs() < 0.00005, "{x} -> {back}");
        }
    }

    #[test]
    fn parses_text_prices() {
        let p: FixedPrice = " 185.5 ".parse().unwrap();
        assert_eq!(p.raw(), 1_855_000);
    }
}
