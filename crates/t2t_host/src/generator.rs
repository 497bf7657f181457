//! Sample tables and synthetic decision records.
//!
//! Writes starter symbol, price and configuration files for a fresh
//! deployment, and produces plausible decision records for the simulated
//! backend so the monitoring commands have traffic to show without a feed.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::Path;
use t2t_core::config::DeviceConfig;
use t2t_core::price::FixedPrice;
use t2t_core::record::{DecisionRecord, flags};
use t2t_io::{PriceEntry, SymbolEntry, loader};

/// Large-cap NASDAQ tickers, in symbol-table order.
pub const SAMPLE_SYMBOLS: [&str; 32] = [
    "AAPL", "MSFT", "AMZN", "GOOGL", "GOOG", "META", "NVDA", "TSLA", "AVGO", "COST", "PEP", "CSCO",
    "ADBE", "CMCSA", "TXN", "NFLX", "QCOM", "INTC", "HON", "AMD", "INTU", "AMAT", "SBUX", "ISRG",
    "BKNG", "MDLZ", "ADP", "GILD", "LRCX", "ADI", "REGN", "VRTX",
];

/// Reference prices of the first ten sample symbols, scale 10^4.
const SAMPLE_PRICES: [(u16, u32); 10] = [
    (0, 1_955_000),
    (1, 4_250_000),
    (2, 1_852_500),
    (3, 1_750_000),
    (4, 1_765_000),
    (5, 5_100_000),
    (6, 8_750_000),
    (7, 2_500_000),
    (8, 1_650_000),
    (9, 8_900_000),
];

pub fn sample_symbols() -> Vec<SymbolEntry> {
    SAMPLE_SYMBOLS
        .iter()
        .zip(0u16..)
        .map(|(name, index)| SymbolEntry {
            name: (*name).to_owned(),
            index,
        })
        .collect()
}

pub fn sample_prices() -> Vec<PriceEntry> {
    SAMPLE_PRICES
        .iter()
        .map(|&(index, raw)| PriceEntry {
            index,
            price: FixedPrice::from_raw(raw),
        })
        .collect()
}

pub fn write_sample_symbols(path: &Path) -> Result<()> {
    let entries = sample_symbols();
    loader::write_symbols_file(path, &entries)?;
    println!("Generated {} with {} symbols", path.display(), entries.len());
    Ok(())
}

pub fn write_sample_prices(path: &Path) -> Result<()> {
    let entries = sample_prices();
    loader::write_prices_file(path, &entries)?;
    println!("Generated {} with {} reference prices", path.display(), entries.len());
    Ok(())
}

/// Writes the default configuration as TOML, ready to edit and `apply`.
pub fn write_sample_config(path: &Path) -> Result<()> {
    let text = toml::to_string_pretty(&DeviceConfig::default())
        .context("cannot serialize default configuration")?;
    fs::write(path, text).with_context(|| format!("cannot write {}", path.display()))?;
    println!("Generated {} with default configuration", path.display());
    Ok(())
}

/// Produces decision records resembling live traffic.
///
/// Latencies are drawn between `min_cycles` and `max_cycles`; about one in
/// twenty decisions is rejected with a random risk reason, and one in a
/// thousand carries inverted timestamps.
pub struct SyntheticFeed {
    rng: StdRng,
    seq: u32,
    clock_cycles: u64,
    min_cycles: u64,
    max_cycles: u64,
}

impl SyntheticFeed {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seq: 1,
            clock_cycles: 0,
            min_cycles: 20,
            max_cycles: 120,
        }
    }

    pub fn next_record(&mut self) -> DecisionRecord {
        let rng = &mut self.rng;
        let symbol_idx = rng.gen_range(0..SAMPLE_SYMBOLS.len() as u16);
        let ref_price = SAMPLE_PRICES
            .get(usize::from(symbol_idx))
            .map_or(1_000_000, |&(_, p)| p);
        let offset = rng.gen_range(-500i64..=500);
        let price = (i64::from(ref_price) + offset * 10).max(1) as u32;

        let mut flags_byte = flags::ACCEPTED;
        if rng.gen_ratio(1, 20) {
            let reason = [flags::PRICE_BAND, flags::TOKEN_BUCKET, flags::POSITION];
            flags_byte = reason[rng.gen_range(0..reason.len())];
        }
        if rng.gen_ratio(1, 500) {
            flags_byte |= flags::STALE;
        }

        self.clock_cycles += rng.gen_range(300..3_000);
        let ts_ingress = self.clock_cycles;
        let latency = rng.gen_range(self.min_cycles..=self.max_cycles);
        let ts_decision = if rng.gen_ratio(1, 1000) {
            ts_ingress.saturating_sub(latency)
        } else {
            ts_ingress + latency
        };

        let rec = DecisionRecord {
            seq: self.seq,
            ts_ingress,
            ts_decision,
            symbol_idx,
            side: rng.gen_range(0..2),
            flags: flags_byte,
            quantity: rng.gen_range(1..=10) * 100,
            price,
            ref_price,
            feature0: rng.gen_range(1..50),
            feature1: rng.gen_range(-1000..=1000),
            ..Default::default()
        };
        self.seq = self.seq.wrapping_add(1);
        rec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_tables_fit_the_device() {
        assert!(sample_symbols().iter().all(|e| e.name.len() <= 8));
        assert_eq!(sample_symbols()[31].index, 31);
        assert_eq!(sample_prices()[0].price.to_string(), "195.5000");
    }

    #[test]
    fn synthetic_records_are_sequenced_and_mostly_accepted() {
        let mut feed = SyntheticFeed::new(7);
        let records: Vec<_> = (0..10_000).map(|_| feed.next_record()).collect();
        assert!(records.windows(2).all(|w| w[1].seq == w[0].seq + 1));
        let accepted = records.iter().filter(|r| r.accepted()).count();
        assert!(accepted > 9_000, "{accepted}");
        assert!(records.iter().all(|r| r.latency_cycles() <= 120));
        assert!(records.iter().all(|r| usize::from(r.symbol_idx) < SAMPLE_SYMBOLS.len()));
    }

    #[test]
    fn sample_config_parses_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t2t.toml");
        write_sample_config(&path).unwrap();
        let cfg: DeviceConfig = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(cfg, DeviceConfig::default());
    }
}
