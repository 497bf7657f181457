use crate::stats::LatencyStats;
use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use std::fs;
use std::path::Path;
use std::time::Instant;
use t2t_common::RECORD_SIZE;
use t2t_core::clock::ClockRate;
use t2t_core::record::{DecisionRecord, RejectReason};

/// Per-chunk tallies, folded in parallel and merged.
#[derive(Debug, Clone, Default)]
pub struct DumpSummary {
    pub latency: LatencyStats,
    pub reasons: [u64; RejectReason::ALL.len()],
    pub stale: u64,
}

impl DumpSummary {
    fn add(mut self, rec: &DecisionRecord, clock: ClockRate) -> Self {
        self.latency.record(rec, clock);
        for reason in rec.rejection_reasons() {
            if let Some(i) = RejectReason::ALL.iter().position(|&(_, r)| r == reason) {
                self.reasons[i] += 1;
            }
        }
        if rec.stale() {
            self.stale += 1;
        }
        self
    }

    fn merge(mut self, other: DumpSummary) -> Self {
        self.latency = self.latency.merge(other.latency);
        for (a, b) in self.reasons.iter_mut().zip(other.reasons) {
            *a += b;
        }
        self.stale += other.stale;
        self
    }
}

/// Summarizes a buffer of raw 64-byte records.
pub fn summarize(bytes: &[u8], clock: ClockRate) -> DumpSummary {
    bytes
        .par_chunks_exact(RECORD_SIZE)
        .filter_map(|chunk| DecisionRecord::from_bytes(chunk).ok())
        .fold(DumpSummary::default, |acc, rec| acc.add(&rec, clock))
        .reduce(DumpSummary::default, DumpSummary::merge)
}

/// Offline analysis of a binary dump written by `t2t dump --format binary`.
pub fn run_analysis(path: &Path, clock_mhz: u64) -> Result<()> {
    let Some(clock) = ClockRate::from_mhz(clock_mhz) else {
        bail!("clock rate must be positive");
    };

    println!("Loading records from {}...", path.display());
    let start_load = Instant::now();
    let bytes = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let trailing = bytes.len() % RECORD_SIZE;
    if trailing != 0 {
        tracing::warn!(trailing, "dump ends with a partial record, ignoring it");
    }
    println!(
        "Loaded {} records in {:?}.",
        bytes.len() / RECORD_SIZE,
        start_load.elapsed()
    );

    println!("Analyzing (parallel)...");
    let start = Instant::now();
    let mut summary = summarize(&bytes, clock);
    let elapsed = start.elapsed();
    println!(
        "Analyzed {} records in {:?} ({:.0} records/s)",
        summary.latency.count,
        elapsed,
        summary.latency.count as f64 / elapsed.as_secs_f64().max(1e-9)
    );

    summary.latency.print_report();
    println!("\nRejections by reason");
    for (&(_, reason), count) in RejectReason::ALL.iter().zip(summary.reasons) {
        println!("  {:<14} {}", reason.as_str(), count);
    }
    println!("  {:<14} {}", "stale", summary.stale);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use t2t_core::record::flags;

    #[test]
    fn summary_counts_every_record_once() {
        let mut bytes = Vec::new();
        for i in 0..1_000u32 {
            let rec = DecisionRecord {
                seq: i,
                ts_ingress: 100,
                ts_decision: 100 + u64::from(i % 10) * 3,
                flags: if i % 4 == 0 { flags::TOKEN_BUCKET } else { flags::ACCEPTED },
                ..Default::default()
            };
            bytes.extend_from_slice(rec.as_bytes());
        }
        bytes.extend_from_slice(&[0u8; 10]);

        let summary = summarize(&bytes, ClockRate::DEVICE);
        assert_eq!(summary.latency.count, 1_000);
        assert_eq!(summary.latency.accepted, 750);
        assert_eq!(summary.latency.max, 90);
        assert_eq!(summary.reasons.iter().sum::<u64>(), 250);
    }

    #[test]
    fn saturated_latencies_do_not_overflow_the_totals() {
        let rec = DecisionRecord {
            ts_ingress: 0,
            ts_decision: u64::MAX,
            flags: flags::ACCEPTED,
            ..Default::default()
        };
        let mut bytes = Vec::new();
        bytes.extend_from_slice(rec.as_bytes());
        bytes.extend_from_slice(rec.as_bytes());

        let summary = summarize(&bytes, ClockRate::DEVICE);
        assert_eq!(summary.latency.count, 2);
        assert_eq!(summary.latency.max, u64::MAX);
        assert_eq!(summary.latency.sum, 2 * u128::from(u64::MAX));
        assert!(summary.latency.avg() > 1e19);
    }
}
