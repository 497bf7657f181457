//! Record capture to CSV or raw binary.
//!
//! CSV rows carry the decoded fields an analyst needs (prices as decimals,
//! side as B/S, latency in nanoseconds). Binary output is the 64-byte
//! hardware layout, record after record, readable by `t2t analyze`.

use anyhow::{Context, Result};
use clap::ValueEnum;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use t2t_core::clock::ClockRate;
use t2t_core::record::{DecisionRecord, Side};
use t2t_hw::{DmaRing, ShutdownToken};

pub const CSV_HEADER: &str =
    "seq,ts_ing,ts_dec,sym_idx,side,price,qty,ref_px,accepted,reason,latency_ns,spread,imbalance";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DumpFormat {
    Csv,
    Binary,
}

/// When a capture stops on its own. Both unset means until interrupted.
#[derive(Debug, Clone, Copy, Default)]
pub struct DumpLimits {
    pub count: Option<u64>,
    pub duration: Option<Duration>,
}

pub fn write_csv_row<W: Write>(out: &mut W, rec: &DecisionRecord, clock: ClockRate) -> io::Result<()> {
    let side = match rec.side() {
        Side::Bid => "B",
        Side::Ask => "S",
        Side::Other(_) => "?",
    };
    writeln!(
        out,
        "{},{},{},{},{},{},{},{},{},{},{},{},{}",
        rec.seq,
        rec.ts_ingress,
        rec.ts_decision,
        rec.symbol_idx,
        side,
        rec.price_as_decimal(),
        rec.quantity,
        rec.ref_price_as_decimal(),
        u8::from(rec.accepted()),
        rec.rejection_reason(),
        rec.latency_ns_at(clock),
        rec.feature0,
        rec.feature1
    )
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(p) if p != Path::new("-") => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("cannot create {}", p.display()))?,
        )),
        _ => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

/// Captures records from `ring` until a limit is hit or `shutdown` fires.
///
/// Exactly `limits.count` records are written when a count is given; the
/// remainder of the final batch is consumed but not written.
pub fn run_dump(
    ring: &mut DmaRing<'_>,
    output: Option<&Path>,
    format: DumpFormat,
    limits: DumpLimits,
    shutdown: &ShutdownToken,
    quiet: bool,
) -> Result<u64> {
    let mut out = open_output(output)?;
    if format == DumpFormat::Csv {
        writeln!(out, "{CSV_HEADER}")?;
    }
    if !quiet {
        eprintln!("Capturing records (Ctrl+C to stop)...");
    }

    let clock = ClockRate::DEVICE;
    let start = Instant::now();
    let mut written = 0u64;
    let mut last_report = 0u64;
    let mut failure: Option<io::Error> = None;
    let limit = limits.count.unwrap_or(u64::MAX);

    while !shutdown.is_cancelled() && failure.is_none() && written < limit {
        if limits.duration.is_some_and(|d| start.elapsed() >= d) {
            break;
        }
        let n = ring.poll(|rec| {
            if written >= limit || failure.is_some() {
                return;
            }
            let res = match format {
                DumpFormat::Csv => write_csv_row(&mut out, rec, clock),
                DumpFormat::Binary => out.write_all(rec.as_bytes()),
            };
            match res {
                Ok(()) => written += 1,
                Err(e) => failure = Some(e),
            }
        });

        if !quiet && written - last_report >= 10_000 {
            let rate = written as f64 / start.elapsed().as_secs_f64().max(1e-9);
            eprint!("\rRecords: {written} ({rate:.1}/s)   ");
            last_report = written;
        }
        if n == 0 {
            std::thread::sleep(Duration::from_micros(100));
        }
    }

    if let Some(e) = failure {
        return Err(e).context("writing dump output");
    }
    out.flush()?;
    if !quiet {
        eprintln!("\n\nCapture complete: {written} records");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use t2t_core::record::flags;

    #[test]
    fn csv_row_matches_header_columns() {
        let rec = DecisionRecord {
            seq: 42,
            ts_ingress: 1_000,
            ts_decision: 1_030,
            symbol_idx: 7,
            side: 1,
            flags: flags::PRICE_BAND,
            quantity: 300,
            price: 1_502_500,
            ref_price: 1_500_000,
            feature0: 12,
            feature1: -40,
            ..Default::default()
        };
        let mut buf = Vec::new();
        write_csv_row(&mut buf, &rec, ClockRate::DEVICE).unwrap();
        let line = String::from_utf8(buf).unwrap();
        assert_eq!(
            line,
            "42,1000,1030,7,S,150.2500,300,150.0000,0,1,100,12,-40\n"
        );
        assert_eq!(
            line.trim_end().split(',').count(),
            CSV_HEADER.split(',').count()
        );
    }
}
