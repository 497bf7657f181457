//! Latency statistics over decision records.
//!
//! Collects tick-to-decision latencies drained from the DMA ring (or read
//! back from a dump file) and reports min/max/mean, dispersion and tail
//! percentiles. The device timestamps both ends of the pipeline, so these
//! figures are wire-to-decision times measured by hardware, not host time.

use t2t_common::{LAT_HIST_BIN_CYCLES, LAT_HIST_BINS};
use t2t_core::clock::ClockRate;
use t2t_core::record::DecisionRecord;
use t2t_hw::LatencyHistogram;

/// Histogram buckets kept by [`LatencyStats`], 10 ns wide.
const BUCKETS: usize = 20;
const BUCKET_NS: u64 = 10;

/// Tracks latency statistics over a stream of records.
///
/// Keeps running min, max and sums for constant-time summaries plus every
/// sample, so exact percentiles can be computed at report time.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    pub min: u64,
    pub max: u64,
    /// Wide enough that saturated latencies never overflow it.
    pub sum: u128,
    pub sum_sq: f64,
    pub count: u64,
    pub buckets: [u64; BUCKETS],
    /// Records whose decision timestamp preceded the ingress timestamp.
    pub inverted: u64,
    pub accepted: u64,
    samples: Vec<u64>,
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyStats {
    /// Creates an empty tracker.
    ///
    /// `min` starts at `u64::MAX` so the first sample becomes the minimum.
    pub fn new() -> Self {
        Self {
            min: u64::MAX,
            max: 0,
            sum: 0,
            sum_sq: 0.0,
            count: 0,
            buckets: [0; BUCKETS],
            inverted: 0,
            accepted: 0,
            samples: Vec::new(),
        }
    }

    /// Records a latency measurement in nanoseconds.
    ///
    /// # Arguments
    ///
    /// * `nanos` - Latency in nanoseconds
    pub fn update(&mut self, nanos: u64) {
        self.min = self.min.min(nanos);
        self.max = self.max.max(nanos);
        self.sum += u128::from(nanos);
        self.sum_sq += (nanos as f64) * (nanos as f64);
        self.count += 1;

        let idx = (nanos / BUCKET_NS).min(BUCKETS as u64 - 1) as usize;
        self.buckets[idx] += 1;
        self.samples.push(nanos);
    }

    /// Records one decision record.
    pub fn record(&mut self, rec: &DecisionRecord, clock: ClockRate) {
        if rec.timestamps_inverted() {
            self.inverted += 1;
        }
        if rec.accepted() {
            self.accepted += 1;
        }
        self.update(rec.latency_ns_at(clock));
    }

    /// Folds another tracker into this one.
    pub fn merge(mut self, other: LatencyStats) -> Self {
        if other.count > 0 {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.count += other.count;
        for (a, b) in self.buckets.iter_mut().zip(other.buckets) {
            *a += b;
        }
        self.inverted += other.inverted;
        self.accepted += other.accepted;
        self.samples.extend(other.samples);
        self
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }

    /// Population standard deviation in nanoseconds.
    pub fn stddev(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.avg();
        (self.sum_sq / self.count as f64 - mean * mean).max(0.0).sqrt()
    }

    /// Nearest-rank percentiles, `ps` given in percent.
    pub fn percentiles(&mut self, ps: &[f64]) -> Vec<u64> {
        if self.samples.is_empty() {
            return vec![0; ps.len()];
        }
        self.samples.sort_unstable();
        let n = self.samples.len();
        ps.iter()
            .map(|p| {
                let rank = ((p / 100.0) * n as f64) as usize;
                self.samples[rank.min(n - 1)]
            })
            .collect()
    }

    /// Prints the summary block used by `bench` and `analyze`.
    pub fn print_report(&mut self) {
        println!("\nLatency (tick to decision)");
        println!("  Samples:    {}", self.count);
        if self.count == 0 {
            return;
        }
        let pct = self.percentiles(&[50.0, 90.0, 99.0, 99.9]);
        println!("  Min:        {} ns", self.min);
        println!("  p50:        {} ns", pct[0]);
        println!("  p90:        {} ns", pct[1]);
        println!("  p99:        {} ns", pct[2]);
        println!("  p99.9:      {} ns", pct[3]);
        println!("  Max:        {} ns", self.max);
        println!("  Mean:       {:.1} ns", self.avg());
        println!("  Stddev:     {:.1} ns", self.stddev());
        println!(
            "  Accepted:   {} ({:.2}%)",
            self.accepted,
            100.0 * self.accepted as f64 / self.count as f64
        );
        if self.inverted > 0 {
            println!("  Inverted timestamps: {}", self.inverted);
        }

        println!("Distribution ({BUCKET_NS} ns buckets):");
        for (i, &count) in self.buckets.iter().enumerate() {
            if count > 0 {
                let lower = i as u64 * BUCKET_NS;
                let open = if i == BUCKETS - 1 { "+" } else { "" };
                println!("  [{:4}-{:4}{open} ns]: {}", lower, lower + BUCKET_NS, count);
            }
        }
    }
}

/// Renders the hardware histogram as ASCII bars.
///
/// Bins are 4 cycles wide; the label shows the equivalent nanoseconds at
/// `clock`. Empty bins are skipped.
pub fn print_histogram(hist: &LatencyHistogram, bins: usize, clock: ClockRate) {
    const BAR_WIDTH: u64 = 50;

    println!(
        "Bin width: {LAT_HIST_BIN_CYCLES} cycles ({:.1} ns)\n",
        LAT_HIST_BIN_CYCLES as f64 * clock.period_ns()
    );
    let shown = &hist.bins()[..bins.min(hist.bins().len())];
    let peak = shown.iter().copied().max().unwrap_or(0);
    if peak == 0 {
        println!("(no samples)");
        return;
    }

    for (i, &count) in shown.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let (lo, hi) = LatencyHistogram::bin_cycles(i);
        let bar = (u64::from(count) * BAR_WIDTH / u64::from(peak)) as usize;
        println!(
            "{:5}-{:5} ns | {:10} |{}",
            clock.cycles_to_ns(lo),
            clock.cycles_to_ns(hi - 1),
            count,
            "#".repeat(bar)
        );
    }
    let mut head = [0u32; LAT_HIST_BINS];
    head[..shown.len()].copy_from_slice(shown);
    let head = LatencyHistogram::from_bins(head);
    for p in [50.0, 99.0] {
        if let Some(cycles) = head.percentile_cycles(p) {
            println!("p{p}: <= {} ns", clock.cycles_to_ns(cycles));
        }
    }
}
