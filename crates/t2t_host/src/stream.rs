use crate::generator::SyntheticFeed;
use crate::stats::LatencyStats;
use anyhow::{Context, Result, bail};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use t2t_core::clock::ClockRate;
use t2t_hw::{DeviceHandle, ShutdownToken, SimProducer};

/// Counters shared between the feed thread and the reporter.
#[derive(Default)]
pub struct FeedStats {
    pub generated: AtomicU64,
    pub dropped: AtomicU64,
}

/// Drives a simulated device with synthetic records at `freq` per second.
///
/// Stops when `shutdown` is cancelled and hands the producer back, so the
/// caller can inspect the simulated registers afterwards.
pub fn spawn_feed(
    mut producer: SimProducer,
    freq: u64,
    shutdown: ShutdownToken,
    stats: Arc<FeedStats>,
) -> JoinHandle<SimProducer> {
    thread::spawn(move || {
        let interval = Duration::from_nanos(1_000_000_000 / freq.max(1));
        let mut feed = SyntheticFeed::new(0x7432);
        let mut next = Instant::now();

        while !shutdown.is_cancelled() {
            let record = feed.next_record();
            if producer.push(&record) {
                stats.generated.fetch_add(1, Ordering::Relaxed);
            } else {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
            }

            next += interval;
            while Instant::now() < next {
                if shutdown.is_cancelled() {
                    break;
                }
                std::hint::spin_loop();
            }
        }
        producer
    })
}

/// A feed thread that stops and is joined when dropped.
pub struct FeedGuard {
    stop: ShutdownToken,
    handle: Option<JoinHandle<SimProducer>>,
}

impl FeedGuard {
    pub fn start(producer: SimProducer, freq: u64) -> Self {
        let stop = ShutdownToken::new();
        let handle = spawn_feed(producer, freq, stop.clone(), Arc::default());
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// End-to-end run against the simulated device.
///
/// One thread plays the FPGA and fills the DMA ring at the target rate while
/// this thread drains it through the regular consumer path. Prints a
/// progress line per second and latency statistics at the end.
pub fn run_stream(
    freq: u64,
    duration_secs: u64,
    depth: usize,
    shutdown: &ShutdownToken,
) -> Result<()> {
    if freq == 0 {
        bail!("--freq must be positive");
    }
    println!("T2T STREAM (simulated device)");
    println!("Target rate: {freq} records/s");
    println!("Duration:    {duration_secs} s");
    println!("Ring depth:  {depth}");
    println!("-------------------------------");

    let (mut dev, producer) = DeviceHandle::simulated();
    dev.init_dma_ring(depth).context("cannot set up DMA ring")?;
    let _enabled = dev.enable_scoped();

    let feed_stop = ShutdownToken::new();
    let feed_stats = Arc::new(FeedStats::default());
    let feeder = spawn_feed(producer, freq, feed_stop.clone(), Arc::clone(&feed_stats));

    let clock = ClockRate::DEVICE;
    let mut ring = dev.ring()?;
    let mut lat = LatencyStats::new();
    let mut last_seq = None;
    let mut gaps = 0u64;

    let start = Instant::now();
    let mut last_report = start;
    let mut last_consumed = 0;
    while start.elapsed().as_secs() < duration_secs && !shutdown.is_cancelled() {
        let n = ring.poll(|rec| {
            if let Some(prev) = last_seq {
                if rec.seq != u32::wrapping_add(prev, 1) {
                    gaps += 1;
                }
            }
            last_seq = Some(rec.seq);
            lat.record(rec, clock);
        });
        if n == 0 {
            std::hint::spin_loop();
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            let consumed = lat.count;
            println!(
                "T={:2}s | Gen: {:9} | Consumed: {:9} ({:8}/s) | Drop: {:6} | Pending: {:5}",
                start.elapsed().as_secs(),
                feed_stats.generated.load(Ordering::Relaxed),
                consumed,
                consumed - last_consumed,
                feed_stats.dropped.load(Ordering::Relaxed),
                ring.pending()
            );
            last_consumed = consumed;
        }
    }

    feed_stop.cancel();
    feeder
        .join()
        .map_err(|_| anyhow::anyhow!("feed thread panicked"))?;
    ring.poll(|rec| lat.record(rec, clock));
    drop(ring);

    let hw = dev.read_statistics();
    println!("\nDevice counters: records {} drops {}", hw.dma_records, hw.dma_drops);
    println!("Sequence gaps seen by consumer: {gaps}");
    lat.print_report();
    Ok(())
}
