//! Device inspection and control commands.

use crate::stats::{self, LatencyStats};
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use t2t_common::{LAT_HIST_BINS, csr};
use t2t_core::clock::ClockRate;
use t2t_core::config::{DeviceConfig, RiskProfile};
use t2t_core::record::Side;
use t2t_hw::{DeviceHandle, DmaRing, ShutdownToken, Statistics};

fn flag(on: bool) -> &'static str {
    if on { "true" } else { "false" }
}

fn kill(on: bool) -> &'static str {
    if on { "ACTIVE" } else { "inactive" }
}

pub fn print_statistics(s: &Statistics) {
    println!("\nStatistics:");
    let rows = [
        ("RX packets", s.rx_packets),
        ("RX bytes", s.rx_bytes),
        ("RX CRC errors", s.rx_crc_errors),
        ("RX drops", s.rx_drops),
        ("Parsed packets", s.parsed_packets),
        ("Messages", s.messages),
        ("Sequence gaps", s.seq_gaps),
        ("Book updates", s.book_updates),
        ("Bank conflicts", s.bank_conflicts),
        ("Risk accepts", s.risk_accepts),
        ("Risk rejects", s.risk_rejects),
        ("DMA records", s.dma_records),
        ("DMA drops", s.dma_drops),
    ];
    for (name, value) in rows {
        println!("  {name:<16} {value}");
    }
}

pub fn info(dev: &mut DeviceHandle) -> Result<()> {
    println!("=== T2T Device Information ===\n");
    println!("Device:      {} ({})", dev.bdf(), dev.backend());
    println!("Build ID:    {:#010x}", dev.build_id());
    println!("State:       {}", dev.state());
    println!("Kill Switch: {}", kill(dev.read_reg(csr::KILL)? & 1 != 0));

    let base = u64::from(dev.read_reg(csr::RING_BASE_LO)?)
        | (u64::from(dev.read_reg(csr::RING_BASE_HI)?) << 32);
    println!("\nRing Buffer:");
    println!("  Base:           {base:#x}");
    println!("  Length:         {}", dev.read_reg(csr::RING_LEN)?);
    println!("  Producer Index: {}", dev.read_reg(csr::PROD_IDX)? & 0xFFFF);
    println!("  Consumer Index: {}", dev.read_reg(csr::CONS_IDX_SHADOW)? & 0xFFFF);

    println!("\nRegions:");
    for bar in dev.bar_regions() {
        let mapped = if bar.mapped { "mapped" } else { "" };
        println!("  BAR{}: {:>10} bytes {mapped}", bar.index, bar.size);
    }

    print_statistics(&dev.read_statistics());
    Ok(())
}

pub fn print_config(cfg: &DeviceConfig) {
    println!("=== T2T Configuration ===\n");
    println!("Enable:           {}", flag(cfg.enable));
    println!("Promiscuous:      {}", flag(cfg.promiscuous));
    println!("Multicast Enable: {}", flag(cfg.mcast_enable));
    println!("Multicast MAC:    {}", cfg.mcast_mac);
    println!("Check IP Csum:    {}", flag(cfg.check_ip_csum));
    println!("Expected Port:    {}", cfg.expected_port);
    println!("Seq Check Enable: {}", flag(cfg.seq_check_en));
    println!("Expected Seq:     {}", cfg.expected_seq);
    println!("\nRisk Parameters:");
    println!("  Price Band (bps): {}", cfg.price_band_bps);
    println!("  Token Rate:       {}/ms", cfg.token_rate);
    println!("  Token Max:        {}", cfg.token_max);
    println!("  Position Limit:   {}", cfg.position_limit);
    println!("  Stale Timeout:    {} us", cfg.stale_usec);
    println!("  Seq Gap Thresh:   {}", cfg.seq_gap_thr);
    println!("  Kill Switch:      {}", kill(cfg.kill_switch));
    println!("\nMSI-X:");
    println!("  Enable:           {}", flag(cfg.msix_enable));
    println!("  Threshold:        {}", cfg.msix_threshold);
}

pub fn show_config(dev: &DeviceHandle, as_toml: bool) -> Result<()> {
    let cfg = dev.read_config();
    if as_toml {
        print!("{}", toml::to_string_pretty(&cfg).context("cannot serialize configuration")?);
    } else {
        print_config(&cfg);
    }
    Ok(())
}

/// Builds a configuration from an optional TOML file and risk profile.
///
/// Fields missing from the file keep their defaults; the profile overlays
/// its risk limits on top of whatever the file set.
pub fn build_config(file: Option<&Path>, profile: Option<RiskProfile>) -> Result<DeviceConfig> {
    let mut cfg = match file {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("invalid configuration in {}", path.display()))?
        }
        None => DeviceConfig::default(),
    };
    if let Some(profile) = profile {
        profile.apply(&mut cfg);
    }
    Ok(cfg)
}

pub fn apply(
    dev: &DeviceHandle,
    file: Option<&Path>,
    profile: Option<RiskProfile>,
    enable: bool,
) -> Result<()> {
    let mut cfg = build_config(file, profile)?;
    cfg.enable |= enable;
    dev.configure(&cfg);
    println!(
        "Configuration applied{}",
        profile.map(|p| format!(" (profile {p})")).unwrap_or_default()
    );
    print_config(&dev.read_config());
    Ok(())
}

pub fn parse_hex(s: &str) -> Result<u32, String> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex value {s:?}: {e}"))
}

pub fn get(dev: &DeviceHandle, offset: u32) -> Result<()> {
    let value = dev.read_reg(offset as usize)?;
    println!("{offset:#05x} = {value:#010x}");
    Ok(())
}

pub fn set(dev: &DeviceHandle, offset: u32, value: u32) -> Result<()> {
    dev.write_reg(offset as usize, value)?;
    println!("Wrote {value:#010x} to offset {offset:#05x}");
    Ok(())
}

pub fn histogram(dev: &DeviceHandle, bins: usize) {
    println!("=== Latency Histogram ===\n");
    stats::print_histogram(&dev.read_latency_histogram(), bins.min(LAT_HIST_BINS), ClockRate::DEVICE);
}

/// Prints every record as it arrives until interrupted or `count` reached.
pub fn monitor(ring: &mut DmaRing<'_>, count: Option<u64>, shutdown: &ShutdownToken) {
    println!("Monitoring DMA records (Ctrl+C to stop)...\n");
    println!(
        "{:>12}{:>8}{:>6}{:>12}{:>10}{:>8}{:>12}",
        "Seq", "SymIdx", "Side", "Price", "Qty", "Accept", "Latency"
    );
    println!("{}", "-".repeat(70));

    let clock = ClockRate::DEVICE;
    let limit = count.unwrap_or(u64::MAX);
    let mut total = 0u64;
    let mut total_latency = 0u64;
    while !shutdown.is_cancelled() && total < limit {
        let n = ring.poll(|rec| {
            if total >= limit {
                return;
            }
            let lat = rec.latency_ns_at(clock);
            total += 1;
            total_latency += lat;
            let side = match rec.side() {
                Side::Bid => "Bid",
                Side::Ask => "Ask",
                Side::Other(_) => "?",
            };
            println!(
                "{:>12}{:>8}{:>6}{:>12.2}{:>10}{:>8}{:>9} ns",
                rec.seq,
                rec.symbol_idx,
                side,
                rec.price_as_decimal().to_decimal(),
                rec.quantity,
                if rec.accepted() { "YES" } else { "NO" },
                lat
            );
        });
        if n == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    println!("\n--- Summary ---");
    println!("Total records: {total}");
    if total > 0 {
        println!("Average latency: {} ns", total_latency / total);
    }
}

/// Collects latencies for `duration` and prints percentiles.
pub fn bench(ring: &mut DmaRing<'_>, duration: Duration, shutdown: &ShutdownToken) -> Result<()> {
    println!("=== Latency Benchmark ===\n");
    println!("Collecting samples for {} seconds...", duration.as_secs());

    let clock = ClockRate::DEVICE;
    let mut lat = LatencyStats::new();
    let start = Instant::now();
    while !shutdown.is_cancelled() && start.elapsed() < duration {
        if ring.poll(|rec| lat.record(rec, clock)) == 0 {
            std::hint::spin_loop();
        }
    }

    if lat.count == 0 {
        bail!("no samples collected, is traffic flowing?");
    }
    lat.print_report();
    Ok(())
}
