mod control;
mod dump;
mod generator;
mod stats;
mod stream;
mod throughput;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use t2t_core::config::RiskProfile;
use t2t_core::price::FixedPrice;
use t2t_hw::{BackendChoice, DeviceHandle, DmaRing, ShutdownToken, SimProducer};
use t2t_io::loader;
use tracing_subscriber::EnvFilter;

/// Records per second fed to the simulated device by polling commands.
const SIM_FEED_RATE: u64 = 50_000;

#[derive(Parser)]
#[command(name = "t2t", version, about = "Control and monitor the T2T tick-to-trade accelerator")]
struct Cli {
    /// PCI address of the device; the first T2T device when omitted.
    #[arg(long, global = true)]
    bdf: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = Backend::Auto)]
    backend: Backend,

    /// Log filter, e.g. `debug` or `t2t_hw=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Auto,
    Uio,
    Vfio,
    /// Software model with a synthetic record feed.
    Sim,
}

#[derive(Clone, Copy, ValueEnum)]
enum SampleKind {
    Symbols,
    Prices,
    Config,
}

#[derive(Subcommand)]
enum Commands {
    /// Device identity, state, ring indices and counters.
    Info,
    /// Current configuration read back from the device.
    Config {
        #[arg(long)]
        toml: bool,
    },
    /// Apply a configuration file and/or risk profile.
    Apply {
        #[arg(short, long)]
        file: Option<PathBuf>,
        #[arg(short, long)]
        profile: Option<RiskProfile>,
        /// Enable the pipeline once configured.
        #[arg(long)]
        enable: bool,
    },
    Enable,
    Disable,
    /// Engage the kill switch.
    Kill,
    /// Release the kill switch.
    Unkill,
    LoadSymbols {
        file: PathBuf,
    },
    LoadPrices {
        file: PathBuf,
    },
    /// Stage one symbol; visible after `commit`.
    AddSymbol {
        symbol: String,
        index: u16,
        #[arg(long)]
        commit: bool,
    },
    /// Set the reference price of one symbol.
    Price {
        index: u16,
        price: FixedPrice,
    },
    /// Swap the staged symbol table into the data path.
    Commit,
    /// Read a register (hex offset).
    Get {
        #[arg(value_parser = control::parse_hex)]
        offset: u32,
    },
    /// Write a register (hex offset and value).
    Set {
        #[arg(value_parser = control::parse_hex)]
        offset: u32,
        #[arg(value_parser = control::parse_hex)]
        value: u32,
    },
    /// Print records as they arrive.
    Monitor {
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },
    /// Hardware latency histogram.
    Histogram {
        #[arg(long, default_value_t = 64)]
        bins: usize,
    },
    /// Latency percentiles over live records.
    Bench {
        #[arg(short, long, default_value_t = 10)]
        duration: u64,
    },
    /// Capture records to CSV or binary.
    Dump {
        /// Output file, `-` for stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = dump::DumpFormat::Csv)]
        format: dump::DumpFormat,
        #[arg(short = 'n', long)]
        count: Option<u64>,
        /// Stop after this many seconds.
        #[arg(short, long)]
        time: Option<u64>,
        #[arg(short, long)]
        quiet: bool,
    },
    /// Summarize a binary dump offline.
    Analyze {
        input: PathBuf,
        #[arg(long, default_value_t = 300)]
        clock_mhz: u64,
    },
    /// Write a sample symbol, price or configuration file.
    Generate {
        #[arg(value_enum)]
        kind: SampleKind,
        output: PathBuf,
    },
    /// Producer/consumer run against the simulated device.
    Stream {
        #[arg(short, long, default_value_t = 100_000)]
        freq: u64,
        #[arg(short, long, default_value_t = 10)]
        duration: u64,
        #[arg(long, default_value_t = 4096)]
        depth: usize,
    },
}

static SHUTDOWN: OnceLock<ShutdownToken> = OnceLock::new();

extern "C" fn on_signal(_: libc::c_int) {
    if let Some(token) = SHUTDOWN.get() {
        token.cancel();
    }
}

/// Routes SIGINT/SIGTERM to a shutdown token so loops exit normally and
/// the device is disabled and unmapped by the usual drops.
fn install_signal_handler() -> ShutdownToken {
    let token = SHUTDOWN.get_or_init(ShutdownToken::new).clone();
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: the handler only performs an atomic store.
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
    token
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_device(cli: &Cli) -> Result<(DeviceHandle, Option<SimProducer>)> {
    let choice = match cli.backend {
        Backend::Sim => {
            let (dev, producer) = DeviceHandle::simulated();
            return Ok((dev, Some(producer)));
        }
        Backend::Auto => BackendChoice::Auto,
        Backend::Uio => BackendChoice::Uio,
        Backend::Vfio => BackendChoice::Vfio,
    };
    let dev = match &cli.bdf {
        Some(bdf) => DeviceHandle::open_with(bdf, choice),
        None => DeviceHandle::find_first(),
    }
    .context("cannot open T2T device")?;
    Ok((dev, None))
}

/// Sets up the ring and, on the simulated backend, starts a feed.
fn with_ring<T>(
    mut dev: DeviceHandle,
    producer: Option<SimProducer>,
    body: impl FnOnce(&mut DmaRing<'_>) -> Result<T>,
) -> Result<T> {
    dev.init_default_ring().context("cannot set up DMA ring")?;
    let _feed = producer.map(|p| stream::FeedGuard::start(p, SIM_FEED_RATE));
    let mut ring = dev.ring()?;
    body(&mut ring)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());
    let shutdown = install_signal_handler();

    match &cli.command {
        Commands::Generate { kind, output } => {
            return match kind {
                SampleKind::Symbols => generator::write_sample_symbols(output),
                SampleKind::Prices => generator::write_sample_prices(output),
                SampleKind::Config => generator::write_sample_config(output),
            };
        }
        Commands::Analyze { input, clock_mhz } => {
            return throughput::run_analysis(input, *clock_mhz);
        }
        Commands::Stream {
            freq,
            duration,
            depth,
        } => {
            return stream::run_stream(*freq, *duration, *depth, &shutdown);
        }
        _ => {}
    }

    let (mut dev, producer) = open_device(&cli)?;
    match cli.command {
        Commands::Info => control::info(&mut dev)?,
        Commands::Config { toml } => control::show_config(&dev, toml)?,
        Commands::Apply {
            file,
            profile,
            enable,
        } => control::apply(&dev, file.as_deref(), profile, enable)?,
        Commands::Enable => {
            dev.set_enable(true);
            println!("Device enabled");
        }
        Commands::Disable => {
            dev.set_enable(false);
            println!("Device disabled");
        }
        Commands::Kill => {
            dev.set_kill_switch(true);
            println!("Kill switch ACTIVATED");
        }
        Commands::Unkill => {
            dev.set_kill_switch(false);
            println!("Kill switch deactivated");
        }
        Commands::LoadSymbols { file } => {
            let summary = loader::load_symbols_file(&mut dev, &file)?;
            println!("Loaded {} symbols ({} skipped)", summary.loaded, summary.skipped);
        }
        Commands::LoadPrices { file } => {
            let summary = loader::load_prices_file(&mut dev, &file)?;
            println!("Loaded {} reference prices ({} skipped)", summary.loaded, summary.skipped);
        }
        Commands::AddSymbol {
            symbol,
            index,
            commit,
        } => {
            dev.load_symbol(&symbol, index)?;
            if commit {
                dev.commit_symbols();
            }
            println!("Staged {symbol} at index {index}");
        }
        Commands::Price { index, price } => {
            dev.set_reference_price(index, price.raw())?;
            println!("Reference price of {index} set to {price}");
        }
        Commands::Commit => {
            dev.commit_symbols();
            println!("Symbol table committed");
        }
        Commands::Get { offset } => control::get(&dev, offset)?,
        Commands::Set { offset, value } => control::set(&dev, offset, value)?,
        Commands::Histogram { bins } => control::histogram(&dev, bins),
        Commands::Monitor { count } => with_ring(dev, producer, |ring| {
            control::monitor(ring, count, &shutdown);
            Ok(())
        })?,
        Commands::Bench { duration } => with_ring(dev, producer, |ring| {
            control::bench(ring, Duration::from_secs(duration), &shutdown)
        })?,
        Commands::Dump {
            output,
            format,
            count,
            time,
            quiet,
        } => {
            let limits = dump::DumpLimits {
                count,
                duration: time.map(Duration::from_secs),
            };
            with_ring(dev, producer, |ring| {
                dump::run_dump(ring, output.as_deref(), format, limits, &shutdown, quiet)
            })?;
        }
        Commands::Generate { .. } | Commands::Analyze { .. } | Commands::Stream { .. } => {}
    }
    Ok(())
}
