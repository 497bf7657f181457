use crate::error::{DeviceError, Result, SetupError};
use crate::platform::dma::DmaRegion;
use crate::platform::sim::{SimProducer, SimulatedDevice};
use crate::platform::uio::UioPlatform;
use crate::platform::vfio::VfioPlatform;
use crate::platform::{BackendKind, BarRegion, PlatformAccess, check_register, discovery};
use crate::ring::DmaRing;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering, fence};
use t2t_common::{
    BUILD_ID_MAGIC, LAT_HIST_BIN_CYCLES, LAT_HIST_BINS, RING_ENTRIES, csr, ctrl, symtab,
};
use t2t_core::config::DeviceConfig;
use t2t_core::ring::RingGeometry;
use t2t_core::symbol::{SymbolKey, check_index};
use tracing::{debug, info, warn};

/// Backend selection when opening a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendChoice {
    /// VFIO when the device is bound to `vfio-pci`, UIO otherwise.
    #[default]
    Auto,
    Uio,
    Vfio,
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auto" => Ok(BackendChoice::Auto),
            "uio" => Ok(BackendChoice::Uio),
            "vfio" => Ok(BackendChoice::Vfio),
            other => Err(format!("unknown backend {other:?}")),
        }
    }
}

/// Where the device sits in its lifecycle, derived from live registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Mapped, not yet configured through this handle.
    Open,
    Configured,
    Enabled,
    /// The kill switch is engaged, regardless of the enable bit.
    KillActive,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceState::Open => "open",
            DeviceState::Configured => "configured",
            DeviceState::Enabled => "enabled",
            DeviceState::KillActive => "kill-active",
        })
    }
}

/// Hardware counters. Read live on every call; nothing is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Statistics {
    pub rx_packets: u32,
    pub rx_bytes: u32,
    pub rx_crc_errors: u32,
    pub rx_drops: u32,
    pub parsed_packets: u32,
    pub messages: u32,
    pub seq_gaps: u32,
    pub book_updates: u32,
    pub bank_conflicts: u32,
    pub risk_accepts: u32,
    pub risk_rejects: u32,
    pub dma_records: u32,
    pub dma_drops: u32,
}

/// Tick-to-decision latency histogram with 4-cycle bins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyHistogram {
    bins: [u32; LAT_HIST_BINS],
}

impl LatencyHistogram {
    pub fn from_bins(bins: [u32; LAT_HIST_BINS]) -> Self {
        Self { bins }
    }

    pub fn bins(&self) -> &[u32; LAT_HIST_BINS] {
        &self.bins
    }

    pub fn total(&self) -> u64 {
        self.bins.iter().map(|&b| u64::from(b)).sum()
    }

    /// Cycle range `[lo, hi)` covered by bin `i`.
    pub fn bin_cycles(i: usize) -> (u64, u64) {
        let lo = i as u64 * LAT_HIST_BIN_CYCLES;
        (lo, lo + LAT_HIST_BIN_CYCLES)
    }

    /// Upper edge in cycles of the bin holding the `p`-th percentile.
    pub fn percentile_cycles(&self, p: f64) -> Option<u64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let target = ((p / 100.0).clamp(0.0, 1.0) * total as f64).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (i, &count) in self.bins.iter().enumerate() {
            seen += u64::from(count);
            if seen >= target {
                return Some(Self::bin_cycles(i).1);
            }
        }
        None
    }
}

struct RingAlloc {
    region: DmaRegion,
    bus_addr: u64,
    geometry: RingGeometry,
}

/// Exclusive handle to one T2T device.
///
/// Owns the control-register mapping and the DMA ring memory. All register
/// traffic goes through [`DeviceHandle::read_reg`]/[`DeviceHandle::write_reg`]
/// or the typed operations built on them: every write is followed by a
/// store barrier, and every producer-index read by a load barrier.
pub struct DeviceHandle {
    platform: Box<dyn PlatformAccess>,
    ring: Option<RingAlloc>,
    bdf: String,
    configured: AtomicBool,
    consumer_attached: AtomicBool,
}

impl DeviceHandle {
    /// Opens the device at `bdf`, picking the backend from its bound driver.
    pub fn open(bdf: &str) -> Result<Self> {
        Self::open_with(bdf, BackendChoice::Auto)
    }

    pub fn open_with(bdf: &str, choice: BackendChoice) -> Result<Self> {
        let bdf = discovery::normalize_bdf(bdf);
        let sys = Path::new(discovery::SYSFS);
        if !discovery::pci_device_dir(sys, &bdf).exists() {
            return Err(SetupError::NoDevice {
                what: format!("no PCI device at {bdf}"),
            }
            .into());
        }

        let choice = match choice {
            BackendChoice::Auto => match discovery::bound_driver(sys, &bdf).as_deref() {
                Some("vfio-pci") => BackendChoice::Vfio,
                _ => BackendChoice::Uio,
            },
            other => other,
        };

        let platform: Box<dyn PlatformAccess> = match choice {
            BackendChoice::Vfio => Box::new(VfioPlatform::open(&bdf)?),
            _ => Box::new(UioPlatform::open(&bdf)?),
        };
        Ok(Self::from_platform(platform, bdf))
    }

    /// Opens the first device with the T2T vendor and device ids.
    pub fn find_first() -> Result<Self> {
        let bdf = discovery::find_first_bdf(Path::new(discovery::SYSFS)).ok_or_else(|| {
            SetupError::NoDevice {
                what: format!(
                    "no PCI device with id {:04x}:{:04x}",
                    t2t_common::VENDOR_ID,
                    t2t_common::DEVICE_ID
                ),
            }
        })?;
        Self::open(&bdf)
    }

    /// A handle on the software model, plus the producer that feeds it.
    pub fn simulated() -> (Self, SimProducer) {
        let (device, producer) = SimulatedDevice::new();
        (Self::from_platform(Box::new(device), "sim"), producer)
    }

    /// Wraps an already opened backend.
    pub fn from_platform(platform: Box<dyn PlatformAccess>, bdf: impl Into<String>) -> Self {
        let handle = Self {
            platform,
            ring: None,
            bdf: bdf.into(),
            configured: AtomicBool::new(false),
            consumer_attached: AtomicBool::new(false),
        };
        let build_id = handle.build_id();
        if build_id >> 16 != BUILD_ID_MAGIC {
            warn!(build_id = format_args!("{build_id:#010x}"), "unexpected build id");
        }
        info!(
            bdf = %handle.bdf,
            backend = %handle.platform.kind(),
            build_id = format_args!("{build_id:#010x}"),
            "device open"
        );
        handle
    }

    pub fn bdf(&self) -> &str {
        &self.bdf
    }

    pub fn backend(&self) -> BackendKind {
        self.platform.kind()
    }

    fn reg(&self, offset: usize) -> u32 {
        self.platform.read32(offset)
    }

    fn set_reg(&self, offset: usize, value: u32) {
        self.platform.write32(offset, value);
        fence(Ordering::Release);
    }

    /// Reads any control register by byte offset.
    pub fn read_reg(&self, offset: usize) -> Result<u32> {
        check_register(offset, self.platform.bar_size())?;
        Ok(self.reg(offset))
    }

    /// Writes any control register by byte offset.
    pub fn write_reg(&self, offset: usize, value: u32) -> Result<()> {
        check_register(offset, self.platform.bar_size())?;
        self.set_reg(offset, value);
        Ok(())
    }

    /// Reads a word from BAR `bar`, mapping it on first use.
    pub fn read_bar(&mut self, bar: u8, offset: usize) -> Result<u32> {
        self.platform.read_bar32(bar, offset)
    }

    pub fn bar_regions(&mut self) -> Vec<BarRegion> {
        self.platform.bar_regions()
    }

    pub fn build_id(&self) -> u32 {
        self.reg(csr::BUILD_ID)
    }

    /// Applies every configuration register, CTRL last.
    pub fn configure(&self, cfg: &DeviceConfig) {
        for (offset, value) in cfg.register_writes() {
            debug!(offset = format_args!("{offset:#05x}"), value = format_args!("{value:#010x}"), "csr write");
            self.set_reg(offset, value);
        }
        self.configured.store(true, Ordering::Relaxed);
        info!(
            enable = cfg.enable,
            price_band_bps = cfg.price_band_bps,
            token_rate = cfg.token_rate,
            position_limit = cfg.position_limit,
            kill = cfg.kill_switch,
            "device configured"
        );
    }

    /// Rebuilds the configuration from hardware registers.
    pub fn read_config(&self) -> DeviceConfig {
        DeviceConfig::from_registers(|offset| self.reg(offset))
    }

    /// Toggles only the enable bit of CTRL.
    pub fn set_enable(&self, enable: bool) {
        if enable && self.state() == DeviceState::Open {
            warn!("enabling a device that was not configured through this handle");
        }
        let mut bits = self.reg(csr::CTRL);
        if enable {
            bits |= ctrl::ENABLE;
        } else {
            bits &= !ctrl::ENABLE;
        }
        self.set_reg(csr::CTRL, bits);
        info!(enable, "pipeline enable changed");
    }

    pub fn set_kill_switch(&self, kill: bool) {
        self.set_reg(csr::KILL, u32::from(kill));
        if kill {
            warn!("kill switch engaged");
        } else {
            info!("kill switch released");
        }
    }

    pub fn state(&self) -> DeviceState {
        if self.reg(csr::KILL) & 1 != 0 {
            DeviceState::KillActive
        } else if self.reg(csr::CTRL) & ctrl::ENABLE != 0 {
            DeviceState::Enabled
        } else if self.configured.load(Ordering::Relaxed) {
            DeviceState::Configured
        } else {
            DeviceState::Open
        }
    }

    /// Sets the enable bit and clears it again when the guard is dropped.
    pub fn enable_scoped(&self) -> EnableGuard<'_> {
        self.set_enable(true);
        EnableGuard { device: self }
    }

    /// Stages `name` at `index` in the shadow symbol table.
    ///
    /// The entry is invisible to the data path until
    /// [`DeviceHandle::commit_symbols`].
    pub fn load_symbol(&self, name: &str, index: u16) -> Result<()> {
        let index = check_index(index)?;
        let key = SymbolKey::new(name);
        let (lo, hi) = key.words();
        self.set_reg(csr::SYMTAB_KEY_LO, lo);
        self.set_reg(csr::SYMTAB_KEY_HI, hi);
        self.set_reg(csr::SYMTAB_INDEX, u32::from(index));
        self.set_reg(csr::SYMTAB_COMMIT, symtab::STAGE);
        debug!(symbol = %key, index, "symbol staged");
        Ok(())
    }

    /// Swaps the shadow symbol table into the data path.
    pub fn commit_symbols(&self) {
        self.set_reg(csr::SYMTAB_COMMIT, symtab::COMMIT);
        info!("symbol table committed");
    }

    /// Sets the reference price of symbol `index`. Takes effect immediately.
    pub fn set_reference_price(&self, index: u16, price: u32) -> Result<()> {
        let index = check_index(index)?;
        self.set_reg(csr::REF_PRICE_ADDR, u32::from(index));
        self.set_reg(csr::REF_PRICE_DATA, price);
        debug!(index, price, "reference price set");
        Ok(())
    }

    pub fn read_statistics(&self) -> Statistics {
        Statistics {
            rx_packets: self.reg(csr::RX_PACKETS),
            rx_bytes: self.reg(csr::RX_BYTES),
            rx_crc_errors: self.reg(csr::CRC_BAD),
            rx_drops: self.reg(csr::DROPS),
            parsed_packets: self.reg(csr::PARSED_PACKETS),
            messages: self.reg(csr::MESSAGES),
            seq_gaps: self.reg(csr::SEQ_GAPS),
            book_updates: self.reg(csr::BOOK_UPDATES),
            bank_conflicts: self.reg(csr::BANK_CONFLICTS),
            risk_accepts: self.reg(csr::ACCEPTS),
            risk_rejects: self.reg(csr::BLOCKS),
            dma_records: self.reg(csr::DMA_RECORDS),
            dma_drops: self.reg(csr::DMA_DROPS),
        }
    }

    pub fn read_latency_histogram(&self) -> LatencyHistogram {
        let mut bins = [0u32; LAT_HIST_BINS];
        for (i, bin) in bins.iter_mut().enumerate() {
            *bin = self.reg(csr::LAT_HIST_BASE + i * 4);
        }
        LatencyHistogram::from_bins(bins)
    }

    /// Allocates the DMA ring and programs the device with it.
    ///
    /// Returns the bus address written to RING_BASE. When the address cannot
    /// be resolved the ring is programmed with base 0: the device will not
    /// reach this memory, which is tolerated for bring-up only.
    pub fn init_dma_ring(&mut self, entries: usize) -> Result<u64> {
        let geometry = RingGeometry::new(entries)?;
        self.teardown_ring();

        let region = self.platform.alloc_dma(geometry.bytes())?;
        let bus_addr = match self.platform.resolve_dma_address(&region) {
            Ok(addr) => addr,
            Err(e) => {
                warn!(error = %e, "cannot resolve DMA bus address, programming ring base 0 (degraded)");
                0
            }
        };

        self.set_reg(csr::RING_BASE_LO, bus_addr as u32);
        self.set_reg(csr::RING_BASE_HI, (bus_addr >> 32) as u32);
        self.set_reg(csr::RING_LEN, geometry.depth() as u32);
        self.set_reg(csr::CONS_IDX_SHADOW, 0);
        info!(
            entries = geometry.depth(),
            bytes = geometry.bytes(),
            bus_addr = format_args!("{bus_addr:#x}"),
            "DMA ring initialized"
        );

        self.ring = Some(RingAlloc {
            region,
            bus_addr,
            geometry,
        });
        Ok(bus_addr)
    }

    /// [`DeviceHandle::init_dma_ring`] with the full 65536-entry depth.
    pub fn init_default_ring(&mut self) -> Result<u64> {
        self.init_dma_ring(RING_ENTRIES)
    }

    pub fn ring_geometry(&self) -> Option<RingGeometry> {
        self.ring.as_ref().map(|r| r.geometry)
    }

    pub fn ring_bus_address(&self) -> Option<u64> {
        self.ring.as_ref().map(|r| r.bus_addr)
    }

    /// Attaches the single consumer of the DMA ring.
    ///
    /// Resumes from the consumer index last published to hardware. Fails
    /// with [`DeviceError::RingBusy`] while another consumer is attached.
    pub fn ring(&self) -> Result<DmaRing<'_>> {
        let ring = self.ring.as_ref().ok_or(DeviceError::RingNotInitialized)?;
        if self
            .consumer_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DeviceError::RingBusy);
        }
        let consumer = ring.geometry.index(self.reg(csr::CONS_IDX_SHADOW));
        Ok(DmaRing::new(
            self,
            ring.region.as_ptr().cast_const(),
            ring.geometry,
            consumer,
        ))
    }

    /// Raw PROD_IDX, followed by a load barrier.
    pub(crate) fn producer_index_raw(&self) -> u32 {
        let value = self.reg(csr::PROD_IDX);
        fence(Ordering::Acquire);
        value
    }

    /// Hands consumed slots back to hardware.
    pub(crate) fn publish_consumer(&self, index: u16) {
        fence(Ordering::Release);
        self.set_reg(csr::CONS_IDX_SHADOW, u32::from(index));
    }

    pub(crate) fn detach_consumer(&self) {
        self.consumer_attached.store(false, Ordering::Release);
    }

    fn teardown_ring(&mut self) {
        if let Some(ring) = self.ring.take() {
            self.set_reg(csr::RING_LEN, 0);
            self.set_reg(csr::RING_BASE_LO, 0);
            self.set_reg(csr::RING_BASE_HI, 0);
            self.platform.release_dma(&ring.region);
            debug!(bytes = ring.region.len(), "DMA ring released");
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.teardown_ring();
    }
}

/// Keeps the pipeline enabled for its lifetime.
///
/// Dropping the guard clears the enable bit on every exit path, including
/// early returns and unwinding.
#[must_use = "the device is disabled as soon as the guard is dropped"]
pub struct EnableGuard<'a> {
    device: &'a DeviceHandle,
}

impl EnableGuard<'_> {
    pub fn device(&self) -> &DeviceHandle {
        self.device
    }
}

impl Drop for EnableGuard<'_> {
    fn drop(&mut self) {
        self.device.set_enable(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_uses_bin_upper_edge() {
        let mut bins = [0u32; LAT_HIST_BINS];
        bins[2] = 50;
        bins[10] = 50;
        let hist = LatencyHistogram::from_bins(bins);
        assert_eq!(hist.total(), 100);
        assert_eq!(hist.percentile_cycles(50.0), Some(12));
        assert_eq!(hist.percentile_cycles(99.0), Some(44));
        assert_eq!(hist.percentile_cycles(0.0), Some(12));
        assert_eq!(LatencyHistogram::from_bins([0; LAT_HIST_BINS]).percentile_cycles(50.0), None);
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("vfio".parse(), Ok(BackendChoice::Vfio));
        assert!("pcie".parse::<BackendChoice>().is_err());
    }

    #[test]
    fn missing_pci_device_is_no_device() {
        let err = DeviceHandle::open("ff:1f.7").err();
        assert!(matches!(err, Some(DeviceError::Setup(SetupError::NoDevice { .. }))));
    }
}
