//! Software model of the device for tests and demos.
//!
//! The register file is a flat array of atomics. Writes that trigger device
//! actions (symbol stage/commit, reference-price data, ring programming) are
//! modelled; hardware counters and the producer index only change through
//! [`SimProducer`].

use super::dma::{DmaPolicy, DmaRegion};
use super::{BackendKind, BarRegion, PlatformAccess, check_register};
use crate::error::{AddressResolutionError, AllocationError, SetupError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering, fence};
use t2t_common::{
    BAR0_SIZE, HUGEPAGE_SIZE, LAT_HIST_BIN_CYCLES, RECORD_SIZE, SYMBOL_TABLE_SIZE, csr, symtab,
};
use t2t_core::record::{DecisionRecord, flags};
use t2t_core::ring::RingGeometry;
use t2t_core::symbol::SymbolKey;
use tracing::debug;

/// BUILD_ID reported by the model.
pub const SIM_BUILD_ID: u32 = 0x5432_0001;

/// First bus address handed out for DMA regions.
const SIM_BUS_BASE: u64 = 0x2_0000_0000;

/// Histogram bins below the counter block at DROPS.
const SIM_HIST_BINS: u64 = ((csr::DROPS - csr::LAT_HIST_BASE) / 4) as u64;

const INDEX_MASK: u32 = SYMBOL_TABLE_SIZE as u32 - 1;

struct Tables {
    staged: Vec<Option<SymbolKey>>,
    active: Vec<Option<SymbolKey>>,
    ref_prices: Vec<u32>,
}

struct DmaWindow {
    bus: u64,
    ptr: usize,
    len: usize,
}

/// State shared between the simulated backend and its producer.
pub struct SimState {
    regs: Box<[AtomicU32]>,
    tables: Mutex<Tables>,
    windows: Mutex<Vec<DmaWindow>>,
}

fn read_only(offset: usize) -> bool {
    offset == csr::BUILD_ID
        || offset == csr::PROD_IDX
        || (csr::LAT_HIST_BASE..=csr::DMA_DROPS).contains(&offset)
}

impl SimState {
    fn new() -> Self {
        let regs: Box<[AtomicU32]> = (0..BAR0_SIZE / 4).map(|_| AtomicU32::new(0)).collect();
        regs[csr::BUILD_ID / 4].store(SIM_BUILD_ID, Ordering::Relaxed);
        Self {
            regs,
            tables: Mutex::new(Tables {
                staged: vec![None; SYMBOL_TABLE_SIZE],
                active: vec![None; SYMBOL_TABLE_SIZE],
                ref_prices: vec![0; SYMBOL_TABLE_SIZE],
            }),
            windows: Mutex::new(Vec::new()),
        }
    }

    fn reg(&self, offset: usize) -> &AtomicU32 {
        &self.regs[offset / 4]
    }

    /// Current value of a register, as the device sees it.
    pub fn load(&self, offset: usize) -> u32 {
        self.reg(offset).load(Ordering::Relaxed)
    }

    fn store(&self, offset: usize, value: u32) {
        self.reg(offset).store(value, Ordering::Relaxed);
    }

    fn bump(&self, offset: usize) {
        self.reg(offset).fetch_add(1, Ordering::Relaxed);
    }

    /// Overrides a hardware-owned counter.
    pub fn set_counter(&self, offset: usize, value: u32) {
        if check_register(offset, BAR0_SIZE).is_ok() {
            self.store(offset, value);
        }
    }

    /// A register write from software.
    fn write(&self, offset: usize, value: u32) {
        if read_only(offset) {
            return;
        }
        match offset {
            csr::SYMTAB_COMMIT => {
                let mut tables = self.tables.lock();
                match value {
                    symtab::STAGE => {
                        let key = SymbolKey::from_words(
                            self.load(csr::SYMTAB_KEY_LO),
                            self.load(csr::SYMTAB_KEY_HI),
                        );
                        let index = (self.load(csr::SYMTAB_INDEX) & INDEX_MASK) as usize;
                        tables.staged[index] = Some(key);
                    }
                    symtab::COMMIT => {
                        tables.active = tables.staged.clone();
                    }
                    _ => {}
                }
            }
            csr::REF_PRICE_DATA => {
                let index = (self.load(csr::REF_PRICE_ADDR) & INDEX_MASK) as usize;
                self.tables.lock().ref_prices[index] = value;
            }
            csr::RING_LEN => {
                self.store(csr::PROD_IDX, 0);
            }
            _ => {}
        }
        self.store(offset, value);
    }

    /// Symbol active in the data path at `index`.
    pub fn active_symbol(&self, index: u16) -> Option<SymbolKey> {
        self.tables.lock().active.get(usize::from(index)).copied().flatten()
    }

    /// Symbol staged at `index`, awaiting commit.
    pub fn staged_symbol(&self, index: u16) -> Option<SymbolKey> {
        self.tables.lock().staged.get(usize::from(index)).copied().flatten()
    }

    pub fn reference_price(&self, index: u16) -> u32 {
        self.tables
            .lock()
            .ref_prices
            .get(usize::from(index))
            .copied()
            .unwrap_or(0)
    }
}

/// The simulated backend. Created together with its [`SimProducer`].
pub struct SimulatedDevice {
    state: Arc<SimState>,
    next_bus: u64,
}

impl SimulatedDevice {
    pub fn new() -> (Self, SimProducer) {
        let state = Arc::new(SimState::new());
        (
            Self {
                state: Arc::clone(&state),
                next_bus: SIM_BUS_BASE,
            },
            SimProducer { state },
        )
    }
}

impl PlatformAccess for SimulatedDevice {
    fn kind(&self) -> BackendKind {
        BackendKind::Simulated
    }

    fn bar_size(&self) -> usize {
        BAR0_SIZE
    }

    fn read32(&self, offset: usize) -> u32 {
        self.state.load(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        self.state.write(offset, value);
    }

    fn read_bar32(&mut self, bar: u8, offset: usize) -> crate::Result<u32> {
        if bar != 0 {
            return Err(SetupError::NoBar { bar }.into());
        }
        check_register(offset, BAR0_SIZE)?;
        Ok(self.state.load(offset))
    }

    fn bar_regions(&mut self) -> Vec<BarRegion> {
        vec![BarRegion {
            index: 0,
            size: BAR0_SIZE as u64,
            mapped: true,
        }]
    }

    fn alloc_dma(&mut self, size: usize) -> Result<DmaRegion, AllocationError> {
        DmaRegion::allocate(size, DmaPolicy::ANONYMOUS)
    }

    fn resolve_dma_address(&mut self, region: &DmaRegion) -> Result<u64, AddressResolutionError> {
        let bus = self.next_bus;
        self.next_bus += (region.len() as u64).next_multiple_of(HUGEPAGE_SIZE as u64);
        self.state.windows.lock().push(DmaWindow {
            bus,
            ptr: region.addr(),
            len: region.len(),
        });
        debug!(bus, size = region.len(), "simulated DMA window");
        Ok(bus)
    }

    fn release_dma(&mut self, region: &DmaRegion) {
        self.state.windows.lock().retain(|w| w.ptr != region.addr());
    }
}

/// Hardware-producer stand-in.
///
/// Follows the device's ordering contract: the record is written in full,
/// a release fence is issued, and only then is PROD_IDX advanced. There is
/// exactly one producer per simulated device, so pushing takes `&mut self`.
pub struct SimProducer {
    state: Arc<SimState>,
}

impl SimProducer {
    pub fn state(&self) -> &SimState {
        &self.state
    }

    /// Writes one record into the ring the device was programmed with.
    ///
    /// Returns `false` and counts a DMA drop when the ring is full. Returns
    /// `false` without counting when no ring is programmed.
    pub fn push(&mut self, record: &DecisionRecord) -> bool {
        let state = &*self.state;
        let Ok(geometry) = RingGeometry::new(state.load(csr::RING_LEN) as usize) else {
            return false;
        };
        let base =
            u64::from(state.load(csr::RING_BASE_LO)) | (u64::from(state.load(csr::RING_BASE_HI)) << 32);

        let mut rec = *record;
        if state.load(csr::KILL) & 1 != 0 {
            rec.flags = (rec.flags & !flags::ACCEPTED) | flags::KILL;
        }

        {
            let windows = state.windows.lock();
            let Some(window) = windows
                .iter()
                .find(|w| w.bus == base && w.len >= geometry.bytes())
            else {
                return false;
            };

            let prod = geometry.index(state.load(csr::PROD_IDX));
            let cons = geometry.index(state.load(csr::CONS_IDX_SHADOW));
            fence(Ordering::Acquire);
            if geometry.is_full(prod, cons) {
                state.bump(csr::DMA_DROPS);
                return false;
            }

            // SAFETY: the window is registered for a live DMA region of at
            // least `geometry.bytes()` bytes and is only removed under this
            // lock; the slot is free because the consumer has published past it.
            unsafe {
                (window.ptr as *mut u8)
                    .add(geometry.slot(prod) * RECORD_SIZE)
                    .cast::<DecisionRecord>()
                    .write_volatile(rec);
            }
            fence(Ordering::Release);
            state.store(csr::PROD_IDX, u32::from(geometry.advance(prod)));
        }

        state.bump(csr::RX_PACKETS);
        state.bump(csr::PARSED_PACKETS);
        state.bump(csr::MESSAGES);
        state.bump(csr::DMA_RECORDS);
        state.bump(if rec.accepted() { csr::ACCEPTS } else { csr::BLOCKS });
        if rec.stale() {
            state.bump(csr::SEQ_GAPS);
        }
        let bin = (rec.latency_cycles() / LAT_HIST_BIN_CYCLES).min(SIM_HIST_BINS - 1) as usize;
        state.bump(csr::LAT_HIST_BASE + bin * 4);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_registers_ignore_software_writes() {
        let (dev, _producer) = SimulatedDevice::new();
        dev.write32(csr::BUILD_ID, 0);
        dev.write32(csr::PROD_IDX, 5);
        dev.write32(csr::ACCEPTS, 9);
        assert_eq!(dev.read32(csr::BUILD_ID), SIM_BUILD_ID);
        assert_eq!(dev.read32(csr::PROD_IDX), 0);
        assert_eq!(dev.read32(csr::ACCEPTS), 0);
    }

    #[test]
    fn push_without_ring_is_refused() {
        let (_dev, mut producer) = SimulatedDevice::new();
        assert!(!producer.push(&DecisionRecord::default()));
        assert_eq!(producer.state().load(csr::DMA_DROPS), 0);
    }

    #[test]
    fn histogram_bins_stay_below_counter_block() {
        assert_eq!(SIM_HIST_BINS, 32);
    }
}
