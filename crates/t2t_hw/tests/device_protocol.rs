use rand::Rng;
use t2t_common::{csr, ctrl, symtab};
use t2t_core::ProtocolViolation;
use t2t_core::config::{DeviceConfig, MacAddr, RiskProfile};
use t2t_core::record::{DecisionRecord, RejectReason, flags};
use t2t_core::symbol::SymbolKey;
use t2t_hw::platform::sim::SIM_BUILD_ID;
use t2t_hw::{BackendKind, DeviceError, DeviceHandle, DeviceState};

#[test]
fn configuration_lands_in_registers_with_ctrl_last() {
    let (dev, _producer) = DeviceHandle::simulated();
    let cfg = DeviceConfig {
        price_band_bps: 500,
        token_rate: 1000,
        token_max: 10_000,
        position_limit: 1_000_000,
        enable: true,
        ..Default::default()
    };
    dev.configure(&cfg);

    assert_eq!(dev.read_reg(csr::PRICE_BAND_BPS).unwrap(), 500);
    assert_eq!(dev.read_reg(csr::TOKEN_RATE).unwrap(), 10_000 << 16 | 1000);
    assert_eq!(dev.read_reg(csr::POSITION_LIMIT).unwrap(), 1_000_000);
    assert_ne!(dev.read_reg(csr::CTRL).unwrap() & ctrl::ENABLE, 0);
    assert_eq!(dev.state(), DeviceState::Enabled);
    assert_eq!(dev.read_config(), cfg);

    let writes = cfg.register_writes();
    assert_eq!(writes.last().map(|w| w.0), Some(csr::CTRL));
}

#[test]
fn random_configurations_survive_the_register_file() {
    let (dev, _producer) = DeviceHandle::simulated();
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let cfg = DeviceConfig {
            enable: rng.r#gen(),
            promiscuous: rng.r#gen(),
            mcast_enable: rng.r#gen(),
            mcast_mac: MacAddr::new(rng.r#gen()),
            check_ip_csum: rng.r#gen(),
            expected_port: rng.r#gen(),
            price_band_bps: rng.r#gen(),
            token_rate: rng.r#gen(),
            token_max: rng.r#gen(),
            position_limit: rng.r#gen(),
            stale_usec: rng.r#gen(),
            seq_gap_thr: rng.r#gen(),
            kill_switch: rng.r#gen(),
            expected_seq: rng.r#gen(),
            seq_check_en: rng.r#gen(),
            msix_enable: rng.r#gen(),
            msix_threshold: rng.r#gen(),
        };
        dev.configure(&cfg);
        assert_eq!(dev.read_config(), cfg);
    }
}

#[test]
fn risk_profile_reaches_hardware() {
    let (dev, _producer) = DeviceHandle::simulated();
    let mut cfg = DeviceConfig::default();
    RiskProfile::Conservative.apply(&mut cfg);
    dev.configure(&cfg);
    let (band, rate, limit, _) = RiskProfile::Conservative.limits();
    assert_eq!(dev.read_config().price_band_bps, band);
    assert_eq!(dev.read_config().token_rate, rate);
    assert_eq!(dev.read_config().position_limit, limit);
}

#[test]
fn staged_symbols_are_invisible_until_commit() {
    let (dev, producer) = DeviceHandle::simulated();
    let state = producer.state();

    dev.load_symbol("AAPL", 0).unwrap();
    dev.load_symbol("MSFT", 1).unwrap();
    assert_eq!(dev.read_reg(csr::SYMTAB_KEY_LO).unwrap(), 0x5446_534D);
    assert_eq!(state.staged_symbol(0), Some(SymbolKey::new("AAPL")));
    assert_eq!(state.active_symbol(0), None);

    dev.commit_symbols();
    assert_eq!(state.active_symbol(0), Some(SymbolKey::new("AAPL")));
    assert_eq!(state.active_symbol(1), Some(SymbolKey::new("MSFT")));
    assert_eq!(dev.read_reg(csr::SYMTAB_COMMIT).unwrap(), symtab::COMMIT);
}

#[test]
fn symbol_key_words_are_little_endian_and_space_padded() {
    let (dev, _producer) = DeviceHandle::simulated();
    dev.load_symbol("AAPL", 7).unwrap();
    assert_eq!(dev.read_reg(csr::SYMTAB_KEY_LO).unwrap(), 0x4C50_4141);
    assert_eq!(dev.read_reg(csr::SYMTAB_KEY_HI).unwrap(), 0x2020_2020);
    assert_eq!(dev.read_reg(csr::SYMTAB_INDEX).unwrap(), 7);
    assert_eq!(dev.read_reg(csr::SYMTAB_COMMIT).unwrap(), symtab::STAGE);
}

#[test]
fn out_of_range_index_never_reaches_hardware() {
    let (dev, producer) = DeviceHandle::simulated();
    let err = dev.load_symbol("TSLA", 1024).err();
    assert!(matches!(
        err,
        Some(DeviceError::Protocol(ProtocolViolation::SymbolIndexOutOfRange { index: 1024 }))
    ));
    assert_eq!(dev.read_reg(csr::SYMTAB_KEY_LO).unwrap(), 0);
    assert_eq!(dev.read_reg(csr::SYMTAB_COMMIT).unwrap(), 0);

    assert!(dev.set_reference_price(4096, 1).is_err());
    assert_eq!(dev.read_reg(csr::REF_PRICE_ADDR).unwrap(), 0);
    assert_eq!(producer.state().reference_price(0), 0);
}

#[test]
fn reference_price_is_written_address_then_data() {
    let (dev, producer) = DeviceHandle::simulated();
    dev.set_reference_price(3, 1_502_500).unwrap();
    dev.set_reference_price(1023, 42).unwrap();
    assert_eq!(producer.state().reference_price(3), 1_502_500);
    assert_eq!(producer.state().reference_price(1023), 42);
    assert_eq!(dev.read_reg(csr::REF_PRICE_ADDR).unwrap(), 1023);
}

#[test]
fn statistics_mirror_hardware_counters() {
    let (dev, producer) = DeviceHandle::simulated();
    let state = producer.state();
    state.set_counter(csr::RX_PACKETS, 42);
    state.set_counter(csr::RX_BYTES, 4_200);
    state.set_counter(csr::CRC_BAD, 1);
    state.set_counter(csr::BANK_CONFLICTS, 3);

    let stats = dev.read_statistics();
    assert_eq!(stats.rx_packets, 42);
    assert_eq!(stats.rx_bytes, 4_200);
    assert_eq!(stats.rx_crc_errors, 1);
    assert_eq!(stats.bank_conflicts, 3);
    assert_eq!(stats.risk_accepts, 0);

    // Counters are not reset by reading.
    assert_eq!(dev.read_statistics(), stats);
}

#[test]
fn kill_switch_overrides_enable_and_blocks_decisions() {
    let (mut dev, mut producer) = DeviceHandle::simulated();
    dev.init_dma_ring(16).unwrap();
    dev.configure(&DeviceConfig {
        enable: true,
        ..Default::default()
    });
    dev.set_kill_switch(true);
    assert_eq!(dev.state(), DeviceState::KillActive);

    assert!(producer.push(&DecisionRecord {
        flags: flags::ACCEPTED,
        ..Default::default()
    }));
    let mut ring = dev.ring().unwrap();
    let mut got = Vec::new();
    ring.poll(|r| got.push(*r));
    assert!(!got[0].accepted());
    assert!(got[0].rejection_reasons().any(|r| r == RejectReason::KillSwitch));
    drop(ring);

    dev.set_kill_switch(false);
    assert_eq!(dev.state(), DeviceState::Enabled);
    assert_eq!(dev.read_statistics().risk_rejects, 1);
}

#[test]
fn enable_guard_disables_on_every_exit() {
    let (dev, _producer) = DeviceHandle::simulated();
    assert_eq!(dev.state(), DeviceState::Open);
    dev.configure(&DeviceConfig::default());
    assert_eq!(dev.state(), DeviceState::Configured);

    let run = |fail: bool| -> Result<(), &'static str> {
        let _guard = dev.enable_scoped();
        assert_eq!(dev.state(), DeviceState::Enabled);
        if fail {
            return Err("stopped early");
        }
        Ok(())
    };
    assert!(run(true).is_err());
    assert_eq!(dev.state(), DeviceState::Configured);
    assert!(run(false).is_ok());
    assert_eq!(dev.state(), DeviceState::Configured);
}

#[test]
fn set_enable_preserves_other_ctrl_bits() {
    let (dev, _producer) = DeviceHandle::simulated();
    dev.configure(&DeviceConfig {
        promiscuous: true,
        ..Default::default()
    });
    let before = dev.read_reg(csr::CTRL).unwrap();
    dev.set_enable(true);
    assert_eq!(dev.read_reg(csr::CTRL).unwrap(), before | ctrl::ENABLE);
    dev.set_enable(false);
    assert_eq!(dev.read_reg(csr::CTRL).unwrap(), before);
}

#[test]
fn raw_register_access_is_bounds_checked() {
    let (dev, _producer) = DeviceHandle::simulated();
    assert_eq!(dev.backend(), BackendKind::Simulated);
    assert_eq!(dev.build_id(), SIM_BUILD_ID);
    assert_eq!(dev.read_reg(csr::BUILD_ID).unwrap(), SIM_BUILD_ID);

    assert!(matches!(
        dev.read_reg(0x1000),
        Err(DeviceError::Protocol(ProtocolViolation::RegisterOutOfRange { offset: 0x1000 }))
    ));
    assert!(matches!(
        dev.write_reg(0x006, 1),
        Err(DeviceError::Protocol(ProtocolViolation::UnalignedRegister { offset: 0x006 }))
    ));
    dev.write_reg(csr::STALE_USEC, 77).unwrap();
    assert_eq!(dev.read_reg(csr::STALE_USEC).unwrap(), 77);
}

#[test]
fn latency_histogram_counts_records_by_four_cycle_bins() {
    let (mut dev, mut producer) = DeviceHandle::simulated();
    dev.init_dma_ring(64).unwrap();
    for i in 0..10u64 {
        producer.push(&DecisionRecord {
            ts_ingress: 100,
            ts_decision: 100 + 9 + (i % 2) * 4,
            ..Default::default()
        });
    }
    let hist = dev.read_latency_histogram();
    assert_eq!(hist.bins()[2], 5);
    assert_eq!(hist.bins()[3], 5);
    assert_eq!(hist.bins()[..32].iter().sum::<u32>(), 10);
}

#[test]
fn bar_access_on_simulated_device() {
    let (mut dev, _producer) = DeviceHandle::simulated();
    assert_eq!(dev.read_bar(0, csr::BUILD_ID).unwrap(), SIM_BUILD_ID);
    assert!(dev.read_bar(2, 0).is_err());
    let regions = dev.bar_regions();
    assert_eq!(regions.len(), 1);
    assert!(regions[0].mapped);
}
