use std::fs;
use t2t_core::price::FixedPrice;
use t2t_core::symbol::SymbolKey;
use t2t_hw::DeviceHandle;
use t2t_io::loader::{self, TableSink};
use t2t_io::{LoadError, PriceEntry, SymbolEntry};

#[derive(Debug, PartialEq)]
enum Call {
    Stage(String, u16),
    Commit,
    Price(u16, u32),
}

#[derive(Default)]
struct Recorder(Vec<Call>);

impl TableSink for Recorder {
    fn stage_symbol(&mut self, name: &str, index: u16) -> t2t_hw::Result<()> {
        t2t_core::symbol::check_index(index)?;
        self.0.push(Call::Stage(name.to_owned(), index));
        Ok(())
    }

    fn commit_symbols(&mut self) {
        self.0.push(Call::Commit);
    }

    fn reference_price(&mut self, index: u16, raw_price: u32) -> t2t_hw::Result<()> {
        t2t_core::symbol::check_index(index)?;
        self.0.push(Call::Price(index, raw_price));
        Ok(())
    }
}

#[test]
fn symbols_are_staged_in_file_order_then_committed_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("symbols.csv");
    fs::write(&path, "# table\nMSFT,1\nAAPL 0\nHUGE,2000\nNVDA,6\n").unwrap();

    let mut sink = Recorder::default();
    let summary = loader::load_symbols_file(&mut sink, &path).unwrap();
    assert_eq!(summary.loaded, 3);
    assert_eq!(summary.skipped, 1);
    assert_eq!(
        sink.0,
        vec![
            Call::Stage("MSFT".into(), 1),
            Call::Stage("AAPL".into(), 0),
            Call::Stage("NVDA".into(), 6),
            Call::Commit,
        ]
    );
}

#[test]
fn malformed_file_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("symbols.csv");
    fs::write(&path, "AAPL,0\nthis is not a line\n").unwrap();

    let mut sink = Recorder::default();
    let err = loader::load_symbols_file(&mut sink, &path).unwrap_err();
    assert!(matches!(err, LoadError::Parse { line: 2, .. }));
    assert!(sink.0.is_empty());
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = Recorder::default();
    let err = loader::load_prices_file(&mut sink, dir.path().join("absent.csv")).unwrap_err();
    assert!(matches!(err, LoadError::Io { .. }));
}

#[test]
fn prices_reach_the_simulated_device() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prices.csv");
    fs::write(&path, "0,195.50\n1 425.00\n").unwrap();

    let (mut dev, producer) = DeviceHandle::simulated();
    let summary = loader::load_prices_file(&mut dev, &path).unwrap();
    assert_eq!(summary.loaded, 2);
    assert_eq!(producer.state().reference_price(0), 1_955_000);
    assert_eq!(producer.state().reference_price(1), 4_250_000);
}

#[test]
fn symbols_reach_the_active_table_of_the_simulated_device() {
    let (mut dev, producer) = DeviceHandle::simulated();
    let entries = vec![
        SymbolEntry {
            name: "AAPL".into(),
            index: 0,
        },
        SymbolEntry {
            name: "GOOGL".into(),
            index: 3,
        },
    ];
    loader::apply_symbols(&mut dev, &entries).unwrap();
    assert_eq!(producer.state().active_symbol(0), Some(SymbolKey::new("AAPL")));
    assert_eq!(producer.state().active_symbol(3), Some(SymbolKey::new("GOOGL")));
}

#[test]
fn written_files_load_back() {
    let dir = tempfile::tempdir().unwrap();
    let symbols = dir.path().join("symbols.csv");
    let prices = dir.path().join("prices.csv");

    let sym_entries = vec![
        SymbolEntry {
            name: "AMZN".into(),
            index: 2,
        },
        SymbolEntry {
            name: "TSLA".into(),
            index: 7,
        },
    ];
    let price_entries = vec![PriceEntry {
        index: 7,
        price: FixedPrice::from_raw(2_500_000),
    }];
    loader::write_symbols_file(&symbols, &sym_entries).unwrap();
    loader::write_prices_file(&prices, &price_entries).unwrap();

    let mut sink = Recorder::default();
    loader::load_symbols_file(&mut sink, &symbols).unwrap();
    loader::load_prices_file(&mut sink, &prices).unwrap();
    assert_eq!(
        sink.0,
        vec![
            Call::Stage("AMZN".into(), 2),
            Call::Stage("TSLA".into(), 7),
            Call::Commit,
            Call::Price(7, 2_500_000),
        ]
    );
}
