use crate::LoadError;
use crate::parser::{self, PriceEntry, SymbolEntry};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use t2t_common::SYMBOL_KEY_LEN;
use t2t_hw::{DeviceError, DeviceHandle};
use tracing::{info, warn};

/// Destination of table updates.
pub trait TableSink {
    fn stage_symbol(&mut self, name: &str, index: u16) -> t2t_hw::Result<()>;

    fn commit_symbols(&mut self);

    fn reference_price(&mut self, index: u16, raw_price: u32) -> t2t_hw::Result<()>;
}

impl TableSink for DeviceHandle {
    fn stage_symbol(&mut self, name: &str, index: u16) -> t2t_hw::Result<()> {
        self.load_symbol(name, index)
    }

    fn commit_symbols(&mut self) {
        DeviceHandle::commit_symbols(self)
    }

    fn reference_price(&mut self, index: u16, raw_price: u32) -> t2t_hw::Result<()> {
        self.set_reference_price(index, raw_price)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: usize,
    /// Entries refused by the device protocol, e.g. an index past the table.
    pub skipped: usize,
}

fn tally(
    result: t2t_hw::Result<()>,
    summary: &mut LoadSummary,
    what: &str,
    index: u16,
) -> Result<(), LoadError> {
    match result {
        Ok(()) => summary.loaded += 1,
        Err(DeviceError::Protocol(violation)) => {
            warn!(index, error = %violation, "skipping {what}");
            summary.skipped += 1;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Stages every entry in order, then commits once.
pub fn apply_symbols<S: TableSink + ?Sized>(
    sink: &mut S,
    entries: &[SymbolEntry],
) -> Result<LoadSummary, LoadError> {
    let mut summary = LoadSummary::default();
    for entry in entries {
        if entry.name.len() > SYMBOL_KEY_LEN {
            warn!(symbol = %entry.name, "symbol longer than {SYMBOL_KEY_LEN} bytes is truncated");
        }
        let result = sink.stage_symbol(&entry.name, entry.index);
        tally(result, &mut summary, "symbol", entry.index)?;
    }
    sink.commit_symbols();
    Ok(summary)
}

pub fn apply_prices<S: TableSink + ?Sized>(
    sink: &mut S,
    entries: &[PriceEntry],
) -> Result<LoadSummary, LoadError> {
    let mut summary = LoadSummary::default();
    for entry in entries {
        let result = sink.reference_price(entry.index, entry.price.raw());
        tally(result, &mut summary, "reference price", entry.index)?;
    }
    Ok(summary)
}

fn read(path: &Path) -> Result<String, LoadError> {
    fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses a symbol file and loads it.
///
/// A malformed line rejects the whole file before the device is touched.
pub fn load_symbols_file<S: TableSink + ?Sized>(
    sink: &mut S,
    path: impl AsRef<Path>,
) -> Result<LoadSummary, LoadError> {
    let path = path.as_ref();
    let entries = parser::parse_symbols(&read(path)?)?;
    let summary = apply_symbols(sink, &entries)?;
    info!(path = %path.display(), loaded = summary.loaded, skipped = summary.skipped, "symbol file loaded");
    Ok(summary)
}

pub fn load_prices_file<S: TableSink + ?Sized>(
    sink: &mut S,
    path: impl AsRef<Path>,
) -> Result<LoadSummary, LoadError> {
    let path = path.as_ref();
    let entries = parser::parse_prices(&read(path)?)?;
    let summary = apply_prices(sink, &entries)?;
    info!(path = %path.display(), loaded = summary.loaded, skipped = summary.skipped, "price file loaded");
    Ok(summary)
}

fn create(path: &Path) -> Result<BufWriter<File>, LoadError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn write_lines(
    path: &Path,
    header: &str,
    lines: impl Iterator<Item = String>,
) -> Result<(), LoadError> {
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut out = create(path)?;
    writeln!(out, "{header}").map_err(io_err)?;
    for line in lines {
        writeln!(out, "{line}").map_err(io_err)?;
    }
    out.flush().map_err(io_err)
}

pub fn write_symbols_file(path: impl AsRef<Path>, entries: &[SymbolEntry]) -> Result<(), LoadError> {
    write_lines(
        path.as_ref(),
        "# T2T symbol table\n# SYMBOL,INDEX",
        entries.iter().map(|e| format!("{},{}", e.name, e.index)),
    )
}

pub fn write_prices_file(path: impl AsRef<Path>, entries: &[PriceEntry]) -> Result<(), LoadError> {
    write_lines(
        path.as_ref(),
        "# T2T reference prices\n# INDEX,PRICE",
        entries.iter().map(|e| format!("{},{}", e.index, e.price)),
    )
}
