//! Text table files for the T2T symbol and reference-price tables.
//!
//! Symbol files map tickers to symbol-table slots, one `SYMBOL,INDEX` or
//! `SYMBOL INDEX` per line. Price files give the reference price of a slot,
//! one `INDEX,PRICE` or `INDEX PRICE` per line with a decimal price. Blank
//! lines and lines starting with `#` are ignored in both.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Feeding parsed tables to a device.
///
/// Entries are applied in file order. Symbol files end with exactly one
/// commit, so the data path switches from the old table to the complete new
/// one in a single step.
pub mod loader;

/// Line grammar of symbol and price files.
///
/// Whole files are parsed before anything is written to a device; one
/// malformed line rejects the file.
pub mod parser;

pub use loader::{LoadSummary, TableSink};
pub use parser::{PriceEntry, SymbolEntry};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot access {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("line {line}: {reason}: {text:?}")]
    Parse {
        line: usize,
        text: String,
        reason: &'static str,
    },

    #[error(transparent)]
    Device(#[from] t2t_hw::DeviceError),
}
