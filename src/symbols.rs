use std::{fs, io, path::Path};

use thiserror::Error;

/// Used when no symbols are configured.
pub const DEFAULT_SYMBOLS: [&str; 3] = ["AAPL", "MSFT", "GOOGL"];

#[derive(Error, Debug)]
pub enum SymbolsError {
    #[error("symbols file not found: {0}")]
    FileNotFound(String),
    #[error("could not read symbols file {0}: {1}")]
    CouldNotRead(String, io::Error),
    #[error("symbols file {0} lists no symbols")]
    EmptySymbolFile(String),
}

/// Splits a comma or newline separated list into trimmed, upper-cased,
/// distinct symbols, keeping the first occurrence of each. Lines starting
/// with `#` are ignored.
pub fn parse_symbol_list(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for line in raw.lines().map(str::trim) {
        if line.starts_with('#') {
            continue;
        }
        for symbol in line.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let symbol = symbol.to_uppercase();
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
    }
    symbols
}

/// Reads symbols from a file, one per line (commas also accepted).
pub fn read_symbols_from_file(path: &Path) -> Result<Vec<String>, SymbolsError> {
    let shown = path.display().to_string();
    if !path.exists() {
        return Err(SymbolsError::FileNotFound(shown));
    }

    let contents = fs::read_to_string(path).map_err(|e| SymbolsError::CouldNotRead(shown.clone(), e))?;
    let symbols = parse_symbol_list(&contents);
    if symbols.is_empty() {
        return Err(SymbolsError::EmptySymbolFile(shown));
    }
    Ok(symbols)
}

pub fn default_symbols() -> Vec<String> {
    DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect()
}
