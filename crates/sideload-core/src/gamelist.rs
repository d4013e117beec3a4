//! Parsing of the mirror's game list
//!
//! The list is a `;`-separated text file with one header line:
//!
//! ```text
//! Game Name;Release Name;Package Name;Version Code;Last Updated;Size (MB);Downloads;Rating;Rating Count
//! Demo;demo-1;com.demo.app;42;2025-01-02 10:00 UTC;512;12.5;4.2;130
//! ```

use crate::entry::CatalogEntry;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const COLUMNS: usize = 9;

#[derive(Error, Debug)]
pub enum GameListError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: expected {expected} columns, found {found}")]
    MissingColumns {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: invalid {column} value {value:?}")]
    InvalidValue {
        line: usize,
        column: &'static str,
        value: String,
    },
}

/// Parse game list text into catalog entries
pub fn parse_game_list(text: &str) -> Result<Vec<CatalogEntry>, GameListError> {
    let mut entries = Vec::new();

    // Line numbers are 1-based and include the header
    for (index, line) in text.lines().enumerate().skip(1) {
        let line_no = index + 1;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(';').collect();
        if fields.len() < COLUMNS {
            return Err(GameListError::MissingColumns {
                line: line_no,
                expected: COLUMNS,
                found: fields.len(),
            });
        }

        entries.push(CatalogEntry {
            game_name: fields[0].to_string(),
            release_name: fields[1].to_string(),
            package_name: fields[2].to_string(),
            version_code: parse_field(fields[3], line_no, "version code")?,
            last_updated: fields[4].to_string(),
            size_mb: parse_field(fields[5], line_no, "size")?,
            downloads: parse_field(fields[6], line_no, "downloads")?,
            rating: parse_field(fields[7], line_no, "rating")?,
            rating_count: parse_field(fields[8], line_no, "rating count")?,
        });
    }

    Ok(entries)
}

/// Read and parse a game list file
pub fn load_game_list(path: &Path) -> Result<Vec<CatalogEntry>, GameListError> {
    let text = std::fs::read_to_string(path)?;
    parse_game_list(&text)
}

fn parse_field<T: FromStr>(
    value: &str,
    line: usize,
    column: &'static str,
) -> Result<T, GameListError> {
    value
        .trim()
        .parse()
        .map_err(|_| GameListError::InvalidValue {
            line,
            column,
            value: value.to_string(),
        })
}
