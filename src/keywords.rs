//! The keywords module turns pasted text or a CSV file into keyword records.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use log::{debug, info};

use crate::PastedFormat;
use crate::error::{Error, Result};

const KEYWORD_COLUMN: &str = "keyword";
const CITY_COLUMN: &str = "city";
const PASTED_DELIMITER: char = '|';

/// One keyword to generate a page for, with an optional location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeywordRecord {
    /// The keyword, trimmed and non-empty.
    pub keyword: String,
    /// The city, trimmed; `None` when absent or blank.
    pub city: Option<String>,
}

impl KeywordRecord {
    /// Builds a record, returning `None` when the keyword is blank.
    pub fn new(keyword: &str, city: Option<&str>) -> Option<Self> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return None;
        }

        Some(Self {
            keyword: keyword.to_owned(),
            city: city
                .map(str::trim)
                .filter(|city| !city.is_empty())
                .map(str::to_owned),
        })
    }

    /// The record's own city, else the run-level fallback.
    pub fn effective_city<'a>(&'a self, fallback: Option<&'a str>) -> Option<&'a str> {
        self.city
            .as_deref()
            .or(fallback.map(str::trim).filter(|city| !city.is_empty()))
    }

    /// Human readable label used in logs and warnings.
    pub fn label(&self) -> String {
        match &self.city {
            Some(city) => format!("{} ({city})", self.keyword),
            None => self.keyword.clone(),
        }
    }
}

/// Where a CSV keyword table comes from.
#[derive(Clone, Debug)]
pub enum TabularSource {
    /// A CSV file on disk.
    Path(PathBuf),
    /// CSV content already in memory.
    Bytes(Vec<u8>),
}

/// Every keyword input of a run. A tabular source wins over pasted text.
#[derive(Clone, Debug, Default)]
pub struct KeywordSource {
    pub pasted: Option<String>,
    pub tabular: Option<TabularSource>,
    pub format: PastedFormat,
}

/// Resolves the keyword source into an ordered list of records.
///
/// This never touches the network, so it runs before any model call.
///
/// # Errors
///
/// Returns an error if:
/// * No tabular source is given and the pasted text has no non-blank line
/// * The tabular source yields no rows
/// * The CSV lacks a `keyword` column
/// * The CSV file cannot be read or parsed
pub fn resolve(source: &KeywordSource) -> Result<Vec<KeywordRecord>> {
    let records = match &source.tabular {
        Some(TabularSource::Path(path)) => {
            info!("Reading keywords from {}", path.display());
            read_tabular(File::open(path)?)?
        }
        Some(TabularSource::Bytes(bytes)) => read_tabular(bytes.as_slice())?,
        None => parse_pasted(source.pasted.as_deref().unwrap_or_default(), &source.format),
    };

    if records.is_empty() {
        return Err(Error::EmptyInput);
    }

    info!("Resolved {} keyword records", records.len());
    Ok(records)
}

/// Reads keyword records from CSV content with a header row.
///
/// Header names are matched case-insensitively. Rows with a blank keyword are
/// dropped; a missing `city` column leaves every city empty.
///
/// # Errors
///
/// Returns an error if the `keyword` column is missing or the CSV is invalid.
pub fn read_tabular<R: Read>(reader: R) -> Result<Vec<KeywordRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|header| header.trim_start_matches('\u{feff}').eq_ignore_ascii_case(name))
    };

    let keyword_index = column(KEYWORD_COLUMN).ok_or(Error::MalformedTabular {
        column: KEYWORD_COLUMN,
    })?;
    let city_index = column(CITY_COLUMN);
    if city_index.is_none() {
        debug!("CSV has no '{CITY_COLUMN}' column, cities will be empty");
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let keyword = row.get(keyword_index).unwrap_or_default();
        let city = city_index.and_then(|index| row.get(index));

        match KeywordRecord::new(keyword, city) {
            Some(record) => records.push(record),
            None => debug!("Dropping CSV row without keyword: {row:?}"),
        }
    }

    Ok(records)
}

/// Parses pasted text, one record per non-blank line.
pub fn parse_pasted(text: &str, format: &PastedFormat) -> Vec<KeywordRecord> {
    text.lines()
        .filter_map(|line| match format {
            PastedFormat::Keyword => KeywordRecord::new(line, None),
            PastedFormat::KeywordCity => match line.split_once(PASTED_DELIMITER) {
                Some((keyword, city)) => KeywordRecord::new(keyword, Some(city)),
                None => KeywordRecord::new(line, None),
            },
        })
        .collect()
}
