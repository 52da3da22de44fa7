use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::string::FromUtf8Error;
use thiserror::Error;

/// A problem with a single CSV row. Rows that fail validation are skipped and
/// counted; they never abort a run.
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("line {line}: expected 3 fields (instrument, date, price) but found {fields}")]
    Malformed { line: u64, fields: usize },

    #[error("line {line}: unable to parse date {value:?}")]
    DateParse { line: u64, value: String },

    #[error("line {line}: {date} is not a business day")]
    NonBusinessDay { line: u64, date: NaiveDate },

    #[error("line {line}: unable to parse price {value:?}")]
    PriceParse { line: u64, value: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open multiplier database {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("multiplier query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("failed to read multiplier seed {path}: {source}")]
    Seed { path: PathBuf, source: csv::Error },

    #[error("no multiplier stored for instrument {0}")]
    MultiplierNotFound(String),

    #[error("multiplier for instrument {instrument} is not a finite decimal: {value}")]
    InvalidMultiplier { instrument: String, value: f64 },
}

/// Adding a price to a running total would exceed the range of `Decimal`.
#[derive(Debug, Error, PartialEq)]
#[error("running sum {sum} overflowed adding {price}")]
pub struct SumOverflow {
    pub sum: Decimal,
    pub price: Decimal,
}

#[derive(Debug, Error)]
pub enum AdjustError {
    #[error("adjusting {instrument} overflowed: {price} * {factor}")]
    Overflow {
        instrument: String,
        price: Decimal,
        factor: Decimal,
    },

    #[error("stored multiplier for {instrument} is not a usable decimal: {value}")]
    InvalidMultiplier { instrument: String, value: f64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("failed to read holiday calendar {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("holiday calendar {path}, line {line}: unable to parse date {value:?}")]
    InvalidDate {
        path: PathBuf,
        line: usize,
        value: String,
    },
}

/// Errors that terminate a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to open input file {path}: {source}")]
    Input { path: PathBuf, source: csv::Error },

    #[error("failed to read input file {path}: {source}")]
    Read { path: PathBuf, source: csv::Error },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Calendar(#[from] CalendarError),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write csv report: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize report record: {0}")]
    Serialize(#[from] csv::Error),

    #[error("failed to encode csv report: {0}")]
    Encoding(#[from] FromUtf8Error),
}
