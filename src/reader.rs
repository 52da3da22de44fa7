use csv::{Reader, StringRecord, StringRecordsIntoIter, Trim};
use std::fs::File;
use std::path::Path;

/// A single unvalidated row of the price file.
#[derive(Clone, Debug, PartialEq)]
pub struct RawRow {
    /// The 1-based physical line number the row started on.
    pub line: u64,
    pub record: StringRecord,
}

/// A lazy, single-pass stream of rows from a price file.
///
/// The first line is treated as a header and is never yielded. Rows are read
/// one at a time through the csv crate's internal buffer, so the file is never
/// held in memory. Rows with the wrong number of fields are yielded as-is;
/// rejecting them is the validator's job.
///
/// Completely empty lines carry no record and are never yielded, so they are
/// not counted as rows. A line holding only whitespace is yielded as a single
/// empty field.
pub struct PriceRows {
    rows: StringRecordsIntoIter<File>,
}

impl PriceRows {
    /// Opens the price file at `path`, failing if it cannot be read.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, csv::Error> {
        let reader = Self::builder().from_path(path)?;
        Ok(Self::from_reader(reader))
    }

    fn builder() -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder.flexible(true).has_headers(true).trim(Trim::All);
        builder
    }

    fn from_reader(reader: Reader<File>) -> Self {
        Self {
            rows: reader.into_records(),
        }
    }
}

impl Iterator for PriceRows {
    type Item = Result<RawRow, csv::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.rows.next()?;
        Some(record.map(|record| RawRow {
            line: record.position().map(|pos| pos.line()).unwrap_or_default(),
            record,
        }))
    }
}
