use crate::errors::StoreError;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS instrument_multipliers (
    instrument_id TEXT PRIMARY KEY,
    multiplier REAL
)";

/// A stored multiplier for one instrument.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Multiplier {
    #[serde(rename = "instrument_id")]
    pub instrument: String,
    #[serde(rename = "multiplier")]
    pub factor: Decimal,
}

/// The multipliers written to the table when it is overwritten.
#[derive(Clone, Debug, PartialEq)]
pub struct Seed {
    multipliers: Vec<Multiplier>,
}

impl Seed {
    pub fn new(multipliers: Vec<Multiplier>) -> Self {
        Self { multipliers }
    }

    /// Reads a seed from a CSV file with an `instrument_id,multiplier` header.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let seed_err = |source| StoreError::Seed {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(seed_err)?;

        let multipliers = reader
            .deserialize()
            .collect::<Result<Vec<Multiplier>, csv::Error>>()
            .map_err(seed_err)?;

        Ok(Self { multipliers })
    }

    pub fn multipliers(&self) -> &[Multiplier] {
        &self.multipliers
    }
}

impl Default for Seed {
    /// The single example multiplier shipped with the legacy price tool.
    fn default() -> Self {
        Self::new(vec![Multiplier {
            instrument: "INSTRUMENT1".to_string(),
            factor: Decimal::new(15, 1),
        }])
    }
}

/// Lookup table of per-instrument price multipliers backed by SQLite.
///
/// The store owns its connection for the duration of a run. Dropping the
/// store closes the connection; use [`MultiplierStore::close`] to observe any
/// error raised while closing.
pub struct MultiplierStore {
    conn: Connection,
}

impl MultiplierStore {
    /// Opens the database at `path` and prepares the multiplier table.
    ///
    /// With `overwrite` set the table is dropped, recreated and populated from
    /// `seed`. Otherwise an existing table is left untouched, and a missing
    /// table is created empty.
    pub fn setup<P: AsRef<Path>>(path: P, overwrite: bool, seed: &Seed) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let mut store = Self { conn };
        store.prepare(overwrite, seed)?;

        info!(
            path = %path.display(),
            overwrite,
            multipliers = store.len()?,
            "multiplier store ready"
        );
        Ok(store)
    }

    /// Opens an empty, private in-memory store.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute(CREATE_TABLE, [])?;
        Ok(Self { conn })
    }

    fn prepare(&mut self, overwrite: bool, seed: &Seed) -> Result<(), StoreError> {
        if !overwrite {
            self.conn.execute(CREATE_TABLE, [])?;
            return Ok(());
        }

        // A failed seed must leave the previous table in place.
        let tx = self.conn.transaction()?;
        tx.execute("DROP TABLE IF EXISTS instrument_multipliers", [])?;
        tx.execute(CREATE_TABLE, [])?;
        for multiplier in seed.multipliers() {
            upsert(&tx, &multiplier.instrument, multiplier.factor)?;
        }
        tx.commit()?;

        debug!(seeded = seed.multipliers().len(), "multiplier table overwritten");
        Ok(())
    }

    /// Returns the stored multiplier for `instrument`. A row holding NULL is
    /// treated the same as a missing row.
    pub fn get_multiplier(&self, instrument: &str) -> Result<Decimal, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT multiplier FROM instrument_multipliers WHERE instrument_id = ?1")?;

        let value: f64 = stmt
            .query_row(params![instrument], |row| row.get::<_, Option<f64>>(0))
            .optional()?
            .flatten()
            .ok_or_else(|| StoreError::MultiplierNotFound(instrument.to_string()))?;

        Decimal::from_f64(value).ok_or_else(|| StoreError::InvalidMultiplier {
            instrument: instrument.to_string(),
            value,
        })
    }

    /// Inserts or replaces the multiplier for `instrument`.
    pub fn set_multiplier(&self, instrument: &str, factor: Decimal) -> Result<(), StoreError> {
        upsert(&self.conn, instrument, factor)
    }

    /// Returns the number of stored multipliers.
    pub fn len(&self) -> Result<usize, StoreError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM instrument_multipliers", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Closes the underlying connection.
    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, err)| StoreError::Query(err))
    }
}

fn upsert(conn: &Connection, instrument: &str, factor: Decimal) -> Result<(), StoreError> {
    let value = factor
        .to_f64()
        .filter(|value| value.is_finite())
        .ok_or_else(|| StoreError::InvalidMultiplier {
            instrument: instrument.to_string(),
            value: f64::NAN,
        })?;

    conn.execute(
        "INSERT OR REPLACE INTO instrument_multipliers (instrument_id, multiplier) VALUES (?1, ?2)",
        params![instrument, value],
    )?;
    Ok(())
}
