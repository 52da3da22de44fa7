use crate::errors::{AdjustError, StoreError};
use crate::store::MultiplierStore;
use crate::validator::PriceRecord;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

/// A price after its instrument multiplier has been applied.
#[derive(Clone, Debug, PartialEq)]
pub struct AdjustedPrice {
    pub instrument: String,
    pub date: NaiveDate,
    pub price: Decimal,

    /// Set when no multiplier was stored and the default was applied.
    pub defaulted: bool,
}

/// Applies stored multipliers to validated price records.
///
/// Instruments without a stored multiplier are adjusted by
/// [`Adjuster::DEFAULT_MULTIPLIER`], leaving their price unchanged. A stored
/// multiplier that cannot be represented as a decimal fails only the record
/// being adjusted.
pub struct Adjuster<'a> {
    store: &'a MultiplierStore,
}

impl<'a> Adjuster<'a> {
    pub const DEFAULT_MULTIPLIER: Decimal = Decimal::ONE;

    pub fn new(store: &'a MultiplierStore) -> Self {
        Self { store }
    }

    pub fn adjust(&self, record: &PriceRecord) -> Result<AdjustedPrice, AdjustError> {
        let (factor, defaulted) = match self.store.get_multiplier(&record.instrument) {
            Ok(factor) => (factor, false),
            Err(StoreError::MultiplierNotFound(_)) => {
                debug!(
                    instrument = %record.instrument,
                    "no stored multiplier, applying default"
                );
                (Self::DEFAULT_MULTIPLIER, true)
            }
            Err(StoreError::InvalidMultiplier { instrument, value }) => {
                return Err(AdjustError::InvalidMultiplier { instrument, value })
            }
            Err(err) => return Err(err.into()),
        };

        let price = record
            .price
            .checked_mul(factor)
            .ok_or_else(|| AdjustError::Overflow {
                instrument: record.instrument.clone(),
                price: record.price,
                factor,
            })?;

        Ok(AdjustedPrice {
            instrument: record.instrument.clone(),
            date: record.date,
            price,
            defaulted,
        })
    }
}
