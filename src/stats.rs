use crate::errors::SumOverflow;
use rust_decimal::Decimal;

/// Running aggregates over adjusted prices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Statistics {
    count: u64,
    sum: Decimal,
    min: Option<Decimal>,
    max: Option<Decimal>,
}

/// The final statistics of a run.
///
/// When no prices were observed `empty` is set, `count` and `sum` are zero and
/// `mean`, `min` and `max` are `None`.
#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    pub count: u64,
    pub sum: Decimal,
    pub mean: Option<Decimal>,
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
    pub empty: bool,
}

impl Statistics {
    /// Folds one price into the aggregates. A price that would overflow the
    /// running sum is rejected and leaves the aggregates unchanged.
    pub fn observe(&mut self, price: Decimal) -> Result<(), SumOverflow> {
        self.sum = self.sum.checked_add(price).ok_or(SumOverflow {
            sum: self.sum,
            price,
        })?;
        self.count += 1;
        self.min = Some(self.min.map_or(price, |min| min.min(price)));
        self.max = Some(self.max.map_or(price, |max| max.max(price)));
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn finalize(&self) -> Summary {
        let mean = match self.count {
            0 => None,
            count => Some(self.sum / Decimal::from(count)),
        };

        Summary {
            count: self.count,
            sum: self.sum,
            mean,
            min: self.min,
            max: self.max,
            empty: self.count == 0,
        }
    }
}
