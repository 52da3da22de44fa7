use crate::adjuster::AdjustedPrice;
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::fmt;

/// The statistic reported for a single instrument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrumentStatistic {
    /// The mean of every adjusted price.
    Mean,

    /// The mean of the adjusted prices dated within one calendar month.
    MonthlyMean { year: i32, month: u32 },

    /// The median of every adjusted price. Only reported once at least two
    /// prices have been seen.
    Median,

    /// The sum of the `n` most recent adjusted prices by date.
    SumOfNewest(usize),
}

impl fmt::Display for InstrumentStatistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentStatistic::Mean => write!(f, "mean"),
            InstrumentStatistic::MonthlyMean { year, month } => {
                write!(f, "mean_{:04}_{:02}", year, month)
            }
            InstrumentStatistic::Median => write!(f, "median"),
            InstrumentStatistic::SumOfNewest(n) => write!(f, "sum_newest_{}", n),
        }
    }
}

/// Maps instruments to the statistic computed for them.
#[derive(Clone, Debug, PartialEq)]
pub struct StatisticRules {
    rules: HashMap<String, InstrumentStatistic>,
    fallback: InstrumentStatistic,
}

impl StatisticRules {
    pub fn new(fallback: InstrumentStatistic) -> Self {
        Self {
            rules: HashMap::new(),
            fallback,
        }
    }

    pub fn with_rule(mut self, instrument: &str, statistic: InstrumentStatistic) -> Self {
        self.rules.insert(instrument.to_string(), statistic);
        self
    }

    pub fn statistic_for(&self, instrument: &str) -> InstrumentStatistic {
        self.rules.get(instrument).copied().unwrap_or(self.fallback)
    }
}

impl Default for StatisticRules {
    /// The calculations used by the legacy price report.
    fn default() -> Self {
        Self::new(InstrumentStatistic::SumOfNewest(10))
            .with_rule("INSTRUMENT1", InstrumentStatistic::Mean)
            .with_rule(
                "INSTRUMENT2",
                InstrumentStatistic::MonthlyMean {
                    year: 2014,
                    month: 11,
                },
            )
            .with_rule("INSTRUMENT3", InstrumentStatistic::Median)
    }
}

/// The computed statistic for one instrument.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InstrumentResult {
    pub instrument: String,
    #[serde(serialize_with = "serialize_display")]
    pub statistic: InstrumentStatistic,
    pub observations: u64,

    /// `None` when the statistic is undefined for what was observed.
    pub value: Option<Decimal>,
}

fn serialize_display<S: serde::Serializer>(
    statistic: &InstrumentStatistic,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(statistic)
}

// Running sums are `None` once they have overflowed, which leaves the
// statistic undefined.
#[derive(Debug)]
enum Tracker {
    Mean {
        count: u64,
        sum: Option<Decimal>,
    },
    MonthlyMean {
        year: i32,
        month: u32,
        count: u64,
        sum: Option<Decimal>,
    },
    Median {
        prices: Vec<Decimal>,
    },
    SumOfNewest {
        limit: usize,
        seq: u64,
        // Min-heap on (date, newest row first) so the oldest price, or the
        // latest-read of several equally old prices, is evicted first.
        newest: BinaryHeap<Reverse<(NaiveDate, Reverse<u64>, Decimal)>>,
    },
}

impl Tracker {
    fn new(statistic: InstrumentStatistic) -> Self {
        match statistic {
            InstrumentStatistic::Mean => Tracker::Mean {
                count: 0,
                sum: Some(Decimal::ZERO),
            },
            InstrumentStatistic::MonthlyMean { year, month } => Tracker::MonthlyMean {
                year,
                month,
                count: 0,
                sum: Some(Decimal::ZERO),
            },
            InstrumentStatistic::Median => Tracker::Median { prices: Vec::new() },
            InstrumentStatistic::SumOfNewest(limit) => Tracker::SumOfNewest {
                limit,
                seq: 0,
                newest: BinaryHeap::with_capacity(limit + 1),
            },
        }
    }

    fn observe(&mut self, date: NaiveDate, price: Decimal) {
        match self {
            Tracker::Mean { count, sum } => {
                *count += 1;
                *sum = sum.and_then(|sum| sum.checked_add(price));
            }
            Tracker::MonthlyMean {
                year,
                month,
                count,
                sum,
            } => {
                if date.year() == *year && date.month() == *month {
                    *count += 1;
                    *sum = sum.and_then(|sum| sum.checked_add(price));
                }
            }
            Tracker::Median { prices } => prices.push(price),
            Tracker::SumOfNewest { limit, seq, newest } => {
                newest.push(Reverse((date, Reverse(*seq), price)));
                *seq += 1;
                if newest.len() > *limit {
                    newest.pop();
                }
            }
        }
    }

    fn value(self) -> Option<Decimal> {
        match self {
            Tracker::Mean { count, sum } | Tracker::MonthlyMean { count, sum, .. } => {
                sum.and_then(|sum| mean(sum, count))
            }
            Tracker::Median { mut prices } => {
                if prices.len() < 2 {
                    return None;
                }
                prices.sort();
                let mid = prices.len() / 2;
                if prices.len() % 2 == 0 {
                    prices[mid - 1]
                        .checked_add(prices[mid])
                        .map(|total| total / Decimal::TWO)
                } else {
                    Some(prices[mid])
                }
            }
            Tracker::SumOfNewest { newest, .. } => newest
                .into_iter()
                .try_fold(Decimal::ZERO, |total, Reverse((_, _, price))| {
                    total.checked_add(price)
                }),
        }
    }
}

fn mean(sum: Decimal, count: u64) -> Option<Decimal> {
    match count {
        0 => None,
        count => Some(sum / Decimal::from(count)),
    }
}

/// Per-instrument statistics over a stream of adjusted prices.
#[derive(Debug, Default)]
pub struct InstrumentBreakdown {
    rules: StatisticRules,
    instruments: BTreeMap<String, (u64, Tracker)>,
}

impl InstrumentBreakdown {
    pub fn new(rules: StatisticRules) -> Self {
        Self {
            rules,
            instruments: BTreeMap::new(),
        }
    }

    pub fn observe(&mut self, adjusted: &AdjustedPrice) {
        let rules = &self.rules;
        let (observations, tracker) = self
            .instruments
            .entry(adjusted.instrument.clone())
            .or_insert_with(|| (0, Tracker::new(rules.statistic_for(&adjusted.instrument))));

        *observations += 1;
        tracker.observe(adjusted.date, adjusted.price);
    }

    /// Returns one result per instrument, ordered by instrument name.
    pub fn finalize(self) -> Vec<InstrumentResult> {
        let rules = self.rules;
        self.instruments
            .into_iter()
            .map(|(instrument, (observations, tracker))| InstrumentResult {
                statistic: rules.statistic_for(&instrument),
                instrument,
                observations,
                value: tracker.value(),
            })
            .collect()
    }
}
