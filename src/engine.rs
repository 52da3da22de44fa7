use crate::adjuster::Adjuster;
use crate::breakdown::{InstrumentBreakdown, InstrumentResult, StatisticRules};
use crate::errors::{AdjustError, PipelineError, RecordError, ReportError};
use crate::reader::PriceRows;
use crate::stats::{Statistics, Summary};
use crate::store::{MultiplierStore, Seed};
use crate::validator::{BusinessCalendar, Validator};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Everything a single pipeline run needs to know.
#[derive(Clone, Debug, PartialEq)]
pub struct RunConfig {
    /// The CSV price file to process.
    pub input: PathBuf,

    /// The SQLite database holding instrument multipliers.
    pub database: PathBuf,

    /// Drop and repopulate the multiplier table before processing.
    pub overwrite: bool,

    /// Multipliers written on overwrite. The built-in seed is used when unset.
    pub seed: Option<PathBuf>,

    /// A file of holiday dates that are not business days.
    pub holidays: Option<PathBuf>,
}

impl RunConfig {
    pub fn new<I: Into<PathBuf>, D: Into<PathBuf>>(input: I, database: D) -> Self {
        Self {
            input: input.into(),
            database: database.into(),
            overwrite: false,
            seed: None,
            holidays: None,
        }
    }
}

/// The stages a run moves through, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Init,
    Setup,
    Stream,
    Report,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::Setup => "setup",
            Stage::Stream => "stream",
            Stage::Report => "report",
            Stage::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// Counts of rows that were skipped, by reason.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SkipTally {
    pub malformed: u64,
    pub date_parse: u64,
    pub non_business_day: u64,
    pub price_parse: u64,
    pub overflow: u64,
    pub invalid_multiplier: u64,
}

impl SkipTally {
    pub fn total(&self) -> u64 {
        self.malformed
            + self.date_parse
            + self.non_business_day
            + self.price_parse
            + self.overflow
            + self.invalid_multiplier
    }

    fn record(&mut self, err: &RecordError) {
        match err {
            RecordError::Malformed { .. } => self.malformed += 1,
            RecordError::DateParse { .. } => self.date_parse += 1,
            RecordError::NonBusinessDay { .. } => self.non_business_day += 1,
            RecordError::PriceParse { .. } => self.price_parse += 1,
        }
    }
}

/// The outcome of a completed run.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    /// Every data row read, whether it was used or skipped. Blank lines are
    /// not rows.
    pub rows: u64,
    pub skipped: SkipTally,

    /// Rows adjusted with the default multiplier because none was stored.
    pub defaulted: u64,
    pub summary: Summary,
    pub instruments: Vec<InstrumentResult>,
}

#[derive(Serialize)]
struct SummaryRecord {
    rows: u64,
    count: u64,
    skipped: u64,
    skipped_malformed: u64,
    skipped_date: u64,
    skipped_non_business_day: u64,
    skipped_price: u64,
    skipped_overflow: u64,
    skipped_invalid_multiplier: u64,
    defaulted: u64,
    sum: Decimal,
    mean: Option<Decimal>,
    min: Option<Decimal>,
    max: Option<Decimal>,
    empty: bool,
}

impl Report {
    /// Renders the report as two CSV tables separated by a blank line: a
    /// single summary row followed by one row per instrument.
    pub fn to_csv(&self) -> Result<String, ReportError> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    /// Writes the CSV rendering of [`Report::to_csv`] to `out`.
    pub fn write_csv<W: Write>(&self, mut out: W) -> Result<(), ReportError> {
        {
            let mut wtr = csv::Writer::from_writer(&mut out);
            wtr.serialize(SummaryRecord {
                rows: self.rows,
                count: self.summary.count,
                skipped: self.skipped.total(),
                skipped_malformed: self.skipped.malformed,
                skipped_date: self.skipped.date_parse,
                skipped_non_business_day: self.skipped.non_business_day,
                skipped_price: self.skipped.price_parse,
                skipped_overflow: self.skipped.overflow,
                skipped_invalid_multiplier: self.skipped.invalid_multiplier,
                defaulted: self.defaulted,
                sum: self.summary.sum.normalize(),
                mean: self.summary.mean.map(|mean| mean.normalize()),
                min: self.summary.min.map(|min| min.normalize()),
                max: self.summary.max.map(|max| max.normalize()),
                empty: self.summary.empty,
            })?;
            wtr.flush()?;
        }

        out.write_all(b"\n")?;
        {
            let mut wtr = csv::Writer::from_writer(&mut out);
            if self.instruments.is_empty() {
                wtr.write_record(["instrument", "statistic", "observations", "value"])?;
            }
            for result in &self.instruments {
                wtr.serialize(InstrumentResult {
                    value: result.value.map(|value| value.normalize()),
                    ..result.clone()
                })?;
            }
            wtr.flush()?;
        }

        Ok(())
    }
}

/// Drives a single run: sets up the multiplier store, streams the input
/// through validation and adjustment, and folds the results into statistics.
///
/// Invalid rows, unusable stored multipliers and prices that would overflow
/// the running sum are skipped and counted. Instruments without a stored
/// multiplier are adjusted by the default multiplier and counted. Only
/// failures to reach the input file or the database stop a run.
pub struct Pipeline {
    config: RunConfig,
    rules: StatisticRules,
    stage: Stage,
}

impl Pipeline {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            rules: StatisticRules::default(),
            stage: Stage::Init,
        }
    }

    pub fn with_rules(mut self, rules: StatisticRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, stage: Stage) {
        debug!(from = %self.stage, to = %stage, "pipeline stage");
        self.stage = stage;
    }

    pub fn run(&mut self) -> Result<Report, PipelineError> {
        self.enter(Stage::Setup);
        let seed = match &self.config.seed {
            Some(path) => Seed::from_path(path)?,
            None => Seed::default(),
        };
        let calendar = match &self.config.holidays {
            Some(path) => BusinessCalendar::from_path(path)?,
            None => BusinessCalendar::default(),
        };
        let store = MultiplierStore::setup(&self.config.database, self.config.overwrite, &seed)?;

        self.enter(Stage::Stream);
        let (rows, skipped, defaulted, statistics, breakdown) =
            self.stream(&store, Validator::new(calendar))?;
        store.close()?;

        self.enter(Stage::Report);
        let report = Report {
            rows,
            skipped,
            defaulted,
            summary: statistics.finalize(),
            instruments: breakdown.finalize(),
        };
        info!(
            rows = report.rows,
            count = report.summary.count,
            skipped = report.skipped.total(),
            defaulted = report.defaulted,
            "finished processing {}",
            self.config.input.display()
        );

        self.enter(Stage::Done);
        Ok(report)
    }

    #[allow(clippy::type_complexity)]
    fn stream(
        &self,
        store: &MultiplierStore,
        validator: Validator,
    ) -> Result<(u64, SkipTally, u64, Statistics, InstrumentBreakdown), PipelineError> {
        let path = &self.config.input;
        let rows = PriceRows::open(path).map_err(|source| PipelineError::Input {
            path: path.clone(),
            source,
        })?;

        let adjuster = Adjuster::new(store);
        let mut statistics = Statistics::default();
        let mut breakdown = InstrumentBreakdown::new(self.rules.clone());
        let mut skipped = SkipTally::default();
        let mut defaulted = 0u64;
        let mut processed = 0u64;

        for row in rows {
            let row = match row {
                Ok(row) => row,
                Err(err) if err.is_io_error() => {
                    return Err(PipelineError::Read {
                        path: path.clone(),
                        source: err,
                    })
                }
                Err(err) => {
                    // Undecodable rows (bad UTF-8 and the like) are treated as
                    // malformed rather than aborting the run.
                    processed += 1;
                    warn!("skipping undecodable row: {}", err);
                    skipped.malformed += 1;
                    continue;
                }
            };
            processed += 1;

            let record = match validator.validate(&row) {
                Ok(record) => record,
                Err(err) => {
                    warn!("skipping row: {}", err);
                    skipped.record(&err);
                    continue;
                }
            };

            let adjusted = match adjuster.adjust(&record) {
                Ok(adjusted) => adjusted,
                Err(AdjustError::Overflow { .. }) => {
                    warn!(line = row.line, "skipping row: adjusted price overflowed");
                    skipped.overflow += 1;
                    continue;
                }
                Err(AdjustError::InvalidMultiplier { instrument, value }) => {
                    warn!(
                        line = row.line,
                        %instrument,
                        value,
                        "skipping row: stored multiplier is unusable"
                    );
                    skipped.invalid_multiplier += 1;
                    continue;
                }
                Err(AdjustError::Store(err)) => return Err(err.into()),
            };

            if let Err(err) = statistics.observe(adjusted.price) {
                warn!(line = row.line, "skipping row: {}", err);
                skipped.overflow += 1;
                continue;
            }
            if adjusted.defaulted {
                defaulted += 1;
            }
            breakdown.observe(&adjusted);
        }

        Ok((processed, skipped, defaulted, statistics, breakdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakdown::InstrumentStatistic;
    use std::fs;
    use tempfile::TempDir;

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    fn run(dir: &TempDir, prices: &str) -> Report {
        let input = dir.path().join("prices.csv");
        fs::write(&input, prices).unwrap();
        Pipeline::new(RunConfig::new(&input, dir.path().join("m.db")))
            .run()
            .unwrap()
    }

    #[test]
    fn should_count_every_skip_reason() {
        let dir = TempDir::new().unwrap();
        let report = run(
            &dir,
            "instrument,date,price\n\
             AAPL,2024-03-15,1\n\
             AAPL,2024-03-16,1\n\
             AAPL,nope,1\n\
             AAPL,2024-03-14,x\n\
             AAPL\n",
        );

        assert_eq!(report.rows, 5);
        assert_eq!(report.summary.count, 1);
        assert_eq!(
            report.skipped,
            SkipTally {
                malformed: 1,
                date_parse: 1,
                non_business_day: 1,
                price_parse: 1,
                overflow: 0,
                invalid_multiplier: 0,
            }
        );
        assert_eq!(report.rows, report.summary.count + report.skipped.total());
    }

    #[test]
    fn should_count_defaulted_multipliers() {
        let dir = TempDir::new().unwrap();
        let report = run(&dir, "instrument,date,price\nAAPL,2024-03-15,2\nMSFT,2024-03-14,3\n");

        assert_eq!(report.defaulted, 2);
        assert_eq!(report.summary.sum, dec("5"));
    }

    #[test]
    fn should_reach_done_stage() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("prices.csv");
        fs::write(&input, "instrument,date,price\n").unwrap();

        let mut pipeline = Pipeline::new(RunConfig::new(&input, dir.path().join("m.db")));
        assert_eq!(pipeline.stage(), Stage::Init);
        pipeline.run().unwrap();
        assert_eq!(pipeline.stage(), Stage::Done);
    }

    #[test]
    fn should_stop_in_stream_stage_on_missing_input() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = Pipeline::new(RunConfig::new(
            dir.path().join("absent.csv"),
            dir.path().join("m.db"),
        ));

        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, PipelineError::Input { .. }));
        assert!(err.to_string().contains("absent.csv"));
        assert_eq!(pipeline.stage(), Stage::Stream);
    }

    #[test]
    fn should_use_custom_rules() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("prices.csv");
        fs::write(&input, "instrument,date,price\nAAPL,2024-03-15,2\nAAPL,2024-03-14,4\n").unwrap();

        let report = Pipeline::new(RunConfig::new(&input, dir.path().join("m.db")))
            .with_rules(StatisticRules::new(InstrumentStatistic::Mean))
            .run()
            .unwrap();

        assert_eq!(report.instruments[0].statistic, InstrumentStatistic::Mean);
        assert_eq!(report.instruments[0].value, Some(dec("3")));
    }

    #[test]
    fn should_generate_csv_report() {
        let dir = TempDir::new().unwrap();
        let report = run(&dir, "instrument,date,price\nAAPL,2024-03-15,100.00\nAAPL,2024-03-16,1\n");

        assert_eq!(
            report.to_csv().unwrap(),
            "rows,count,skipped,skipped_malformed,skipped_date,skipped_non_business_day,\
             skipped_price,skipped_overflow,skipped_invalid_multiplier,defaulted,\
             sum,mean,min,max,empty\n\
             2,1,1,0,0,1,0,0,0,1,100,100,100,100,false\n\
             \n\
             instrument,statistic,observations,value\n\
             AAPL,sum_newest_10,1,100\n"
        );
    }

    #[test]
    fn should_generate_empty_csv_report() {
        let dir = TempDir::new().unwrap();
        let report = run(&dir, "instrument,date,price\n");

        assert_eq!(
            report.to_csv().unwrap(),
            "rows,count,skipped,skipped_malformed,skipped_date,skipped_non_business_day,\
             skipped_price,skipped_overflow,skipped_invalid_multiplier,defaulted,\
             sum,mean,min,max,empty\n\
             0,0,0,0,0,0,0,0,0,0,0,,,,true\n\
             \n\
             instrument,statistic,observations,value\n"
        );
    }

    #[test]
    fn should_skip_price_that_overflows_the_running_sum() {
        let dir = TempDir::new().unwrap();
        let report = run(
            &dir,
            "instrument,date,price\n\
             AAPL,2024-03-14,50000000000000000000000000000\n\
             AAPL,2024-03-15,50000000000000000000000000000\n\
             AAPL,2024-03-13,1\n",
        );

        assert_eq!(report.rows, 3);
        assert_eq!(report.summary.count, 2);
        assert_eq!(report.skipped.overflow, 1);
        assert_eq!(report.defaulted, 2);
        assert_eq!(report.summary.sum, dec("50000000000000000000000000001"));
        assert_eq!(report.instruments[0].observations, 2);
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn should_fail_when_report_cannot_be_written() {
        let dir = TempDir::new().unwrap();
        let report = run(&dir, "instrument,date,price\nAAPL,2024-03-15,1\n");

        assert!(matches!(
            report.write_csv(ClosedPipe),
            Err(ReportError::Io(_))
        ));
    }
}
