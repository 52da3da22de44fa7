use crate::errors::{CalendarError, RecordError};
use crate::reader::RawRow;
use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Date layouts accepted in the price file, tried in order.
pub const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d-%b-%Y"];

/// A validated price observation.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceRecord {
    pub instrument: String,
    pub date: NaiveDate,
    pub price: Decimal,
}

/// Decides which dates count as business days.
///
/// Saturdays and Sundays are never business days. Holidays are only honoured
/// when a calendar is supplied explicitly; the default calendar is empty.
#[derive(Clone, Debug, Default)]
pub struct BusinessCalendar {
    holidays: HashSet<NaiveDate>,
}

impl BusinessCalendar {
    pub fn with_holidays<I: IntoIterator<Item = NaiveDate>>(holidays: I) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    /// Loads a holiday calendar containing one ISO date per line. Blank lines
    /// and lines starting with `#` are ignored.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, CalendarError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| CalendarError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut holidays = HashSet::new();
        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let date = NaiveDate::parse_from_str(line, DATE_FORMATS[0]).map_err(|_| {
                CalendarError::InvalidDate {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    value: line.to_string(),
                }
            })?;
            holidays.insert(date);
        }

        Ok(Self { holidays })
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    pub fn holiday_count(&self) -> usize {
        self.holidays.len()
    }
}

/// Turns raw rows into typed price records.
#[derive(Clone, Debug, Default)]
pub struct Validator {
    calendar: BusinessCalendar,
}

impl Validator {
    pub fn new(calendar: BusinessCalendar) -> Self {
        Self { calendar }
    }

    /// Validates a single row.
    ///
    /// Checks are applied in order: field count, date format, business day and
    /// finally the price. The first failing check determines the error.
    pub fn validate(&self, row: &RawRow) -> Result<PriceRecord, RecordError> {
        let (instrument, date, price) = match (row.record.len(), row.record.iter().next()) {
            (3, Some(instrument)) if !instrument.is_empty() => {
                (instrument, &row.record[1], &row.record[2])
            }
            (fields, _) => {
                return Err(RecordError::Malformed {
                    line: row.line,
                    fields,
                })
            }
        };

        let date = parse_date(date).ok_or_else(|| RecordError::DateParse {
            line: row.line,
            value: date.to_string(),
        })?;

        if !self.calendar.is_business_day(date) {
            return Err(RecordError::NonBusinessDay {
                line: row.line,
                date,
            });
        }

        let price = parse_price(price).ok_or_else(|| RecordError::PriceParse {
            line: row.line,
            value: price.to_string(),
        })?;

        Ok(PriceRecord {
            instrument: instrument.to_string(),
            date,
            price,
        })
    }
}

// `Decimal::from_str` tolerates `_` digit separators, which are not valid in a
// price file.
fn parse_price(value: &str) -> Option<Decimal> {
    if value.contains('_') {
        return None;
    }
    Decimal::from_str(value).ok()
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use csv::StringRecord;
    use rust_decimal::prelude::*;
    use std::io::Write;

    fn row(fields: &[&str]) -> RawRow {
        RawRow {
            line: 2,
            record: StringRecord::from(fields.to_vec()),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn should_validate_weekday_record() {
        let validator = Validator::default();
        let record = validator
            .validate(&row(&["AAPL", "2024-03-15", "100.00"]))
            .unwrap();

        assert_eq!(
            record,
            PriceRecord {
                instrument: "AAPL".to_string(),
                date: date(2024, 3, 15),
                price: Decimal::new(10000, 2),
            }
        );
    }

    #[test]
    fn should_accept_legacy_date_layout() {
        let validator = Validator::default();
        let record = validator
            .validate(&row(&["INSTRUMENT1", "12-Nov-2014", "2.5"]))
            .unwrap();

        assert_eq!(record.date, date(2014, 11, 12));
    }

    #[test]
    fn should_reject_weekend() {
        // 2024-03-16 is a Saturday.
        let validator = Validator::default();
        assert_eq!(
            validator.validate(&row(&["AAPL", "2024-03-16", "100.00"])),
            Err(RecordError::NonBusinessDay {
                line: 2,
                date: date(2024, 3, 16),
            })
        );
    }

    #[test]
    fn should_reject_supplied_holiday() {
        let validator = Validator::new(BusinessCalendar::with_holidays(vec![date(2024, 3, 15)]));
        assert!(matches!(
            validator.validate(&row(&["AAPL", "2024-03-15", "100.00"])),
            Err(RecordError::NonBusinessDay { .. })
        ));
    }

    #[test]
    fn should_reject_unparseable_date() {
        let validator = Validator::default();
        assert_eq!(
            validator.validate(&row(&["AAPL", "15/03/2024", "100.00"])),
            Err(RecordError::DateParse {
                line: 2,
                value: "15/03/2024".to_string(),
            })
        );
    }

    #[test]
    fn should_reject_unparseable_price() {
        let validator = Validator::default();
        assert_eq!(
            validator.validate(&row(&["AAPL", "2024-03-15", "abc"])),
            Err(RecordError::PriceParse {
                line: 2,
                value: "abc".to_string(),
            })
        );
    }

    #[test]
    fn should_check_date_before_price() {
        // Both fields are broken; the date failure wins.
        let validator = Validator::default();
        assert!(matches!(
            validator.validate(&row(&["AAPL", "nope", "abc"])),
            Err(RecordError::DateParse { .. })
        ));
    }

    #[test]
    fn should_reject_wrong_field_count_and_empty_instrument() {
        let validator = Validator::default();
        assert_eq!(
            validator.validate(&row(&["AAPL", "2024-03-15"])),
            Err(RecordError::Malformed { line: 2, fields: 2 })
        );
        assert_eq!(
            validator.validate(&row(&["", "2024-03-15", "1"])),
            Err(RecordError::Malformed { line: 2, fields: 3 })
        );
    }

    #[test]
    fn should_load_holidays_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# market holidays\n2024-12-25\n\n2024-01-01").unwrap();

        let calendar = BusinessCalendar::from_path(file.path()).unwrap();
        assert_eq!(calendar.holiday_count(), 2);
        assert!(!calendar.is_business_day(date(2024, 12, 25)));
        assert!(calendar.is_business_day(date(2024, 12, 24)));
    }

    #[test]
    fn should_fail_on_bad_holiday_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "2024-12-25\nChristmas").unwrap();

        assert!(matches!(
            BusinessCalendar::from_path(file.path()),
            Err(CalendarError::InvalidDate { line: 2, .. })
        ));
    }

    #[test]
    fn should_keep_exact_decimal_price() {
        let validator = Validator::default();
        let record = validator
            .validate(&row(&["AAPL", "2024-03-15", "0.1"]))
            .unwrap();
        assert_eq!(record.price, Decimal::from_str("0.1").unwrap());
        assert_eq!(record.price.to_f64(), Some(0.1));
    }

    #[test]
    fn should_reject_digit_separators_in_price() {
        let validator = Validator::default();
        assert_eq!(
            validator.validate(&row(&["AAPL", "2024-03-15", "1_000"])),
            Err(RecordError::PriceParse {
                line: 2,
                value: "1_000".to_string(),
            })
        );
    }
}
