use crate::engine::RunConfig;
use clap::{App, Arg, ArgMatches};
use std::ffi::OsString;
use std::path::PathBuf;

pub struct Args {
    pub input_csv: String,
    pub db_path: String,
    pub overwrite: bool,
    pub seed: Option<String>,
    pub holidays: Option<String>,
}

impl Args {
    pub fn parse() -> Self {
        Self::from_matches(&Self::app().get_matches())
    }

    /// Parses an explicit argument list, the first item being the program
    /// name.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::from_matches(&Self::app().get_matches_from_safe(args)?))
    }

    fn app() -> App<'static, 'static> {
        App::new("instrument-prices")
            .version("0.1.0")
            .about("Adjusts instrument prices by stored multipliers and reports statistics")
            .arg(Arg::with_name("input_csv")
                .takes_value(true).required(true).index(1)
                .help("path of the CSV price file to read from"))
            .arg(Arg::with_name("db_path")
                .takes_value(true).required(true).index(2)
                .help("path of the SQLite database holding instrument multipliers"))
            .arg(Arg::with_name("overwrite")
                .takes_value(true).index(3)
                .possible_value("overwrite").case_insensitive(true)
                .help("drop and repopulate the multiplier table before processing"))
            .arg(Arg::with_name("seed")
                .long("seed").takes_value(true).value_name("CSV")
                .help("instrument_id,multiplier CSV used to populate the table on overwrite"))
            .arg(Arg::with_name("holidays")
                .long("holidays").takes_value(true).value_name("FILE")
                .help("file of YYYY-MM-DD holiday dates, one per line, excluded as non-business days"))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            input_csv: matches.value_of("input_csv").unwrap_or_default().to_string(),
            db_path: matches.value_of("db_path").unwrap_or_default().to_string(),
            overwrite: matches.is_present("overwrite"),
            seed: matches.value_of("seed").map(String::from),
            holidays: matches.value_of("holidays").map(String::from),
        }
    }
}

impl From<Args> for RunConfig {
    fn from(args: Args) -> Self {
        Self {
            input: PathBuf::from(args.input_csv),
            database: PathBuf::from(args.db_path),
            overwrite: args.overwrite,
            seed: args.seed.map(PathBuf::from),
            holidays: args.holidays.map(PathBuf::from),
        }
    }
}
