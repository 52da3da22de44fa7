use anyhow::Context;
use instrument_prices::args::Args;
use instrument_prices::engine::{Pipeline, RunConfig};
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = RunConfig::from(Args::parse());

    match run(config) {
        Ok(output) => print!("{}", output),
        Err(err) => {
            eprintln!("{:#}", err);
            process::exit(1);
        }
    }
}

fn run(config: RunConfig) -> anyhow::Result<String> {
    let input = config.input.display().to_string();
    let report = Pipeline::new(config)
        .run()
        .with_context(|| format!("failed to process input file {}", input))?;

    report
        .to_csv()
        .context("failed to generate output report")
}
