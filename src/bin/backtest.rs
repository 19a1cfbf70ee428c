//! CLI entry point (1.1): loads the cached CSV tables and a JSON backtest
//! configuration, runs the selected engine variant, and prints the section 6
//! JSON output shape to stdout.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use passive::config::{BacktestConfig, RawBacktestConfig};
use passive::io::MarketData;
use passive::run_job;
use serde::Serialize;

#[derive(Parser)]
#[command(author, version, about = "Run a passive-investment portfolio backtest")]
struct Cli {
    /// Path to the backtest configuration JSON (section 6's input shape).
    #[arg(long)]
    config: PathBuf,

    /// Historical prices CSV (date,ticker,close,adjusted_close,is_trading_day,dividend).
    #[arg(long)]
    prices: PathBuf,

    /// Benchmark prices CSV, same column layout as `--prices`.
    #[arg(long)]
    benchmark_prices: PathBuf,

    /// Asset metadata CSV (ticker,display_name,native_currency).
    #[arg(long)]
    assets: PathBuf,

    /// FX rates CSV (date,from,to,rate).
    #[arg(long)]
    fx: PathBuf,

    /// Benchmark metadata CSV (ticker,display_name,first_observed,last_observed).
    #[arg(long)]
    benchmarks: PathBuf,

    /// Job identifier recorded in logs; defaults to "cli".
    #[arg(long, default_value = "cli")]
    job_id: String,
}

#[derive(Serialize)]
struct OutputEnvelope {
    settings: RawBacktestConfig,
    #[serde(flatten)]
    outcome: passive::JobOutcome,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config_json = fs::read_to_string(&cli.config).with_context(|| format!("reading config {}", cli.config.display()))?;
    let raw_config: RawBacktestConfig = serde_json::from_str(&config_json).context("parsing backtest configuration JSON")?;
    let config = BacktestConfig::from_raw(raw_config.clone()).context("validating backtest configuration")?;

    let market_data = MarketData::load(&cli.prices, &cli.benchmark_prices, &cli.assets, &cli.fx, &cli.benchmarks)
        .context("loading cached market data tables")?;

    let outcome = run_job(&market_data, &cli.job_id, config);
    let envelope = OutputEnvelope { settings: raw_config, outcome };

    println!("{}", serde_json::to_string_pretty(&envelope).context("serialising job output")?);
    Ok(())
}
