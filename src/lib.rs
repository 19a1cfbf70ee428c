//! # passive
//!
//! A passive-investment portfolio backtest simulation engine. Given a target
//! weighting over a set of instruments, an initial lump-sum investment, an
//! optional recurring contribution, a rebalancing cadence, and a base
//! reporting currency, this crate replays a historical price series day by
//! day and produces the cash, holdings, dividend, and order snapshots from
//! which [`analyser::analyse`] derives returns, drawdowns, and benchmark
//! comparisons.
//!
//! Two engine variants cover the same per-day contract: [`engine::basic`]
//! assumes idealised instant settlement at adjusted prices, [`engine::realistic`]
//! settles on the next trading day and honours fractional-share and
//! dividend-reinvestment flags. Both drive a [`portfolio::Portfolio`]
//! implementation through the calendar built by [`calendar::Calendar::build`]
//! over the table [`data::prepare`] produces.
//!
//! At the service boundary, [`run_job`] and [`run_backtests`] give a
//! dispatcher (out of scope for this crate, see section 1 of the spec) a
//! thread-per-job entry point over the shared, read-only [`io::MarketData`]
//! cache.

pub mod analyser;
pub mod benchmark;
pub mod calendar;
pub mod config;
pub mod data;
pub mod dates;
pub mod engine;
pub mod error;
pub mod io;
pub mod orders;
pub mod portfolio;
pub mod types;

use std::collections::HashMap;
use std::thread;

use log::{error, info, warn};
use serde::Serialize;

use crate::analyser::AnalysisResults;
use crate::benchmark::{pivot_wide, simulate_benchmarks};
use crate::calendar::Calendar;
use crate::config::BacktestConfig;
use crate::data::{eligible_benchmarks, prepare};
use crate::engine::basic::BasicEngine;
use crate::engine::realistic::RealisticEngine;
use crate::engine::{Engine, PriceIndex};
use crate::error::Result;
use crate::io::MarketData;
use crate::types::Mode;

/// Run one backtest end to end: prepare the price table, build the calendar,
/// drive the engine variant selected by `config.mode`, simulate eligible
/// benchmarks, and hand everything to the analyser (2, "control flow").
pub fn run_backtest(market_data: &MarketData, config: &BacktestConfig) -> Result<AnalysisResults> {
    let tickers = config.tickers();
    let prepared =
        prepare(config.mode, config.base_currency, &tickers, config.start_date, config.end_date, &market_data.prices, &market_data.assets, &market_data.fx)?;

    let calendar = Calendar::build(&prepared, config.start_date, config.end_date);
    let index = PriceIndex::build(&prepared);

    let output = match config.mode {
        Mode::Basic => BasicEngine::run(config, &calendar, &index)?,
        Mode::Realistic => RealisticEngine::run(config, &calendar, &index)?,
    };

    let eligible = eligible_benchmarks(&market_data.benchmarks, config.start_date, config.end_date);
    let excluded = market_data.benchmarks.len() - eligible.len();
    if excluded > 0 {
        warn!("BACKTEST: {excluded} benchmark(s) excluded, window does not cover [{}, {}]", config.start_date, config.end_date);
    }

    let benchmark_growth = if eligible.is_empty() {
        None
    } else {
        // Benchmarks are always valued on their adjusted-close series,
        // mirroring basic mode's idealised-instant-settlement price column
        // (4.6 gives no mode of its own: a reference index has no order queue).
        let benchmark_bars = prepare(
            Mode::Basic,
            config.base_currency,
            &eligible,
            config.start_date,
            config.end_date,
            &market_data.benchmark_prices,
            &market_data.assets,
            &market_data.fx,
        )?;
        let series = simulate_benchmarks(config, &eligible, &market_data.benchmark_names, &benchmark_bars);
        Some(pivot_wide(&series))
    };

    Ok(analyser::analyse(&calendar, &output, benchmark_growth))
}

/// The job-level result shape section 7 describes: `{status: "failed", error}`
/// on any fatal error, the full analysis otherwise. Non-fatal conditions
/// (excluded benchmarks, pending orders with no settlement date) are already
/// reflected inside `results` rather than surfacing here.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobOutcome {
    Completed { results: Box<AnalysisResults> },
    Failed { error: String },
}

/// Run a single job and fold any fatal [`crate::error::BacktestError`] into
/// the job-level outcome shape, matching the teacher's own pattern of a
/// broker-level error becoming a job-record field rather than a panic.
pub fn run_job(market_data: &MarketData, job_id: &str, config: BacktestConfig) -> JobOutcome {
    match run_backtest(market_data, &config) {
        Ok(results) => {
            info!("JOB({job_id}): completed");
            JobOutcome::Completed { results: Box::new(results) }
        }
        Err(e) => {
            error!("JOB({job_id}): failed: {e}");
            JobOutcome::Failed { error: e.to_string() }
        }
    }
}

/// Dispatch `jobs` across one OS thread per job (5, "worker pool of OS
/// threads ... jobs are independent, share no mutable state"). `market_data`
/// is the process-wide, read-only cache; each thread gets its own `Arc` clone
/// and its own engine and portfolio, exactly as section 5 specifies.
///
/// This is the boundary a dispatcher (out of scope) would call from its own
/// pool; it is provided here so the crate's concurrency contract is testable
/// without building that dispatcher.
pub fn run_backtests(market_data: std::sync::Arc<MarketData>, jobs: Vec<(String, BacktestConfig)>) -> HashMap<String, JobOutcome> {
    let handles: Vec<_> = jobs
        .into_iter()
        .map(|(job_id, config)| {
            let market_data = market_data.clone();
            thread::spawn(move || {
                let outcome = run_job(&market_data, &job_id, config);
                (job_id, outcome)
            })
        })
        .collect();

    handles.into_iter().map(|h| h.join().expect("job thread panicked")).collect()
}
