//! CSV ingestion and the process-wide shared cache (4.2.1, 5.1).
//!
//! Loads the four cached columnar tables the service boundary describes in
//! section 6 from CSV, the way the teacher builds `Penelope` fixtures from
//! `csv::Reader` in its test helpers — except here the loader is a real
//! dependency of the CLI binary, not just a test fixture.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::data::{AssetMeta, BenchmarkWindow, FxRate, FxTable, RawBar};
use crate::error::{BacktestError, Result};
use crate::types::{Currency, Ticker};

/// One row of the `prices` CSV: `date,ticker,close,adjusted_close,is_trading_day,dividend`.
#[derive(Debug, Deserialize)]
struct PriceRow {
    date: NaiveDate,
    ticker: String,
    close: f64,
    adjusted_close: f64,
    is_trading_day: bool,
    dividend: Option<f64>,
}

/// One row of the `assets` CSV: `ticker,display_name,native_currency`.
#[derive(Debug, Deserialize)]
struct AssetRow {
    ticker: String,
    display_name: String,
    native_currency: String,
}

/// One row of the `fx` CSV: `date,from,to,rate`.
#[derive(Debug, Deserialize)]
struct FxRow {
    date: NaiveDate,
    from: String,
    to: String,
    rate: f64,
}

/// One row of the `benchmarks` CSV: `ticker,display_name,first_observed,last_observed`.
#[derive(Debug, Deserialize)]
struct BenchmarkRow {
    ticker: String,
    display_name: String,
    first_observed: NaiveDate,
    last_observed: NaiveDate,
}

fn parse_currency(code: &str) -> Result<Currency> {
    match code.to_uppercase().as_str() {
        "GBP" => Ok(Currency::GBP),
        "USD" => Ok(Currency::USD),
        "EUR" => Ok(Currency::EUR),
        "GBX" => Ok(Currency::GBX),
        other => Err(BacktestError::UnknownEnumValue(format!("unknown currency code: {other}"))),
    }
}

pub fn load_prices(path: impl AsRef<Path>) -> Result<Vec<RawBar>> {
    let mut reader = csv::Reader::from_path(path.as_ref())
        .map_err(|e| BacktestError::InvalidConfig(format!("reading prices CSV {}: {e}", path.as_ref().display())))?;
    let mut out = Vec::new();
    for result in reader.deserialize() {
        let row: PriceRow =
            result.map_err(|e| BacktestError::InvalidConfig(format!("malformed prices row: {e}")))?;
        out.push(RawBar {
            date: row.date,
            ticker: Ticker::new(row.ticker),
            close: row.close,
            adjusted_close: row.adjusted_close,
            is_trading_day: row.is_trading_day,
            dividend: row.dividend,
        });
    }
    Ok(out)
}

pub fn load_assets(path: impl AsRef<Path>) -> Result<HashMap<Ticker, AssetMeta>> {
    let mut reader = csv::Reader::from_path(path.as_ref())
        .map_err(|e| BacktestError::InvalidConfig(format!("reading assets CSV {}: {e}", path.as_ref().display())))?;
    let mut out = HashMap::new();
    for result in reader.deserialize() {
        let row: AssetRow = result.map_err(|e| BacktestError::InvalidConfig(format!("malformed assets row: {e}")))?;
        let ticker = Ticker::new(row.ticker);
        out.insert(
            ticker.clone(),
            AssetMeta { ticker, display_name: row.display_name, native_currency: parse_currency(&row.native_currency)? },
        );
    }
    Ok(out)
}

pub fn load_fx(path: impl AsRef<Path>) -> Result<FxTable> {
    let mut reader = csv::Reader::from_path(path.as_ref())
        .map_err(|e| BacktestError::InvalidConfig(format!("reading fx CSV {}: {e}", path.as_ref().display())))?;
    let mut table = FxTable::new();
    for result in reader.deserialize() {
        let row: FxRow = result.map_err(|e| BacktestError::InvalidConfig(format!("malformed fx row: {e}")))?;
        table.insert(FxRate { date: row.date, from: parse_currency(&row.from)?, to: parse_currency(&row.to)?, rate: row.rate });
    }
    Ok(table)
}

pub fn load_benchmarks(path: impl AsRef<Path>) -> Result<(HashMap<Ticker, BenchmarkWindow>, HashMap<Ticker, String>)> {
    let mut reader = csv::Reader::from_path(path.as_ref())
        .map_err(|e| BacktestError::InvalidConfig(format!("reading benchmarks CSV {}: {e}", path.as_ref().display())))?;
    let mut windows = HashMap::new();
    let mut names = HashMap::new();
    for result in reader.deserialize() {
        let row: BenchmarkRow =
            result.map_err(|e| BacktestError::InvalidConfig(format!("malformed benchmarks row: {e}")))?;
        let ticker = Ticker::new(row.ticker);
        names.insert(ticker.clone(), row.display_name.clone());
        windows.insert(
            ticker.clone(),
            BenchmarkWindow { display_name: row.display_name, first_observed: row.first_observed, last_observed: row.last_observed },
        );
    }
    Ok((windows, names))
}

/// The process-wide, read-only cache a dispatcher constructs once and hands to
/// every job's thread (5.1). Holds no interior mutability; `Send + Sync` by
/// construction since every field is.
#[derive(Debug)]
pub struct MarketData {
    pub prices: Vec<RawBar>,
    pub benchmark_prices: Vec<RawBar>,
    pub assets: HashMap<Ticker, AssetMeta>,
    pub fx: FxTable,
    pub benchmarks: HashMap<Ticker, BenchmarkWindow>,
    pub benchmark_names: HashMap<Ticker, String>,
}

impl MarketData {
    /// Load every cached table from disk. `prices_path`/`benchmark_prices_path`
    /// share the same CSV shape (4.2.1); benchmarks are priced separately from
    /// the tradable universe because they are never themselves tradable assets.
    pub fn load(
        prices_path: impl AsRef<Path>,
        benchmark_prices_path: impl AsRef<Path>,
        assets_path: impl AsRef<Path>,
        fx_path: impl AsRef<Path>,
        benchmarks_path: impl AsRef<Path>,
    ) -> Result<Arc<MarketData>> {
        let prices = load_prices(prices_path)?;
        let benchmark_prices = load_prices(benchmark_prices_path)?;
        let assets = load_assets(assets_path)?;
        let fx = load_fx(fx_path)?;
        let (benchmarks, benchmark_names) = load_benchmarks(benchmarks_path)?;
        Ok(Arc::new(MarketData { prices, benchmark_prices, assets, fx, benchmarks, benchmark_names }))
    }
}

#[cfg(test)]
mod tests {
    use tempfile_free_helpers::write_temp_csv;

    use super::*;

    /// Minimal `tempfile`-free scratch-file helper: the teacher's own CSV
    /// fixtures write to `std::env::temp_dir()` rather than pulling in the
    /// `tempfile` crate for unit tests.
    mod tempfile_free_helpers {
        use std::path::PathBuf;

        pub fn write_temp_csv(name: &str, contents: &str) -> PathBuf {
            let mut path = std::env::temp_dir();
            path.push(format!("passive-test-{name}-{}.csv", std::process::id()));
            std::fs::write(&path, contents).expect("write scratch csv");
            path
        }
    }

    #[test]
    fn load_prices_parses_rows_and_uppercases_ticker() {
        let path = write_temp_csv(
            "prices",
            "date,ticker,close,adjusted_close,is_trading_day,dividend\n2020-01-02,aapl,100.0,100.0,true,\n",
        );
        let bars = load_prices(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].ticker, Ticker::new("AAPL"));
        assert_eq!(bars[0].dividend, None);
    }

    #[test]
    fn load_assets_rejects_unknown_currency_code() {
        let path = write_temp_csv("assets", "ticker,display_name,native_currency\nAAPL,Apple,XYZ\n");
        let err = load_assets(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, Err(BacktestError::UnknownEnumValue(_))));
    }

    #[test]
    fn load_fx_round_trips_rate() {
        let path = write_temp_csv("fx", "date,from,to,rate\n2020-01-02,USD,GBP,0.8\n");
        let table = load_fx(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(table.rate(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap(), Currency::USD, Currency::GBP), Some(0.8));
    }

    #[test]
    fn load_benchmarks_populates_windows_and_names() {
        let path = write_temp_csv(
            "benchmarks",
            "ticker,display_name,first_observed,last_observed\nSPX,S&P 500,1990-01-01,2030-01-01\n",
        );
        let (windows, names) = load_benchmarks(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(names.get(&Ticker::new("SPX")), Some(&"S&P 500".to_string()));
        assert_eq!(windows.get(&Ticker::new("SPX")).unwrap().first_observed, NaiveDate::from_ymd_opt(1990, 1, 1).unwrap());
    }
}
