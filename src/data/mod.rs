//! The data preparer (4.2): turns raw, native-currency bars into the base-currency,
//! FX-joined, pence-normalised table the calendar and engine both consume.
//!
//! The shape here echoes the teacher's `DataSource`/`SimSource` split
//! (quote-by-date-and-symbol plus a cursor over the full date range) but trades the
//! exchange-facing cursor for a one-shot batch transform, since the engine here
//! only ever replays a single historical window rather than stepping a live feed.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{BacktestError, Result};
use crate::types::{Currency, Mode, Ticker};

/// A single day's raw bar as it comes out of the upstream price store. Non-trading
/// days are assumed already forward-filled by that store; the preparer only
/// preserves the flag, it never fills gaps itself (4.2 step 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBar {
    pub date: NaiveDate,
    pub ticker: Ticker,
    pub close: f64,
    pub adjusted_close: f64,
    pub is_trading_day: bool,
    /// Present only on ex-dividend days.
    pub dividend: Option<f64>,
}

/// Asset metadata needed to route currency conversion; one row per ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetMeta {
    pub ticker: Ticker,
    pub display_name: String,
    pub native_currency: Currency,
}

/// An FX rate from `from` to `to` on a given date. `from == to` is never stored
/// explicitly; lookups fall back to `1.0` in that case.
#[derive(Debug, Clone, Copy)]
pub struct FxRate {
    pub date: NaiveDate,
    pub from: Currency,
    pub to: Currency,
    pub rate: f64,
}

#[derive(Debug, Default)]
pub struct FxTable {
    rates: HashMap<(NaiveDate, &'static str, &'static str), f64>,
}

impl FxTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rate: FxRate) {
        self.rates.insert((rate.date, rate.from.code(), rate.to.code()), rate.rate);
    }

    /// Resolve the `from -> to` rate on `date`; `1.0` when the currencies match,
    /// `None` if no rate was loaded for that pair/date.
    pub fn rate(&self, date: NaiveDate, from: Currency, to: Currency) -> Option<f64> {
        if from.code() == to.code() {
            return Some(1.0);
        }
        self.rates.get(&(date, from.code(), to.code())).copied()
    }
}

/// A bar after currency normalisation: this is what the calendar and engine both
/// consume. `native_price` and `native_currency` reflect the bar *after* the
/// pence-to-pound rewrite in step 4; `base_price` is always in the engine's
/// configured base currency.
#[derive(Debug, Clone)]
pub struct PreparedBar {
    pub date: NaiveDate,
    pub ticker: Ticker,
    pub native_currency: Currency,
    pub native_price: f64,
    pub exchange_rate: f64,
    pub base_price: f64,
    pub is_trading_day: bool,
    pub dividend: Option<f64>,
}

/// Prepare the master price table for a backtest run (4.2).
///
/// `raw` need not be pre-filtered; this selects the price column for `mode`,
/// restricts to `tickers`/`[start, end]`, joins native currency and FX, and
/// normalises pence quotes. Returns [`BacktestError::EmptyPreparedData`] if
/// nothing survives the filter.
pub fn prepare(
    mode: Mode,
    base_currency: Currency,
    tickers: &[Ticker],
    start: NaiveDate,
    end: NaiveDate,
    raw: &[RawBar],
    assets: &HashMap<Ticker, AssetMeta>,
    fx: &FxTable,
) -> Result<Vec<PreparedBar>> {
    let mut out = Vec::new();

    for bar in raw {
        if !tickers.contains(&bar.ticker) {
            continue;
        }
        if bar.date < start || bar.date > end {
            continue;
        }

        let meta = assets.get(&bar.ticker).ok_or_else(|| {
            BacktestError::InvalidConfig(format!("no asset metadata for ticker {}", bar.ticker))
        })?;

        // Step 1: select the price column by mode.
        let selected_price = match mode {
            Mode::Basic => bar.adjusted_close,
            Mode::Realistic => bar.close,
        };

        // Step 4: pence is always GBX in the raw feed; divide by 100 and retag GBP
        // before the FX join, so a GBX/GBP pair never needs its own FX rate.
        let (native_currency, native_price) = match meta.native_currency {
            Currency::GBX => (Currency::GBP, selected_price / 100.0),
            other => (other, selected_price),
        };

        // Step 5: FX join, 1.0 when already in base currency.
        let exchange_rate = fx
            .rate(bar.date, native_currency, base_currency)
            .ok_or_else(|| {
                BacktestError::InvalidConfig(format!(
                    "no FX rate {}->{} on {}",
                    native_currency, base_currency, bar.date
                ))
            })?;
        let base_price = native_price * exchange_rate;

        out.push(PreparedBar {
            date: bar.date,
            ticker: bar.ticker.clone(),
            native_currency,
            native_price,
            exchange_rate,
            base_price,
            is_trading_day: bar.is_trading_day,
            // realistic mode carries the per-bar dividend through; basic mode's
            // adjusted-close series already embeds dividend reinvestment, so it
            // has no separate dividend event.
            dividend: match mode {
                Mode::Realistic => bar.dividend,
                Mode::Basic => None,
            },
        });
    }

    if out.is_empty() {
        return Err(BacktestError::EmptyPreparedData);
    }

    Ok(out)
}

/// A benchmark's advertised active window, used to decide eligibility (4.6):
/// a benchmark is only simulated if its coverage fully spans `[start, end]`.
#[derive(Debug, Clone)]
pub struct BenchmarkWindow {
    pub display_name: String,
    pub first_observed: NaiveDate,
    pub last_observed: NaiveDate,
}

/// Filter `benchmarks` down to those whose window fully covers `[start, end]`.
/// Non-fatal per 4.6/7: ineligible benchmarks are silently dropped, not errors.
pub fn eligible_benchmarks(
    benchmarks: &HashMap<Ticker, BenchmarkWindow>,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<Ticker> {
    let mut out: Vec<Ticker> = benchmarks
        .iter()
        .filter(|(_, w)| w.first_observed <= start && w.last_observed >= end)
        .map(|(t, _)| t.clone())
        .collect();
    out.sort();
    out
}
