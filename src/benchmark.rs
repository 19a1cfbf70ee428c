//! The benchmark simulator (4.6): replays the same cashflow schedule the engine
//! used against one or more reference indices, so a backtest's growth can be
//! compared against "what if I'd just bought the index instead".
//!
//! Grounded on the same cashflow-schedule helper the engines use
//! ([`crate::dates::generate_recurring_dates`]); the simulation itself is a much
//! smaller cousin of the basic engine's "invest all available cash" step, since a
//! benchmark has no rebalancing, no fractional-share flag, and a single ticker
//! per series.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::BacktestConfig;
use crate::data::PreparedBar;
use crate::dates::generate_recurring_dates;
use crate::types::Ticker;

/// One benchmark's simulated value series, keyed by date. Every date in the
/// benchmark's own prepared series gets an entry (4.6 step 4, "left-join the
/// benchmark's full daily price series").
#[derive(Debug, Clone)]
pub struct BenchmarkSeries {
    pub ticker: Ticker,
    pub display_name: String,
    pub values: BTreeMap<NaiveDate, f64>,
}

/// The cashflow schedule a backtest applies: the initial lump sum on
/// `start_date` plus any recurring amounts, identical to what the engine
/// itself deposits (4.4 step 2-3, 4.6 step 1).
pub fn cashflow_schedule(config: &BacktestConfig) -> Vec<(NaiveDate, f64)> {
    let mut schedule = vec![(config.start_date, config.initial_investment)];
    if let Some(recurring) = &config.recurring_investment {
        for date in generate_recurring_dates(config.start_date, config.end_date, recurring.frequency) {
            schedule.push((date, recurring.amount));
        }
    }
    schedule
}

/// Simulate every eligible benchmark against `bars` (already prepared into
/// base-currency prices). `eligible` and `names` come from
/// [`crate::data::eligible_benchmarks`] and the benchmark metadata table.
pub fn simulate_benchmarks(
    config: &BacktestConfig,
    eligible: &[Ticker],
    names: &std::collections::HashMap<Ticker, String>,
    bars: &[PreparedBar],
) -> Vec<BenchmarkSeries> {
    let schedule = cashflow_schedule(config);

    let mut by_ticker: BTreeMap<Ticker, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    for bar in bars {
        if eligible.contains(&bar.ticker) {
            by_ticker.entry(bar.ticker.clone()).or_default().insert(bar.date, bar.base_price);
        }
    }

    let mut out = Vec::new();
    for ticker in eligible {
        let Some(prices) = by_ticker.get(ticker) else { continue };
        let values = simulate_one(prices, &schedule);
        out.push(BenchmarkSeries {
            ticker: ticker.clone(),
            display_name: names.get(ticker).cloned().unwrap_or_else(|| ticker.to_string()),
            values,
        });
    }
    out
}

/// Apply `schedule` to a single benchmark's dense price series (4.6 steps 2-4):
/// every cashflow buys `amount / price` units on its date, units accumulate
/// (forward-filled implicitly by only ever increasing), and every date's value
/// is `cumulative_units * price`.
fn simulate_one(prices: &BTreeMap<NaiveDate, f64>, schedule: &[(NaiveDate, f64)]) -> BTreeMap<NaiveDate, f64> {
    let mut cashflow_by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (date, amount) in schedule {
        *cashflow_by_date.entry(*date).or_insert(0.0) += amount;
    }

    let mut cumulative_units = 0.0;
    let mut values = BTreeMap::new();
    for (date, price) in prices {
        if let Some(amount) = cashflow_by_date.get(date) {
            if *price > 0.0 {
                cumulative_units += amount / price;
            }
        }
        values.insert(*date, cumulative_units * price);
    }
    values
}

/// The wide-pivoted, JSON-ready shape of `chart_data.benchmark_growth` (6):
/// one row per date with a flattened `{ticker: value}` map alongside it, plus
/// a separate `{ticker: "ticker - display name"}` label map.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkGrowthPoint {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BenchmarkGrowth {
    pub data: Vec<BenchmarkGrowthPoint>,
    pub labels: BTreeMap<String, String>,
}

/// Pivot the long `(date, ticker, value)` table into the wide form the chart
/// payload expects (4.6, "later pivoted to wide form keyed by date").
pub fn pivot_wide(series: &[BenchmarkSeries]) -> BenchmarkGrowth {
    let mut labels = BTreeMap::new();
    let mut all_dates: std::collections::BTreeSet<NaiveDate> = std::collections::BTreeSet::new();
    for s in series {
        labels.insert(s.ticker.to_string(), format!("{} - {}", s.ticker, s.display_name));
        all_dates.extend(s.values.keys().copied());
    }

    let mut data = Vec::new();
    for date in all_dates {
        let mut values = BTreeMap::new();
        for s in series {
            if let Some(v) = s.values.get(&date) {
                values.insert(s.ticker.to_string(), *v);
            }
        }
        data.push(BenchmarkGrowthPoint { date, values });
    }

    BenchmarkGrowth { data, labels }
}
