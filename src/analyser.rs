//! The analyser (4.7): turns the engine's four snapshot streams into the
//! portfolio-level daily valuation, return series, drawdown episodes, period
//! aggregates, and chart-ready payloads of section 6's JSON shape.
//!
//! Grounded on `examples/alator/src/perf/mod.rs`'s `PerformanceCalculator`:
//! the same shape of computation (cash-flow-adjusted returns, annualised vol
//! and Sharpe, a single worst-drawdown extraction) generalised here to a full
//! list of drawdown episodes and a richer period-aggregation/histogram report,
//! since the teacher's version only ever reports the single worst episode.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::benchmark::BenchmarkGrowth;
use crate::calendar::Calendar;
use crate::dates::{period_label, period_start, Frequency};
use crate::engine::EngineOutput;
use crate::types::{CashValue, Ticker};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const PERIOD_HORIZONS: [Frequency; 5] =
    [Frequency::Daily, Frequency::Weekly, Frequency::Monthly, Frequency::Quarterly, Frequency::Yearly];

fn horizon_key(horizon: Frequency) -> &'static str {
    match horizon {
        Frequency::Daily => "day",
        Frequency::Weekly => "week",
        Frequency::Monthly => "month",
        Frequency::Quarterly => "quarter",
        Frequency::Yearly => "year",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnPoint {
    pub period: String,
    #[serde(rename = "return")]
    pub return_value: f64,
    pub period_start: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioGrowthPoint {
    pub date: NaiveDate,
    pub contributions: CashValue,
    pub gain: CashValue,
    pub value: CashValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct HoldingBalance {
    pub ticker: Ticker,
    pub value: CashValue,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioBalancePoint {
    pub date: NaiveDate,
    pub holdings: Vec<HoldingBalance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramBucket {
    pub bucket: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub total_contributions: CashValue,
    pub final_value: CashValue,
    pub cumulative_gain: CashValue,
    pub cumulative_return: f64,
    pub cagr: f64,
    pub cmgr: f64,
    pub sharpe: f64,
    pub volatility: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrawdownEpisode {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: i64,
    pub max_drawdown: f64,
    pub max_drawdown_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct WinLoseAnalysis {
    pub win: usize,
    pub loss: usize,
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartData {
    pub portfolio_growth: Vec<PortfolioGrowthPoint>,
    pub returns: BTreeMap<String, Vec<ReturnPoint>>,
    pub monthly_returns_histogram: Vec<HistogramBucket>,
    pub portfolio_balance: Vec<PortfolioBalancePoint>,
    pub benchmark_growth: Option<BenchmarkGrowth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResults {
    pub metrics: Metrics,
    pub max_drawdown: Option<DrawdownEpisode>,
    pub monthly_win_lose_analysis: WinLoseAnalysis,
    pub best_periods: BTreeMap<String, ReturnPoint>,
    pub worst_periods: BTreeMap<String, ReturnPoint>,
    pub chart_data: ChartData,
}

/// One day's enriched valuation (4.7 steps 1-7), kept internal: callers only
/// ever see the derived [`AnalysisResults`].
struct DailyPoint {
    date: NaiveDate,
    cumulative_cashflow: f64,
    total_portfolio_value: f64,
    net_cumulative_gain: f64,
    net_daily_return: Option<f64>,
    trading: bool,
    holdings: Vec<(Ticker, f64)>,
}

fn build_daily_points(calendar: &Calendar, output: &EngineOutput) -> Vec<DailyPoint> {
    let mut holdings_by_date: BTreeMap<NaiveDate, Vec<(Ticker, f64)>> = BTreeMap::new();
    for h in &output.holdings {
        holdings_by_date.entry(h.date).or_default().push((h.ticker.clone(), *h.units * *h.base_price));
    }

    let mut points = Vec::with_capacity(output.cash.len());
    let mut cumulative_cashflow = 0.0;
    let mut prev_total = 0.0;

    for cash in &output.cash {
        let cash_inflow = *cash.cash_inflow;
        cumulative_cashflow += cash_inflow;

        let holdings = holdings_by_date.remove(&cash.date).unwrap_or_default();
        let total_holding_value: f64 = holdings.iter().map(|(_, v)| v).sum();
        let total_portfolio_value = *cash.cash_balance + total_holding_value;

        let net_cumulative_gain = total_portfolio_value - cumulative_cashflow;
        let net_daily_return =
            if prev_total > 0.0 { Some((total_portfolio_value - cash_inflow) / prev_total - 1.0) } else { None };

        let trading = calendar.row(cash.date).map(|r| !r.trading_tickers.is_empty()).unwrap_or(false);

        points.push(DailyPoint {
            date: cash.date,
            cumulative_cashflow,
            total_portfolio_value,
            net_cumulative_gain,
            net_daily_return,
            trading,
            holdings,
        });

        prev_total = total_portfolio_value;
    }

    points
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Compound a bucket of daily returns into one period return, `∏(1+r) − 1`.
fn compound(returns: &[f64]) -> f64 {
    returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
}

fn aggregate_periods(filtered: &[(NaiveDate, f64)], horizon: Frequency) -> Vec<ReturnPoint> {
    let mut buckets: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for (date, r) in filtered {
        buckets.entry(period_start(*date, horizon)).or_default().push(*r);
    }
    buckets
        .into_iter()
        .map(|(start, rs)| ReturnPoint { period: period_label(start, horizon), return_value: compound(&rs), period_start: start })
        .collect()
}

/// Peak/valley/recovery episode extraction from a wealth index series.
/// Generalises the teacher's single-worst-episode `CalculationAlgos::maxdd`
/// into a full list (4.7's "extract drawdown episodes ... and report the worst").
fn drawdown_episodes(wealth: &[(NaiveDate, f64)]) -> Vec<DrawdownEpisode> {
    if wealth.is_empty() {
        return Vec::new();
    }

    let mut episodes = Vec::new();
    let mut peak_value = wealth[0].1;
    let mut peak_date = wealth[0].0;
    let mut valley_value = wealth[0].1;
    let mut valley_date = wealth[0].0;
    let mut in_drawdown = false;

    for &(date, value) in &wealth[1..] {
        if value >= peak_value {
            if in_drawdown {
                episodes.push(DrawdownEpisode {
                    start: peak_date,
                    end: date,
                    days: (date - peak_date).num_days(),
                    max_drawdown: valley_value / peak_value - 1.0,
                    max_drawdown_date: valley_date,
                });
                in_drawdown = false;
            }
            peak_value = value;
            peak_date = date;
            valley_value = value;
            valley_date = date;
        } else {
            in_drawdown = true;
            if value < valley_value {
                valley_value = value;
                valley_date = date;
            }
        }
    }

    if in_drawdown {
        let (last_date, _) = *wealth.last().expect("non-empty checked above");
        episodes.push(DrawdownEpisode {
            start: peak_date,
            end: last_date,
            days: (last_date - peak_date).num_days(),
            max_drawdown: valley_value / peak_value - 1.0,
            max_drawdown_date: valley_date,
        });
    }

    episodes
}

/// Fixed six-bucket monthly-return histogram (4.7), ordered low to high,
/// zero counts included.
fn monthly_histogram(monthly: &[ReturnPoint]) -> Vec<HistogramBucket> {
    let boundaries: [(&str, f64, f64); 6] = [
        ("< -10%", f64::NEG_INFINITY, -0.10),
        ("-10% to -5%", -0.10, -0.05),
        ("-5% to 0%", -0.05, 0.0),
        ("0% to 5%", 0.0, 0.05),
        ("5% to 10%", 0.05, 0.10),
        (">= 10%", 0.10, f64::INFINITY),
    ];
    boundaries
        .iter()
        .map(|(label, lo, hi)| {
            let count = monthly.iter().filter(|p| p.return_value >= *lo && p.return_value < *hi).count();
            HistogramBucket { bucket: label.to_string(), count }
        })
        .collect()
}

/// Run the full analytic pipeline over one engine's output (4.7). `benchmark_growth`
/// is the (optional) pivoted series from [`crate::benchmark::simulate_benchmarks`].
pub fn analyse(calendar: &Calendar, output: &EngineOutput, benchmark_growth: Option<BenchmarkGrowth>) -> AnalysisResults {
    let points = build_daily_points(calendar, output);

    let portfolio_growth: Vec<PortfolioGrowthPoint> = points
        .iter()
        .map(|p| PortfolioGrowthPoint {
            date: p.date,
            contributions: CashValue::from(p.cumulative_cashflow),
            gain: CashValue::from(p.net_cumulative_gain),
            value: CashValue::from(p.total_portfolio_value),
        })
        .collect();

    // Overall metrics and everything from here on restrict to days where at
    // least one ticker was trading (4.7, "For overall metrics, restrict...").
    let filtered: Vec<(NaiveDate, f64)> =
        points.iter().filter(|p| p.trading).filter_map(|p| p.net_daily_return.map(|r| (p.date, r))).collect();

    let portfolio_balance: Vec<PortfolioBalancePoint> = points
        .iter()
        .filter(|p| p.trading)
        .map(|p| {
            let total_holding_value: f64 = p.holdings.iter().map(|(_, v)| v).sum();
            let mut holdings: Vec<HoldingBalance> = p
                .holdings
                .iter()
                .map(|(ticker, value)| HoldingBalance {
                    ticker: ticker.clone(),
                    value: CashValue::from(*value),
                    weight: if total_holding_value > 0.0 { value / total_holding_value } else { 0.0 },
                })
                .collect();
            holdings.sort_by(|a, b| a.ticker.cmp(&b.ticker));
            PortfolioBalancePoint { date: p.date, holdings }
        })
        .collect();

    let mut wealth = Vec::with_capacity(filtered.len() + 1);
    let mut w = 1.0;
    for &(date, r) in &filtered {
        w *= 1.0 + r;
        wealth.push((date, w));
    }

    let n = filtered.len() as f64;
    let years = n / TRADING_DAYS_PER_YEAR;
    let final_wealth = wealth.last().map(|(_, v)| *v).unwrap_or(1.0);
    let cagr = if years > 0.0 && final_wealth > 0.0 { final_wealth.powf(1.0 / years) - 1.0 } else { 0.0 };
    let cmgr = (1.0 + cagr).powf(1.0 / 12.0) - 1.0;

    let returns_only: Vec<f64> = filtered.iter().map(|(_, r)| *r).collect();
    let mean_return = mean(&returns_only);
    let std_return = population_std_dev(&returns_only);
    let volatility = std_return * TRADING_DAYS_PER_YEAR.sqrt();
    let sharpe = if std_return == 0.0 {
        if mean_return != 0.0 { mean_return * TRADING_DAYS_PER_YEAR.sqrt() } else { 0.0 }
    } else {
        (mean_return / std_return) * TRADING_DAYS_PER_YEAR.sqrt()
    };

    let episodes = drawdown_episodes(&wealth);
    let max_drawdown = episodes
        .iter()
        .min_by(|a, b| a.max_drawdown.partial_cmp(&b.max_drawdown).expect("drawdown is never NaN"))
        .cloned();

    let mut returns: BTreeMap<String, Vec<ReturnPoint>> = BTreeMap::new();
    let mut best_periods: BTreeMap<String, ReturnPoint> = BTreeMap::new();
    let mut worst_periods: BTreeMap<String, ReturnPoint> = BTreeMap::new();
    let mut monthly_points: Vec<ReturnPoint> = Vec::new();

    for horizon in PERIOD_HORIZONS {
        let key = horizon_key(horizon).to_string();
        let points_for_horizon = aggregate_periods(&filtered, horizon);
        if horizon == Frequency::Monthly {
            monthly_points = points_for_horizon.clone();
        }
        if let Some(best) = points_for_horizon
            .iter()
            .max_by(|a, b| a.return_value.partial_cmp(&b.return_value).expect("return is never NaN"))
        {
            best_periods.insert(key.clone(), best.clone());
        }
        if let Some(worst) = points_for_horizon
            .iter()
            .min_by(|a, b| a.return_value.partial_cmp(&b.return_value).expect("return is never NaN"))
        {
            worst_periods.insert(key.clone(), worst.clone());
        }
        returns.insert(key, points_for_horizon);
    }

    let win = monthly_points.iter().filter(|p| p.return_value >= 0.0).count();
    let loss = monthly_points.iter().filter(|p| p.return_value < 0.0).count();
    let rate = if win + loss > 0 { win as f64 / (win + loss) as f64 } else { 0.0 };
    let monthly_win_lose_analysis = WinLoseAnalysis { win, loss, rate };

    let monthly_returns_histogram = monthly_histogram(&monthly_points);

    let last = points.last();
    let metrics = Metrics {
        total_contributions: CashValue::from(last.map(|p| p.cumulative_cashflow).unwrap_or(0.0)),
        final_value: CashValue::from(last.map(|p| p.total_portfolio_value).unwrap_or(0.0)),
        cumulative_gain: CashValue::from(last.map(|p| p.net_cumulative_gain).unwrap_or(0.0)),
        cumulative_return: last
            .map(|p| if p.cumulative_cashflow > 0.0 { p.total_portfolio_value / p.cumulative_cashflow - 1.0 } else { 0.0 })
            .unwrap_or(0.0),
        cagr,
        cmgr,
        sharpe,
        volatility,
    };

    AnalysisResults {
        metrics,
        max_drawdown,
        monthly_win_lose_analysis,
        best_periods,
        worst_periods,
        chart_data: ChartData { portfolio_growth, returns, monthly_returns_histogram, portfolio_balance, benchmark_growth },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::{BacktestConfig, RawBacktestConfig, RebalanceFrequency, Strategy};
    use crate::data::{prepare, AssetMeta, FxTable, RawBar};
    use crate::engine::basic::BasicEngine;
    use crate::engine::{Engine, PriceIndex};
    use crate::types::{Currency, Mode};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn run_single_asset(prices: &[(&str, f64)]) -> (Calendar, EngineOutput) {
        let raw = RawBacktestConfig {
            mode: Mode::Basic,
            base_currency: Currency::GBP,
            start_date: prices[0].0.to_string(),
            end_date: prices[prices.len() - 1].0.to_string(),
            target_weights: HashMap::from([("AAPL".to_string(), 1.0)]),
            initial_investment: 1000.0,
            strategy: Strategy { allow_fractional_shares: true, reinvest_dividends: true, rebalance_frequency: RebalanceFrequency::Never },
            recurring_investment: None,
        };
        let config = BacktestConfig::from_raw(raw).unwrap();

        let bars: Vec<RawBar> = prices
            .iter()
            .map(|(date, price)| RawBar { date: d(date), ticker: Ticker::new("AAPL"), close: *price, adjusted_close: *price, is_trading_day: true, dividend: None })
            .collect();
        let mut assets = HashMap::new();
        assets.insert(Ticker::new("AAPL"), AssetMeta { ticker: Ticker::new("AAPL"), display_name: "Apple".into(), native_currency: Currency::GBP });
        let fx = FxTable::new();
        let prepared = prepare(Mode::Basic, Currency::GBP, &config.tickers(), config.start_date, config.end_date, &bars, &assets, &fx).unwrap();
        let calendar = Calendar::build(&prepared, config.start_date, config.end_date);
        let index = PriceIndex::build(&prepared);
        let output = BasicEngine::run(&config, &calendar, &index).unwrap();
        (calendar, output)
    }

    #[test]
    fn rising_prices_produce_positive_cagr_and_zero_max_drawdown() {
        let (calendar, output) = run_single_asset(&[("2020-01-02", 100.0), ("2020-01-03", 110.0), ("2020-01-06", 121.0)]);
        let results = analyse(&calendar, &output, None);

        assert!(results.metrics.cagr > 0.0);
        assert!((*results.metrics.final_value - 1210.0).abs() < 1e-6);
        assert!(results.max_drawdown.is_none() || results.max_drawdown.as_ref().unwrap().max_drawdown >= -1e-9);
    }

    #[test]
    fn a_price_dip_then_recovery_produces_one_drawdown_episode() {
        let (calendar, output) =
            run_single_asset(&[("2020-01-02", 100.0), ("2020-01-03", 80.0), ("2020-01-06", 70.0), ("2020-01-07", 105.0)]);
        let results = analyse(&calendar, &output, None);

        assert_eq!(results.max_drawdown.is_some(), true);
        let worst = results.max_drawdown.unwrap();
        assert!(worst.max_drawdown < 0.0);
        assert_eq!(worst.max_drawdown_date, d("2020-01-06"));
    }

    #[test]
    fn monthly_histogram_buckets_sum_to_monthly_count() {
        let (calendar, output) =
            run_single_asset(&[("2020-01-02", 100.0), ("2020-02-03", 90.0), ("2020-03-02", 108.0)]);
        let results = analyse(&calendar, &output, None);

        let total: usize = results.chart_data.monthly_returns_histogram.iter().map(|b| b.count).sum();
        assert_eq!(total, results.monthly_win_lose_analysis.win + results.monthly_win_lose_analysis.loss);
    }

    #[test]
    fn cumulative_gain_matches_value_minus_contributions() {
        let (calendar, output) = run_single_asset(&[("2020-01-02", 100.0), ("2020-01-03", 150.0)]);
        let results = analyse(&calendar, &output, None);

        let expected = *results.metrics.final_value - *results.metrics.total_contributions;
        assert!((*results.metrics.cumulative_gain - expected).abs() < 1e-6);
    }
}
