//! The basic engine variant (4.4): idealised, instant settlement at adjusted
//! prices. Every buy happens the same day the cash becomes available; there
//! is no order queue because nothing ever waits for a trading day.

use log::{debug, info};

use crate::calendar::Calendar;
use crate::config::BacktestConfig;
use crate::dates::generate_recurring_dates;
use crate::engine::{Engine, EngineOutput, PriceIndex};
use crate::error::Result;
use crate::portfolio::basic::BasicPortfolio;
use crate::portfolio::Portfolio;
use crate::types::{PortfolioAllocation, Ticker};

pub struct BasicEngine;

impl Engine for BasicEngine {
    fn run(config: &BacktestConfig, calendar: &Calendar, prices: &PriceIndex) -> Result<EngineOutput> {
        let mut portfolio = BasicPortfolio::new();
        let mut output = EngineOutput::default();

        let rebalance_dates = config
            .strategy
            .rebalance_frequency
            .as_dates_frequency()
            .map(|freq| generate_recurring_dates(config.start_date, config.end_date, freq))
            .unwrap_or_default();
        let cashflow_dates = config
            .recurring_investment
            .as_ref()
            .map(|r| generate_recurring_dates(config.start_date, config.end_date, r.frequency))
            .unwrap_or_default();

        let mut invested = false;

        for date in calendar.dates() {
            portfolio.daily_reset();

            if date == config.start_date {
                info!("ENGINE(basic): depositing initial investment {} on {date}", config.initial_investment);
                portfolio.add_cash(config.initial_investment)?;
                invested = false;
            }

            if cashflow_dates.contains(&date) {
                let amount = config.recurring_investment.as_ref().expect("cashflow_dates non-empty implies recurring_investment").amount;
                debug!("ENGINE(basic): recurring cashflow {amount} on {date}");
                portfolio.add_cash(amount)?;
                invested = false;
            }

            let before_first_active = calendar.first_active_date().map_or(true, |fad| date < fad);
            if before_first_active {
                output.cash.push(portfolio.cash_snapshot(date));
                continue;
            }

            let active: Vec<Ticker> = {
                let mut t: Vec<Ticker> = calendar.active_tickers(date).into_iter().collect();
                t.sort();
                t
            };
            let day_prices = prices.all_prices_on(date);

            let is_rebalance_day = rebalance_dates.contains(&date);
            if !invested || is_rebalance_day {
                let normalized_weights = config.target_portfolio.normalized_over(&active);

                if is_rebalance_day {
                    let total_value = portfolio.get_total_value(&day_prices);
                    let liquidation_proceeds = *total_value - *portfolio.get_available_cash();
                    info!("ENGINE(basic): rebalancing on {date}, total value {}", *total_value);
                    portfolio.clear_holdings();
                    // Rebalance liquidates every holding into cash, then
                    // reinvests per target weight (4.4 step 6).
                    if liquidation_proceeds > 0.0 {
                        portfolio.add_cash(liquidation_proceeds)?;
                    }
                    invest_allocation(&mut portfolio, &normalized_weights, &day_prices, date)?;
                    portfolio.mark_rebalanced();
                } else {
                    invest_allocation(&mut portfolio, &normalized_weights, &day_prices, date)?;
                }
                invested = true;
            }

            output.cash.push(portfolio.cash_snapshot(date));
            output.holdings.extend(portfolio.holdings_snapshot(date, &day_prices));
        }

        Ok(output)
    }
}

/// Spend all available cash across `weights`, in ticker order, so two runs
/// over identical data invest in the same sequence (P8).
fn invest_allocation(portfolio: &mut BasicPortfolio, weights: &PortfolioAllocation, prices: &std::collections::BTreeMap<Ticker, f64>, date: chrono::NaiveDate) -> Result<()> {
    if weights.is_empty() {
        return Ok(());
    }
    let available = *portfolio.get_available_cash();
    if available <= 0.0 {
        return Ok(());
    }
    for (ticker, weight) in weights.iter() {
        let funds = available * **weight;
        if funds <= 0.0 {
            continue;
        }
        if let Some(price) = prices.get(ticker) {
            if *price > 0.0 {
                portfolio.invest(ticker, funds, *price, true)?;
            }
        } else {
            debug!("ENGINE(basic): no price for {ticker} on {date}, skipping allocation");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::NaiveDate;

    use super::*;
    use crate::config::{RawBacktestConfig, RebalanceFrequency, Strategy};
    use crate::data::{prepare, AssetMeta, FxTable, RawBar};
    use crate::types::{Currency, Mode};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn single_asset_config(start: &str, end: &str) -> BacktestConfig {
        let raw = RawBacktestConfig {
            mode: Mode::Basic,
            base_currency: Currency::GBP,
            start_date: start.to_string(),
            end_date: end.to_string(),
            target_weights: HashMap::from([("AAPL".to_string(), 1.0)]),
            initial_investment: 1000.0,
            strategy: Strategy { allow_fractional_shares: true, reinvest_dividends: true, rebalance_frequency: RebalanceFrequency::Never },
            recurring_investment: None,
        };
        BacktestConfig::from_raw(raw).unwrap()
    }

    fn bars(pairs: &[(&str, f64)]) -> Vec<RawBar> {
        pairs
            .iter()
            .map(|(date, price)| RawBar {
                date: d(date),
                ticker: Ticker::new("AAPL"),
                close: *price,
                adjusted_close: *price,
                is_trading_day: true,
                dividend: None,
            })
            .collect()
    }

    /// Scenario 1 (8): single asset, instant settle.
    #[test]
    fn single_asset_instant_settle_matches_spec_scenario() {
        let config = single_asset_config("2020-01-02", "2020-01-03");
        let raw = bars(&[("2020-01-02", 100.0), ("2020-01-03", 110.0)]);
        let mut assets = HashMap::new();
        assets.insert(Ticker::new("AAPL"), AssetMeta { ticker: Ticker::new("AAPL"), display_name: "Apple".into(), native_currency: Currency::GBP });
        let fx = FxTable::new();
        let prepared = prepare(Mode::Basic, Currency::GBP, &config.tickers(), config.start_date, config.end_date, &raw, &assets, &fx).unwrap();
        let calendar = Calendar::build(&prepared, config.start_date, config.end_date);
        let index = PriceIndex::build(&prepared);

        let output = BasicEngine::run(&config, &calendar, &index).unwrap();

        assert_eq!(output.holdings.len(), 2);
        assert!((*output.holdings[0].units - 10.0).abs() < 1e-9);
        assert!((*output.holdings[1].units - 10.0).abs() < 1e-9);

        let day1_total = *output.cash[0].cash_balance + *output.holdings[0].units * *output.holdings[0].base_price;
        let day2_total = *output.cash[1].cash_balance + *output.holdings[1].units * *output.holdings[1].base_price;
        assert!((day1_total - 1000.0).abs() < 1e-6);
        assert!((day2_total - 1100.0).abs() < 1e-6);
    }

    /// Scenario 2 (8): split weights with a rebalance.
    #[test]
    fn split_weights_rebalance_equalises_post_rebalance_values() {
        let raw_config = RawBacktestConfig {
            mode: Mode::Basic,
            base_currency: Currency::GBP,
            start_date: "2020-01-01".to_string(),
            end_date: "2020-02-01".to_string(),
            target_weights: HashMap::from([("A".to_string(), 0.5), ("B".to_string(), 0.5)]),
            initial_investment: 1000.0,
            strategy: Strategy { allow_fractional_shares: true, reinvest_dividends: true, rebalance_frequency: RebalanceFrequency::Monthly },
            recurring_investment: None,
        };
        let config = BacktestConfig::from_raw(raw_config).unwrap();

        let mut raw = Vec::new();
        raw.push(RawBar { date: d("2020-01-01"), ticker: Ticker::new("A"), close: 100.0, adjusted_close: 100.0, is_trading_day: true, dividend: None });
        raw.push(RawBar { date: d("2020-01-01"), ticker: Ticker::new("B"), close: 100.0, adjusted_close: 100.0, is_trading_day: true, dividend: None });
        raw.push(RawBar { date: d("2020-02-01"), ticker: Ticker::new("A"), close: 120.0, adjusted_close: 120.0, is_trading_day: true, dividend: None });
        raw.push(RawBar { date: d("2020-02-01"), ticker: Ticker::new("B"), close: 90.0, adjusted_close: 90.0, is_trading_day: true, dividend: None });

        let mut assets = HashMap::new();
        assets.insert(Ticker::new("A"), AssetMeta { ticker: Ticker::new("A"), display_name: "A".into(), native_currency: Currency::GBP });
        assets.insert(Ticker::new("B"), AssetMeta { ticker: Ticker::new("B"), display_name: "B".into(), native_currency: Currency::GBP });
        let fx = FxTable::new();

        let prepared = prepare(Mode::Basic, Currency::GBP, &config.tickers(), config.start_date, config.end_date, &raw, &assets, &fx).unwrap();
        let calendar = Calendar::build(&prepared, config.start_date, config.end_date);
        let index = PriceIndex::build(&prepared);

        let output = BasicEngine::run(&config, &calendar, &index).unwrap();

        let last_date = d("2020-02-01");
        let last_holdings: Vec<_> = output.holdings.iter().filter(|h| h.date == last_date).collect();
        let value_a = last_holdings.iter().find(|h| h.ticker == Ticker::new("A")).map(|h| *h.units * *h.base_price).unwrap();
        let value_b = last_holdings.iter().find(|h| h.ticker == Ticker::new("B")).map(|h| *h.units * *h.base_price).unwrap();
        assert!((value_a - 525.0).abs() < 1e-6);
        assert!((value_b - 525.0).abs() < 1e-6);
    }

    #[test]
    fn days_before_first_active_date_hold_only_cash() {
        let config = single_asset_config("2020-01-01", "2020-01-03");
        let raw = bars(&[("2020-01-02", 100.0), ("2020-01-03", 110.0)]);
        let mut assets = HashMap::new();
        assets.insert(Ticker::new("AAPL"), AssetMeta { ticker: Ticker::new("AAPL"), display_name: "Apple".into(), native_currency: Currency::GBP });
        let fx = FxTable::new();
        let prepared = prepare(Mode::Basic, Currency::GBP, &config.tickers(), config.start_date, config.end_date, &raw, &assets, &fx).unwrap();
        let calendar = Calendar::build(&prepared, config.start_date, config.end_date);
        let index = PriceIndex::build(&prepared);

        let output = BasicEngine::run(&config, &calendar, &index).unwrap();
        let first_day_holdings = output.holdings.iter().filter(|h| h.date == d("2020-01-01")).count();
        assert_eq!(first_day_holdings, 0);
        assert_eq!(*output.cash[0].cash_balance, 1000.0);
    }
}
