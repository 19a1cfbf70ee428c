//! The realistic engine variant (4.5): next-trading-day settlement, honours
//! `allow_fractional_shares`, processes explicit per-bar dividends, and only
//! rebalances when every active ticker is also trading.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use log::{debug, info, warn};

use crate::calendar::Calendar;
use crate::config::BacktestConfig;
use crate::dates::{generate_recurring_dates, has_interval_elapsed};
use crate::engine::{Engine, EngineOutput, PriceIndex};
use crate::error::{BacktestError, Result};
use crate::orders::{Order, OrderBook, OrderSide, OrderSnapshot};
use crate::portfolio::realistic::RealisticPortfolio;
use crate::portfolio::{DividendPortfolio, Portfolio};
use crate::types::{PortfolioAllocation, Ticker};

pub struct RealisticEngine;

impl Engine for RealisticEngine {
    fn run(config: &BacktestConfig, calendar: &Calendar, prices: &PriceIndex) -> Result<EngineOutput> {
        let mut portfolio = RealisticPortfolio::new();
        let mut order_book = OrderBook::new();
        let mut output = EngineOutput::default();

        let cashflow_dates = config
            .recurring_investment
            .as_ref()
            .map(|r| generate_recurring_dates(config.start_date, config.end_date, r.frequency))
            .unwrap_or_default();

        let mut previous_rebalance_date = calendar.first_active_date().unwrap_or(config.start_date);

        for date in calendar.dates() {
            portfolio.daily_reset();
            let mut place_order = false;

            if date == config.start_date {
                info!("ENGINE(realistic): depositing initial investment {} on {date}", config.initial_investment);
                portfolio.add_cash(config.initial_investment)?;
                place_order = true;
            }

            if cashflow_dates.contains(&date) {
                let amount = config.recurring_investment.as_ref().expect("cashflow_dates non-empty implies recurring_investment").amount;
                debug!("ENGINE(realistic): recurring cashflow {amount} on {date}");
                portfolio.add_cash(amount)?;
                place_order = true;
            }

            let before_first_active = calendar.first_active_date().map_or(true, |fad| date < fad);
            if before_first_active {
                output.cash.push(portfolio.cash_snapshot(date));
                continue;
            }

            let day_prices = prices.all_prices_on(date);

            let dividends_today = prices.dividends_on(date);
            if !dividends_today.is_empty() {
                let total = portfolio.process_dividends(&dividends_today);
                if *total > 0.0 {
                    if config.strategy.reinvest_dividends {
                        debug!("ENGINE(realistic): reinvesting dividend income {} on {date}", *total);
                        portfolio.add_cash(*total)?;
                        place_order = true;
                    } else {
                        debug!("ENGINE(realistic): booking dividend income {} on {date}", *total);
                        portfolio.book_dividend_income(*total);
                    }
                }
            }

            let active: HashSet<Ticker> = calendar.active_tickers(date);
            let mut active_sorted: Vec<Ticker> = active.iter().cloned().collect();
            active_sorted.sort();

            let rebalancing = should_rebalance(config, calendar, date, &active, previous_rebalance_date);

            if place_order || rebalancing {
                let normalized_weights = config.target_portfolio.normalized_over(&active_sorted);

                if rebalancing {
                    info!("ENGINE(realistic): rebalancing on {date}");
                    queue_rebalance_orders(&mut order_book, &portfolio, &normalized_weights, &day_prices, calendar, date);
                    portfolio.mark_rebalanced();
                    previous_rebalance_date = date;
                } else {
                    queue_cashflow_orders(&mut order_book, &portfolio, &normalized_weights, calendar, date);
                }
            }

            for order in order_book.due_on(date) {
                settle(&mut portfolio, &mut order_book, order, &day_prices, config.strategy.allow_fractional_shares, date)?;
            }

            output.cash.push(portfolio.cash_snapshot(date));
            output.holdings.extend(portfolio.holdings_snapshot(date, &day_prices));
            output.dividends.extend(portfolio.dividend_snapshot(date));
        }

        output.orders = order_book.executed().iter().chain(order_book.pending_at_end().iter()).map(OrderSnapshot::from).collect();

        Ok(output)
    }
}

/// True iff every active ticker trades today and the configured rebalance
/// interval has elapsed since the last rebalance (4.5).
fn should_rebalance(config: &BacktestConfig, calendar: &Calendar, date: NaiveDate, active: &HashSet<Ticker>, previous_rebalance_date: NaiveDate) -> bool {
    let Some(frequency) = config.strategy.rebalance_frequency.as_dates_frequency() else {
        return false;
    };
    if !calendar.all_trading(date, active) {
        return false;
    }
    has_interval_elapsed(previous_rebalance_date, date, frequency)
}

/// Queue correction orders so each ticker reaches its target weight of the
/// portfolio's current total value (4.5's rebalance procedure).
fn queue_rebalance_orders(order_book: &mut OrderBook, portfolio: &RealisticPortfolio, weights: &PortfolioAllocation, prices: &BTreeMap<Ticker, f64>, calendar: &Calendar, date: NaiveDate) {
    let total_value = *portfolio.get_total_value(prices);
    for (ticker, weight) in weights.iter() {
        let target_value = total_value * **weight;
        let actual_value = portfolio.holdings().get(ticker).map(|qty| **qty).unwrap_or(0.0) * prices.get(ticker).copied().unwrap_or(0.0);
        let correction = target_value - actual_value;
        let date_executed = calendar.next_trading_date(ticker, date);
        if date_executed.is_none() {
            warn!("ENGINE(realistic): no trading day on/after {date} for {ticker}, order stays pending indefinitely");
        }
        if correction > 0.0 {
            order_book.queue(ticker.clone(), correction, OrderSide::Buy, date, date_executed);
        } else if correction < 0.0 {
            order_book.queue(ticker.clone(), -correction, OrderSide::Sell, date, date_executed);
        }
    }
}

/// Queue buy orders sized by `weights x available_cash` (4.5's non-rebalance
/// branch for cashflow/dividend-driven investment).
fn queue_cashflow_orders(order_book: &mut OrderBook, portfolio: &RealisticPortfolio, weights: &PortfolioAllocation, calendar: &Calendar, date: NaiveDate) {
    let available = *portfolio.get_available_cash();
    if available <= 0.0 || weights.is_empty() {
        return;
    }
    for (ticker, weight) in weights.iter() {
        let funds = available * **weight;
        let date_executed = calendar.next_trading_date(ticker, date);
        if date_executed.is_none() {
            warn!("ENGINE(realistic): no trading day on/after {date} for {ticker}, order stays pending indefinitely");
        }
        order_book.queue(ticker.clone(), funds, OrderSide::Buy, date, date_executed);
    }
}

/// Execute one order settling today: look up today's price (fatal if
/// missing, 7), apply it to the portfolio, and record the outcome.
fn settle(portfolio: &mut RealisticPortfolio, order_book: &mut OrderBook, order: Order, prices: &BTreeMap<Ticker, f64>, allow_fractional: bool, date: NaiveDate) -> Result<()> {
    let Some(price) = prices.get(&order.ticker).copied() else {
        return Err(BacktestError::MissingPriceForSettlement { ticker: order.ticker.to_string(), date: date.to_string() });
    };

    let units = match order.side {
        OrderSide::Buy => portfolio.invest(&order.ticker, order.target_value, price, allow_fractional)?,
        OrderSide::Sell => portfolio.sell(&order.ticker, order.target_value, price, allow_fractional)?,
    };
    if units > 0.0 {
        match order.side {
            OrderSide::Buy => portfolio.mark_buy(),
            OrderSide::Sell => portfolio.mark_sell(),
        }
    }
    order_book.record_executed(order, units, price);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::{RawBacktestConfig, RebalanceFrequency, Strategy};
    use crate::data::{prepare, AssetMeta, FxTable, RawBar};
    use crate::dates::Frequency;
    use crate::orders::OrderStatus;
    use crate::types::{Currency, Mode};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    /// Scenario 3 (8): an order placed on a non-trading day settles on the
    /// next trading day, at that day's price.
    #[test]
    fn recurring_order_settles_next_trading_day() {
        let raw_config = RawBacktestConfig {
            mode: Mode::Realistic,
            base_currency: Currency::GBP,
            start_date: "2020-01-01".to_string(),
            end_date: "2020-01-15".to_string(),
            target_weights: HashMap::from([("X".to_string(), 1.0)]),
            initial_investment: 1000.0,
            strategy: Strategy { allow_fractional_shares: true, reinvest_dividends: true, rebalance_frequency: RebalanceFrequency::Never },
            recurring_investment: Some(crate::config::RecurringInvestment { amount: 100.0, frequency: Frequency::Weekly }),
        };
        let config = BacktestConfig::from_raw(raw_config).unwrap();

        let mut raw = Vec::new();
        for day in 1..=15 {
            let date = NaiveDate::from_ymd_opt(2020, 1, day).unwrap();
            // 2020-01-08 is a non-trading holiday; every other day trades.
            let is_trading = day != 8;
            raw.push(RawBar { date, ticker: Ticker::new("X"), close: 100.0 + day as f64, adjusted_close: 100.0 + day as f64, is_trading_day: is_trading, dividend: None });
        }
        let mut assets = HashMap::new();
        assets.insert(Ticker::new("X"), AssetMeta { ticker: Ticker::new("X"), display_name: "X".into(), native_currency: Currency::GBP });
        let fx = FxTable::new();

        let prepared = prepare(Mode::Realistic, Currency::GBP, &config.tickers(), config.start_date, config.end_date, &raw, &assets, &fx).unwrap();
        let calendar = Calendar::build(&prepared, config.start_date, config.end_date);
        let index = PriceIndex::build(&prepared);

        let output = RealisticEngine::run(&config, &calendar, &index).unwrap();

        let order = output
            .orders
            .iter()
            .find(|o| o.date_placed == d("2020-01-08") && o.status == OrderStatus::Fulfilled)
            .expect("order placed on the holiday should have settled");
        assert_eq!(order.date_executed, Some(d("2020-01-09")));
    }

    /// Scenario 6 (8): dividend income booked to cash, not reinvested.
    #[test]
    fn dividend_income_booked_when_not_reinvesting() {
        let raw_config = RawBacktestConfig {
            mode: Mode::Realistic,
            base_currency: Currency::GBP,
            start_date: "2020-01-02".to_string(),
            end_date: "2020-01-03".to_string(),
            target_weights: HashMap::from([("X".to_string(), 1.0)]),
            initial_investment: 1000.0,
            strategy: Strategy { allow_fractional_shares: true, reinvest_dividends: false, rebalance_frequency: RebalanceFrequency::Never },
            recurring_investment: None,
        };
        let config = BacktestConfig::from_raw(raw_config).unwrap();

        let raw = vec![
            RawBar { date: d("2020-01-02"), ticker: Ticker::new("X"), close: 10.0, adjusted_close: 10.0, is_trading_day: true, dividend: None },
            RawBar { date: d("2020-01-03"), ticker: Ticker::new("X"), close: 10.0, adjusted_close: 10.0, is_trading_day: true, dividend: Some(0.5) },
        ];
        let mut assets = HashMap::new();
        assets.insert(Ticker::new("X"), AssetMeta { ticker: Ticker::new("X"), display_name: "X".into(), native_currency: Currency::GBP });
        let fx = FxTable::new();

        let prepared = prepare(Mode::Realistic, Currency::GBP, &config.tickers(), config.start_date, config.end_date, &raw, &assets, &fx).unwrap();
        let calendar = Calendar::build(&prepared, config.start_date, config.end_date);
        let index = PriceIndex::build(&prepared);

        let output = RealisticEngine::run(&config, &calendar, &index).unwrap();

        let day2 = output.cash.iter().find(|c| c.date == d("2020-01-03")).unwrap();
        assert_eq!(*day2.dividend_income.unwrap(), 50.0);
        let day1_holding_units = output.holdings.iter().find(|h| h.date == d("2020-01-02")).unwrap().units;
        assert_eq!(*day1_holding_units, 100.0);
    }

    #[test]
    fn rebalance_skipped_when_a_component_is_not_trading() {
        let raw_config = RawBacktestConfig {
            mode: Mode::Realistic,
            base_currency: Currency::GBP,
            start_date: "2020-01-01".to_string(),
            end_date: "2020-01-10".to_string(),
            target_weights: HashMap::from([("A".to_string(), 0.5), ("B".to_string(), 0.5)]),
            initial_investment: 1000.0,
            strategy: Strategy { allow_fractional_shares: true, reinvest_dividends: true, rebalance_frequency: RebalanceFrequency::Daily },
            recurring_investment: None,
        };
        let config = BacktestConfig::from_raw(raw_config).unwrap();

        let mut raw = Vec::new();
        for day in 1..=10 {
            let date = NaiveDate::from_ymd_opt(2020, 1, day).unwrap();
            raw.push(RawBar { date, ticker: Ticker::new("A"), close: 100.0, adjusted_close: 100.0, is_trading_day: true, dividend: None });
            // B never trades after day 1: every later active day is non-trading.
            raw.push(RawBar { date, ticker: Ticker::new("B"), close: 100.0, adjusted_close: 100.0, is_trading_day: day == 1, dividend: None });
        }
        let mut assets = HashMap::new();
        assets.insert(Ticker::new("A"), AssetMeta { ticker: Ticker::new("A"), display_name: "A".into(), native_currency: Currency::GBP });
        assets.insert(Ticker::new("B"), AssetMeta { ticker: Ticker::new("B"), display_name: "B".into(), native_currency: Currency::GBP });
        let fx = FxTable::new();

        let prepared = prepare(Mode::Realistic, Currency::GBP, &config.tickers(), config.start_date, config.end_date, &raw, &assets, &fx).unwrap();
        let calendar = Calendar::build(&prepared, config.start_date, config.end_date);
        let index = PriceIndex::build(&prepared);

        let output = RealisticEngine::run(&config, &calendar, &index).unwrap();
        let rebalance_days = output.cash.iter().filter(|c| c.did_rebalance).count();
        // Only day 1 has both components trading.
        assert_eq!(rebalance_days, 0);
    }
}
