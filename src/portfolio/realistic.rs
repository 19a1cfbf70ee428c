//! The realistic portfolio (4.3, `realistic.py`): honours the
//! `allow_fractional_shares` flag with floor/ceil unit arithmetic, and tracks
//! per-day dividend records separately from cash, since dividends may be
//! reinvested or booked as realised income depending on strategy.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::error::{BacktestError, Result};
use crate::portfolio::{total_value, CashSnapshot, DividendPortfolio, DividendSnapshot, HoldingSnapshot, Portfolio};
use crate::types::{CashValue, PortfolioQty, Price, Ticker};

#[derive(Debug, Clone)]
struct DividendRecord {
    ticker: Ticker,
    per_unit: f64,
    total: f64,
}

#[derive(Debug, Default)]
pub struct RealisticPortfolio {
    cash_balance: CashValue,
    cash_inflow: CashValue,
    holdings: BTreeMap<Ticker, PortfolioQty>,
    did_rebalance: bool,
    did_buy: bool,
    did_sell: bool,
    dividend_income: CashValue,
    dividends: Vec<DividendRecord>,
}

impl RealisticPortfolio {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Portfolio for RealisticPortfolio {
    fn daily_reset(&mut self) {
        self.cash_inflow = CashValue::from(0.0);
        self.did_rebalance = false;
        self.did_buy = false;
        self.did_sell = false;
        self.dividend_income = CashValue::from(0.0);
        self.dividends.clear();
    }

    fn add_cash(&mut self, amount: f64) -> Result<()> {
        if amount <= 0.0 {
            return Err(BacktestError::NonPositiveTradeAmount(amount));
        }
        self.cash_balance += CashValue::from(amount);
        self.cash_inflow += CashValue::from(amount);
        Ok(())
    }

    fn get_available_cash(&self) -> CashValue {
        self.cash_balance
    }

    fn invest(&mut self, ticker: &Ticker, funds: f64, price: f64, allow_fractional: bool) -> Result<f64> {
        if funds <= 0.0 {
            return Err(BacktestError::NonPositiveTradeAmount(funds));
        }
        let units_bought = if allow_fractional { funds / price } else { (funds / price).floor() };
        if units_bought <= 0.0 {
            return Ok(0.0);
        }
        let total_cost = units_bought * price;

        let entry = self.holdings.entry(ticker.clone()).or_insert(PortfolioQty::from(0.0));
        *entry = PortfolioQty::from(**entry + units_bought);
        self.cash_balance -= CashValue::from(total_cost);
        self.did_buy = true;
        Ok(units_bought)
    }

    fn sell(&mut self, ticker: &Ticker, funds_needed: f64, price: f64, allow_fractional: bool) -> Result<f64> {
        if funds_needed <= 0.0 {
            return Err(BacktestError::NonPositiveTradeAmount(funds_needed));
        }
        let units_owned = self.holdings.get(ticker).copied().unwrap_or(PortfolioQty::from(0.0));
        if *units_owned <= 0.0 {
            return Ok(0.0);
        }

        let raw_units = if allow_fractional { funds_needed / price } else { (funds_needed / price).ceil() };
        let units_sold = raw_units.min(*units_owned);
        if units_sold <= 0.0 {
            return Ok(0.0);
        }
        let total_earnings = units_sold * price;

        self.holdings.insert(ticker.clone(), PortfolioQty::from(*units_owned - units_sold));
        self.cash_balance += CashValue::from(total_earnings);
        self.did_sell = true;
        Ok(units_sold)
    }

    fn get_total_value(&self, prices: &BTreeMap<Ticker, f64>) -> CashValue {
        total_value(self.cash_balance, &self.holdings, prices)
    }

    fn holdings(&self) -> &BTreeMap<Ticker, PortfolioQty> {
        &self.holdings
    }

    fn clear_holdings(&mut self) {
        self.holdings.clear();
    }

    fn mark_rebalanced(&mut self) {
        self.did_rebalance = true;
    }

    fn mark_buy(&mut self) {
        self.did_buy = true;
    }

    fn mark_sell(&mut self) {
        self.did_sell = true;
    }

    fn cash_snapshot(&self, date: NaiveDate) -> CashSnapshot {
        CashSnapshot {
            date,
            cash_balance: self.cash_balance,
            cash_inflow: self.cash_inflow,
            did_rebalance: self.did_rebalance,
            dividend_income: Some(self.dividend_income),
            did_buy: Some(self.did_buy),
            did_sell: Some(self.did_sell),
        }
    }

    fn holdings_snapshot(&self, date: NaiveDate, prices: &BTreeMap<Ticker, f64>) -> Vec<HoldingSnapshot> {
        self.holdings
            .iter()
            .filter(|(_, qty)| ***qty > 0.0)
            .map(|(ticker, qty)| HoldingSnapshot {
                date,
                ticker: ticker.clone(),
                units: *qty,
                base_price: Price::from(prices.get(ticker).copied().unwrap_or(0.0)),
            })
            .collect()
    }
}

impl DividendPortfolio for RealisticPortfolio {
    fn process_dividends(&mut self, per_unit_by_ticker: &BTreeMap<Ticker, f64>) -> CashValue {
        let mut total = 0.0;
        for (ticker, qty) in self.holdings.iter() {
            if **qty <= 0.0 {
                continue;
            }
            if let Some(per_unit) = per_unit_by_ticker.get(ticker) {
                let payment = **qty * per_unit;
                self.dividends.push(DividendRecord { ticker: ticker.clone(), per_unit: *per_unit, total: payment });
                total += payment;
            }
        }
        CashValue::from(total)
    }

    fn book_dividend_income(&mut self, amount: f64) {
        self.dividend_income += CashValue::from(amount);
    }

    fn dividend_snapshot(&self, date: NaiveDate) -> Vec<DividendSnapshot> {
        self.dividends
            .iter()
            .map(|r| DividendSnapshot { date, ticker: r.ticker.clone(), dividend_per_unit: r.per_unit, total_dividend: CashValue::from(r.total) })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_mode_floors_units_bought() {
        let mut p = RealisticPortfolio::new();
        p.add_cash(1000.0).unwrap();
        let units = p.invest(&Ticker::new("AAPL"), 1000.0, 300.0, false).unwrap();
        assert_eq!(units, 3.0);
        assert_eq!(*p.get_available_cash(), 100.0);
    }

    #[test]
    fn integer_mode_zero_units_is_a_failed_order() {
        let mut p = RealisticPortfolio::new();
        p.add_cash(50.0).unwrap();
        let units = p.invest(&Ticker::new("AAPL"), 50.0, 300.0, false).unwrap();
        assert_eq!(units, 0.0);
    }

    #[test]
    fn integer_mode_sell_ceils_and_clamps() {
        let mut p = RealisticPortfolio::new();
        p.add_cash(1000.0).unwrap();
        p.invest(&Ticker::new("AAPL"), 1000.0, 100.0, true).unwrap();
        let sold = p.sell(&Ticker::new("AAPL"), 250.0, 100.0, false).unwrap();
        assert_eq!(sold, 3.0);
    }

    #[test]
    fn process_dividends_only_pays_held_tickers() {
        let mut p = RealisticPortfolio::new();
        p.add_cash(1000.0).unwrap();
        p.invest(&Ticker::new("AAPL"), 1000.0, 10.0, true).unwrap();
        let mut per_unit = BTreeMap::new();
        per_unit.insert(Ticker::new("AAPL"), 0.5);
        per_unit.insert(Ticker::new("MSFT"), 1.0);
        let total = p.process_dividends(&per_unit);
        assert_eq!(*total, 50.0);
        assert_eq!(p.dividend_snapshot(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()).len(), 1);
    }

    #[test]
    fn reinvested_dividend_income_stays_at_zero() {
        let mut p = RealisticPortfolio::new();
        p.add_cash(1000.0).unwrap();
        p.invest(&Ticker::new("AAPL"), 1000.0, 10.0, true).unwrap();
        let mut per_unit = BTreeMap::new();
        per_unit.insert(Ticker::new("AAPL"), 0.5);
        let total = p.process_dividends(&per_unit);
        p.add_cash(*total).unwrap();
        assert_eq!(*p.cash_snapshot(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()).dividend_income.unwrap(), 0.0);
    }

    #[test]
    fn booked_dividend_income_does_not_touch_cash() {
        let mut p = RealisticPortfolio::new();
        p.add_cash(1000.0).unwrap();
        p.invest(&Ticker::new("AAPL"), 1000.0, 10.0, true).unwrap();
        let mut per_unit = BTreeMap::new();
        per_unit.insert(Ticker::new("AAPL"), 0.5);
        let total = p.process_dividends(&per_unit);
        let cash_before = *p.get_available_cash();
        p.book_dividend_income(*total);
        assert_eq!(*p.get_available_cash(), cash_before);
        assert_eq!(*p.cash_snapshot(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()).dividend_income.unwrap(), 50.0);
    }
}
