//! The basic portfolio (4.3, `basic.py`): always trades fractionally regardless
//! of the `allow_fractional_shares` flag, and has no dividend bookkeeping of its
//! own because the basic engine trades on adjusted-close prices that already
//! embed dividend reinvestment.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::error::{BacktestError, Result};
use crate::portfolio::{total_value, CashSnapshot, HoldingSnapshot, Portfolio};
use crate::types::{CashValue, PortfolioQty, Price, Ticker};

#[derive(Debug, Default)]
pub struct BasicPortfolio {
    cash_balance: CashValue,
    cash_inflow: CashValue,
    holdings: BTreeMap<Ticker, PortfolioQty>,
    did_rebalance: bool,
}

impl BasicPortfolio {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Portfolio for BasicPortfolio {
    fn daily_reset(&mut self) {
        self.cash_inflow = CashValue::from(0.0);
        self.did_rebalance = false;
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

    fn invest(&mut self, ticker: &Ticker, funds: f64, price: f64, _allow_fractional: bool) -> Result<f64> {
        if funds <= 0.0 {
            return Err(BacktestError::NonPositiveTradeAmount(funds));
        }
        // The basic portfolio always allows fractional shares (4.3): the source
        // that grounds this never reads the flag here.
        let units_bought = funds / price;
        let total_cost = units_bought * price;

        let entry = self.holdings.entry(ticker.clone()).or_insert(PortfolioQty::from(0.0));
        *entry = PortfolioQty::from(**entry + units_bought);
        self.cash_balance -= CashValue::from(total_cost);
        Ok(units_bought)
    }

    fn sell(&mut self, ticker: &Ticker, funds_needed: f64, price: f64, _allow_fractional: bool) -> Result<f64> {
        if funds_needed <= 0.0 {
            return Err(BacktestError::NonPositiveTradeAmount(funds_needed));
        }
        let units_owned = self.holdings.get(ticker).copied().unwrap_or(PortfolioQty::from(0.0));
        if *units_owned <= 0.0 {
            return Ok(0.0);
        }

        let units_sold = (funds_needed / price).min(*units_owned);
        let total_earnings = units_sold * price;

        self.holdings.insert(ticker.clone(), PortfolioQty::from(*units_owned - units_sold));
        self.cash_balance += CashValue::from(total_earnings);
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

    fn mark_buy(&mut self) {}

    fn mark_sell(&mut self) {}

    fn cash_snapshot(&self, date: NaiveDate) -> CashSnapshot {
        CashSnapshot {
            date,
            cash_balance: self.cash_balance,
            cash_inflow: self.cash_inflow,
            did_rebalance: self.did_rebalance,
            dividend_income: None,
            did_buy: None,
            did_sell: None,
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
