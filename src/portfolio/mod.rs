//! Portfolio state shared by both engine variants (4.3).
//!
//! Modelled as a trait the same way the teacher splits broker capability across
//! small traits (`TransferCash`, `PositionInfo`, `PayDividend`, ...): the engine
//! drives whichever concrete portfolio it was built with through this contract
//! without caring which settlement model is underneath.

pub mod basic;
pub mod realistic;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::Result;
use crate::types::{CashValue, PortfolioQty, Price, Ticker};

/// `(date, cash_balance, cash_inflow, did_rebalance[, dividend_income, did_buy, did_sell])`.
/// The realistic-only fields are `None` for the basic portfolio so both variants
/// can share one snapshot shape end to end.
#[derive(Debug, Clone, Serialize)]
pub struct CashSnapshot {
    pub date: NaiveDate,
    pub cash_balance: CashValue,
    pub cash_inflow: CashValue,
    pub did_rebalance: bool,
    pub dividend_income: Option<CashValue>,
    pub did_buy: Option<bool>,
    pub did_sell: Option<bool>,
}

/// One row per held ticker per day.
#[derive(Debug, Clone, Serialize)]
pub struct HoldingSnapshot {
    pub date: NaiveDate,
    pub ticker: Ticker,
    pub units: PortfolioQty,
    pub base_price: Price,
}

/// `(date, ticker, dividend_per_unit, total_dividend)`, realistic-only.
#[derive(Debug, Clone, Serialize)]
pub struct DividendSnapshot {
    pub date: NaiveDate,
    pub ticker: Ticker,
    pub dividend_per_unit: f64,
    pub total_dividend: CashValue,
}

/// Capabilities shared by both portfolio variants. Ordered `BTreeMap` holdings
/// everywhere: the emitted snapshot order must be stable across runs (P8), and a
/// hash map's iteration order is not.
pub trait Portfolio {
    fn daily_reset(&mut self);

    /// Increase cash and today's cash inflow accumulator. Returns
    /// `NonPositiveTradeAmount` if `amount <= 0` (7): this is a programmer
    /// error upstream, but it surfaces as an ordinary fatal [`crate::error::BacktestError`]
    /// so it fails only the job that raised it rather than unwinding the
    /// whole dispatcher (5).
    fn add_cash(&mut self, amount: f64) -> Result<()>;

    fn get_available_cash(&self) -> CashValue;

    /// Invest `funds` into `ticker` at `price`. Returns units bought, which is
    /// `0.0` only when `allow_fractional` is false and `funds < price` (this is
    /// then a failed order upstream, 4.5). Returns `NonPositiveTradeAmount` if
    /// `funds <= 0`.
    fn invest(&mut self, ticker: &Ticker, funds: f64, price: f64, allow_fractional: bool) -> Result<f64>;

    /// Sell up to `units_owned` of `ticker` to raise `funds_needed`. Returns
    /// `0.0` if nothing is held. Returns `NonPositiveTradeAmount` if
    /// `funds_needed <= 0`.
    fn sell(&mut self, ticker: &Ticker, funds_needed: f64, price: f64, allow_fractional: bool) -> Result<f64>;

    fn get_total_value(&self, prices: &BTreeMap<Ticker, f64>) -> CashValue;

    fn holdings(&self) -> &BTreeMap<Ticker, PortfolioQty>;

    /// Replace all holdings wholesale; used by the rebalance procedure, which
    /// clears positions before re-buying into target allocations (4.4).
    fn clear_holdings(&mut self);

    fn mark_rebalanced(&mut self);
    fn mark_buy(&mut self);
    fn mark_sell(&mut self);

    fn cash_snapshot(&self, date: NaiveDate) -> CashSnapshot;
    fn holdings_snapshot(&self, date: NaiveDate, prices: &BTreeMap<Ticker, f64>) -> Vec<HoldingSnapshot>;
}

/// Additional capability of the realistic portfolio: explicit per-bar dividend
/// events rather than adjusted-close reinvestment (4.3).
pub trait DividendPortfolio: Portfolio {
    /// Compute per-holding dividends (`units x per_unit`), record them, and
    /// return the total. The caller decides whether to add the total to cash
    /// (reinvestment) or book it as realised income (4.5).
    fn process_dividends(&mut self, per_unit_by_ticker: &BTreeMap<Ticker, f64>) -> CashValue;

    fn book_dividend_income(&mut self, amount: f64);

    fn dividend_snapshot(&self, date: NaiveDate) -> Vec<DividendSnapshot>;
}

pub(crate) fn total_value(cash: CashValue, holdings: &BTreeMap<Ticker, PortfolioQty>, prices: &BTreeMap<Ticker, f64>) -> CashValue {
    let holding_value: f64 = holdings
        .iter()
        .map(|(ticker, qty)| **qty * prices.get(ticker).copied().unwrap_or(0.0))
        .sum();
    CashValue::from(*cash + holding_value)
}
