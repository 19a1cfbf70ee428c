//! Order queueing, settlement, and the append-only executed-orders log (4.5, 4.3).
//!
//! The realistic engine is the only caller that queues orders across multiple
//! days; the basic engine settles instantly and never touches this module. The
//! log itself is grounded on the teacher's `BrokerLog` (`broker/record.rs`):
//! an append-only `Vec` of recorded events, queried by date range rather than
//! mutated in place.

use chrono::NaiveDate;
use serde::Serialize;

use crate::types::{CashValue, PortfolioQty, Price, Ticker};

/// Minimum `target_value` an order must carry to be queued at all (4.5); below
/// this, floating-point dust from a rebalance correction is dropped rather than
/// generating a order that can never clear a sensible minimum trade size.
pub const MIN_ORDER_VALUE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Fulfilled,
    Failed,
}

/// One row of the order log (3, "Order"). `date_executed` is `None` until the
/// order settles; it stays `None` forever if [`Calendar::next_trading_date`]
/// never found a trading day for the ticker (`NoTradingDayBeforeEnd`, 7).
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub ticker: Ticker,
    pub target_value: f64,
    pub date_placed: NaiveDate,
    pub date_executed: Option<NaiveDate>,
    pub side: OrderSide,
    pub base_price: Option<f64>,
    pub units: Option<f64>,
    pub status: OrderStatus,
}

impl Order {
    fn new(ticker: Ticker, target_value: f64, side: OrderSide, date_placed: NaiveDate, date_executed: Option<NaiveDate>) -> Self {
        Order {
            ticker,
            target_value,
            date_placed,
            date_executed,
            side,
            base_price: None,
            units: None,
            status: OrderStatus::Pending,
        }
    }
}

/// Append-only store of orders, split between those still awaiting settlement
/// and those the engine has already executed. Mirrors the teacher's
/// created -> pending -> fulfilled/failed state machine (4.5), but since this
/// engine only ever moves forward in time a simple two-`Vec` split is enough:
/// there is no need for `BrokerLog`'s full event-sourced replay.
#[derive(Debug, Default)]
pub struct OrderBook {
    pending: Vec<Order>,
    executed: Vec<Order>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a buy/sell intent if `target_value` clears [`MIN_ORDER_VALUE`].
    /// `date_executed` is resolved by the caller via
    /// [`crate::calendar::Calendar::next_trading_date`] before calling this.
    pub fn queue(&mut self, ticker: Ticker, target_value: f64, side: OrderSide, date_placed: NaiveDate, date_executed: Option<NaiveDate>) {
        if target_value <= MIN_ORDER_VALUE {
            return;
        }
        self.pending.push(Order::new(ticker, target_value, side, date_placed, date_executed));
    }

    /// Pop every pending order whose `date_executed` is exactly `date`, in
    /// insertion order (4.5: "share the same price, each mutates cash and
    /// holdings independently").
    pub fn due_on(&mut self, date: NaiveDate) -> Vec<Order> {
        let mut due = Vec::new();
        let mut remaining = Vec::with_capacity(self.pending.len());
        for order in self.pending.drain(..) {
            if order.date_executed == Some(date) {
                due.push(order);
            } else {
                remaining.push(order);
            }
        }
        self.pending = remaining;
        due
    }

    /// Record a settled order (fulfilled or failed) in the append-only log,
    /// in `(date_executed, insertion_order)` order (5).
    pub fn record_executed(&mut self, mut order: Order, units: f64, price: f64) {
        order.units = Some(units);
        order.base_price = Some(price);
        order.status = if units > 0.0 { OrderStatus::Fulfilled } else { OrderStatus::Failed };
        self.executed.push(order);
    }

    pub fn executed(&self) -> &[Order] {
        &self.executed
    }

    pub fn pending(&self) -> &[Order] {
        &self.pending
    }

    /// Orders never settled by the end of the run (7, `NoTradingDayBeforeEnd`).
    pub fn pending_at_end(&self) -> &[Order] {
        &self.pending
    }

    /// Executed orders in `[start, end]`, grounded on the teacher's
    /// `BrokerLog::trades_between` (3.1 supplement).
    pub fn executed_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<&Order> {
        self.executed
            .iter()
            .filter(|o| o.date_executed.map(|d| d >= start && d <= end).unwrap_or(false))
            .collect()
    }
}

/// Snapshot row for the external order-log payload, using the crate's newtype
/// wrappers rather than raw `f64` once an order has settled.
#[derive(Debug, Clone, Serialize)]
pub struct OrderSnapshot {
    pub ticker: Ticker,
    pub target_value: CashValue,
    pub date_placed: NaiveDate,
    pub date_executed: Option<NaiveDate>,
    pub side: OrderSide,
    pub base_price: Option<Price>,
    pub units: Option<PortfolioQty>,
    pub status: OrderStatus,
}

impl From<&Order> for OrderSnapshot {
    fn from(o: &Order) -> Self {
        OrderSnapshot {
            ticker: o.ticker.clone(),
            target_value: CashValue::from(o.target_value),
            date_placed: o.date_placed,
            date_executed: o.date_executed,
            side: o.side,
            base_price: o.base_price.map(Price::from),
            units: o.units.map(PortfolioQty::from),
            status: o.status,
        }
    }
}
