use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::{Add, AddAssign, Deref, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Cash held by a portfolio, always non-negative once a day's procedure completes.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct CashValue(f64);

impl Deref for CashValue {
    type Target = f64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<f64> for CashValue {
    fn from(v: f64) -> Self {
        CashValue(v)
    }
}

impl From<CashValue> for f64 {
    fn from(v: CashValue) -> Self {
        v.0
    }
}

impl Add for CashValue {
    type Output = CashValue;
    fn add(self, rhs: Self) -> Self::Output {
        CashValue(self.0 + rhs.0)
    }
}

impl Sub for CashValue {
    type Output = CashValue;
    fn sub(self, rhs: Self) -> Self::Output {
        CashValue(self.0 - rhs.0)
    }
}

impl AddAssign for CashValue {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for CashValue {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Default for CashValue {
    fn default() -> Self {
        CashValue(0.0)
    }
}

/// Units of a ticker held by a portfolio. Never negative: this engine has no short positions.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct PortfolioQty(f64);

impl Deref for PortfolioQty {
    type Target = f64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<f64> for PortfolioQty {
    fn from(v: f64) -> Self {
        PortfolioQty(v.max(0.0))
    }
}

impl From<PortfolioQty> for f64 {
    fn from(v: PortfolioQty) -> Self {
        v.0
    }
}

impl Default for PortfolioQty {
    fn default() -> Self {
        PortfolioQty(0.0)
    }
}

/// A price, always in the engine's base currency once it leaves the data preparer.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Price(f64);

impl Deref for Price {
    type Target = f64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<f64> for Price {
    fn from(v: f64) -> Self {
        Price(v)
    }
}

impl From<Price> for f64 {
    fn from(v: Price) -> Self {
        v.0
    }
}

/// A weight in `(0, 1]`. Normalisation and sum-to-one checks happen at the call site;
/// this type only carries the value.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct PortfolioWeight(f64);

impl Deref for PortfolioWeight {
    type Target = f64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<f64> for PortfolioWeight {
    fn from(v: f64) -> Self {
        PortfolioWeight(v)
    }
}

impl From<PortfolioWeight> for f64 {
    fn from(v: PortfolioWeight) -> Self {
        v.0
    }
}

/// An uppercase instrument symbol. Cheap to clone, ordered lexically so emitted
/// collections have a stable, deterministic order (see P8).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ticker(pub String);

impl Ticker {
    pub fn new(symbol: impl Into<String>) -> Self {
        Ticker(symbol.into().to_uppercase())
    }
}

impl Deref for Ticker {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A currency code, e.g. `GBP`, `USD`, `EUR`, or the raw-data `GBX` (pence) tag that
/// is normalised away by the data preparer before anything downstream sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    GBP,
    USD,
    EUR,
    GBX,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::GBP => "GBP",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBX => "GBX",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Target asset allocation: a mapping from ticker to weight, held in the order the
/// caller supplied it so downstream reports don't inherit hash-map iteration order.
#[derive(Debug, Clone, Default)]
pub struct PortfolioAllocation {
    weights: Vec<(Ticker, PortfolioWeight)>,
}

impl PortfolioAllocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ticker: Ticker, weight: impl Into<PortfolioWeight>) {
        let weight = weight.into();
        if let Some(existing) = self.weights.iter_mut().find(|(t, _)| t == &ticker) {
            existing.1 = weight;
        } else {
            self.weights.push((ticker, weight));
        }
    }

    pub fn get(&self, ticker: &Ticker) -> Option<PortfolioWeight> {
        self.weights.iter().find(|(t, _)| t == ticker).map(|(_, w)| *w)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Ticker, PortfolioWeight)> {
        self.weights.iter()
    }

    pub fn tickers(&self) -> impl Iterator<Item = &Ticker> {
        self.weights.iter().map(|(t, _)| t)
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().map(|(_, w)| **w).sum()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Restrict this allocation to `tickers` and renormalise the remaining weights
    /// so they again sum to 1.0. Used on every day the set of active tickers might
    /// have shrunk relative to the target portfolio.
    pub fn normalized_over(&self, tickers: &[Ticker]) -> PortfolioAllocation {
        let restricted: Vec<(Ticker, f64)> = self
            .weights
            .iter()
            .filter(|(t, _)| tickers.contains(t))
            .map(|(t, w)| (t.clone(), **w))
            .collect();
        let total: f64 = restricted.iter().map(|(_, w)| w).sum();
        let mut out = PortfolioAllocation::new();
        if total <= 0.0 {
            return out;
        }
        for (t, w) in restricted {
            out.insert(t, w / total);
        }
        out
    }
}

/// Which execution model the engine runs under. *Basic* assumes idealised,
/// instant settlement at adjusted prices; *realistic* settles on the next
/// trading day and honours the `allow_fractional_shares` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Basic,
    Realistic,
}

/// Named, ordered snapshot of per-ticker holding values, used by the analyser's
/// portfolio-balance chart series.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PortfolioHoldings(pub HashMap<Ticker, PortfolioQty>);

impl PortfolioHoldings {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Ordering used when two items at the same date need a stable tie-break, e.g.
/// multiple orders executed for the same ticker on the same day (see 4.5).
pub fn stable_ticker_order(a: &Ticker, b: &Ticker) -> Ordering {
    a.0.cmp(&b.0)
}
