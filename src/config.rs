//! Backtest configuration: the JSON shape at the service boundary (6), parsed and
//! validated into the types the rest of the crate trusts unconditionally. Every
//! fallible conversion here raises [`BacktestError::InvalidConfig`] or
//! [`BacktestError::UnknownEnumValue`] so construction fails fast per the error
//! table (7) — nothing downstream re-checks these invariants.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dates::Frequency;
use crate::error::{BacktestError, Result};
use crate::types::{Currency, Mode, PortfolioAllocation, Ticker};

const EARLIEST_EUR_START_DATE: &str = "1999-01-03";
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceFrequency {
    Never,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl RebalanceFrequency {
    pub fn as_dates_frequency(&self) -> Option<Frequency> {
        match self {
            RebalanceFrequency::Never => None,
            RebalanceFrequency::Daily => Some(Frequency::Daily),
            RebalanceFrequency::Weekly => Some(Frequency::Weekly),
            RebalanceFrequency::Monthly => Some(Frequency::Monthly),
            RebalanceFrequency::Quarterly => Some(Frequency::Quarterly),
            RebalanceFrequency::Yearly => Some(Frequency::Yearly),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    #[serde(rename = "fractional_shares")]
    pub allow_fractional_shares: bool,
    pub reinvest_dividends: bool,
    pub rebalance_frequency: RebalanceFrequency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringInvestment {
    pub amount: f64,
    pub frequency: Frequency,
}

/// Raw JSON shape; dates arrive as strings in one of three accepted formats and
/// weights as a plain ticker-keyed map, both of which get validated and converted
/// in [`BacktestConfig::from_raw`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBacktestConfig {
    pub mode: Mode,
    pub base_currency: Currency,
    pub start_date: String,
    pub end_date: String,
    pub target_weights: HashMap<String, f64>,
    pub initial_investment: f64,
    pub strategy: Strategy,
    pub recurring_investment: Option<RecurringInvestment>,
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub mode: Mode,
    pub base_currency: Currency,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub target_portfolio: PortfolioAllocation,
    pub initial_investment: f64,
    pub strategy: Strategy,
    pub recurring_investment: Option<RecurringInvestment>,
}

/// Parse a date string in any of the three accepted formats (6). Ambiguous
/// `DD/MM/YYYY` vs `MM/DD/YYYY` inputs are resolved by trying day-first first,
/// since the service's primary user base is UK-based; callers that need
/// unambiguous dates should use the ISO `YYYY-MM-DD` form.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%d/%m/%Y") {
        return Ok(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%m/%d/%Y") {
        return Ok(d);
    }
    Err(BacktestError::InvalidConfig(format!("unparseable date: {raw}")))
}

impl BacktestConfig {
    pub fn from_raw(raw: RawBacktestConfig) -> Result<Self> {
        let start_date = parse_date(&raw.start_date)?;
        let end_date = parse_date(&raw.end_date)?;

        if start_date > end_date {
            return Err(BacktestError::InvalidConfig(format!(
                "start_date {start_date} is after end_date {end_date}"
            )));
        }

        if matches!(raw.base_currency, Currency::EUR) {
            let floor = parse_date(EARLIEST_EUR_START_DATE).expect("constant is valid");
            if start_date < floor {
                return Err(BacktestError::InvalidConfig(format!(
                    "EUR base currency requires start_date >= {floor}"
                )));
            }
        }

        if raw.initial_investment <= 0.0 {
            return Err(BacktestError::InvalidConfig("initial_investment must be > 0".into()));
        }

        if let Some(recurring) = &raw.recurring_investment {
            if recurring.amount <= 0.0 {
                return Err(BacktestError::InvalidConfig("recurring_investment.amount must be > 0".into()));
            }
        }

        let mut target_portfolio = PortfolioAllocation::new();
        for (ticker, weight) in &raw.target_weights {
            if *weight <= 0.0 || *weight > 1.0 {
                return Err(BacktestError::InvalidConfig(format!(
                    "weight for {ticker} must be in (0, 1], got {weight}"
                )));
            }
            target_portfolio.insert(Ticker::new(ticker), *weight);
        }
        if target_portfolio.is_empty() {
            return Err(BacktestError::InvalidConfig("target_weights must not be empty".into()));
        }
        let sum = target_portfolio.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(BacktestError::InvalidConfig(format!(
                "target_weights must sum to 1.0 +/- {WEIGHT_SUM_TOLERANCE}, got {sum}"
            )));
        }

        Ok(BacktestConfig {
            mode: raw.mode,
            base_currency: raw.base_currency,
            start_date,
            end_date,
            target_portfolio,
            initial_investment: raw.initial_investment,
            strategy: raw.strategy,
            recurring_investment: raw.recurring_investment,
        })
    }

    pub fn tickers(&self) -> Vec<Ticker> {
        self.target_portfolio.tickers().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(weights: &[(&str, f64)]) -> RawBacktestConfig {
        RawBacktestConfig {
            mode: Mode::Basic,
            base_currency: Currency::GBP,
            start_date: "2020-01-02".into(),
            end_date: "2020-01-03".into(),
            target_weights: weights.iter().map(|(t, w)| (t.to_string(), *w)).collect(),
            initial_investment: 1000.0,
            strategy: Strategy { allow_fractional_shares: true, reinvest_dividends: true, rebalance_frequency: RebalanceFrequency::Never },
            recurring_investment: None,
        }
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let err = BacktestConfig::from_raw(raw(&[("AAPL", 0.4), ("MSFT", 0.4)]));
        assert!(matches!(err, Err(BacktestError::InvalidConfig(_))));
    }

    #[test]
    fn accepts_weights_within_tolerance() {
        let ok = BacktestConfig::from_raw(raw(&[("AAPL", 0.3333334), ("MSFT", 0.3333333), ("GOOG", 0.3333333)]));
        assert!(ok.is_ok());
    }

    #[test]
    fn rejects_start_after_end() {
        let mut r = raw(&[("AAPL", 1.0)]);
        r.start_date = "2020-02-01".into();
        r.end_date = "2020-01-01".into();
        assert!(BacktestConfig::from_raw(r).is_err());
    }

    #[test]
    fn rejects_eur_before_launch() {
        let mut r = raw(&[("AAPL", 1.0)]);
        r.base_currency = Currency::EUR;
        r.start_date = "1998-01-01".into();
        r.end_date = "1998-06-01".into();
        assert!(BacktestConfig::from_raw(r).is_err());
    }

    #[test]
    fn date_formats_all_parse_to_the_same_day() {
        let iso = parse_date("2020-03-04").unwrap();
        let dmy = parse_date("04/03/2020").unwrap();
        assert_eq!(iso, dmy);
    }
}
