//! The calendar and ticker-activity model (4.1).
//!
//! Mirrors the trait-based scheduling split the rest of the engine uses elsewhere
//! ([`crate::portfolio::Portfolio`], [`crate::engine`]): a `Calendar` is built once
//! from the prepared price table and then queried by the per-day loop, which needs
//! O(1) lookups rather than a scan over every bar.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;

use crate::data::PreparedBar;
use crate::types::Ticker;

/// One row of the dense calendar: every date in `[start, end]` gets an entry, even
/// if both sets are empty (e.g. before any ticker's first observation).
#[derive(Debug, Clone, Default)]
pub struct CalendarRow {
    pub active_tickers: HashSet<Ticker>,
    pub trading_tickers: HashSet<Ticker>,
}

/// The dense daily calendar plus per-ticker active ranges, materialised both as an
/// ordered map (for iteration and joins) and available for O(1) lookup by date.
pub struct Calendar {
    rows: BTreeMap<NaiveDate, CalendarRow>,
    active_ranges: HashMap<Ticker, (NaiveDate, NaiveDate)>,
    first_active_date: Option<NaiveDate>,
}

impl Calendar {
    /// Build the calendar from the prepared price table, restricted to
    /// `[start, end]`. `bars` need not be sorted; this walks the full set once.
    pub fn build(bars: &[PreparedBar], start: NaiveDate, end: NaiveDate) -> Self {
        let mut active_ranges: HashMap<Ticker, (NaiveDate, NaiveDate)> = HashMap::new();
        for bar in bars {
            active_ranges
                .entry(bar.ticker.clone())
                .and_modify(|(first, last)| {
                    if bar.date < *first {
                        *first = bar.date;
                    }
                    if bar.date > *last {
                        *last = bar.date;
                    }
                })
                .or_insert((bar.date, bar.date));
        }

        let mut rows: BTreeMap<NaiveDate, CalendarRow> = BTreeMap::new();
        let mut cursor = start;
        while cursor <= end {
            rows.insert(cursor, CalendarRow::default());
            cursor += chrono::Duration::days(1);
        }

        for (ticker, (first, last)) in &active_ranges {
            for (date, row) in rows.range_mut(*first.max(&start)..=*last.min(&end)) {
                let _ = date;
                row.active_tickers.insert(ticker.clone());
            }
        }

        for bar in bars {
            if bar.is_trading_day {
                if let Some(row) = rows.get_mut(&bar.date) {
                    row.trading_tickers.insert(bar.ticker.clone());
                }
            }
        }

        let first_active_date = rows
            .iter()
            .find(|(_, row)| !row.active_tickers.is_empty())
            .map(|(date, _)| *date);

        Calendar { rows, active_ranges, first_active_date }
    }

    pub fn row(&self, date: NaiveDate) -> Option<&CalendarRow> {
        self.rows.get(&date)
    }

    pub fn active_tickers(&self, date: NaiveDate) -> HashSet<Ticker> {
        self.rows.get(&date).map(|r| r.active_tickers.clone()).unwrap_or_default()
    }

    pub fn trading_tickers(&self, date: NaiveDate) -> HashSet<Ticker> {
        self.rows.get(&date).map(|r| r.trading_tickers.clone()).unwrap_or_default()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.rows.keys().copied()
    }

    pub fn first_active_date(&self) -> Option<NaiveDate> {
        self.first_active_date
    }

    pub fn active_range(&self, ticker: &Ticker) -> Option<(NaiveDate, NaiveDate)> {
        self.active_ranges.get(ticker).copied()
    }

    /// The earliest date `>= target` on which `ticker` is in the trading set
    /// (4.5's next-trading-date lookup). `None` if the ticker never trades again
    /// within the calendar's range.
    pub fn next_trading_date(&self, ticker: &Ticker, target: NaiveDate) -> Option<NaiveDate> {
        self.rows
            .range(target..)
            .find(|(_, row)| row.trading_tickers.contains(ticker))
            .map(|(date, _)| *date)
    }

    /// True iff every ticker in `tickers` is in `date`'s trading set (used by the
    /// realistic engine's `should_rebalance` check).
    pub fn all_trading(&self, date: NaiveDate, tickers: &HashSet<Ticker>) -> bool {
        let trading = self.trading_tickers(date);
        tickers.iter().all(|t| trading.contains(t))
    }
}
