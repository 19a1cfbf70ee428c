//! Date arithmetic shared by the rebalance scheduler, the cashflow scheduler, and
//! the realistic engine's `should_rebalance` calendar-distance check.
//!
//! `chrono::NaiveDate` has no `relativedelta`-style month arithmetic built in, so
//! [`add_months`] implements the day-of-month-preserving-with-clamping rule the
//! rest of the system assumes (adding a month to 2024-01-31 lands on 2024-02-29,
//! not an error and not 2024-03-02).

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    /// Calendar-month count for frequencies expressed in months; `None` for
    /// day-stepped frequencies.
    fn months(&self) -> Option<u32> {
        match self {
            Frequency::Monthly => Some(1),
            Frequency::Quarterly => Some(3),
            Frequency::Yearly => Some(12),
            Frequency::Daily | Frequency::Weekly => None,
        }
    }
}

/// Add `months` calendar months to `date`, clamping the day-of-month to the last
/// valid day of the resulting month (e.g. Jan 31 + 1 month = Feb 29 in a leap year).
pub fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    let total_months = date.year() * 12 + (date.month() as i32 - 1) + months;
    let year = total_months.div_euclid(12);
    let month0 = total_months.rem_euclid(12);
    let month = (month0 + 1) as u32;
    let last_day = days_in_month(year, month);
    let day = date.day().min(last_day);
    NaiveDate::from_ymd_opt(year, month, day).expect("computed y/m/d must be valid")
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1).expect("valid date");
    let first_of_this = NaiveDate::from_ymd_opt(year, month, 1).expect("valid date");
    (first_of_next - first_of_this).num_days() as u32
}

/// Step `date` forward by one period of `frequency`.
pub fn step(date: NaiveDate, frequency: Frequency) -> NaiveDate {
    match frequency {
        Frequency::Daily => date + chrono::Duration::days(1),
        Frequency::Weekly => date + chrono::Duration::days(7),
        Frequency::Monthly | Frequency::Quarterly | Frequency::Yearly => {
            add_months(date, frequency.months().expect("month-stepped frequency") as i32)
        }
    }
}

/// Minimum calendar distance, in days, that must have elapsed for `frequency` to
/// have "come around again" relative to a previous date. Day/week frequencies are
/// measured in plain elapsed days; month-based frequencies use month-arithmetic on
/// `previous` so short months don't shortchange the interval.
pub fn has_interval_elapsed(previous: NaiveDate, current: NaiveDate, frequency: Frequency) -> bool {
    match frequency {
        Frequency::Daily => current >= previous + chrono::Duration::days(1),
        Frequency::Weekly => current >= previous + chrono::Duration::days(7),
        Frequency::Monthly | Frequency::Quarterly | Frequency::Yearly => {
            current >= add_months(previous, frequency.months().expect("month-stepped frequency") as i32)
        }
    }
}

/// Generate the set of recurring dates in `[start, end]`, exclusive of `start`
/// itself, stepping by `frequency`. Matches the semantics used for both the
/// rebalance schedule and the recurring-cashflow schedule (4.4, 4.6).
pub fn generate_recurring_dates(start: NaiveDate, end: NaiveDate, frequency: Frequency) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = step(start, frequency);
    while current <= end {
        dates.push(current);
        current = step(current, frequency);
    }
    dates
}

/// Truncate `date` to the first date of its containing period for `horizon`
/// (analyser period aggregation, 4.7). `Daily` is the identity truncation.
pub fn period_start(date: NaiveDate, horizon: Frequency) -> NaiveDate {
    match horizon {
        Frequency::Daily => date,
        Frequency::Weekly => date - chrono::Duration::days(date.weekday().num_days_from_monday() as i64),
        Frequency::Monthly => NaiveDate::from_ymd_opt(date.year(), date.month(), 1).expect("valid date"),
        Frequency::Quarterly => {
            let quarter_start_month = (date.month0() / 3) * 3 + 1;
            NaiveDate::from_ymd_opt(date.year(), quarter_start_month, 1).expect("valid date")
        }
        Frequency::Yearly => NaiveDate::from_ymd_opt(date.year(), 1, 1).expect("valid date"),
    }
}

/// Human-readable label for a truncated period, used in the best/worst-period
/// chart payload (6).
pub fn period_label(period_start: NaiveDate, horizon: Frequency) -> String {
    match horizon {
        Frequency::Daily => period_start.format("%Y-%m-%d").to_string(),
        Frequency::Weekly => format!("{}-W{:02}", period_start.iso_week().year(), period_start.iso_week().week()),
        Frequency::Monthly => period_start.format("%Y-%m").to_string(),
        Frequency::Quarterly => format!("{}-Q{}", period_start.year(), (period_start.month0() / 3) + 1),
        Frequency::Yearly => period_start.format("%Y").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_months_clamps_to_month_end() {
        let jan31 = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(add_months(jan31, 1), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        let jan31_2023 = NaiveDate::from_ymd_opt(2023, 1, 31).unwrap();
        assert_eq!(add_months(jan31_2023, 1), NaiveDate::from_ymd_opt(2023, 2, 28).unwrap());
    }

    #[test]
    fn add_months_crosses_year_boundary() {
        let nov15 = NaiveDate::from_ymd_opt(2023, 11, 15).unwrap();
        assert_eq!(add_months(nov15, 3), NaiveDate::from_ymd_opt(2024, 2, 15).unwrap());
    }

    #[test]
    fn generate_recurring_dates_excludes_start() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2020, 1, 31).unwrap();
        let dates = generate_recurring_dates(start, end, Frequency::Weekly);
        assert!(!dates.contains(&start));
        assert_eq!(dates[0], NaiveDate::from_ymd_opt(2020, 1, 8).unwrap());
        assert_eq!(dates.len(), 4);
    }

    #[test]
    fn generate_recurring_dates_monthly_clamped() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let dates = generate_recurring_dates(start, end, Frequency::Monthly);
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
                NaiveDate::from_ymd_opt(2024, 4, 30).unwrap(),
            ]
        );
    }

    #[test]
    fn interval_elapsed_monthly_uses_month_arithmetic() {
        let previous = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert!(!has_interval_elapsed(previous, NaiveDate::from_ymd_opt(2024, 2, 28).unwrap(), Frequency::Monthly));
        assert!(has_interval_elapsed(previous, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(), Frequency::Monthly));
    }

    #[test]
    fn period_start_truncates_to_month_and_quarter() {
        let date = NaiveDate::from_ymd_opt(2024, 8, 15).unwrap();
        assert_eq!(period_start(date, Frequency::Monthly), NaiveDate::from_ymd_opt(2024, 8, 1).unwrap());
        assert_eq!(period_start(date, Frequency::Quarterly), NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        assert_eq!(period_start(date, Frequency::Yearly), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn period_start_weekly_is_monday() {
        let wednesday = NaiveDate::from_ymd_opt(2024, 8, 14).unwrap();
        let monday = period_start(wednesday, Frequency::Weekly);
        assert_eq!(monday.weekday(), chrono::Weekday::Mon);
    }

    #[test]
    fn period_label_formats_match_horizon() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(period_label(period_start(date, Frequency::Monthly), Frequency::Monthly), "2024-03");
        assert_eq!(period_label(period_start(date, Frequency::Quarterly), Frequency::Quarterly), "2024-Q1");
        assert_eq!(period_label(period_start(date, Frequency::Yearly), Frequency::Yearly), "2024");
    }
}
