//! Date arithmetic for annual cycles.
//!
//! Cycles are half-open `[start, end)` ranges spanning exactly twelve months. Anniversary
//! anchors are re-projected into each year through [`safe_day`], so a Feb 29 anchor lands on
//! Feb 28 in common years without drifting in later ones.

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::models::YearTrackingMode;

/// Number of days in `month` of `year`.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Clamps `day` to the last valid day of `month` in `year`.
pub fn safe_day(year: i32, month: u32, day: u32) -> u32 {
    day.clamp(1, days_in_month(year, month).max(1))
}

/// Builds the date for `month`/`day` in `year`, clamping the day.
///
/// Saturates at `NaiveDate::MAX` for years chrono cannot represent.
pub fn anchored_date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, safe_day(year, month, day)).unwrap_or(NaiveDate::MAX)
}

/// Adds `months` calendar months, clamping the day-of-month.
pub fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    anchored_date_from_index(month_index(date) + i64::from(months), date.day())
}

fn month_index(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 12 + i64::from(date.month0())
}

fn anchored_date_from_index(index: i64, day: u32) -> NaiveDate {
    let year = index.div_euclid(12);
    let month = index.rem_euclid(12) as u32 + 1;
    match i32::try_from(year) {
        Ok(year) => anchored_date(year, month, day),
        Err(_) => NaiveDate::MAX,
    }
}

/// Whole calendar months between two dates, ignoring the day component.
pub fn months_between(start: NaiveDate, end: NaiveDate) -> i64 {
    month_index(end) - month_index(start)
}

/// A half-open annual accounting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cycle {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub mode: YearTrackingMode,
}

impl Cycle {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Calendar cycles read as the year; anniversary cycles as an inclusive date range.
    pub fn label(&self) -> String {
        match self.mode {
            YearTrackingMode::Calendar => self.start.year().to_string(),
            YearTrackingMode::Anniversary => format_day_range(self.start, self.end),
        }
    }
}

/// Formats `[start, end)` as an inclusive range such as `Aug 15, 2023 - Aug 14, 2024`.
pub fn format_day_range(start: NaiveDate, end: NaiveDate) -> String {
    let last = end.checked_sub_signed(Duration::days(1)).unwrap_or(end).max(start);
    format!("{} - {}", start.format("%b %-d, %Y"), last.format("%b %-d, %Y"))
}

/// Resolves the cycle containing `reference`.
///
/// Calendar cycles run Jan 1 to Jan 1. Anniversary cycles end on the first projection of the
/// anchor's month/day that falls strictly after `reference` and start one year earlier.
pub fn compute_cycle_bounds(anchor: NaiveDate, mode: YearTrackingMode, reference: NaiveDate) -> Cycle {
    match mode {
        YearTrackingMode::Calendar => {
            let year = reference.year();
            Cycle {
                start: anchored_date(year, 1, 1),
                end: anchored_date(year + 1, 1, 1),
                mode,
            }
        }
        YearTrackingMode::Anniversary => {
            let (month, day) = (anchor.month(), anchor.day());
            let this_year = anchored_date(reference.year(), month, day);
            let end = if this_year > reference {
                this_year
            } else {
                anchored_date(reference.year() + 1, month, day)
            };
            Cycle {
                start: anchored_date(end.year() - 1, month, day),
                end,
                mode,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_safe_day_clamps_short_months() {
        assert_eq!(safe_day(2024, 2, 31), 29);
        assert_eq!(safe_day(2023, 2, 29), 28);
        assert_eq!(safe_day(2024, 4, 31), 30);
        assert_eq!(safe_day(2024, 1, 31), 31);
        assert_eq!(safe_day(2400, 2, 30), 29);
        assert_eq!(safe_day(1900, 2, 29), 28);
    }

    #[test]
    fn test_add_months_preserves_day_when_possible() {
        assert_eq!(add_months(date(2024, 1, 15), 1), date(2024, 2, 15));
        assert_eq!(add_months(date(2024, 1, 31), 1), date(2024, 2, 29));
        assert_eq!(add_months(date(2024, 11, 30), 3), date(2025, 2, 28));
        assert_eq!(add_months(date(2024, 8, 15), 12), date(2025, 8, 15));
        assert_eq!(add_months(date(2024, 8, 15), 0), date(2024, 8, 15));
    }

    #[test]
    fn test_calendar_cycle() {
        let cycle = compute_cycle_bounds(date(2024, 8, 15), YearTrackingMode::Calendar, date(2024, 5, 20));
        assert_eq!(cycle.start, date(2024, 1, 1));
        assert_eq!(cycle.end, date(2025, 1, 1));
        assert_eq!(cycle.label(), "2024");
    }

    #[test]
    fn test_anniversary_cycle_before_anchor() {
        let cycle = compute_cycle_bounds(date(2024, 8, 15), YearTrackingMode::Anniversary, date(2024, 5, 20));
        assert_eq!(cycle.start, date(2023, 8, 15));
        assert_eq!(cycle.end, date(2024, 8, 15));
        assert_eq!(cycle.label(), "Aug 15, 2023 - Aug 14, 2024");
    }

    #[test]
    fn test_anniversary_cycle_on_anchor_starts_new_cycle() {
        let cycle = compute_cycle_bounds(date(2020, 8, 15), YearTrackingMode::Anniversary, date(2024, 8, 15));
        assert_eq!(cycle.start, date(2024, 8, 15));
        assert_eq!(cycle.end, date(2025, 8, 15));
    }

    #[test]
    fn test_leap_day_anchor_does_not_drift() {
        let anchor = date(2024, 2, 29);
        let cycle = compute_cycle_bounds(anchor, YearTrackingMode::Anniversary, date(2025, 3, 1));
        assert_eq!(cycle.start, date(2025, 2, 28));
        assert_eq!(cycle.end, date(2026, 2, 28));

        let cycle = compute_cycle_bounds(anchor, YearTrackingMode::Anniversary, date(2027, 6, 1));
        assert_eq!(cycle.start, date(2027, 2, 28));
        assert_eq!(cycle.end, date(2028, 2, 29));
    }

    #[test]
    fn test_cycle_always_contains_reference() {
        let anchors = [date(2020, 1, 1), date(2020, 2, 29), date(2021, 8, 31), date(2019, 12, 31)];
        let mut reference = date(2023, 1, 1);
        let last = date(2025, 1, 10);
        while reference <= last {
            for anchor in anchors {
                for mode in [YearTrackingMode::Calendar, YearTrackingMode::Anniversary] {
                    let cycle = compute_cycle_bounds(anchor, mode, reference);
                    assert!(cycle.contains(reference), "{cycle:?} misses {reference}");
                    assert_eq!(months_between(cycle.start, cycle.end), 12);
                }
            }
            reference = reference.succ_opt().unwrap();
        }
    }
}
