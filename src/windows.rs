//! Enumeration and selection of benefit windows inside a cycle.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::calendar::{Cycle, add_months, format_day_range};
use crate::models::{BenefitWindowExclusion, Frequency};

/// One sub-period of a cycle. `index` is 1-based and chronological.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BenefitWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub label: String,
    pub index: usize,
}

impl BenefitWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }
}

/// Splits `[cycle_start, cycle_end)` into consecutive windows of the frequency's length.
///
/// Each boundary is projected from `cycle_start` rather than from the previous boundary so
/// clamped month ends do not accumulate. The final window is cut at `cycle_end`.
pub fn enumerate_frequency_windows(
    cycle_start: NaiveDate,
    cycle_end: NaiveDate,
    frequency: Frequency,
    is_calendar_year: bool,
) -> Vec<BenefitWindow> {
    let months = frequency.window_months();
    let mut windows = Vec::with_capacity(frequency.windows_per_cycle());
    let mut start = cycle_start;
    let mut index = 1usize;

    while start < cycle_end {
        let offset = months.saturating_mul(index as u32);
        let end = add_months(cycle_start, offset).min(cycle_end);
        if end <= start {
            break;
        }
        let label = window_label(start, end, frequency, index, is_calendar_year);
        windows.push(BenefitWindow { start, end, label, index });
        start = end;
        index += 1;
    }

    windows
}

fn window_label(
    start: NaiveDate,
    end: NaiveDate,
    frequency: Frequency,
    index: usize,
    is_calendar_year: bool,
) -> String {
    if !is_calendar_year {
        return format_day_range(start, end);
    }
    match frequency {
        Frequency::Monthly => start.format("%b %Y").to_string(),
        Frequency::Quarterly => format!("Q{} {}", index, start.year()),
        Frequency::Semiannual => format!("H{} {}", index, start.year()),
        Frequency::Yearly => start.year().to_string(),
    }
}

impl BenefitWindowExclusion {
    /// Whether this exclusion belongs to `cycle`. Exclusions are recorded against a concrete
    /// window, so only those starting inside the cycle are considered.
    pub fn applies_to(&self, cycle: &Cycle) -> bool {
        cycle.contains(self.window_start)
    }

    /// Matches by original index, by exact date range, or by label.
    pub fn matches(&self, window: &BenefitWindow) -> bool {
        self.window_index == Some(window.index)
            || (self.window_start == window.start && self.window_end == window.end)
            || self.window_label.as_deref() == Some(window.label.as_str())
    }
}

/// Windows of one benefit for one cycle, before and after exclusions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowPlan {
    pub cycle: Cycle,
    /// Full enumeration; positions line up with `window_values`.
    pub windows: Vec<BenefitWindow>,
    pub active: Vec<BenefitWindow>,
}

impl WindowPlan {
    pub fn build(cycle: Cycle, frequency: Frequency, exclusions: &[BenefitWindowExclusion]) -> Self {
        let is_calendar_year = cycle.mode == crate::models::YearTrackingMode::Calendar;
        let windows = enumerate_frequency_windows(cycle.start, cycle.end, frequency, is_calendar_year);
        let relevant: Vec<&BenefitWindowExclusion> =
            exclusions.iter().filter(|e| e.applies_to(&cycle)).collect();
        let active = windows
            .iter()
            .filter(|w| !relevant.iter().any(|e| e.matches(w)))
            .cloned()
            .collect();
        Self { cycle, windows, active }
    }

    pub fn current(&self, reference: NaiveDate) -> Option<&BenefitWindow> {
        select_window_for_reference(&self.active, reference)
    }

    pub fn active_indexes(&self) -> Vec<usize> {
        self.active.iter().map(|w| w.index).collect()
    }

    /// Active windows that ended before `current` began and have closed by `today`.
    ///
    /// When `current` is a fallback past an excluded window, later windows that have not
    /// started yet stay out.
    pub fn prior_active<'a>(
        &'a self,
        current: &'a BenefitWindow,
        today: NaiveDate,
    ) -> impl Iterator<Item = &'a BenefitWindow> {
        self.active
            .iter()
            .filter(move |w| w.end <= current.start && w.end <= today)
    }
}

/// Returns the window containing `reference`, or the last window when none does.
///
/// The fallback keeps a "current" window available when the true one has been excluded.
pub fn select_window_for_reference(windows: &[BenefitWindow], reference: NaiveDate) -> Option<&BenefitWindow> {
    windows
        .iter()
        .find(|w| w.contains(reference))
        .or_else(|| windows.last())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::compute_cycle_bounds;
    use crate::models::YearTrackingMode;
    use chrono::Utc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn exclusion(start: NaiveDate, end: NaiveDate, index: Option<usize>, label: Option<&str>) -> BenefitWindowExclusion {
        BenefitWindowExclusion {
            id: 1,
            benefit_id: 1,
            window_start: start,
            window_end: end,
            window_label: label.map(str::to_string),
            window_index: index,
            created_at: Utc::now(),
        }
    }

    fn assert_partition(windows: &[BenefitWindow], start: NaiveDate, end: NaiveDate) {
        assert_eq!(windows.first().unwrap().start, start);
        assert_eq!(windows.last().unwrap().end, end);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert!(pair[0].start < pair[0].end);
        }
        for (position, window) in windows.iter().enumerate() {
            assert_eq!(window.index, position + 1);
        }
    }

    #[test]
    fn test_calendar_monthly_windows() {
        let windows = enumerate_frequency_windows(date(2024, 1, 1), date(2025, 1, 1), Frequency::Monthly, true);
        assert_eq!(windows.len(), 12);
        assert_eq!(windows[0].label, "Jan 2024");
        assert_eq!(windows[1].start, date(2024, 2, 1));
        assert_eq!(windows[1].end, date(2024, 3, 1));
        assert_eq!(windows[11].label, "Dec 2024");
    }

    #[test]
    fn test_calendar_labels_per_frequency() {
        let (start, end) = (date(2024, 1, 1), date(2025, 1, 1));
        let quarters = enumerate_frequency_windows(start, end, Frequency::Quarterly, true);
        let labels: Vec<&str> = quarters.iter().map(|w| w.label.as_str()).collect();
        assert_eq!(labels, vec!["Q1 2024", "Q2 2024", "Q3 2024", "Q4 2024"]);

        let halves = enumerate_frequency_windows(start, end, Frequency::Semiannual, true);
        assert_eq!(halves[1].label, "H2 2024");
        assert_eq!(halves[1].start, date(2024, 7, 1));

        let year = enumerate_frequency_windows(start, end, Frequency::Yearly, true);
        assert_eq!(year.len(), 1);
        assert_eq!(year[0].label, "2024");
        assert_eq!((year[0].start, year[0].end), (start, end));
    }

    #[test]
    fn test_anniversary_labels_use_day_ranges() {
        let windows =
            enumerate_frequency_windows(date(2023, 8, 15), date(2024, 8, 15), Frequency::Quarterly, false);
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[0].label, "Aug 15, 2023 - Nov 14, 2023");
        assert_eq!(windows[3].label, "May 15, 2024 - Aug 14, 2024");
    }

    #[test]
    fn test_windows_partition_every_cycle() {
        let anchors = [date(2020, 1, 31), date(2020, 2, 29), date(2021, 8, 15), date(2021, 11, 30)];
        for anchor in anchors {
            for mode in [YearTrackingMode::Calendar, YearTrackingMode::Anniversary] {
                for frequency in Frequency::ALL {
                    let cycle = compute_cycle_bounds(anchor, mode, date(2024, 6, 10));
                    let windows = enumerate_frequency_windows(
                        cycle.start,
                        cycle.end,
                        frequency,
                        mode == YearTrackingMode::Calendar,
                    );
                    assert_eq!(windows.len(), frequency.windows_per_cycle());
                    assert_partition(&windows, cycle.start, cycle.end);
                }
            }
        }
    }

    #[test]
    fn test_month_end_anchor_does_not_drift() {
        let windows = enumerate_frequency_windows(date(2024, 1, 31), date(2025, 1, 31), Frequency::Monthly, false);
        assert_eq!(windows[0].end, date(2024, 2, 29));
        assert_eq!(windows[1].end, date(2024, 3, 31));
        assert_eq!(windows[2].end, date(2024, 4, 30));
        assert_eq!(windows[11].end, date(2025, 1, 31));
    }

    #[test]
    fn test_empty_cycle_yields_no_windows() {
        let day = date(2024, 8, 15);
        assert!(enumerate_frequency_windows(day, day, Frequency::Monthly, false).is_empty());
        assert!(select_window_for_reference(&[], day).is_none());
    }

    #[test]
    fn test_select_window_for_reference() {
        let windows = enumerate_frequency_windows(date(2024, 1, 1), date(2025, 1, 1), Frequency::Quarterly, true);
        let current = select_window_for_reference(&windows, date(2024, 5, 20)).unwrap();
        assert_eq!(current.index, 2);
        let boundary = select_window_for_reference(&windows, date(2024, 7, 1)).unwrap();
        assert_eq!(boundary.index, 3);
        let outside = select_window_for_reference(&windows, date(2026, 1, 1)).unwrap();
        assert_eq!(outside.index, 4);
    }

    #[test]
    fn test_exclusion_matching_criteria() {
        let cycle = compute_cycle_bounds(date(2024, 8, 15), YearTrackingMode::Calendar, date(2024, 5, 20));
        let by_index = exclusion(date(2024, 4, 1), date(2024, 7, 1), Some(1), None);
        let by_dates = exclusion(date(2024, 4, 1), date(2024, 7, 1), None, None);
        let by_label = exclusion(date(2024, 10, 1), date(2024, 10, 2), None, Some("Q3 2024"));

        let plan = WindowPlan::build(cycle, Frequency::Quarterly, &[by_index, by_dates, by_label]);
        assert_eq!(plan.windows.len(), 4);
        assert_eq!(plan.active_indexes(), vec![4]);
    }

    #[test]
    fn test_exclusion_from_other_cycle_is_ignored() {
        let cycle = compute_cycle_bounds(date(2024, 8, 15), YearTrackingMode::Calendar, date(2024, 5, 20));
        let last_year = exclusion(date(2023, 4, 1), date(2023, 7, 1), Some(2), None);
        let plan = WindowPlan::build(cycle, Frequency::Quarterly, &[last_year]);
        assert_eq!(plan.active_indexes(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_excluded_current_window_falls_back_to_last_active() {
        let cycle = compute_cycle_bounds(date(2024, 8, 15), YearTrackingMode::Calendar, date(2024, 5, 20));
        let q2 = exclusion(date(2024, 4, 1), date(2024, 7, 1), Some(2), Some("Q2 2024"));
        let plan = WindowPlan::build(cycle, Frequency::Quarterly, &[q2]);

        let current = plan.current(date(2024, 5, 20)).unwrap();
        assert_eq!(current.index, 4);
        assert_eq!(current.label, "Q4 2024");

        let closed: Vec<usize> = plan.prior_active(current, date(2024, 5, 20)).map(|w| w.index).collect();
        assert_eq!(closed, vec![1]);

        let late_in_year: Vec<usize> = plan.prior_active(current, date(2024, 11, 2)).map(|w| w.index).collect();
        assert_eq!(late_in_year, vec![1, 3]);
    }
}
