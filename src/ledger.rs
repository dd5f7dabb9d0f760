//! Redemption aggregation.
//!
//! The same grouped sum/count query is answered either by SQLite (see `db`) or by an in-memory
//! slice of redemption rows, so the engine can run against storage or against fixtures.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::Result;
use crate::models::BenefitRedemption;
use crate::windows::BenefitWindow;

/// Sum and count of redemptions for one benefit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RedemptionTotals {
    pub amount: f64,
    pub count: i64,
}

impl RedemptionTotals {
    pub fn add(&mut self, amount: f64) {
        self.amount += amount;
        self.count += 1;
    }
}

/// Optional half-open bounds on `occurred_on`: `start <= occurred_on < end`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub const ALL: DateRange = DateRange { start: None, end: None };

    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn before(end: NaiveDate) -> Self {
        Self { start: None, end: Some(end) }
    }

    pub fn window(window: &BenefitWindow) -> Self {
        Self::between(window.start, window.end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|start| start <= date) && self.end.is_none_or(|end| date < end)
    }
}

pub trait RedemptionLedger {
    /// Grouped totals per benefit. Every requested id is present in the result, with zero
    /// totals when nothing matched; an empty id list yields an empty map.
    fn redemption_summary(&self, benefit_ids: &[i64], range: DateRange) -> Result<HashMap<i64, RedemptionTotals>>;

    fn totals_for(&self, benefit_id: i64, range: DateRange) -> Result<RedemptionTotals> {
        let summary = self.redemption_summary(&[benefit_id], range)?;
        Ok(summary.get(&benefit_id).copied().unwrap_or_default())
    }
}

/// Seeds a zeroed entry for every requested id.
pub fn empty_summary(benefit_ids: &[i64]) -> HashMap<i64, RedemptionTotals> {
    benefit_ids
        .iter()
        .map(|id| (*id, RedemptionTotals::default()))
        .collect()
}

impl RedemptionLedger for [BenefitRedemption] {
    fn redemption_summary(&self, benefit_ids: &[i64], range: DateRange) -> Result<HashMap<i64, RedemptionTotals>> {
        let mut summary = empty_summary(benefit_ids);
        for redemption in self.iter().filter(|r| range.contains(r.occurred_on)) {
            if let Some(totals) = summary.get_mut(&redemption.benefit_id) {
                totals.add(redemption.amount);
            }
        }
        Ok(summary)
    }
}
