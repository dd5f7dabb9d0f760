//! Per-benefit metrics and per-card value totals.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::ledger::{DateRange, RedemptionLedger};
use crate::models::{Benefit, BenefitType, BenefitWindowExclusion, CreditCard};
use crate::usage::{plan_for, resync};
use crate::windows::{BenefitWindow, WindowPlan};

/// Everything the presentation layer shows for one benefit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenefitMetrics {
    pub benefit: Benefit,
    pub cycle_label: String,
    pub cycle_start: NaiveDate,
    pub cycle_end: NaiveDate,
    pub cycle_redemption_total: f64,
    pub current_window_label: Option<String>,
    pub current_window_total: Option<f64>,
    pub current_window_value: Option<f64>,
    pub current_window_index: Option<usize>,
    pub cycle_window_count: usize,
    pub cycle_target_value: Option<f64>,
    pub missed_window_value: Option<f64>,
    pub active_window_indexes: Vec<usize>,
    pub remaining_value: Option<f64>,
    pub redemption_total: f64,
    pub redemption_count: i64,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub expiration_date: Option<NaiveDate>,
    pub potential_value: f64,
    pub utilized_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardSummary {
    pub card: CreditCard,
    pub benefits: Vec<BenefitMetrics>,
    pub potential_value: f64,
    pub utilized_value: f64,
    pub net_position: f64,
}

/// A benefit together with the exclusions that apply to it.
#[derive(Debug, Clone, PartialEq)]
pub struct BenefitRecord {
    pub benefit: Benefit,
    pub exclusions: Vec<BenefitWindowExclusion>,
}

/// Sum of window targets over active windows, falling back to the flat value per window.
pub fn cycle_target_value(benefit: &Benefit, plan: &WindowPlan) -> Option<f64> {
    match benefit.benefit_type {
        BenefitType::Cumulative => benefit.expected_value,
        BenefitType::Standard | BenefitType::Incremental => sum_targets(benefit, plan.active.iter()),
    }
}

fn sum_targets<'a>(benefit: &Benefit, windows: impl Iterator<Item = &'a BenefitWindow>) -> Option<f64> {
    windows
        .filter_map(|w| benefit.window_target(w.index))
        .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

/// Value left behind in active windows that closed before the current one.
///
/// Only windows ended by `today` count. Their targets are summed with the same per-index
/// fallback as the cycle target; `redeemed_before_current` (redemptions in
/// `[cycle.start, min(current.start, today))`) offsets them.
pub fn missed_window_value(
    benefit: &Benefit,
    plan: &WindowPlan,
    current: Option<&BenefitWindow>,
    redeemed_before_current: f64,
    today: NaiveDate,
) -> Option<f64> {
    match benefit.benefit_type {
        BenefitType::Cumulative => None,
        BenefitType::Standard | BenefitType::Incremental => {
            let Some(current) = current else {
                return Some(0.0);
            };
            let prior_target = sum_targets(benefit, plan.prior_active(current, today)).unwrap_or(0.0);
            Some((prior_target - redeemed_before_current).max(0.0))
        }
    }
}

/// Explicit expiration, else the last day of the current window (or of the cycle).
pub fn effective_expiration(benefit: &Benefit, plan: &WindowPlan, current: Option<&BenefitWindow>) -> Option<NaiveDate> {
    if benefit.expiration_date.is_some() {
        return benefit.expiration_date;
    }
    let end = current.map(|w| w.end).unwrap_or(plan.cycle.end);
    if plan.cycle.is_empty() {
        return None;
    }
    end.checked_sub_signed(Duration::days(1))
}

/// Potential and utilized value before the expiration rule.
fn potential_and_utilized(
    benefit_type: BenefitType,
    is_used: bool,
    cycle_target: Option<f64>,
    missed: Option<f64>,
    cycle_total: f64,
) -> (f64, f64) {
    match benefit_type {
        BenefitType::Standard => {
            let potential = (cycle_target.unwrap_or(0.0) - missed.unwrap_or(0.0)).max(0.0);
            (potential, if is_used { potential } else { 0.0 })
        }
        BenefitType::Incremental => {
            let potential = (cycle_target.unwrap_or(0.0) - missed.unwrap_or(0.0)).max(0.0);
            (potential, cycle_total.min(potential))
        }
        BenefitType::Cumulative => match cycle_target {
            Some(expected) => (expected, cycle_total.min(expected)),
            None => (cycle_total, cycle_total),
        },
    }
}

fn remaining_value(
    benefit: &Benefit,
    is_used: bool,
    current_window_value: Option<f64>,
    current_window_total: Option<f64>,
    cycle_total: f64,
) -> Option<f64> {
    match benefit.benefit_type {
        BenefitType::Standard => current_window_value.map(|v| if is_used { 0.0 } else { v }),
        BenefitType::Incremental => {
            current_window_value.map(|v| (v - current_window_total.unwrap_or(0.0)).max(0.0))
        }
        BenefitType::Cumulative => benefit.expected_value.map(|v| (v - cycle_total).max(0.0)),
    }
}

/// Computes every reported figure for one benefit as of `today`.
///
/// Usage status is recomputed first, so stale stored flags never leak into the figures.
pub fn evaluate_benefit<L: RedemptionLedger + ?Sized>(
    card: &CreditCard,
    record: &BenefitRecord,
    ledger: &L,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<BenefitMetrics> {
    let benefit = resync(card, &record.benefit, &record.exclusions, ledger, today, now)?;
    let plan = plan_for(card, &benefit, &record.exclusions, today);
    let current = plan.current(today);

    let lifetime = ledger.totals_for(benefit.id, DateRange::ALL)?;
    let cycle_total = ledger
        .totals_for(benefit.id, DateRange::between(plan.cycle.start, plan.cycle.end))?
        .amount;
    let current_window_total = match current {
        Some(window) => Some(ledger.totals_for(benefit.id, DateRange::window(window))?.amount),
        None => None,
    };
    let redeemed_before_current = match current {
        Some(window) => {
            ledger
                .totals_for(benefit.id, DateRange::between(plan.cycle.start, window.start.min(today)))?
                .amount
        }
        None => 0.0,
    };

    let current_window_value = current.and_then(|w| benefit.window_target(w.index));
    let cycle_target = cycle_target_value(&benefit, &plan);
    let missed = missed_window_value(&benefit, &plan, current, redeemed_before_current, today);
    let expiration_date = effective_expiration(&benefit, &plan, current);

    let (mut potential, utilized) =
        potential_and_utilized(benefit.benefit_type, benefit.is_used, cycle_target, missed, cycle_total);
    if expiration_date.is_some_and(|expires| expires < today) {
        potential = 0.0;
    }

    Ok(BenefitMetrics {
        cycle_label: plan.cycle.label(),
        cycle_start: plan.cycle.start,
        cycle_end: plan.cycle.end,
        cycle_redemption_total: cycle_total,
        current_window_label: current.map(|w| w.label.clone()),
        current_window_total,
        current_window_value,
        current_window_index: current.map(|w| w.index),
        cycle_window_count: plan.windows.len(),
        cycle_target_value: cycle_target,
        missed_window_value: missed,
        active_window_indexes: plan.active_indexes(),
        remaining_value: remaining_value(&benefit, benefit.is_used, current_window_value, current_window_total, cycle_total),
        redemption_total: lifetime.amount,
        redemption_count: lifetime.count,
        is_used: benefit.is_used,
        used_at: benefit.used_at,
        expiration_date,
        potential_value: potential,
        utilized_value: utilized,
        benefit,
    })
}

/// Rolls benefit metrics into card totals; `net_position = utilized - annual_fee`.
pub fn summarize_card<L: RedemptionLedger + ?Sized>(
    card: &CreditCard,
    records: &[BenefitRecord],
    ledger: &L,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<CardSummary> {
    let benefits = records
        .iter()
        .map(|record| evaluate_benefit(card, record, ledger, today, now))
        .collect::<Result<Vec<_>>>()?;
    let potential_value: f64 = benefits.iter().map(|b| b.potential_value).sum();
    let utilized_value: f64 = benefits.iter().map(|b| b.utilized_value).sum();
    Ok(CardSummary {
        card: card.clone(),
        benefits,
        potential_value,
        utilized_value,
        net_position: utilized_value - card.annual_fee,
    })
}
