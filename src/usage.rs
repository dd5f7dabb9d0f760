//! Usage-status synchronisation.
//!
//! [`resync`] is pure: it returns the benefit with `is_used`/`used_at` recomputed for the window
//! containing `as_of`. [`sync_usage_status`] runs it against storage and persists a flip.
//!
//! Precedence between manual toggles and redemptions: a standard benefit marked used while a
//! window is open stays used until that window closes, even with no redemptions. Once the
//! window rolls over, redemptions in the new window decide. Incremental benefits are always
//! derived from redemptions.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use tracing::debug;

use crate::calendar::compute_cycle_bounds;
use crate::db;
use crate::error::{Entity, Error, Result};
use crate::ledger::{DateRange, RedemptionLedger, RedemptionTotals};
use crate::models::{Benefit, BenefitType, BenefitWindowExclusion, CreditCard};
use crate::windows::{BenefitWindow, WindowPlan};

/// Window plan for `benefit` in the cycle containing `as_of`.
pub fn plan_for(card: &CreditCard, benefit: &Benefit, exclusions: &[BenefitWindowExclusion], as_of: NaiveDate) -> WindowPlan {
    let cycle = compute_cycle_bounds(card.fee_due_date, benefit.tracking_mode(card), as_of);
    WindowPlan::build(cycle, benefit.frequency, exclusions)
}

fn window_satisfied(benefit: &Benefit, window: &BenefitWindow, totals: RedemptionTotals) -> bool {
    match benefit.benefit_type {
        BenefitType::Incremental => {
            let target = benefit.window_target(window.index).unwrap_or(0.0);
            target > 0.0 && totals.amount >= target
        }
        BenefitType::Standard => {
            let marked_in_window = benefit.is_used
                && benefit
                    .used_at
                    .is_some_and(|at| window.contains(at.date_naive()));
            totals.count > 0 || marked_in_window
        }
        BenefitType::Cumulative => false,
    }
}

/// Whether `benefit` should count as used at `as_of`; `None` for cumulative benefits, which
/// never change state automatically.
pub fn should_be_used<L: RedemptionLedger + ?Sized>(
    card: &CreditCard,
    benefit: &Benefit,
    exclusions: &[BenefitWindowExclusion],
    ledger: &L,
    as_of: NaiveDate,
) -> Result<Option<bool>> {
    if benefit.benefit_type == BenefitType::Cumulative {
        return Ok(None);
    }
    let plan = plan_for(card, benefit, exclusions, as_of);
    let Some(window) = plan.current(as_of) else {
        return Ok(Some(false));
    };
    let totals = ledger.totals_for(benefit.id, DateRange::window(window))?;
    Ok(Some(window_satisfied(benefit, window, totals)))
}

/// Recomputes usage for `as_of`. Applying it to its own output changes nothing.
pub fn resync<L: RedemptionLedger + ?Sized>(
    card: &CreditCard,
    benefit: &Benefit,
    exclusions: &[BenefitWindowExclusion],
    ledger: &L,
    as_of: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Benefit> {
    let mut synced = benefit.clone();
    if let Some(should) = should_be_used(card, benefit, exclusions, ledger, as_of)? {
        if should != benefit.is_used {
            synced.is_used = should;
            synced.used_at = should.then_some(now);
        }
    }
    Ok(synced)
}

/// Timestamp for a usage change made as of `day`: the current wall-clock time on that date.
///
/// Window membership of `used_at` is judged by its date, so stamps must share the calendar of
/// the `as_of` dates used for syncing.
pub fn usage_stamp(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(Utc::now().time()).and_utc()
}

/// Loads a benefit, resyncs it against the stored ledger and persists any flip.
pub fn sync_usage_status(conn: &Connection, benefit_id: i64, as_of: NaiveDate) -> Result<Benefit> {
    let benefit = db::get_benefit(conn, benefit_id)?.ok_or_else(|| Error::not_found(Entity::Benefit, benefit_id))?;
    let card = db::get_card(conn, benefit.credit_card_id)?
        .ok_or_else(|| Error::not_found(Entity::Card, benefit.credit_card_id))?;
    let exclusions = db::list_exclusions(conn, benefit_id)?;

    let synced = resync(&card, &benefit, &exclusions, conn, as_of, usage_stamp(as_of))?;
    if synced.is_used != benefit.is_used {
        db::set_benefit_usage(conn, benefit_id, synced.is_used, synced.used_at)?;
        debug!(benefit_id, is_used = synced.is_used, %as_of, "Usage status changed");
    }
    Ok(synced)
}
