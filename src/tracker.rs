//! Card, benefit, redemption and exclusion operations.
//!
//! Every operation validates before writing. Mutations that can change a benefit's usage
//! status re-run the usage sync for `today` after the row is committed.

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use tracing::info;

use crate::db;
use crate::error::{Entity, Error, Result};
use crate::models::{
    Benefit, BenefitInput, BenefitRedemption, BenefitType, BenefitUpdate, BenefitWindowExclusion,
    CardUpdate, CreditCard, ExclusionInput, NewCard, RedemptionInput, RedemptionUpdate,
};
use crate::usage::{sync_usage_status, usage_stamp};
use crate::validation::{
    normalise_window_values, validate_annual_fee, validate_benefit_input, validate_benefit_values,
    validate_last_four, validate_new_card, validate_redemption_amount,
};
use crate::valuation::{BenefitRecord, CardSummary, summarize_card};

pub fn require_card(conn: &Connection, id: i64) -> Result<CreditCard> {
    db::get_card(conn, id)?.ok_or_else(|| Error::not_found(Entity::Card, id))
}

pub fn require_benefit(conn: &Connection, id: i64) -> Result<Benefit> {
    db::get_benefit(conn, id)?.ok_or_else(|| Error::not_found(Entity::Benefit, id))
}

pub fn require_redemption(conn: &Connection, id: i64) -> Result<BenefitRedemption> {
    db::get_redemption(conn, id)?.ok_or_else(|| Error::not_found(Entity::Redemption, id))
}

pub fn require_exclusion(conn: &Connection, id: i64) -> Result<BenefitWindowExclusion> {
    db::get_exclusion(conn, id)?.ok_or_else(|| Error::not_found(Entity::Exclusion, id))
}

// ---------------------------------------------------------------------------
// Cards
// ---------------------------------------------------------------------------

pub fn create_card(conn: &Connection, card: &NewCard) -> Result<CreditCard> {
    validate_new_card(card)?;
    let id = db::add_card(conn, card)?;
    info!(card_id = id, card_name = %card.card_name, "Card created");
    require_card(conn, id)
}

pub fn update_card(conn: &Connection, id: i64, update: CardUpdate) -> Result<CreditCard> {
    let mut card = require_card(conn, id)?;
    if let Some(last_four) = &update.last_four {
        validate_last_four(last_four)?;
    }
    if let Some(annual_fee) = update.annual_fee {
        validate_annual_fee(annual_fee)?;
    }
    if let Some(name) = update.card_name {
        card.card_name = name;
    }
    if let Some(company) = update.company_name {
        card.company_name = company;
    }
    if let Some(last_four) = update.last_four {
        card.last_four = last_four;
    }
    if let Some(account) = update.account_name {
        card.account_name = account;
    }
    if let Some(annual_fee) = update.annual_fee {
        card.annual_fee = annual_fee;
    }
    if let Some(fee_due_date) = update.fee_due_date {
        card.fee_due_date = fee_due_date;
    }
    if let Some(mode) = update.year_tracking_mode {
        card.year_tracking_mode = mode;
    }
    if update.display_order.is_some() {
        card.display_order = update.display_order;
    }
    db::save_card(conn, &card)?;
    Ok(card)
}

/// Marks a card cancelled (stamping `cancelled_at`) or reinstates it.
pub fn set_card_cancelled(conn: &Connection, id: i64, cancelled: bool) -> Result<CreditCard> {
    let mut card = require_card(conn, id)?;
    if card.is_cancelled != cancelled {
        card.is_cancelled = cancelled;
        card.cancelled_at = cancelled.then(Utc::now);
        db::save_card(conn, &card)?;
        info!(card_id = id, cancelled, "Card cancellation changed");
    }
    Ok(card)
}

pub fn delete_card(conn: &Connection, id: i64) -> Result<()> {
    if !db::remove_card(conn, id)? {
        return Err(Error::not_found(Entity::Card, id));
    }
    info!(card_id = id, "Card deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Benefits
// ---------------------------------------------------------------------------

pub fn create_benefit(conn: &Connection, card_id: i64, input: BenefitInput, today: NaiveDate) -> Result<Benefit> {
    require_card(conn, card_id)?;
    let input = validate_benefit_input(input)?;
    let id = db::add_benefit(conn, card_id, &input)?;
    info!(card_id, benefit_id = id, name = %input.name, "Benefit created");
    sync_usage_status(conn, id, today)
}

/// Applies a partial update.
///
/// Changing the type resets usage and drops the value fields the new type cannot carry.
/// An explicit `is_used` is honoured for standard benefits only.
pub fn update_benefit(conn: &Connection, id: i64, update: BenefitUpdate, today: NaiveDate) -> Result<Benefit> {
    let mut benefit = require_benefit(conn, id)?;

    if let Some(new_type) = update.benefit_type.filter(|t| *t != benefit.benefit_type) {
        benefit.is_used = false;
        benefit.used_at = None;
        if new_type == BenefitType::Cumulative {
            benefit.value = None;
            benefit.window_values = None;
        } else {
            benefit.expected_value = None;
        }
        benefit.benefit_type = new_type;
    }
    if let Some(name) = update.name {
        benefit.name = name;
    }
    if let Some(description) = update.description {
        benefit.description = description;
    }
    if let Some(frequency) = update.frequency {
        benefit.frequency = frequency;
    }
    if let Some(value) = update.value {
        benefit.value = Some(value);
    }
    if let Some(expected_value) = update.expected_value {
        benefit.expected_value = expected_value;
    }
    if let Some(window_values) = update.window_values {
        benefit.window_values = window_values;
    }
    if let Some(mode) = update.window_tracking_mode {
        benefit.window_tracking_mode = mode;
    }
    if let Some(expiration_date) = update.expiration_date {
        benefit.expiration_date = expiration_date;
    }
    if let Some(flag) = update.exclude_from_benefits_page {
        benefit.exclude_from_benefits_page = flag;
    }
    if let Some(flag) = update.exclude_from_notifications {
        benefit.exclude_from_notifications = flag;
    }
    if let Some(is_used) = update.is_used.filter(|_| benefit.benefit_type == BenefitType::Standard) {
        benefit.is_used = is_used;
        benefit.used_at = is_used.then(|| usage_stamp(today));
    }

    if benefit.benefit_type == BenefitType::Cumulative {
        benefit.value = benefit.value.filter(|v| *v != 0.0);
        if benefit.window_values.as_ref().is_some_and(|v| !v.is_empty()) {
            return Err(Error::validation("Cumulative benefits do not support window values."));
        }
        benefit.window_values = None;
    }
    validate_benefit_values(benefit.benefit_type, benefit.value, benefit.expected_value)?;
    if benefit.benefit_type != BenefitType::Cumulative {
        benefit.window_values = normalise_window_values(benefit.frequency, benefit.window_values.take())?;
    }

    db::save_benefit(conn, &benefit)?;
    sync_usage_status(conn, id, today)
}

/// Manual usage toggle, stamped on `today`. Written as-is; the next sync applies the window
/// precedence rule.
pub fn set_benefit_usage(conn: &Connection, id: i64, is_used: bool, today: NaiveDate) -> Result<Benefit> {
    let mut benefit = require_benefit(conn, id)?;
    benefit.is_used = is_used;
    benefit.used_at = is_used.then(|| usage_stamp(today));
    db::set_benefit_usage(conn, id, benefit.is_used, benefit.used_at)?;
    info!(benefit_id = id, is_used, "Benefit usage set manually");
    Ok(benefit)
}

pub fn delete_benefit(conn: &Connection, id: i64) -> Result<()> {
    if !db::remove_benefit(conn, id)? {
        return Err(Error::not_found(Entity::Benefit, id));
    }
    info!(benefit_id = id, "Benefit deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Redemptions
// ---------------------------------------------------------------------------

pub fn add_redemption(
    conn: &Connection,
    benefit_id: i64,
    input: &RedemptionInput,
    today: NaiveDate,
) -> Result<BenefitRedemption> {
    require_benefit(conn, benefit_id)?;
    validate_redemption_amount(input.amount)?;
    let id = db::add_redemption(conn, benefit_id, input)?;
    info!(benefit_id, redemption_id = id, amount = input.amount, "Redemption recorded");
    sync_usage_status(conn, benefit_id, today)?;
    require_redemption(conn, id)
}

pub fn list_redemptions(conn: &Connection, benefit_id: i64) -> Result<Vec<BenefitRedemption>> {
    require_benefit(conn, benefit_id)?;
    Ok(db::list_redemptions(conn, benefit_id)?)
}

pub fn update_redemption(
    conn: &Connection,
    id: i64,
    update: RedemptionUpdate,
    today: NaiveDate,
) -> Result<BenefitRedemption> {
    let mut redemption = require_redemption(conn, id)?;
    if let Some(amount) = update.amount {
        validate_redemption_amount(amount)?;
        redemption.amount = amount;
    }
    if let Some(label) = update.label {
        redemption.label = label;
    }
    if let Some(occurred_on) = update.occurred_on {
        redemption.occurred_on = occurred_on;
    }
    db::save_redemption(conn, &redemption)?;
    sync_usage_status(conn, redemption.benefit_id, today)?;
    Ok(redemption)
}

pub fn delete_redemption(conn: &Connection, id: i64, today: NaiveDate) -> Result<()> {
    let redemption = require_redemption(conn, id)?;
    db::remove_redemption(conn, id)?;
    info!(benefit_id = redemption.benefit_id, redemption_id = id, "Redemption deleted");
    sync_usage_status(conn, redemption.benefit_id, today)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Window exclusions
// ---------------------------------------------------------------------------

pub fn add_window_exclusion(
    conn: &Connection,
    benefit_id: i64,
    input: &ExclusionInput,
    today: NaiveDate,
) -> Result<BenefitWindowExclusion> {
    require_benefit(conn, benefit_id)?;
    if input.window_end <= input.window_start {
        return Err(Error::validation("Excluded window must end after it starts."));
    }
    if input.window_index == Some(0) {
        return Err(Error::validation("Window index is 1-based."));
    }
    let id = db::add_exclusion(conn, benefit_id, input)?;
    info!(benefit_id, exclusion_id = id, start = %input.window_start, "Window excluded");
    sync_usage_status(conn, benefit_id, today)?;
    require_exclusion(conn, id)
}

pub fn delete_window_exclusion(conn: &Connection, id: i64, today: NaiveDate) -> Result<()> {
    let exclusion = require_exclusion(conn, id)?;
    db::remove_exclusion(conn, id)?;
    sync_usage_status(conn, exclusion.benefit_id, today)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

pub fn benefit_records(conn: &Connection, card_id: i64) -> Result<Vec<BenefitRecord>> {
    db::list_benefits_for_card(conn, card_id)?
        .into_iter()
        .map(|benefit| {
            let exclusions = db::list_exclusions(conn, benefit.id)?;
            Ok(BenefitRecord { benefit, exclusions })
        })
        .collect()
}

/// Card summary as of `today`. Usage is recomputed for display without writing.
pub fn card_summary(conn: &Connection, card_id: i64, today: NaiveDate) -> Result<CardSummary> {
    let card = require_card(conn, card_id)?;
    let records = benefit_records(conn, card_id)?;
    summarize_card(&card, &records, conn, today, usage_stamp(today))
}

pub fn card_summaries(conn: &Connection, today: NaiveDate) -> Result<Vec<CardSummary>> {
    db::list_cards(conn)?
        .iter()
        .map(|card| {
            let records = benefit_records(conn, card.id)?;
            summarize_card(card, &records, conn, today, usage_stamp(today))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Frequency, YearTrackingMode};

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_tables(&conn).unwrap();
        conn
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn seed_card(conn: &Connection, mode: YearTrackingMode) -> CreditCard {
        create_card(
            conn,
            &NewCard {
                card_name: "Test Card".into(),
                company_name: "Test Issuer".into(),
                last_four: "1234".into(),
                account_name: "Primary".into(),
                annual_fee: 95.0,
                fee_due_date: date(2024, 8, 15),
                year_tracking_mode: mode,
                display_order: None,
            },
        )
        .unwrap()
    }

    fn input(benefit_type: BenefitType, frequency: Frequency, value: Option<f64>) -> BenefitInput {
        let mut input = BenefitInput::new(format!("{benefit_type} {frequency}"), frequency, benefit_type);
        input.value = value;
        input
    }

    fn spend(amount: f64, occurred_on: NaiveDate) -> RedemptionInput {
        RedemptionInput {
            label: "Seed redemption".into(),
            amount,
            occurred_on,
        }
    }

    #[test]
    fn test_create_card_validates() {
        let conn = test_db();
        let mut card = NewCard {
            card_name: "Bad".into(),
            company_name: String::new(),
            last_four: "12".into(),
            account_name: "Primary".into(),
            annual_fee: 0.0,
            fee_due_date: date(2024, 1, 1),
            year_tracking_mode: YearTrackingMode::Calendar,
            display_order: None,
        };
        assert!(matches!(create_card(&conn, &card), Err(Error::Validation(_))));
        card.last_four = "1234".into();
        card.annual_fee = -5.0;
        assert!(create_card(&conn, &card).is_err());
        assert!(db::list_cards(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_missing_rows_are_not_found() {
        let conn = test_db();
        let today = date(2024, 5, 20);
        assert!(require_card(&conn, 42).unwrap_err().is_not_found());
        assert!(delete_benefit(&conn, 42).unwrap_err().is_not_found());
        assert!(delete_redemption(&conn, 42, today).unwrap_err().is_not_found());
        assert!(
            create_benefit(&conn, 42, input(BenefitType::Standard, Frequency::Yearly, Some(1.0)), today)
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_window_values_round_trip_through_storage() {
        let conn = test_db();
        let card = seed_card(&conn, YearTrackingMode::Calendar);
        let today = date(2024, 5, 20);

        let mut bad = input(BenefitType::Incremental, Frequency::Quarterly, Some(25.0));
        bad.window_values = Some(vec![10.0, 20.0, 30.0]);
        assert!(matches!(create_benefit(&conn, card.id, bad, today), Err(Error::Validation(_))));
        assert!(db::list_benefits_for_card(&conn, card.id).unwrap().is_empty());

        let mut good = input(BenefitType::Incremental, Frequency::Quarterly, Some(25.0));
        good.window_values = Some(vec![10.0, 20.0, 30.0, 40.0]);
        let benefit = create_benefit(&conn, card.id, good, today).unwrap();
        let stored = require_benefit(&conn, benefit.id).unwrap();
        assert_eq!(stored.window_values, Some(vec![10.0, 20.0, 30.0, 40.0]));
    }

    #[test]
    fn test_redemption_flow_syncs_incremental_usage() {
        let conn = test_db();
        let card = seed_card(&conn, YearTrackingMode::Calendar);
        let may = date(2024, 5, 20);
        let benefit = create_benefit(&conn, card.id, input(BenefitType::Incremental, Frequency::Monthly, Some(50.0)), may).unwrap();

        let first = add_redemption(&conn, benefit.id, &spend(30.0, date(2024, 5, 2)), may).unwrap();
        assert!(!require_benefit(&conn, benefit.id).unwrap().is_used);

        add_redemption(&conn, benefit.id, &spend(20.0, date(2024, 5, 18)), may).unwrap();
        let used = require_benefit(&conn, benefit.id).unwrap();
        assert!(used.is_used);
        assert!(used.used_at.is_some());

        update_redemption(&conn, first.id, RedemptionUpdate { amount: Some(10.0), ..Default::default() }, may).unwrap();
        assert!(!require_benefit(&conn, benefit.id).unwrap().is_used);

        update_redemption(&conn, first.id, RedemptionUpdate { amount: Some(30.0), ..Default::default() }, may).unwrap();
        assert!(require_benefit(&conn, benefit.id).unwrap().is_used);

        delete_redemption(&conn, first.id, may).unwrap();
        assert!(!require_benefit(&conn, benefit.id).unwrap().is_used);
        assert!(matches!(
            add_redemption(&conn, benefit.id, &spend(0.0, may), may),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_next_window_resets_usage_on_sync() {
        let conn = test_db();
        let card = seed_card(&conn, YearTrackingMode::Calendar);
        let may = date(2024, 5, 20);
        let benefit = create_benefit(&conn, card.id, input(BenefitType::Incremental, Frequency::Monthly, Some(50.0)), may).unwrap();
        add_redemption(&conn, benefit.id, &spend(50.0, date(2024, 5, 10)), may).unwrap();
        assert!(require_benefit(&conn, benefit.id).unwrap().is_used);

        let june = date(2024, 6, 2);
        let synced = sync_usage_status(&conn, benefit.id, june).unwrap();
        assert!(!synced.is_used);
        let summary = card_summary(&conn, card.id, june).unwrap();
        assert_eq!(summary.benefits[0].current_window_total, Some(0.0));

        let again = sync_usage_status(&conn, benefit.id, june).unwrap();
        assert_eq!(again, synced);
    }

    #[test]
    fn test_update_benefit_type_change_resets_usage() {
        let conn = test_db();
        let card = seed_card(&conn, YearTrackingMode::Calendar);
        let today = date(2024, 5, 20);
        let benefit = create_benefit(&conn, card.id, input(BenefitType::Standard, Frequency::Yearly, Some(100.0)), today).unwrap();
        set_benefit_usage(&conn, benefit.id, true, today).unwrap();

        let update = BenefitUpdate {
            benefit_type: Some(BenefitType::Cumulative),
            expected_value: Some(Some(300.0)),
            ..Default::default()
        };
        let updated = update_benefit(&conn, benefit.id, update, today).unwrap();
        assert_eq!(updated.benefit_type, BenefitType::Cumulative);
        assert!(!updated.is_used);
        assert_eq!(updated.value, None);
        assert_eq!(updated.expected_value, Some(300.0));

        // Back to standard needs a value again and drops the expected value.
        let back = BenefitUpdate {
            benefit_type: Some(BenefitType::Standard),
            ..Default::default()
        };
        assert!(matches!(update_benefit(&conn, benefit.id, back.clone(), today), Err(Error::Validation(_))));
        let back = BenefitUpdate { value: Some(80.0), ..back };
        let standard = update_benefit(&conn, benefit.id, back, today).unwrap();
        assert_eq!(standard.expected_value, None);
        assert_eq!(standard.value, Some(80.0));
    }

    #[test]
    fn test_update_benefit_is_used_only_for_standard() {
        let conn = test_db();
        let card = seed_card(&conn, YearTrackingMode::Calendar);
        let today = date(2024, 5, 20);
        let incremental = create_benefit(&conn, card.id, input(BenefitType::Incremental, Frequency::Monthly, Some(10.0)), today).unwrap();
        let updated = update_benefit(
            &conn,
            incremental.id,
            BenefitUpdate { is_used: Some(true), ..Default::default() },
            today,
        )
        .unwrap();
        assert!(!updated.is_used);

        let mut bad_values = BenefitUpdate::default();
        bad_values.window_values = Some(Some(vec![1.0; 4]));
        assert!(update_benefit(&conn, incremental.id, bad_values, today).is_err());
    }

    #[test]
    fn test_manual_usage_then_sync_in_later_window() {
        let conn = test_db();
        let card = seed_card(&conn, YearTrackingMode::Calendar);
        let today = date(2024, 5, 20);
        let benefit = create_benefit(&conn, card.id, input(BenefitType::Standard, Frequency::Monthly, Some(15.0)), today).unwrap();

        let marked = set_benefit_usage(&conn, benefit.id, true, today).unwrap();
        assert!(marked.is_used);
        assert_eq!(marked.used_at.map(|at| at.date_naive()), Some(today));
        assert!(sync_usage_status(&conn, benefit.id, today).unwrap().is_used);
        assert!(sync_usage_status(&conn, benefit.id, date(2024, 5, 31)).unwrap().is_used);

        assert!(!sync_usage_status(&conn, benefit.id, date(2024, 6, 1)).unwrap().is_used);
    }

    #[test]
    fn test_manual_usage_through_update_holds_in_window() {
        let conn = test_db();
        let card = seed_card(&conn, YearTrackingMode::Calendar);
        let today = date(2024, 1, 31);
        let benefit = create_benefit(&conn, card.id, input(BenefitType::Standard, Frequency::Monthly, Some(15.0)), today).unwrap();

        let update = BenefitUpdate { is_used: Some(true), ..Default::default() };
        let updated = update_benefit(&conn, benefit.id, update, today).unwrap();
        assert!(updated.is_used);
        assert!(sync_usage_status(&conn, benefit.id, today).unwrap().is_used);
    }

    #[test]
    fn test_excluding_current_window_changes_usage() {
        let conn = test_db();
        let card = seed_card(&conn, YearTrackingMode::Calendar);
        let today = date(2024, 5, 20);
        let benefit = create_benefit(&conn, card.id, input(BenefitType::Incremental, Frequency::Quarterly, Some(40.0)), today).unwrap();
        add_redemption(&conn, benefit.id, &spend(40.0, date(2024, 5, 1)), today).unwrap();
        assert!(require_benefit(&conn, benefit.id).unwrap().is_used);

        let exclusion = add_window_exclusion(
            &conn,
            benefit.id,
            &ExclusionInput {
                window_start: date(2024, 4, 1),
                window_end: date(2024, 7, 1),
                window_label: Some("Q2 2024".into()),
                window_index: Some(2),
            },
            today,
        )
        .unwrap();
        assert!(!require_benefit(&conn, benefit.id).unwrap().is_used);

        let summary = card_summary(&conn, card.id, today).unwrap();
        assert_eq!(summary.benefits[0].current_window_label.as_deref(), Some("Q4 2024"));

        delete_window_exclusion(&conn, exclusion.id, today).unwrap();
        assert!(require_benefit(&conn, benefit.id).unwrap().is_used);
    }

    #[test]
    fn test_card_summary_totals_and_expiration() {
        let conn = test_db();
        let card = seed_card(&conn, YearTrackingMode::Anniversary);
        let today = date(2024, 10, 1);

        let mut expired = input(BenefitType::Standard, Frequency::Yearly, Some(200.0));
        expired.expiration_date = Some(date(2024, 9, 30));
        create_benefit(&conn, card.id, expired, today).unwrap();

        let travel = create_benefit(&conn, card.id, input(BenefitType::Incremental, Frequency::Yearly, Some(300.0)), today).unwrap();
        add_redemption(&conn, travel.id, &spend(120.0, date(2024, 9, 1)), today).unwrap();

        let summary = card_summary(&conn, card.id, today).unwrap();
        assert_eq!(summary.benefits.len(), 2);
        assert_eq!(summary.benefits[0].potential_value, 0.0);
        assert_eq!(summary.potential_value, 300.0);
        assert_eq!(summary.utilized_value, 120.0);
        assert_eq!(summary.net_position, 25.0);

        let all = card_summaries(&conn, today).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], summary);
    }

    #[test]
    fn test_cancel_and_delete_card() {
        let conn = test_db();
        let card = seed_card(&conn, YearTrackingMode::Calendar);
        let cancelled = set_card_cancelled(&conn, card.id, true).unwrap();
        assert!(cancelled.is_cancelled);
        assert!(cancelled.cancelled_at.is_some());
        let reinstated = set_card_cancelled(&conn, card.id, false).unwrap();
        assert_eq!(reinstated.cancelled_at, None);

        let updated = update_card(&conn, card.id, CardUpdate { annual_fee: Some(150.0), ..Default::default() }).unwrap();
        assert_eq!(updated.annual_fee, 150.0);
        assert!(update_card(&conn, card.id, CardUpdate { last_four: Some("x".into()), ..Default::default() }).is_err());

        delete_card(&conn, card.id).unwrap();
        assert!(delete_card(&conn, card.id).unwrap_err().is_not_found());
    }
}
