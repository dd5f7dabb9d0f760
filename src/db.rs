use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{Connection, OptionalExtension, Result, Row, params, params_from_iter};

use crate::ledger::{DateRange, RedemptionLedger, RedemptionTotals, empty_summary};
use crate::models::{
    Benefit, BenefitInput, BenefitRedemption, BenefitType, BenefitWindowExclusion, CreditCard,
    ExclusionInput, Frequency, NewCard, RedemptionInput, YearTrackingMode,
};

macro_rules! sql_text_enum {
    ($($ty:ty),+) => {$(
        impl ToSql for $ty {
            fn to_sql(&self) -> Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    )+};
}

sql_text_enum!(Frequency, BenefitType, YearTrackingMode);

/// Creates tables on the given connection.
pub fn init_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS creditcard (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            card_name           TEXT NOT NULL,
            company_name        TEXT NOT NULL DEFAULT '',
            last_four           TEXT NOT NULL,
            account_name        TEXT NOT NULL,
            annual_fee          REAL NOT NULL DEFAULT 0.0,
            fee_due_date        TEXT NOT NULL,
            year_tracking_mode  TEXT NOT NULL DEFAULT 'calendar',
            is_cancelled        INTEGER NOT NULL DEFAULT 0,
            cancelled_at        TEXT,
            display_order       INTEGER,
            created_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS benefit (
            id                          INTEGER PRIMARY KEY AUTOINCREMENT,
            credit_card_id              INTEGER NOT NULL REFERENCES creditcard(id) ON DELETE CASCADE,
            name                        TEXT NOT NULL,
            description                 TEXT,
            frequency                   TEXT NOT NULL,
            type                        TEXT NOT NULL DEFAULT 'standard',
            value                       REAL,
            expected_value              REAL,
            window_values               TEXT,
            window_tracking_mode        TEXT,
            expiration_date             TEXT,
            is_used                     INTEGER NOT NULL DEFAULT 0,
            used_at                     TEXT,
            exclude_from_benefits_page  INTEGER NOT NULL DEFAULT 0,
            exclude_from_notifications  INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS ix_benefit_card ON benefit(credit_card_id);

        CREATE TABLE IF NOT EXISTS benefit_redemption (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            benefit_id   INTEGER NOT NULL REFERENCES benefit(id) ON DELETE CASCADE,
            label        TEXT NOT NULL,
            amount       REAL NOT NULL,
            occurred_on  TEXT NOT NULL,
            created_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS ix_redemption_benefit ON benefit_redemption(benefit_id, occurred_on);

        CREATE TABLE IF NOT EXISTS benefit_window_exclusion (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            benefit_id    INTEGER NOT NULL REFERENCES benefit(id) ON DELETE CASCADE,
            window_start  TEXT NOT NULL,
            window_end    TEXT NOT NULL,
            window_label  TEXT,
            window_index  INTEGER,
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS ix_exclusion_benefit ON benefit_window_exclusion(benefit_id);",
    )?;
    Ok(())
}

/// Opens (or creates) the SQLite database file and ensures tables exist.
pub fn init_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    init_tables(&conn)?;
    Ok(conn)
}

// ---------------------------------------------------------------------------
// Cards
// ---------------------------------------------------------------------------

const CARD_COLUMNS: &str = "id, card_name, company_name, last_four, account_name, annual_fee,
    fee_due_date, year_tracking_mode, is_cancelled, cancelled_at, display_order, created_at";

fn card_from_row(row: &Row<'_>) -> Result<CreditCard> {
    Ok(CreditCard {
        id: row.get(0)?,
        card_name: row.get(1)?,
        company_name: row.get(2)?,
        last_four: row.get(3)?,
        account_name: row.get(4)?,
        annual_fee: row.get(5)?,
        fee_due_date: row.get(6)?,
        year_tracking_mode: row.get(7)?,
        is_cancelled: row.get(8)?,
        cancelled_at: row.get(9)?,
        display_order: row.get(10)?,
        created_at: row.get(11)?,
    })
}

pub fn add_card(conn: &Connection, card: &NewCard) -> Result<i64> {
    conn.execute(
        "INSERT INTO creditcard (card_name, company_name, last_four, account_name, annual_fee,
                                 fee_due_date, year_tracking_mode, display_order, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            card.card_name,
            card.company_name,
            card.last_four,
            card.account_name,
            card.annual_fee,
            card.fee_due_date,
            card.year_tracking_mode,
            card.display_order,
            Utc::now(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_card(conn: &Connection, id: i64) -> Result<Option<CreditCard>> {
    conn.query_row(
        &format!("SELECT {CARD_COLUMNS} FROM creditcard WHERE id = ?1"),
        params![id],
        card_from_row,
    )
    .optional()
}

/// Cards in dashboard order: explicit `display_order` first, then creation order.
pub fn list_cards(conn: &Connection) -> Result<Vec<CreditCard>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CARD_COLUMNS} FROM creditcard
         ORDER BY display_order IS NULL, display_order, created_at, id"
    ))?;
    let rows = stmt.query_map([], card_from_row)?;
    rows.collect()
}

/// Writes every mutable card column back.
pub fn save_card(conn: &Connection, card: &CreditCard) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE creditcard
         SET card_name = ?2, company_name = ?3, last_four = ?4, account_name = ?5,
             annual_fee = ?6, fee_due_date = ?7, year_tracking_mode = ?8,
             is_cancelled = ?9, cancelled_at = ?10, display_order = ?11
         WHERE id = ?1",
        params![
            card.id,
            card.card_name,
            card.company_name,
            card.last_four,
            card.account_name,
            card.annual_fee,
            card.fee_due_date,
            card.year_tracking_mode,
            card.is_cancelled,
            card.cancelled_at,
            card.display_order,
        ],
    )?;
    Ok(changed > 0)
}

pub fn remove_card(conn: &Connection, id: i64) -> Result<bool> {
    let changed = conn.execute("DELETE FROM creditcard WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

// ---------------------------------------------------------------------------
// Benefits
// ---------------------------------------------------------------------------

const BENEFIT_COLUMNS: &str = "id, credit_card_id, name, description, frequency, type, value,
    expected_value, window_values, window_tracking_mode, expiration_date, is_used, used_at,
    exclude_from_benefits_page, exclude_from_notifications";

fn encode_window_values(values: Option<&Vec<f64>>) -> Result<Option<String>> {
    values
        .map(|v| serde_json::to_string(v).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e))))
        .transpose()
}

fn decode_window_values(row: &Row<'_>, idx: usize) -> Result<Option<Vec<f64>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|text| {
        serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn benefit_from_row(row: &Row<'_>) -> Result<Benefit> {
    Ok(Benefit {
        id: row.get(0)?,
        credit_card_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        frequency: row.get(4)?,
        benefit_type: row.get(5)?,
        value: row.get(6)?,
        expected_value: row.get(7)?,
        window_values: decode_window_values(row, 8)?,
        window_tracking_mode: row.get(9)?,
        expiration_date: row.get(10)?,
        is_used: row.get(11)?,
        used_at: row.get(12)?,
        exclude_from_benefits_page: row.get(13)?,
        exclude_from_notifications: row.get(14)?,
    })
}

pub fn add_benefit(conn: &Connection, card_id: i64, benefit: &BenefitInput) -> Result<i64> {
    conn.execute(
        "INSERT INTO benefit (credit_card_id, name, description, frequency, type, value,
                              expected_value, window_values, window_tracking_mode, expiration_date,
                              exclude_from_benefits_page, exclude_from_notifications)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            card_id,
            benefit.name,
            benefit.description,
            benefit.frequency,
            benefit.benefit_type,
            benefit.value,
            benefit.expected_value,
            encode_window_values(benefit.window_values.as_ref())?,
            benefit.window_tracking_mode,
            benefit.expiration_date,
            benefit.exclude_from_benefits_page,
            benefit.exclude_from_notifications,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_benefit(conn: &Connection, id: i64) -> Result<Option<Benefit>> {
    conn.query_row(
        &format!("SELECT {BENEFIT_COLUMNS} FROM benefit WHERE id = ?1"),
        params![id],
        benefit_from_row,
    )
    .optional()
}

pub fn list_benefits_for_card(conn: &Connection, card_id: i64) -> Result<Vec<Benefit>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BENEFIT_COLUMNS} FROM benefit WHERE credit_card_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![card_id], benefit_from_row)?;
    rows.collect()
}

/// Writes every mutable benefit column back.
pub fn save_benefit(conn: &Connection, benefit: &Benefit) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE benefit
         SET name = ?2, description = ?3, frequency = ?4, type = ?5, value = ?6,
             expected_value = ?7, window_values = ?8, window_tracking_mode = ?9,
             expiration_date = ?10, is_used = ?11, used_at = ?12,
             exclude_from_benefits_page = ?13, exclude_from_notifications = ?14
         WHERE id = ?1",
        params![
            benefit.id,
            benefit.name,
            benefit.description,
            benefit.frequency,
            benefit.benefit_type,
            benefit.value,
            benefit.expected_value,
            encode_window_values(benefit.window_values.as_ref())?,
            benefit.window_tracking_mode,
            benefit.expiration_date,
            benefit.is_used,
            benefit.used_at,
            benefit.exclude_from_benefits_page,
            benefit.exclude_from_notifications,
        ],
    )?;
    Ok(changed > 0)
}

pub fn set_benefit_usage(
    conn: &Connection,
    id: i64,
    is_used: bool,
    used_at: Option<DateTime<Utc>>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE benefit SET is_used = ?2, used_at = ?3 WHERE id = ?1",
        params![id, is_used, used_at],
    )?;
    Ok(changed > 0)
}

pub fn remove_benefit(conn: &Connection, id: i64) -> Result<bool> {
    let changed = conn.execute("DELETE FROM benefit WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

// ---------------------------------------------------------------------------
// Redemptions
// ---------------------------------------------------------------------------

const REDEMPTION_COLUMNS: &str = "id, benefit_id, label, amount, occurred_on, created_at";

fn redemption_from_row(row: &Row<'_>) -> Result<BenefitRedemption> {
    Ok(BenefitRedemption {
        id: row.get(0)?,
        benefit_id: row.get(1)?,
        label: row.get(2)?,
        amount: row.get(3)?,
        occurred_on: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn add_redemption(conn: &Connection, benefit_id: i64, redemption: &RedemptionInput) -> Result<i64> {
    conn.execute(
        "INSERT INTO benefit_redemption (benefit_id, label, amount, occurred_on, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            benefit_id,
            redemption.label,
            redemption.amount,
            redemption.occurred_on,
            Utc::now(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_redemption(conn: &Connection, id: i64) -> Result<Option<BenefitRedemption>> {
    conn.query_row(
        &format!("SELECT {REDEMPTION_COLUMNS} FROM benefit_redemption WHERE id = ?1"),
        params![id],
        redemption_from_row,
    )
    .optional()
}

/// Newest first.
pub fn list_redemptions(conn: &Connection, benefit_id: i64) -> Result<Vec<BenefitRedemption>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REDEMPTION_COLUMNS} FROM benefit_redemption
         WHERE benefit_id = ?1
         ORDER BY occurred_on DESC, id DESC"
    ))?;
    let rows = stmt.query_map(params![benefit_id], redemption_from_row)?;
    rows.collect()
}

pub fn save_redemption(conn: &Connection, redemption: &BenefitRedemption) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE benefit_redemption SET label = ?2, amount = ?3, occurred_on = ?4 WHERE id = ?1",
        params![redemption.id, redemption.label, redemption.amount, redemption.occurred_on],
    )?;
    Ok(changed > 0)
}

pub fn remove_redemption(conn: &Connection, id: i64) -> Result<bool> {
    let changed = conn.execute("DELETE FROM benefit_redemption WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

/// Grouped sum/count per benefit over `[start, end)`. Benefits without rows report zero.
pub fn redemption_summary_for_benefits(
    conn: &Connection,
    benefit_ids: &[i64],
    range: DateRange,
) -> Result<HashMap<i64, RedemptionTotals>> {
    if benefit_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders = vec!["?"; benefit_ids.len()].join(", ");
    let mut sql = format!(
        "SELECT benefit_id, COALESCE(SUM(amount), 0), COUNT(id)
         FROM benefit_redemption
         WHERE benefit_id IN ({placeholders})"
    );
    let mut values: Vec<Box<dyn ToSql>> = benefit_ids.iter().map(|id| Box::new(*id) as Box<dyn ToSql>).collect();
    if let Some(start) = range.start {
        sql.push_str(" AND occurred_on >= ?");
        values.push(Box::new(start));
    }
    if let Some(end) = range.end {
        sql.push_str(" AND occurred_on < ?");
        values.push(Box::new(end));
    }
    sql.push_str(" GROUP BY benefit_id");

    let mut summary = empty_summary(benefit_ids);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
        Ok((
            row.get::<_, i64>(0)?,
            RedemptionTotals {
                amount: row.get(1)?,
                count: row.get(2)?,
            },
        ))
    })?;
    for row in rows {
        let (benefit_id, totals) = row?;
        summary.insert(benefit_id, totals);
    }
    Ok(summary)
}

impl RedemptionLedger for Connection {
    fn redemption_summary(
        &self,
        benefit_ids: &[i64],
        range: DateRange,
    ) -> crate::error::Result<HashMap<i64, RedemptionTotals>> {
        Ok(redemption_summary_for_benefits(self, benefit_ids, range)?)
    }
}

// ---------------------------------------------------------------------------
// Window exclusions
// ---------------------------------------------------------------------------

const EXCLUSION_COLUMNS: &str = "id, benefit_id, window_start, window_end, window_label, window_index, created_at";

fn decode_window_index(row: &Row<'_>, idx: usize) -> Result<Option<usize>> {
    let raw: Option<i64> = row.get(idx)?;
    raw.map(|i| {
        usize::try_from(i).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
    })
    .transpose()
}

fn exclusion_from_row(row: &Row<'_>) -> Result<BenefitWindowExclusion> {
    Ok(BenefitWindowExclusion {
        id: row.get(0)?,
        benefit_id: row.get(1)?,
        window_start: row.get(2)?,
        window_end: row.get(3)?,
        window_label: row.get(4)?,
        window_index: decode_window_index(row, 5)?,
        created_at: row.get(6)?,
    })
}

pub fn add_exclusion(conn: &Connection, benefit_id: i64, exclusion: &ExclusionInput) -> Result<i64> {
    conn.execute(
        "INSERT INTO benefit_window_exclusion
             (benefit_id, window_start, window_end, window_label, window_index, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            benefit_id,
            exclusion.window_start,
            exclusion.window_end,
            exclusion.window_label,
            exclusion.window_index.map(|i| i as i64),
            Utc::now(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_exclusion(conn: &Connection, id: i64) -> Result<Option<BenefitWindowExclusion>> {
    conn.query_row(
        &format!("SELECT {EXCLUSION_COLUMNS} FROM benefit_window_exclusion WHERE id = ?1"),
        params![id],
        exclusion_from_row,
    )
    .optional()
}

pub fn list_exclusions(conn: &Connection, benefit_id: i64) -> Result<Vec<BenefitWindowExclusion>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EXCLUSION_COLUMNS} FROM benefit_window_exclusion
         WHERE benefit_id = ?1
         ORDER BY window_start, id"
    ))?;
    let rows = stmt.query_map(params![benefit_id], exclusion_from_row)?;
    rows.collect()
}

pub fn remove_exclusion(conn: &Connection, id: i64) -> Result<bool> {
    let changed = conn.execute("DELETE FROM benefit_window_exclusion WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}
