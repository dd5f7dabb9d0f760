use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// How often a benefit's value target resets within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Monthly,
    Quarterly,
    Semiannual,
    Yearly,
}

impl Frequency {
    pub const ALL: [Frequency; 4] = [
        Frequency::Monthly,
        Frequency::Quarterly,
        Frequency::Semiannual,
        Frequency::Yearly,
    ];

    /// Length of one window in calendar months.
    pub fn window_months(self) -> u32 {
        match self {
            Frequency::Monthly => 1,
            Frequency::Quarterly => 3,
            Frequency::Semiannual => 6,
            Frequency::Yearly => 12,
        }
    }

    /// Number of windows in a full 12-month cycle.
    pub fn windows_per_cycle(self) -> usize {
        match self {
            Frequency::Monthly => 12,
            Frequency::Quarterly => 4,
            Frequency::Semiannual => 2,
            Frequency::Yearly => 1,
        }
    }

    /// Expected `window_values` length, or `None` when per-window values are not allowed.
    pub fn window_value_count(self) -> Option<usize> {
        match self {
            Frequency::Yearly => None,
            other => Some(other.windows_per_cycle()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Semiannual => "semiannual",
            Frequency::Yearly => "yearly",
        }
    }
}

/// Tracking behaviour of a benefit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BenefitType {
    /// Used or not used per window.
    Standard,
    /// Consumed in partial amounts until the window target is reached.
    Incremental,
    /// Value accumulates across the cycle without a per-window target.
    Cumulative,
}

impl BenefitType {
    pub fn as_str(self) -> &'static str {
        match self {
            BenefitType::Standard => "standard",
            BenefitType::Incremental => "incremental",
            BenefitType::Cumulative => "cumulative",
        }
    }
}

/// How a card's annual cycle is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum YearTrackingMode {
    Calendar,
    Anniversary,
}

impl YearTrackingMode {
    /// Picks a benefit-level override over the card default.
    pub fn resolve(override_mode: Option<YearTrackingMode>, card_mode: YearTrackingMode) -> Self {
        override_mode.unwrap_or(card_mode)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            YearTrackingMode::Calendar => "calendar",
            YearTrackingMode::Anniversary => "anniversary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! impl_str_conversions {
    ($ty:ty, [$($variant:expr),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s))
                    .ok_or_else(|| UnknownVariant(s.to_string()))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_str_conversions!(
    Frequency,
    [Frequency::Monthly, Frequency::Quarterly, Frequency::Semiannual, Frequency::Yearly]
);
impl_str_conversions!(
    BenefitType,
    [BenefitType::Standard, BenefitType::Incremental, BenefitType::Cumulative]
);
impl_str_conversions!(
    YearTrackingMode,
    [YearTrackingMode::Calendar, YearTrackingMode::Anniversary]
);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditCard {
    pub id: i64,
    pub card_name: String,
    pub company_name: String,
    /// Last four or five digits of the card number
    pub last_four: String,
    pub account_name: String,
    pub annual_fee: f64,
    /// Month/day anchor for anniversary cycles
    pub fee_due_date: NaiveDate,
    pub year_tracking_mode: YearTrackingMode,
    pub is_cancelled: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub display_order: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCard {
    pub card_name: String,
    pub company_name: String,
    pub last_four: String,
    pub account_name: String,
    pub annual_fee: f64,
    pub fee_due_date: NaiveDate,
    pub year_tracking_mode: YearTrackingMode,
    pub display_order: Option<i64>,
}

/// Partial card update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardUpdate {
    pub card_name: Option<String>,
    pub company_name: Option<String>,
    pub last_four: Option<String>,
    pub account_name: Option<String>,
    pub annual_fee: Option<f64>,
    pub fee_due_date: Option<NaiveDate>,
    pub year_tracking_mode: Option<YearTrackingMode>,
    pub display_order: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Benefit {
    pub id: i64,
    pub credit_card_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub frequency: Frequency,
    pub benefit_type: BenefitType,
    /// Per-window target; never set for cumulative benefits
    pub value: Option<f64>,
    /// Annual target; only set for cumulative benefits
    pub expected_value: Option<f64>,
    /// Per-window overrides indexed by original window position
    pub window_values: Option<Vec<f64>>,
    pub window_tracking_mode: Option<YearTrackingMode>,
    pub expiration_date: Option<NaiveDate>,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub exclude_from_benefits_page: bool,
    pub exclude_from_notifications: bool,
}

impl Benefit {
    /// Target for the window at 1-based `index`, falling back to the flat value.
    pub fn window_target(&self, index: usize) -> Option<f64> {
        if self.benefit_type == BenefitType::Cumulative {
            return None;
        }
        index
            .checked_sub(1)
            .and_then(|i| self.window_values.as_ref().and_then(|values| values.get(i)))
            .copied()
            .or(self.value)
    }

    pub fn tracking_mode(&self, card: &CreditCard) -> YearTrackingMode {
        YearTrackingMode::resolve(self.window_tracking_mode, card.year_tracking_mode)
    }
}

/// Fields supplied when creating a benefit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenefitInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub frequency: Frequency,
    #[serde(rename = "type", default = "default_benefit_type")]
    pub benefit_type: BenefitType,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub expected_value: Option<f64>,
    #[serde(default)]
    pub window_values: Option<Vec<f64>>,
    #[serde(default)]
    pub window_tracking_mode: Option<YearTrackingMode>,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    #[serde(default)]
    pub exclude_from_benefits_page: bool,
    #[serde(default)]
    pub exclude_from_notifications: bool,
}

fn default_benefit_type() -> BenefitType {
    BenefitType::Standard
}

impl BenefitInput {
    pub fn new(name: impl Into<String>, frequency: Frequency, benefit_type: BenefitType) -> Self {
        Self {
            name: name.into(),
            description: None,
            frequency,
            benefit_type,
            value: None,
            expected_value: None,
            window_values: None,
            window_tracking_mode: None,
            expiration_date: None,
            exclude_from_benefits_page: false,
            exclude_from_notifications: false,
        }
    }
}

/// Partial benefit update. Nested options distinguish "clear" from "leave as is".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BenefitUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub frequency: Option<Frequency>,
    pub benefit_type: Option<BenefitType>,
    pub value: Option<f64>,
    pub expected_value: Option<Option<f64>>,
    pub window_values: Option<Option<Vec<f64>>>,
    pub window_tracking_mode: Option<Option<YearTrackingMode>>,
    pub expiration_date: Option<Option<NaiveDate>>,
    pub is_used: Option<bool>,
    pub exclude_from_benefits_page: Option<bool>,
    pub exclude_from_notifications: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenefitRedemption {
    pub id: i64,
    pub benefit_id: i64,
    pub label: String,
    pub amount: f64,
    pub occurred_on: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionInput {
    pub label: String,
    pub amount: f64,
    pub occurred_on: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedemptionUpdate {
    pub label: Option<String>,
    pub amount: Option<f64>,
    pub occurred_on: Option<NaiveDate>,
}

/// A window administratively removed from a benefit's calculations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenefitWindowExclusion {
    pub id: i64,
    pub benefit_id: i64,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub window_label: Option<String>,
    pub window_index: Option<usize>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusionInput {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub window_label: Option<String>,
    pub window_index: Option<usize>,
}
