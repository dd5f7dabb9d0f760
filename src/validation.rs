//! Input validation, applied before any row is written.

use crate::error::{Error, Result};
use crate::models::{BenefitInput, BenefitType, Frequency, NewCard};

/// Validates per-window values for `frequency`.
///
/// An absent or empty list means "no overrides". Otherwise the list must have exactly the
/// frequency's window count and hold finite, non-negative numbers.
pub fn normalise_window_values(frequency: Frequency, values: Option<Vec<f64>>) -> Result<Option<Vec<f64>>> {
    let Some(values) = values.filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let Some(expected) = frequency.window_value_count() else {
        return Err(Error::validation(
            "Custom window values are only supported for monthly, quarterly, or semiannual benefits.",
        ));
    };
    if values.len() != expected {
        return Err(Error::validation(format!(
            "Expected {} values for a {} benefit, received {}.",
            expected,
            frequency,
            values.len()
        )));
    }
    for (position, value) in values.iter().enumerate() {
        if !value.is_finite() {
            return Err(Error::validation(format!(
                "Window value #{} for {} benefits must be numeric.",
                position + 1,
                frequency
            )));
        }
        if *value < 0.0 {
            return Err(Error::validation("Window values must be zero or greater."));
        }
    }
    Ok(Some(values))
}

/// Checks the value fields against the benefit type.
pub fn validate_benefit_values(
    benefit_type: BenefitType,
    value: Option<f64>,
    expected_value: Option<f64>,
) -> Result<()> {
    if let Some(v) = value.filter(|v| !v.is_finite() || *v < 0.0) {
        return Err(Error::validation(format!("Benefit value must be zero or greater, got {v}.")));
    }
    if let Some(v) = expected_value.filter(|v| !v.is_finite() || *v < 0.0) {
        return Err(Error::validation(format!("Expected value must be zero or greater, got {v}.")));
    }
    match benefit_type {
        BenefitType::Cumulative => {
            if value.is_some_and(|v| v != 0.0) {
                return Err(Error::validation("Cumulative benefits should not define an initial value."));
            }
        }
        BenefitType::Standard | BenefitType::Incremental => {
            if value.is_none_or(|v| v <= 0.0) {
                return Err(Error::validation(
                    "A positive value is required for standard and incremental benefits.",
                ));
            }
            if expected_value.is_some_and(|v| v != 0.0) {
                return Err(Error::validation("Expected value is only supported for cumulative benefits."));
            }
        }
    }
    Ok(())
}

/// Validates a new benefit and returns it in canonical form: cumulative benefits drop `value`,
/// others drop `expected_value`, and window values are normalised.
pub fn validate_benefit_input(mut input: BenefitInput) -> Result<BenefitInput> {
    if input.name.trim().is_empty() {
        return Err(Error::validation("Benefit name is required."));
    }
    validate_benefit_values(input.benefit_type, input.value, input.expected_value)?;
    match input.benefit_type {
        BenefitType::Cumulative => {
            input.value = None;
            if input.window_values.as_ref().is_some_and(|v| !v.is_empty()) {
                return Err(Error::validation("Cumulative benefits do not support window values."));
            }
            input.window_values = None;
        }
        BenefitType::Standard | BenefitType::Incremental => {
            input.expected_value = None;
            input.window_values = normalise_window_values(input.frequency, input.window_values)?;
        }
    }
    Ok(input)
}

pub fn validate_last_four(last_four: &str) -> Result<()> {
    let digits = last_four.len();
    if !(4..=5).contains(&digits) || !last_four.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::validation("Last four must be 4 or 5 digits."));
    }
    Ok(())
}

pub fn validate_annual_fee(annual_fee: f64) -> Result<()> {
    if !annual_fee.is_finite() || annual_fee < 0.0 {
        return Err(Error::validation("Annual fee must be zero or greater."));
    }
    Ok(())
}

pub fn validate_new_card(card: &NewCard) -> Result<()> {
    if card.card_name.trim().is_empty() {
        return Err(Error::validation("Card name is required."));
    }
    validate_last_four(&card.last_four)?;
    validate_annual_fee(card.annual_fee)
}

pub fn validate_redemption_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(Error::validation("Redemption amount must be greater than zero."));
    }
    Ok(())
}
