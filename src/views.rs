//! Table rows for CLI output.

use tabled::Tabled;

use crate::models::{BenefitRedemption, BenefitWindowExclusion};
use crate::templates::CardTemplate;
use crate::valuation::{BenefitMetrics, CardSummary};

fn money(value: f64) -> String {
    format!("{value:.2}")
}

fn optional_money(value: Option<f64>) -> String {
    value.map(money).unwrap_or_else(|| "-".to_string())
}

#[derive(Debug, Clone, Tabled)]
pub struct CardRow {
    pub id: i64,
    pub card: String,
    pub issuer: String,
    #[tabled(rename = "last four")]
    pub last_four: String,
    pub mode: String,
    #[tabled(rename = "annual fee")]
    pub annual_fee: String,
    pub potential: String,
    pub utilized: String,
    pub net: String,
    pub status: String,
}

impl From<&CardSummary> for CardRow {
    fn from(summary: &CardSummary) -> Self {
        let card = &summary.card;
        Self {
            id: card.id,
            card: card.card_name.clone(),
            issuer: card.company_name.clone(),
            last_four: card.last_four.clone(),
            mode: card.year_tracking_mode.to_string(),
            annual_fee: money(card.annual_fee),
            potential: money(summary.potential_value),
            utilized: money(summary.utilized_value),
            net: money(summary.net_position),
            status: if card.is_cancelled { "cancelled" } else { "active" }.to_string(),
        }
    }
}

#[derive(Debug, Clone, Tabled)]
pub struct BenefitRow {
    pub id: i64,
    pub name: String,
    #[tabled(rename = "type")]
    pub benefit_type: String,
    pub frequency: String,
    pub cycle: String,
    pub window: String,
    #[tabled(rename = "window spent")]
    pub window_total: String,
    pub remaining: String,
    #[tabled(rename = "cycle target")]
    pub cycle_target: String,
    pub missed: String,
    pub used: String,
    pub potential: String,
    pub utilized: String,
    pub expires: String,
}

impl From<&BenefitMetrics> for BenefitRow {
    fn from(metrics: &BenefitMetrics) -> Self {
        let benefit = &metrics.benefit;
        Self {
            id: benefit.id,
            name: benefit.name.clone(),
            benefit_type: benefit.benefit_type.to_string(),
            frequency: benefit.frequency.to_string(),
            cycle: metrics.cycle_label.clone(),
            window: metrics.current_window_label.clone().unwrap_or_else(|| "-".to_string()),
            window_total: optional_money(metrics.current_window_total),
            remaining: optional_money(metrics.remaining_value),
            cycle_target: optional_money(metrics.cycle_target_value),
            missed: optional_money(metrics.missed_window_value),
            used: if metrics.is_used { "yes" } else { "no" }.to_string(),
            potential: money(metrics.potential_value),
            utilized: money(metrics.utilized_value),
            expires: metrics
                .expiration_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Debug, Clone, Tabled)]
pub struct RedemptionRow {
    pub id: i64,
    pub date: String,
    pub label: String,
    pub amount: String,
}

impl From<&BenefitRedemption> for RedemptionRow {
    fn from(redemption: &BenefitRedemption) -> Self {
        Self {
            id: redemption.id,
            date: redemption.occurred_on.to_string(),
            label: redemption.label.clone(),
            amount: money(redemption.amount),
        }
    }
}

#[derive(Debug, Clone, Tabled)]
pub struct ExclusionRow {
    pub id: i64,
    pub start: String,
    pub end: String,
    pub label: String,
    pub index: String,
}

impl From<&BenefitWindowExclusion> for ExclusionRow {
    fn from(exclusion: &BenefitWindowExclusion) -> Self {
        Self {
            id: exclusion.id,
            start: exclusion.window_start.to_string(),
            end: exclusion.window_end.to_string(),
            label: exclusion.window_label.clone().unwrap_or_default(),
            index: exclusion.window_index.map(|i| i.to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Tabled)]
pub struct TemplateRow {
    pub slug: String,
    pub card: String,
    pub issuer: String,
    #[tabled(rename = "annual fee")]
    pub annual_fee: String,
    pub benefits: usize,
}

impl From<&CardTemplate> for TemplateRow {
    fn from(template: &CardTemplate) -> Self {
        Self {
            slug: template.slug.clone(),
            card: template.card_type.clone(),
            issuer: template.company_name.clone(),
            annual_fee: money(template.annual_fee),
            benefits: template.benefits.len(),
        }
    }
}
