//! Preconfigured card templates stored as `<slug>.json` files.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Entity, Error, Result};
use crate::models::{Benefit, BenefitInput, CreditCard, NewCard, YearTrackingMode};
use crate::tracker;
use crate::validation::{validate_annual_fee, validate_benefit_input};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardTemplate {
    #[serde(default)]
    pub slug: String,
    pub card_type: String,
    pub company_name: String,
    #[serde(default)]
    pub annual_fee: f64,
    #[serde(default)]
    pub benefits: Vec<BenefitInput>,
}

/// Account details a template does not carry.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateCardDetails {
    pub card_name: Option<String>,
    pub last_four: String,
    pub account_name: String,
    pub fee_due_date: NaiveDate,
    pub year_tracking_mode: YearTrackingMode,
}

impl From<&Benefit> for BenefitInput {
    fn from(benefit: &Benefit) -> Self {
        BenefitInput {
            name: benefit.name.clone(),
            description: benefit.description.clone(),
            frequency: benefit.frequency,
            benefit_type: benefit.benefit_type,
            value: benefit.value,
            expected_value: benefit.expected_value,
            window_values: benefit.window_values.clone(),
            window_tracking_mode: benefit.window_tracking_mode,
            expiration_date: benefit.expiration_date,
            exclude_from_benefits_page: benefit.exclude_from_benefits_page,
            exclude_from_notifications: benefit.exclude_from_notifications,
        }
    }
}

/// Lowercases and collapses every run of other characters into a single `-`.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() { "card".to_string() } else { slug.to_string() }
}

/// Template directory with a read-through cache of the parsed files.
///
/// The cache is filled on the first [`TemplateStore::list`] and dropped by every write through
/// the store. Call [`TemplateStore::invalidate`] after editing files behind its back.
#[derive(Debug)]
pub struct TemplateStore {
    dir: PathBuf,
    cache: Option<Vec<CardTemplate>>,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, slug: &str) -> PathBuf {
        self.dir.join(format!("{slug}.json"))
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    pub fn list(&mut self) -> Result<&[CardTemplate]> {
        let templates = match self.cache.take() {
            Some(cached) => cached,
            None => self.load_all()?,
        };
        Ok(self.cache.insert(templates).as_slice())
    }

    fn load_all(&self) -> Result<Vec<CardTemplate>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut templates = Vec::with_capacity(paths.len());
        for path in paths {
            match read_template(&path) {
                Ok(template) => templates.push(template),
                Err(err) => warn!(path = %path.display(), error = %err, "Skipping unreadable card template"),
            }
        }
        debug!(dir = %self.dir.display(), count = templates.len(), "Loaded card templates");
        Ok(templates)
    }

    pub fn get(&self, slug: &str) -> Result<CardTemplate> {
        let path = self.path_for(slug);
        if slugify(slug) != slug || !path.exists() {
            return Err(Error::not_found(Entity::Template, slug));
        }
        read_template(&path)
    }

    /// Writes a new template under a unique slug derived from `slug` or `card_type`.
    pub fn save(&mut self, template: CardTemplate) -> Result<CardTemplate> {
        let mut template = validate_template(template)?;
        let base = if template.slug.trim().is_empty() { &template.card_type } else { &template.slug };
        let base = slugify(base);
        let mut slug = base.clone();
        let mut counter = 2;
        while self.path_for(&slug).exists() {
            slug = format!("{base}-{counter}");
            counter += 1;
        }
        template.slug = slug;

        self.write(&template)?;
        info!(slug = %template.slug, "Card template saved");
        Ok(template)
    }

    /// Replaces the template stored under `slug`.
    ///
    /// A non-empty `template.slug` renames it; renaming onto an existing template is rejected.
    pub fn update(&mut self, slug: &str, template: CardTemplate) -> Result<CardTemplate> {
        let original = self.path_for(slug);
        if slugify(slug) != slug || !original.exists() {
            return Err(Error::not_found(Entity::Template, slug));
        }
        let mut template = validate_template(template)?;
        let new_slug = if template.slug.trim().is_empty() { slug.to_string() } else { slugify(&template.slug) };
        if new_slug != slug && self.path_for(&new_slug).exists() {
            return Err(Error::validation(format!("A card template named '{new_slug}' already exists.")));
        }
        template.slug = new_slug;

        self.write(&template)?;
        if template.slug != slug {
            fs::remove_file(original)?;
        }
        info!(from = slug, slug = %template.slug, "Card template updated");
        Ok(template)
    }

    fn write(&mut self, template: &CardTemplate) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut body = serde_json::to_string_pretty(template)?;
        body.push('\n');
        fs::write(self.path_for(&template.slug), body)?;
        self.invalidate();
        Ok(())
    }

    pub fn remove(&mut self, slug: &str) -> Result<()> {
        let path = self.path_for(slug);
        if slugify(slug) != slug || !path.exists() {
            return Err(Error::not_found(Entity::Template, slug));
        }
        fs::remove_file(path)?;
        self.invalidate();
        info!(slug, "Card template removed");
        Ok(())
    }
}

/// Checks the card fields and returns the template with its benefits in canonical form.
fn validate_template(mut template: CardTemplate) -> Result<CardTemplate> {
    if template.card_type.trim().is_empty() {
        return Err(Error::validation("Card type is required."));
    }
    validate_annual_fee(template.annual_fee)?;
    template.benefits = template
        .benefits
        .into_iter()
        .map(validate_benefit_input)
        .collect::<Result<_>>()?;
    Ok(template)
}

fn read_template(path: &Path) -> Result<CardTemplate> {
    let raw = fs::read_to_string(path)?;
    let mut template: CardTemplate = serde_json::from_str(&raw)?;
    if template.slug.is_empty() {
        if let Some(stem) = path.file_stem() {
            template.slug = stem.to_string_lossy().into_owned();
        }
    }
    Ok(template)
}

/// Creates a card and all template benefits in one transaction.
pub fn apply_template(
    conn: &Connection,
    template: &CardTemplate,
    details: TemplateCardDetails,
    today: NaiveDate,
) -> Result<(CreditCard, Vec<Benefit>)> {
    let tx = conn.unchecked_transaction()?;
    let card = tracker::create_card(
        &tx,
        &NewCard {
            card_name: details.card_name.unwrap_or_else(|| template.card_type.clone()),
            company_name: template.company_name.clone(),
            last_four: details.last_four,
            account_name: details.account_name,
            annual_fee: template.annual_fee,
            fee_due_date: details.fee_due_date,
            year_tracking_mode: details.year_tracking_mode,
            display_order: None,
        },
    )?;
    let benefits = template
        .benefits
        .iter()
        .map(|input| tracker::create_benefit(&tx, card.id, input.clone(), today))
        .collect::<Result<Vec<_>>>()?;
    tx.commit()?;
    info!(slug = %template.slug, card_id = card.id, benefits = benefits.len(), "Template applied");
    Ok((card, benefits))
}

/// Snapshots a stored card and its benefits as an unsaved template.
pub fn template_from_card(conn: &Connection, card_id: i64) -> Result<CardTemplate> {
    let card = tracker::require_card(conn, card_id)?;
    let benefits = crate::db::list_benefits_for_card(conn, card_id)?;
    Ok(CardTemplate {
        slug: slugify(&card.card_name),
        card_type: card.card_name,
        company_name: card.company_name,
        annual_fee: card.annual_fee,
        benefits: benefits.iter().map(BenefitInput::from).collect(),
    })
}
