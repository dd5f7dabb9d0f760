use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{Local, NaiveDate};
use clap::{ArgAction, Args, Parser, Subcommand};
use rusqlite::Connection;
use tabled::Table;
use tracing::error;
use tracing_subscriber::EnvFilter;

use creditwatch::config::{AppConfig, DATA_DIR_ENV, DB_FILE_ENV, DEFAULT_DATA_DIR, DEFAULT_DB_FILE};
use creditwatch::models::{
    BenefitInput, BenefitType, BenefitUpdate, CardUpdate, ExclusionInput, Frequency, NewCard,
    RedemptionInput, RedemptionUpdate, YearTrackingMode,
};
use creditwatch::templates::{CardTemplate, TemplateCardDetails, apply_template, template_from_card};
use creditwatch::views::{BenefitRow, CardRow, ExclusionRow, RedemptionRow, TemplateRow};
use creditwatch::{Result, db, tracker};

/// CreditWatch: track credit card benefits, redemptions and annual fee value
#[derive(Parser)]
#[command(name = "creditwatch", version, about)]
struct Cli {
    /// Directory holding the database and card templates
    #[arg(long, global = true, env = DATA_DIR_ENV, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,
    /// Database file, relative to the data directory unless absolute
    #[arg(long, global = true, env = DB_FILE_ENV, default_value = DEFAULT_DB_FILE)]
    db_file: PathBuf,
    /// Evaluate as of this date instead of today (YYYY-MM-DD)
    #[arg(long, global = true)]
    today: Option<NaiveDate>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage credit cards
    #[command(subcommand)]
    Card(CardCommand),
    /// Manage benefits on a card
    #[command(subcommand)]
    Benefit(BenefitCommand),
    /// Record spending against benefits
    #[command(subcommand)]
    Redemption(RedemptionCommand),
    /// Exclude or restore benefit windows
    #[command(subcommand)]
    Window(WindowCommand),
    /// Manage preconfigured card templates
    #[command(subcommand)]
    Template(TemplateCommand),
}

#[derive(Subcommand)]
enum CardCommand {
    /// Add a new credit card
    Add {
        /// Card name (e.g. "Sapphire Reserve")
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        company: String,
        /// Last 4 or 5 digits of the card number
        #[arg(long)]
        last_four: String,
        #[arg(long)]
        account: String,
        #[arg(long, default_value_t = 0.0)]
        annual_fee: f64,
        /// Annual fee due date; anchors anniversary cycles
        #[arg(long)]
        fee_due_date: NaiveDate,
        #[arg(long, value_enum, default_value_t = YearTrackingMode::Calendar)]
        mode: YearTrackingMode,
        #[arg(long)]
        display_order: Option<i64>,
    },
    /// List cards with their value summary
    List,
    /// Show a card's benefits
    Show {
        #[arg(long)]
        id: i64,
        /// Include benefits hidden from the benefits page
        #[arg(long)]
        all: bool,
    },
    /// Update card fields
    Update {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        last_four: Option<String>,
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        annual_fee: Option<f64>,
        #[arg(long)]
        fee_due_date: Option<NaiveDate>,
        #[arg(long, value_enum)]
        mode: Option<YearTrackingMode>,
        #[arg(long)]
        display_order: Option<i64>,
    },
    /// Mark a card cancelled
    Cancel {
        #[arg(long)]
        id: i64,
        /// Reinstate a cancelled card instead
        #[arg(long)]
        reinstate: bool,
    },
    /// Remove a card and everything attached to it
    Remove {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Args)]
struct BenefitFields {
    #[arg(long)]
    description: Option<String>,
    /// Per-window value, or the benefit's value when no window values are given
    #[arg(long)]
    value: Option<f64>,
    /// Annual target for cumulative benefits
    #[arg(long)]
    expected_value: Option<f64>,
    /// Comma-separated per-window values (12 monthly, 4 quarterly, 2 semiannual)
    #[arg(long, value_delimiter = ',')]
    window_values: Option<Vec<f64>>,
    /// Override the card's year tracking mode for this benefit
    #[arg(long, value_enum)]
    window_mode: Option<YearTrackingMode>,
    #[arg(long)]
    expires: Option<NaiveDate>,
}

#[derive(Subcommand)]
enum BenefitCommand {
    /// Add a benefit to a card
    Add {
        #[arg(long)]
        card_id: i64,
        #[arg(long)]
        name: String,
        #[arg(long, value_enum)]
        frequency: Frequency,
        #[arg(long = "type", value_enum, default_value_t = BenefitType::Standard)]
        benefit_type: BenefitType,
        #[command(flatten)]
        fields: BenefitFields,
        /// Hide from the benefits page
        #[arg(long)]
        hide: bool,
        /// Skip expiry notifications
        #[arg(long)]
        mute: bool,
    },
    /// Update a benefit
    Update {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_enum)]
        frequency: Option<Frequency>,
        #[arg(long = "type", value_enum)]
        benefit_type: Option<BenefitType>,
        #[command(flatten)]
        fields: BenefitFields,
        #[arg(long)]
        clear_description: bool,
        #[arg(long)]
        clear_expected_value: bool,
        #[arg(long)]
        clear_window_values: bool,
        #[arg(long)]
        clear_window_mode: bool,
        #[arg(long)]
        clear_expiration: bool,
        #[arg(long, action = ArgAction::Set)]
        used: Option<bool>,
        #[arg(long, action = ArgAction::Set)]
        hide: Option<bool>,
        #[arg(long, action = ArgAction::Set)]
        mute: Option<bool>,
    },
    /// Remove a benefit
    Remove {
        #[arg(long)]
        id: i64,
    },
    /// Mark a benefit used or unused by hand
    SetUsage {
        #[arg(long)]
        id: i64,
        #[arg(long, action = ArgAction::Set)]
        used: bool,
    },
}

#[derive(Subcommand)]
enum RedemptionCommand {
    /// Record a redemption
    Add {
        #[arg(long)]
        benefit_id: i64,
        #[arg(long)]
        amount: f64,
        /// Date the redemption happened (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value = "")]
        label: String,
    },
    /// List redemptions for a benefit, newest first
    List {
        #[arg(long)]
        benefit_id: i64,
    },
    /// Update a redemption
    Update {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        amount: Option<f64>,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        label: Option<String>,
    },
    /// Remove a redemption
    Remove {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Subcommand)]
enum WindowCommand {
    /// Exclude a window from a benefit's calculations
    Exclude {
        #[arg(long)]
        benefit_id: i64,
        /// Window start (inclusive)
        #[arg(long)]
        start: NaiveDate,
        /// Window end (exclusive)
        #[arg(long)]
        end: NaiveDate,
        #[arg(long)]
        label: Option<String>,
        /// 1-based window position in the cycle
        #[arg(long)]
        index: Option<usize>,
    },
    /// Restore an excluded window
    Include {
        #[arg(long)]
        id: i64,
    },
    /// List excluded windows for a benefit
    List {
        #[arg(long)]
        benefit_id: i64,
    },
}

#[derive(Subcommand)]
enum TemplateCommand {
    /// List available card templates
    List,
    /// Create a card from a template
    Apply {
        #[arg(long)]
        slug: String,
        /// Card name; defaults to the template's card type
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        last_four: String,
        #[arg(long)]
        account: String,
        #[arg(long)]
        fee_due_date: NaiveDate,
        #[arg(long, value_enum, default_value_t = YearTrackingMode::Calendar)]
        mode: YearTrackingMode,
    },
    /// Save an existing card as a template
    Save {
        #[arg(long)]
        card_id: i64,
        #[arg(long)]
        slug: Option<String>,
    },
    /// Replace a template with a card's current benefits, optionally renaming it
    Update {
        #[arg(long)]
        slug: String,
        /// Card to snapshot; keeps the stored template's contents when omitted
        #[arg(long)]
        card_id: Option<i64>,
        #[arg(long)]
        rename: Option<String>,
    },
    /// Remove a template
    Remove {
        #[arg(long)]
        slug: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::resolve(&cli.data_dir, &cli.db_file)?;
    let today = cli.today.unwrap_or_else(|| Local::now().date_naive());
    let conn = config.open_db()?;

    match cli.command {
        Commands::Card(command) => run_card(&conn, command, today),
        Commands::Benefit(command) => run_benefit(&conn, command, today),
        Commands::Redemption(command) => run_redemption(&conn, command, today),
        Commands::Window(command) => run_window(&conn, command, today),
        Commands::Template(command) => run_template(&conn, &config, command, today),
    }
}

fn run_card(conn: &Connection, command: CardCommand, today: NaiveDate) -> Result<()> {
    match command {
        CardCommand::Add {
            name,
            company,
            last_four,
            account,
            annual_fee,
            fee_due_date,
            mode,
            display_order,
        } => {
            let card = tracker::create_card(
                conn,
                &NewCard {
                    card_name: name,
                    company_name: company,
                    last_four,
                    account_name: account,
                    annual_fee,
                    fee_due_date,
                    year_tracking_mode: mode,
                    display_order,
                },
            )?;
            println!("Added card '{}' with ID {}", card.card_name, card.id);
        }
        CardCommand::List => {
            let summaries = tracker::card_summaries(conn, today)?;
            if summaries.is_empty() {
                println!("No cards found. Add one with: creditwatch card add --name \"...\" --last-four 1234 ...");
            } else {
                let rows: Vec<CardRow> = summaries.iter().map(CardRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }
        CardCommand::Show { id, all } => {
            let summary = tracker::card_summary(conn, id, today)?;
            println!("{}", Table::new([CardRow::from(&summary)]));
            let rows: Vec<BenefitRow> = summary
                .benefits
                .iter()
                .filter(|m| all || !m.benefit.exclude_from_benefits_page)
                .map(BenefitRow::from)
                .collect();
            if rows.is_empty() {
                println!("No benefits on this card.");
            } else {
                println!("{}", Table::new(rows));
            }
        }
        CardCommand::Update {
            id,
            name,
            company,
            last_four,
            account,
            annual_fee,
            fee_due_date,
            mode,
            display_order,
        } => {
            let update = CardUpdate {
                card_name: name,
                company_name: company,
                last_four,
                account_name: account,
                annual_fee,
                fee_due_date,
                year_tracking_mode: mode,
                display_order,
            };
            let card = tracker::update_card(conn, id, update)?;
            println!("Updated card '{}'", card.card_name);
        }
        CardCommand::Cancel { id, reinstate } => {
            let card = tracker::set_card_cancelled(conn, id, !reinstate)?;
            let state = if card.is_cancelled { "cancelled" } else { "active" };
            println!("Card '{}' is now {state}", card.card_name);
        }
        CardCommand::Remove { id } => {
            tracker::delete_card(conn, id)?;
            println!("Removed card with ID {id}");
        }
    }
    Ok(())
}

fn run_benefit(conn: &Connection, command: BenefitCommand, today: NaiveDate) -> Result<()> {
    match command {
        BenefitCommand::Add {
            card_id,
            name,
            frequency,
            benefit_type,
            fields,
            hide,
            mute,
        } => {
            let input = BenefitInput {
                description: fields.description,
                value: fields.value,
                expected_value: fields.expected_value,
                window_values: fields.window_values,
                window_tracking_mode: fields.window_mode,
                expiration_date: fields.expires,
                exclude_from_benefits_page: hide,
                exclude_from_notifications: mute,
                ..BenefitInput::new(name, frequency, benefit_type)
            };
            let benefit = tracker::create_benefit(conn, card_id, input, today)?;
            println!("Added benefit '{}' with ID {}", benefit.name, benefit.id);
        }
        BenefitCommand::Update {
            id,
            name,
            frequency,
            benefit_type,
            fields,
            clear_description,
            clear_expected_value,
            clear_window_values,
            clear_window_mode,
            clear_expiration,
            used,
            hide,
            mute,
        } => {
            let update = BenefitUpdate {
                name,
                description: clearable(fields.description, clear_description),
                frequency,
                benefit_type,
                value: fields.value,
                expected_value: clearable(fields.expected_value, clear_expected_value),
                window_values: clearable(fields.window_values, clear_window_values),
                window_tracking_mode: clearable(fields.window_mode, clear_window_mode),
                expiration_date: clearable(fields.expires, clear_expiration),
                is_used: used,
                exclude_from_benefits_page: hide,
                exclude_from_notifications: mute,
            };
            let benefit = tracker::update_benefit(conn, id, update, today)?;
            println!("Updated benefit '{}'", benefit.name);
        }
        BenefitCommand::Remove { id } => {
            tracker::delete_benefit(conn, id)?;
            println!("Removed benefit with ID {id}");
        }
        BenefitCommand::SetUsage { id, used } => {
            let benefit = tracker::set_benefit_usage(conn, id, used, today)?;
            let state = if benefit.is_used { "used" } else { "unused" };
            println!("Benefit '{}' marked {state}", benefit.name);
        }
    }
    Ok(())
}

/// `--clear-x` wins over a supplied value.
fn clearable<T>(value: Option<T>, clear: bool) -> Option<Option<T>> {
    if clear { Some(None) } else { value.map(Some) }
}

fn run_redemption(conn: &Connection, command: RedemptionCommand, today: NaiveDate) -> Result<()> {
    match command {
        RedemptionCommand::Add {
            benefit_id,
            amount,
            date,
            label,
        } => {
            let input = RedemptionInput {
                label,
                amount,
                occurred_on: date.unwrap_or(today),
            };
            let redemption = tracker::add_redemption(conn, benefit_id, &input, today)?;
            println!("Recorded {:.2} on {} (ID {})", redemption.amount, redemption.occurred_on, redemption.id);
        }
        RedemptionCommand::List { benefit_id } => {
            let redemptions = tracker::list_redemptions(conn, benefit_id)?;
            if redemptions.is_empty() {
                println!("No redemptions recorded for benefit {benefit_id}");
            } else {
                let rows: Vec<RedemptionRow> = redemptions.iter().map(RedemptionRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }
        RedemptionCommand::Update { id, amount, date, label } => {
            let update = RedemptionUpdate {
                label,
                amount,
                occurred_on: date,
            };
            let redemption = tracker::update_redemption(conn, id, update, today)?;
            println!("Updated redemption {}", redemption.id);
        }
        RedemptionCommand::Remove { id } => {
            tracker::delete_redemption(conn, id, today)?;
            println!("Removed redemption with ID {id}");
        }
    }
    Ok(())
}

fn run_window(conn: &Connection, command: WindowCommand, today: NaiveDate) -> Result<()> {
    match command {
        WindowCommand::Exclude {
            benefit_id,
            start,
            end,
            label,
            index,
        } => {
            let input = ExclusionInput {
                window_start: start,
                window_end: end,
                window_label: label,
                window_index: index,
            };
            let exclusion = tracker::add_window_exclusion(conn, benefit_id, &input, today)?;
            println!("Excluded window {} to {} (ID {})", exclusion.window_start, exclusion.window_end, exclusion.id);
        }
        WindowCommand::Include { id } => {
            tracker::delete_window_exclusion(conn, id, today)?;
            println!("Restored window exclusion {id}");
        }
        WindowCommand::List { benefit_id } => {
            tracker::require_benefit(conn, benefit_id)?;
            let exclusions = db::list_exclusions(conn, benefit_id)?;
            if exclusions.is_empty() {
                println!("No excluded windows for benefit {benefit_id}");
            } else {
                let rows: Vec<ExclusionRow> = exclusions.iter().map(ExclusionRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }
    }
    Ok(())
}

fn run_template(conn: &Connection, config: &AppConfig, command: TemplateCommand, today: NaiveDate) -> Result<()> {
    let mut store = config.template_store();
    match command {
        TemplateCommand::List => {
            let dir = store.dir().to_path_buf();
            let templates = store.list()?;
            if templates.is_empty() {
                println!("No card templates in {}", dir.display());
            } else {
                let rows: Vec<TemplateRow> = templates.iter().map(TemplateRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }
        TemplateCommand::Apply {
            slug,
            name,
            last_four,
            account,
            fee_due_date,
            mode,
        } => {
            let template = store.get(&slug)?;
            let details = TemplateCardDetails {
                card_name: name,
                last_four,
                account_name: account,
                fee_due_date,
                year_tracking_mode: mode,
            };
            let (card, benefits) = apply_template(conn, &template, details, today)?;
            println!("Added card '{}' with ID {} and {} benefits", card.card_name, card.id, benefits.len());
        }
        TemplateCommand::Save { card_id, slug } => {
            let template = CardTemplate {
                slug: slug.unwrap_or_default(),
                ..template_from_card(conn, card_id)?
            };
            let saved = store.save(template)?;
            println!("Saved template '{}'", saved.slug);
        }
        TemplateCommand::Update { slug, card_id, rename } => {
            let base = match card_id {
                Some(card_id) => template_from_card(conn, card_id)?,
                None => store.get(&slug)?,
            };
            let template = CardTemplate {
                slug: rename.unwrap_or_default(),
                ..base
            };
            let updated = store.update(&slug, template)?;
            println!("Updated template '{}'", updated.slug);
        }
        TemplateCommand::Remove { slug } => {
            store.remove(&slug)?;
            println!("Removed template '{slug}'");
        }
    }
    Ok(())
}
