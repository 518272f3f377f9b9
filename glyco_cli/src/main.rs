mod platform;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use glyco_core::import::{self, parse_instant};
use glyco_core::*;
use platform::ReminderQueue;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "glyco")]
#[command(about = "Glucose cycle tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage 14-day sensor cycles
    Cycle {
        #[command(subcommand)]
        action: CycleAction,
    },

    /// Log a blood glucose reading in the active cycle
    LogBg {
        value: f64,

        /// Measurement unit (mg/dl, mmol/l)
        #[arg(long, default_value = "mg/dL")]
        unit: String,

        /// Reading time (RFC 3339 or "YYYY-MM-DD HH:MM"), defaults to now
        #[arg(long)]
        at: Option<String>,
    },

    /// Log a meal, estimating its nutrition
    Meal {
        description: String,

        /// Meal time, defaults to now
        #[arg(long)]
        at: Option<String>,

        /// Don't schedule the 2-hour glucose check reminder
        #[arg(long)]
        no_reminder: bool,
    },

    /// Import sensor readings into the active cycle
    Import {
        file: PathBuf,

        /// Input format (csv, json); guessed from the extension if omitted
        #[arg(long)]
        format: Option<String>,

        /// Parse and report without storing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// List entries of the active cycle
    Entries {
        /// Only show one entry type (bg, meal)
        #[arg(long = "type")]
        entry_type: Option<String>,
    },

    /// List pending post-meal reminders
    Reminders,

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file location
    Path,
}

#[derive(Subcommand)]
enum CycleAction {
    /// Start a new cycle, closing the active one
    Start {
        /// Cycle start time, defaults to now
        #[arg(long)]
        at: Option<String>,
    },
    /// Close the active cycle
    Close,
    /// Show the active cycle
    Status,
    /// List all cycles
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    glyco_core::logging::init();

    let cli = Cli::parse();
    let command = match cli.command {
        // Runs before loading so a broken config file can be replaced
        Commands::Config { action } => return cmd_config(action),
        command => command,
    };

    // Determine data directory
    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());

    tracing::debug!("Using data directory {:?}", data_dir);
    let db = Database::open(data_dir.clone())?;
    let result = match command {
        Commands::Cycle { action } => cmd_cycle(&db, action),
        Commands::LogBg { value, unit, at } => cmd_log_bg(&db, value, &unit, at),
        Commands::Meal {
            description,
            at,
            no_reminder,
        } => cmd_meal(&db, &config, &data_dir, &description, at, no_reminder).await,
        Commands::Import {
            file,
            format,
            dry_run,
        } => cmd_import(&db, &file, format, dry_run),
        Commands::Entries { entry_type } => cmd_entries(&db, entry_type),
        Commands::Reminders => cmd_reminders(&data_dir, &config),
        Commands::Config { .. } => Ok(()),
    };
    db.close();

    result
}

fn cmd_cycle(db: &Database, action: CycleAction) -> Result<()> {
    let cycles = db.cycles();

    match action {
        CycleAction::Start { at } => {
            let start = parse_time(at)?;
            let id = cycles.start_cycle(start)?;
            let cycle = cycles.get_cycle(id)?.ok_or(Error::NotFound(id))?;

            println!("✓ Started {}", display_name(&cycle));
            println!("  Ends: {}", cycle.window_end().format("%Y-%m-%d %H:%M UTC"));
        }

        CycleAction::Close => match cycles.get_active_cycle()? {
            Some(cycle) => {
                cycles.close_cycle(cycle.id)?;
                println!("✓ Closed {}", display_name(&cycle));
            }
            None => println!("No active cycle."),
        },

        CycleAction::Status => {
            let overview = cycles.overview(Utc::now())?;
            let Some(cycle) = overview.active else {
                println!("No active cycle.");
                return Ok(());
            };

            println!("{}", display_name(&cycle));
            println!("  Started: {}", cycle.start_date.format("%Y-%m-%d %H:%M UTC"));
            if overview.is_expired {
                println!(
                    "  Expired: {}",
                    cycle.window_end().format("%Y-%m-%d %H:%M UTC")
                );
            } else {
                println!("  Days remaining: {}", overview.days_remaining);
            }

            let entries = db.entries().get_entries_for_cycle(cycle.id)?;
            let readings = entries
                .iter()
                .filter(|e| e.entry_type == EntryType::Bg)
                .count();
            println!("  Readings: {}", readings);
            println!("  Meals: {}", entries.len() - readings);
        }

        CycleAction::List => {
            let all = cycles.list_cycles()?;
            if all.is_empty() {
                println!("No cycles yet.");
            }
            for cycle in all {
                let status = match cycle.status {
                    CycleStatus::Active => "active",
                    CycleStatus::Closed => "closed",
                };
                println!(
                    "{}  {}  {:<6}  {}",
                    cycle.id,
                    cycle.start_date.format("%Y-%m-%d"),
                    status,
                    display_name(&cycle)
                );
            }
        }
    }

    Ok(())
}

fn cmd_log_bg(db: &Database, value: f64, unit: &str, at: Option<String>) -> Result<()> {
    let unit: GlucoseUnit = unit.parse()?;
    let timestamp = parse_time(at)?;
    let cycle = require_active_cycle(db)?;

    db.entries().add_entry(
        cycle.id,
        EntryType::Bg,
        EntryContent::Value(value),
        Some(EntryMetadata::Bg {
            unit,
            source: EntrySource::Manual,
        }),
        Some(timestamp),
    )?;

    println!("✓ Logged {} {}", value, unit);
    Ok(())
}

async fn cmd_meal(
    db: &Database,
    config: &Config,
    data_dir: &Path,
    description: &str,
    at: Option<String>,
    no_reminder: bool,
) -> Result<()> {
    let timestamp = parse_time(at)?;
    let cycle = require_active_cycle(db)?;

    let classifier = MealClassifier::<GeminiClient>::from_config(&config.classifier)?;
    let estimate = classifier.analyze(description).await?;

    db.entries().add_entry(
        cycle.id,
        EntryType::Meal,
        EntryContent::Label(estimate.name.clone()),
        Some(EntryMetadata::from_estimate(&estimate, description)),
        Some(timestamp),
    )?;

    println!("✓ Logged meal: {}", estimate.name);
    println!(
        "  {} kcal, {}g carbs, {}g protein, {}g fat",
        estimate.calories, estimate.carbs, estimate.protein, estimate.fat
    );

    if !no_reminder {
        let queue = ReminderQueue::new(data_dir, config.notifications.enabled);
        let scheduler = NotificationScheduler::new(queue);
        if let Some(reminder) = scheduler.schedule_post_meal_reminder(timestamp).await {
            println!(
                "  Reminder set for {}",
                reminder.scheduled_at.format("%Y-%m-%d %H:%M UTC")
            );
        }
    }

    Ok(())
}

fn cmd_import(db: &Database, file: &Path, format: Option<String>, dry_run: bool) -> Result<()> {
    let format = match format {
        Some(f) => f.parse()?,
        None => ImportFormat::from_path(file),
    };
    let raw = std::fs::read_to_string(file)?;
    let records = import::parse(&raw, format)?;
    tracing::info!("Parsed {} records from {:?}", records.len(), file);
    let cycle = require_active_cycle(db)?;

    if dry_run {
        let in_window = records
            .iter()
            .filter(|r| cycle.contains(r.timestamp))
            .count();
        println!(
            "Parsed {} {} records, {} within the cycle window",
            records.len(),
            format,
            in_window
        );
        println!("\n[Dry run - nothing imported]");
        return Ok(());
    }

    let summary = db.entries().import_readings(&cycle, &records)?;
    println!(
        "✓ Imported {} of {} readings into {}",
        summary.imported,
        summary.total,
        display_name(&cycle)
    );
    Ok(())
}

fn cmd_entries(db: &Database, entry_type: Option<String>) -> Result<()> {
    let Some(cycle) = db.cycles().get_active_cycle()? else {
        println!("No active cycle.");
        return Ok(());
    };

    let store = db.entries();
    let entries = match entry_type {
        Some(t) => store.get_entries_by_type(cycle.id, t.parse()?)?,
        None => store.get_entries_for_cycle(cycle.id)?,
    };

    if entries.is_empty() {
        println!("No entries.");
    }
    for entry in entries {
        let detail = match &entry.metadata {
            Some(EntryMetadata::Bg { unit, .. }) => unit.to_string(),
            Some(EntryMetadata::Meal { calories, .. }) => format!("{} kcal", calories),
            None => String::new(),
        };
        println!(
            "{}  {:<4}  {} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.entry_type,
            entry.content,
            detail
        );
    }
    Ok(())
}

fn cmd_reminders(data_dir: &Path, config: &Config) -> Result<()> {
    let queue = ReminderQueue::new(data_dir, config.notifications.enabled);
    let pending = queue.pending(Utc::now())?;

    if pending.is_empty() {
        println!("No pending reminders.");
    }
    for reminder in pending {
        println!(
            "{}  {}: {}",
            reminder.scheduled_at.format("%Y-%m-%d %H:%M UTC"),
            reminder.title,
            reminder.body
        );
    }
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let path = Config::default_config_path();

    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                return Err(Error::Config(format!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                )));
            }
            Config::default().save()?;
            println!("✓ Wrote default config to {}", path.display());
        }
        ConfigAction::Path => println!("{}", path.display()),
    }

    Ok(())
}

/// The active cycle, provided its window is still open
fn require_active_cycle(db: &Database) -> Result<Cycle> {
    let overview = db.cycles().overview(Utc::now())?;
    match overview.active {
        Some(cycle) if overview.is_active => Ok(cycle),
        Some(cycle) => Err(Error::Other(format!(
            "{} expired on {}; start a new one with `glyco cycle start`",
            display_name(&cycle),
            cycle.window_end().format("%Y-%m-%d")
        ))),
        None => Err(Error::Other(
            "No active cycle; start one with `glyco cycle start`".into(),
        )),
    }
}

fn parse_time(at: Option<String>) -> Result<DateTime<Utc>> {
    match at {
        Some(raw) => parse_instant(&raw).ok_or_else(|| Error::Parse(format!("Invalid time: {}", raw))),
        None => Ok(Utc::now()),
    }
}

fn display_name(cycle: &Cycle) -> String {
    cycle
        .name
        .clone()
        .unwrap_or_else(|| format!("Cycle {}", cycle.id))
}
