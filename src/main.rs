mod cli;
mod config;
mod error;
mod redemption;
mod schedule;
mod storage;
mod utils;

use std::io::{BufRead, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Parser;
use colored::*;
use tracing::{error, info};

use cli::{Cli, Commands};
use config::Config;
use redemption::RedemptionCoordinator;
use storage::Database;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cantina_kiosk=debug,info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Init => {
            info!("Initializing database...");
            run_init(&config)
        }

        Commands::Seed => {
            info!("Loading demo configuration...");
            run_seed(&config)
        }

        Commands::Redeem {
            code,
            meal_type,
            at,
        } => run_redeem(&config, &code, meal_type, at.as_deref()).await,

        Commands::Kiosk => {
            info!("Starting kiosk loop, ctrl-d or 'quit' to exit");
            run_kiosk(&config).await
        }

        Commands::CurrentMeal { at } => show_current_meal(&config, at.as_deref()),

        Commands::Stats { format } => show_stats(&config, &format),

        Commands::History { limit } => show_history(&config, limit),
    };

    if let Err(e) = result {
        error!("{}", format!("Error: {}", e).red());
        std::process::exit(1);
    }
}

fn run_init(config: &Config) -> error::Result<()> {
    Database::new(&config.database.path)?;
    println!("{}", format!("Database ready at {}", config.database.path).green());
    Ok(())
}

/// Demo configuration mirroring a small cafeteria: one company, day and
/// night shifts, lunch and dinner windows, a few holders and vouchers.
fn run_seed(config: &Config) -> error::Result<()> {
    let db = Database::new(&config.database.path)?;
    let today = Utc::now().date_naive();

    let company = db.insert_company("Acme Ltda", true)?;
    let day = db.insert_shift("Day", 6 * 60, 14 * 60, true)?;
    let night = db.insert_shift("Night", 22 * 60, 6 * 60, true)?;

    db.insert_meal_type("Café", 7 * 60, 8 * 60 + 30, 10, None, true)?;
    let lunch = db.insert_meal_type("Almoço", 12 * 60, 13 * 60, 15, None, true)?;
    db.insert_meal_type("Jantar", 18 * 60, 19 * 60, 15, None, true)?;

    let maria = db.insert_holder("Maria Silva", company, day, false)?;
    let jorge = db.insert_holder("Jorge Santos", company, night, false)?;

    db.insert_common_voucher(maria, "1001")?;
    db.insert_common_voucher(jorge, "1002")?;
    db.insert_extra_voucher(maria, "2001", Some(lunch), today)?;
    db.insert_disposable_voucher("4821", None, today)?;

    println!("{}", "Seeded demo data:".green());
    println!("  common codes: 1001 (Maria, day), 1002 (Jorge, night)");
    println!("  extra code:   2001 (Maria, lunch only, today)");
    println!("  disposable:   4821 (anonymous, expires today)");
    Ok(())
}

async fn run_redeem(
    config: &Config,
    code: &str,
    meal_type: Option<i64>,
    at: Option<&str>,
) -> error::Result<()> {
    let db = Arc::new(Database::new(&config.database.path)?);
    let coordinator = RedemptionCoordinator::new(db, config.redemption.clone());
    let now = parse_now(at)?;

    redeem_once(&coordinator, code, meal_type, now).await;
    Ok(())
}

async fn run_kiosk(config: &Config) -> error::Result<()> {
    let db = Arc::new(Database::new(&config.database.path)?);
    let coordinator = RedemptionCoordinator::new(db, config.redemption.clone());

    let stdin = std::io::stdin();
    loop {
        print!("{}", "code> ".cyan());
        std::io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let code = line.trim();
        if code.is_empty() {
            continue;
        }
        if matches!(code, "quit" | "exit") {
            break;
        }

        redeem_once(&coordinator, code, None, Utc::now()).await;
    }
    Ok(())
}

async fn redeem_once(
    coordinator: &RedemptionCoordinator,
    code: &str,
    meal_type: Option<i64>,
    now: DateTime<Utc>,
) {
    let meal_type_id = match meal_type {
        Some(id) => id,
        None => match coordinator.current_meal(now) {
            Ok(Some(meal)) => {
                info!("Auto-selected meal type '{}'", meal.name);
                meal.id
            }
            Ok(None) => {
                println!("{}", utils::format_rejection(&error::Rejection::OutsideMealWindow));
                return;
            }
            Err(rejection) => {
                println!("{}", utils::format_rejection(&rejection));
                return;
            }
        },
    };

    match coordinator.redeem(code, meal_type_id, now).await {
        Ok(outcome) => {
            println!(
                "{}",
                format!(
                    "✓ {} | {} voucher | {} | {}",
                    outcome.holder_name.as_deref().unwrap_or("anonymous"),
                    outcome.variant,
                    outcome.meal_type_name,
                    utils::format_timestamp(&outcome.redeemed_at),
                )
                .green()
            );
        }
        Err(rejection) => {
            info!(
                "Rejected code {} with reason {}",
                utils::mask_code(code),
                rejection.code()
            );
            println!("{}", utils::format_rejection(&rejection));
        }
    }
}

fn show_current_meal(config: &Config, at: Option<&str>) -> error::Result<()> {
    let db = Arc::new(Database::new(&config.database.path)?);
    let coordinator = RedemptionCoordinator::new(db, config.redemption.clone());
    let now = parse_now(at)?;

    match coordinator.current_meal(now) {
        Ok(Some(meal)) => {
            println!(
                "{} ({}, tolerance {} min)",
                meal.name.green(),
                utils::format_window(meal.start_min, meal.end_min),
                meal.tolerance_min
            );
        }
        Ok(None) => println!("{}", "No meal window is open".yellow()),
        Err(rejection) => println!("{}", utils::format_rejection(&rejection)),
    }
    Ok(())
}

fn show_stats(config: &Config, format: &str) -> error::Result<()> {
    let db = Database::new(&config.database.path)?;
    let stats = db.stats(Utc::now().date_naive())?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", "Ledger statistics".bold());
    println!("  total redemptions:      {}", stats.total_redemptions);
    println!("  redemptions today:      {}", stats.redemptions_today);
    println!("  by variant:             common {} / extra {} / disposable {}",
        stats.common_redemptions, stats.extra_redemptions, stats.disposable_redemptions);
    println!("  pending extra:          {}", stats.pending_extra);
    println!("  pending disposable:     {}", stats.pending_disposable);
    Ok(())
}

fn show_history(config: &Config, limit: Option<usize>) -> error::Result<()> {
    let db = Database::new(&config.database.path)?;
    let records = db.recent_usage(limit)?;

    if records.is_empty() {
        println!("{}", "No redemptions recorded".yellow());
        return Ok(());
    }

    for record in records {
        println!(
            "{}  {:<10}  meal {}  {}",
            utils::format_timestamp(&record.redeemed_at),
            record.variant.to_string(),
            record.meal_type_id,
            record
                .holder_id
                .map(|id| format!("holder {}", id))
                .unwrap_or_else(|| "anonymous".to_string()),
        );
    }
    Ok(())
}

fn parse_now(at: Option<&str>) -> error::Result<DateTime<Utc>> {
    match at {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| error::EngineError::Config(format!("invalid --at timestamp: {}", e))),
        None => Ok(Utc::now()),
    }
}
