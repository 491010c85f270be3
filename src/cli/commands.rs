use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cantina-kiosk")]
#[command(about = "Meal voucher redemption engine for the cafeteria kiosk")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database schema
    Init,

    /// Load a demo configuration (companies, shifts, meal types, vouchers)
    Seed,

    /// Redeem a voucher code
    Redeem {
        /// The scanned or typed entitlement code
        code: String,

        /// Meal type id; omitted, the open serving window is auto-selected
        #[arg(short, long)]
        meal_type: Option<i64>,

        /// Inject "now" as RFC 3339 instead of the system clock
        #[arg(long)]
        at: Option<String>,
    },

    /// Interactive kiosk loop reading codes from stdin
    Kiosk,

    /// Show which meal type window is currently open
    CurrentMeal {
        /// Inject "now" as RFC 3339 instead of the system clock
        #[arg(long)]
        at: Option<String>,
    },

    /// Show ledger statistics
    Stats {
        /// Output format: table or json
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show recent usage records
    History {
        /// Limit number of records
        #[arg(short, long)]
        limit: Option<usize>,
    },
}
