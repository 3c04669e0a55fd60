use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::models::PlanTier;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanTierArg {
    Basic,
    Premium,
    Enterprise,
}

impl From<PlanTierArg> for PlanTier {
    fn from(arg: PlanTierArg) -> Self {
        match arg {
            PlanTierArg::Basic => PlanTier::Basic,
            PlanTierArg::Premium => PlanTier::Premium,
            PlanTierArg::Enterprise => PlanTier::Enterprise,
        }
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodArg {
    /// Bill the completed calendar month before the trigger time
    Previous,
    /// Bill the calendar month containing the trigger time
    Current,
}

#[derive(clap::Parser, Debug)]
#[command(name = "storage_billing", version, about = "Usage metering and monthly billing for cloud storage")]
pub struct Args {
    /// SQLite database path. Defaults to ~/.storage-billing/billing.db
    #[arg(long, env = "BILLING_DB_PATH", global = true)]
    pub db_path: Option<PathBuf>,

    /// Root of per-user upload directories used to measure storage
    #[arg(long, env = "BILLING_UPLOADS_DIR", global = true)]
    pub uploads_dir: Option<PathBuf>,

    /// Fixed UTC offset that defines month boundaries (e.g. +07:00)
    #[arg(
        long,
        env = "BILLING_UTC_OFFSET",
        default_value = "+07:00",
        allow_hyphen_values = true,
        global = true
    )]
    pub utc_offset: String,

    /// Override basic tier price per GiB
    #[arg(long, env = "BILLING_PRICE_BASIC", global = true)]
    pub price_basic: Option<f64>,

    /// Override premium tier price per GiB
    #[arg(long, env = "BILLING_PRICE_PREMIUM", global = true)]
    pub price_premium: Option<f64>,

    /// Override enterprise tier price per GiB
    #[arg(long, env = "BILLING_PRICE_ENTERPRISE", global = true)]
    pub price_enterprise: Option<f64>,

    /// Which month a bill run covers: previous|current (default: previous)
    #[arg(long, value_enum, env = "BILLING_PERIOD", default_value_t = PeriodArg::Previous, global = true)]
    pub period: PeriodArg,

    /// Emit JSON instead of colored text
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug mode: verbose logging on stderr
    #[arg(long, env = "BILLING_DEBUG", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Manage the local account mirror
    Account {
        #[command(subcommand)]
        action: AccountCommand,
    },
    /// Record a user's current storage size for this hour
    Record {
        user_id: String,
        /// Bytes to record; measured from the uploads directory when omitted
        #[arg(long)]
        bytes: Option<u64>,
        /// Observation time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Record usage for every account (hourly job)
    Sweep,
    /// Run the monthly bill aggregation once
    Bill {
        /// Trigger time (RFC 3339), defaults to now
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
        /// Bill an explicit month (YYYY-MM) instead of deriving it from --as-of
        #[arg(long, conflicts_with = "as_of")]
        month: Option<String>,
    },
    /// List raw hourly usage records for a user
    HourlyUsage { user_id: String },
    /// Lifetime usage total priced at the user's plan
    Total {
        user_id: String,
        /// Price at this plan instead of the account's
        #[arg(long, value_enum)]
        plan: Option<PlanTierArg>,
    },
    /// List stored monthly bills for a user
    MonthlyBills { user_id: String },
    /// Show schema version and last job runs
    Status,
    /// Run the hourly and monthly triggers in the foreground
    Run {
        /// Seconds between scheduler ticks
        #[arg(long, default_value_t = 60)]
        tick_seconds: u64,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum AccountCommand {
    /// Create an account or change its plan
    Set {
        user_id: String,
        #[arg(long, value_enum, default_value_t = PlanTierArg::Basic)]
        plan: PlanTierArg,
    },
    /// Show an account
    Show { user_id: String },
    /// Delete an account and its usage records (bills are kept)
    Purge { user_id: String },
}

impl Args {
    pub fn parse() -> Self {
        <Args as clap::Parser>::parse()
    }
}
