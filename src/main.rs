use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use storage_billing::cli::{AccountCommand, Args, Command};
use storage_billing::config::BillingConfig;
use storage_billing::db::{Store, SCHEMA_VERSION};
use storage_billing::display::{
    build_bills_json, build_total_json, build_usage_json, print_json, render_account_text,
    render_bills_text, render_purge_text, render_run_text, render_sweep_text, render_total_text,
    render_usage_text,
};
use storage_billing::recorder::{record_hourly_sweep, record_usage, StorageSizer, UploadDirSizer};
use storage_billing::scheduler::{
    bill_month, record_monthly_run, run_monthly_aggregation, Scheduler, LAST_HOURLY_SWEEP_KEY,
    LAST_MONTHLY_RUN_KEY,
};
use storage_billing::service::BillingService;
use storage_billing::utils::parse_month;
use storage_billing::BillingError;

/// Directives from `RUST_LOG` when set, otherwise `storage_billing=info`.
/// `--debug` sets the crate to debug on top of either.
fn build_env_filter(debug: bool, rust_log: Option<&str>) -> Result<EnvFilter> {
    let mut filter = match rust_log.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::new("storage_billing=info"),
    };
    if debug {
        filter = filter.add_directive("storage_billing=debug".parse()?);
    }
    Ok(filter)
}

fn init_tracing(debug: bool) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    // Logs go to stderr so JSON on stdout stays parseable
    tracing_subscriber::registry()
        .with(build_env_filter(debug, rust_log.as_deref())?)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug)?;

    let config = BillingConfig::from_args(&args).context("resolve configuration")?;

    let store = Store::open(config.db_path())
        .with_context(|| format!("open database {}", config.db_path().display()))?;
    let service = BillingService::new(&store, *config.prices());

    match args.command {
        Command::Account { action } => match action {
            AccountCommand::Set { user_id, plan } => {
                let account = store.upsert_account(&user_id, plan.into())?;
                if args.json {
                    print_json(&serde_json::to_value(&account)?)?;
                } else {
                    print!("{}", render_account_text(&account));
                }
            }
            AccountCommand::Show { user_id } => {
                let account = store
                    .account(&user_id)?
                    .ok_or_else(|| BillingError::NotFound(format!("account {user_id}")))?;
                if args.json {
                    print_json(&serde_json::to_value(&account)?)?;
                } else {
                    print!("{}", render_account_text(&account));
                }
            }
            AccountCommand::Purge { user_id } => {
                let summary = store.purge_user(&user_id)?;
                if args.json {
                    print_json(&serde_json::json!({
                        "user_id": user_id,
                        "usage_records": summary.usage_records,
                        "account_removed": summary.account_removed,
                    }))?;
                } else {
                    print!("{}", render_purge_text(&user_id, &summary));
                }
            }
        },
        Command::Record { user_id, bytes, at } => {
            let bytes = match bytes {
                Some(b) => b,
                None => UploadDirSizer::new(config.uploads_dir())
                    .current_total_bytes(&user_id)
                    .with_context(|| format!("measure uploads for {user_id}"))?,
            };
            let record = record_usage(&store, &user_id, bytes, at.unwrap_or_else(Utc::now))?;
            if args.json {
                print_json(&build_usage_json(std::slice::from_ref(&record)))?;
            } else {
                print!("{}", render_usage_text(&user_id, std::slice::from_ref(&record)));
            }
        }
        Command::Sweep => {
            let now = Utc::now();
            let sizer = UploadDirSizer::new(config.uploads_dir());
            let report = record_hourly_sweep(&store, &sizer, now)?;
            store.set_metadata(LAST_HOURLY_SWEEP_KEY, &now.to_rfc3339())?;
            if args.json {
                print_json(&serde_json::to_value(&report)?)?;
            } else {
                print!("{}", render_sweep_text(&report));
            }
        }
        Command::Bill { as_of, month } => {
            let report = match month {
                Some(m) => bill_month(
                    &store,
                    config.prices(),
                    config.utc_offset(),
                    parse_month(&m)?,
                    Utc::now(),
                )?,
                None => run_monthly_aggregation(
                    &store,
                    config.prices(),
                    config.utc_offset(),
                    config.period(),
                    as_of.unwrap_or_else(Utc::now),
                )?,
            };
            record_monthly_run(&store, &report.month)?;
            if args.json {
                print_json(&serde_json::to_value(&report)?)?;
            } else {
                print!("{}", render_run_text(&report));
            }
        }
        Command::HourlyUsage { user_id } => {
            let records = service.list_hourly_usage(&user_id)?;
            if args.json {
                print_json(&build_usage_json(&records))?;
            } else {
                print!("{}", render_usage_text(&user_id, &records));
            }
        }
        Command::Total { user_id, plan } => {
            let total = match plan {
                Some(p) => service.get_total_billing_with_tier(&user_id, p.into())?,
                None => service.get_total_billing(&user_id)?,
            };
            if args.json {
                print_json(&build_total_json(&user_id, &total))?;
            } else {
                print!("{}", render_total_text(&user_id, &total));
            }
        }
        Command::MonthlyBills { user_id } => {
            let bills = service.list_monthly_bills(&user_id)?;
            if args.json {
                print_json(&build_bills_json(&bills))?;
            } else {
                print!("{}", render_bills_text(&user_id, &bills));
            }
        }
        Command::Status => {
            let schema = store
                .get_metadata("schema_version")?
                .map(|m| m.value)
                .unwrap_or_else(|| SCHEMA_VERSION.to_string());
            let last_sweep = store.get_metadata(LAST_HOURLY_SWEEP_KEY)?.map(|m| m.value);
            let last_run = store.get_metadata(LAST_MONTHLY_RUN_KEY)?;
            let last_run_at = last_run
                .as_ref()
                .and_then(|m| m.updated_at_utc())
                .map(|t| t.to_rfc3339());
            let last_run = last_run.map(|m| m.value);
            let accounts = store.list_account_ids()?.len();
            if args.json {
                print_json(&serde_json::json!({
                    "db_path": config.db_path().display().to_string(),
                    "schema_version": schema,
                    "accounts": accounts,
                    "last_hourly_sweep": last_sweep,
                    "last_monthly_run": last_run,
                    "last_monthly_run_at": last_run_at,
                    "utc_offset": config.utc_offset().to_string(),
                    "period": config.period(),
                    "prices": config.prices(),
                }))?;
            } else {
                println!("db:                {}", config.db_path().display());
                println!("schema version:    {schema}");
                println!("accounts:          {accounts}");
                println!("last hourly sweep: {}", last_sweep.as_deref().unwrap_or("never"));
                match (&last_run, &last_run_at) {
                    (Some(month), Some(at)) => println!("last monthly run:  {month} (at {at})"),
                    (Some(month), None) => println!("last monthly run:  {month}"),
                    _ => println!("last monthly run:  never"),
                }
            }
        }
        Command::Run { tick_seconds } => {
            Scheduler::new(config).run(Duration::from_secs(tick_seconds.max(1)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_default_filter_is_info() {
        let filter = build_env_filter(false, None).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));

        let blank = build_env_filter(false, Some("  ")).unwrap();
        assert_eq!(blank.max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn test_rust_log_can_raise_crate_level() {
        let filter = build_env_filter(false, Some("storage_billing=debug")).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));

        let trace = build_env_filter(false, Some("storage_billing=trace")).unwrap();
        assert_eq!(trace.max_level_hint(), Some(LevelFilter::TRACE));
    }

    #[test]
    fn test_debug_flag_raises_level() {
        let filter = build_env_filter(true, None).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
