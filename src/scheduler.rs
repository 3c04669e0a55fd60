//! # Scheduler Module
//!
//! Monthly bill aggregation plus the ticker that owns the hourly and monthly
//! triggers.
//!
//! Month boundaries are calendar months in a fixed UTC offset. A run for an
//! already-billed `(user, month)` leaves the existing bill untouched. Users are
//! billed independently: one user's failure is logged and the run continues,
//! so a run may complete partially.

use chrono::{DateTime, Datelike, FixedOffset, Months, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::aggregator::compute_total_billing;
use crate::config::BillingConfig;
use crate::db::Store;
use crate::error::{BillingError, Result};
use crate::models::{MonthlyBill, PlanTier};
use crate::pricing::PriceTable;
use crate::recorder::{record_hourly_sweep, truncate_to_hour, UploadDirSizer};
use crate::utils::{month_key, parse_month};

pub const LAST_HOURLY_SWEEP_KEY: &str = "last_hourly_sweep";
pub const LAST_MONTHLY_RUN_KEY: &str = "last_monthly_run";

/// Which calendar month a trigger at `as_of` bills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    /// The completed month before `as_of`.
    Previous,
    /// The month containing `as_of`.
    Current,
}

/// Outcome of one monthly aggregation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub month: String,
    pub billed: usize,
    /// Users that already had a bill for `month`.
    pub skipped: usize,
    pub failed: Vec<String>,
}

/// First day of the month `as_of` bills, in `offset` local time.
pub fn billing_month(
    as_of: DateTime<Utc>,
    offset: FixedOffset,
    period: BillingPeriod,
) -> Result<NaiveDate> {
    let local = as_of.with_timezone(&offset).date_naive();
    let first = local
        .with_day(1)
        .ok_or_else(|| BillingError::Validation(format!("no first day for {local}")))?;
    match period {
        BillingPeriod::Current => Ok(first),
        BillingPeriod::Previous => first
            .checked_sub_months(Months::new(1))
            .ok_or_else(|| BillingError::Validation(format!("no month before {first}"))),
    }
}

/// Half-open UTC range `[start, end)` covering the calendar month that
/// begins on `first_day` in `offset` local time.
pub fn month_bounds(
    first_day: NaiveDate,
    offset: FixedOffset,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let next = first_day
        .checked_add_months(Months::new(1))
        .ok_or_else(|| BillingError::Validation(format!("no month after {first_day}")))?;
    let to_utc = |d: NaiveDate| {
        d.and_time(NaiveTime::MIN)
            .and_local_timezone(offset)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| BillingError::Validation(format!("unrepresentable local time {d}")))
    };
    Ok((to_utc(first_day)?, to_utc(next)?))
}

/// Aggregate the month selected by `as_of` and `period` into bills.
pub fn run_monthly_aggregation(
    store: &Store,
    prices: &PriceTable,
    offset: FixedOffset,
    period: BillingPeriod,
    as_of: DateTime<Utc>,
) -> Result<RunReport> {
    let month = billing_month(as_of, offset, period)?;
    bill_month(store, prices, offset, month, as_of)
}

/// Bill every user with recorded usage for the month starting on `first_day`.
pub fn bill_month(
    store: &Store,
    prices: &PriceTable,
    offset: FixedOffset,
    first_day: NaiveDate,
    created_at: DateTime<Utc>,
) -> Result<RunReport> {
    let (start, end) = month_bounds(first_day, offset)?;
    let month = month_key(first_day);
    info!(%month, %start, %end, "running monthly bill aggregation");

    let mut report = RunReport {
        month: month.clone(),
        ..RunReport::default()
    };
    for user_id in store.distinct_usage_users()? {
        match bill_user(store, prices, &user_id, &month, start, end, created_at) {
            Ok(true) => report.billed += 1,
            Ok(false) => {
                warn!(%user_id, %month, "bill already exists, skipping");
                report.skipped += 1;
            }
            Err(e) => {
                error!(%user_id, %month, error = %e, "failed to bill user");
                report.failed.push(user_id);
            }
        }
    }

    info!(
        %month,
        billed = report.billed,
        skipped = report.skipped,
        failed = report.failed.len(),
        "monthly bill aggregation completed"
    );
    Ok(report)
}

fn bill_user(
    store: &Store,
    prices: &PriceTable,
    user_id: &str,
    month: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    created_at: DateTime<Utc>,
) -> Result<bool> {
    let records = store.usage_for_user_between(user_id, start, end)?;
    let tier = match store.account(user_id)? {
        Some(account) => account.plan_tier,
        None => {
            warn!(%user_id, "no account for billed user, pricing at basic");
            PlanTier::default()
        }
    };
    let total = compute_total_billing(&records, tier, prices);
    store.insert_bill_if_absent(&MonthlyBill {
        user_id: user_id.to_string(),
        month: month.to_string(),
        total_bytes: total.total_bytes,
        plan_tier: tier,
        total_cost: total.total_cost,
        created_at,
    })
}

/// Advance the last-billed-month marker. Never moves it backwards.
pub fn record_monthly_run(store: &Store, month: &str) -> Result<()> {
    let newer = match store.get_metadata(LAST_MONTHLY_RUN_KEY)? {
        Some(entry) => parse_month(month)? > parse_month(&entry.value)?,
        None => true,
    };
    if newer {
        store.set_metadata(LAST_MONTHLY_RUN_KEY, month)?;
    }
    Ok(())
}

/// Months a run at `now` should have billed but that come after `last_run`.
///
/// With no recorded run only the month due at `now` is returned.
pub fn missed_months(
    last_run: Option<&str>,
    now: DateTime<Utc>,
    offset: FixedOffset,
    period: BillingPeriod,
) -> Result<Vec<NaiveDate>> {
    let due = billing_month(now, offset, period)?;
    let Some(last) = last_run else {
        return Ok(vec![due]);
    };

    let mut months = Vec::new();
    let mut next = parse_month(last)?.checked_add_months(Months::new(1));
    while let Some(month) = next
        && month <= due
    {
        months.push(month);
        next = month.checked_add_months(Months::new(1));
    }
    Ok(months)
}

/// Jobs the ticker can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    HourlySweep,
    MonthlyBilling,
    /// Bill every month missed since the last recorded run.
    MonthlyCatchUp,
}

/// Jobs whose trigger boundary falls in `(last, now]`.
///
/// The hourly sweep fires on every top of the hour; monthly billing fires at
/// 00:00 on the first day of a month in `offset` local time.
pub fn due_jobs(last: DateTime<Utc>, now: DateTime<Utc>, offset: FixedOffset) -> Vec<Job> {
    let mut jobs = Vec::new();
    if now <= last {
        return jobs;
    }
    if truncate_to_hour(now) > truncate_to_hour(last) {
        jobs.push(Job::HourlySweep);
    }
    let month_of = |t: DateTime<Utc>| {
        let d = t.with_timezone(&offset).date_naive();
        (d.year(), d.month())
    };
    if month_of(now) != month_of(last) {
        jobs.push(Job::MonthlyBilling);
    }
    jobs
}

/// Held while a job runs; clears the flag on drop.
pub struct RunGuard(Arc<AtomicBool>);

impl RunGuard {
    pub fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(Arc::clone(flag)))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Host-owned ticker for the hourly sweep and the monthly bill run.
///
/// Each job runs on its own thread with its own store connection. A trigger
/// that arrives while the same job is still running is skipped.
pub struct Scheduler {
    config: BillingConfig,
    hourly_running: Arc<AtomicBool>,
    monthly_running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(config: BillingConfig) -> Self {
        Self {
            config,
            hourly_running: Arc::new(AtomicBool::new(false)),
            monthly_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start every job due between `last` and `now`.
    pub fn tick(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        due_jobs(last, now, self.config.utc_offset())
            .into_iter()
            .filter_map(|job| self.spawn(job, now))
            .collect()
    }

    /// Bill months whose trigger passed while the process was down.
    pub fn catch_up(&self, now: DateTime<Utc>) -> Option<JoinHandle<()>> {
        self.spawn(Job::MonthlyCatchUp, now)
    }

    /// Tick forever, sleeping `interval` between ticks.
    pub fn run(&self, interval: Duration) -> ! {
        info!(
            interval_secs = interval.as_secs(),
            db = %self.config.db_path().display(),
            "scheduler started"
        );
        let mut last = Utc::now();
        drop(self.catch_up(last));
        loop {
            thread::sleep(interval);
            let now = Utc::now();
            // Fire-and-forget; the run guards bound overlap.
            drop(self.tick(last, now));
            last = now;
        }
    }

    fn spawn(&self, job: Job, now: DateTime<Utc>) -> Option<JoinHandle<()>> {
        let flag = match job {
            Job::HourlySweep => &self.hourly_running,
            Job::MonthlyBilling | Job::MonthlyCatchUp => &self.monthly_running,
        };
        let Some(guard) = RunGuard::try_acquire(flag) else {
            warn!(?job, "previous run still in progress, skipping trigger");
            return None;
        };

        let config = self.config.clone();
        Some(thread::spawn(move || {
            let _guard = guard;
            if let Err(e) = run_job(&config, job, now) {
                error!(?job, error = %e, "scheduled job failed");
            }
        }))
    }
}

/// Run one job to completion against a fresh store connection.
pub fn run_job(config: &BillingConfig, job: Job, now: DateTime<Utc>) -> Result<()> {
    let store = Store::open(config.db_path())?;
    match job {
        Job::HourlySweep => {
            let sizer = UploadDirSizer::new(config.uploads_dir());
            record_hourly_sweep(&store, &sizer, now)?;
            store.set_metadata(LAST_HOURLY_SWEEP_KEY, &now.to_rfc3339())?;
        }
        Job::MonthlyBilling => {
            let report = run_monthly_aggregation(
                &store,
                config.prices(),
                config.utc_offset(),
                config.period(),
                now,
            )?;
            record_monthly_run(&store, &report.month)?;
        }
        Job::MonthlyCatchUp => {
            let last_run = store.get_metadata(LAST_MONTHLY_RUN_KEY)?.map(|m| m.value);
            let months = missed_months(
                last_run.as_deref(),
                now,
                config.utc_offset(),
                config.period(),
            )?;
            if months.is_empty() {
                return Ok(());
            }
            info!(count = months.len(), "catching up missed monthly runs");
            for month in months {
                let report = bill_month(&store, config.prices(), config.utc_offset(), month, now)?;
                record_monthly_run(&store, &report.month)?;
            }
        }
    }
    Ok(())
}
