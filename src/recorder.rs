//! # Recorder Module
//!
//! Hourly high-water-mark metering. Each call folds the caller's current
//! storage footprint into the record for the hour containing `now`; a record
//! only ever grows within its hour.

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info};
use walkdir::WalkDir;

use crate::db::{validate_user_id, Store};
use crate::error::{BillingError, Result};
use crate::models::UsageRecord;

/// Floor `ts` to the top of its hour.
pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Record `current_total_bytes` for `user_id` in the hour containing `now`.
pub fn record_usage(
    store: &Store,
    user_id: &str,
    current_total_bytes: u64,
    now: DateTime<Utc>,
) -> Result<UsageRecord> {
    validate_user_id(user_id)?;
    store.upsert_usage_max(user_id, truncate_to_hour(now), current_total_bytes)
}

/// Supplies a user's current total stored bytes.
pub trait StorageSizer {
    fn current_total_bytes(&self, user_id: &str) -> Result<u64>;
}

/// Sums file sizes under `<root>/<user_id>`.
#[derive(Debug, Clone)]
pub struct UploadDirSizer {
    root: PathBuf,
}

impl UploadDirSizer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl StorageSizer for UploadDirSizer {
    fn current_total_bytes(&self, user_id: &str) -> Result<u64> {
        validate_user_id(user_id)?;
        if user_id.contains(['/', '\\']) || user_id == "." || user_id == ".." {
            return Err(BillingError::Validation(format!(
                "user id {user_id:?} is not a valid directory name"
            )));
        }
        let dir = self.root.join(user_id);
        if !dir.is_dir() {
            return Ok(0);
        }

        let mut total: u64 = 0;
        for entry in WalkDir::new(&dir).follow_links(false) {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() {
                total = total.saturating_add(entry.metadata().map_err(std::io::Error::from)?.len());
            }
        }
        Ok(total)
    }
}

/// Fixed per-user sizes, for callers that already know the footprint.
impl StorageSizer for HashMap<String, u64> {
    fn current_total_bytes(&self, user_id: &str) -> Result<u64> {
        Ok(self.get(user_id).copied().unwrap_or(0))
    }
}

/// Outcome of one hourly sweep across all accounts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub hour: Option<DateTime<Utc>>,
    pub recorded: usize,
    pub failed: Vec<String>,
}

/// Measure and record usage for every account.
///
/// A failure for one user is logged and the sweep moves on.
pub fn record_hourly_sweep(
    store: &Store,
    sizer: &dyn StorageSizer,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let hour = truncate_to_hour(now);
    info!(hour = %hour, "running hourly usage sweep");

    let mut report = SweepReport {
        hour: Some(hour),
        ..SweepReport::default()
    };
    // Metering needs only the id; a bad tier on one row must not stop the sweep
    for user_id in store.list_account_ids()? {
        let outcome = sizer
            .current_total_bytes(&user_id)
            .and_then(|bytes| record_usage(store, &user_id, bytes, now));
        match outcome {
            Ok(_) => report.recorded += 1,
            Err(e) => {
                error!(%user_id, error = %e, "failed to record hourly usage");
                report.failed.push(user_id);
            }
        }
    }

    info!(
        recorded = report.recorded,
        failed = report.failed.len(),
        "hourly usage sweep completed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanTier;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, h, m, s).unwrap()
    }

    #[test]
    fn test_truncate_to_hour() {
        let t = truncate_to_hour(at(14, 37, 59));
        assert_eq!(t, at(14, 0, 0));
        assert_eq!(t.minute(), 0);
        assert_eq!(truncate_to_hour(at(0, 0, 0)), at(0, 0, 0));
    }

    #[test]
    fn test_same_hour_keeps_maximum() {
        let store = Store::open_in_memory().unwrap();
        for (m, bytes) in [(1, 300), (15, 900), (30, 100), (59, 899)] {
            record_usage(&store, "u1", bytes, at(9, m, 0)).unwrap();
        }

        let records = store.usage_for_user("u1").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].max_usage, 900);
        assert_eq!(records[0].date, at(9, 0, 0));
    }

    #[test]
    fn test_different_hours_do_not_collide() {
        let store = Store::open_in_memory().unwrap();
        record_usage(&store, "u1", 10, at(9, 59, 59)).unwrap();
        record_usage(&store, "u1", 5, at(10, 0, 0)).unwrap();
        record_usage(&store, "u2", 7, at(10, 30, 0)).unwrap();

        let u1 = store.usage_for_user("u1").unwrap();
        assert_eq!(u1.len(), 2);
        assert_eq!(u1[0].max_usage, 10);
        assert_eq!(u1[1].max_usage, 5);
        assert_eq!(store.usage_for_user("u2").unwrap().len(), 1);
    }

    #[test]
    fn test_empty_user_rejected() {
        let store = Store::open_in_memory().unwrap();
        let err = record_usage(&store, "", 1, at(1, 0, 0)).unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    #[test]
    fn test_bytes_beyond_storable_range_rejected() {
        let store = Store::open_in_memory().unwrap();
        let err = record_usage(&store, "u1", u64::MAX, at(4, 0, 0)).unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
        assert!(store.usage_for_user("u1").unwrap().is_empty());

        let largest = i64::MAX as u64;
        let record = record_usage(&store, "u1", largest, at(4, 0, 0)).unwrap();
        assert_eq!(record.max_usage, largest);
    }

    #[test]
    fn test_upload_dir_sizer_sums_nested_files() {
        let dir = TempDir::new().unwrap();
        let user_dir = dir.path().join("alice");
        std::fs::create_dir_all(user_dir.join("photos")).unwrap();
        std::fs::write(user_dir.join("a.txt"), vec![0u8; 100]).unwrap();
        std::fs::write(user_dir.join("photos").join("b.jpg"), vec![0u8; 250]).unwrap();

        let sizer = UploadDirSizer::new(dir.path());
        assert_eq!(sizer.current_total_bytes("alice").unwrap(), 350);
        assert_eq!(sizer.current_total_bytes("bob").unwrap(), 0);
        assert!(sizer.current_total_bytes("../etc").is_err());
    }

    #[test]
    fn test_sweep_records_every_account() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_account("u1", PlanTier::Basic).unwrap();
        store.upsert_account("u2", PlanTier::Premium).unwrap();
        let sizes = HashMap::from([("u1".to_string(), 42u64), ("u2".to_string(), 7u64)]);

        let report = record_hourly_sweep(&store, &sizes, at(12, 5, 0)).unwrap();

        assert_eq!(report.recorded, 2);
        assert!(report.failed.is_empty());
        assert_eq!(report.hour, Some(at(12, 0, 0)));
        assert_eq!(store.usage_for_user("u1").unwrap()[0].max_usage, 42);
    }

    struct FailingFor(&'static str);

    impl StorageSizer for FailingFor {
        fn current_total_bytes(&self, user_id: &str) -> Result<u64> {
            if user_id == self.0 {
                Err(BillingError::Io(std::io::Error::other("disk gone")))
            } else {
                Ok(1)
            }
        }
    }

    #[test]
    fn test_sweep_continues_past_failed_user() {
        let store = Store::open_in_memory().unwrap();
        for u in ["a", "b", "c"] {
            store.upsert_account(u, PlanTier::Basic).unwrap();
        }

        let report = record_hourly_sweep(&store, &FailingFor("b"), at(3, 0, 0)).unwrap();

        assert_eq!(report.recorded, 2);
        assert_eq!(report.failed, vec!["b".to_string()]);
        assert_eq!(store.distinct_usage_users().unwrap(), vec!["a", "c"]);
    }

    #[test]
    fn test_sweep_meters_users_despite_bad_account_row() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_account("a", PlanTier::Basic).unwrap();
        store.upsert_account("b", PlanTier::Basic).unwrap();
        store
            .conn_for_tests()
            .execute("UPDATE accounts SET plan_tier = 'gold' WHERE user_id = 'b'", [])
            .unwrap();
        let sizes = HashMap::from([("a".to_string(), 11u64), ("b".to_string(), 22u64)]);

        let report = record_hourly_sweep(&store, &sizes, at(5, 10, 0)).unwrap();

        assert_eq!(report.recorded, 2);
        assert!(report.failed.is_empty());
        assert_eq!(store.usage_for_user("a").unwrap()[0].max_usage, 11);
        assert_eq!(store.usage_for_user("b").unwrap()[0].max_usage, 22);
    }
}
