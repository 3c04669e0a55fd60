//! SQLite-backed persistence for usage records, monthly bills and accounts.
//!
//! This module provides:
//! - Database initialization with schema versioning
//! - Atomic hourly high-water-mark upserts keyed by `(user_id, hour_start)`
//! - Append-once monthly bills keyed by `(user_id, month)`
//! - Concurrent access support via WAL mode
//!
//! A [`Store`] wraps one connection and is passed explicitly to every
//! component. Threads open their own `Store` against the same path.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::error::{BillingError, Result};
use crate::models::{Account, MonthlyBill, PlanTier, UsageRecord};

pub const SCHEMA_VERSION: &str = "1";

/// Metadata value with optional timestamp
#[derive(Debug, Clone)]
pub struct MetadataEntry {
    pub value: String,
    pub updated_at: Option<i64>,
}

impl MetadataEntry {
    /// When the value was last written, if the row carries a timestamp.
    pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
        self.updated_at.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// Row counts removed by [`Store::purge_user`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeSummary {
    pub usage_records: usize,
    pub account_removed: bool,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path` with WAL mode and retry logic.
    ///
    /// Retries "database locked" errors with linear backoff and sets a busy
    /// timeout so concurrent writers wait instead of failing.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)?;
        }

        let mut attempts = 0;
        let max_attempts = 3;

        loop {
            match Self::try_open(path) {
                Ok(store) => return Ok(store),
                Err(BillingError::Store(e))
                    if e.to_string().contains("locked") && attempts < max_attempts =>
                {
                    attempts += 1;
                    thread::sleep(Duration::from_millis(100 * attempts));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn conn_for_tests(&self) -> &Connection {
        &self.conn
    }

    /// Raise the usage high-water mark for `(user_id, hour_start)`.
    ///
    /// Single statement, so concurrent writers for the same hour converge on
    /// the maximum instead of racing a read-modify-write.
    pub fn upsert_usage_max(
        &self,
        user_id: &str,
        hour_start: DateTime<Utc>,
        bytes: u64,
    ) -> Result<UsageRecord> {
        let now = Utc::now().timestamp();
        let (uid, hour, max_usage) = self.conn.query_row(
            "INSERT INTO usage_records (user_id, hour_start, max_usage, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(user_id, hour_start) DO UPDATE SET
                 max_usage = MAX(usage_records.max_usage, excluded.max_usage),
                 updated_at = CASE
                     WHEN excluded.max_usage > usage_records.max_usage THEN excluded.updated_at
                     ELSE usage_records.updated_at
                 END
             RETURNING user_id, hour_start, max_usage",
            params![user_id, hour_start.timestamp(), bytes_to_sql(bytes)?, now],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )?;
        debug!(user_id, hour = hour, max_usage, "usage high-water mark upserted");
        Ok(UsageRecord {
            user_id: uid,
            date: utc_from_secs(hour)?,
            max_usage: bytes_from_sql(max_usage),
        })
    }

    /// Every usage record for `user_id`, oldest hour first.
    pub fn usage_for_user(&self, user_id: &str) -> Result<Vec<UsageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, hour_start, max_usage FROM usage_records
             WHERE user_id = ?1 ORDER BY hour_start",
        )?;
        let rows = stmt.query_map(params![user_id], raw_usage_row)?;
        collect_usage(rows)
    }

    /// Usage records for `user_id` with `start <= hour_start < end`.
    pub fn usage_for_user_between(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, hour_start, max_usage FROM usage_records
             WHERE user_id = ?1 AND hour_start >= ?2 AND hour_start < ?3
             ORDER BY hour_start",
        )?;
        let rows = stmt.query_map(
            params![user_id, start.timestamp(), end.timestamp()],
            raw_usage_row,
        )?;
        collect_usage(rows)
    }

    /// Distinct user ids that have at least one usage record.
    pub fn distinct_usage_users(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT user_id FROM usage_records ORDER BY user_id")?;
        let users = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Insert `bill` unless one already exists for its `(user_id, month)`.
    ///
    /// Returns `true` when a new row was written.
    pub fn insert_bill_if_absent(&self, bill: &MonthlyBill) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO monthly_bills
                 (user_id, month, total_bytes, plan_tier, total_cost, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                bill.user_id,
                bill.month,
                bytes_to_sql(bill.total_bytes)?,
                bill.plan_tier.as_str(),
                bill.total_cost,
                bill.created_at.timestamp()
            ],
        )?;
        Ok(changed > 0)
    }

    /// Every bill for `user_id`, oldest month first.
    pub fn bills_for_user(&self, user_id: &str) -> Result<Vec<MonthlyBill>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, month, total_bytes, plan_tier, total_cost, created_at
             FROM monthly_bills WHERE user_id = ?1 ORDER BY month, id",
        )?;
        let raw = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(user_id, month, bytes, tier, total_cost, created_at)| {
                Ok(MonthlyBill {
                    user_id,
                    month,
                    total_bytes: bytes_from_sql(bytes),
                    plan_tier: tier.parse()?,
                    total_cost,
                    created_at: utc_from_secs(created_at)?,
                })
            })
            .collect()
    }

    /// Create the account or change its plan tier.
    pub fn upsert_account(&self, user_id: &str, tier: PlanTier) -> Result<Account> {
        validate_user_id(user_id)?;
        let now = Utc::now().timestamp();
        self.conn.execute(
            "INSERT INTO accounts (user_id, plan_tier, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET plan_tier = excluded.plan_tier",
            params![user_id, tier.as_str(), now],
        )?;
        self.account(user_id)?
            .ok_or_else(|| BillingError::NotFound(format!("account {user_id}")))
    }

    pub fn account(&self, user_id: &str) -> Result<Option<Account>> {
        let raw = self
            .conn
            .query_row(
                "SELECT user_id, plan_tier, created_at FROM accounts WHERE user_id = ?1",
                params![user_id],
                raw_account_row,
            )
            .optional()?;
        raw.map(account_from_raw).transpose()
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id, plan_tier, created_at FROM accounts ORDER BY user_id")?;
        let raw = stmt
            .query_map([], raw_account_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(account_from_raw).collect()
    }

    /// Account user ids without decoding the rest of the row.
    pub fn list_account_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id FROM accounts ORDER BY user_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Remove a user's usage records and account row. Bills are kept.
    pub fn purge_user(&self, user_id: &str) -> Result<PurgeSummary> {
        validate_user_id(user_id)?;
        let tx = self.conn.unchecked_transaction()?;
        let usage_records =
            tx.execute("DELETE FROM usage_records WHERE user_id = ?1", params![user_id])?;
        let accounts = tx.execute("DELETE FROM accounts WHERE user_id = ?1", params![user_id])?;
        tx.commit()?;
        Ok(PurgeSummary {
            usage_records,
            account_removed: accounts > 0,
        })
    }

    /// Fetch metadata value and optional timestamp
    pub fn get_metadata(&self, key: &str) -> Result<Option<MetadataEntry>> {
        let result = self
            .conn
            .query_row(
                "SELECT value, updated_at FROM metadata WHERE key = ?1",
                params![key],
                |row| {
                    Ok(MetadataEntry {
                        value: row.get(0)?,
                        updated_at: row.get::<_, Option<i64>>(1)?,
                    })
                },
            )
            .optional()?;
        Ok(result)
    }

    /// Set metadata value with current timestamp
    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        self.conn.execute(
            "INSERT INTO metadata (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }
}

/// Create tables and indexes if they don't exist.
fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS usage_records (
            user_id TEXT NOT NULL,
            hour_start INTEGER NOT NULL,
            max_usage INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, hour_start)
        );
        CREATE INDEX IF NOT EXISTS idx_usage_hour_start ON usage_records(hour_start);
        CREATE TABLE IF NOT EXISTS monthly_bills (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            month TEXT NOT NULL,
            total_bytes INTEGER NOT NULL,
            plan_tier TEXT NOT NULL,
            total_cost REAL NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE (user_id, month)
        );
        CREATE TABLE IF NOT EXISTS accounts (
            user_id TEXT PRIMARY KEY,
            plan_tier TEXT NOT NULL DEFAULT 'basic',
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER
        );
        INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', '1');",
    )?;
    Ok(())
}

pub(crate) fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(BillingError::Validation("user id cannot be empty".into()));
    }
    Ok(())
}

fn bytes_to_sql(bytes: u64) -> Result<i64> {
    i64::try_from(bytes)
        .map_err(|_| BillingError::Validation(format!("byte count {bytes} is too large to store")))
}

fn bytes_from_sql(v: i64) -> u64 {
    v.max(0) as u64
}

fn utc_from_secs(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| BillingError::Validation(format!("timestamp {secs} out of range")))
}

type RawUsage = (String, i64, i64);
type RawAccount = (String, String, i64);

fn raw_usage_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawUsage> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn raw_account_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAccount> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn collect_usage(
    rows: impl Iterator<Item = rusqlite::Result<RawUsage>>,
) -> Result<Vec<UsageRecord>> {
    let mut out = Vec::new();
    for row in rows {
        let (user_id, hour, max_usage) = row?;
        out.push(UsageRecord {
            user_id,
            date: utc_from_secs(hour)?,
            max_usage: bytes_from_sql(max_usage),
        });
    }
    Ok(out)
}

fn account_from_raw((user_id, tier, created_at): RawAccount) -> Result<Account> {
    Ok(Account {
        user_id,
        plan_tier: tier.parse()?,
        created_at: utc_from_secs(created_at)?,
    })
}
