use chrono::{Datelike, FixedOffset, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;

use crate::error::{BillingError, Result};

static MONTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(0[1-9]|1[0-2])$").expect("valid month regex"));

static OFFSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([+-])(\d{2}):?(\d{2})$").expect("valid offset regex"));

/// Default database location: `~/.storage-billing/billing.db`
pub fn default_db_path() -> Result<PathBuf> {
    let base_dirs = directories::BaseDirs::new()
        .ok_or_else(|| BillingError::Config("failed to find home directory".into()))?;
    Ok(base_dirs.home_dir().join(".storage-billing").join("billing.db"))
}

/// Default upload root: `~/.storage-billing/uploads`
pub fn default_uploads_dir() -> Result<PathBuf> {
    let base_dirs = directories::BaseDirs::new()
        .ok_or_else(|| BillingError::Config("failed to find home directory".into()))?;
    Ok(base_dirs.home_dir().join(".storage-billing").join("uploads"))
}

/// `YYYY-MM` key for the month containing `date`.
pub fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Parse `YYYY-MM` into the first day of that month.
pub fn parse_month(s: &str) -> Result<NaiveDate> {
    let caps = MONTH_RE
        .captures(s.trim())
        .ok_or_else(|| BillingError::Validation(format!("month must be YYYY-MM, got {s:?}")))?;
    let year: i32 = caps[1]
        .parse()
        .map_err(|_| BillingError::Validation(format!("invalid year in {s:?}")))?;
    let month: u32 = caps[2]
        .parse()
        .map_err(|_| BillingError::Validation(format!("invalid month in {s:?}")))?;
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| BillingError::Validation(format!("month out of range: {s:?}")))
}

/// Parse `+HH:MM`, `-HHMM`, `Z` or `UTC` into a fixed offset.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0)
            .ok_or_else(|| BillingError::Config("invalid zero offset".into()));
    }
    let bad = || BillingError::Config(format!("UTC offset must look like +07:00, got {s:?}"));
    let caps = OFFSET_RE.captures(s).ok_or_else(bad)?;
    let hours: i32 = caps[2].parse().map_err(|_| bad())?;
    let minutes: i32 = caps[3].parse().map_err(|_| bad())?;
    if minutes >= 60 {
        return Err(bad());
    }
    let secs = (hours * 3600 + minutes * 60) * if &caps[1] == "-" { -1 } else { 1 };
    FixedOffset::east_opt(secs).ok_or_else(bad)
}

pub fn format_currency(v: f64) -> String {
    format!("{v:.2}")
}

pub fn format_bytes(n: u64) -> String {
    const KIB: f64 = 1024.0;
    let f = n as f64;
    if f >= KIB * KIB * KIB * KIB {
        format!("{:.1} TiB", f / (KIB * KIB * KIB * KIB))
    } else if f >= KIB * KIB * KIB {
        format!("{:.1} GiB", f / (KIB * KIB * KIB))
    } else if f >= KIB * KIB {
        format!("{:.1} MiB", f / (KIB * KIB))
    } else if f >= KIB {
        format!("{:.1} KiB", f / KIB)
    } else {
        format!("{n} B")
    }
}
