use chrono::{DateTime, Utc};
use serde::Serialize;

/// Hourly high-water mark of a user's stored bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub user_id: String,
    /// Start of the hour this record covers.
    pub date: DateTime<Utc>,
    pub max_usage: u64,
}
