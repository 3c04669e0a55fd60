use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::PlanTier;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MonthlyBill {
    pub user_id: String,
    /// Calendar month in `YYYY-MM` form.
    pub month: String,
    pub total_bytes: u64,
    pub plan_tier: PlanTier,
    pub total_cost: f64,
    pub created_at: DateTime<Utc>,
}
