use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::PlanTier;

/// Local mirror of an identity-service user and the plan they are billed on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Account {
    pub user_id: String,
    pub plan_tier: PlanTier,
    pub created_at: DateTime<Utc>,
}
