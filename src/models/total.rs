use serde::Serialize;

use crate::models::PlanTier;

/// Lifetime usage total priced at a plan tier.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BillingTotal {
    pub plan_tier: PlanTier,
    pub total_bytes: u64,
    /// Currency units per GiB for `plan_tier`.
    pub price_per_gib: f64,
    pub total_cost: f64,
}
