//! # Aggregator Module
//!
//! Sums hourly usage records and prices them at a plan tier.

use crate::db::Store;
use crate::error::Result;
use crate::models::{BillingTotal, PlanTier, UsageRecord};
use crate::pricing::{cost_for_bytes, PriceTable};

/// Price `records` at `tier`.
///
/// Cost is accumulated per record rather than from the byte sum, so totals
/// match record-by-record pricing up to floating-point rounding.
pub fn compute_total_billing(
    records: &[UsageRecord],
    tier: PlanTier,
    prices: &PriceTable,
) -> BillingTotal {
    let price_per_gib = prices.price_for_tier(tier);

    let mut total_bytes: u64 = 0;
    let mut total_cost: f64 = 0.0;
    for r in records {
        total_bytes = total_bytes.saturating_add(r.max_usage);
        total_cost += cost_for_bytes(r.max_usage, price_per_gib);
    }

    BillingTotal {
        plan_tier: tier,
        total_bytes,
        price_per_gib,
        total_cost,
    }
}

/// Lifetime total for `user_id` across every recorded hour.
pub fn total_billing_for_user(
    store: &Store,
    user_id: &str,
    tier: PlanTier,
    prices: &PriceTable,
) -> Result<BillingTotal> {
    let records = store.usage_for_user(user_id)?;
    Ok(compute_total_billing(&records, tier, prices))
}
