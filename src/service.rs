//! Read-only billing queries scoped to a single caller.

use crate::aggregator::total_billing_for_user;
use crate::db::{validate_user_id, Store};
use crate::error::{BillingError, Result};
use crate::models::{BillingTotal, MonthlyBill, PlanTier, UsageRecord};
use crate::pricing::PriceTable;

pub struct BillingService<'a> {
    store: &'a Store,
    prices: PriceTable,
}

impl<'a> BillingService<'a> {
    pub fn new(store: &'a Store, prices: PriceTable) -> Self {
        Self { store, prices }
    }

    pub fn list_hourly_usage(&self, user_id: &str) -> Result<Vec<UsageRecord>> {
        validate_user_id(user_id)?;
        self.store.usage_for_user(user_id)
    }

    /// Lifetime total priced at the caller's current plan.
    pub fn get_total_billing(&self, user_id: &str) -> Result<BillingTotal> {
        validate_user_id(user_id)?;
        let account = self
            .store
            .account(user_id)?
            .ok_or_else(|| BillingError::NotFound(format!("account {user_id}")))?;
        self.get_total_billing_with_tier(user_id, account.plan_tier)
    }

    pub fn get_total_billing_with_tier(
        &self,
        user_id: &str,
        tier: PlanTier,
    ) -> Result<BillingTotal> {
        validate_user_id(user_id)?;
        total_billing_for_user(self.store, user_id, tier, &self.prices)
    }

    pub fn list_monthly_bills(&self, user_id: &str) -> Result<Vec<MonthlyBill>> {
        validate_user_id(user_id)?;
        self.store.bills_for_user(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_empty_user_lists_are_empty() {
        let store = Store::open_in_memory().unwrap();
        let svc = BillingService::new(&store, PriceTable::default());

        assert!(svc.list_hourly_usage("nobody").unwrap().is_empty());
        assert!(svc.list_monthly_bills("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_total_uses_account_tier() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_account("u1", PlanTier::Enterprise).unwrap();
        store
            .upsert_usage_max("u1", Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(), 1 << 30)
            .unwrap();
        let svc = BillingService::new(&store, PriceTable::default());

        let total = svc.get_total_billing("u1").unwrap();
        assert_eq!(total.plan_tier, PlanTier::Enterprise);
        assert_eq!(total.price_per_gib, 3.0);
        assert!((total.total_cost - 3.0).abs() < 1e-9);

        let basic = svc.get_total_billing_with_tier("u1", PlanTier::Basic).unwrap();
        assert!((basic.total_cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_total_without_account_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let svc = BillingService::new(&store, PriceTable::default());

        let err = svc.get_total_billing("ghost").unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
    }

    #[test]
    fn test_blank_user_is_validation_error() {
        let store = Store::open_in_memory().unwrap();
        let svc = BillingService::new(&store, PriceTable::default());
        assert!(matches!(
            svc.list_hourly_usage(" ").unwrap_err(),
            BillingError::Validation(_)
        ));
    }
}
