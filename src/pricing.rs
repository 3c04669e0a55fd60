//! # Pricing Module
//!
//! Single source of truth for plan-tier pricing. Both the lifetime total and
//! the monthly bill run price usage through [`PriceTable::price_for_tier`].
//!
//! ## Pricing Structure
//!
//! Each tier has a multiplier in currency units per GiB stored:
//! - basic: 1
//! - premium: 2
//! - enterprise: 3
//!
//! Multipliers can be overridden at startup via:
//! - `BILLING_PRICE_BASIC`
//! - `BILLING_PRICE_PREMIUM`
//! - `BILLING_PRICE_ENTERPRISE`

use serde::Serialize;

use crate::error::{BillingError, Result};
use crate::models::PlanTier;

/// 1 GiB; usage is priced per GiB-hour of recorded high-water mark.
pub const BYTES_PER_GIB: f64 = 1_073_741_824.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PriceTable {
    pub basic: f64,
    pub premium: f64,
    pub enterprise: f64,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self {
            basic: 1.0,
            premium: 2.0,
            enterprise: 3.0,
        }
    }
}

impl PriceTable {
    /// Default table with any provided multipliers substituted in.
    pub fn with_overrides(
        basic: Option<f64>,
        premium: Option<f64>,
        enterprise: Option<f64>,
    ) -> Result<Self> {
        let d = Self::default();
        let table = Self {
            basic: basic.unwrap_or(d.basic),
            premium: premium.unwrap_or(d.premium),
            enterprise: enterprise.unwrap_or(d.enterprise),
        };
        for tier in PlanTier::ALL {
            let p = table.price_for_tier(tier);
            if !p.is_finite() || p < 0.0 {
                return Err(BillingError::Config(format!(
                    "price for {tier} must be a non-negative number, got {p}"
                )));
            }
        }
        Ok(table)
    }

    pub fn price_for_tier(&self, tier: PlanTier) -> f64 {
        match tier {
            PlanTier::Basic => self.basic,
            PlanTier::Premium => self.premium,
            PlanTier::Enterprise => self.enterprise,
        }
    }
}

/// Cost of `bytes` at `multiplier` units per GiB.
pub fn cost_for_bytes(bytes: u64, multiplier: f64) -> f64 {
    (bytes as f64) * multiplier / BYTES_PER_GIB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tier_multipliers() {
        let p = PriceTable::default();
        assert_eq!(p.price_for_tier(PlanTier::Basic), 1.0);
        assert_eq!(p.price_for_tier(PlanTier::Premium), 2.0);
        assert_eq!(p.price_for_tier(PlanTier::Enterprise), 3.0);
    }

    #[test]
    fn test_cost_for_one_gib() {
        assert!((cost_for_bytes(1 << 30, 1.0) - 1.0).abs() < 1e-12);
        assert!((cost_for_bytes(1 << 29, 3.0) - 1.5).abs() < 1e-12);
        assert_eq!(cost_for_bytes(0, 3.0), 0.0);
    }

    #[test]
    fn test_overrides_apply_per_tier() {
        let p = PriceTable::with_overrides(None, Some(2.5), None).unwrap();
        assert_eq!(p.basic, 1.0);
        assert_eq!(p.premium, 2.5);
        assert_eq!(p.enterprise, 3.0);
    }

    #[test]
    fn test_negative_override_rejected() {
        let err = PriceTable::with_overrides(Some(-1.0), None, None).unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));
        assert!(PriceTable::with_overrides(None, None, Some(f64::NAN)).is_err());
    }
}
