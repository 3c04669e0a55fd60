use chrono::{TimeZone, Utc};
use serde_json::Value;

use storage_billing::display::{build_bills_json, build_total_json, build_usage_json};
use storage_billing::models::{BillingTotal, MonthlyBill, PlanTier, UsageRecord};

#[test]
fn total_json_shape_matches_billing_endpoint() {
    let total = BillingTotal {
        plan_tier: PlanTier::Basic,
        total_bytes: 3 * (1 << 30),
        price_per_gib: 1.0,
        total_cost: 3.0,
    };

    let json: Value = build_total_json("alice", &total);

    for key in ["userId", "planTier", "totalRecords", "planPrice", "totalBilling"] {
        assert!(json.get(key).is_some(), "missing key: {}", key);
    }
    assert_eq!(json["totalRecords"].as_u64(), Some(3 * (1 << 30)));
    assert_eq!(json["planPrice"].as_f64(), Some(1.0));
    assert_eq!(json["totalBilling"].as_f64(), Some(3.0));
}

#[test]
fn usage_json_lists_hour_starts() {
    let records = vec![UsageRecord {
        user_id: "alice".into(),
        date: Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap(),
        max_usage: 4096,
    }];

    let json = build_usage_json(&records);
    let arr = json.as_array().unwrap();

    assert_eq!(arr.len(), 1);
    assert_eq!(arr[0]["user_id"], "alice");
    assert_eq!(arr[0]["date"], "2024-06-03T14:00:00+00:00");
    assert_eq!(arr[0]["max_usage"], 4096);
}

#[test]
fn bills_json_includes_month_and_tier() {
    let bills = vec![MonthlyBill {
        user_id: "bob".into(),
        month: "2024-05".into(),
        total_bytes: 10,
        plan_tier: PlanTier::Enterprise,
        total_cost: 0.25,
        created_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
    }];

    let json = build_bills_json(&bills);

    assert_eq!(json[0]["month"], "2024-05");
    assert_eq!(json[0]["plan_tier"], "enterprise");
    assert!(json[0]["total_cost"].is_number());
}
