use std::env;
use std::fmt::Write as _;

#[cfg(feature = "colors")]
use owo_colors::OwoColorize;

// Provide a no-op color shim when "colors" feature is disabled
#[cfg(not(feature = "colors"))]
pub mod color_shim {
    use std::fmt::{self, Display, Formatter};

    #[derive(Clone)]
    pub struct Plain(pub String);

    impl Display for Plain {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    pub trait ColorizeShim {
        fn as_str(&self) -> &str;

        fn bold(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn dimmed(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn green(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn yellow(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn red(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn cyan(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
    }

    impl ColorizeShim for &str {
        fn as_str(&self) -> &str {
            self
        }
    }
    impl ColorizeShim for String {
        fn as_str(&self) -> &str {
            self.as_str()
        }
    }
    impl ColorizeShim for Plain {
        fn as_str(&self) -> &str {
            &self.0
        }
    }
}

#[cfg(not(feature = "colors"))]
use color_shim::ColorizeShim as OwoColorize;

use crate::db::PurgeSummary;
use crate::models::{Account, BillingTotal, MonthlyBill, UsageRecord};
use crate::recorder::SweepReport;
use crate::scheduler::RunReport;
use crate::utils::{format_bytes, format_currency};

fn colors_enabled() -> bool {
    env::var("NO_COLOR").is_err()
}

fn dim(s: &str) -> String {
    if colors_enabled() {
        s.dimmed().to_string()
    } else {
        s.to_string()
    }
}

fn accent(s: &str) -> String {
    if colors_enabled() {
        s.cyan().bold().to_string()
    } else {
        s.to_string()
    }
}

fn status(s: &str, ok: bool) -> String {
    if !colors_enabled() {
        s.to_string()
    } else if ok {
        s.green().to_string()
    } else {
        s.red().bold().to_string()
    }
}

/// Totals in the shape the billing endpoint has always returned.
pub fn build_total_json(user_id: &str, total: &BillingTotal) -> serde_json::Value {
    serde_json::json!({
        "userId": user_id,
        "planTier": total.plan_tier,
        "totalRecords": total.total_bytes,
        "planPrice": total.price_per_gib,
        "totalBilling": total.total_cost,
    })
}

pub fn build_usage_json(records: &[UsageRecord]) -> serde_json::Value {
    serde_json::Value::Array(
        records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "user_id": r.user_id,
                    "date": r.date.to_rfc3339(),
                    "max_usage": r.max_usage,
                })
            })
            .collect(),
    )
}

pub fn build_bills_json(bills: &[MonthlyBill]) -> serde_json::Value {
    serde_json::Value::Array(
        bills
            .iter()
            .map(|b| {
                serde_json::json!({
                    "user_id": b.user_id,
                    "month": b.month,
                    "total_bytes": b.total_bytes,
                    "plan_tier": b.plan_tier,
                    "total_cost": b.total_cost,
                    "created_at": b.created_at.to_rfc3339(),
                })
            })
            .collect(),
    )
}

pub fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub fn render_usage_text(user_id: &str, records: &[UsageRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", accent("Hourly usage"), dim(user_id));
    if records.is_empty() {
        let _ = writeln!(out, "  {}", dim("no usage recorded"));
        return out;
    }
    for r in records {
        let _ = writeln!(
            out,
            "  {}  {:>12}",
            r.date.format("%Y-%m-%d %H:00 UTC"),
            format_bytes(r.max_usage)
        );
    }
    out
}

pub fn render_total_text(user_id: &str, total: &BillingTotal) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", accent("Total billing"), dim(user_id));
    let _ = writeln!(out, "  plan:   {} ({}/GiB)", total.plan_tier, total.price_per_gib);
    let _ = writeln!(
        out,
        "  usage:  {} ({} bytes)",
        format_bytes(total.total_bytes),
        total.total_bytes
    );
    let _ = writeln!(out, "  cost:   {}", format_currency(total.total_cost));
    out
}

pub fn render_bills_text(user_id: &str, bills: &[MonthlyBill]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", accent("Monthly bills"), dim(user_id));
    if bills.is_empty() {
        let _ = writeln!(out, "  {}", dim("no bills"));
        return out;
    }
    for b in bills {
        let _ = writeln!(
            out,
            "  {}  {:<10}  {:>12}  {:>10}",
            b.month,
            b.plan_tier,
            format_bytes(b.total_bytes),
            format_currency(b.total_cost)
        );
    }
    out
}

pub fn render_account_text(account: &Account) -> String {
    format!(
        "{} {} plan={} since={}\n",
        accent("Account"),
        account.user_id,
        account.plan_tier,
        account.created_at.format("%Y-%m-%d")
    )
}

pub fn render_purge_text(user_id: &str, summary: &PurgeSummary) -> String {
    format!(
        "{} {}: removed {} usage records{}\n",
        accent("Purged"),
        user_id,
        summary.usage_records,
        if summary.account_removed {
            " and the account"
        } else {
            ""
        }
    )
}

pub fn render_sweep_text(report: &SweepReport) -> String {
    let hour = report
        .hour
        .map(|h| h.format("%Y-%m-%d %H:00 UTC").to_string())
        .unwrap_or_else(|| "-".into());
    let mut out = format!(
        "{} {}: {} recorded, {}\n",
        accent("Sweep"),
        hour,
        report.recorded,
        status(
            &format!("{} failed", report.failed.len()),
            report.failed.is_empty()
        )
    );
    for user in &report.failed {
        let _ = writeln!(out, "  failed: {user}");
    }
    out
}

pub fn render_run_text(report: &RunReport) -> String {
    let mut out = format!(
        "{} {}: {} billed, {} already billed, {}\n",
        accent("Bill run"),
        report.month,
        report.billed,
        report.skipped,
        status(
            &format!("{} failed", report.failed.len()),
            report.failed.is_empty()
        )
    );
    for user in &report.failed {
        let _ = writeln!(out, "  failed: {user}");
    }
    out
}
