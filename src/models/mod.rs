pub mod account;
pub mod bill;
pub mod plan;
pub mod total;
pub mod usage_record;

pub use account::Account;
pub use bill::MonthlyBill;
pub use plan::PlanTier;
pub use total::BillingTotal;
pub use usage_record::UsageRecord;
