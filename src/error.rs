//! Error types shared by the billing components.

/// Errors surfaced by the metering and billing pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Referenced entity is absent (404-equivalent).
    #[error("not found: {0}")]
    NotFound(String),
    /// Missing or malformed input, rejected before any store access.
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("unknown plan tier: {0:?} (expected basic, premium or enterprise)")]
    UnknownPlanTier(String),
    /// Store unreachable or write rejected (500-equivalent).
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, BillingError>;
