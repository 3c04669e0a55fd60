//! # Storage Billing
//!
//! Usage metering and monthly billing for a cloud-storage service.
//!
//! ## Overview
//!
//! Hourly snapshots of each user's stored bytes are folded into one
//! high-water-mark record per user per hour. A monthly run aggregates a
//! calendar month of those records into one bill per user, priced by plan
//! tier. Read-only queries expose raw records, lifetime totals and bills.
//!
//! ## Features
//!
//! - `colors` (default): Enables terminal color output via owo-colors

/// Lifetime usage totals priced by plan tier
pub mod aggregator;

/// Command-line argument parsing
pub mod cli;

/// Runtime configuration resolved at startup
pub mod config;

/// SQLite persistence
pub mod db;

/// Text and JSON output formatting
pub mod display;

/// Error types
pub mod error;

/// Data models for usage records, bills, accounts and plan tiers
pub mod models;

/// Plan-tier pricing
pub mod pricing;

/// Hourly high-water-mark metering
pub mod recorder;

/// Monthly bill aggregation and the job ticker
pub mod scheduler;

/// Read-only billing queries
pub mod service;

/// Utility functions for paths, formatting and dates
pub mod utils;

pub use error::{BillingError, Result};
