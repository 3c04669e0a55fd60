//! Runtime configuration.
//!
//! Resolved once at process startup from CLI arguments and environment, then
//! passed into the store, scheduler and query service.

use chrono::FixedOffset;
use std::path::{Path, PathBuf};

use crate::cli::{Args, PeriodArg};
use crate::error::Result;
use crate::pricing::PriceTable;
use crate::scheduler::BillingPeriod;
use crate::utils::{default_db_path, default_uploads_dir, parse_utc_offset};

#[derive(Clone, Debug)]
pub struct BillingConfig {
    db_path: PathBuf,
    uploads_dir: PathBuf,
    utc_offset: FixedOffset,
    prices: PriceTable,
    period: BillingPeriod,
}

impl BillingConfig {
    pub fn new(
        db_path: PathBuf,
        uploads_dir: PathBuf,
        utc_offset: FixedOffset,
        prices: PriceTable,
        period: BillingPeriod,
    ) -> Self {
        Self {
            db_path,
            uploads_dir,
            utc_offset,
            prices,
            period,
        }
    }

    pub fn from_args(args: &Args) -> Result<Self> {
        let db_path = match &args.db_path {
            Some(p) => p.clone(),
            None => default_db_path()?,
        };
        let uploads_dir = match &args.uploads_dir {
            Some(p) => p.clone(),
            None => default_uploads_dir()?,
        };
        let prices =
            PriceTable::with_overrides(args.price_basic, args.price_premium, args.price_enterprise)?;
        let period = match args.period {
            PeriodArg::Previous => BillingPeriod::Previous,
            PeriodArg::Current => BillingPeriod::Current,
        };
        Ok(Self::new(
            db_path,
            uploads_dir,
            parse_utc_offset(&args.utc_offset)?,
            prices,
            period,
        ))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    pub fn period(&self) -> BillingPeriod {
        self.period
    }
}
