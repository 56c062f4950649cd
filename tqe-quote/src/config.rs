//! Database-backed workflow constants
//!
//! Pricing and eligibility constants live in the `settings` table and are
//! never defaulted in code: a missing or unparsable key is a fatal
//! configuration error for the computation that needs it.

use chrono::{FixedOffset, NaiveTime};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::db::catalog;
use crate::error::{QuoteError, QuoteResult};
use crate::services::eligibility_resolver::{EligibilityConfig, EligibilityResolver};
use crate::services::pricing_engine::{PricingConfig, PricingError};

pub const BASE_RATE: &str = "base_rate";
pub const WORDS_PER_PAGE: &str = "words_per_page";
pub const MIN_BILLABLE_PAGES: &str = "min_billable_pages";
pub const ROUNDING_PRECISION: &str = "rounding_precision";
pub const RUSH_MULTIPLIER: &str = "rush_multiplier";
pub const SAME_DAY_MULTIPLIER: &str = "same_day_multiplier";
pub const RUSH_CUTOFF: &str = "rush_cutoff";
pub const SAME_DAY_CUTOFF: &str = "same_day_cutoff";
pub const REFERENCE_UTC_OFFSET_MINUTES: &str = "reference_utc_offset_minutes";
pub const DEFAULT_TAX_RATE: &str = "default_tax_rate";
pub const QUOTE_VALIDITY_DAYS: &str = "quote_validity_days";

/// Every key the workflow reads
pub const SETTING_KEYS: [&str; 11] = [
    BASE_RATE,
    WORDS_PER_PAGE,
    MIN_BILLABLE_PAGES,
    ROUNDING_PRECISION,
    RUSH_MULTIPLIER,
    SAME_DAY_MULTIPLIER,
    RUSH_CUTOFF,
    SAME_DAY_CUTOFF,
    REFERENCE_UTC_OFFSET_MINUTES,
    DEFAULT_TAX_RATE,
    QUOTE_VALIDITY_DAYS,
];

/// Constants a new quote is stamped with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteDefaults {
    pub tax_rate: Decimal,
    pub validity_days: i64,
}

async fn require<T: FromStr>(pool: &SqlitePool, key: &str) -> QuoteResult<T> {
    match catalog::get_setting::<T>(pool, key).await {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(QuoteError::FatalConfig(format!("Missing setting: {}", key))),
        Err(tqe_common::Error::Config(msg)) => Err(QuoteError::FatalConfig(msg)),
        Err(e) => Err(e.into()),
    }
}

/// Load and validate the pricing constants
pub async fn load_pricing_config(pool: &SqlitePool) -> QuoteResult<PricingConfig> {
    let config = PricingConfig {
        base_rate: require_pricing(pool, BASE_RATE).await?,
        words_per_page: require_pricing(pool, WORDS_PER_PAGE).await?,
        min_billable_pages: require_pricing(pool, MIN_BILLABLE_PAGES).await?,
        rounding_precision: require_pricing(pool, ROUNDING_PRECISION).await?,
        rush_multiplier: require_pricing(pool, RUSH_MULTIPLIER).await?,
        same_day_multiplier: require_pricing(pool, SAME_DAY_MULTIPLIER).await?,
    };
    config.validate()?;
    Ok(config)
}

async fn require_pricing(pool: &SqlitePool, key: &str) -> QuoteResult<Decimal> {
    match catalog::get_setting::<Decimal>(pool, key).await {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(PricingError::MissingConstant(key.to_string()).into()),
        Err(tqe_common::Error::Config(msg)) => Err(QuoteError::FatalConfig(msg)),
        Err(e) => Err(e.into()),
    }
}

/// Load cutoffs, reference timezone, holidays and the same-day matrix
pub async fn load_eligibility_resolver(pool: &SqlitePool) -> QuoteResult<EligibilityResolver> {
    let rush_cutoff: String = require(pool, RUSH_CUTOFF).await?;
    let same_day_cutoff: String = require(pool, SAME_DAY_CUTOFF).await?;
    let offset_minutes: i32 = require(pool, REFERENCE_UTC_OFFSET_MINUTES).await?;

    let config = EligibilityConfig {
        rush_cutoff: parse_cutoff(RUSH_CUTOFF, &rush_cutoff)?,
        same_day_cutoff: parse_cutoff(SAME_DAY_CUTOFF, &same_day_cutoff)?,
        reference_offset: offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                QuoteError::FatalConfig(format!(
                    "Invalid setting {}: {}",
                    REFERENCE_UTC_OFFSET_MINUTES, offset_minutes
                ))
            })?,
    };

    let holidays = catalog::list_holidays(pool).await.map_err(|e| match e {
        tqe_common::Error::Config(msg) => QuoteError::FatalConfig(msg),
        other => other.into(),
    })?;
    let matrix = catalog::list_eligibility_rules(pool).await?;

    Ok(EligibilityResolver::new(config, holidays, matrix))
}

/// Accepts `HH:MM` or `HH:MM:SS`
fn parse_cutoff(key: &str, raw: &str) -> QuoteResult<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| QuoteError::FatalConfig(format!("Invalid setting {}: {:?}", key, raw)))
}

pub async fn load_quote_defaults(pool: &SqlitePool) -> QuoteResult<QuoteDefaults> {
    let tax_rate: Decimal = require(pool, DEFAULT_TAX_RATE).await?;
    let validity_days: i64 = require(pool, QUOTE_VALIDITY_DAYS).await?;

    if tax_rate < Decimal::ZERO {
        return Err(QuoteError::FatalConfig(format!(
            "Invalid setting {}: must not be negative",
            DEFAULT_TAX_RATE
        )));
    }
    if validity_days <= 0 {
        return Err(QuoteError::FatalConfig(format!(
            "Invalid setting {}: must be positive",
            QUOTE_VALIDITY_DAYS
        )));
    }

    Ok(QuoteDefaults {
        tax_rate,
        validity_days,
    })
}
