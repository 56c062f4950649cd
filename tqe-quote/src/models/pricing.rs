//! Pricing value objects

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tqe_common::money::round_currency;

/// Totals for a quote
///
/// Held at full precision; call [`PricingSummary::rounded`] at the display
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingSummary {
    pub translation_total: Decimal,
    pub certification_total: Decimal,
    pub subtotal: Decimal,
    pub rush_fee: Decimal,
    pub delivery_fee: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    #[serde(default)]
    pub manual_override: bool,
}

impl PricingSummary {
    pub fn zero(tax_rate: Decimal) -> Self {
        Self {
            translation_total: Decimal::ZERO,
            certification_total: Decimal::ZERO,
            subtotal: Decimal::ZERO,
            rush_fee: Decimal::ZERO,
            delivery_fee: Decimal::ZERO,
            tax_rate,
            tax_amount: Decimal::ZERO,
            total: Decimal::ZERO,
            manual_override: false,
        }
    }

    /// Copy with every amount rounded to cents (tax rate untouched)
    pub fn rounded(&self) -> Self {
        Self {
            translation_total: round_currency(self.translation_total),
            certification_total: round_currency(self.certification_total),
            subtotal: round_currency(self.subtotal),
            rush_fee: round_currency(self.rush_fee),
            delivery_fee: round_currency(self.delivery_fee),
            tax_rate: self.tax_rate,
            tax_amount: round_currency(self.tax_amount),
            total: round_currency(self.total),
            manual_override: self.manual_override,
        }
    }
}

/// Staff-entered replacement figures
///
/// Unset fields keep their computed value. Tax and total are always
/// recomputed from the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingOverride {
    #[serde(default)]
    pub translation_total: Option<Decimal>,
    #[serde(default)]
    pub certification_total: Option<Decimal>,
    #[serde(default)]
    pub rush_fee: Option<Decimal>,
    #[serde(default)]
    pub delivery_fee: Option<Decimal>,
    pub reason: String,
}
