//! Catalog entries owned by external catalog management (read-only here)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryGroup {
    Digital,
    Physical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOption {
    pub code: String,
    pub name: String,
    pub group: DeliveryGroup,
    pub price: Decimal,
    pub requires_shipping_address: bool,
    /// Always selected, whatever the customer picks
    pub is_mandatory: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificationType {
    pub code: String,
    pub name: String,
    pub price: Decimal,
    pub is_active: bool,
}

/// One row of the same-day eligibility matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityRule {
    pub source_language: String,
    pub target_language: String,
    pub document_type: String,
    pub intended_use: String,
    pub is_active: bool,
}
