//! Wizard step inputs and their validation
//!
//! Validation is pure: catalog data and eligibility are passed in. Every
//! validator collects all field errors rather than stopping at the first.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::FieldError;
use crate::models::{
    Address, CertificationType, DeliveryOption, QuoteStatus, TurnaroundSpeed,
};
use crate::services::Eligibility;

/// One uploaded document as reported by the upload collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpload {
    #[serde(default)]
    pub filename: String,
}

/// Input to `advance`
///
/// Required fields are optional at the type level so that a missing field
/// becomes a field error instead of a malformed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepInput {
    Documents {
        #[serde(default)]
        files: Vec<FileUpload>,
    },
    Details {
        #[serde(default)]
        source_language: Option<String>,
        #[serde(default)]
        target_language: Option<String>,
        #[serde(default)]
        intended_use: Option<String>,
        #[serde(default)]
        certifications: Vec<String>,
    },
    Checkout {
        #[serde(default)]
        turnaround: TurnaroundSpeed,
        #[serde(default)]
        delivery_options: Vec<String>,
        #[serde(default)]
        billing_address: Option<Address>,
        #[serde(default)]
        shipping_address: Option<Address>,
    },
    PaymentConfirmed {
        #[serde(default)]
        payment_reference: Option<String>,
    },
    Cancel {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl StepInput {
    pub fn name(&self) -> &'static str {
        match self {
            StepInput::Documents { .. } => "documents",
            StepInput::Details { .. } => "details",
            StepInput::Checkout { .. } => "checkout",
            StepInput::PaymentConfirmed { .. } => "payment_confirmed",
            StepInput::Cancel { .. } => "cancel",
        }
    }

    /// State the quote must be in for this step; `None` for cancel
    pub fn expected_status(&self) -> Option<QuoteStatus> {
        match self {
            StepInput::Documents { .. } => Some(QuoteStatus::Draft),
            StepInput::Details { .. } => Some(QuoteStatus::DetailsPending),
            StepInput::Checkout { .. } => Some(QuoteStatus::QuoteReady),
            StepInput::PaymentConfirmed { .. } => Some(QuoteStatus::AwaitingPayment),
            StepInput::Cancel { .. } => None,
        }
    }

    /// State the quote moves to when the step succeeds
    pub fn next_status(&self) -> QuoteStatus {
        match self {
            StepInput::Documents { .. } => QuoteStatus::DetailsPending,
            StepInput::Details { .. } => QuoteStatus::AwaitingAnalysis,
            StepInput::Checkout { .. } => QuoteStatus::AwaitingPayment,
            StepInput::PaymentConfirmed { .. } => QuoteStatus::Completed,
            StepInput::Cancel { .. } => QuoteStatus::Cancelled,
        }
    }

    /// Whether the step belongs to a quote in `status`
    pub fn allowed_in(&self, status: QuoteStatus) -> bool {
        let expected = self.expected_status().map_or(true, |e| e == status);
        expected && status.can_transition_to(self.next_status())
    }
}

/// Trimmed, non-blank value
fn present(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

pub fn validate_documents(files: &[FileUpload]) -> Result<Vec<String>, Vec<FieldError>> {
    if files.is_empty() {
        return Err(vec![FieldError::new("files", "at least one document is required")]);
    }

    let mut errors = Vec::new();
    let mut names = Vec::with_capacity(files.len());
    for (i, file) in files.iter().enumerate() {
        match present(Some(&file.filename)) {
            Some(name) => names.push(name),
            None => errors.push(FieldError::new(format!("files[{}].filename", i), "required")),
        }
    }

    if errors.is_empty() {
        Ok(names)
    } else {
        Err(errors)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidDetails {
    pub source_language: String,
    pub target_language: String,
    pub intended_use: String,
    /// De-duplicated, in request order
    pub certifications: Vec<String>,
}

pub fn validate_details(
    source_language: Option<&str>,
    target_language: Option<&str>,
    intended_use: Option<&str>,
    certifications: &[String],
    active_certifications: &[CertificationType],
) -> Result<ValidDetails, Vec<FieldError>> {
    let mut errors = Vec::new();

    let source = present(source_language).map(|s| s.to_ascii_lowercase());
    let target = present(target_language).map(|s| s.to_ascii_lowercase());
    let intended_use = present(intended_use);

    if source.is_none() {
        errors.push(FieldError::new("source_language", "required"));
    }
    if target.is_none() {
        errors.push(FieldError::new("target_language", "required"));
    }
    if let (Some(s), Some(t)) = (&source, &target) {
        if s == t {
            errors.push(FieldError::new("target_language", "must differ from source_language"));
        }
    }
    if intended_use.is_none() {
        errors.push(FieldError::new("intended_use", "required"));
    }

    let mut seen = HashSet::new();
    let mut codes = Vec::new();
    for (i, code) in certifications.iter().enumerate() {
        let code = code.trim();
        if !active_certifications.iter().any(|c| c.is_active && c.code == code) {
            errors.push(FieldError::new(
                format!("certifications[{}]", i),
                format!("unknown or inactive certification '{}'", code),
            ));
        } else if seen.insert(code.to_string()) {
            codes.push(code.to_string());
        }
    }

    match (source, target, intended_use) {
        (Some(source_language), Some(target_language), Some(intended_use)) if errors.is_empty() => {
            Ok(ValidDetails {
                source_language,
                target_language,
                intended_use,
                certifications: codes,
            })
        }
        _ => Err(errors),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidCheckout {
    pub turnaround: TurnaroundSpeed,
    /// Selected plus mandatory options
    pub delivery_options: Vec<DeliveryOption>,
    pub billing_address: Address,
    pub shipping_address: Option<Address>,
}

impl ValidCheckout {
    pub fn delivery_codes(&self) -> Vec<String> {
        self.delivery_options.iter().map(|o| o.code.clone()).collect()
    }
}

/// Resolve delivery codes against the catalog, adding mandatory options
///
/// Returns the options plus an error for each unknown code.
pub fn resolve_delivery(
    codes: &[String],
    catalog: &[DeliveryOption],
) -> (Vec<DeliveryOption>, Vec<FieldError>) {
    let mut errors = Vec::new();
    let mut selected: Vec<DeliveryOption> = Vec::new();

    for (i, code) in codes.iter().enumerate() {
        let code = code.trim();
        match catalog.iter().find(|o| o.is_active && o.code == code) {
            Some(option) => {
                if !selected.iter().any(|o| o.code == option.code) {
                    selected.push(option.clone());
                }
            }
            None => errors.push(FieldError::new(
                format!("delivery_options[{}]", i),
                format!("unknown or inactive delivery option '{}'", code),
            )),
        }
    }

    for option in catalog.iter().filter(|o| o.is_active && o.is_mandatory) {
        if !selected.iter().any(|o| o.code == option.code) {
            selected.push(option.clone());
        }
    }

    (selected, errors)
}

fn address_errors(prefix: &str, address: &Address) -> Vec<FieldError> {
    address
        .missing_fields()
        .into_iter()
        .map(|field| FieldError::new(format!("{}.{}", prefix, field), "required"))
        .collect()
}

pub fn validate_checkout(
    turnaround: TurnaroundSpeed,
    delivery_codes: &[String],
    billing_address: Option<&Address>,
    shipping_address: Option<&Address>,
    eligibility: Eligibility,
    delivery_catalog: &[DeliveryOption],
) -> Result<ValidCheckout, Vec<FieldError>> {
    let mut errors = Vec::new();

    if !eligibility.allows(turnaround) {
        errors.push(FieldError::new(
            "turnaround",
            "this turnaround is not available right now",
        ));
    }

    let (delivery_options, delivery_errors) = resolve_delivery(delivery_codes, delivery_catalog);
    errors.extend(delivery_errors);

    match billing_address {
        Some(address) => errors.extend(address_errors("billing_address", address)),
        None => errors.push(FieldError::new("billing_address", "required")),
    }

    let needs_shipping = delivery_options.iter().any(|o| o.requires_shipping_address);
    if needs_shipping {
        match shipping_address {
            Some(address) => errors.extend(address_errors("shipping_address", address)),
            None => errors.push(FieldError::new(
                "shipping_address",
                "required for the selected delivery option",
            )),
        }
    }

    match billing_address {
        Some(billing) if errors.is_empty() => Ok(ValidCheckout {
            turnaround,
            delivery_options,
            billing_address: billing.clone(),
            // Kept only when it was checked
            shipping_address: shipping_address.filter(|_| needs_shipping).cloned(),
        }),
        _ => Err(errors),
    }
}

pub fn validate_payment(payment_reference: Option<&str>) -> Result<String, Vec<FieldError>> {
    present(payment_reference).ok_or_else(|| vec![FieldError::new("payment_reference", "required")])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeliveryGroup;
    use rust_decimal_macros::dec;

    fn cert(code: &str) -> CertificationType {
        CertificationType {
            code: code.to_string(),
            name: code.to_string(),
            price: dec!(25),
            is_active: true,
        }
    }

    fn option(code: &str, group: DeliveryGroup, mandatory: bool) -> DeliveryOption {
        DeliveryOption {
            code: code.to_string(),
            name: code.to_string(),
            group,
            price: dec!(10),
            requires_shipping_address: group == DeliveryGroup::Physical,
            is_mandatory: mandatory,
            is_active: true,
        }
    }

    fn address() -> Address {
        Address {
            name: "Grace Hopper".to_string(),
            line1: "9 Compiler Rd".to_string(),
            line2: None,
            city: "Edmonton".to_string(),
            region: "AB".to_string(),
            postal_code: "T5J 0N3".to_string(),
            country: "CA".to_string(),
        }
    }

    #[test]
    fn test_step_input_wire_format() {
        let input: StepInput = serde_json::from_str(
            r#"{"step":"details","source_language":"es","target_language":"en","intended_use":"immigration"}"#,
        )
        .unwrap();
        assert_eq!(input.name(), "details");
        assert_eq!(input.expected_status(), Some(QuoteStatus::DetailsPending));

        let cancel: StepInput = serde_json::from_str(r#"{"step":"cancel"}"#).unwrap();
        assert!(cancel.allowed_in(QuoteStatus::HitlPending));
        assert!(!cancel.allowed_in(QuoteStatus::Completed));
    }

    #[test]
    fn test_documents_require_named_file() {
        assert!(validate_documents(&[]).is_err());
        let errors = validate_documents(&[
            FileUpload { filename: "a.pdf".to_string() },
            FileUpload { filename: "  ".to_string() },
        ])
        .unwrap_err();
        assert_eq!(errors, vec![FieldError::new("files[1].filename", "required")]);
    }

    #[test]
    fn test_details_collects_every_error() {
        let errors = validate_details(None, Some(" "), None, &["apostille".to_string()], &[cert("notarized")])
            .unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["source_language", "target_language", "intended_use", "certifications[0]"]
        );
    }

    #[test]
    fn test_details_same_language_rejected() {
        let errors = validate_details(Some("ES"), Some("es"), Some("legal"), &[], &[]).unwrap_err();
        assert_eq!(errors[0].field, "target_language");
    }

    #[test]
    fn test_details_valid() {
        let valid = validate_details(
            Some(" ES "),
            Some("en"),
            Some("immigration"),
            &["notarized".to_string(), "notarized".to_string()],
            &[cert("notarized")],
        )
        .unwrap();
        assert_eq!(valid.source_language, "es");
        assert_eq!(valid.certifications, vec!["notarized".to_string()]);
    }

    #[test]
    fn test_checkout_mandatory_option_forces_shipping_address() {
        let catalog = vec![
            option("email", DeliveryGroup::Digital, false),
            option("hard_copy", DeliveryGroup::Physical, true),
        ];
        let errors = validate_checkout(
            TurnaroundSpeed::Standard,
            &["email".to_string()],
            Some(&address()),
            None,
            Eligibility::standard_only(),
            &catalog,
        )
        .unwrap_err();
        assert_eq!(errors, vec![FieldError::new("shipping_address", "required for the selected delivery option")]);

        let valid = validate_checkout(
            TurnaroundSpeed::Standard,
            &["email".to_string()],
            Some(&address()),
            Some(&address()),
            Eligibility::standard_only(),
            &catalog,
        )
        .unwrap();
        assert_eq!(valid.delivery_codes(), vec!["email".to_string(), "hard_copy".to_string()]);
    }

    #[test]
    fn test_checkout_rejects_ineligible_speed_and_incomplete_billing() {
        let billing = Address {
            postal_code: String::new(),
            ..address()
        };
        let errors = validate_checkout(
            TurnaroundSpeed::SameDay,
            &["carrier_pigeon".to_string()],
            Some(&billing),
            None,
            Eligibility { rush: true, same_day: false },
            &[option("email", DeliveryGroup::Digital, false)],
        )
        .unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["turnaround", "delivery_options[0]", "billing_address.postal_code"]
        );
    }

    #[test]
    fn test_steps_follow_transition_table() {
        let steps = [
            StepInput::Documents { files: vec![] },
            StepInput::Details {
                source_language: None,
                target_language: None,
                intended_use: None,
                certifications: vec![],
            },
            StepInput::Checkout {
                turnaround: TurnaroundSpeed::Standard,
                delivery_options: vec![],
                billing_address: None,
                shipping_address: None,
            },
            StepInput::PaymentConfirmed { payment_reference: None },
            StepInput::Cancel { reason: None },
        ];
        let statuses = QuoteStatus::NON_TERMINAL.iter().chain(QuoteStatus::TERMINAL.iter());

        for status in statuses {
            for step in &steps {
                assert_eq!(
                    step.allowed_in(*status),
                    step.expected_status().map_or(true, |e| e == *status)
                        && status.can_transition_to(step.next_status()),
                    "{} from {}",
                    step.name(),
                    status
                );
                if step.allowed_in(*status) {
                    assert!(status.can_transition_to(step.next_status()));
                }
            }
        }
        assert!(!steps[4].allowed_in(QuoteStatus::Expired));
        assert!(steps[1].allowed_in(QuoteStatus::DetailsPending));
    }

    #[test]
    fn test_unneeded_shipping_address_is_not_kept() {
        let partial = Address {
            line1: String::new(),
            ..address()
        };
        let valid = validate_checkout(
            TurnaroundSpeed::Standard,
            &["email".to_string()],
            Some(&address()),
            Some(&partial),
            Eligibility::standard_only(),
            &[option("email", DeliveryGroup::Digital, false)],
        )
        .unwrap();
        assert!(valid.shipping_address.is_none());
    }

    #[test]
    fn test_payment_reference_required() {
        assert!(validate_payment(Some("   ")).is_err());
        assert_eq!(validate_payment(Some(" pi_123 ")).unwrap(), "pi_123");
    }
}
