//! Deterministic quote pricing
//!
//! Pure computation: no I/O, no clock, no floating point. All arithmetic is
//! exact decimal; nothing is rounded here. Rounding to cents is the display
//! layer's job (`PricingSummary::rounded`).
//!
//! ```text
//! billable_pages = max(ceil_to(words / words_per_page, rounding_precision), min_billable_pages)
//! line_total     = billable_pages × base_rate × complexity_multiplier
//! subtotal       = Σ line_total + Σ certification price
//! rush_fee       = subtotal × (speed_multiplier − 1)
//! delivery_fee   = Σ price of selected physical delivery options
//! tax_amount     = (subtotal + rush_fee + delivery_fee) × tax_rate
//! total          = subtotal + rush_fee + delivery_fee + tax_amount
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tqe_common::money::{ceil_to_multiple, is_multiple_of};

use crate::error::{FieldError, QuoteError};
use crate::models::{
    Complexity, DeliveryGroup, DeliveryOption, PricingOverride, PricingSummary, TurnaroundSpeed,
};

/// Pricing failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    /// A required constant is absent from the catalog/config store
    #[error("Missing pricing constant: {0}")]
    MissingConstant(String),

    /// A constant is present but unusable
    #[error("Invalid pricing constant {name}: {reason}")]
    InvalidConstant { name: &'static str, reason: String },

    /// Caller-supplied figure is out of range
    #[error("Invalid pricing input: {0}")]
    InvalidInput(String),
}

impl From<PricingError> for QuoteError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::MissingConstant(_) | PricingError::InvalidConstant { .. } => {
                QuoteError::FatalConfig(err.to_string())
            }
            PricingError::InvalidInput(msg) => {
                QuoteError::Validation(vec![FieldError::new("pricing", msg)])
            }
        }
    }
}

/// Externally configured pricing constants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    pub base_rate: Decimal,
    pub words_per_page: Decimal,
    pub min_billable_pages: Decimal,
    pub rounding_precision: Decimal,
    pub rush_multiplier: Decimal,
    pub same_day_multiplier: Decimal,
}

impl PricingConfig {
    /// Reject constants that would break the pricing invariants
    pub fn validate(&self) -> Result<(), PricingError> {
        if self.words_per_page <= Decimal::ZERO {
            return Err(invalid("words_per_page", "must be positive"));
        }
        if self.rounding_precision <= Decimal::ZERO {
            return Err(invalid("rounding_precision", "must be positive"));
        }
        if self.base_rate < Decimal::ZERO {
            return Err(invalid("base_rate", "must not be negative"));
        }
        if self.min_billable_pages < Decimal::ZERO {
            return Err(invalid("min_billable_pages", "must not be negative"));
        }
        if !is_multiple_of(self.min_billable_pages, self.rounding_precision) {
            return Err(invalid(
                "min_billable_pages",
                "must be a multiple of rounding_precision",
            ));
        }
        if self.rush_multiplier < Decimal::ONE {
            return Err(invalid("rush_multiplier", "must be at least 1"));
        }
        if self.same_day_multiplier < Decimal::ONE {
            return Err(invalid("same_day_multiplier", "must be at least 1"));
        }
        Ok(())
    }

    pub fn speed_multiplier(&self, speed: TurnaroundSpeed) -> Decimal {
        match speed {
            TurnaroundSpeed::Standard => Decimal::ONE,
            TurnaroundSpeed::Rush => self.rush_multiplier,
            TurnaroundSpeed::SameDay => self.same_day_multiplier,
        }
    }
}

fn invalid(name: &'static str, reason: &str) -> PricingError {
    PricingError::InvalidConstant {
        name,
        reason: reason.to_string(),
    }
}

/// One document as far as pricing is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLine {
    pub word_count: u32,
    pub complexity: Complexity,
}

/// Priced document line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePrice {
    pub billable_pages: Decimal,
    pub line_total: Decimal,
}

/// Everything that moves the price of a quote
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PricingInput {
    pub documents: Vec<DocumentLine>,
    pub certification_prices: Vec<Decimal>,
    pub turnaround: TurnaroundSpeed,
    /// Selected delivery options (digital ones contribute nothing)
    pub delivery_options: Vec<DeliveryOption>,
    pub tax_rate: Decimal,
}

/// Pricing engine bound to a validated config
#[derive(Debug, Clone)]
pub struct PricingEngine {
    config: PricingConfig,
}

impl PricingEngine {
    pub fn new(config: PricingConfig) -> Result<Self, PricingError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Word count → billable pages
    pub fn billable_pages(&self, word_count: u32) -> Decimal {
        let raw_pages = Decimal::from(word_count) / self.config.words_per_page;
        let rounded = ceil_to_multiple(raw_pages, self.config.rounding_precision);
        rounded.max(self.config.min_billable_pages)
    }

    pub fn price_line(&self, line: &DocumentLine) -> LinePrice {
        let billable_pages = self.billable_pages(line.word_count);
        LinePrice {
            billable_pages,
            line_total: billable_pages * self.config.base_rate * line.complexity.multiplier(),
        }
    }

    /// Compute totals from inputs
    pub fn calculate(&self, input: &PricingInput) -> Result<PricingSummary, PricingError> {
        self.calculate_with_override(input, None)
    }

    /// Compute totals, letting a staff override replace any of the four
    /// computed components. Tax and total are always derived.
    pub fn calculate_with_override(
        &self,
        input: &PricingInput,
        pricing_override: Option<&PricingOverride>,
    ) -> Result<PricingSummary, PricingError> {
        if input.tax_rate < Decimal::ZERO {
            return Err(PricingError::InvalidInput(format!(
                "tax rate {} is negative",
                input.tax_rate
            )));
        }
        if let Some(price) = input.certification_prices.iter().find(|p| p.is_sign_negative()) {
            return Err(PricingError::InvalidInput(format!(
                "certification price {} is negative",
                price
            )));
        }
        if let Some(o) = pricing_override {
            check_override(o)?;
        }

        let computed_translation: Decimal = input
            .documents
            .iter()
            .map(|doc| self.price_line(doc).line_total)
            .sum();
        let computed_certification: Decimal = input.certification_prices.iter().copied().sum();

        let translation_total = pricing_override
            .and_then(|o| o.translation_total)
            .unwrap_or(computed_translation);
        let certification_total = pricing_override
            .and_then(|o| o.certification_total)
            .unwrap_or(computed_certification);
        let subtotal = translation_total + certification_total;

        let rush_fee = match pricing_override.and_then(|o| o.rush_fee) {
            Some(fee) => fee,
            None => subtotal * (self.config.speed_multiplier(input.turnaround) - Decimal::ONE),
        };

        let delivery_fee = match pricing_override.and_then(|o| o.delivery_fee) {
            Some(fee) => fee,
            None => physical_delivery_fee(&input.delivery_options),
        };

        let taxable = subtotal + rush_fee + delivery_fee;
        let tax_amount = taxable * input.tax_rate;

        Ok(PricingSummary {
            translation_total,
            certification_total,
            subtotal,
            rush_fee,
            delivery_fee,
            tax_rate: input.tax_rate,
            tax_amount,
            total: taxable + tax_amount,
            manual_override: pricing_override.is_some(),
        })
    }
}

fn physical_delivery_fee(options: &[DeliveryOption]) -> Decimal {
    options
        .iter()
        .filter(|o| o.group == DeliveryGroup::Physical)
        .map(|o| o.price)
        .sum()
}

fn check_override(o: &PricingOverride) -> Result<(), PricingError> {
    if o.reason.trim().is_empty() {
        return Err(PricingError::InvalidInput("override reason is required".to_string()));
    }
    let figures = [
        ("translation_total", o.translation_total),
        ("certification_total", o.certification_total),
        ("rush_fee", o.rush_fee),
        ("delivery_fee", o.delivery_fee),
    ];
    for (name, value) in figures {
        if matches!(value, Some(v) if v.is_sign_negative() && !v.is_zero()) {
            return Err(PricingError::InvalidInput(format!("override {} is negative", name)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> PricingConfig {
        PricingConfig {
            base_rate: dec!(65.00),
            words_per_page: dec!(225),
            min_billable_pages: dec!(1),
            rounding_precision: dec!(0.25),
            rush_multiplier: dec!(1.3),
            same_day_multiplier: dec!(2.0),
        }
    }

    fn engine() -> PricingEngine {
        PricingEngine::new(config()).unwrap()
    }

    fn delivery(code: &str, group: DeliveryGroup, price: Decimal) -> DeliveryOption {
        DeliveryOption {
            code: code.to_string(),
            name: code.to_string(),
            group,
            price,
            requires_shipping_address: group == DeliveryGroup::Physical,
            is_mandatory: false,
            is_active: true,
        }
    }

    #[test]
    fn test_scenario_a_line_total() {
        let line = engine().price_line(&DocumentLine {
            word_count: 450,
            complexity: Complexity::Easy,
        });
        assert_eq!(line.billable_pages, dec!(2.00));
        assert_eq!(line.line_total, dec!(130.00));
    }

    #[test]
    fn test_scenario_b_rush_and_tax() {
        // 900 words = 4 pages at 50.00 → subtotal 200
        let engine = PricingEngine::new(PricingConfig {
            base_rate: dec!(50.00),
            ..config()
        })
        .unwrap();
        let input = PricingInput {
            documents: vec![DocumentLine {
                word_count: 900,
                complexity: Complexity::Easy,
            }],
            turnaround: TurnaroundSpeed::Rush,
            tax_rate: dec!(0.05),
            ..Default::default()
        };

        let totals = engine.calculate(&input).unwrap();
        assert_eq!(totals.subtotal, dec!(200));
        assert_eq!(totals.rush_fee, dec!(60));
        assert_eq!(totals.delivery_fee, Decimal::ZERO);
        assert_eq!(totals.tax_amount, dec!(13));
        assert_eq!(totals.total, dec!(273));
        assert!(!totals.manual_override);
    }

    #[test]
    fn test_billable_pages_rounds_up_and_floors() {
        let engine = engine();
        assert_eq!(engine.billable_pages(0), dec!(1));
        assert_eq!(engine.billable_pages(1), dec!(1));
        assert_eq!(engine.billable_pages(226), dec!(1.25));
        assert_eq!(engine.billable_pages(281), dec!(1.25));
        assert_eq!(engine.billable_pages(282), dec!(1.5));
    }

    #[test]
    fn test_billable_pages_invariant_sweep() {
        let configs = [
            config(),
            PricingConfig {
                words_per_page: dec!(250),
                rounding_precision: dec!(0.5),
                min_billable_pages: dec!(2),
                ..config()
            },
            PricingConfig {
                words_per_page: dec!(333),
                rounding_precision: dec!(0.1),
                min_billable_pages: dec!(0),
                ..config()
            },
        ];

        for cfg in configs {
            let engine = PricingEngine::new(cfg.clone()).unwrap();
            for word_count in (0..=20_000u32).chain([u32::MAX / 2, u32::MAX]) {
                for complexity in [Complexity::Easy, Complexity::Medium, Complexity::Hard] {
                    let line = engine.price_line(&DocumentLine { word_count, complexity });
                    assert!(
                        line.billable_pages >= cfg.min_billable_pages,
                        "{} words below minimum",
                        word_count
                    );
                    assert!(
                        is_multiple_of(line.billable_pages, cfg.rounding_precision),
                        "{} words -> {} pages not a multiple of {}",
                        word_count,
                        line.billable_pages,
                        cfg.rounding_precision
                    );
                    let raw = Decimal::from(word_count) / cfg.words_per_page;
                    assert!(line.billable_pages >= raw);
                }
            }
        }
    }

    #[test]
    fn test_calculation_is_deterministic() {
        let engine = engine();
        let input = PricingInput {
            documents: vec![
                DocumentLine { word_count: 1234, complexity: Complexity::Hard },
                DocumentLine { word_count: 77, complexity: Complexity::Medium },
            ],
            certification_prices: vec![dec!(35.00), dec!(12.50)],
            turnaround: TurnaroundSpeed::SameDay,
            delivery_options: vec![delivery("courier", DeliveryGroup::Physical, dec!(19.95))],
            tax_rate: dec!(0.13),
        };

        let first = engine.calculate(&input).unwrap();
        for _ in 0..100 {
            let again = engine.calculate(&input).unwrap();
            assert_eq!(again, first);
            assert_eq!(
                serde_json::to_string(&again).unwrap(),
                serde_json::to_string(&first).unwrap()
            );
        }
    }

    #[test]
    fn test_total_monotonic_over_subtotal() {
        let engine = engine();
        let tax_rates = [dec!(0), dec!(0.05), dec!(0.13), dec!(0.15)];
        let deliveries = [
            vec![],
            vec![delivery("email", DeliveryGroup::Digital, dec!(0))],
            vec![delivery("courier", DeliveryGroup::Physical, dec!(25))],
        ];

        for words in [0u32, 225, 999, 4500] {
            for speed in TurnaroundSpeed::ALL {
                for tax_rate in tax_rates {
                    for delivery_options in deliveries.iter() {
                        let totals = engine
                            .calculate(&PricingInput {
                                documents: vec![DocumentLine {
                                    word_count: words,
                                    complexity: Complexity::Medium,
                                }],
                                certification_prices: vec![],
                                turnaround: speed,
                                delivery_options: delivery_options.clone(),
                                tax_rate,
                            })
                            .unwrap();

                        assert!(totals.total >= totals.subtotal);
                        let all_zero = totals.rush_fee.is_zero()
                            && totals.delivery_fee.is_zero()
                            && totals.tax_amount.is_zero();
                        assert_eq!(totals.total == totals.subtotal, all_zero);
                    }
                }
            }
        }
    }

    #[test]
    fn test_delivery_fee_counts_physical_only() {
        let input = PricingInput {
            delivery_options: vec![
                delivery("email", DeliveryGroup::Digital, dec!(5)),
                delivery("courier", DeliveryGroup::Physical, dec!(20)),
            ],
            ..Default::default()
        };
        let totals = engine().calculate(&input).unwrap();
        assert_eq!(totals.delivery_fee, dec!(20));
    }

    #[test]
    fn test_no_mid_calculation_rounding() {
        // 1 page × 65 × 1.15 = 74.75; rush 0.3 → 22.425 kept exact
        let input = PricingInput {
            documents: vec![DocumentLine { word_count: 100, complexity: Complexity::Medium }],
            turnaround: TurnaroundSpeed::Rush,
            tax_rate: dec!(0.05),
            ..Default::default()
        };
        let totals = engine().calculate(&input).unwrap();
        assert_eq!(totals.rush_fee, dec!(22.425));
        assert_eq!(totals.tax_amount, dec!(4.858750));
        assert_eq!(totals.rounded().rush_fee, dec!(22.43));
        assert_eq!(totals.rounded().total, dec!(102.03));
    }

    #[test]
    fn test_manual_override_recomputes_tax_and_total() {
        let input = PricingInput {
            documents: vec![DocumentLine { word_count: 450, complexity: Complexity::Easy }],
            turnaround: TurnaroundSpeed::Rush,
            tax_rate: dec!(0.05),
            ..Default::default()
        };
        let o = PricingOverride {
            translation_total: Some(dec!(100)),
            rush_fee: Some(dec!(0)),
            reason: "loyalty discount".to_string(),
            ..Default::default()
        };

        let totals = engine().calculate_with_override(&input, Some(&o)).unwrap();
        assert!(totals.manual_override);
        assert_eq!(totals.translation_total, dec!(100));
        assert_eq!(totals.subtotal, dec!(100));
        assert_eq!(totals.rush_fee, dec!(0));
        assert_eq!(totals.tax_amount, dec!(5));
        assert_eq!(totals.total, dec!(105));
    }

    #[test]
    fn test_override_requires_reason_and_non_negative_figures() {
        let input = PricingInput::default();
        let no_reason = PricingOverride {
            translation_total: Some(dec!(1)),
            ..Default::default()
        };
        assert!(matches!(
            engine().calculate_with_override(&input, Some(&no_reason)),
            Err(PricingError::InvalidInput(_))
        ));

        let negative = PricingOverride {
            delivery_fee: Some(dec!(-1)),
            reason: "x".to_string(),
            ..Default::default()
        };
        assert!(engine().calculate_with_override(&input, Some(&negative)).is_err());
    }

    #[test]
    fn test_negative_tax_rate_rejected() {
        let input = PricingInput {
            tax_rate: dec!(-0.01),
            ..Default::default()
        };
        assert!(matches!(engine().calculate(&input), Err(PricingError::InvalidInput(_))));
    }

    #[test]
    fn test_config_validation() {
        let bad = [
            PricingConfig { words_per_page: dec!(0), ..config() },
            PricingConfig { rounding_precision: dec!(0), ..config() },
            PricingConfig { min_billable_pages: dec!(1.1), ..config() },
            PricingConfig { rush_multiplier: dec!(0.9), ..config() },
            PricingConfig { same_day_multiplier: dec!(0.5), ..config() },
            PricingConfig { base_rate: dec!(-1), ..config() },
        ];
        for cfg in bad {
            let err = PricingEngine::new(cfg).unwrap_err();
            assert!(matches!(QuoteError::from(err), QuoteError::FatalConfig(_)));
        }
    }
}
