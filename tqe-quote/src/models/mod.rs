//! Data models for the quote service

pub mod catalog;
pub mod file;
pub mod pricing;
pub mod quote;
pub mod review;

pub use catalog::{CertificationType, DeliveryGroup, DeliveryOption, EligibilityRule};
pub use file::{AnalysisReport, AnalysisResult, Complexity, FileProcessingStatus, QuoteFile};
pub use pricing::{PricingOverride, PricingSummary};
pub use quote::{Address, ProcessingStatus, Quote, QuoteStatus, TurnaroundSpeed};
pub use review::{HitlReview, ReviewPriority, ReviewStatus, TriggerReason};
