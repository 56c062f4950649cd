//! Quote services
//!
//! Pricing and eligibility are synchronous and pure. Monitoring, threshold
//! checks and escalation talk to the store, the EventBus or the network.

pub mod eligibility_resolver;
pub mod escalation_controller;
pub mod pricing_engine;
pub mod processing_monitor;
pub mod threshold_client;

pub use eligibility_resolver::{Eligibility, EligibilityConfig, EligibilityResolver, SameDayRequest};
pub use escalation_controller::{EscalationController, EscalationOutcome, EscalationSettings};
pub use pricing_engine::{DocumentLine, PricingConfig, PricingEngine, PricingError, PricingInput};
pub use processing_monitor::{
    progress, PipelineReadyHandler, PipelineWatcher, ProcessingMonitor, ProcessingSnapshot,
    ProcessingSubscription,
};
pub use threshold_client::{
    AlwaysPass, HttpThresholdCheck, ThresholdCheck, ThresholdOutcome, ThresholdVerdict,
};
