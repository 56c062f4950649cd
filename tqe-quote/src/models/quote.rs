//! Quote aggregate and lifecycle state machine
//!
//! DRAFT → DETAILS_PENDING → AWAITING_ANALYSIS → {QUOTE_READY | HITL_PENDING}
//! → AWAITING_PAYMENT → COMPLETED, with EXPIRED / CANCELLED reachable from
//! every non-terminal state.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{PricingOverride, PricingSummary};

/// Quote lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    /// Created, no documents yet
    Draft,
    /// Documents uploaded, waiting for language pair / intended use
    DetailsPending,
    /// Waiting on the analysis pipeline
    AwaitingAnalysis,
    /// Priced and ready for checkout
    QuoteReady,
    /// Handed to human review
    HitlPending,
    /// Checkout complete, waiting on the payment processor
    AwaitingPayment,
    Completed,
    Cancelled,
    Expired,
}

impl QuoteStatus {
    pub const TERMINAL: [QuoteStatus; 3] =
        [QuoteStatus::Completed, QuoteStatus::Cancelled, QuoteStatus::Expired];

    pub const NON_TERMINAL: [QuoteStatus; 6] = [
        QuoteStatus::Draft,
        QuoteStatus::DetailsPending,
        QuoteStatus::AwaitingAnalysis,
        QuoteStatus::QuoteReady,
        QuoteStatus::HitlPending,
        QuoteStatus::AwaitingPayment,
    ];

    /// Whether this is a terminal state (no further transitions allowed)
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QuoteStatus::Completed | QuoteStatus::Cancelled | QuoteStatus::Expired
        )
    }

    /// Legal edges of the lifecycle graph
    ///
    /// ```text
    /// Draft            → DetailsPending
    /// DetailsPending   → AwaitingAnalysis
    /// AwaitingAnalysis → QuoteReady | HitlPending
    /// QuoteReady       → AwaitingPayment | HitlPending
    /// HitlPending      → QuoteReady
    /// AwaitingPayment  → Completed
    /// (non-terminal)   → Cancelled | Expired
    /// ```
    pub fn can_transition_to(self, next: QuoteStatus) -> bool {
        use QuoteStatus::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Cancelled | Expired) {
            return true;
        }

        matches!(
            (self, next),
            (Draft, DetailsPending)
                | (DetailsPending, AwaitingAnalysis)
                | (AwaitingAnalysis, QuoteReady)
                | (AwaitingAnalysis, HitlPending)
                | (QuoteReady, AwaitingPayment)
                | (QuoteReady, HitlPending)
                | (HitlPending, QuoteReady)
                | (AwaitingPayment, Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuoteStatus::Draft => "draft",
            QuoteStatus::DetailsPending => "details_pending",
            QuoteStatus::AwaitingAnalysis => "awaiting_analysis",
            QuoteStatus::QuoteReady => "quote_ready",
            QuoteStatus::HitlPending => "hitl_pending",
            QuoteStatus::AwaitingPayment => "awaiting_payment",
            QuoteStatus::Completed => "completed",
            QuoteStatus::Cancelled => "cancelled",
            QuoteStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quote-level pipeline status, written only by the analysis pipeline
/// (and set to `processing` when the quote enters analysis)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl ProcessingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingStatus::Ready | ProcessingStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Ready => "ready",
            ProcessingStatus::Failed => "failed",
        }
    }
}

/// Turnaround speed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnaroundSpeed {
    #[default]
    Standard,
    Rush,
    SameDay,
}

impl TurnaroundSpeed {
    pub const ALL: [TurnaroundSpeed; 3] = [
        TurnaroundSpeed::Standard,
        TurnaroundSpeed::Rush,
        TurnaroundSpeed::SameDay,
    ];
}

/// Postal address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    #[serde(default)]
    pub city: String,
    /// Province / state code; also selects the tax rate
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub country: String,
}

impl Address {
    /// Required fields that are blank
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let required = [
            ("name", &self.name),
            ("line1", &self.line1),
            ("city", &self.city),
            ("region", &self.region),
            ("postal_code", &self.postal_code),
            ("country", &self.country),
        ];

        required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| *field)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

/// Quote aggregate root
///
/// Everything a workflow step needs is here, so an engine can resume a
/// session from the quote id alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: Uuid,
    pub status: QuoteStatus,
    pub processing_status: ProcessingStatus,
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub intended_use: Option<String>,
    /// Selected certification type codes
    pub certifications: Vec<String>,
    pub turnaround: TurnaroundSpeed,
    /// Selected delivery option codes (mandatory options included)
    pub delivery_options: Vec<String>,
    pub billing_address: Option<Address>,
    pub shipping_address: Option<Address>,
    pub tax_rate: Decimal,
    /// Cache of the last pricing run; always re-derivable from the inputs
    pub calculated_totals: PricingSummary,
    pub pricing_override: Option<PricingOverride>,
    pub analysis_started_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Optimistic concurrency counter, bumped by every field-scoped update
    pub version: i64,
}

impl Quote {
    /// New draft quote
    pub fn new(tax_rate: Decimal, validity_days: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: QuoteStatus::Draft,
            processing_status: ProcessingStatus::Pending,
            source_language: None,
            target_language: None,
            intended_use: None,
            certifications: Vec::new(),
            turnaround: TurnaroundSpeed::Standard,
            delivery_options: Vec::new(),
            billing_address: None,
            shipping_address: None,
            tax_rate,
            calculated_totals: PricingSummary::zero(tax_rate),
            pricing_override: None,
            analysis_started_at: None,
            payment_reference: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::days(validity_days),
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && now >= self.expires_at
    }
}
