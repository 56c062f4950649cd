//! Event types for the TQE change-notification stream
//!
//! Every persisted change to a quote (or its files, analysis results, or
//! review record) is announced on the [`EventBus`]. Consumers use the
//! stream as a *hint* to re-read the store: events may be duplicated,
//! reordered, or lost to lag, so nothing may treat an event as the source
//! of truth.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

/// Quote change events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QuoteEvent {
    /// Lifecycle status moved
    QuoteStatusChanged {
        quote_id: Uuid,
        old_status: String,
        new_status: String,
        timestamp: DateTime<Utc>,
    },

    /// Pipeline set a per-file processing status
    FileStatusChanged {
        quote_id: Uuid,
        file_id: Uuid,
        processing_status: String,
        timestamp: DateTime<Utc>,
    },

    /// Pipeline wrote an analysis result for a file
    AnalysisRecorded {
        quote_id: Uuid,
        file_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Pipeline set the quote-level processing status
    PipelineStatusChanged {
        quote_id: Uuid,
        processing_status: String,
        timestamp: DateTime<Utc>,
    },

    /// Persisted totals were recomputed
    TotalsRecalculated {
        quote_id: Uuid,
        total: Decimal,
        manual_override: bool,
        timestamp: DateTime<Utc>,
    },

    /// A human review record was created
    EscalationCreated {
        quote_id: Uuid,
        review_id: Uuid,
        reasons: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl QuoteEvent {
    /// Quote the event belongs to
    pub fn quote_id(&self) -> Uuid {
        match self {
            QuoteEvent::QuoteStatusChanged { quote_id, .. }
            | QuoteEvent::FileStatusChanged { quote_id, .. }
            | QuoteEvent::AnalysisRecorded { quote_id, .. }
            | QuoteEvent::PipelineStatusChanged { quote_id, .. }
            | QuoteEvent::TotalsRecalculated { quote_id, .. }
            | QuoteEvent::EscalationCreated { quote_id, .. } => *quote_id,
        }
    }
}

/// What a filtered subscriber observes
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A change for the subscribed quote
    Changed(QuoteEvent),
    /// The subscriber fell behind and `n` events were dropped; re-read the store
    Missed(u64),
}

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`: publishing never blocks, slow
/// subscribers observe a lag instead of stalling producers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QuoteEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<QuoteEvent> {
        self.tx.subscribe()
    }

    /// Subscribe to future events of a single quote
    pub fn subscribe_quote(&self, quote_id: Uuid) -> QuoteEventReceiver {
        QuoteEventReceiver {
            quote_id,
            rx: self.tx.subscribe(),
        }
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: QuoteEvent) {
        let _ = self.tx.send(event);
    }
}

/// Receiver filtered to one quote id
pub struct QuoteEventReceiver {
    quote_id: Uuid,
    rx: broadcast::Receiver<QuoteEvent>,
}

impl QuoteEventReceiver {
    /// Next notification for this quote; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.quote_id() == self.quote_id => {
                    return Some(Notification::Changed(event));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(quote_id = %self.quote_id, missed = n, "Quote event subscriber lagged");
                    return Some(Notification::Missed(n));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
