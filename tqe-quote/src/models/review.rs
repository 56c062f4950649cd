//! Human-in-the-loop review (escalation) records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a quote was escalated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    ProcessingTimeout,
    CustomerRequested,
    ThresholdFailed,
}

impl TriggerReason {
    /// Timeouts outrank every other reason
    pub fn priority(self) -> ReviewPriority {
        match self {
            TriggerReason::ProcessingTimeout => ReviewPriority::High,
            TriggerReason::CustomerRequested | TriggerReason::ThresholdFailed => {
                ReviewPriority::Normal
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerReason::ProcessingTimeout => "processing_timeout",
            TriggerReason::CustomerRequested => "customer_requested",
            TriggerReason::ThresholdFailed => "threshold_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPriority {
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Open,
    Resolved,
}

/// Escalation record; at most one per quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitlReview {
    pub id: Uuid,
    pub quote_id: Uuid,
    pub reasons: Vec<TriggerReason>,
    pub priority: ReviewPriority,
    pub note: Option<String>,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_has_highest_priority() {
        assert!(TriggerReason::ProcessingTimeout.priority() > TriggerReason::ThresholdFailed.priority());
        assert!(TriggerReason::ProcessingTimeout.priority() > TriggerReason::CustomerRequested.priority());
    }

    #[test]
    fn test_reason_wire_names() {
        for reason in [
            TriggerReason::ProcessingTimeout,
            TriggerReason::CustomerRequested,
            TriggerReason::ThresholdFailed,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }
}
