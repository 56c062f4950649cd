//! Threshold-check client
//!
//! Business-rule check run once the pipeline reports a quote ready. The
//! check may send a quote to human review, but it is never allowed to block
//! one: timeouts and errors count as a pass.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// What the threshold service answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdVerdict {
    pub passed: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl ThresholdVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reasons: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ThresholdError {
    #[error("Threshold request failed: {0}")]
    Request(String),

    #[error("Threshold service returned HTTP {0}")]
    Status(u16),

    #[error("Threshold check timed out after {0:?}")]
    Timeout(Duration),
}

/// Threshold-check capability, chosen once at startup
#[async_trait]
pub trait ThresholdCheck: Send + Sync {
    async fn check(&self, quote_id: Uuid) -> Result<ThresholdVerdict, ThresholdError>;
}

/// Used when no threshold service is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPass;

#[async_trait]
impl ThresholdCheck for AlwaysPass {
    async fn check(&self, _quote_id: Uuid) -> Result<ThresholdVerdict, ThresholdError> {
        Ok(ThresholdVerdict::pass())
    }
}

/// `POST {url}` with `{"quote_id": …}` → `{passed, reasons}`
pub struct HttpThresholdCheck {
    http_client: Client,
    url: String,
}

impl HttpThresholdCheck {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            url: url.into(),
        }
    }
}

#[derive(Serialize)]
struct ThresholdRequest {
    quote_id: Uuid,
}

#[async_trait]
impl ThresholdCheck for HttpThresholdCheck {
    async fn check(&self, quote_id: Uuid) -> Result<ThresholdVerdict, ThresholdError> {
        let response = self
            .http_client
            .post(&self.url)
            .json(&ThresholdRequest { quote_id })
            .send()
            .await
            .map_err(|e| ThresholdError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ThresholdError::Status(status.as_u16()));
        }

        response
            .json::<ThresholdVerdict>()
            .await
            .map_err(|e| ThresholdError::Request(format!("Invalid threshold response: {}", e)))
    }
}

/// Result of a bounded threshold evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThresholdOutcome {
    Passed,
    Failed(Vec<String>),
    /// Every attempt errored or timed out; callers treat this as a pass
    Unavailable(String),
}

/// Run the check with a per-attempt timeout and a bounded number of attempts
pub async fn evaluate(
    check: &dyn ThresholdCheck,
    quote_id: Uuid,
    timeout: Duration,
    max_attempts: u32,
) -> ThresholdOutcome {
    let attempts = max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        let result = match tokio::time::timeout(timeout, check.check(quote_id)).await {
            Ok(result) => result,
            Err(_) => Err(ThresholdError::Timeout(timeout)),
        };

        match result {
            Ok(verdict) if verdict.passed => {
                debug!(quote_id = %quote_id, attempt, "Threshold check passed");
                return ThresholdOutcome::Passed;
            }
            Ok(verdict) => {
                debug!(quote_id = %quote_id, reasons = ?verdict.reasons, "Threshold check failed");
                return ThresholdOutcome::Failed(verdict.reasons);
            }
            Err(e) => {
                warn!(quote_id = %quote_id, attempt, max_attempts = attempts, error = %e, "Threshold check attempt failed");
                last_error = e.to_string();
            }
        }
    }

    ThresholdOutcome::Unavailable(last_error)
}
