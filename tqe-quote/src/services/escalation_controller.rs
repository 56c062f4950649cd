//! Escalation to human review
//!
//! Three triggers lead to a review: the processing countdown expiring, a
//! failed threshold check, and an explicit customer request. All of them go
//! through [`db::reviews::escalate`], so at most one review exists per quote
//! and late or duplicate triggers are no-ops.
//!
//! Countdowns are owned here, not by any client session. Each one is a
//! spawned sleep guarded by a cancellation token in a registry keyed by
//! quote id.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tqe_common::events::{EventBus, QuoteEvent};
use tqe_common::time::Clock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{self, reviews::EscalationWrite};
use crate::error::{QuoteError, QuoteResult};
use crate::models::{HitlReview, QuoteStatus, TriggerReason};
use crate::services::threshold_client::{self, ThresholdCheck, ThresholdOutcome};

/// Timing knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationSettings {
    /// How long analysis may run before a quote goes to review
    pub processing_timeout: Duration,
    /// Per-attempt bound on the threshold call
    pub threshold_timeout: Duration,
    pub threshold_attempts: u32,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            processing_timeout: Duration::from_secs(45),
            threshold_timeout: Duration::from_secs(3),
            threshold_attempts: 2,
        }
    }
}

/// What an escalation trigger did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EscalationOutcome {
    /// A new review was created and the quote moved to `hitl_pending`
    Escalated { review: HitlReview },
    /// The quote already had a review; nothing changed
    AlreadyEscalated { review: HitlReview },
    /// The quote's state does not allow this trigger
    NotApplicable { status: QuoteStatus },
}

impl EscalationOutcome {
    pub fn review(&self) -> Option<&HitlReview> {
        match self {
            EscalationOutcome::Escalated { review }
            | EscalationOutcome::AlreadyEscalated { review } => Some(review),
            EscalationOutcome::NotApplicable { .. } => None,
        }
    }

    pub fn review_id(&self) -> Option<Uuid> {
        self.review().map(|r| r.id)
    }
}

struct Countdown {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Registry {
    next_generation: u64,
    countdowns: HashMap<Uuid, Countdown>,
}

pub struct EscalationController {
    pool: SqlitePool,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    threshold: Arc<dyn ThresholdCheck>,
    settings: EscalationSettings,
    registry: Mutex<Registry>,
    shutdown: CancellationToken,
}

impl EscalationController {
    pub fn new(
        pool: SqlitePool,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
        threshold: Arc<dyn ThresholdCheck>,
        settings: EscalationSettings,
    ) -> Self {
        Self {
            pool,
            event_bus,
            clock,
            threshold,
            settings,
            registry: Mutex::new(Registry::default()),
            shutdown: CancellationToken::new(),
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start (or restart) the processing countdown for a quote
    ///
    /// The deadline is `started_at + processing_timeout`, so a countdown
    /// resumed after a restart only waits for the remainder.
    pub fn start_countdown(self: &Arc<Self>, quote_id: Uuid, started_at: DateTime<Utc>) {
        let elapsed = (self.clock.now() - started_at).to_std().unwrap_or_default();
        let remaining = self.settings.processing_timeout.saturating_sub(elapsed);
        let token = self.shutdown.child_token();

        let generation = {
            let mut registry = self.registry();
            registry.next_generation += 1;
            let generation = registry.next_generation;
            if let Some(previous) = registry.countdowns.insert(
                quote_id,
                Countdown {
                    generation,
                    token: token.clone(),
                },
            ) {
                previous.token.cancel();
            }
            generation
        };

        debug!(
            quote_id = %quote_id,
            remaining_ms = remaining.as_millis() as u64,
            "Processing countdown started"
        );

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(quote_id = %quote_id, "Processing countdown cancelled");
                }
                _ = tokio::time::sleep(remaining) => {
                    controller.forget_countdown(quote_id, generation);
                    // Detached: cancelling the countdown from here on must not abort the write
                    let escalation = Arc::clone(&controller);
                    tokio::spawn(async move {
                        if let Err(e) = escalation.on_timeout(quote_id).await {
                            warn!(quote_id = %quote_id, error = %e, "Timeout escalation failed");
                        }
                    });
                }
            }
        });
    }

    /// Cancel a pending countdown; `false` if none was running
    pub fn cancel_countdown(&self, quote_id: Uuid) -> bool {
        match self.registry().countdowns.remove(&quote_id) {
            Some(countdown) => {
                countdown.token.cancel();
                true
            }
            None => false,
        }
    }

    fn forget_countdown(&self, quote_id: Uuid, generation: u64) {
        let mut registry = self.registry();
        if registry
            .countdowns
            .get(&quote_id)
            .is_some_and(|c| c.generation == generation)
        {
            registry.countdowns.remove(&quote_id);
        }
    }

    pub fn has_countdown(&self, quote_id: Uuid) -> bool {
        self.registry().countdowns.contains_key(&quote_id)
    }

    pub fn active_countdowns(&self) -> usize {
        self.registry().countdowns.len()
    }

    /// Cancel every countdown (process shutdown)
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry().countdowns.clear();
    }

    /// Countdown expired
    pub async fn on_timeout(&self, quote_id: Uuid) -> QuoteResult<EscalationOutcome> {
        let outcome = self
            .escalate(
                quote_id,
                &[QuoteStatus::AwaitingAnalysis],
                TriggerReason::ProcessingTimeout,
                None,
            )
            .await?;

        if let EscalationOutcome::NotApplicable { status } = &outcome {
            debug!(quote_id = %quote_id, status = %status, "Countdown fired after quote left analysis");
        }
        Ok(outcome)
    }

    /// Bounded threshold evaluation; errors and timeouts count as a pass
    pub async fn check_thresholds(&self, quote_id: Uuid) -> ThresholdOutcome {
        let outcome = threshold_client::evaluate(
            self.threshold.as_ref(),
            quote_id,
            self.settings.threshold_timeout,
            self.settings.threshold_attempts,
        )
        .await;

        if let ThresholdOutcome::Unavailable(error) = &outcome {
            warn!(quote_id = %quote_id, error = %error, "Threshold service unavailable, treating as pass");
        }
        outcome
    }

    /// Threshold check failed for a quote the pipeline reported ready
    pub async fn on_threshold_failed(
        &self,
        quote_id: Uuid,
        reasons: &[String],
    ) -> QuoteResult<EscalationOutcome> {
        let note = (!reasons.is_empty()).then(|| reasons.join(", "));
        self.escalate(
            quote_id,
            &[QuoteStatus::AwaitingAnalysis],
            TriggerReason::ThresholdFailed,
            note.as_deref(),
        )
        .await
    }

    /// Customer asked for a human to look at the quote
    pub async fn request_review(
        &self,
        quote_id: Uuid,
        note: Option<&str>,
    ) -> QuoteResult<EscalationOutcome> {
        let note = note.map(str::trim).filter(|n| !n.is_empty());
        self.escalate(
            quote_id,
            &[QuoteStatus::AwaitingAnalysis, QuoteStatus::QuoteReady],
            TriggerReason::CustomerRequested,
            note,
        )
        .await
    }

    async fn escalate(
        &self,
        quote_id: Uuid,
        from: &[QuoteStatus],
        reason: TriggerReason,
        note: Option<&str>,
    ) -> QuoteResult<EscalationOutcome> {
        let now = self.clock.now();
        let write = db::reviews::escalate(&self.pool, quote_id, from, reason, note, now)
            .await
            .map_err(|e| match e {
                tqe_common::Error::NotFound(_) => QuoteError::NotFound(quote_id),
                other => other.into(),
            })?;

        match write {
            EscalationWrite::Created(review) => {
                // Whatever the trigger, the quote has left analysis
                self.cancel_countdown(quote_id);

                info!(
                    quote_id = %quote_id,
                    review_id = %review.id,
                    reason = reason.as_str(),
                    priority = ?review.priority,
                    "Quote escalated to human review"
                );
                self.event_bus.emit_lossy(QuoteEvent::EscalationCreated {
                    quote_id,
                    review_id: review.id,
                    reasons: review.reasons.iter().map(|r| r.as_str().to_string()).collect(),
                    timestamp: now,
                });
                Ok(EscalationOutcome::Escalated { review })
            }
            EscalationWrite::Existing(review) => {
                info!(
                    quote_id = %quote_id,
                    review_id = %review.id,
                    reason = reason.as_str(),
                    "Review already exists, trigger ignored"
                );
                Ok(EscalationOutcome::AlreadyEscalated { review })
            }
            EscalationWrite::Skipped(status) => Ok(EscalationOutcome::NotApplicable { status }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use crate::models::{Quote, ReviewPriority};
    use crate::services::threshold_client::AlwaysPass;
    use rust_decimal_macros::dec;
    use tqe_common::time::{FixedClock, SystemClock};

    async fn awaiting_quote(pool: &SqlitePool) -> Quote {
        let quote = Quote::new(dec!(0), 30, Utc::now());
        db::quotes::insert_quote(pool, &quote).await.unwrap();
        db::quotes::transition_status(
            pool,
            quote.id,
            &[QuoteStatus::Draft],
            QuoteStatus::AwaitingAnalysis,
            Utc::now(),
        )
        .await
        .unwrap();
        quote
    }

    fn controller(pool: SqlitePool, timeout: Duration) -> Arc<EscalationController> {
        Arc::new(EscalationController::new(
            pool,
            EventBus::new(64),
            Arc::new(SystemClock),
            Arc::new(AlwaysPass),
            EscalationSettings {
                processing_timeout: timeout,
                ..Default::default()
            },
        ))
    }

    async fn status_of(pool: &SqlitePool, id: Uuid) -> QuoteStatus {
        db::quotes::load_quote(pool, id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_timeout_twice_creates_one_review() {
        let (_dir, pool) = test_pool().await;
        let quote = awaiting_quote(&pool).await;
        let controller = controller(pool.clone(), Duration::from_secs(45));

        let first = controller.on_timeout(quote.id).await.unwrap();
        let second = controller.on_timeout(quote.id).await.unwrap();

        let EscalationOutcome::Escalated { review } = &first else {
            panic!("expected escalation, got {:?}", first);
        };
        assert_eq!(review.priority, ReviewPriority::High);
        assert_eq!(review.reasons, vec![TriggerReason::ProcessingTimeout]);
        assert!(matches!(second, EscalationOutcome::AlreadyEscalated { .. }));
        assert_eq!(first.review_id(), second.review_id());
        assert_eq!(status_of(&pool, quote.id).await, QuoteStatus::HitlPending);
    }

    #[tokio::test]
    async fn test_countdown_fires_once() {
        let (_dir, pool) = test_pool().await;
        let quote = awaiting_quote(&pool).await;
        let controller = controller(pool.clone(), Duration::from_millis(50));

        controller.start_countdown(quote.id, Utc::now());
        assert!(controller.has_countdown(quote.id));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(status_of(&pool, quote.id).await, QuoteStatus::HitlPending);
        assert!(!controller.has_countdown(quote.id));
        let review = db::reviews::load_for_quote(&pool, quote.id).await.unwrap().unwrap();
        assert_eq!(review.reasons, vec![TriggerReason::ProcessingTimeout]);
    }

    #[tokio::test]
    async fn test_cancelled_countdown_never_escalates() {
        let (_dir, pool) = test_pool().await;
        let quote = awaiting_quote(&pool).await;
        let controller = controller(pool.clone(), Duration::from_millis(50));

        controller.start_countdown(quote.id, Utc::now());
        assert!(controller.cancel_countdown(quote.id));
        assert!(!controller.cancel_countdown(quote.id));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(status_of(&pool, quote.id).await, QuoteStatus::AwaitingAnalysis);
        assert!(db::reviews::load_for_quote(&pool, quote.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resumed_countdown_waits_only_for_remainder() {
        let (_dir, pool) = test_pool().await;
        let quote = awaiting_quote(&pool).await;
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let controller = Arc::new(EscalationController::new(
            pool.clone(),
            EventBus::new(64),
            clock.clone(),
            Arc::new(AlwaysPass),
            EscalationSettings {
                processing_timeout: Duration::from_secs(45),
                ..Default::default()
            },
        ));

        // Started 45s ago: already overdue
        let started = clock.now() - chrono::Duration::seconds(45);
        controller.start_countdown(quote.id, started);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(status_of(&pool, quote.id).await, QuoteStatus::HitlPending);
    }

    #[tokio::test]
    async fn test_customer_request_on_ready_quote() {
        let (_dir, pool) = test_pool().await;
        let quote = awaiting_quote(&pool).await;
        db::quotes::transition_status(
            &pool,
            quote.id,
            &[QuoteStatus::AwaitingAnalysis],
            QuoteStatus::QuoteReady,
            Utc::now(),
        )
        .await
        .unwrap();
        let controller = controller(pool.clone(), Duration::from_secs(45));

        let outcome = controller.request_review(quote.id, Some("  urgent  ")).await.unwrap();
        let review = outcome.review().unwrap();
        assert_eq!(review.priority, ReviewPriority::Normal);
        assert_eq!(review.note.as_deref(), Some("urgent"));
        assert_eq!(status_of(&pool, quote.id).await, QuoteStatus::HitlPending);

        // Late timeout after the customer's request changes nothing
        let late = controller.on_timeout(quote.id).await.unwrap();
        assert_eq!(late.review_id(), outcome.review_id());
    }

    #[tokio::test]
    async fn test_request_review_on_draft_not_applicable() {
        let (_dir, pool) = test_pool().await;
        let quote = Quote::new(dec!(0), 30, Utc::now());
        db::quotes::insert_quote(&pool, &quote).await.unwrap();
        let controller = controller(pool.clone(), Duration::from_secs(45));

        let outcome = controller.request_review(quote.id, None).await.unwrap();
        assert_eq!(
            outcome,
            EscalationOutcome::NotApplicable {
                status: QuoteStatus::Draft
            }
        );
        assert!(matches!(
            controller.request_review(Uuid::new_v4(), None).await,
            Err(QuoteError::NotFound(_))
        ));
    }
}
