//! Quote lifecycle engine
//!
//! The engine keeps no per-quote state in memory. Every operation reloads
//! the quote by id, validates against its persisted status and writes back
//! through a version-checked update, so a session can resume from the quote
//! id alone and a restarted process picks up where the last one stopped.
//!
//! Transitions out of `awaiting_analysis` have three producers (countdown,
//! pipeline-ready handler, customer request). They never coordinate in
//! memory; the version column and the single review row decide who wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tqe_common::events::{EventBus, QuoteEvent};
use tqe_common::time::Clock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::steps::{self, StepInput};
use crate::config;
use crate::db::{self, quotes::QuoteUpdate};
use crate::error::{QuoteError, QuoteResult};
use crate::models::{
    AnalysisReport, AnalysisResult, CertificationType, DeliveryOption, FileProcessingStatus,
    HitlReview, PricingOverride, PricingSummary, ProcessingStatus, Quote, QuoteFile, QuoteStatus,
    TurnaroundSpeed,
};
use crate::services::{
    DocumentLine, Eligibility, EscalationController, EscalationOutcome, PipelineReadyHandler,
    PricingEngine, PricingInput, ProcessingMonitor, ProcessingSnapshot, ProcessingSubscription,
    SameDayRequest, ThresholdOutcome,
};

/// Result of a successful `advance`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub quote_id: Uuid,
    pub state: QuoteStatus,
    /// Rounded to cents
    pub totals: PricingSummary,
}

/// Escalation summary shown with the processing status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationView {
    pub review_id: Uuid,
    pub reasons: Vec<String>,
    pub priority: String,
    pub status: String,
}

impl From<&HitlReview> for EscalationView {
    fn from(review: &HitlReview) -> Self {
        Self {
            review_id: review.id,
            reasons: review.reasons.iter().map(|r| r.as_str().to_string()).collect(),
            priority: format!("{:?}", review.priority).to_lowercase(),
            status: format!("{:?}", review.status).to_lowercase(),
        }
    }
}

/// Answer to `get_status`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteStatusView {
    pub quote_id: Uuid,
    pub state: QuoteStatus,
    pub processing_status: ProcessingStatus,
    pub progress: u8,
    pub terminal: bool,
    pub escalation: Option<EscalationView>,
}

/// One turnaround speed as offered at checkout
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnaroundOption {
    pub speed: TurnaroundSpeed,
    pub available: bool,
    /// Rounded to cents
    pub totals: PricingSummary,
}

/// Everything needed to price a quote, loaded once per operation
struct PricingContext {
    engine: PricingEngine,
    analysis: Vec<AnalysisResult>,
    certifications: Vec<CertificationType>,
    delivery: Vec<DeliveryOption>,
}

impl PricingContext {
    fn totals(&self, quote: &Quote) -> QuoteResult<PricingSummary> {
        let input = pricing_input(quote, &self.analysis, &self.certifications, &self.delivery);
        Ok(self
            .engine
            .calculate_with_override(&input, quote.pricing_override.as_ref())?)
    }
}

/// Inputs for the pricing engine drawn from a quote and the catalog
fn pricing_input(
    quote: &Quote,
    analysis: &[AnalysisResult],
    certifications: &[CertificationType],
    delivery: &[DeliveryOption],
) -> PricingInput {
    PricingInput {
        documents: analysis
            .iter()
            .map(|a| DocumentLine {
                word_count: a.word_count,
                complexity: a.complexity,
            })
            .collect(),
        certification_prices: quote
            .certifications
            .iter()
            .filter_map(|code| certifications.iter().find(|c| &c.code == code))
            .map(|c| c.price)
            .collect(),
        turnaround: quote.turnaround,
        delivery_options: delivery
            .iter()
            .filter(|o| quote.delivery_options.contains(&o.code))
            .cloned()
            .collect(),
        tax_rate: quote.tax_rate,
    }
}

/// Same-day matrix lookup key for a quote
fn same_day_request(quote: &Quote, analysis: &[AnalysisResult]) -> SameDayRequest {
    SameDayRequest {
        source_language: quote.source_language.clone(),
        target_language: quote.target_language.clone(),
        // An unclassified document keeps the whole quote off same-day
        document_types: analysis
            .iter()
            .map(|a| a.document_type.clone().unwrap_or_default())
            .collect(),
        intended_use: quote.intended_use.clone(),
    }
}

/// Every status write goes through the lifecycle graph
fn check_edge(from: QuoteStatus, to: QuoteStatus) -> QuoteResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(QuoteError::invalid(
            "status",
            format!("a quote cannot move from {} to {}", from, to),
        ))
    }
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

pub struct QuoteLifecycleEngine {
    pool: SqlitePool,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    escalation: Arc<EscalationController>,
    monitor: ProcessingMonitor,
    /// Quotes whose pipeline-ready decision is running
    deciding: Mutex<HashSet<Uuid>>,
}

impl QuoteLifecycleEngine {
    pub fn new(
        pool: SqlitePool,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
        escalation: Arc<EscalationController>,
        monitor: ProcessingMonitor,
    ) -> Self {
        Self {
            pool,
            event_bus,
            clock,
            escalation,
            monitor,
            deciding: Mutex::new(HashSet::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn escalation(&self) -> &Arc<EscalationController> {
        &self.escalation
    }

    pub fn monitor(&self) -> &ProcessingMonitor {
        &self.monitor
    }

    // ------------------------------------------------------------------
    // Customer operations
    // ------------------------------------------------------------------

    /// Create a draft quote stamped with the configured tax rate and validity
    pub async fn create_quote(&self) -> QuoteResult<Quote> {
        let defaults = config::load_quote_defaults(&self.pool).await?;
        let quote = Quote::new(defaults.tax_rate, defaults.validity_days, self.clock.now());
        db::quotes::insert_quote(&self.pool, &quote).await?;

        info!(quote_id = %quote.id, expires_at = %quote.expires_at, "Quote created");
        Ok(quote)
    }

    /// Current quote; a quote past its validity window is expired on read
    pub async fn get_quote(&self, quote_id: Uuid) -> QuoteResult<Quote> {
        let quote = self.load(quote_id).await?;
        if !quote.is_expired_at(self.clock.now()) {
            return Ok(quote);
        }

        self.expire(quote_id).await?;
        self.load(quote_id).await
    }

    /// Validate and apply one wizard step
    ///
    /// A lost race against a concurrent writer is retried once against the
    /// fresh snapshot before surfacing as `Conflict`.
    pub async fn advance(&self, quote_id: Uuid, input: &StepInput) -> QuoteResult<StepOutcome> {
        match self.try_advance(quote_id, input).await {
            Err(QuoteError::Conflict(_)) => {
                debug!(quote_id = %quote_id, step = input.name(), "Version conflict, retrying step");
                self.try_advance(quote_id, input).await
            }
            other => other,
        }
    }

    async fn try_advance(&self, quote_id: Uuid, input: &StepInput) -> QuoteResult<StepOutcome> {
        let quote = self.get_quote(quote_id).await?;
        if quote.status == QuoteStatus::Expired {
            return Err(QuoteError::Expired(quote_id));
        }
        if !input.allowed_in(quote.status) {
            return Err(QuoteError::invalid(
                "step",
                format!("step '{}' is not allowed while the quote is {}", input.name(), quote.status),
            ));
        }

        let now = self.clock.now();
        let next = input.next_status();
        check_edge(quote.status, next)?;
        let mut update = QuoteUpdate {
            status: Some(next),
            ..QuoteUpdate::default()
        };
        let mut draft = quote.clone();

        let written = match input {
            StepInput::Documents { files } => {
                let names = steps::validate_documents(files).map_err(QuoteError::Validation)?;
                let rows: Vec<QuoteFile> = names
                    .into_iter()
                    .map(|filename| QuoteFile {
                        id: Uuid::new_v4(),
                        quote_id,
                        filename,
                        processing_status: FileProcessingStatus::Pending,
                        created_at: now,
                        updated_at: now,
                    })
                    .collect();

                db::quotes::update_fields_with_files(
                    &self.pool,
                    quote_id,
                    quote.version,
                    &update,
                    &rows,
                    now,
                )
                .await?
            }
            StepInput::Details {
                source_language,
                target_language,
                intended_use,
                certifications,
            } => {
                let catalog = db::catalog::list_certification_types(&self.pool).await?;
                let valid = steps::validate_details(
                    source_language.as_deref(),
                    target_language.as_deref(),
                    intended_use.as_deref(),
                    certifications,
                    &catalog,
                )
                .map_err(QuoteError::Validation)?;

                draft.source_language = Some(valid.source_language.clone());
                draft.target_language = Some(valid.target_language.clone());
                draft.intended_use = Some(valid.intended_use.clone());
                draft.certifications = valid.certifications.clone();
                let totals = self.pricing_context(quote_id).await?.totals(&draft)?;

                update.source_language = Some(valid.source_language);
                update.target_language = Some(valid.target_language);
                update.intended_use = Some(valid.intended_use);
                update.certifications = Some(valid.certifications);
                update.processing_status = Some(ProcessingStatus::Processing);
                update.analysis_started_at = Some(now);
                update.calculated_totals = Some(totals.clone());
                draft.calculated_totals = totals;

                db::quotes::update_fields(&self.pool, quote_id, quote.version, &update, now).await?
            }
            StepInput::Checkout {
                turnaround,
                delivery_options,
                billing_address,
                shipping_address,
            } => {
                let context = self.pricing_context(quote_id).await?;
                let eligibility = self.eligibility(&quote, &context.analysis, now).await;
                let valid = steps::validate_checkout(
                    *turnaround,
                    delivery_options,
                    billing_address.as_ref(),
                    shipping_address.as_ref(),
                    eligibility,
                    &context.delivery,
                )
                .map_err(QuoteError::Validation)?;

                let tax_rate = self.tax_rate_for(&valid.billing_address.region).await?;
                draft.turnaround = valid.turnaround;
                draft.delivery_options = valid.delivery_codes();
                draft.tax_rate = tax_rate;
                let totals = context.totals(&draft)?;

                update.turnaround = Some(valid.turnaround);
                update.delivery_options = Some(valid.delivery_codes());
                update.billing_address = Some(valid.billing_address);
                update.shipping_address = valid.shipping_address;
                update.tax_rate = Some(tax_rate);
                update.calculated_totals = Some(totals.clone());
                draft.calculated_totals = totals;

                db::quotes::update_fields(&self.pool, quote_id, quote.version, &update, now).await?
            }
            StepInput::PaymentConfirmed { payment_reference } => {
                let reference = steps::validate_payment(payment_reference.as_deref())
                    .map_err(QuoteError::Validation)?;
                update.payment_reference = Some(reference);

                db::quotes::update_fields(&self.pool, quote_id, quote.version, &update, now).await?
            }
            StepInput::Cancel { reason } => {
                update.cancellation_reason = trimmed(reason.as_deref());

                db::quotes::update_fields(&self.pool, quote_id, quote.version, &update, now).await?
            }
        };

        if !written {
            return Err(QuoteError::Conflict(quote_id));
        }

        match next {
            QuoteStatus::AwaitingAnalysis => self.escalation.start_countdown(quote_id, now),
            status if status.is_terminal() => {
                self.escalation.cancel_countdown(quote_id);
            }
            _ => {}
        }

        info!(
            quote_id = %quote_id,
            step = input.name(),
            from = %quote.status,
            to = %next,
            "Quote advanced"
        );
        self.emit_status(quote_id, quote.status, next, now);
        if draft.calculated_totals != quote.calculated_totals {
            self.emit_totals(quote_id, &draft.calculated_totals, now);
        }
        if next == QuoteStatus::AwaitingAnalysis {
            self.announce_early_ready(quote_id, now).await?;
        }

        Ok(StepOutcome {
            quote_id,
            state: next,
            totals: draft.calculated_totals.rounded(),
        })
    }

    /// Progress, pipeline status and escalation for a quote
    pub async fn get_status(&self, quote_id: Uuid) -> QuoteResult<QuoteStatusView> {
        // Expire on read first so the snapshot never shows a lapsed state
        self.get_quote(quote_id).await?;
        let snapshot = self.monitor.snapshot(quote_id).await?;
        let review = db::reviews::load_for_quote(&self.pool, quote_id).await?;

        Ok(QuoteStatusView {
            quote_id,
            state: snapshot.status,
            processing_status: snapshot.processing_status,
            progress: snapshot.progress,
            terminal: snapshot.terminal,
            escalation: review.as_ref().map(EscalationView::from),
        })
    }

    /// Customer asks for human review
    pub async fn request_review(
        &self,
        quote_id: Uuid,
        note: Option<&str>,
    ) -> QuoteResult<EscalationOutcome> {
        let quote = self.get_quote(quote_id).await?;
        if quote.status == QuoteStatus::Expired {
            return Err(QuoteError::Expired(quote_id));
        }

        match self.escalation.request_review(quote_id, note).await? {
            EscalationOutcome::NotApplicable { status } => Err(QuoteError::invalid(
                "status",
                format!("review cannot be requested while the quote is {}", status),
            )),
            outcome => Ok(outcome),
        }
    }

    /// Every turnaround speed with its eligibility and priced totals
    pub async fn turnaround_options(&self, quote_id: Uuid) -> QuoteResult<Vec<TurnaroundOption>> {
        let quote = self.get_quote(quote_id).await?;
        if quote.status == QuoteStatus::Expired {
            return Err(QuoteError::Expired(quote_id));
        }

        let context = self.pricing_context(quote_id).await?;
        let eligibility = self.eligibility(&quote, &context.analysis, self.clock.now()).await;

        TurnaroundSpeed::ALL
            .iter()
            .map(|&speed| -> QuoteResult<TurnaroundOption> {
                let priced = Quote {
                    turnaround: speed,
                    ..quote.clone()
                };
                Ok(TurnaroundOption {
                    speed,
                    available: eligibility.allows(speed),
                    totals: context.totals(&priced)?.rounded(),
                })
            })
            .collect()
    }

    /// Totals recomputed from the stored inputs, without writing them
    pub async fn recompute_totals(&self, quote_id: Uuid) -> QuoteResult<PricingSummary> {
        let quote = self.load(quote_id).await?;
        self.pricing_context(quote_id).await?.totals(&quote)
    }

    /// Live processing snapshots for one quote
    pub async fn subscribe(&self, quote_id: Uuid) -> QuoteResult<ProcessingSubscription> {
        self.load(quote_id).await?;
        Ok(self.monitor.subscribe(quote_id))
    }

    // ------------------------------------------------------------------
    // Staff operations
    // ------------------------------------------------------------------

    /// Replace computed figures with staff-supplied ones
    ///
    /// Allowed until checkout completes. Tax and total are recomputed.
    pub async fn apply_override(
        &self,
        quote_id: Uuid,
        pricing_override: &PricingOverride,
    ) -> QuoteResult<PricingSummary> {
        if pricing_override.reason.trim().is_empty() {
            return Err(QuoteError::invalid("reason", "required"));
        }

        for attempt in 0..2 {
            let quote = self.get_quote(quote_id).await?;
            if quote.status == QuoteStatus::Expired {
                return Err(QuoteError::Expired(quote_id));
            }
            if quote.is_terminal() || quote.status == QuoteStatus::AwaitingPayment {
                return Err(QuoteError::invalid(
                    "status",
                    format!("pricing cannot be overridden while the quote is {}", quote.status),
                ));
            }

            let draft = Quote {
                pricing_override: Some(pricing_override.clone()),
                ..quote.clone()
            };
            let totals = self.pricing_context(quote_id).await?.totals(&draft)?;
            let update = QuoteUpdate {
                pricing_override: Some(pricing_override.clone()),
                calculated_totals: Some(totals.clone()),
                ..QuoteUpdate::default()
            };

            let now = self.clock.now();
            if db::quotes::update_fields(&self.pool, quote_id, quote.version, &update, now).await? {
                info!(
                    quote_id = %quote_id,
                    reason = %pricing_override.reason,
                    total = %totals.total,
                    "Pricing override applied"
                );
                self.emit_totals(quote_id, &totals, now);
                return Ok(totals.rounded());
            }
            debug!(quote_id = %quote_id, attempt, "Version conflict applying override");
        }

        Err(QuoteError::Conflict(quote_id))
    }

    /// Close the quote's review and return it to `quote_ready`
    pub async fn resolve_review(&self, quote_id: Uuid) -> QuoteResult<Quote> {
        for attempt in 0..2 {
            let quote = self.get_quote(quote_id).await?;
            if quote.status != QuoteStatus::HitlPending {
                return Err(QuoteError::invalid(
                    "status",
                    format!("quote is {}, not under review", quote.status),
                ));
            }

            check_edge(quote.status, QuoteStatus::QuoteReady)?;

            let totals = self.pricing_context(quote_id).await?.totals(&quote)?;
            let update = QuoteUpdate {
                status: Some(QuoteStatus::QuoteReady),
                calculated_totals: Some(totals.clone()),
                ..QuoteUpdate::default()
            };

            let now = self.clock.now();
            if db::quotes::update_fields(&self.pool, quote_id, quote.version, &update, now).await? {
                if !db::reviews::resolve(&self.pool, quote_id, now).await? {
                    warn!(quote_id = %quote_id, "Quote left review without an open review record");
                }
                info!(quote_id = %quote_id, "Review resolved, quote ready");
                self.emit_status(quote_id, quote.status, QuoteStatus::QuoteReady, now);
                if totals != quote.calculated_totals {
                    self.emit_totals(quote_id, &totals, now);
                }
                return self.load(quote_id).await;
            }
            debug!(quote_id = %quote_id, attempt, "Version conflict resolving review");
        }

        Err(QuoteError::Conflict(quote_id))
    }

    /// Expire every non-terminal quote past its validity window
    pub async fn expire_stale(&self) -> QuoteResult<usize> {
        let ids = db::quotes::list_expired_ids(&self.pool, self.clock.now()).await?;
        let mut expired = 0;
        for quote_id in ids {
            if self.expire(quote_id).await? {
                expired += 1;
            }
        }

        if expired > 0 {
            info!(count = expired, "Expired stale quotes");
        }
        Ok(expired)
    }

    /// Restart countdowns for quotes still waiting on analysis
    ///
    /// Each countdown only waits for what is left of its window.
    pub async fn resume_countdowns(&self) -> QuoteResult<usize> {
        let waiting = db::quotes::list_awaiting_analysis(&self.pool).await?;
        let count = waiting.len();
        for (quote_id, started_at) in waiting {
            let started_at = started_at.unwrap_or_else(|| self.clock.now());
            self.escalation.start_countdown(quote_id, started_at);
        }

        if count > 0 {
            info!(count, "Resumed processing countdowns");
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Pipeline writes
    // ------------------------------------------------------------------

    pub async fn record_file_status(
        &self,
        file_id: Uuid,
        status: FileProcessingStatus,
    ) -> QuoteResult<QuoteFile> {
        let file = self.load_file(file_id).await?;
        let now = self.clock.now();
        db::files::set_file_status(&self.pool, file_id, status, now).await?;

        debug!(quote_id = %file.quote_id, file_id = %file_id, status = ?status, "File status recorded");
        self.event_bus.emit_lossy(QuoteEvent::FileStatusChanged {
            quote_id: file.quote_id,
            file_id,
            processing_status: format!("{:?}", status).to_lowercase(),
            timestamp: now,
        });

        Ok(QuoteFile {
            processing_status: status,
            updated_at: now,
            ..file
        })
    }

    /// Store a file's analysis, pricing the line at write time
    ///
    /// The first result for a file wins; returns whether this call stored it.
    pub async fn record_analysis(
        &self,
        file_id: Uuid,
        report: &AnalysisReport,
    ) -> QuoteResult<(AnalysisResult, bool)> {
        let file = self.load_file(file_id).await?;
        let engine = PricingEngine::new(config::load_pricing_config(&self.pool).await?)?;
        let line = engine.price_line(&DocumentLine {
            word_count: report.word_count,
            complexity: report.complexity,
        });

        let now = self.clock.now();
        let result = AnalysisResult {
            id: Uuid::new_v4(),
            file_id,
            quote_id: file.quote_id,
            detected_language: trimmed(report.detected_language.as_deref()),
            document_type: trimmed(report.document_type.as_deref()),
            complexity: report.complexity,
            word_count: report.word_count,
            page_count: report.page_count,
            billable_pages: line.billable_pages,
            line_total: line.line_total,
            created_at: now,
        };

        if !db::files::insert_analysis_if_absent(&self.pool, &result).await? {
            debug!(file_id = %file_id, "Analysis already recorded, ignoring");
            let existing = db::files::list_analysis(&self.pool, file.quote_id)
                .await?
                .into_iter()
                .find(|a| a.file_id == file_id)
                .unwrap_or(result);
            // A retried callback still heals totals a lost race left stale
            self.refresh_totals(file.quote_id).await?;
            return Ok((existing, false));
        }

        db::files::set_file_status(&self.pool, file_id, FileProcessingStatus::Complete, now).await?;
        info!(
            quote_id = %file.quote_id,
            file_id = %file_id,
            word_count = result.word_count,
            billable_pages = %result.billable_pages,
            "Analysis recorded"
        );
        self.event_bus.emit_lossy(QuoteEvent::AnalysisRecorded {
            quote_id: file.quote_id,
            file_id,
            timestamp: now,
        });
        self.refresh_totals(file.quote_id).await?;

        Ok((result, true))
    }

    /// Quote-level pipeline status
    ///
    /// `ready` is picked up by the pipeline watcher; `failed` leaves the
    /// quote to its countdown.
    pub async fn record_pipeline_status(
        &self,
        quote_id: Uuid,
        status: ProcessingStatus,
    ) -> QuoteResult<ProcessingSnapshot> {
        if status == ProcessingStatus::Pending {
            return Err(QuoteError::invalid(
                "processing_status",
                "pipeline may report processing, ready or failed",
            ));
        }

        let now = self.clock.now();
        if !db::quotes::set_processing_status(&self.pool, quote_id, status, now).await? {
            return Err(QuoteError::NotFound(quote_id));
        }

        match status {
            ProcessingStatus::Failed => {
                warn!(quote_id = %quote_id, "Pipeline reported failure, waiting for countdown")
            }
            _ => info!(quote_id = %quote_id, status = status.as_str(), "Pipeline status recorded"),
        }
        self.event_bus.emit_lossy(QuoteEvent::PipelineStatusChanged {
            quote_id,
            processing_status: status.as_str().to_string(),
            timestamp: now,
        });

        self.monitor.snapshot(quote_id).await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn load(&self, quote_id: Uuid) -> QuoteResult<Quote> {
        db::quotes::load_quote(&self.pool, quote_id)
            .await?
            .ok_or(QuoteError::NotFound(quote_id))
    }

    async fn load_file(&self, file_id: Uuid) -> QuoteResult<QuoteFile> {
        db::files::load_file(&self.pool, file_id).await?.ok_or_else(|| {
            QuoteError::Store(tqe_common::Error::NotFound(format!("File {}", file_id)))
        })
    }

    /// Move a quote to `expired`; `false` if it was already terminal
    async fn expire(&self, quote_id: Uuid) -> QuoteResult<bool> {
        let Some(quote) = db::quotes::load_quote(&self.pool, quote_id).await? else {
            return Ok(false);
        };
        let now = self.clock.now();
        let from: Vec<QuoteStatus> = QuoteStatus::NON_TERMINAL
            .into_iter()
            .filter(|s| s.can_transition_to(QuoteStatus::Expired))
            .collect();
        let moved =
            db::quotes::transition_status(&self.pool, quote_id, &from, QuoteStatus::Expired, now)
                .await?;

        if moved {
            self.escalation.cancel_countdown(quote_id);
            info!(quote_id = %quote_id, from = %quote.status, "Quote expired");
            self.emit_status(quote_id, quote.status, QuoteStatus::Expired, now);
        }
        Ok(moved)
    }

    async fn pricing_context(&self, quote_id: Uuid) -> QuoteResult<PricingContext> {
        let engine = PricingEngine::new(config::load_pricing_config(&self.pool).await?)?;
        Ok(PricingContext {
            engine,
            analysis: db::files::list_analysis(&self.pool, quote_id).await?,
            certifications: db::catalog::list_certification_types(&self.pool).await?,
            delivery: db::catalog::list_delivery_options(&self.pool).await?,
        })
    }

    /// Re-price a live quote after its documents changed
    async fn refresh_totals(&self, quote_id: Uuid) -> QuoteResult<()> {
        for attempt in 0..2 {
            let quote = self.load(quote_id).await?;
            if quote.is_terminal() {
                return Ok(());
            }

            let totals = self.pricing_context(quote_id).await?.totals(&quote)?;
            if totals == quote.calculated_totals {
                return Ok(());
            }
            let update = QuoteUpdate {
                calculated_totals: Some(totals.clone()),
                ..QuoteUpdate::default()
            };

            let now = self.clock.now();
            if db::quotes::update_fields(&self.pool, quote_id, quote.version, &update, now).await? {
                debug!(quote_id = %quote_id, total = %totals.total, "Totals recalculated after analysis");
                self.emit_totals(quote_id, &totals, now);
                return Ok(());
            }
            debug!(quote_id = %quote_id, attempt, "Version conflict recalculating totals");
        }

        Err(QuoteError::Conflict(quote_id))
    }

    /// The pipeline may finish before the customer submits details; its
    /// `ready` is re-announced so the watcher decides without waiting a poll
    async fn announce_early_ready(&self, quote_id: Uuid, now: DateTime<Utc>) -> QuoteResult<()> {
        let quote = self.load(quote_id).await?;
        if quote.status == QuoteStatus::AwaitingAnalysis
            && quote.processing_status == ProcessingStatus::Ready
        {
            info!(quote_id = %quote_id, "Pipeline already reported ready");
            self.event_bus.emit_lossy(QuoteEvent::PipelineStatusChanged {
                quote_id,
                processing_status: ProcessingStatus::Ready.as_str().to_string(),
                timestamp: now,
            });
        }
        Ok(())
    }

    /// Offerable speeds; any failure falls back to standard only
    async fn eligibility(
        &self,
        quote: &Quote,
        analysis: &[AnalysisResult],
        now: DateTime<Utc>,
    ) -> Eligibility {
        match config::load_eligibility_resolver(&self.pool).await {
            Ok(resolver) => resolver.evaluate(now, &same_day_request(quote, analysis)),
            Err(e) => {
                error!(quote_id = %quote.id, error = %e, "Eligibility configuration unusable, offering standard only");
                Eligibility::standard_only()
            }
        }
    }

    /// Regional rate when configured, else the default
    async fn tax_rate_for(&self, region: &str) -> QuoteResult<Decimal> {
        match db::catalog::tax_rate_for_region(&self.pool, region).await? {
            Some(rate) => Ok(rate),
            None => Ok(config::load_quote_defaults(&self.pool).await?.tax_rate),
        }
    }

    fn emit_status(&self, quote_id: Uuid, old: QuoteStatus, new: QuoteStatus, now: DateTime<Utc>) {
        self.event_bus.emit_lossy(QuoteEvent::QuoteStatusChanged {
            quote_id,
            old_status: old.as_str().to_string(),
            new_status: new.as_str().to_string(),
            timestamp: now,
        });
    }

    fn emit_totals(&self, quote_id: Uuid, totals: &PricingSummary, now: DateTime<Utc>) {
        self.event_bus.emit_lossy(QuoteEvent::TotalsRecalculated {
            quote_id,
            total: totals.total,
            manual_override: totals.manual_override,
            timestamp: now,
        });
    }

    fn begin_decision(&self, quote_id: Uuid) -> bool {
        self.deciding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(quote_id)
    }

    fn end_decision(&self, quote_id: Uuid) {
        self.deciding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&quote_id);
    }

    /// Pipeline said ready: threshold check, then review or `quote_ready`
    async fn decide_ready(&self, quote_id: Uuid) -> QuoteResult<()> {
        let quote = self.load(quote_id).await?;
        if quote.status != QuoteStatus::AwaitingAnalysis
            || quote.processing_status != ProcessingStatus::Ready
        {
            debug!(quote_id = %quote_id, status = %quote.status, "Ready signal no longer applies");
            return Ok(());
        }

        if let ThresholdOutcome::Failed(reasons) = self.escalation.check_thresholds(quote_id).await {
            self.escalation.on_threshold_failed(quote_id, &reasons).await?;
            return Ok(());
        }

        for attempt in 0..2 {
            // Reload: the countdown or a customer request may have moved it meanwhile
            let quote = self.load(quote_id).await?;
            if quote.status != QuoteStatus::AwaitingAnalysis {
                debug!(quote_id = %quote_id, status = %quote.status, "Quote left analysis during threshold check");
                return Ok(());
            }
            check_edge(quote.status, QuoteStatus::QuoteReady)?;

            let totals = self.pricing_context(quote_id).await?.totals(&quote)?;
            let update = QuoteUpdate {
                status: Some(QuoteStatus::QuoteReady),
                calculated_totals: Some(totals.clone()),
                ..QuoteUpdate::default()
            };

            let now = self.clock.now();
            if db::quotes::update_fields(&self.pool, quote_id, quote.version, &update, now).await? {
                self.escalation.cancel_countdown(quote_id);
                info!(quote_id = %quote_id, total = %totals.total, "Analysis complete, quote ready");
                self.emit_status(quote_id, QuoteStatus::AwaitingAnalysis, QuoteStatus::QuoteReady, now);
                self.emit_totals(quote_id, &totals, now);
                return Ok(());
            }
            debug!(quote_id = %quote_id, attempt, "Version conflict moving quote to ready");
        }

        Err(QuoteError::Conflict(quote_id))
    }
}

#[async_trait]
impl PipelineReadyHandler for QuoteLifecycleEngine {
    async fn on_pipeline_ready(&self, quote_id: Uuid) {
        // Push and poll can both fire for the same quote
        if !self.begin_decision(quote_id) {
            debug!(quote_id = %quote_id, "Ready decision already running");
            return;
        }

        let result = self.decide_ready(quote_id).await;
        self.end_decision(quote_id);

        if let Err(e) = result {
            warn!(quote_id = %quote_id, error = %e, "Pipeline ready handling failed");
        }
    }
}
