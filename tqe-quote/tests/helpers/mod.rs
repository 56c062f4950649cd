//! Shared fixtures for tqe-quote integration tests
//!
//! Builds an engine over a temporary database seeded with a small catalog
//! and a fixed clock on a Wednesday morning (UTC reference timezone).

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tqe_common::events::EventBus;
use tqe_common::time::FixedClock;
use uuid::Uuid;

use tqe_quote::config as keys;
use tqe_quote::db::{self, catalog};
use tqe_quote::models::{
    AnalysisReport, CertificationType, Complexity, DeliveryGroup, DeliveryOption,
    ProcessingStatus, QuoteFile, QuoteStatus,
};
use tqe_quote::services::{
    AlwaysPass, EscalationController, EscalationSettings, ProcessingMonitor, ThresholdCheck,
};
use tqe_quote::workflow::{FileUpload, QuoteLifecycleEngine, StepInput};

pub struct Harness {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub clock: Arc<FixedClock>,
    pub event_bus: EventBus,
    pub engine: Arc<QuoteLifecycleEngine>,
}

/// 2026-10-14 is a Wednesday
pub fn wednesday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 14, 10, 0, 0).unwrap()
}

pub fn quick_settings() -> EscalationSettings {
    EscalationSettings {
        processing_timeout: Duration::from_secs(60),
        threshold_timeout: Duration::from_millis(100),
        threshold_attempts: 1,
    }
}

pub async fn seed_catalog(pool: &SqlitePool) {
    let settings = [
        (keys::BASE_RATE, "65.00"),
        (keys::WORDS_PER_PAGE, "225"),
        (keys::MIN_BILLABLE_PAGES, "1"),
        (keys::ROUNDING_PRECISION, "0.25"),
        (keys::RUSH_MULTIPLIER, "1.3"),
        (keys::SAME_DAY_MULTIPLIER, "1.5"),
        (keys::RUSH_CUTOFF, "16:00"),
        (keys::SAME_DAY_CUTOFF, "11:00"),
        (keys::REFERENCE_UTC_OFFSET_MINUTES, "0"),
        (keys::DEFAULT_TAX_RATE, "0"),
        (keys::QUOTE_VALIDITY_DAYS, "30"),
    ];
    for (key, value) in settings {
        catalog::set_setting(pool, key, value).await.unwrap();
    }

    catalog::upsert_certification_type(
        pool,
        &CertificationType {
            code: "notarized".to_string(),
            name: "Notarized".to_string(),
            price: dec!(25.00),
            is_active: true,
        },
    )
    .await
    .unwrap();

    catalog::upsert_delivery_option(
        pool,
        &DeliveryOption {
            code: "email".to_string(),
            name: "Email".to_string(),
            group: DeliveryGroup::Digital,
            price: dec!(0),
            requires_shipping_address: false,
            is_mandatory: false,
            is_active: true,
        },
        1,
    )
    .await
    .unwrap();
    catalog::upsert_delivery_option(
        pool,
        &DeliveryOption {
            code: "courier".to_string(),
            name: "Courier".to_string(),
            group: DeliveryGroup::Physical,
            price: dec!(20.00),
            requires_shipping_address: true,
            is_mandatory: false,
            is_active: true,
        },
        2,
    )
    .await
    .unwrap();

    catalog::set_tax_rate(pool, "AB", dec!(0.05)).await.unwrap();
}

pub async fn harness_with(
    settings: EscalationSettings,
    threshold: Arc<dyn ThresholdCheck>,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let pool = db::init_database_pool(&dir.path().join("tqe.db")).await.unwrap();
    seed_catalog(&pool).await;
    let clock = Arc::new(FixedClock::new(wednesday_morning()));
    let event_bus = EventBus::new(256);

    let engine = build_engine(&pool, &clock, &event_bus, settings, threshold);
    Harness {
        dir,
        pool,
        clock,
        event_bus,
        engine,
    }
}

pub async fn harness() -> Harness {
    harness_with(quick_settings(), Arc::new(AlwaysPass)).await
}

/// A second engine over the same store, as after a restart
pub fn build_engine(
    pool: &SqlitePool,
    clock: &Arc<FixedClock>,
    event_bus: &EventBus,
    settings: EscalationSettings,
    threshold: Arc<dyn ThresholdCheck>,
) -> Arc<QuoteLifecycleEngine> {
    let escalation = Arc::new(EscalationController::new(
        pool.clone(),
        event_bus.clone(),
        clock.clone(),
        threshold,
        settings,
    ));
    let monitor = ProcessingMonitor::new(pool.clone(), event_bus.clone(), Duration::from_millis(25));
    Arc::new(QuoteLifecycleEngine::new(
        pool.clone(),
        event_bus.clone(),
        clock.clone(),
        escalation,
        monitor,
    ))
}

pub fn documents(names: &[&str]) -> StepInput {
    StepInput::Documents {
        files: names
            .iter()
            .map(|n| FileUpload {
                filename: n.to_string(),
            })
            .collect(),
    }
}

pub fn details() -> StepInput {
    StepInput::Details {
        source_language: Some("es".to_string()),
        target_language: Some("en".to_string()),
        intended_use: Some("immigration".to_string()),
        certifications: vec!["notarized".to_string()],
    }
}

/// Create a quote and walk it into `awaiting_analysis` with one file
pub async fn quote_awaiting_analysis(h: &Harness) -> (Uuid, Vec<QuoteFile>) {
    let quote = h.engine.create_quote().await.unwrap();
    h.engine
        .advance(quote.id, &documents(&["passport.pdf"]))
        .await
        .unwrap();
    let outcome = h.engine.advance(quote.id, &details()).await.unwrap();
    assert_eq!(outcome.state, QuoteStatus::AwaitingAnalysis);

    let files = db::files::list_files(&h.pool, quote.id).await.unwrap();
    (quote.id, files)
}

pub fn passport_report(word_count: u32) -> AnalysisReport {
    AnalysisReport {
        detected_language: Some("es".to_string()),
        document_type: Some("passport".to_string()),
        complexity: Complexity::Easy,
        word_count,
        page_count: 1,
    }
}

/// Analyse every file and report the quote ready
pub async fn finish_analysis(h: &Harness, quote_id: Uuid, files: &[QuoteFile]) {
    for file in files {
        h.engine
            .record_analysis(file.id, &passport_report(450))
            .await
            .unwrap();
    }
    h.engine
        .record_pipeline_status(quote_id, ProcessingStatus::Ready)
        .await
        .unwrap();
}

pub async fn status_of(h: &Harness, quote_id: Uuid) -> QuoteStatus {
    db::quotes::load_quote(&h.pool, quote_id)
        .await
        .unwrap()
        .unwrap()
        .status
}

/// Poll the store until the quote reaches `expected` or `timeout` passes
pub async fn wait_for_status(
    h: &Harness,
    quote_id: Uuid,
    expected: QuoteStatus,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if status_of(h, quote_id).await == expected {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn review_count(pool: &SqlitePool, quote_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM hitl_reviews WHERE quote_id = ?")
        .bind(quote_id.to_string())
        .fetch_one(pool)
        .await
        .unwrap()
}
