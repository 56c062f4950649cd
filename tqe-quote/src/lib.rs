//! tqe-quote library interface
//!
//! The binary wires these pieces together; integration tests build the
//! same router over a temporary database.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult, QuoteError, QuoteResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tqe_common::events::EventBus;

use crate::workflow::QuoteLifecycleEngine;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QuoteLifecycleEngine>,
    /// Change notifications, also feeding the SSE streams
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(engine: Arc<QuoteLifecycleEngine>, event_bus: EventBus) -> Self {
        Self {
            engine,
            event_bus,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::quote_routes())
        .merge(api::admin_routes())
        .merge(api::pipeline_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
