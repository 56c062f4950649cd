//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" or "degraded"
    pub status: String,
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    pub uptime_seconds: u64,
    pub database: String,
    /// Countdowns currently running
    pub active_countdowns: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let database = match sqlx::query("SELECT 1").execute(state.engine.pool()).await {
        Ok(_) => "ok".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Health check database query failed");
            "unavailable".to_string()
        }
    };
    let status = if database == "ok" { "ok" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        module: "tqe-quote".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        database,
        active_countdowns: state.engine.escalation().active_countdowns(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
