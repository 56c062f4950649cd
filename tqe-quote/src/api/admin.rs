//! Staff endpoints
//!
//! POST /admin/quotes/:id/override, POST /admin/quotes/:id/review/resolve,
//! PUT /admin/settings/:key

use axum::{
    extract::{Path, State},
    routing::{post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{PricingOverride, PricingSummary, Quote};
use crate::AppState;

/// POST /admin/quotes/:id/override response
#[derive(Debug, Serialize)]
pub struct OverrideResponse {
    pub quote_id: Uuid,
    pub totals: PricingSummary,
}

/// PUT /admin/settings/:key request
#[derive(Debug, Deserialize)]
pub struct SettingRequest {
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct SettingResponse {
    pub key: String,
    pub value: String,
}

/// POST /admin/quotes/:id/override
pub async fn apply_override(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
    Json(pricing_override): Json<PricingOverride>,
) -> ApiResult<Json<OverrideResponse>> {
    let totals = state
        .engine
        .apply_override(quote_id, &pricing_override)
        .await?;
    Ok(Json(OverrideResponse { quote_id, totals }))
}

/// POST /admin/quotes/:id/review/resolve
pub async fn resolve_review(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
) -> ApiResult<Json<Quote>> {
    let quote = state.engine.resolve_review(quote_id).await?;
    Ok(Json(Quote {
        calculated_totals: quote.calculated_totals.rounded(),
        ..quote
    }))
}

/// PUT /admin/settings/:key
///
/// Only workflow keys are accepted. The value is stored as given and
/// checked when a computation next reads it.
pub async fn put_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<SettingRequest>,
) -> ApiResult<Json<SettingResponse>> {
    if !crate::config::SETTING_KEYS.contains(&key.as_str()) {
        return Err(ApiError::NotFound(format!("Unknown setting: {}", key)));
    }
    let value = request.value.trim().to_string();
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!("Setting {} cannot be empty", key)));
    }

    crate::db::catalog::set_setting(state.engine.pool(), &key, &value).await?;
    info!(key = %key, value = %value, "Setting updated");

    Ok(Json(SettingResponse { key, value }))
}

/// Build staff routes
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/quotes/:id/override", post(apply_override))
        .route("/admin/quotes/:id/review/resolve", post(resolve_review))
        .route("/admin/settings/:key", put(put_setting))
}
