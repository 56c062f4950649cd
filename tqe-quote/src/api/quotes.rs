//! Customer-facing quote endpoints
//!
//! POST /quotes, GET /quotes/:id, POST /quotes/:id/advance,
//! GET /quotes/:id/status, GET /quotes/:id/turnaround-options,
//! POST /quotes/:id/review, GET /quotes/:id/events

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult, FieldError, QuoteError};
use crate::models::{PricingSummary, Quote, QuoteStatus};
use crate::workflow::{QuoteStatusView, StepInput, TurnaroundOption};
use crate::AppState;

/// POST /quotes response
#[derive(Debug, Serialize)]
pub struct CreateQuoteResponse {
    pub quote_id: Uuid,
    pub state: QuoteStatus,
    pub expires_at: DateTime<Utc>,
}

/// POST /quotes/:id/advance response, success or validation failure
#[derive(Debug, Serialize)]
pub struct AdvanceResponse {
    pub quote_id: Uuid,
    pub state: QuoteStatus,
    pub totals: PricingSummary,
    pub errors: Vec<FieldError>,
}

/// GET /quotes/:id/turnaround-options response
#[derive(Debug, Serialize)]
pub struct TurnaroundOptionsResponse {
    pub quote_id: Uuid,
    pub options: Vec<TurnaroundOption>,
}

/// POST /quotes/:id/review request
#[derive(Debug, Default, Deserialize)]
pub struct ReviewRequest {
    #[serde(default)]
    pub note: Option<String>,
}

/// POST /quotes/:id/review response
#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    pub quote_id: Uuid,
    pub escalation_id: Uuid,
    /// `false` when an earlier trigger already created the review
    pub created: bool,
}

/// Quote snapshot with totals rounded for display
fn display_quote(quote: Quote) -> Quote {
    Quote {
        calculated_totals: quote.calculated_totals.rounded(),
        ..quote
    }
}

/// POST /quotes
pub async fn create_quote(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<CreateQuoteResponse>)> {
    let quote = state.engine.create_quote().await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateQuoteResponse {
            quote_id: quote.id,
            state: quote.status,
            expires_at: quote.expires_at,
        }),
    ))
}

/// GET /quotes/:id
pub async fn get_quote(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
) -> ApiResult<Json<Quote>> {
    let quote = state.engine.get_quote(quote_id).await?;
    Ok(Json(display_quote(quote)))
}

/// POST /quotes/:id/advance
///
/// Validation failures come back as 422 with the unchanged state and every
/// field error; other failures use the standard error body.
pub async fn advance_quote(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
    body: Result<Json<StepInput>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(input) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    match state.engine.advance(quote_id, &input).await {
        Ok(outcome) => Ok(Json(AdvanceResponse {
            quote_id,
            state: outcome.state,
            totals: outcome.totals,
            errors: Vec::new(),
        })
        .into_response()),
        Err(QuoteError::Validation(errors)) => {
            let quote = state.engine.get_quote(quote_id).await?;
            tracing::debug!(
                quote_id = %quote_id,
                step = input.name(),
                errors = errors.len(),
                "Step rejected"
            );
            Ok((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(AdvanceResponse {
                    quote_id,
                    state: quote.status,
                    totals: quote.calculated_totals.rounded(),
                    errors,
                }),
            )
                .into_response())
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /quotes/:id/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
) -> ApiResult<Json<QuoteStatusView>> {
    Ok(Json(state.engine.get_status(quote_id).await?))
}

/// GET /quotes/:id/turnaround-options
pub async fn turnaround_options(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
) -> ApiResult<Json<TurnaroundOptionsResponse>> {
    let options = state.engine.turnaround_options(quote_id).await?;
    Ok(Json(TurnaroundOptionsResponse { quote_id, options }))
}

/// POST /quotes/:id/review
pub async fn request_review(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
    body: Option<Json<ReviewRequest>>,
) -> ApiResult<Json<ReviewResponse>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let outcome = state
        .engine
        .request_review(quote_id, request.note.as_deref())
        .await?;

    let created = matches!(outcome, crate::services::EscalationOutcome::Escalated { .. });
    let escalation_id = outcome
        .review_id()
        .ok_or_else(|| ApiError::Internal("Escalation produced no review".to_string()))?;

    Ok(Json(ReviewResponse {
        quote_id,
        escalation_id,
        created,
    }))
}

/// Build quote routes
pub fn quote_routes() -> Router<AppState> {
    Router::new()
        .route("/quotes", post(create_quote))
        .route("/quotes/:id", get(get_quote))
        .route("/quotes/:id/advance", post(advance_quote))
        .route("/quotes/:id/status", get(get_status))
        .route("/quotes/:id/turnaround-options", get(turnaround_options))
        .route("/quotes/:id/review", post(request_review))
        .route("/quotes/:id/events", get(super::sse::quote_event_stream))
}
