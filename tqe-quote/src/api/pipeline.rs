//! Analysis pipeline callbacks
//!
//! POST /pipeline/files/:file_id/status, POST /pipeline/files/:file_id/analysis,
//! POST /pipeline/quotes/:id/status

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{AnalysisReport, AnalysisResult, FileProcessingStatus, ProcessingStatus, QuoteFile};
use crate::services::ProcessingSnapshot;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct FileStatusRequest {
    pub processing_status: FileProcessingStatus,
}

#[derive(Debug, Deserialize)]
pub struct QuoteStatusRequest {
    pub processing_status: ProcessingStatus,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    /// `false` when an earlier result for the file was kept
    pub created: bool,
    pub analysis: AnalysisResult,
}

/// POST /pipeline/files/:file_id/status
pub async fn file_status(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Json(request): Json<FileStatusRequest>,
) -> ApiResult<Json<QuoteFile>> {
    let file = state
        .engine
        .record_file_status(file_id, request.processing_status)
        .await?;
    Ok(Json(file))
}

/// POST /pipeline/files/:file_id/analysis
///
/// 201 when stored, 200 with the original when a result already existed.
pub async fn file_analysis(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Json(report): Json<AnalysisReport>,
) -> ApiResult<(StatusCode, Json<AnalysisResponse>)> {
    let (analysis, created) = state.engine.record_analysis(file_id, &report).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(AnalysisResponse { created, analysis })))
}

/// POST /pipeline/quotes/:id/status
pub async fn quote_status(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
    Json(request): Json<QuoteStatusRequest>,
) -> ApiResult<Json<ProcessingSnapshot>> {
    let snapshot = state
        .engine
        .record_pipeline_status(quote_id, request.processing_status)
        .await?;
    Ok(Json(snapshot))
}

/// Build pipeline callback routes
pub fn pipeline_routes() -> Router<AppState> {
    Router::new()
        .route("/pipeline/files/:file_id/status", post(file_status))
        .route("/pipeline/files/:file_id/analysis", post(file_analysis))
        .route("/pipeline/quotes/:id/status", post(quote_status))
}
