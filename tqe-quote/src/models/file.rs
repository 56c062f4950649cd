//! Uploaded documents and their analysis results

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-file pipeline status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileProcessingStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

/// One uploaded document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteFile {
    pub id: Uuid,
    pub quote_id: Uuid,
    pub filename: String,
    pub processing_status: FileProcessingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Document complexity class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Easy,
    Medium,
    Hard,
}

impl Complexity {
    /// Fixed three-point pricing scale
    pub fn multiplier(self) -> Decimal {
        match self {
            Complexity::Easy => Decimal::new(100, 2),
            Complexity::Medium => Decimal::new(115, 2),
            Complexity::Hard => Decimal::new(125, 2),
        }
    }
}

/// What the pipeline reports for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub detected_language: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    pub complexity: Complexity,
    pub word_count: u32,
    #[serde(default)]
    pub page_count: u32,
}

/// Stored analysis result (immutable once written)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: Uuid,
    pub file_id: Uuid,
    pub quote_id: Uuid,
    pub detected_language: Option<String>,
    pub document_type: Option<String>,
    pub complexity: Complexity,
    pub word_count: u32,
    pub page_count: u32,
    /// Derived by the pricing engine when the result is written
    pub billable_pages: Decimal,
    pub line_total: Decimal,
    pub created_at: DateTime<Utc>,
}
