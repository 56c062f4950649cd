//! Uploaded file metadata and analysis results

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use tqe_common::Result;
use uuid::Uuid;

use super::{decode_decimal, decode_enum, decode_ts, decode_uuid, encode_enum, encode_ts};
use crate::models::{AnalysisResult, FileProcessingStatus, QuoteFile};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

pub(crate) async fn insert_file(conn: &mut SqliteConnection, file: &QuoteFile) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO quote_files (id, quote_id, filename, processing_status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(file.id.to_string())
    .bind(file.quote_id.to_string())
    .bind(&file.filename)
    .bind(encode_enum(&file.processing_status)?)
    .bind(encode_ts(file.created_at))
    .bind(encode_ts(file.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Record file metadata (all-or-nothing)
pub async fn insert_files(pool: &SqlitePool, files: &[QuoteFile]) -> Result<()> {
    retry_on_lock("insert_files", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;
        for file in files {
            insert_file(&mut tx, file).await?;
        }
        tx.commit().await?;
        Ok(())
    })
    .await
}

pub async fn list_files(pool: &SqlitePool, quote_id: Uuid) -> Result<Vec<QuoteFile>> {
    let rows = sqlx::query("SELECT * FROM quote_files WHERE quote_id = ? ORDER BY created_at, id")
        .bind(quote_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_file).collect()
}

pub async fn load_file(pool: &SqlitePool, file_id: Uuid) -> Result<Option<QuoteFile>> {
    let row = sqlx::query("SELECT * FROM quote_files WHERE id = ?")
        .bind(file_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_file).transpose()
}

fn row_to_file(row: &SqliteRow) -> Result<QuoteFile> {
    let id: String = row.try_get("id")?;
    let quote_id: String = row.try_get("quote_id")?;
    let status: String = row.try_get("processing_status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(QuoteFile {
        id: decode_uuid("quote_files.id", &id)?,
        quote_id: decode_uuid("quote_files.quote_id", &quote_id)?,
        filename: row.try_get("filename")?,
        processing_status: decode_enum("quote_files.processing_status", &status)?,
        created_at: decode_ts(&created_at)?,
        updated_at: decode_ts(&updated_at)?,
    })
}

/// Pipeline-owned per-file status write
pub async fn set_file_status(
    pool: &SqlitePool,
    file_id: Uuid,
    status: FileProcessingStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let file_id = file_id.to_string();
    let status = encode_enum(&status)?;
    let updated_at = encode_ts(now);

    let affected = retry_on_lock("set_file_status", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let done = sqlx::query("UPDATE quote_files SET processing_status = ?, updated_at = ? WHERE id = ?")
            .bind(&status)
            .bind(&updated_at)
            .bind(&file_id)
            .execute(pool)
            .await?;
        Ok(done.rows_affected())
    })
    .await?;

    Ok(affected == 1)
}

/// Write an analysis result unless one already exists for the file
///
/// Returns `true` when this call stored the row.
pub async fn insert_analysis_if_absent(pool: &SqlitePool, result: &AnalysisResult) -> Result<bool> {
    let id = result.id.to_string();
    let file_id = result.file_id.to_string();
    let quote_id = result.quote_id.to_string();
    let complexity = encode_enum(&result.complexity)?;
    let billable_pages = result.billable_pages.to_string();
    let line_total = result.line_total.to_string();
    let created_at = encode_ts(result.created_at);

    let affected = retry_on_lock("insert_analysis", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let done = sqlx::query(
            r#"
            INSERT INTO analysis_results (
                id, file_id, quote_id, detected_language, document_type, complexity,
                word_count, page_count, billable_pages, line_total, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_id) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(&file_id)
        .bind(&quote_id)
        .bind(&result.detected_language)
        .bind(&result.document_type)
        .bind(&complexity)
        .bind(result.word_count as i64)
        .bind(result.page_count as i64)
        .bind(&billable_pages)
        .bind(&line_total)
        .bind(&created_at)
        .execute(pool)
        .await?;
        Ok(done.rows_affected())
    })
    .await?;

    Ok(affected == 1)
}

pub async fn list_analysis(pool: &SqlitePool, quote_id: Uuid) -> Result<Vec<AnalysisResult>> {
    let rows = sqlx::query("SELECT * FROM analysis_results WHERE quote_id = ? ORDER BY created_at, id")
        .bind(quote_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_analysis).collect()
}

fn row_to_analysis(row: &SqliteRow) -> Result<AnalysisResult> {
    let id: String = row.try_get("id")?;
    let file_id: String = row.try_get("file_id")?;
    let quote_id: String = row.try_get("quote_id")?;
    let complexity: String = row.try_get("complexity")?;
    let word_count: i64 = row.try_get("word_count")?;
    let page_count: i64 = row.try_get("page_count")?;
    let billable_pages: String = row.try_get("billable_pages")?;
    let line_total: String = row.try_get("line_total")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(AnalysisResult {
        id: decode_uuid("analysis_results.id", &id)?,
        file_id: decode_uuid("analysis_results.file_id", &file_id)?,
        quote_id: decode_uuid("analysis_results.quote_id", &quote_id)?,
        detected_language: row.try_get("detected_language")?,
        document_type: row.try_get("document_type")?,
        complexity: decode_enum("analysis_results.complexity", &complexity)?,
        word_count: word_count.max(0) as u32,
        page_count: page_count.max(0) as u32,
        billable_pages: decode_decimal("analysis_results.billable_pages", &billable_pages)?,
        line_total: decode_decimal("analysis_results.line_total", &line_total)?,
        created_at: decode_ts(&created_at)?,
    })
}
