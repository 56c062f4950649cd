//! Database access for tqe-quote
//!
//! SQLite store for quotes, files, analysis results, review records and the
//! read-only catalog. Enums are stored as their snake_case serde names,
//! money as decimal strings, timestamps as RFC 3339 text.

pub mod catalog;
pub mod files;
pub mod quotes;
pub mod reviews;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tqe_common::{Error, Result};

/// Initialize database connection pool
///
/// Creates the file (and parent folder) if missing and ensures all tables exist.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS quotes (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        processing_status TEXT NOT NULL,
        source_language TEXT,
        target_language TEXT,
        intended_use TEXT,
        certifications TEXT NOT NULL DEFAULT '[]',
        turnaround TEXT NOT NULL DEFAULT 'standard',
        delivery_options TEXT NOT NULL DEFAULT '[]',
        billing_address TEXT,
        shipping_address TEXT,
        tax_rate TEXT NOT NULL,
        calculated_totals TEXT NOT NULL,
        pricing_override TEXT,
        analysis_started_at TEXT,
        payment_reference TEXT,
        cancellation_reason TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        version INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_quotes_status ON quotes(status)",
    r#"
    CREATE TABLE IF NOT EXISTS quote_files (
        id TEXT PRIMARY KEY,
        quote_id TEXT NOT NULL REFERENCES quotes(id) ON DELETE CASCADE,
        filename TEXT NOT NULL,
        processing_status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_quote_files_quote ON quote_files(quote_id)",
    r#"
    CREATE TABLE IF NOT EXISTS analysis_results (
        id TEXT PRIMARY KEY,
        file_id TEXT NOT NULL UNIQUE REFERENCES quote_files(id) ON DELETE CASCADE,
        quote_id TEXT NOT NULL REFERENCES quotes(id) ON DELETE CASCADE,
        detected_language TEXT,
        document_type TEXT,
        complexity TEXT NOT NULL,
        word_count INTEGER NOT NULL,
        page_count INTEGER NOT NULL,
        billable_pages TEXT NOT NULL,
        line_total TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS hitl_reviews (
        id TEXT PRIMARY KEY,
        quote_id TEXT NOT NULL UNIQUE REFERENCES quotes(id) ON DELETE CASCADE,
        reasons TEXT NOT NULL,
        priority TEXT NOT NULL,
        note TEXT,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        resolved_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS delivery_options (
        code TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        delivery_group TEXT NOT NULL,
        price TEXT NOT NULL,
        requires_shipping_address INTEGER NOT NULL DEFAULT 0,
        is_mandatory INTEGER NOT NULL DEFAULT 0,
        is_active INTEGER NOT NULL DEFAULT 1,
        sort_order INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS certification_types (
        code TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        price TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS holidays (
        holiday_date TEXT PRIMARY KEY,
        name TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS same_day_eligibility (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_language TEXT NOT NULL,
        target_language TEXT NOT NULL,
        document_type TEXT NOT NULL,
        intended_use TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tax_rates (
        region_code TEXT PRIMARY KEY,
        rate TEXT NOT NULL
    )
    "#,
];

/// Create all tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database tables initialized ({} statements)", SCHEMA.len());
    Ok(())
}

/// Timestamp → stored text
///
/// Fixed-width UTC form so that text comparison in SQL orders correctly.
pub(crate) fn encode_ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    tqe_common::time::parse_rfc3339(raw)
}

/// Enum → stored text (its serde name)
pub(crate) fn encode_enum<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(Error::Internal(format!(
            "Expected a string-serialized enum, got {}",
            other
        ))),
    }
}

/// Stored text → enum
pub(crate) fn decode_enum<T: DeserializeOwned>(column: &str, raw: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| Error::Internal(format!("Failed to decode {} {:?}: {}", column, raw, e)))
}

pub(crate) fn decode_decimal(column: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw.trim())
        .map_err(|e| Error::Internal(format!("Failed to decode {} {:?}: {}", column, raw, e)))
}

pub(crate) fn decode_json<T: DeserializeOwned>(column: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", column, e)))
}

pub(crate) fn decode_uuid(column: &str, raw: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(raw)
        .map_err(|e| Error::Internal(format!("Failed to parse {} {:?}: {}", column, raw, e)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// Fresh database in a temp dir; keep the TempDir alive for the test
    pub async fn test_pool() -> (TempDir, SqlitePool) {
        let dir = TempDir::new().unwrap();
        let pool = init_database_pool(&dir.path().join("test.db")).await.unwrap();
        (dir, pool)
    }
}
