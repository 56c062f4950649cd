//! Quote persistence
//!
//! Writes are field-scoped: user steps go through a version-checked update,
//! escalation and pipeline decisions go through status compare-and-set, and
//! the pipeline status column is written on its own.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use tqe_common::Result;
use uuid::Uuid;

use super::{decode_decimal, decode_enum, decode_json, decode_ts, decode_uuid, encode_enum, encode_ts};
use crate::models::{
    Address, PricingOverride, PricingSummary, ProcessingStatus, Quote, QuoteFile, QuoteStatus,
    TurnaroundSpeed,
};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Fields a version-checked update may set
///
/// `None` leaves the stored column untouched.
#[derive(Debug, Clone, Default)]
pub struct QuoteUpdate {
    pub status: Option<QuoteStatus>,
    /// Only replaces `pending`; a status the pipeline already reported is kept
    pub processing_status: Option<ProcessingStatus>,
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub intended_use: Option<String>,
    pub certifications: Option<Vec<String>>,
    pub turnaround: Option<TurnaroundSpeed>,
    pub delivery_options: Option<Vec<String>>,
    pub billing_address: Option<Address>,
    pub shipping_address: Option<Address>,
    pub tax_rate: Option<Decimal>,
    pub calculated_totals: Option<PricingSummary>,
    pub pricing_override: Option<PricingOverride>,
    pub analysis_started_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
    pub cancellation_reason: Option<String>,
}

/// Save a new quote
pub async fn insert_quote(pool: &SqlitePool, quote: &Quote) -> Result<()> {
    let id = quote.id.to_string();
    let status = encode_enum(&quote.status)?;
    let processing_status = encode_enum(&quote.processing_status)?;
    let certifications = serde_json::to_string(&quote.certifications)?;
    let turnaround = encode_enum(&quote.turnaround)?;
    let delivery_options = serde_json::to_string(&quote.delivery_options)?;
    let billing_address = quote.billing_address.as_ref().map(serde_json::to_string).transpose()?;
    let shipping_address = quote.shipping_address.as_ref().map(serde_json::to_string).transpose()?;
    let tax_rate = quote.tax_rate.to_string();
    let totals = serde_json::to_string(&quote.calculated_totals)?;
    let pricing_override = quote.pricing_override.as_ref().map(serde_json::to_string).transpose()?;
    let analysis_started_at = quote.analysis_started_at.map(encode_ts);
    let created_at = encode_ts(quote.created_at);
    let updated_at = encode_ts(quote.updated_at);
    let expires_at = encode_ts(quote.expires_at);

    retry_on_lock("insert_quote", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO quotes (
                id, status, processing_status, source_language, target_language,
                intended_use, certifications, turnaround, delivery_options,
                billing_address, shipping_address, tax_rate, calculated_totals,
                pricing_override, analysis_started_at, payment_reference,
                cancellation_reason, created_at, updated_at, expires_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&status)
        .bind(&processing_status)
        .bind(&quote.source_language)
        .bind(&quote.target_language)
        .bind(&quote.intended_use)
        .bind(&certifications)
        .bind(&turnaround)
        .bind(&delivery_options)
        .bind(&billing_address)
        .bind(&shipping_address)
        .bind(&tax_rate)
        .bind(&totals)
        .bind(&pricing_override)
        .bind(&analysis_started_at)
        .bind(&quote.payment_reference)
        .bind(&quote.cancellation_reason)
        .bind(&created_at)
        .bind(&updated_at)
        .bind(&expires_at)
        .bind(quote.version)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Load a quote by id
pub async fn load_quote(pool: &SqlitePool, id: Uuid) -> Result<Option<Quote>> {
    let row = sqlx::query("SELECT * FROM quotes WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_quote).transpose()
}

fn row_to_quote(row: &SqliteRow) -> Result<Quote> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let processing_status: String = row.try_get("processing_status")?;
    let certifications: String = row.try_get("certifications")?;
    let turnaround: String = row.try_get("turnaround")?;
    let delivery_options: String = row.try_get("delivery_options")?;
    let billing_address: Option<String> = row.try_get("billing_address")?;
    let shipping_address: Option<String> = row.try_get("shipping_address")?;
    let tax_rate: String = row.try_get("tax_rate")?;
    let totals: String = row.try_get("calculated_totals")?;
    let pricing_override: Option<String> = row.try_get("pricing_override")?;
    let analysis_started_at: Option<String> = row.try_get("analysis_started_at")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let expires_at: String = row.try_get("expires_at")?;

    Ok(Quote {
        id: decode_uuid("quotes.id", &id)?,
        status: decode_enum("quotes.status", &status)?,
        processing_status: decode_enum("quotes.processing_status", &processing_status)?,
        source_language: row.try_get("source_language")?,
        target_language: row.try_get("target_language")?,
        intended_use: row.try_get("intended_use")?,
        certifications: decode_json("quotes.certifications", &certifications)?,
        turnaround: decode_enum("quotes.turnaround", &turnaround)?,
        delivery_options: decode_json("quotes.delivery_options", &delivery_options)?,
        billing_address: billing_address
            .map(|raw| decode_json("quotes.billing_address", &raw))
            .transpose()?,
        shipping_address: shipping_address
            .map(|raw| decode_json("quotes.shipping_address", &raw))
            .transpose()?,
        tax_rate: decode_decimal("quotes.tax_rate", &tax_rate)?,
        calculated_totals: decode_json("quotes.calculated_totals", &totals)?,
        pricing_override: pricing_override
            .map(|raw| decode_json("quotes.pricing_override", &raw))
            .transpose()?,
        analysis_started_at: analysis_started_at.as_deref().map(decode_ts).transpose()?,
        payment_reference: row.try_get("payment_reference")?,
        cancellation_reason: row.try_get("cancellation_reason")?,
        created_at: decode_ts(&created_at)?,
        updated_at: decode_ts(&updated_at)?,
        expires_at: decode_ts(&expires_at)?,
        version: row.try_get("version")?,
    })
}

/// Column values of a [`QuoteUpdate`], encoded for binding
struct EncodedUpdate {
    status: Option<String>,
    processing_status: Option<String>,
    certifications: Option<String>,
    turnaround: Option<String>,
    delivery_options: Option<String>,
    billing_address: Option<String>,
    shipping_address: Option<String>,
    tax_rate: Option<String>,
    totals: Option<String>,
    pricing_override: Option<String>,
    analysis_started_at: Option<String>,
    updated_at: String,
}

impl EncodedUpdate {
    fn new(update: &QuoteUpdate, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            status: update.status.as_ref().map(encode_enum).transpose()?,
            processing_status: update.processing_status.as_ref().map(encode_enum).transpose()?,
            certifications: update.certifications.as_ref().map(serde_json::to_string).transpose()?,
            turnaround: update.turnaround.as_ref().map(encode_enum).transpose()?,
            delivery_options: update.delivery_options.as_ref().map(serde_json::to_string).transpose()?,
            billing_address: update.billing_address.as_ref().map(serde_json::to_string).transpose()?,
            shipping_address: update.shipping_address.as_ref().map(serde_json::to_string).transpose()?,
            tax_rate: update.tax_rate.map(|r| r.to_string()),
            totals: update.calculated_totals.as_ref().map(serde_json::to_string).transpose()?,
            pricing_override: update.pricing_override.as_ref().map(serde_json::to_string).transpose()?,
            analysis_started_at: update.analysis_started_at.map(encode_ts),
            updated_at: encode_ts(now),
        })
    }
}

async fn execute_update(
    conn: &mut SqliteConnection,
    id: &str,
    expected_version: i64,
    update: &QuoteUpdate,
    encoded: &EncodedUpdate,
) -> Result<u64> {
    let done = sqlx::query(
        r#"
        UPDATE quotes SET
            status = COALESCE(?, status),
            processing_status = CASE WHEN processing_status = 'pending'
                THEN COALESCE(?, processing_status) ELSE processing_status END,
            source_language = COALESCE(?, source_language),
            target_language = COALESCE(?, target_language),
            intended_use = COALESCE(?, intended_use),
            certifications = COALESCE(?, certifications),
            turnaround = COALESCE(?, turnaround),
            delivery_options = COALESCE(?, delivery_options),
            billing_address = COALESCE(?, billing_address),
            shipping_address = COALESCE(?, shipping_address),
            tax_rate = COALESCE(?, tax_rate),
            calculated_totals = COALESCE(?, calculated_totals),
            pricing_override = COALESCE(?, pricing_override),
            analysis_started_at = COALESCE(?, analysis_started_at),
            payment_reference = COALESCE(?, payment_reference),
            cancellation_reason = COALESCE(?, cancellation_reason),
            updated_at = ?,
            version = version + 1
        WHERE id = ? AND version = ?
        "#,
    )
    .bind(&encoded.status)
    .bind(&encoded.processing_status)
    .bind(&update.source_language)
    .bind(&update.target_language)
    .bind(&update.intended_use)
    .bind(&encoded.certifications)
    .bind(&encoded.turnaround)
    .bind(&encoded.delivery_options)
    .bind(&encoded.billing_address)
    .bind(&encoded.shipping_address)
    .bind(&encoded.tax_rate)
    .bind(&encoded.totals)
    .bind(&encoded.pricing_override)
    .bind(&encoded.analysis_started_at)
    .bind(&update.payment_reference)
    .bind(&update.cancellation_reason)
    .bind(&encoded.updated_at)
    .bind(id)
    .bind(expected_version)
    .execute(&mut *conn)
    .await?;

    Ok(done.rows_affected())
}

/// Version-checked field-scoped update
///
/// Returns `false` when the stored version no longer matches (someone else
/// wrote first); the caller decides whether to reload and retry.
pub async fn update_fields(
    pool: &SqlitePool,
    id: Uuid,
    expected_version: i64,
    update: &QuoteUpdate,
    now: DateTime<Utc>,
) -> Result<bool> {
    let id = id.to_string();
    let encoded = EncodedUpdate::new(update, now)?;

    let affected = retry_on_lock("update_quote_fields", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut conn = pool.acquire().await?;
        execute_update(&mut conn, &id, expected_version, update, &encoded).await
    })
    .await?;

    Ok(affected == 1)
}

/// [`update_fields`] plus new file rows, committed together or not at all
pub async fn update_fields_with_files(
    pool: &SqlitePool,
    id: Uuid,
    expected_version: i64,
    update: &QuoteUpdate,
    files: &[QuoteFile],
    now: DateTime<Utc>,
) -> Result<bool> {
    let quote_key = id.to_string();
    let encoded = EncodedUpdate::new(update, now)?;

    retry_on_lock("update_quote_with_files", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;
        if execute_update(&mut tx, &quote_key, expected_version, update, &encoded).await? != 1 {
            tx.rollback().await?;
            return Ok(false);
        }
        for file in files {
            super::files::insert_file(&mut tx, file).await?;
        }
        tx.commit().await?;
        Ok(true)
    })
    .await
}

/// Status compare-and-set
///
/// Moves the quote to `to` only if its current status is one of `from`.
/// Returns whether this call performed the transition.
pub async fn transition_status(
    pool: &SqlitePool,
    id: Uuid,
    from: &[QuoteStatus],
    to: QuoteStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    if from.is_empty() {
        return Ok(false);
    }

    let placeholders = vec!["?"; from.len()].join(", ");
    let sql = format!(
        "UPDATE quotes SET status = ?, updated_at = ?, version = version + 1 \
         WHERE id = ? AND status IN ({})",
        placeholders
    );
    let to = encode_enum(&to)?;
    let from = from.iter().map(encode_enum).collect::<Result<Vec<_>>>()?;
    let id = id.to_string();
    let updated_at = encode_ts(now);

    let affected = retry_on_lock("transition_status", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut query = sqlx::query(&sql).bind(&to).bind(&updated_at).bind(&id);
        for status in &from {
            query = query.bind(status);
        }
        Ok(query.execute(pool).await?.rows_affected())
    })
    .await?;

    Ok(affected == 1)
}

/// Pipeline-owned status write; leaves every other column (and the version) alone
pub async fn set_processing_status(
    pool: &SqlitePool,
    id: Uuid,
    status: ProcessingStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let status = encode_enum(&status)?;
    let id = id.to_string();
    let updated_at = encode_ts(now);

    let affected = retry_on_lock("set_processing_status", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let done = sqlx::query("UPDATE quotes SET processing_status = ?, updated_at = ? WHERE id = ?")
            .bind(&status)
            .bind(&updated_at)
            .bind(&id)
            .execute(pool)
            .await?;
        Ok(done.rows_affected())
    })
    .await?;

    Ok(affected == 1)
}

/// Quotes waiting on analysis with their countdown start
pub async fn list_awaiting_analysis(
    pool: &SqlitePool,
) -> Result<Vec<(Uuid, Option<DateTime<Utc>>)>> {
    let rows = sqlx::query("SELECT id, analysis_started_at FROM quotes WHERE status = ?")
        .bind(QuoteStatus::AwaitingAnalysis.as_str())
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| -> Result<(Uuid, Option<DateTime<Utc>>)> {
            let id: String = row.try_get("id")?;
            let started: Option<String> = row.try_get("analysis_started_at")?;
            Ok((
                decode_uuid("quotes.id", &id)?,
                started.as_deref().map(decode_ts).transpose()?,
            ))
        })
        .collect()
}

/// Quotes still awaiting analysis whose pipeline already reported `ready`
pub async fn list_ready_for_decision(pool: &SqlitePool) -> Result<Vec<Uuid>> {
    let ids: Vec<String> =
        sqlx::query_scalar("SELECT id FROM quotes WHERE status = ? AND processing_status = ?")
            .bind(QuoteStatus::AwaitingAnalysis.as_str())
            .bind(ProcessingStatus::Ready.as_str())
            .fetch_all(pool)
            .await?;

    ids.iter().map(|id| decode_uuid("quotes.id", id)).collect()
}

/// Non-terminal quotes whose validity window has closed
pub async fn list_expired_ids(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
    let terminal: Vec<&str> = QuoteStatus::TERMINAL.iter().map(|s| s.as_str()).collect();
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT id FROM quotes WHERE expires_at <= ? AND status NOT IN (?, ?, ?)",
    )
    .bind(encode_ts(now))
    .bind(terminal[0])
    .bind(terminal[1])
    .bind(terminal[2])
    .fetch_all(pool)
    .await?;

    ids.iter().map(|id| decode_uuid("quotes.id", id)).collect()
}
