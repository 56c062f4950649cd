//! Human review records
//!
//! At most one review per quote: `hitl_reviews.quote_id` is UNIQUE and
//! [`escalate`] checks for an existing row inside the same transaction that
//! moves the quote.

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tqe_common::{Error, Result};
use uuid::Uuid;

use super::{decode_enum, decode_json, decode_ts, decode_uuid, encode_enum, encode_ts};
use crate::models::{HitlReview, QuoteStatus, ReviewStatus, TriggerReason};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Outcome of an escalation attempt
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationWrite {
    /// This call created the review and moved the quote to `hitl_pending`
    Created(HitlReview),
    /// A review already existed; nothing changed
    Existing(HitlReview),
    /// The quote is not in a state this trigger may escalate from
    Skipped(QuoteStatus),
}

/// Create the quote's review and move it to `hitl_pending` in one transaction
///
/// The quote must currently be in one of `from`, and the lifecycle graph must
/// allow the move to `hitl_pending`. A quote that already has a
/// review is left untouched and its review returned.
pub async fn escalate(
    pool: &SqlitePool,
    quote_id: Uuid,
    from: &[QuoteStatus],
    reason: TriggerReason,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<EscalationWrite> {
    let review = HitlReview {
        id: Uuid::new_v4(),
        quote_id,
        reasons: vec![reason],
        priority: reason.priority(),
        note: note.map(str::to_string),
        status: ReviewStatus::Open,
        created_at: now,
        resolved_at: None,
    };
    let quote_key = quote_id.to_string();
    let review_id = review.id.to_string();
    let reasons = serde_json::to_string(&review.reasons)?;
    let priority = encode_enum(&review.priority)?;
    let open = encode_enum(&ReviewStatus::Open)?;
    let hitl_pending = encode_enum(&QuoteStatus::HitlPending)?;
    let timestamp = encode_ts(now);

    retry_on_lock("escalate_quote", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;

        let status: Option<String> = sqlx::query_scalar("SELECT status FROM quotes WHERE id = ?")
            .bind(&quote_key)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(status) = status else {
            return Err(Error::NotFound(format!("Quote {}", quote_id)));
        };
        let status: QuoteStatus = decode_enum("quotes.status", &status)?;

        let existing = sqlx::query("SELECT * FROM hitl_reviews WHERE quote_id = ?")
            .bind(&quote_key)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(row) = existing {
            return Ok(EscalationWrite::Existing(row_to_review(&row)?));
        }
        if !from.contains(&status) || !status.can_transition_to(QuoteStatus::HitlPending) {
            return Ok(EscalationWrite::Skipped(status));
        }

        sqlx::query(
            r#"
            INSERT INTO hitl_reviews (id, quote_id, reasons, priority, note, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&review_id)
        .bind(&quote_key)
        .bind(&reasons)
        .bind(&priority)
        .bind(note)
        .bind(&open)
        .bind(&timestamp)
        .execute(&mut *tx)
        .await?;

        let moved = sqlx::query(
            "UPDATE quotes SET status = ?, updated_at = ?, version = version + 1 \
             WHERE id = ? AND status = ?",
        )
        .bind(&hitl_pending)
        .bind(&timestamp)
        .bind(&quote_key)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;
        if moved.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(EscalationWrite::Skipped(status));
        }

        tx.commit().await?;
        Ok(EscalationWrite::Created(review.clone()))
    })
    .await
}

pub async fn load_for_quote(pool: &SqlitePool, quote_id: Uuid) -> Result<Option<HitlReview>> {
    let row = sqlx::query("SELECT * FROM hitl_reviews WHERE quote_id = ?")
        .bind(quote_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_review).transpose()
}

/// Mark the quote's open review resolved; `false` if none was open
pub async fn resolve(pool: &SqlitePool, quote_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let quote_key = quote_id.to_string();
    let resolved = encode_enum(&ReviewStatus::Resolved)?;
    let open = encode_enum(&ReviewStatus::Open)?;
    let resolved_at = encode_ts(now);

    let affected = retry_on_lock("resolve_review", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let done = sqlx::query(
            "UPDATE hitl_reviews SET status = ?, resolved_at = ? WHERE quote_id = ? AND status = ?",
        )
        .bind(&resolved)
        .bind(&resolved_at)
        .bind(&quote_key)
        .bind(&open)
        .execute(pool)
        .await?;
        Ok(done.rows_affected())
    })
    .await?;

    Ok(affected == 1)
}

fn row_to_review(row: &SqliteRow) -> Result<HitlReview> {
    let id: String = row.try_get("id")?;
    let quote_id: String = row.try_get("quote_id")?;
    let reasons: String = row.try_get("reasons")?;
    let priority: String = row.try_get("priority")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let resolved_at: Option<String> = row.try_get("resolved_at")?;

    Ok(HitlReview {
        id: decode_uuid("hitl_reviews.id", &id)?,
        quote_id: decode_uuid("hitl_reviews.quote_id", &quote_id)?,
        reasons: decode_json("hitl_reviews.reasons", &reasons)?,
        priority: decode_enum("hitl_reviews.priority", &priority)?,
        note: row.try_get("note")?,
        status: decode_enum("hitl_reviews.status", &status)?,
        created_at: decode_ts(&created_at)?,
        resolved_at: resolved_at.as_deref().map(decode_ts).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{quotes, test_support::test_pool};
    use crate::models::{Quote, ReviewPriority};
    use rust_decimal_macros::dec;

    async fn quote_in(pool: &SqlitePool, status: QuoteStatus) -> Quote {
        let quote = Quote::new(dec!(0), 30, Utc::now());
        quotes::insert_quote(pool, &quote).await.unwrap();
        if status != QuoteStatus::Draft {
            quotes::transition_status(pool, quote.id, &[QuoteStatus::Draft], status, Utc::now())
                .await
                .unwrap();
        }
        quote
    }

    const AWAITING: &[QuoteStatus] = &[QuoteStatus::AwaitingAnalysis];

    #[tokio::test]
    async fn test_second_trigger_returns_existing_review() {
        let (_dir, pool) = test_pool().await;
        let quote = quote_in(&pool, QuoteStatus::AwaitingAnalysis).await;

        let first = escalate(&pool, quote.id, AWAITING, TriggerReason::ProcessingTimeout, None, Utc::now())
            .await
            .unwrap();
        let first = match first {
            EscalationWrite::Created(review) => review,
            other => panic!("expected a new review, got {:?}", other),
        };
        assert_eq!(first.priority, ReviewPriority::High);

        let second = escalate(
            &pool,
            quote.id,
            &[QuoteStatus::AwaitingAnalysis, QuoteStatus::HitlPending],
            TriggerReason::CustomerRequested,
            Some("please check"),
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(second, EscalationWrite::Existing(first.clone()));

        let stored = quotes::load_quote(&pool, quote.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QuoteStatus::HitlPending);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM hitl_reviews WHERE quote_id = ?")
            .bind(quote.id.to_string())
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_wrong_state_is_skipped_without_review() {
        let (_dir, pool) = test_pool().await;
        let quote = quote_in(&pool, QuoteStatus::QuoteReady).await;

        let outcome = escalate(&pool, quote.id, AWAITING, TriggerReason::ProcessingTimeout, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, EscalationWrite::Skipped(QuoteStatus::QuoteReady));
        assert!(load_for_quote(&pool, quote.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_illegal_edge_is_skipped_even_when_listed() {
        let (_dir, pool) = test_pool().await;
        let quote = quote_in(&pool, QuoteStatus::Draft).await;

        let outcome = escalate(
            &pool,
            quote.id,
            &[QuoteStatus::Draft],
            TriggerReason::CustomerRequested,
            None,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, EscalationWrite::Skipped(QuoteStatus::Draft));
        assert!(load_for_quote(&pool, quote.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_quote_is_not_found() {
        let (_dir, pool) = test_pool().await;
        let err = escalate(&pool, Uuid::new_v4(), AWAITING, TriggerReason::ThresholdFailed, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_triggers_create_one_review() {
        let (_dir, pool) = test_pool().await;
        let quote = quote_in(&pool, QuoteStatus::AwaitingAnalysis).await;

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let pool = pool.clone();
                let reason = if i % 2 == 0 {
                    TriggerReason::ProcessingTimeout
                } else {
                    TriggerReason::ThresholdFailed
                };
                tokio::spawn(async move {
                    escalate(&pool, quote.id, AWAITING, reason, None, Utc::now()).await.unwrap()
                })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            if matches!(task.await.unwrap(), EscalationWrite::Created(_)) {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_resolve_only_once() {
        let (_dir, pool) = test_pool().await;
        let quote = quote_in(&pool, QuoteStatus::QuoteReady).await;
        escalate(
            &pool,
            quote.id,
            &[QuoteStatus::QuoteReady],
            TriggerReason::CustomerRequested,
            Some("note"),
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(resolve(&pool, quote.id, Utc::now()).await.unwrap());
        assert!(!resolve(&pool, quote.id, Utc::now()).await.unwrap());

        let review = load_for_quote(&pool, quote.id).await.unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Resolved);
        assert_eq!(review.note.as_deref(), Some("note"));
        assert!(review.resolved_at.is_some());
    }
}
