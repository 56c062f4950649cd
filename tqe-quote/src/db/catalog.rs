//! Settings and catalog tables
//!
//! Catalog rows are maintained by external catalog management; this service
//! reads them. The write helpers exist for provisioning and tests.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tqe_common::{Error, Result};

use super::{decode_decimal, decode_enum, encode_enum};
use crate::models::{CertificationType, DeliveryOption, EligibilityRule};

/// Generic setting getter
///
/// Returns None if the key doesn't exist; a value that fails to parse is a
/// configuration error.
pub async fn get_setting<T: FromStr>(pool: &SqlitePool, key: &str) -> Result<Option<T>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match value {
        Some(s) => match s.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Generic setting setter (insert or update)
pub async fn set_setting<T: ToString>(pool: &SqlitePool, key: &str, value: T) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value)
        VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Active delivery options in display order
pub async fn list_delivery_options(pool: &SqlitePool) -> Result<Vec<DeliveryOption>> {
    let rows = sqlx::query(
        "SELECT * FROM delivery_options WHERE is_active = 1 ORDER BY sort_order, code",
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<DeliveryOption> {
            let group: String = row.try_get("delivery_group")?;
            let price: String = row.try_get("price")?;
            Ok(DeliveryOption {
                code: row.try_get("code")?,
                name: row.try_get("name")?,
                group: decode_enum("delivery_options.delivery_group", &group)?,
                price: decode_decimal("delivery_options.price", &price)?,
                requires_shipping_address: row.try_get("requires_shipping_address")?,
                is_mandatory: row.try_get("is_mandatory")?,
                is_active: row.try_get("is_active")?,
            })
        })
        .collect()
}

pub async fn upsert_delivery_option(
    pool: &SqlitePool,
    option: &DeliveryOption,
    sort_order: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO delivery_options (
            code, name, delivery_group, price, requires_shipping_address,
            is_mandatory, is_active, sort_order
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(code) DO UPDATE SET
            name = excluded.name,
            delivery_group = excluded.delivery_group,
            price = excluded.price,
            requires_shipping_address = excluded.requires_shipping_address,
            is_mandatory = excluded.is_mandatory,
            is_active = excluded.is_active,
            sort_order = excluded.sort_order
        "#,
    )
    .bind(&option.code)
    .bind(&option.name)
    .bind(encode_enum(&option.group)?)
    .bind(option.price.to_string())
    .bind(option.requires_shipping_address)
    .bind(option.is_mandatory)
    .bind(option.is_active)
    .bind(sort_order)
    .execute(pool)
    .await?;

    Ok(())
}

/// Active certification types
pub async fn list_certification_types(pool: &SqlitePool) -> Result<Vec<CertificationType>> {
    let rows = sqlx::query("SELECT * FROM certification_types WHERE is_active = 1 ORDER BY code")
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| -> Result<CertificationType> {
            let price: String = row.try_get("price")?;
            Ok(CertificationType {
                code: row.try_get("code")?,
                name: row.try_get("name")?,
                price: decode_decimal("certification_types.price", &price)?,
                is_active: row.try_get("is_active")?,
            })
        })
        .collect()
}

pub async fn upsert_certification_type(pool: &SqlitePool, cert: &CertificationType) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO certification_types (code, name, price, is_active)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(code) DO UPDATE SET
            name = excluded.name,
            price = excluded.price,
            is_active = excluded.is_active
        "#,
    )
    .bind(&cert.code)
    .bind(&cert.name)
    .bind(cert.price.to_string())
    .bind(cert.is_active)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_holidays(pool: &SqlitePool) -> Result<Vec<NaiveDate>> {
    let dates: Vec<String> = sqlx::query_scalar("SELECT holiday_date FROM holidays")
        .fetch_all(pool)
        .await?;

    dates
        .iter()
        .map(|raw| {
            NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .map_err(|e| Error::Config(format!("Invalid holiday date {:?}: {}", raw, e)))
        })
        .collect()
}

pub async fn add_holiday(pool: &SqlitePool, date: NaiveDate, name: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO holidays (holiday_date, name) VALUES (?, ?) \
         ON CONFLICT(holiday_date) DO UPDATE SET name = excluded.name",
    )
    .bind(date.format("%Y-%m-%d").to_string())
    .bind(name)
    .execute(pool)
    .await?;

    Ok(())
}

/// Every row of the same-day matrix (inactive rows included; the resolver skips them)
pub async fn list_eligibility_rules(pool: &SqlitePool) -> Result<Vec<EligibilityRule>> {
    let rows = sqlx::query(
        "SELECT source_language, target_language, document_type, intended_use, is_active \
         FROM same_day_eligibility",
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<EligibilityRule> {
            Ok(EligibilityRule {
                source_language: row.try_get("source_language")?,
                target_language: row.try_get("target_language")?,
                document_type: row.try_get("document_type")?,
                intended_use: row.try_get("intended_use")?,
                is_active: row.try_get("is_active")?,
            })
        })
        .collect()
}

pub async fn add_eligibility_rule(pool: &SqlitePool, rule: &EligibilityRule) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO same_day_eligibility (
            source_language, target_language, document_type, intended_use, is_active
        ) VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&rule.source_language)
    .bind(&rule.target_language)
    .bind(&rule.document_type)
    .bind(&rule.intended_use)
    .bind(rule.is_active)
    .execute(pool)
    .await?;

    Ok(())
}

/// Tax rate for a region code (case-insensitive)
pub async fn tax_rate_for_region(pool: &SqlitePool, region: &str) -> Result<Option<Decimal>> {
    let rate: Option<String> =
        sqlx::query_scalar("SELECT rate FROM tax_rates WHERE UPPER(region_code) = UPPER(?)")
            .bind(region.trim())
            .fetch_optional(pool)
            .await?;

    rate.map(|raw| decode_decimal("tax_rates.rate", &raw)).transpose()
}

pub async fn set_tax_rate(pool: &SqlitePool, region: &str, rate: Decimal) -> Result<()> {
    sqlx::query(
        "INSERT INTO tax_rates (region_code, rate) VALUES (?, ?) \
         ON CONFLICT(region_code) DO UPDATE SET rate = excluded.rate",
    )
    .bind(region.trim().to_uppercase())
    .bind(rate.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use crate::models::DeliveryGroup;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_setting_round_trip_and_parse_failure() {
        let (_dir, pool) = test_pool().await;

        assert_eq!(get_setting::<Decimal>(&pool, "base_rate").await.unwrap(), None);
        set_setting(&pool, "base_rate", dec!(65.00)).await.unwrap();
        assert_eq!(get_setting::<Decimal>(&pool, "base_rate").await.unwrap(), Some(dec!(65.00)));

        set_setting(&pool, "words_per_page", "lots").await.unwrap();
        let err = get_setting::<Decimal>(&pool, "words_per_page").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_inactive_catalog_rows_hidden() {
        let (_dir, pool) = test_pool().await;
        let courier = DeliveryOption {
            code: "courier".to_string(),
            name: "Courier".to_string(),
            group: DeliveryGroup::Physical,
            price: dec!(25.00),
            requires_shipping_address: true,
            is_mandatory: false,
            is_active: true,
        };
        upsert_delivery_option(&pool, &courier, 1).await.unwrap();
        upsert_delivery_option(
            &pool,
            &DeliveryOption { code: "fax".to_string(), is_active: false, ..courier.clone() },
            2,
        )
        .await
        .unwrap();

        let options = list_delivery_options(&pool).await.unwrap();
        assert_eq!(options, vec![courier]);
    }

    #[tokio::test]
    async fn test_tax_rate_lookup_is_case_insensitive() {
        let (_dir, pool) = test_pool().await;
        set_tax_rate(&pool, "ab", dec!(0.05)).await.unwrap();

        assert_eq!(tax_rate_for_region(&pool, "AB").await.unwrap(), Some(dec!(0.05)));
        assert_eq!(tax_rate_for_region(&pool, " ab ").await.unwrap(), Some(dec!(0.05)));
        assert_eq!(tax_rate_for_region(&pool, "ON").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_holidays_parse() {
        let (_dir, pool) = test_pool().await;
        let canada_day = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        add_holiday(&pool, canada_day, "Canada Day").await.unwrap();
        assert_eq!(list_holidays(&pool).await.unwrap(), vec![canada_day]);
    }
}
