use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{Currency, NewPayout, Payout, PayoutStatus, PayoutTransition},
    error::{AppError, Result},
    repository::{parse_column, parse_uuid, to_utc, PayoutRepository},
};

#[derive(FromRow)]
struct PayoutRow {
    id: String,
    affiliate_id: String,
    payout_item_id: String,
    amount_cents: i64,
    currency: String,
    status: String,
    created_at: NaiveDateTime,
    processing_at: Option<NaiveDateTime>,
    completed_at: Option<NaiveDateTime>,
    failed_at: Option<NaiveDateTime>,
    refunded_at: Option<NaiveDateTime>,
}

pub struct SqlitePayoutRepository {
    pool: SqlitePool,
}

impl SqlitePayoutRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_payout(row: PayoutRow) -> Result<Payout> {
        Ok(Payout {
            id: parse_uuid(&row.id)?,
            affiliate_id: row.affiliate_id,
            payout_item_id: row.payout_item_id,
            amount_cents: row.amount_cents,
            currency: parse_column::<Currency>(&row.currency)?,
            status: parse_column::<PayoutStatus>(&row.status)?,
            created_at: to_utc(row.created_at),
            processing_at: row.processing_at.map(to_utc),
            completed_at: row.completed_at.map(to_utc),
            failed_at: row.failed_at.map(to_utc),
            refunded_at: row.refunded_at.map(to_utc),
        })
    }

    async fn fetch(conn: &mut SqliteConnection, payout_item_id: &str) -> Result<Option<Payout>> {
        let row = sqlx::query_as::<_, PayoutRow>(
            r#"
            SELECT id, affiliate_id, payout_item_id, amount_cents, currency, status,
                   created_at, processing_at, completed_at, failed_at, refunded_at
            FROM payouts
            WHERE payout_item_id = ?
            "#
        )
        .bind(payout_item_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(Self::row_to_payout).transpose()
    }
}

#[async_trait]
impl PayoutRepository for SqlitePayoutRepository {
    async fn create(&self, payout: NewPayout, now: DateTime<Utc>) -> Result<Payout> {
        if payout.amount_cents <= 0 {
            return Err(AppError::BadRequest("Payout amount must be positive".to_string()));
        }

        let mut tx = self.pool.begin().await?;

        let currency = sqlx::query_scalar::<_, String>(
            "SELECT balance_currency FROM users WHERE id = ?"
        )
        .bind(&payout.affiliate_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Affiliate {} not found", payout.affiliate_id)))?;

        let debited = sqlx::query(
            r#"
            UPDATE users
            SET affiliate_balance_cents = affiliate_balance_cents - ?,
                updated_at = ?
            WHERE id = ? AND affiliate_balance_cents >= ?
            "#
        )
        .bind(payout.amount_cents)
        .bind(now.naive_utc())
        .bind(&payout.affiliate_id)
        .bind(payout.amount_cents)
        .execute(&mut *tx)
        .await?;

        if debited.rows_affected() == 0 {
            return Err(AppError::InsufficientBalance(format!(
                "Affiliate {} cannot cover a payout of {} cents",
                payout.affiliate_id, payout.amount_cents
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO payouts (id, affiliate_id, payout_item_id, amount_cents, currency, status, created_at)
            VALUES (?, ?, ?, ?, ?, 'pending', ?)
            "#
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&payout.affiliate_id)
        .bind(&payout.payout_item_id)
        .bind(payout.amount_cents)
        .bind(&currency)
        .bind(now.naive_utc())
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::Conflict(
                format!("Payout item {} already recorded", payout.payout_item_id),
            ),
            other => AppError::Database(other.to_string()),
        })?;

        let created = Self::fetch(&mut *tx, &payout.payout_item_id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created payout".to_string())
        })?;
        tx.commit().await?;

        Ok(created)
    }

    async fn find_by_item_id(&self, payout_item_id: &str) -> Result<Option<Payout>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut *conn, payout_item_id).await
    }

    async fn list_by_affiliate(&self, affiliate_id: &str) -> Result<Vec<Payout>> {
        let rows = sqlx::query_as::<_, PayoutRow>(
            r#"
            SELECT id, affiliate_id, payout_item_id, amount_cents, currency, status,
                   created_at, processing_at, completed_at, failed_at, refunded_at
            FROM payouts
            WHERE affiliate_id = ?
            ORDER BY created_at
            "#
        )
        .bind(affiliate_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_payout).collect()
    }

    async fn mark_completed(&self, payout_item_id: &str, now: DateTime<Utc>) -> Result<PayoutTransition> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE payouts
            SET status = 'completed', completed_at = ?
            WHERE payout_item_id = ? AND status IN ('pending', 'processing')
            "#
        )
        .bind(now.naive_utc())
        .bind(payout_item_id)
        .execute(&mut *tx)
        .await?;

        let payout = match Self::fetch(&mut *tx, payout_item_id).await? {
            Some(payout) => payout,
            None => return Ok(PayoutTransition::NotFound),
        };
        tx.commit().await?;

        Ok(match (result.rows_affected(), payout.status) {
            (1, _) => PayoutTransition::Applied(payout),
            (_, PayoutStatus::Completed) => PayoutTransition::Unchanged(payout),
            _ => PayoutTransition::Conflicting(payout),
        })
    }

    async fn mark_failed(&self, payout_item_id: &str, now: DateTime<Utc>) -> Result<PayoutTransition> {
        let mut tx = self.pool.begin().await?;

        // The status guard makes the refund below happen at most once.
        let result = sqlx::query(
            r#"
            UPDATE payouts
            SET status = 'failed', failed_at = ?, refunded_at = ?
            WHERE payout_item_id = ? AND status IN ('pending', 'processing')
            "#
        )
        .bind(now.naive_utc())
        .bind(now.naive_utc())
        .bind(payout_item_id)
        .execute(&mut *tx)
        .await?;

        let payout = match Self::fetch(&mut *tx, payout_item_id).await? {
            Some(payout) => payout,
            None => return Ok(PayoutTransition::NotFound),
        };

        if result.rows_affected() == 0 {
            return Ok(match payout.status {
                PayoutStatus::Failed => PayoutTransition::Unchanged(payout),
                _ => PayoutTransition::Conflicting(payout),
            });
        }

        let refunded = sqlx::query(
            r#"
            UPDATE users
            SET affiliate_balance_cents = affiliate_balance_cents + ?,
                updated_at = ?
            WHERE id = ?
            "#
        )
        .bind(payout.amount_cents)
        .bind(now.naive_utc())
        .bind(&payout.affiliate_id)
        .execute(&mut *tx)
        .await?;

        if refunded.rows_affected() == 0 {
            // The affiliate was deleted; the failure is still recorded.
            tracing::warn!(
                payout_item_id,
                affiliate_id = %payout.affiliate_id,
                "Payout failed for a deleted affiliate, nothing to refund"
            );
        }

        tx.commit().await?;

        Ok(PayoutTransition::Applied(payout))
    }
}
