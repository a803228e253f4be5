use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{
        Applied, Commission, CommissionType, Currency, MembershipChange, NewCommission,
        PlanType, StoreCreditAdjustment, User,
    },
    error::{AppError, Result},
    repository::{
        claim_dedupe_key, parse_column, parse_uuid, to_utc,
        user_repository::fetch_user,
        LedgerRepository,
    },
};

/// Attempts at the membership compare-and-set before giving up.
const MAX_CAS_ATTEMPTS: usize = 5;

#[derive(FromRow)]
struct CommissionRow {
    id: String,
    affiliate_id: String,
    referred_user_id: String,
    amount_cents: i64,
    currency: String,
    commission_type: String,
    plan_type: Option<String>,
    commission_percent: Option<f64>,
    source_order_id: String,
    status: String,
    created_at: NaiveDateTime,
}

pub struct SqliteLedgerRepository {
    pool: SqlitePool,
}

impl SqliteLedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_commission(row: CommissionRow) -> Result<Commission> {
        Ok(Commission {
            id: parse_uuid(&row.id)?,
            affiliate_id: row.affiliate_id,
            referred_user_id: row.referred_user_id,
            amount_cents: row.amount_cents,
            currency: parse_column::<Currency>(&row.currency)?,
            commission_type: parse_column::<CommissionType>(&row.commission_type)?,
            plan_type: row.plan_type.as_deref().map(parse_column::<PlanType>).transpose()?,
            commission_percent: row.commission_percent,
            source_order_id: row.source_order_id,
            status: row.status,
            created_at: to_utc(row.created_at),
        })
    }
}

#[async_trait]
impl LedgerRepository for SqliteLedgerRepository {
    async fn apply_membership(
        &self,
        user_id: &str,
        change: &MembershipChange,
        dedupe_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Applied<User>> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut tx = self.pool.begin().await?;

            // Take the write lock before reading. A deferred transaction that
            // reads first cannot upgrade once another writer has committed.
            sqlx::query("UPDATE users SET version = version WHERE id = ?")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

            if let Some(key) = dedupe_key {
                if !claim_dedupe_key(&mut *tx, key, change.name(), now).await? {
                    return Ok(Applied::Duplicate);
                }
            }

            let user = fetch_user(&mut *tx, user_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

            let current = user.membership();
            let next = change.apply(&current, now)?;
            if next == current {
                return Ok(Applied::Skipped("membership unchanged".to_string()));
            }

            let result = sqlx::query(
                r#"
                UPDATE users
                SET membership_status = ?,
                    membership_tier = ?,
                    membership_expiry = ?,
                    last_payment_date = ?,
                    payment_failed_at = ?,
                    cancelled_at = ?,
                    subscription_id = ?,
                    vault_locked = ?,
                    version = version + 1,
                    updated_at = ?
                WHERE id = ? AND version = ?
                "#
            )
            .bind(next.status.as_str())
            .bind(next.tier.map(|t| t.as_str()))
            .bind(next.expiry.map(|dt| dt.naive_utc()))
            .bind(next.last_payment_date.map(|dt| dt.naive_utc()))
            .bind(next.payment_failed_at.map(|dt| dt.naive_utc()))
            .bind(next.cancelled_at.map(|dt| dt.naive_utc()))
            .bind(&next.subscription_id)
            .bind(next.vault_locked)
            .bind(now.naive_utc())
            .bind(user_id)
            .bind(user.version)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tracing::debug!(
                    user_id,
                    attempt,
                    change = change.name(),
                    "Membership version moved underneath us, retrying"
                );
                continue;
            }

            let updated = fetch_user(&mut *tx, user_id).await?.ok_or_else(|| {
                AppError::Database("Failed to retrieve updated user".to_string())
            })?;
            tx.commit().await?;

            return Ok(Applied::Applied(updated));
        }

        Err(AppError::Conflict(format!(
            "Membership for user {} is being updated concurrently",
            user_id
        )))
    }

    async fn credit_commission(
        &self,
        commission: NewCommission,
        dedupe_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Applied<Commission>> {
        if commission.amount_cents <= 0 {
            return Ok(Applied::Skipped("zero commission".to_string()));
        }

        let mut tx = self.pool.begin().await?;

        if !claim_dedupe_key(&mut *tx, dedupe_key, "commission", now).await? {
            return Ok(Applied::Duplicate);
        }

        let already_recorded = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM commissions WHERE source_order_id = ?"
        )
        .bind(&commission.source_order_id)
        .fetch_one(&mut *tx)
        .await?;

        if already_recorded > 0 {
            return Ok(Applied::Duplicate);
        }

        let credited = sqlx::query(
            r#"
            UPDATE users
            SET affiliate_balance_cents = affiliate_balance_cents + ?,
                updated_at = ?
            WHERE id = ?
            "#
        )
        .bind(commission.amount_cents)
        .bind(now.naive_utc())
        .bind(&commission.affiliate_id)
        .execute(&mut *tx)
        .await?;

        if credited.rows_affected() == 0 {
            return Ok(Applied::Skipped(format!(
                "affiliate {} not found",
                commission.affiliate_id
            )));
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO commissions (
                id, affiliate_id, referred_user_id, amount_cents, currency,
                commission_type, plan_type, commission_percent, source_order_id,
                status, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'completed', ?)
            "#
        )
        .bind(id.to_string())
        .bind(&commission.affiliate_id)
        .bind(&commission.referred_user_id)
        .bind(commission.amount_cents)
        .bind(commission.currency.as_str())
        .bind(commission.commission_type.as_str())
        .bind(commission.plan_type.map(|p| p.as_str()))
        .bind(commission.commission_percent)
        .bind(&commission.source_order_id)
        .bind(now.naive_utc())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Applied::Applied(Commission {
            id,
            affiliate_id: commission.affiliate_id,
            referred_user_id: commission.referred_user_id,
            amount_cents: commission.amount_cents,
            currency: commission.currency,
            commission_type: commission.commission_type,
            plan_type: commission.plan_type,
            commission_percent: commission.commission_percent,
            source_order_id: commission.source_order_id,
            status: "completed".to_string(),
            created_at: now,
        }))
    }

    async fn adjust_store_credit(
        &self,
        adjustment: StoreCreditAdjustment,
        dedupe_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Applied<User>> {
        if adjustment.amount_cents == 0 {
            return Ok(Applied::Skipped("zero adjustment".to_string()));
        }

        let mut tx = self.pool.begin().await?;

        if let Some(key) = dedupe_key {
            if !claim_dedupe_key(&mut *tx, key, "store_credit", now).await? {
                return Ok(Applied::Duplicate);
            }
        }

        let result = sqlx::query(
            r#"
            UPDATE users
            SET store_credit_cents = store_credit_cents + ?,
                updated_at = ?
            WHERE id = ? AND store_credit_cents + ? >= 0
            "#
        )
        .bind(adjustment.amount_cents)
        .bind(now.naive_utc())
        .bind(&adjustment.user_id)
        .bind(adjustment.amount_cents)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return match fetch_user(&mut *tx, &adjustment.user_id).await? {
                Some(user) => Err(AppError::InsufficientBalance(format!(
                    "Store credit of {} cents cannot cover {} cents",
                    user.store_credit_cents, -adjustment.amount_cents
                ))),
                None => Err(AppError::NotFound(format!(
                    "User {} not found",
                    adjustment.user_id
                ))),
            };
        }

        sqlx::query(
            r#"
            INSERT INTO store_credit_entries (id, user_id, amount_cents, reason, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&adjustment.user_id)
        .bind(adjustment.amount_cents)
        .bind(&adjustment.reason)
        .bind(&adjustment.created_by)
        .bind(now.naive_utc())
        .execute(&mut *tx)
        .await?;

        let updated = fetch_user(&mut *tx, &adjustment.user_id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve updated user".to_string())
        })?;
        tx.commit().await?;

        Ok(Applied::Applied(updated))
    }

    async fn find_commission_by_order(&self, source_order_id: &str) -> Result<Option<Commission>> {
        let row = sqlx::query_as::<_, CommissionRow>(
            r#"
            SELECT id, affiliate_id, referred_user_id, amount_cents, currency,
                   commission_type, plan_type, commission_percent, source_order_id,
                   status, created_at
            FROM commissions
            WHERE source_order_id = ?
            "#
        )
        .bind(source_order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_commission).transpose()
    }

    async fn list_commissions_by_affiliate(&self, affiliate_id: &str) -> Result<Vec<Commission>> {
        let rows = sqlx::query_as::<_, CommissionRow>(
            r#"
            SELECT id, affiliate_id, referred_user_id, amount_cents, currency,
                   commission_type, plan_type, commission_percent, source_order_id,
                   status, created_at
            FROM commissions
            WHERE affiliate_id = ?
            ORDER BY created_at
            "#
        )
        .bind(affiliate_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_commission).collect()
    }
}
