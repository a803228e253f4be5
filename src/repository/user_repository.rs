use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{CreateUserRequest, Currency, MembershipStatus, PlanType, User},
    error::{AppError, Result},
    repository::{parse_column, to_utc, UserRepository},
};

pub(crate) const USER_COLUMNS: &str = r#"
    id, email, display_name, membership_status, membership_tier,
    membership_expiry, last_payment_date, payment_failed_at, cancelled_at,
    subscription_id, vault_locked, is_affiliate, affiliate_code,
    affiliate_balance_cents, balance_currency, referrer_id,
    store_credit_cents, version, created_at, updated_at
"#;

// Database row struct that matches SQLite schema
#[derive(FromRow)]
pub(crate) struct UserRow {
    id: String,
    email: String,
    display_name: String,
    membership_status: String,
    membership_tier: Option<String>,
    membership_expiry: Option<NaiveDateTime>,
    last_payment_date: Option<NaiveDateTime>,
    payment_failed_at: Option<NaiveDateTime>,
    cancelled_at: Option<NaiveDateTime>,
    subscription_id: Option<String>,
    vault_locked: bool,
    is_affiliate: bool,
    affiliate_code: Option<String>,
    affiliate_balance_cents: i64,
    balance_currency: String,
    referrer_id: Option<String>,
    store_credit_cents: i64,
    version: i64,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub(crate) fn row_to_user(row: UserRow) -> Result<User> {
    Ok(User {
        id: row.id,
        email: row.email,
        display_name: row.display_name,
        membership_status: parse_column::<MembershipStatus>(&row.membership_status)?,
        membership_tier: row
            .membership_tier
            .as_deref()
            .map(parse_column::<PlanType>)
            .transpose()?,
        membership_expiry: row.membership_expiry.map(to_utc),
        last_payment_date: row.last_payment_date.map(to_utc),
        payment_failed_at: row.payment_failed_at.map(to_utc),
        cancelled_at: row.cancelled_at.map(to_utc),
        subscription_id: row.subscription_id,
        vault_locked: row.vault_locked,
        is_affiliate: row.is_affiliate,
        affiliate_code: row.affiliate_code,
        affiliate_balance_cents: row.affiliate_balance_cents,
        balance_currency: parse_column::<Currency>(&row.balance_currency)?,
        referrer_id: row.referrer_id,
        store_credit_cents: row.store_credit_cents,
        version: row.version,
        created_at: to_utc(row.created_at),
        updated_at: to_utc(row.updated_at),
    })
}

/// Loads a user on an existing connection, typically inside a transaction.
pub(crate) async fn fetch_user(conn: &mut SqliteConnection, id: &str) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(row_to_user).transpose()
}

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_many(&self, sql: &str, binds: &[String]) -> Result<Vec<User>> {
        let mut query = sqlx::query_as::<_, UserRow>(sql);
        for value in binds {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.into_iter().map(row_to_user).collect()
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, request: CreateUserRequest) -> Result<User> {
        let id = request.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO users (
                id, email, display_name, balance_currency, referrer_id,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(&id)
        .bind(&request.email)
        .bind(&request.display_name)
        .bind(request.balance_currency.as_str())
        .bind(&request.referrer_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::Conflict("User already exists".to_string())
            }
            other => AppError::Database(other.to_string()),
        })?;

        self.find_by_id(&id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created user".to_string())
        })
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        fetch_user(&mut *conn, id).await
    }

    async fn find_by_affiliate_code(&self, code: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE affiliate_code = ?",
            USER_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_user).transpose()
    }

    async fn list_by_status(&self, status: MembershipStatus) -> Result<Vec<User>> {
        self.fetch_many(
            &format!(
                "SELECT {} FROM users WHERE membership_status = ? ORDER BY created_at",
                USER_COLUMNS
            ),
            &[status.as_str().to_string()],
        )
        .await
    }

    async fn list_lapsed(&self, statuses: &[MembershipStatus], now: DateTime<Utc>) -> Result<Vec<User>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            r#"
            SELECT {} FROM users
            WHERE membership_status IN ({})
              AND membership_expiry IS NOT NULL
              AND membership_expiry <= ?
            ORDER BY membership_expiry
            "#,
            USER_COLUMNS, placeholders
        );

        let mut query = sqlx::query_as::<_, UserRow>(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.bind(now.naive_utc()).fetch_all(&self.pool).await?;

        rows.into_iter().map(row_to_user).collect()
    }

    async fn list_affiliates(&self) -> Result<Vec<User>> {
        self.fetch_many(
            &format!(
                r#"
                SELECT {} FROM users
                WHERE is_affiliate = 1
                   OR affiliate_balance_cents > 0
                   OR id IN (SELECT affiliate_id FROM commissions)
                   OR id IN (SELECT affiliate_id FROM payouts)
                ORDER BY id
                "#,
                USER_COLUMNS
            ),
            &[],
        )
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE users SET referrer_id = NULL WHERE referrer_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        // Notifications, applications, store credit entries and ads cascade.
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() == 1)
    }
}
