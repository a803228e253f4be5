use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::{
    domain::{Currency, Order, OrderStatus},
    error::{AppError, Result},
    repository::{parse_column, to_utc, OrderRepository},
};

#[derive(FromRow)]
struct OrderRow {
    id: String,
    user_id: String,
    total_cents: i64,
    currency: String,
    status: String,
    referral_affiliate_id: Option<String>,
    referral_commission_percent: Option<f64>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteOrderRepository {
    pool: SqlitePool,
}

impl SqliteOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn create(&self, order: Order) -> Result<Order> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, total_cents, currency, status,
                referral_affiliate_id, referral_commission_percent,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(&order.id)
        .bind(&order.user_id)
        .bind(order.total_cents)
        .bind(order.currency.as_str())
        .bind(order.status.as_str())
        .bind(&order.referral_affiliate_id)
        .bind(order.referral_commission_percent)
        .bind(order.created_at.naive_utc())
        .bind(order.updated_at.naive_utc())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::Conflict(format!("Order {} already exists", order.id))
            }
            other => AppError::Database(other.to_string()),
        })?;

        self.find_by_id(&order.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created order".to_string())
        })
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT id, user_id, total_cents, currency, status,
                   referral_affiliate_id, referral_commission_percent,
                   created_at, updated_at
            FROM orders
            WHERE id = ?
            "#
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Order {
                id: row.id,
                user_id: row.user_id,
                total_cents: row.total_cents,
                currency: parse_column::<Currency>(&row.currency)?,
                status: parse_column::<OrderStatus>(&row.status)?,
                referral_affiliate_id: row.referral_affiliate_id,
                referral_commission_percent: row.referral_commission_percent,
                created_at: to_utc(row.created_at),
                updated_at: to_utc(row.updated_at),
            })
        })
        .transpose()
    }

    async fn transition(&self, id: &str, from: OrderStatus, to: OrderStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = ?, updated_at = ? WHERE id = ? AND status = ?"
        )
        .bind(to.as_str())
        .bind(Utc::now().naive_utc())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
