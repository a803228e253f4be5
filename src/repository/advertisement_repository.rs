use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::Advertisement,
    error::{AppError, Result},
    repository::{parse_uuid, to_utc, AdvertisementRepository},
};

#[derive(FromRow)]
struct AdvertisementRow {
    id: String,
    owner_id: String,
    title: String,
    status: String,
    expires_at: NaiveDateTime,
    created_at: NaiveDateTime,
}

impl TryFrom<AdvertisementRow> for Advertisement {
    type Error = AppError;

    fn try_from(row: AdvertisementRow) -> Result<Self> {
        Ok(Advertisement {
            id: parse_uuid(&row.id)?,
            owner_id: row.owner_id,
            title: row.title,
            status: row.status,
            expires_at: to_utc(row.expires_at),
            created_at: to_utc(row.created_at),
        })
    }
}

pub struct SqliteAdvertisementRepository {
    pool: SqlitePool,
}

impl SqliteAdvertisementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AdvertisementRepository for SqliteAdvertisementRepository {
    async fn create(&self, owner_id: &str, title: &str, expires_at: DateTime<Utc>) -> Result<Advertisement> {
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO advertisements (id, owner_id, title, status, expires_at, created_at, updated_at)
            VALUES (?, ?, ?, 'active', ?, ?, ?)
            "#
        )
        .bind(id.to_string())
        .bind(owner_id)
        .bind(title)
        .bind(expires_at.naive_utc())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created advertisement".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Advertisement>> {
        let row = sqlx::query_as::<_, AdvertisementRow>(
            "SELECT id, owner_id, title, status, expires_at, created_at FROM advertisements WHERE id = ?"
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Advertisement::try_from).transpose()
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<Advertisement>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, AdvertisementRow>(
            r#"
            SELECT id, owner_id, title, status, expires_at, created_at
            FROM advertisements
            WHERE status = 'active' AND expires_at <= ?
            "#
        )
        .bind(now.naive_utc())
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE advertisements
            SET status = 'expired', updated_at = ?
            WHERE status = 'active' AND expires_at <= ?
            "#
        )
        .bind(now.naive_utc())
        .bind(now.naive_utc())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        rows.into_iter()
            .map(|row| {
                let mut ad = Advertisement::try_from(row)?;
                ad.status = "expired".to_string();
                Ok(ad)
            })
            .collect()
    }
}
