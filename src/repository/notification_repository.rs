use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::{
    domain::{Audience, NewNotification, Notification, NotificationKind},
    error::Result,
    repository::{insert_notification, parse_uuid, to_utc, NotificationRepository},
};

#[derive(FromRow)]
struct NotificationRow {
    id: String,
    user_id: String,
    kind: String,
    title: String,
    body: String,
    read: bool,
    created_at: NaiveDateTime,
}

pub struct SqliteNotificationRepository {
    pool: SqlitePool,
}

impl SqliteNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn audience_filter(audience: Audience) -> &'static str {
        match audience {
            Audience::All => "1 = 1",
            Audience::Members => {
                "membership_status IN ('trial', 'active', 'grace_period', 'cancelled_pending')"
            }
            Audience::Affiliates => "is_affiliate = 1",
        }
    }
}

#[async_trait]
impl NotificationRepository for SqliteNotificationRepository {
    async fn create(&self, notification: NewNotification) -> Result<Notification> {
        let mut conn = self.pool.acquire().await?;
        insert_notification(&mut *conn, &notification, Utc::now()).await
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, user_id, kind, title, body, read, created_at
            FROM notifications
            WHERE user_id = ?
            ORDER BY created_at DESC
            "#
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Notification {
                    id: parse_uuid(&row.id)?,
                    user_id: row.user_id,
                    kind: NotificationKind::parse(&row.kind),
                    title: row.title,
                    body: row.body,
                    read: row.read,
                    created_at: to_utc(row.created_at),
                })
            })
            .collect()
    }

    async fn broadcast(&self, audience: Audience, title: &str, body: &str) -> Result<u64> {
        // Ids are derived in SQL so the whole fan-out is one statement.
        let sql = format!(
            r#"
            INSERT INTO notifications (id, user_id, kind, title, body, read, created_at)
            SELECT lower(hex(randomblob(16))), id, ?, ?, ?, 0, ?
            FROM users
            WHERE {}
            "#,
            Self::audience_filter(audience)
        );

        let result = sqlx::query(&sql)
            .bind(NotificationKind::Broadcast.as_str())
            .bind(title)
            .bind(body)
            .bind(Utc::now().naive_utc())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
