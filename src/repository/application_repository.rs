use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{
        AffiliateApplication, ApplicationDecision, ApplicationStatus, Approver, NewNotification,
        NotificationKind,
    },
    error::{AppError, Result},
    repository::{insert_notification, parse_column, parse_uuid, to_utc, ApplicationRepository},
};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const MAX_CODE_ATTEMPTS: usize = 10;

#[derive(FromRow)]
struct ApplicationRow {
    id: String,
    user_id: String,
    status: String,
    message: Option<String>,
    applied_at: NaiveDateTime,
    auto_approve_at: NaiveDateTime,
    decided_at: Option<NaiveDateTime>,
    decided_by: Option<String>,
    rejection_reason: Option<String>,
}

pub struct SqliteApplicationRepository {
    pool: SqlitePool,
    code_length: usize,
}

impl SqliteApplicationRepository {
    pub fn new(pool: SqlitePool, code_length: usize) -> Self {
        Self { pool, code_length }
    }

    fn row_to_application(row: ApplicationRow) -> Result<AffiliateApplication> {
        Ok(AffiliateApplication {
            id: parse_uuid(&row.id)?,
            user_id: row.user_id,
            status: parse_column::<ApplicationStatus>(&row.status)?,
            message: row.message,
            applied_at: to_utc(row.applied_at),
            auto_approve_at: to_utc(row.auto_approve_at),
            decided_at: row.decided_at.map(to_utc),
            decided_by: row.decided_by,
            rejection_reason: row.rejection_reason,
        })
    }

    async fn fetch(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<AffiliateApplication>> {
        let row = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT id, user_id, status, message, applied_at, auto_approve_at,
                   decided_at, decided_by, rejection_reason
            FROM affiliate_applications
            WHERE id = ?
            "#
        )
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

        row.map(Self::row_to_application).transpose()
    }

    async fn unique_code(&self, conn: &mut SqliteConnection) -> Result<String> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_affiliate_code(self.code_length);
            let taken = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM users WHERE affiliate_code = ?"
            )
            .bind(&code)
            .fetch_one(&mut *conn)
            .await?;

            if taken == 0 {
                return Ok(code);
            }
        }

        Err(AppError::Internal("Could not generate a unique affiliate code".to_string()))
    }

    /// Approves one application on the caller's transaction. Returns None if
    /// it was no longer pending.
    async fn approve_on(
        &self,
        conn: &mut SqliteConnection,
        id: Uuid,
        approver: &Approver,
        now: DateTime<Utc>,
    ) -> Result<Option<AffiliateApplication>> {
        let claimed = sqlx::query(
            r#"
            UPDATE affiliate_applications
            SET status = 'approved', decided_at = ?, decided_by = ?
            WHERE id = ? AND status = 'pending'
            "#
        )
        .bind(now.naive_utc())
        .bind(approver.to_string())
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

        if claimed.rows_affected() == 0 {
            return Ok(None);
        }

        let application = Self::fetch(&mut *conn, id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve approved application".to_string())
        })?;

        let existing_code = sqlx::query_scalar::<_, Option<String>>(
            "SELECT affiliate_code FROM users WHERE id = ?"
        )
        .bind(&application.user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", application.user_id)))?;

        // Returning affiliates keep the code already printed on their links.
        let code = match existing_code {
            Some(code) => code,
            None => self.unique_code(&mut *conn).await?,
        };

        sqlx::query(
            r#"
            UPDATE users
            SET is_affiliate = 1, affiliate_code = ?, updated_at = ?
            WHERE id = ?
            "#
        )
        .bind(&code)
        .bind(now.naive_utc())
        .bind(&application.user_id)
        .execute(&mut *conn)
        .await?;

        let notification = NewNotification::new(
            &application.user_id,
            NotificationKind::Affiliate,
            "Affiliate application approved",
            format!("Welcome to the affiliate program! Your affiliate code is {}.", code),
        );
        insert_notification(&mut *conn, &notification, now).await?;

        Ok(Some(application))
    }

    async fn reject_on(
        &self,
        conn: &mut SqliteConnection,
        id: Uuid,
        reason: &str,
        approver: &Approver,
        now: DateTime<Utc>,
    ) -> Result<Option<AffiliateApplication>> {
        let claimed = sqlx::query(
            r#"
            UPDATE affiliate_applications
            SET status = 'rejected', decided_at = ?, decided_by = ?, rejection_reason = ?
            WHERE id = ? AND status = 'pending'
            "#
        )
        .bind(now.naive_utc())
        .bind(approver.to_string())
        .bind(reason)
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

        if claimed.rows_affected() == 0 {
            return Ok(None);
        }

        let application = Self::fetch(&mut *conn, id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve rejected application".to_string())
        })?;

        let notification = NewNotification::new(
            &application.user_id,
            NotificationKind::Affiliate,
            "Affiliate application declined",
            format!("Your affiliate application was not approved: {}", reason),
        );
        insert_notification(&mut *conn, &notification, now).await?;

        Ok(Some(application))
    }
}

fn generate_affiliate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length.max(4))
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[async_trait]
impl ApplicationRepository for SqliteApplicationRepository {
    async fn create(
        &self,
        user_id: &str,
        message: Option<String>,
        applied_at: DateTime<Utc>,
        auto_approve_at: DateTime<Utc>,
    ) -> Result<AffiliateApplication> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO affiliate_applications (id, user_id, status, message, applied_at, auto_approve_at)
            VALUES (?, ?, 'pending', ?, ?, ?)
            "#
        )
        .bind(id.to_string())
        .bind(user_id)
        .bind(&message)
        .bind(applied_at.naive_utc())
        .bind(auto_approve_at.naive_utc())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::Conflict("An application is already pending".to_string())
            }
            other => AppError::Database(other.to_string()),
        })?;

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created application".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AffiliateApplication>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut *conn, id).await
    }

    async fn find_latest_for_user(&self, user_id: &str) -> Result<Option<AffiliateApplication>> {
        let row = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT id, user_id, status, message, applied_at, auto_approve_at,
                   decided_at, decided_by, rejection_reason
            FROM affiliate_applications
            WHERE user_id = ?
            ORDER BY applied_at DESC
            LIMIT 1
            "#
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_application).transpose()
    }

    async fn list(&self, status: Option<ApplicationStatus>) -> Result<Vec<AffiliateApplication>> {
        let rows = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT id, user_id, status, message, applied_at, auto_approve_at,
                   decided_at, decided_by, rejection_reason
            FROM affiliate_applications
            WHERE ? IS NULL OR status = ?
            ORDER BY applied_at
            "#
        )
        .bind(status.map(|s| s.as_str()))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_application).collect()
    }

    async fn decide(
        &self,
        id: Uuid,
        decision: &ApplicationDecision,
        approver: &Approver,
        now: DateTime<Utc>,
    ) -> Result<Option<AffiliateApplication>> {
        let mut tx = self.pool.begin().await?;

        let decided = match decision {
            ApplicationDecision::Approve => self.approve_on(&mut *tx, id, approver, now).await?,
            ApplicationDecision::Reject { reason } => {
                self.reject_on(&mut *tx, id, reason, approver, now).await?
            }
        };

        if decided.is_some() {
            tx.commit().await?;
        }

        Ok(decided)
    }

    async fn approve_due(&self, now: DateTime<Utc>) -> Result<Vec<AffiliateApplication>> {
        let mut tx = self.pool.begin().await?;

        let due = sqlx::query_scalar::<_, String>(
            r#"
            SELECT id FROM affiliate_applications
            WHERE status = 'pending' AND auto_approve_at <= ?
            ORDER BY auto_approve_at
            "#
        )
        .bind(now.naive_utc())
        .fetch_all(&mut *tx)
        .await?;

        let mut approved = Vec::with_capacity(due.len());
        for id in due {
            let id = parse_uuid(&id)?;
            if let Some(application) = self.approve_on(&mut *tx, id, &Approver::System, now).await? {
                approved.push(application);
            }
        }

        tx.commit().await?;

        Ok(approved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affiliate_codes_use_unambiguous_alphabet() {
        let code = generate_affiliate_code(8);
        assert_eq!(code.len(), 8);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        assert!(!code.contains('O') && !code.contains('0'));
    }

    #[test]
    fn affiliate_codes_have_a_floor_length() {
        assert_eq!(generate_affiliate_code(1).len(), 4);
    }
}
