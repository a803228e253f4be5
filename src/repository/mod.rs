use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::domain::*;
use crate::error::{AppError, Result};

pub mod advertisement_repository;
pub mod application_repository;
pub mod ledger_repository;
pub mod notification_repository;
pub mod order_repository;
pub mod payout_repository;
pub mod user_repository;

pub use advertisement_repository::SqliteAdvertisementRepository;
pub use application_repository::SqliteApplicationRepository;
pub use ledger_repository::SqliteLedgerRepository;
pub use notification_repository::SqliteNotificationRepository;
pub use order_repository::SqliteOrderRepository;
pub use payout_repository::SqlitePayoutRepository;
pub use user_repository::SqliteUserRepository;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, request: CreateUserRequest) -> Result<User>;
    async fn find_by_id(&self, id: &str) -> Result<Option<User>>;
    async fn find_by_affiliate_code(&self, code: &str) -> Result<Option<User>>;
    async fn list_by_status(&self, status: MembershipStatus) -> Result<Vec<User>>;
    async fn list_lapsed(&self, statuses: &[MembershipStatus], now: DateTime<Utc>) -> Result<Vec<User>>;
    /// Everyone with affiliate money history, including former affiliates
    /// who were paid out in full.
    async fn list_affiliates(&self) -> Result<Vec<User>>;
    /// Removes the user and everything owned by them. Commission and payout
    /// rows are kept. Returns false if the user did not exist.
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// Balance and membership mutations. Every method runs as one transaction
/// and claims its dedupe key in that same transaction.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn apply_membership(
        &self,
        user_id: &str,
        change: &MembershipChange,
        dedupe_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Applied<User>>;

    /// Credits the affiliate balance and appends the commission record.
    async fn credit_commission(
        &self,
        commission: NewCommission,
        dedupe_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Applied<Commission>>;

    async fn adjust_store_credit(
        &self,
        adjustment: StoreCreditAdjustment,
        dedupe_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Applied<User>>;

    async fn find_commission_by_order(&self, source_order_id: &str) -> Result<Option<Commission>>;
    async fn list_commissions_by_affiliate(&self, affiliate_id: &str) -> Result<Vec<Commission>>;
}

#[async_trait]
pub trait PayoutRepository: Send + Sync {
    /// Debits the affiliate balance and records a pending payout.
    async fn create(&self, payout: NewPayout, now: DateTime<Utc>) -> Result<Payout>;
    async fn find_by_item_id(&self, payout_item_id: &str) -> Result<Option<Payout>>;
    async fn list_by_affiliate(&self, affiliate_id: &str) -> Result<Vec<Payout>>;
    async fn mark_completed(&self, payout_item_id: &str, now: DateTime<Utc>) -> Result<PayoutTransition>;
    /// Marks the payout failed and refunds its amount, at most once.
    async fn mark_failed(&self, payout_item_id: &str, now: DateTime<Utc>) -> Result<PayoutTransition>;
}

#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn create(
        &self,
        user_id: &str,
        message: Option<String>,
        applied_at: DateTime<Utc>,
        auto_approve_at: DateTime<Utc>,
    ) -> Result<AffiliateApplication>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<AffiliateApplication>>;
    async fn find_latest_for_user(&self, user_id: &str) -> Result<Option<AffiliateApplication>>;
    async fn list(&self, status: Option<ApplicationStatus>) -> Result<Vec<AffiliateApplication>>;

    /// Applies a decision if the application is still pending. Returns None
    /// when another writer decided it first.
    async fn decide(
        &self,
        id: Uuid,
        decision: &ApplicationDecision,
        approver: &Approver,
        now: DateTime<Utc>,
    ) -> Result<Option<AffiliateApplication>>;

    /// Approves every pending application due at `now` in a single
    /// all-or-nothing transaction.
    async fn approve_due(&self, now: DateTime<Utc>) -> Result<Vec<AffiliateApplication>>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, notification: NewNotification) -> Result<Notification>;
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Notification>>;
    async fn broadcast(&self, audience: Audience, title: &str, body: &str) -> Result<u64>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create(&self, order: Order) -> Result<Order>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Order>>;
    /// Moves the order from `from` to `to`. Returns false if it was not in `from`.
    async fn transition(&self, id: &str, from: OrderStatus, to: OrderStatus) -> Result<bool>;
}

#[async_trait]
pub trait AdvertisementRepository: Send + Sync {
    async fn create(&self, owner_id: &str, title: &str, expires_at: DateTime<Utc>) -> Result<Advertisement>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Advertisement>>;
    /// Flips every active ad past its expiry to expired and returns them.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<Advertisement>>;
}

pub(crate) fn to_utc(dt: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(dt, Utc)
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| AppError::Database(e.to_string()))
}

pub(crate) fn parse_column<T: std::str::FromStr<Err = String>>(s: &str) -> Result<T> {
    s.parse::<T>().map_err(AppError::Database)
}

/// Claims `key` for the surrounding transaction. Returns false if an earlier
/// delivery already holds it.
pub(crate) async fn claim_dedupe_key(
    conn: &mut SqliteConnection,
    key: &str,
    source: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO processed_events (dedupe_key, source, processed_at)
        VALUES (?, ?, ?)
        ON CONFLICT(dedupe_key) DO NOTHING
        "#
    )
    .bind(key)
    .bind(source)
    .bind(now.naive_utc())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub(crate) async fn insert_notification(
    conn: &mut SqliteConnection,
    notification: &NewNotification,
    now: DateTime<Utc>,
) -> Result<Notification> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO notifications (id, user_id, kind, title, body, read, created_at)
        VALUES (?, ?, ?, ?, ?, 0, ?)
        "#
    )
    .bind(id.to_string())
    .bind(&notification.user_id)
    .bind(notification.kind.as_str())
    .bind(&notification.title)
    .bind(&notification.body)
    .bind(now.naive_utc())
    .execute(&mut *conn)
    .await?;

    Ok(Notification {
        id,
        user_id: notification.user_id.clone(),
        kind: notification.kind,
        title: notification.title.clone(),
        body: notification.body.clone(),
        read: false,
        created_at: now,
    })
}
