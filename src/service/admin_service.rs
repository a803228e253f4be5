use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::{
    domain::*,
    error::{AppError, Result},
    repository::{LedgerRepository, UserRepository},
    service::notification_service::NotificationService,
};

/// Admin-only account operations that are not part of another workflow.
pub struct AdminService {
    users: Arc<dyn UserRepository>,
    ledger: Arc<dyn LedgerRepository>,
    notifications: Arc<NotificationService>,
}

impl AdminService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        ledger: Arc<dyn LedgerRepository>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            users,
            ledger,
            notifications,
        }
    }

    /// Applies a signed store credit delta. Debits never take the balance
    /// below zero.
    pub async fn adjust_store_credit(
        &self,
        user_id: &str,
        amount_cents: i64,
        reason: &str,
        admin_email: &str,
        now: DateTime<Utc>,
    ) -> Result<User> {
        if amount_cents == 0 {
            return Err(AppError::BadRequest("Amount must not be zero".to_string()));
        }

        let adjustment = StoreCreditAdjustment {
            user_id: user_id.to_string(),
            amount_cents,
            reason: reason.to_string(),
            created_by: admin_email.to_string(),
        };

        let user = match self.ledger.adjust_store_credit(adjustment, None, now).await? {
            Applied::Applied(user) => user,
            Applied::Duplicate | Applied::Skipped(_) => {
                return Err(AppError::Internal("Store credit adjustment was not applied".to_string()))
            }
        };

        tracing::info!(user_id, amount_cents, admin = admin_email, "Store credit adjusted");

        let verb = if amount_cents > 0 { "added to" } else { "deducted from" };
        let abs = amount_cents.abs();
        self.notifications
            .notify(NewNotification::new(
                user_id,
                NotificationKind::StoreCredit,
                "Store credit updated",
                format!(
                    "{}.{:02} {} was {} your store credit. {}",
                    abs / 100,
                    abs % 100,
                    user.balance_currency,
                    verb,
                    reason
                ),
            ))
            .await;

        Ok(user)
    }

    pub async fn send_bulk_notification(&self, audience: Audience, title: &str, body: &str) -> Result<u64> {
        self.notifications.broadcast(audience, title, body).await
    }

    /// Deletes the user and everything they own. Ledger rows stay.
    pub async fn delete_user(&self, user_id: &str, admin_email: &str) -> Result<()> {
        if !self.users.delete(user_id).await? {
            return Err(AppError::NotFound(format!("User {} not found", user_id)));
        }

        tracing::info!(user_id, admin = admin_email, "User deleted");
        Ok(())
    }
}
