use std::sync::Arc;

use crate::{
    domain::{Audience, NewNotification, Notification},
    error::{AppError, Result},
    repository::NotificationRepository,
};

/// Writes notification records. The table doubles as the delivery queue, so
/// a failed insert only costs the user a message and is never fatal.
pub struct NotificationService {
    repo: Arc<dyn NotificationRepository>,
}

impl NotificationService {
    pub fn new(repo: Arc<dyn NotificationRepository>) -> Self {
        Self { repo }
    }

    pub async fn notify(&self, notification: NewNotification) {
        let user_id = notification.user_id.clone();
        let kind = notification.kind;

        if let Err(e) = self.repo.create(notification).await {
            tracing::warn!(
                user_id = %user_id,
                kind = kind.as_str(),
                "Failed to queue notification: {}",
                e
            );
        }
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Notification>> {
        self.repo.list_for_user(user_id).await
    }

    pub async fn broadcast(&self, audience: Audience, title: &str, body: &str) -> Result<u64> {
        if title.trim().is_empty() || body.trim().is_empty() {
            return Err(AppError::BadRequest("Title and body are required".to_string()));
        }

        let sent = self.repo.broadcast(audience, title, body).await?;
        tracing::info!(audience = ?audience, sent, "Bulk notification queued");

        Ok(sent)
    }
}
