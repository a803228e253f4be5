use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::{
    domain::*,
    error::Result,
    repository::PayoutRepository,
    service::notification_service::NotificationService,
};

pub struct PayoutService {
    repo: Arc<dyn PayoutRepository>,
    notifications: Arc<NotificationService>,
}

impl PayoutService {
    pub fn new(repo: Arc<dyn PayoutRepository>, notifications: Arc<NotificationService>) -> Self {
        Self { repo, notifications }
    }

    /// Records a payout submitted to the provider, debiting the balance.
    pub async fn create_payout(&self, payout: NewPayout, now: DateTime<Utc>) -> Result<Payout> {
        let created = self.repo.create(payout, now).await?;
        tracing::info!(
            affiliate_id = %created.affiliate_id,
            payout_item_id = %created.payout_item_id,
            amount_cents = created.amount_cents,
            "Payout recorded"
        );
        Ok(created)
    }

    pub async fn list_for_affiliate(&self, affiliate_id: &str) -> Result<Vec<Payout>> {
        self.repo.list_by_affiliate(affiliate_id).await
    }

    pub async fn handle_payout_success(&self, payout_item_id: &str, now: DateTime<Utc>) -> Result<Applied<Payout>> {
        let transition = self.repo.mark_completed(payout_item_id, now).await?;
        let outcome = self.resolve(payout_item_id, transition, "completed");

        if let Applied::Applied(payout) = &outcome {
            self.notifications
                .notify(NewNotification::new(
                    &payout.affiliate_id,
                    NotificationKind::Payout,
                    "Payout sent",
                    format!(
                        "Your payout of {}.{:02} {} is on its way.",
                        payout.amount_cents / 100,
                        payout.amount_cents % 100,
                        payout.currency
                    ),
                ))
                .await;
        }

        Ok(outcome)
    }

    /// Fails the payout and refunds its amount to the affiliate, at most once.
    pub async fn handle_payout_failure(&self, payout_item_id: &str, now: DateTime<Utc>) -> Result<Applied<Payout>> {
        let transition = self.repo.mark_failed(payout_item_id, now).await?;
        let outcome = self.resolve(payout_item_id, transition, "failed");

        if let Applied::Applied(payout) = &outcome {
            self.notifications
                .notify(NewNotification::new(
                    &payout.affiliate_id,
                    NotificationKind::Payout,
                    "Payout failed",
                    format!(
                        "Your payout of {}.{:02} {} failed and the amount was returned to your balance.",
                        payout.amount_cents / 100,
                        payout.amount_cents % 100,
                        payout.currency
                    ),
                ))
                .await;
        }

        Ok(outcome)
    }

    fn resolve(&self, payout_item_id: &str, transition: PayoutTransition, target: &str) -> Applied<Payout> {
        match transition {
            PayoutTransition::Applied(payout) => {
                tracing::info!(payout_item_id, status = target, "Payout status updated");
                Applied::Applied(payout)
            }
            PayoutTransition::Unchanged(_) => {
                tracing::info!(payout_item_id, status = target, "Payout already in target state");
                Applied::Duplicate
            }
            PayoutTransition::Conflicting(payout) => {
                tracing::warn!(
                    payout_item_id,
                    current = payout.status.as_str(),
                    requested = target,
                    "Ignoring payout event that contradicts a terminal state"
                );
                Applied::Skipped(format!("payout already {}", payout.status.as_str()))
            }
            PayoutTransition::NotFound => {
                tracing::warn!(payout_item_id, "Payout record not found");
                Applied::Skipped("payout not found".to_string())
            }
        }
    }
}
