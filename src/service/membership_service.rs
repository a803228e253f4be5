use chrono::{DateTime, Datelike, Utc};
use std::sync::Arc;

use crate::{
    config::MembershipConfig,
    domain::*,
    error::{AppError, Result},
    repository::{LedgerRepository, UserRepository},
    service::notification_service::NotificationService,
};

pub struct MembershipService {
    users: Arc<dyn UserRepository>,
    ledger: Arc<dyn LedgerRepository>,
    notifications: Arc<NotificationService>,
    config: MembershipConfig,
}

impl MembershipService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        ledger: Arc<dyn LedgerRepository>,
        notifications: Arc<NotificationService>,
        config: MembershipConfig,
    ) -> Self {
        Self {
            users,
            ledger,
            notifications,
            config,
        }
    }

    /// Adds one billing period to the user's membership, stacking on any
    /// time they have left.
    pub async fn extend_membership(
        &self,
        user_id: &str,
        plan: Option<PlanType>,
        paid_at: DateTime<Utc>,
        dedupe_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Applied<User>> {
        let change = MembershipChange::Extend {
            plan,
            days: self.config.period_days,
            paid_at,
        };
        let outcome = self.ledger.apply_membership(user_id, &change, dedupe_key, now).await?;

        if let Applied::Applied(user) = &outcome {
            let until = user
                .membership_expiry
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            tracing::info!(user_id, expiry = %until, status = user.membership_status.as_str(), "Membership extended");
            self.notifications
                .notify(NewNotification::new(
                    user_id,
                    NotificationKind::Membership,
                    "Membership renewed",
                    format!("Thanks for your payment! Your membership now runs until {}.", until),
                ))
                .await;
        }

        Ok(outcome)
    }

    /// Moves the member into the grace period, unless a payment newer than
    /// `failed_at` has already been recorded.
    pub async fn handle_payment_failure(
        &self,
        user_id: &str,
        failed_at: DateTime<Utc>,
        dedupe_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Applied<User>> {
        let change = MembershipChange::PaymentFailed { failed_at };
        let outcome = self.ledger.apply_membership(user_id, &change, dedupe_key, now).await?;

        if outcome.is_applied() {
            tracing::info!(user_id, "Membership moved to grace period after failed payment");
            self.notifications
                .notify(NewNotification::new(
                    user_id,
                    NotificationKind::Membership,
                    "Payment failed",
                    "We couldn't process your membership payment. Your vault is locked until payment succeeds.",
                ))
                .await;
        }

        Ok(outcome)
    }

    pub async fn handle_subscription_cancelled(
        &self,
        user_id: &str,
        subscription_id: Option<String>,
        dedupe_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Applied<User>> {
        let change = MembershipChange::Cancelled { subscription_id };
        let outcome = self.ledger.apply_membership(user_id, &change, dedupe_key, now).await?;

        if let Applied::Applied(user) = &outcome {
            let until = user
                .membership_expiry
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "the end of the current period".to_string());
            tracing::info!(user_id, "Subscription cancelled, access kept until expiry");
            self.notifications
                .notify(NewNotification::new(
                    user_id,
                    NotificationKind::Membership,
                    "Subscription cancelled",
                    format!("Your subscription was cancelled. You keep access until {}.", until),
                ))
                .await;
        }

        Ok(outcome)
    }

    pub async fn grant_trial(
        &self,
        user_id: &str,
        tier: PlanType,
        days: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<User> {
        let days = days.unwrap_or(self.config.trial_days);
        if days <= 0 {
            return Err(AppError::BadRequest("Trial length must be positive".to_string()));
        }

        let change = MembershipChange::GrantTrial { tier, days };
        match self.ledger.apply_membership(user_id, &change, None, now).await? {
            Applied::Applied(user) => {
                self.notifications
                    .notify(NewNotification::new(
                        user_id,
                        NotificationKind::Membership,
                        "Trial membership",
                        format!("You've been given a {}-day {} trial. Enjoy!", days, tier),
                    ))
                    .await;
                Ok(user)
            }
            Applied::Duplicate | Applied::Skipped(_) => {
                Err(AppError::Conflict("Trial already granted".to_string()))
            }
        }
    }

    /// Expires trials and cancelled subscriptions whose period has ended.
    pub async fn expire_lapsed(&self, now: DateTime<Utc>) -> Result<Vec<User>> {
        let lapsed = self
            .users
            .list_lapsed(&[MembershipStatus::Trial, MembershipStatus::CancelledPending], now)
            .await?;

        let mut expired = Vec::new();
        for user in lapsed {
            match self
                .ledger
                .apply_membership(&user.id, &MembershipChange::ExpireLapsed, None, now)
                .await
            {
                Ok(Applied::Applied(updated)) => {
                    self.notifications
                        .notify(NewNotification::new(
                            &updated.id,
                            NotificationKind::Membership,
                            "Membership expired",
                            "Your membership has ended. Renew any time to unlock your vault again.",
                        ))
                        .await;
                    expired.push(updated);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(user_id = %user.id, "Failed to expire membership: {}", e),
            }
        }

        Ok(expired)
    }

    /// Credits each active member's monthly store credit, once per calendar
    /// month. Returns how many members were credited by this run.
    pub async fn drop_monthly_credit(&self, now: DateTime<Utc>) -> Result<usize> {
        let members = self.users.list_by_status(MembershipStatus::Active).await?;
        let month = format!("{:04}-{:02}", now.year(), now.month());

        let mut credited = 0;
        for member in members {
            let Some(tier) = member.membership_tier else {
                continue;
            };
            let amount = self.config.monthly_credit.for_plan(tier);
            if amount <= 0 {
                continue;
            }

            let key = format!("credit_drop:{}:{}", member.id, month);
            let adjustment = StoreCreditAdjustment {
                user_id: member.id.clone(),
                amount_cents: amount,
                reason: format!("Monthly {} credit {}", tier, month),
                created_by: "system".to_string(),
            };

            match self.ledger.adjust_store_credit(adjustment, Some(&key), now).await {
                Ok(Applied::Applied(_)) => {
                    credited += 1;
                    self.notifications
                        .notify(NewNotification::new(
                            &member.id,
                            NotificationKind::StoreCredit,
                            "Monthly store credit",
                            format!(
                                "{}.{:02} {} store credit was added to your account.",
                                amount / 100,
                                amount % 100,
                                member.balance_currency
                            ),
                        ))
                        .await;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(user_id = %member.id, "Monthly credit drop failed: {}", e),
            }
        }

        Ok(credited)
    }
}
