use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{MembershipStatus, PlanType};
use crate::error::{AppError, Result};

/// The membership columns of a user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipState {
    pub status: MembershipStatus,
    pub tier: Option<PlanType>,
    pub expiry: Option<DateTime<Utc>>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub payment_failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub subscription_id: Option<String>,
    pub vault_locked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MembershipChange {
    /// A successful payment. Extension stacks on top of any remaining period.
    Extend {
        plan: Option<PlanType>,
        days: i64,
        paid_at: DateTime<Utc>,
    },
    /// A failed billing attempt, stamped with when the provider saw it.
    PaymentFailed {
        failed_at: DateTime<Utc>,
    },
    Cancelled {
        subscription_id: Option<String>,
    },
    GrantTrial {
        tier: PlanType,
        days: i64,
    },
    /// Ends a trial or a cancelled subscription whose period has run out.
    ExpireLapsed,
}

impl MembershipChange {
    pub fn name(&self) -> &'static str {
        match self {
            MembershipChange::Extend { .. } => "extend",
            MembershipChange::PaymentFailed { .. } => "payment_failed",
            MembershipChange::Cancelled { .. } => "cancelled",
            MembershipChange::GrantTrial { .. } => "grant_trial",
            MembershipChange::ExpireLapsed => "expire_lapsed",
        }
    }

    pub fn apply(&self, current: &MembershipState, now: DateTime<Utc>) -> Result<MembershipState> {
        let mut next = current.clone();

        match self {
            MembershipChange::Extend { plan, days, paid_at } => {
                let base = current.expiry.map_or(now, |expiry| expiry.max(now));
                next.expiry = Some(base + Duration::days(*days));
                next.last_payment_date = Some(*paid_at);
                next.payment_failed_at = None;
                next.vault_locked = false;
                if plan.is_some() {
                    next.tier = *plan;
                }

                // A late delivery of a payment made before the cancellation
                // must not revive the subscription.
                let predates_cancellation = current.status == MembershipStatus::CancelledPending
                    && current.cancelled_at.map_or(false, |cancelled| *paid_at <= cancelled);
                next.status = if predates_cancellation {
                    MembershipStatus::CancelledPending
                } else {
                    MembershipStatus::Active
                };
            }
            MembershipChange::PaymentFailed { failed_at } => {
                // A failure for an attempt older than the latest payment is stale.
                let superseded = current
                    .last_payment_date
                    .map_or(false, |paid| *failed_at <= paid);
                if !superseded {
                    next.status = MembershipStatus::GracePeriod;
                    next.payment_failed_at = Some(*failed_at);
                    next.vault_locked = true;
                }
            }
            MembershipChange::Cancelled { subscription_id } => {
                next.status = MembershipStatus::CancelledPending;
                next.cancelled_at = Some(now);
                if subscription_id.is_some() {
                    next.subscription_id = subscription_id.clone();
                }
            }
            MembershipChange::GrantTrial { tier, days } => {
                if current.status == MembershipStatus::Active {
                    return Err(AppError::Conflict(
                        "User already has an active membership".to_string(),
                    ));
                }
                next.status = MembershipStatus::Trial;
                next.tier = Some(*tier);
                next.expiry = Some(now + Duration::days(*days));
                next.vault_locked = false;
            }
            MembershipChange::ExpireLapsed => {
                let lapsed = current.expiry.map_or(false, |expiry| expiry <= now);
                let expirable = matches!(
                    current.status,
                    MembershipStatus::Trial | MembershipStatus::CancelledPending
                );
                if lapsed && expirable {
                    next.status = MembershipStatus::Expired;
                    next.vault_locked = true;
                }
            }
        }

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn state(status: MembershipStatus, expiry: Option<DateTime<Utc>>) -> MembershipState {
        MembershipState {
            status,
            tier: None,
            expiry,
            last_payment_date: None,
            payment_failed_at: None,
            cancelled_at: None,
            subscription_id: None,
            vault_locked: false,
        }
    }

    fn extend(paid_at: DateTime<Utc>) -> MembershipChange {
        MembershipChange::Extend {
            plan: Some(PlanType::Gold),
            days: 30,
            paid_at,
        }
    }

    #[test]
    fn extension_from_past_expiry_starts_now() {
        let current = state(MembershipStatus::Expired, Some(now() - Duration::days(5)));
        let next = extend(now()).apply(&current, now()).unwrap();
        assert_eq!(next.expiry, Some(now() + Duration::days(30)));
        assert_eq!(next.status, MembershipStatus::Active);
        assert_eq!(next.tier, Some(PlanType::Gold));
    }

    #[test]
    fn extension_stacks_on_future_expiry() {
        let expiry = now() + Duration::days(10);
        let current = state(MembershipStatus::Active, Some(expiry));
        let next = extend(now()).apply(&current, now()).unwrap();
        assert_eq!(next.expiry, Some(expiry + Duration::days(30)));
    }

    #[test]
    fn extension_without_expiry_starts_now() {
        let next = extend(now())
            .apply(&state(MembershipStatus::None, None), now())
            .unwrap();
        assert_eq!(next.expiry, Some(now() + Duration::days(30)));
    }

    #[test]
    fn extension_clears_failure_lock() {
        let mut current = state(MembershipStatus::GracePeriod, Some(now()));
        current.vault_locked = true;
        current.payment_failed_at = Some(now() - Duration::days(1));
        let next = extend(now()).apply(&current, now()).unwrap();
        assert!(!next.vault_locked);
        assert_eq!(next.payment_failed_at, None);
        assert_eq!(next.status, MembershipStatus::Active);
    }

    #[test]
    fn late_payment_keeps_cancellation() {
        let mut current = state(MembershipStatus::CancelledPending, Some(now() + Duration::days(3)));
        current.cancelled_at = Some(now());
        let next = extend(now() - Duration::hours(1)).apply(&current, now()).unwrap();
        assert_eq!(next.status, MembershipStatus::CancelledPending);
        assert_eq!(next.expiry, Some(now() + Duration::days(33)));
    }

    #[test]
    fn payment_after_cancellation_reactivates() {
        let mut current = state(MembershipStatus::CancelledPending, Some(now()));
        current.cancelled_at = Some(now() - Duration::days(2));
        let next = extend(now()).apply(&current, now()).unwrap();
        assert_eq!(next.status, MembershipStatus::Active);
    }

    #[test]
    fn payment_failure_locks_vault() {
        let current = state(MembershipStatus::Active, Some(now() + Duration::days(2)));
        let next = MembershipChange::PaymentFailed { failed_at: now() }
            .apply(&current, now())
            .unwrap();
        assert_eq!(next.status, MembershipStatus::GracePeriod);
        assert!(next.vault_locked);
        assert_eq!(next.payment_failed_at, Some(now()));
        assert_eq!(next.expiry, current.expiry);
    }

    #[test]
    fn failure_older_than_last_payment_is_ignored() {
        let mut current = state(MembershipStatus::Active, Some(now() + Duration::days(30)));
        current.last_payment_date = Some(now());
        let change = MembershipChange::PaymentFailed {
            failed_at: now() - Duration::days(3),
        };
        assert_eq!(change.apply(&current, now()).unwrap(), current);

        let later = MembershipChange::PaymentFailed {
            failed_at: now() + Duration::hours(1),
        };
        assert_eq!(later.apply(&current, now()).unwrap().status, MembershipStatus::GracePeriod);
    }

    #[test]
    fn cancellation_keeps_expiry() {
        let expiry = now() + Duration::days(12);
        let current = state(MembershipStatus::Active, Some(expiry));
        let next = MembershipChange::Cancelled {
            subscription_id: Some("I-SUB".to_string()),
        }
        .apply(&current, now())
        .unwrap();
        assert_eq!(next.status, MembershipStatus::CancelledPending);
        assert_eq!(next.expiry, Some(expiry));
        assert_eq!(next.cancelled_at, Some(now()));
        assert_eq!(next.subscription_id.as_deref(), Some("I-SUB"));
    }

    #[test]
    fn trial_rejected_for_active_member() {
        let current = state(MembershipStatus::Active, Some(now() + Duration::days(2)));
        let change = MembershipChange::GrantTrial {
            tier: PlanType::Insider,
            days: 7,
        };
        assert!(matches!(change.apply(&current, now()), Err(AppError::Conflict(_))));
    }

    #[test]
    fn lapsed_trial_expires() {
        let current = state(MembershipStatus::Trial, Some(now()));
        let next = MembershipChange::ExpireLapsed.apply(&current, now()).unwrap();
        assert_eq!(next.status, MembershipStatus::Expired);
        assert!(next.vault_locked);
    }

    #[test]
    fn expiry_leaves_running_or_paid_memberships_alone() {
        let running = state(MembershipStatus::Trial, Some(now() + Duration::seconds(1)));
        assert_eq!(MembershipChange::ExpireLapsed.apply(&running, now()).unwrap(), running);

        let paid = state(MembershipStatus::Active, Some(now() - Duration::days(1)));
        assert_eq!(MembershipChange::ExpireLapsed.apply(&paid, now()).unwrap(), paid);
    }

    #[test]
    fn trial_sets_expiry_from_now() {
        let change = MembershipChange::GrantTrial {
            tier: PlanType::Deluxe,
            days: 7,
        };
        let next = change.apply(&state(MembershipStatus::None, None), now()).unwrap();
        assert_eq!(next.status, MembershipStatus::Trial);
        assert_eq!(next.tier, Some(PlanType::Deluxe));
        assert_eq!(next.expiry, Some(now() + Duration::days(7)));
    }
}
