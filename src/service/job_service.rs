use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{fmt, str::FromStr, sync::Arc};

use crate::{
    domain::{NewNotification, NotificationKind},
    error::Result,
    repository::AdvertisementRepository,
    service::{
        affiliate_service::AffiliateService, membership_service::MembershipService,
        notification_service::NotificationService,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Job {
    AutoApprove,
    ExpiredTrials,
    CreditDrop,
    AdExpiry,
}

impl Job {
    pub const ALL: [Job; 4] = [Job::AutoApprove, Job::ExpiredTrials, Job::CreditDrop, Job::AdExpiry];

    pub fn as_str(&self) -> &'static str {
        match self {
            Job::AutoApprove => "auto_approve",
            Job::ExpiredTrials => "expired_trials",
            Job::CreditDrop => "credit_drop",
            Job::AdExpiry => "ad_expiry",
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Job {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Job::ALL
            .into_iter()
            .find(|job| job.as_str() == s)
            .ok_or_else(|| format!("Unknown job: {}", s))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: Job,
    pub affected: usize,
    pub ran_at: DateTime<Utc>,
}

/// The scheduled sweeps, runnable on demand.
pub struct JobService {
    affiliates: Arc<AffiliateService>,
    memberships: Arc<MembershipService>,
    advertisements: Arc<dyn AdvertisementRepository>,
    notifications: Arc<NotificationService>,
}

impl JobService {
    pub fn new(
        affiliates: Arc<AffiliateService>,
        memberships: Arc<MembershipService>,
        advertisements: Arc<dyn AdvertisementRepository>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            affiliates,
            memberships,
            advertisements,
            notifications,
        }
    }

    pub async fn run(&self, job: Job, now: DateTime<Utc>) -> Result<JobReport> {
        let affected = match job {
            Job::AutoApprove => self.affiliates.run_auto_approve(now).await?.len(),
            Job::ExpiredTrials => self.memberships.expire_lapsed(now).await?.len(),
            Job::CreditDrop => self.memberships.drop_monthly_credit(now).await?,
            Job::AdExpiry => self.run_ad_expiry(now).await?,
        };

        tracing::debug!(job = job.as_str(), affected, "Job finished");

        Ok(JobReport {
            job,
            affected,
            ran_at: now,
        })
    }

    async fn run_ad_expiry(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.advertisements.expire_due(now).await?;

        for ad in &expired {
            self.notifications
                .notify(NewNotification::new(
                    &ad.owner_id,
                    NotificationKind::Advertisement,
                    "Advertisement ended",
                    format!("Your ad \"{}\" has finished its run.", ad.title),
                ))
                .await;
        }

        Ok(expired.len())
    }
}
