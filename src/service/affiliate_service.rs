use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::*,
    error::{AppError, Result},
    repository::{ApplicationRepository, UserRepository},
};

/// Affiliate applications: submission, admin decisions and the timed
/// auto-approval sweep. Decision notifications are written by the
/// repository in the same transaction as the decision.
pub struct AffiliateService {
    users: Arc<dyn UserRepository>,
    applications: Arc<dyn ApplicationRepository>,
    auto_approve_after: Duration,
}

impl AffiliateService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        applications: Arc<dyn ApplicationRepository>,
        auto_approve_after: Duration,
    ) -> Self {
        Self {
            users,
            applications,
            auto_approve_after,
        }
    }

    pub async fn submit_application(
        &self,
        user_id: &str,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<AffiliateApplication> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

        if user.is_affiliate {
            return Err(AppError::Conflict("Already an affiliate".to_string()));
        }

        let application = self
            .applications
            .create(user_id, message, now, now + self.auto_approve_after)
            .await?;

        tracing::info!(
            user_id,
            application_id = %application.id,
            auto_approve_at = %application.auto_approve_at,
            "Affiliate application submitted"
        );

        Ok(application)
    }

    pub async fn latest_for_user(&self, user_id: &str) -> Result<Option<AffiliateApplication>> {
        self.applications.find_latest_for_user(user_id).await
    }

    pub async fn list_applications(&self, status: Option<ApplicationStatus>) -> Result<Vec<AffiliateApplication>> {
        self.applications.list(status).await
    }

    pub async fn approve(&self, id: Uuid, admin_email: &str, now: DateTime<Utc>) -> Result<AffiliateApplication> {
        let approver = Approver::Admin(admin_email.to_string());
        self.decide(id, ApplicationDecision::Approve, &approver, now).await
    }

    pub async fn reject(
        &self,
        id: Uuid,
        reason: &str,
        admin_email: &str,
        now: DateTime<Utc>,
    ) -> Result<AffiliateApplication> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::BadRequest("A rejection reason is required".to_string()));
        }

        let approver = Approver::Admin(admin_email.to_string());
        let decision = ApplicationDecision::Reject {
            reason: reason.to_string(),
        };
        self.decide(id, decision, &approver, now).await
    }

    async fn decide(
        &self,
        id: Uuid,
        decision: ApplicationDecision,
        approver: &Approver,
        now: DateTime<Utc>,
    ) -> Result<AffiliateApplication> {
        if let Some(application) = self.applications.decide(id, &decision, approver, now).await? {
            tracing::info!(
                application_id = %id,
                status = application.status.as_str(),
                decided_by = %approver,
                "Affiliate application decided"
            );
            return Ok(application);
        }

        match self.applications.find_by_id(id).await? {
            Some(existing) => Err(AppError::Conflict(format!(
                "Application already {}",
                existing.status.as_str()
            ))),
            None => Err(AppError::NotFound(format!("Application {} not found", id))),
        }
    }

    /// Approves every application whose window has elapsed, as one batch.
    pub async fn run_auto_approve(&self, now: DateTime<Utc>) -> Result<Vec<AffiliateApplication>> {
        let approved = self.applications.approve_due(now).await?;

        if !approved.is_empty() {
            tracing::info!(count = approved.len(), "Auto-approved affiliate applications");
        }

        Ok(approved)
    }
}
