mod common;

use chrono::{Duration, Utc};
use common::*;
use gemvault::{
    domain::{ApplicationStatus, NotificationKind},
    error::AppError,
    repository::UserRepository,
    service::Job,
};

#[tokio::test]
async fn auto_approval_waits_for_the_full_window() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.create_user("artist", None).await?;

    let submitted_at = Utc::now();
    let application = app
        .context
        .affiliate_service
        .submit_application("artist", Some("I make rings".to_string()), submitted_at)
        .await?;
    assert_eq!(application.status, ApplicationStatus::Pending);
    assert_eq!(application.auto_approve_at, application.applied_at + Duration::hours(24));

    let just_before = application.auto_approve_at - Duration::seconds(1);
    let approved = app.context.affiliate_service.run_auto_approve(just_before).await?;
    assert!(approved.is_empty());
    assert!(!app.user("artist").await?.is_affiliate);

    let approved = app
        .context
        .affiliate_service
        .run_auto_approve(application.auto_approve_at)
        .await?;
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].decided_by.as_deref(), Some("system"));

    // A second sweep finds nothing left to approve.
    let again = app
        .context
        .affiliate_service
        .run_auto_approve(application.auto_approve_at + Duration::hours(1))
        .await?;
    assert!(again.is_empty());

    let artist = app.user("artist").await?;
    assert!(artist.is_affiliate);
    let code = artist.affiliate_code.expect("affiliate code");
    assert_eq!(code.len(), 8);

    assert_eq!(app.notifications("artist", NotificationKind::Affiliate).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn job_runner_reports_auto_approvals() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.create_user("artist", None).await?;

    let submitted_at = Utc::now() - Duration::hours(25);
    app.context
        .affiliate_service
        .submit_application("artist", None, submitted_at)
        .await?;

    let report = app.context.job_service.run(Job::AutoApprove, Utc::now()).await?;
    assert_eq!(report.affected, 1);
    assert!(app.user("artist").await?.is_affiliate);

    Ok(())
}

#[tokio::test]
async fn admin_decisions_are_final() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.create_user("artist", None).await?;

    let application = app
        .context
        .affiliate_service
        .submit_application("artist", None, Utc::now())
        .await?;

    let rejected = app
        .context
        .affiliate_service
        .reject(application.id, "Portfolio incomplete", OWNER_EMAIL, Utc::now())
        .await?;
    assert_eq!(rejected.status, ApplicationStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("Portfolio incomplete"));

    let approve_after_reject = app
        .context
        .affiliate_service
        .approve(application.id, OWNER_EMAIL, Utc::now())
        .await;
    assert!(matches!(approve_after_reject, Err(AppError::Conflict(_))));

    // The sweep must not resurrect a rejected application.
    let swept = app
        .context
        .affiliate_service
        .run_auto_approve(Utc::now() + Duration::days(2))
        .await?;
    assert!(swept.is_empty());
    assert!(!app.user("artist").await?.is_affiliate);

    let notes = app.notifications("artist", NotificationKind::Affiliate).await?;
    assert_eq!(notes.len(), 1);
    assert!(notes[0].body.contains("Portfolio incomplete"));

    Ok(())
}

#[tokio::test]
async fn only_one_pending_application_per_user() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.create_user("artist", None).await?;

    app.context
        .affiliate_service
        .submit_application("artist", None, Utc::now())
        .await?;
    let second = app
        .context
        .affiliate_service
        .submit_application("artist", None, Utc::now())
        .await;
    assert!(matches!(second, Err(AppError::Conflict(_))));

    Ok(())
}

#[tokio::test]
async fn rejection_requires_a_reason() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.create_user("artist", None).await?;

    let application = app
        .context
        .affiliate_service
        .submit_application("artist", None, Utc::now())
        .await?;
    let result = app
        .context
        .affiliate_service
        .reject(application.id, "   ", OWNER_EMAIL, Utc::now())
        .await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    Ok(())
}

#[tokio::test]
async fn returning_affiliate_keeps_their_code() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.create_user("artist", None).await?;
    sqlx::query("UPDATE users SET affiliate_code = 'KEEPME42' WHERE id = 'artist'")
        .execute(&app.pool)
        .await?;

    let application = app
        .context
        .affiliate_service
        .submit_application("artist", None, Utc::now())
        .await?;
    app.context
        .affiliate_service
        .approve(application.id, OWNER_EMAIL, Utc::now())
        .await?;

    let artist = app.user("artist").await?;
    assert!(artist.is_affiliate);
    assert_eq!(artist.affiliate_code.as_deref(), Some("KEEPME42"));

    let by_code = app.context.user_repo.find_by_affiliate_code("KEEPME42").await?;
    assert_eq!(by_code.map(|u| u.id), Some("artist".to_string()));

    Ok(())
}
