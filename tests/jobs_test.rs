mod common;

use chrono::{Duration, Utc};
use common::*;
use gemvault::{domain::NotificationKind, repository::AdvertisementRepository, service::Job};

#[tokio::test]
async fn ad_expiry_job_expires_only_due_ads() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.create_user("artist", None).await?;

    let now = Utc::now();
    let due = app
        .context
        .advertisement_repo
        .create("artist", "Opal pendants", now - Duration::minutes(5))
        .await?;
    let running = app
        .context
        .advertisement_repo
        .create("artist", "Ruby rings", now + Duration::days(3))
        .await?;

    let report = app.context.job_service.run(Job::AdExpiry, now).await?;
    assert_eq!(report.job, Job::AdExpiry);
    assert_eq!(report.affected, 1);

    let due = app.context.advertisement_repo.find_by_id(due.id).await?.expect("ad");
    let running = app.context.advertisement_repo.find_by_id(running.id).await?.expect("ad");
    assert_eq!(due.status, "expired");
    assert_eq!(running.status, "active");

    let again = app.context.job_service.run(Job::AdExpiry, now).await?;
    assert_eq!(again.affected, 0);

    assert_eq!(app.notifications("artist", NotificationKind::Advertisement).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn job_names_round_trip() {
    for job in Job::ALL {
        assert_eq!(job.as_str().parse::<Job>(), Ok(job));
    }
    assert!("nightly".parse::<Job>().is_err());
}
