mod common;

use chrono::{Duration, Utc};
use common::*;
use gemvault::{
    domain::{Applied, MembershipStatus, NewPayout, NotificationKind, PayoutStatus, PlanType},
    error::AppError,
    repository::PayoutRepository,
};

async fn funded_affiliate(app: &TestApp, id: &str, balance_cents: i64) -> anyhow::Result<()> {
    app.create_user(id, None).await?;
    sqlx::query("UPDATE users SET affiliate_balance_cents = ?, is_affiliate = 1 WHERE id = ?")
        .bind(balance_cents)
        .bind(id)
        .execute(&app.pool)
        .await?;
    Ok(())
}

fn payout(affiliate_id: &str, item: &str, amount_cents: i64) -> NewPayout {
    NewPayout {
        affiliate_id: affiliate_id.to_string(),
        payout_item_id: item.to_string(),
        amount_cents,
    }
}

#[tokio::test]
async fn payout_cannot_overdraw_balance() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    funded_affiliate(&app, "aff", 1000).await?;

    let result = app
        .context
        .payout_service
        .create_payout(payout("aff", "PI-BIG", 1001), Utc::now())
        .await;
    assert!(matches!(result, Err(AppError::InsufficientBalance(_))));
    assert_eq!(app.user("aff").await?.affiliate_balance_cents, 1000);

    let created = app
        .context
        .payout_service
        .create_payout(payout("aff", "PI-OK", 1000), Utc::now())
        .await?;
    assert_eq!(created.status, PayoutStatus::Pending);
    assert_eq!(app.user("aff").await?.affiliate_balance_cents, 0);

    Ok(())
}

#[tokio::test]
async fn failed_payout_refunds_exactly_once() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    funded_affiliate(&app, "aff", 1000).await?;

    app.context
        .payout_service
        .create_payout(payout("aff", "PI-1", 600), Utc::now())
        .await?;
    assert_eq!(app.user("aff").await?.affiliate_balance_cents, 400);

    let first = app.context.payout_service.handle_payout_failure("PI-1", Utc::now()).await?;
    assert!(first.is_applied());
    assert_eq!(app.user("aff").await?.affiliate_balance_cents, 1000);

    let second = app.context.payout_service.handle_payout_failure("PI-1", Utc::now()).await?;
    assert!(matches!(second, Applied::Duplicate));
    assert_eq!(app.user("aff").await?.affiliate_balance_cents, 1000);

    let stored = app.context.payout_repo.find_by_item_id("PI-1").await?.expect("payout");
    assert_eq!(stored.status, PayoutStatus::Failed);
    assert!(stored.refunded_at.is_some());
    assert_eq!(app.notifications("aff", NotificationKind::Payout).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn completed_payout_is_never_refunded() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    funded_affiliate(&app, "aff", 500).await?;

    app.context
        .payout_service
        .create_payout(payout("aff", "PI-2", 500), Utc::now())
        .await?;
    let done = app.context.payout_service.handle_payout_success("PI-2", Utc::now()).await?;
    assert!(done.is_applied());

    let late_failure = app.context.payout_service.handle_payout_failure("PI-2", Utc::now()).await?;
    assert!(matches!(late_failure, Applied::Skipped(_)));
    assert_eq!(app.user("aff").await?.affiliate_balance_cents, 0);

    let unknown = app.context.payout_service.handle_payout_success("PI-NOPE", Utc::now()).await?;
    assert!(matches!(unknown, Applied::Skipped(_)));

    Ok(())
}

#[tokio::test]
async fn store_credit_never_goes_negative() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.create_user("shopper", None).await?;

    let credited = app
        .context
        .admin_service
        .adjust_store_credit("shopper", 300, "Goodwill", OWNER_EMAIL, Utc::now())
        .await?;
    assert_eq!(credited.store_credit_cents, 300);

    let overdraw = app
        .context
        .admin_service
        .adjust_store_credit("shopper", -301, "Too much", OWNER_EMAIL, Utc::now())
        .await;
    assert!(matches!(overdraw, Err(AppError::InsufficientBalance(_))));
    assert_eq!(app.user("shopper").await?.store_credit_cents, 300);

    let debited = app
        .context
        .admin_service
        .adjust_store_credit("shopper", -300, "Used at checkout", OWNER_EMAIL, Utc::now())
        .await?;
    assert_eq!(debited.store_credit_cents, 0);

    Ok(())
}

#[tokio::test]
async fn extension_never_starts_in_the_past() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.create_user("lapsed", None).await?;

    let now = Utc::now();
    let long_ago = now - Duration::days(90);
    sqlx::query("UPDATE users SET membership_status = 'expired', membership_expiry = ? WHERE id = 'lapsed'")
        .bind(long_ago.naive_utc())
        .execute(&app.pool)
        .await?;

    let outcome = app
        .context
        .membership_service
        .extend_membership("lapsed", Some(PlanType::Insider), now, Some("test:lapsed"), now)
        .await?;
    let Applied::Applied(user) = outcome else {
        panic!("expected the extension to apply");
    };

    let expiry = user.membership_expiry.expect("expiry");
    assert!(expiry >= now + Duration::days(30) - Duration::seconds(1));
    assert_eq!(user.membership_status, MembershipStatus::Active);

    Ok(())
}

#[tokio::test]
async fn extension_stacks_on_remaining_time() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.create_user("early", None).await?;

    let now = Utc::now();
    let first = app
        .context
        .membership_service
        .extend_membership("early", Some(PlanType::Gold), now, Some("test:early:1"), now)
        .await?;
    let Applied::Applied(first) = first else {
        panic!("expected the first extension to apply");
    };

    let second = app
        .context
        .membership_service
        .extend_membership("early", Some(PlanType::Gold), now, Some("test:early:2"), now)
        .await?;
    let Applied::Applied(second) = second else {
        panic!("expected the second extension to apply");
    };

    let gap = second.membership_expiry.expect("expiry") - first.membership_expiry.expect("expiry");
    assert_eq!(gap.num_days(), 30);

    let replay = app
        .context
        .membership_service
        .extend_membership("early", Some(PlanType::Gold), now, Some("test:early:2"), now)
        .await?;
    assert!(matches!(replay, Applied::Duplicate));

    Ok(())
}

#[tokio::test]
async fn reconciliation_flags_drifted_balances() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.create_user("aff", None).await?;
    app.create_user("buyer", Some("aff")).await?;

    let now = Utc::now();
    app.context
        .commission_service
        .process_affiliate_commission(
            "buyer",
            gemvault::domain::CommissionSource::Subscription {
                plan: PlanType::Deluxe,
                order_id: "INV-1".to_string(),
            },
            now,
        )
        .await?;
    app.context
        .payout_service
        .create_payout(payout("aff", "PI-R", 100), now)
        .await?;

    let report = app.context.reconciliation_service.check().await?;
    assert!(report.is_clean());
    assert_eq!(report.affiliates_checked, 1);

    sqlx::query("UPDATE users SET affiliate_balance_cents = affiliate_balance_cents + 50 WHERE id = 'aff'")
        .execute(&app.pool)
        .await?;

    let report = app.context.reconciliation_service.check().await?;
    assert_eq!(report.mismatches.len(), 1);
    let mismatch = &report.mismatches[0];
    assert_eq!(mismatch.affiliate_id, "aff");
    assert_eq!(mismatch.expected_cents, 200);
    assert_eq!(mismatch.recorded_cents, 250);
    assert_eq!(mismatch.difference_cents(), 50);

    Ok(())
}

#[tokio::test]
async fn self_referral_pays_nothing() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.create_user("loop", None).await?;
    sqlx::query("UPDATE users SET referrer_id = 'loop' WHERE id = 'loop'")
        .execute(&app.pool)
        .await?;

    let outcome = app
        .context
        .commission_service
        .process_affiliate_commission(
            "loop",
            gemvault::domain::CommissionSource::Subscription {
                plan: PlanType::Gold,
                order_id: "INV-SELF".to_string(),
            },
            Utc::now(),
        )
        .await?;
    assert!(matches!(outcome, Applied::Skipped(_)));
    assert_eq!(app.user("loop").await?.affiliate_balance_cents, 0);

    Ok(())
}

#[tokio::test]
async fn monthly_credit_drops_once_per_month() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.create_user("gold", None).await?;

    let now = Utc::now();
    app.context
        .membership_service
        .extend_membership("gold", Some(PlanType::Gold), now, Some("test:gold"), now)
        .await?;

    assert_eq!(app.context.membership_service.drop_monthly_credit(now).await?, 1);
    assert_eq!(app.context.membership_service.drop_monthly_credit(now).await?, 0);
    assert_eq!(app.user("gold").await?.store_credit_cents, 500);

    Ok(())
}
