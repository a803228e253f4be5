mod common;

use chrono::{Duration, Utc};
use common::*;
use gemvault::domain::{Applied, CommissionSource, MembershipStatus, NewPayout, PlanType};
use gemvault::repository::LedgerRepository;
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn commission_and_payout_refund_land_together() -> anyhow::Result<()> {
    let app = TestApp::file_backed().await?;
    app.create_user("aff", None).await?;
    app.create_user("buyer", Some("aff")).await?;
    sqlx::query("UPDATE users SET affiliate_balance_cents = 1000 WHERE id = 'aff'")
        .execute(&app.pool)
        .await?;

    let now = Utc::now();
    app.context
        .payout_service
        .create_payout(
            NewPayout {
                affiliate_id: "aff".to_string(),
                payout_item_id: "PI-RACE".to_string(),
                amount_cents: 400,
            },
            now,
        )
        .await?;
    assert_eq!(app.user("aff").await?.affiliate_balance_cents, 600);

    let commissions = app.context.commission_service.clone();
    let payouts = app.context.payout_service.clone();
    let (commission, refund) = tokio::join!(
        tokio::spawn(async move {
            let source = CommissionSource::Subscription {
                plan: PlanType::Gold,
                order_id: "ORD-RACE".to_string(),
            };
            commissions.process_affiliate_commission("buyer", source, now).await
        }),
        tokio::spawn(async move { payouts.handle_payout_failure("PI-RACE", now).await }),
    );
    assert!(matches!(commission??, Applied::Applied(_)));
    assert!(matches!(refund??, Applied::Applied(_)));

    // 600 + 200 commission + 400 refund.
    assert_eq!(app.user("aff").await?.affiliate_balance_cents, 1200);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_commissions_all_count() -> anyhow::Result<()> {
    let app = TestApp::file_backed().await?;
    app.create_user("aff", None).await?;
    app.create_user("buyer", Some("aff")).await?;

    let now = Utc::now();
    let mut tasks = JoinSet::new();
    for n in 0..8 {
        let commissions = app.context.commission_service.clone();
        tasks.spawn(async move {
            let source = CommissionSource::Subscription {
                plan: PlanType::Gold,
                order_id: format!("ORD-{}", n),
            };
            commissions.process_affiliate_commission("buyer", source, now).await
        });
    }
    while let Some(joined) = tasks.join_next().await {
        assert!(matches!(joined??, Applied::Applied(_)));
    }

    assert_eq!(app.user("aff").await?.affiliate_balance_cents, 8 * 200);
    assert_eq!(app.context.ledger_repo.list_commissions_by_affiliate("aff").await?.len(), 8);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_extensions_all_stack() -> anyhow::Result<()> {
    let app = TestApp::file_backed().await?;
    app.create_user("member", None).await?;

    let now = Utc::now();
    let mut tasks = JoinSet::new();
    for _ in 0..4 {
        let memberships = app.context.membership_service.clone();
        tasks.spawn(async move {
            memberships
                .extend_membership("member", Some(PlanType::Gold), now, None, now)
                .await
        });
    }
    while let Some(joined) = tasks.join_next().await {
        assert!(matches!(joined??, Applied::Applied(_)));
    }

    let member = app.user("member").await?;
    assert_eq!(member.membership_status, MembershipStatus::Active);
    let expiry = member.membership_expiry.expect("expiry set");
    // Four stacked periods; three would end 30 days earlier.
    assert!(expiry > now + Duration::days(119));
    assert!(expiry <= now + Duration::days(120));

    Ok(())
}
