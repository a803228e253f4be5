pub mod admin_service;
pub mod affiliate_service;
pub mod commission_service;
pub mod job_service;
pub mod membership_service;
pub mod notification_service;
pub mod payout_service;
pub mod reconciliation_service;
pub mod webhook_service;

use chrono::Duration;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::{config::Settings, error::Result, repository::*};
use admin_service::AdminService;
use affiliate_service::AffiliateService;
use commission_service::CommissionService;
use job_service::JobService;
use membership_service::MembershipService;
use notification_service::NotificationService;
use payout_service::PayoutService;
use reconciliation_service::ReconciliationService;
use webhook_service::WebhookService;

pub use job_service::{Job, JobReport};
pub use reconciliation_service::{BalanceMismatch, ReconciliationReport};

/// Every repository and service, wired once at startup and shared by the
/// router, the job scheduler and the CLI.
pub struct ServiceContext {
    pub user_repo: Arc<dyn UserRepository>,
    pub ledger_repo: Arc<dyn LedgerRepository>,
    pub payout_repo: Arc<dyn PayoutRepository>,
    pub application_repo: Arc<dyn ApplicationRepository>,
    pub notification_repo: Arc<dyn NotificationRepository>,
    pub order_repo: Arc<dyn OrderRepository>,
    pub advertisement_repo: Arc<dyn AdvertisementRepository>,
    pub notification_service: Arc<NotificationService>,
    pub membership_service: Arc<MembershipService>,
    pub commission_service: Arc<CommissionService>,
    pub payout_service: Arc<PayoutService>,
    pub affiliate_service: Arc<AffiliateService>,
    pub admin_service: Arc<AdminService>,
    pub job_service: Arc<JobService>,
    pub reconciliation_service: Arc<ReconciliationService>,
    pub webhook_service: Arc<WebhookService>,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    /// Fails when the configured exchange rate is unusable.
    pub fn new(db_pool: SqlitePool, settings: &Settings) -> Result<Self> {
        let user_repo: Arc<dyn UserRepository> = Arc::new(SqliteUserRepository::new(db_pool.clone()));
        let ledger_repo: Arc<dyn LedgerRepository> = Arc::new(SqliteLedgerRepository::new(db_pool.clone()));
        let payout_repo: Arc<dyn PayoutRepository> = Arc::new(SqlitePayoutRepository::new(db_pool.clone()));
        let application_repo: Arc<dyn ApplicationRepository> = Arc::new(SqliteApplicationRepository::new(
            db_pool.clone(),
            settings.affiliate.code_length,
        ));
        let notification_repo: Arc<dyn NotificationRepository> =
            Arc::new(SqliteNotificationRepository::new(db_pool.clone()));
        let order_repo: Arc<dyn OrderRepository> = Arc::new(SqliteOrderRepository::new(db_pool.clone()));
        let advertisement_repo: Arc<dyn AdvertisementRepository> =
            Arc::new(SqliteAdvertisementRepository::new(db_pool.clone()));

        let notification_service = Arc::new(NotificationService::new(notification_repo.clone()));

        let membership_service = Arc::new(MembershipService::new(
            user_repo.clone(),
            ledger_repo.clone(),
            notification_service.clone(),
            settings.membership.clone(),
        ));
        let commission_service = Arc::new(CommissionService::new(
            user_repo.clone(),
            ledger_repo.clone(),
            notification_service.clone(),
            settings.commission.flat_rates(),
            settings.commission.exchange_rate()?,
            settings.commission.max_rate_age(),
        ));
        let payout_service = Arc::new(PayoutService::new(payout_repo.clone(), notification_service.clone()));
        let affiliate_service = Arc::new(AffiliateService::new(
            user_repo.clone(),
            application_repo.clone(),
            Duration::hours(settings.affiliate.auto_approve_after_hours),
        ));
        let admin_service = Arc::new(AdminService::new(
            user_repo.clone(),
            ledger_repo.clone(),
            notification_service.clone(),
        ));
        let job_service = Arc::new(JobService::new(
            affiliate_service.clone(),
            membership_service.clone(),
            advertisement_repo.clone(),
            notification_service.clone(),
        ));
        let reconciliation_service = Arc::new(ReconciliationService::new(
            user_repo.clone(),
            ledger_repo.clone(),
            payout_repo.clone(),
        ));
        let webhook_service = Arc::new(WebhookService::new(
            &settings.paypal,
            &settings.payfast,
            membership_service.clone(),
            commission_service.clone(),
            payout_service.clone(),
            order_repo.clone(),
        ));

        Ok(Self {
            user_repo,
            ledger_repo,
            payout_repo,
            application_repo,
            notification_repo,
            order_repo,
            advertisement_repo,
            notification_service,
            membership_service,
            commission_service,
            payout_service,
            affiliate_service,
            admin_service,
            job_service,
            reconciliation_service,
            webhook_service,
            db_pool,
        })
    }
}
