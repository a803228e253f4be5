use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::{
    domain::*,
    error::{AppError, Result},
    repository::{LedgerRepository, UserRepository},
    service::notification_service::NotificationService,
};

pub struct CommissionService {
    users: Arc<dyn UserRepository>,
    ledger: Arc<dyn LedgerRepository>,
    notifications: Arc<NotificationService>,
    rates: FlatRates,
    exchange_rate: ExchangeRate,
    max_rate_age: Duration,
}

/// Amount owed before it is converted into the affiliate's currency.
struct Quote {
    amount_cents: i64,
    currency: Currency,
    commission_type: CommissionType,
    plan_type: Option<PlanType>,
    commission_percent: Option<f64>,
}

impl CommissionService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        ledger: Arc<dyn LedgerRepository>,
        notifications: Arc<NotificationService>,
        rates: FlatRates,
        exchange_rate: ExchangeRate,
        max_rate_age: Duration,
    ) -> Self {
        Self {
            users,
            ledger,
            notifications,
            rates,
            exchange_rate,
            max_rate_age,
        }
    }

    pub fn dedupe_key(order_id: &str) -> String {
        format!("commission:{}", order_id)
    }

    /// Credits the paying user's referrer for `source`. Users without a
    /// referrer, missing referrers and zero amounts are skipped, not errors.
    pub async fn process_affiliate_commission(
        &self,
        user_id: &str,
        source: CommissionSource,
        now: DateTime<Utc>,
    ) -> Result<Applied<Commission>> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

        let (referrer_id, quote) = match &source {
            CommissionSource::Subscription { plan, .. } => (
                user.referrer_id.clone(),
                Quote {
                    amount_cents: self.rates.for_plan(*plan),
                    currency: Currency::Usd,
                    commission_type: CommissionType::Subscription,
                    plan_type: Some(*plan),
                    commission_percent: None,
                },
            ),
            CommissionSource::StoreOrder {
                total_cents,
                currency,
                referral,
                ..
            } => (
                referral.affiliate_id.clone().or_else(|| user.referrer_id.clone()),
                Quote {
                    amount_cents: percent_of(*total_cents, referral.commission_percent),
                    currency: *currency,
                    commission_type: CommissionType::VipStore,
                    plan_type: None,
                    commission_percent: Some(referral.commission_percent),
                },
            ),
        };

        let Some(referrer_id) = referrer_id else {
            return Ok(Applied::Skipped("no referrer".to_string()));
        };
        if referrer_id == user.id {
            tracing::warn!(user_id, "User refers themselves, no commission paid");
            return Ok(Applied::Skipped("self referral".to_string()));
        }

        let Some(referrer) = self.users.find_by_id(&referrer_id).await? else {
            tracing::warn!(user_id, referrer_id = %referrer_id, "Referrer not found, skipping commission");
            return Ok(Applied::Skipped(format!("referrer {} not found", referrer_id)));
        };

        let Some(amount_cents) = self.convert(quote.amount_cents, quote.currency, referrer.balance_currency, now)
        else {
            tracing::error!(
                user_id,
                amount_cents = quote.amount_cents,
                from = quote.currency.as_str(),
                to = referrer.balance_currency.as_str(),
                "Commission conversion out of range, nothing credited"
            );
            return Ok(Applied::Skipped("conversion out of range".to_string()));
        };
        if amount_cents <= 0 {
            return Ok(Applied::Skipped("zero commission".to_string()));
        }

        let commission = NewCommission {
            affiliate_id: referrer.id.clone(),
            referred_user_id: user.id.clone(),
            amount_cents,
            currency: referrer.balance_currency,
            commission_type: quote.commission_type,
            plan_type: quote.plan_type,
            commission_percent: quote.commission_percent,
            source_order_id: source.order_id().to_string(),
        };

        let outcome = self
            .ledger
            .credit_commission(commission, &Self::dedupe_key(source.order_id()), now)
            .await?;

        if let Applied::Applied(commission) = &outcome {
            tracing::info!(
                affiliate_id = %commission.affiliate_id,
                order_id = %commission.source_order_id,
                amount_cents = commission.amount_cents,
                currency = commission.currency.as_str(),
                "Commission credited"
            );
            self.notifications
                .notify(NewNotification::new(
                    &commission.affiliate_id,
                    NotificationKind::Commission,
                    "Commission earned",
                    format!(
                        "You earned {}.{:02} {} from a referral.",
                        commission.amount_cents / 100,
                        commission.amount_cents % 100,
                        commission.currency
                    ),
                ))
                .await;
        }

        Ok(outcome)
    }

    /// `None` when the amount cannot be expressed in the target currency.
    fn convert(&self, amount_cents: i64, from: Currency, to: Currency, now: DateTime<Utc>) -> Option<i64> {
        if from == to {
            return Some(amount_cents);
        }
        match self.exchange_rate.as_of() {
            None => tracing::warn!(
                zar_per_usd = self.exchange_rate.zar_per_usd(),
                "Converting commission with an exchange rate whose capture date is unknown"
            ),
            Some(as_of) if self.exchange_rate.is_stale(now, self.max_rate_age) => tracing::warn!(
                zar_per_usd = self.exchange_rate.zar_per_usd(),
                as_of = %as_of,
                "Converting commission with a stale exchange rate"
            ),
            Some(_) => {}
        }
        self.exchange_rate.convert(amount_cents, from, to)
    }
}
