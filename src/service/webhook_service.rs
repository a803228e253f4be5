//! Entry point for payment provider callbacks. Authenticates the delivery,
//! decodes it and routes it to exactly one workflow. Once a delivery is
//! authentic and well formed the provider always gets a 200: workflow
//! failures are logged, and every side effect is guarded by a dedupe key so
//! a retried delivery never applies twice.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use std::{future::Future, net::IpAddr, sync::Arc, time::Duration};

use crate::{
    config::{PayFastConfig, PayPalConfig},
    domain::*,
    error::{AppError, Result},
    payments::{
        forwarded_client, IpAllowlist, ItnNotification, ItnStatus, PayPalEvent, PayPalVerifier,
        WebhookEnvelope,
    },
    repository::OrderRepository,
    service::{
        commission_service::CommissionService, membership_service::MembershipService,
        payout_service::PayoutService,
    },
};

pub struct WebhookService {
    paypal_enabled: bool,
    payfast_enabled: bool,
    verifier: Option<PayPalVerifier>,
    allowlist: IpAllowlist,
    trust_forwarded_for: bool,
    trusted_proxies: IpAllowlist,
    handler_timeout: Duration,
    memberships: Arc<MembershipService>,
    commissions: Arc<CommissionService>,
    payouts: Arc<PayoutService>,
    orders: Arc<dyn OrderRepository>,
}

impl WebhookService {
    pub fn new(
        paypal: &PayPalConfig,
        payfast: &PayFastConfig,
        memberships: Arc<MembershipService>,
        commissions: Arc<CommissionService>,
        payouts: Arc<PayoutService>,
        orders: Arc<dyn OrderRepository>,
    ) -> Self {
        let verifier = match (&paypal.webhook_id, &paypal.webhook_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some(PayPalVerifier::new(id.clone(), secret.clone()))
            }
            _ => None,
        };

        Self {
            paypal_enabled: paypal.enabled,
            payfast_enabled: payfast.enabled,
            verifier,
            allowlist: IpAllowlist::new(&payfast.allowed_cidrs),
            trust_forwarded_for: payfast.trust_forwarded_for,
            trusted_proxies: IpAllowlist::new(&payfast.trusted_proxies),
            handler_timeout: Duration::from_secs(paypal.handler_timeout_secs),
            memberships,
            commissions,
            payouts,
            orders,
        }
    }

    /// Handles one PayPal delivery. Errors are only returned for deliveries
    /// that must not be processed at all.
    pub async fn handle_paypal(&self, headers: &HeaderMap, body: &[u8]) -> Result<()> {
        if !self.paypal_enabled {
            tracing::warn!("PayPal webhook received while PayPal is disabled");
            return Err(AppError::NotFound("PayPal webhooks are disabled".to_string()));
        }

        let verifier = self
            .verifier
            .as_ref()
            .ok_or_else(|| AppError::Internal("PayPal webhook verification is not configured".to_string()))?;

        if !verifier.verify(headers, body) {
            tracing::warn!("Rejected PayPal webhook with invalid signature");
            return Err(AppError::InvalidSignature);
        }

        let envelope = WebhookEnvelope::parse(body)?;
        let event = envelope.classify()?;
        let key = envelope.dedupe_key();

        tracing::info!(event_type = %envelope.event_type, dedupe_key = %key, "PayPal webhook received");

        let now = Utc::now();
        self.run_bounded(&envelope.event_type, &key, self.dispatch_paypal(event, &key, now))
            .await;

        Ok(())
    }

    async fn dispatch_paypal(&self, event: PayPalEvent, key: &str, now: DateTime<Utc>) -> Result<()> {
        match event {
            PayPalEvent::SaleCompleted(sale) => {
                let plan = sale.plan();
                self.apply_subscription_payment(
                    &sale.user_id,
                    plan,
                    &sale.order_id,
                    sale.paid_at.unwrap_or(now),
                    key,
                    now,
                )
                .await
            }
            PayPalEvent::PaymentFailed { user_id, failed_at } => {
                let dedupe = format!("{}:payment_failed", key);
                let outcome = self
                    .memberships
                    .handle_payment_failure(&user_id, failed_at.unwrap_or(now), Some(&dedupe), now)
                    .await?;
                log_outcome("payment_failed", key, &outcome);
                Ok(())
            }
            PayPalEvent::SubscriptionCancelled { user_id, subscription_id } => {
                let dedupe = format!("{}:cancelled", key);
                let outcome = self
                    .memberships
                    .handle_subscription_cancelled(&user_id, subscription_id, Some(&dedupe), now)
                    .await?;
                log_outcome("subscription_cancelled", key, &outcome);
                Ok(())
            }
            PayPalEvent::PayoutSucceeded { payout_item_id } => {
                let outcome = self.payouts.handle_payout_success(&payout_item_id, now).await?;
                log_outcome("payout_succeeded", key, &outcome);
                Ok(())
            }
            PayPalEvent::PayoutFailed { payout_item_id } => {
                let outcome = self.payouts.handle_payout_failure(&payout_item_id, now).await?;
                log_outcome("payout_failed", key, &outcome);
                Ok(())
            }
            PayPalEvent::Ignored { event_type } => {
                tracing::info!(event_type = %event_type, "Ignoring unhandled PayPal event");
                Ok(())
            }
        }
    }

    /// Extends the membership, then pays the referrer. Each step has its own
    /// dedupe key so a retry after a partial failure resumes where it stopped.
    async fn apply_subscription_payment(
        &self,
        user_id: &str,
        plan: PlanType,
        order_id: &str,
        paid_at: DateTime<Utc>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let membership_key = format!("{}:membership", key);
        let membership = self
            .memberships
            .extend_membership(user_id, Some(plan), paid_at, Some(&membership_key), now)
            .await?;
        log_outcome("membership_extended", key, &membership);

        let source = CommissionSource::Subscription {
            plan,
            order_id: order_id.to_string(),
        };
        let commission = self
            .commissions
            .process_affiliate_commission(user_id, source, now)
            .await?;
        log_outcome("commission", key, &commission);

        Ok(())
    }

    /// Handles one PayFast ITN. The source address is the only authenticity
    /// check available for this provider.
    pub async fn handle_payfast(
        &self,
        peer: Option<IpAddr>,
        forwarded_for: Option<&str>,
        body: &[u8],
    ) -> Result<()> {
        if !self.payfast_enabled {
            tracing::warn!(peer = ?peer, "PayFast ITN received while PayFast is disabled");
            return Err(AppError::NotFound("PayFast ITNs are disabled".to_string()));
        }

        let source = self.source_address(peer, forwarded_for);
        match source {
            Some(ip) if self.allowlist.allows(ip) => {}
            _ => {
                tracing::warn!(source = ?source, "Rejected PayFast ITN from address outside the allowlist");
                return Err(AppError::Forbidden);
            }
        }

        let itn = ItnNotification::parse(body)?;
        let status = itn.validate()?;
        let key = itn.dedupe_key();

        tracing::info!(status = itn.status_str(), dedupe_key = %key, "PayFast ITN received");

        let now = Utc::now();
        self.run_bounded("payfast_itn", &key, self.dispatch_payfast(&itn, status, &key, now))
            .await;

        Ok(())
    }

    fn source_address(&self, peer: Option<IpAddr>, forwarded_for: Option<&str>) -> Option<IpAddr> {
        if self.trust_forwarded_for {
            forwarded_client(peer, forwarded_for, &self.trusted_proxies)
        } else {
            peer
        }
    }

    async fn dispatch_payfast(
        &self,
        itn: &ItnNotification,
        status: ItnStatus,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let reference = itn
            .order_reference()
            .ok_or_else(|| AppError::BadRequest("Missing m_payment_id".to_string()))?;

        match status {
            ItnStatus::Complete => {
                if let Some((user_id, plan)) = itn.subscription() {
                    return self
                        .apply_subscription_payment(user_id, plan, reference, now, key, now)
                        .await;
                }
                self.settle_store_order(itn, reference, key, now).await
            }
            ItnStatus::Failed => self.close_order(reference, OrderStatus::Failed).await,
            ItnStatus::Cancelled => self.close_order(reference, OrderStatus::Cancelled).await,
            ItnStatus::Other => {
                tracing::info!(status = itn.status_str(), order_id = reference, "Ignoring PayFast status");
                Ok(())
            }
        }
    }

    async fn settle_store_order(
        &self,
        itn: &ItnNotification,
        order_id: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))?;

        // amount_gross is in the order's currency and must cover it exactly.
        let paid_cents = itn.amount_cents();
        if paid_cents != Some(order.total_cents) {
            tracing::warn!(
                order_id,
                expected_cents = order.total_cents,
                paid_cents = ?paid_cents,
                currency = order.currency.as_str(),
                "ITN amount does not match the order total, order left unpaid"
            );
            return Ok(());
        }

        match order.status {
            OrderStatus::Pending => {
                if self.orders.transition(order_id, OrderStatus::Pending, OrderStatus::Paid).await? {
                    tracing::info!(order_id, "Store order paid");
                }
            }
            // A retry after the commission step failed lands here.
            OrderStatus::Paid => {}
            other => {
                tracing::warn!(order_id, status = other.as_str(), "Payment for a closed order ignored");
                return Ok(());
            }
        }

        let Some(referral) = order.referral() else {
            tracing::debug!(order_id, "Store order carries no referral");
            return Ok(());
        };

        let source = CommissionSource::StoreOrder {
            order_id: order.id.clone(),
            total_cents: order.total_cents,
            currency: order.currency,
            referral,
        };
        let outcome = self
            .commissions
            .process_affiliate_commission(&order.user_id, source, now)
            .await?;
        log_outcome("commission", key, &outcome);

        Ok(())
    }

    async fn close_order(&self, order_id: &str, to: OrderStatus) -> Result<()> {
        if self.orders.transition(order_id, OrderStatus::Pending, to).await? {
            tracing::info!(order_id, status = to.as_str(), "Store order closed");
        } else {
            tracing::info!(order_id, status = to.as_str(), "Order not pending, nothing to close");
        }
        Ok(())
    }

    /// Runs a workflow under the acknowledgement budget, logging instead of
    /// propagating failures. Dropped transactions roll back on timeout.
    async fn run_bounded<F>(&self, event: &str, key: &str, work: F)
    where
        F: Future<Output = Result<()>>,
    {
        match tokio::time::timeout(self.handler_timeout, work).await {
            Ok(Ok(())) => {}
            Ok(Err(AppError::NotFound(msg))) => {
                tracing::warn!(event, dedupe_key = key, "Webhook target not found: {}", msg);
            }
            Ok(Err(e)) => {
                tracing::error!(event, dedupe_key = key, "Webhook handler failed: {}", e);
            }
            Err(_) => {
                tracing::error!(
                    event,
                    dedupe_key = key,
                    timeout_secs = self.handler_timeout.as_secs(),
                    "Webhook handler timed out"
                );
            }
        }
    }
}

fn log_outcome<T>(step: &str, key: &str, outcome: &Applied<T>) {
    match outcome {
        Applied::Applied(_) => tracing::info!(step, dedupe_key = key, "Applied"),
        Applied::Duplicate => tracing::info!(step, dedupe_key = key, "Duplicate delivery, already applied"),
        Applied::Skipped(reason) => tracing::info!(step, dedupe_key = key, reason = %reason, "Skipped"),
    }
}
