//! PayPal webhook authentication and event decoding.
//!
//! A delivery is trusted only if all four transmission headers are present,
//! the webhook id matches ours, and the transmission signature equals
//! `hex(HMAC-SHA256(secret, timestamp + "." + body))`.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::{
    domain::{parse_amount_cents, PlanType},
    error::{AppError, Result},
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "paypal-transmission-sig";
pub const TIMESTAMP_HEADER: &str = "paypal-transmission-time";
pub const WEBHOOK_ID_HEADER: &str = "paypal-webhook-id";
pub const EVENT_TYPE_HEADER: &str = "paypal-event-type";

pub struct PayPalVerifier {
    webhook_id: String,
    secret: String,
}

impl PayPalVerifier {
    pub fn new(webhook_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            webhook_id: webhook_id.into(),
            secret: secret.into(),
        }
    }

    /// Returns true only for an authentic delivery. Malformed input of any
    /// kind is a verification failure, never an error.
    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> bool {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let (Some(signature), Some(timestamp), Some(webhook_id), Some(_event_type)) = (
            header(SIGNATURE_HEADER),
            header(TIMESTAMP_HEADER),
            header(WEBHOOK_ID_HEADER),
            header(EVENT_TYPE_HEADER),
        ) else {
            return false;
        };

        if self.webhook_id.is_empty() || !constant_time_compare(webhook_id.as_bytes(), self.webhook_id.as_bytes()) {
            return false;
        }

        let Ok(provided) = hex::decode(signature.trim()) else {
            return false;
        };

        match compute_signature(&self.secret, timestamp, body) {
            Some(expected) => constant_time_compare(&expected, &provided),
            None => false,
        }
    }
}

fn compute_signature(secret: &str, timestamp: &str, body: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Hex signature a sender with `secret` would attach. Used by the
/// integration tests and by operators replaying deliveries.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> Result<String> {
    compute_signature(secret, timestamp, body)
        .map(hex::encode)
        .ok_or_else(|| AppError::Internal("Invalid webhook secret".to_string()))
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// The raw webhook body. `resource` varies by event type.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub id: Option<String>,
    pub event_type: String,
    pub create_time: Option<String>,
    #[serde(default)]
    pub resource: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaleCompleted {
    pub user_id: String,
    /// Plan named explicitly in `custom` as `user_id|plan`.
    pub explicit_plan: Option<PlanType>,
    pub amount_cents: Option<i64>,
    pub order_id: String,
    pub paid_at: Option<DateTime<Utc>>,
}

impl SaleCompleted {
    /// The explicit plan when present, otherwise inferred from the amount.
    pub fn plan(&self) -> PlanType {
        match self.explicit_plan {
            Some(plan) => plan,
            None => {
                let amount = self.amount_cents.unwrap_or(0);
                let plan = PlanType::infer_from_amount(amount);
                tracing::warn!(
                    user_id = %self.user_id,
                    amount_cents = amount,
                    plan = %plan,
                    "No plan in payment payload, inferred tier from amount"
                );
                plan
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PayPalEvent {
    SaleCompleted(SaleCompleted),
    PaymentFailed {
        user_id: String,
        failed_at: Option<DateTime<Utc>>,
    },
    SubscriptionCancelled { user_id: String, subscription_id: Option<String> },
    PayoutSucceeded { payout_item_id: String },
    PayoutFailed { payout_item_id: String },
    Ignored { event_type: String },
}

impl WebhookEnvelope {
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Malformed webhook body: {}", e)))
    }

    fn resource_str(&self, key: &str) -> Option<&str> {
        self.resource
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn require(&self, key: &str) -> Result<String> {
        self.resource_str(key)
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest(format!("Missing resource.{}", key)))
    }

    fn amount_cents(&self) -> Option<i64> {
        let amount = self.resource.get("amount")?;
        let total = amount.get("total").or_else(|| amount.get("value"))?;
        match total {
            Value::String(s) => parse_amount_cents(s),
            Value::Number(n) => n.as_f64().map(|v| (v * 100.0).round() as i64),
            _ => None,
        }
    }

    /// When the provider says the event happened: the resource's
    /// `create_time`, else the envelope's.
    fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.resource_str("create_time")
            .or(self.create_time.as_deref())
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// Key under which this delivery is deduplicated: the provider event id,
    /// or a composite of type, resource id and amount.
    pub fn dedupe_key(&self) -> String {
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            return format!("paypal:{}", id);
        }

        let resource_id = self
            .resource_str("id")
            .or_else(|| self.resource_str("invoice_id"))
            .or_else(|| self.resource_str("payout_item_id"))
            .unwrap_or("-");
        let amount = self
            .amount_cents()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());

        format!("paypal:{}:{}:{}", self.event_type, resource_id, amount)
    }

    /// Decodes the envelope into the event it represents. Missing required
    /// resource fields are a `BadRequest`.
    pub fn classify(&self) -> Result<PayPalEvent> {
        match self.event_type.as_str() {
            "PAYMENT.SALE.COMPLETED" => {
                let custom = self
                    .resource_str("custom")
                    .or_else(|| self.resource_str("custom_id"))
                    .ok_or_else(|| AppError::BadRequest("Missing resource.custom".to_string()))?;

                let (user_id, explicit_plan) = match custom.split_once('|') {
                    Some((user, plan)) => {
                        let plan = plan.trim().parse::<PlanType>().ok();
                        (user.trim().to_string(), plan)
                    }
                    None => (custom.to_string(), None),
                };
                if user_id.is_empty() {
                    return Err(AppError::BadRequest("Missing user id in resource.custom".to_string()));
                }

                let order_id = self
                    .resource_str("invoice_id")
                    .or_else(|| self.resource_str("id"))
                    .or(self.id.as_deref())
                    .map(str::to_string)
                    .ok_or_else(|| AppError::BadRequest("Missing order reference".to_string()))?;

                Ok(PayPalEvent::SaleCompleted(SaleCompleted {
                    user_id,
                    explicit_plan,
                    amount_cents: self.amount_cents(),
                    order_id,
                    paid_at: self.occurred_at(),
                }))
            }
            "BILLING.SUBSCRIPTION.PAYMENT.FAILED" => Ok(PayPalEvent::PaymentFailed {
                user_id: self.require("custom_id")?,
                failed_at: self.occurred_at(),
            }),
            "BILLING.SUBSCRIPTION.CANCELLED" => Ok(PayPalEvent::SubscriptionCancelled {
                user_id: self.require("custom_id")?,
                subscription_id: self.resource_str("id").map(str::to_string),
            }),
            "PAYMENT.PAYOUTS-ITEM.SUCCEEDED" => Ok(PayPalEvent::PayoutSucceeded {
                payout_item_id: self.require("payout_item_id")?,
            }),
            "PAYMENT.PAYOUTS-ITEM.FAILED"
            | "PAYMENT.PAYOUTS-ITEM.DENIED"
            | "PAYMENT.PAYOUTS-ITEM.RETURNED" => Ok(PayPalEvent::PayoutFailed {
                payout_item_id: self.require("payout_item_id")?,
            }),
            other => Ok(PayPalEvent::Ignored {
                event_type: other.to_string(),
            }),
        }
    }
}
