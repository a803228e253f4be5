use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::{Currency, PlanType};

/// Immutable ledger entry backing one affiliate balance credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commission {
    pub id: Uuid,
    pub affiliate_id: String,
    pub referred_user_id: String,
    pub amount_cents: i64,
    pub currency: Currency,
    pub commission_type: CommissionType,
    pub plan_type: Option<PlanType>,
    pub commission_percent: Option<f64>,
    pub source_order_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommissionType {
    Subscription,
    VipStore,
}

impl CommissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionType::Subscription => "subscription",
            CommissionType::VipStore => "vip_store",
        }
    }
}

impl FromStr for CommissionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription" => Ok(CommissionType::Subscription),
            "vip_store" => Ok(CommissionType::VipStore),
            other => Err(format!("Invalid commission type: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewCommission {
    pub affiliate_id: String,
    pub referred_user_id: String,
    pub amount_cents: i64,
    pub currency: Currency,
    pub commission_type: CommissionType,
    pub plan_type: Option<PlanType>,
    pub commission_percent: Option<f64>,
    pub source_order_id: String,
}

/// Referral data attached to a store order by an affiliate's VIP store link.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferralMetadata {
    pub affiliate_id: Option<String>,
    pub commission_percent: f64,
}

/// What the engine is paying commission on.
#[derive(Debug, Clone)]
pub enum CommissionSource {
    Subscription {
        plan: PlanType,
        order_id: String,
    },
    StoreOrder {
        order_id: String,
        total_cents: i64,
        currency: Currency,
        referral: ReferralMetadata,
    },
}

impl CommissionSource {
    pub fn order_id(&self) -> &str {
        match self {
            CommissionSource::Subscription { order_id, .. } => order_id,
            CommissionSource::StoreOrder { order_id, .. } => order_id,
        }
    }
}

/// Flat subscription commission per plan, in USD cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatRates {
    pub insider_cents: i64,
    pub gold_cents: i64,
    pub deluxe_cents: i64,
}

impl FlatRates {
    pub fn for_plan(&self, plan: PlanType) -> i64 {
        match plan {
            PlanType::Insider => self.insider_cents,
            PlanType::Gold => self.gold_cents,
            PlanType::Deluxe => self.deluxe_cents,
        }
    }
}

impl Default for FlatRates {
    fn default() -> Self {
        Self {
            insider_cents: 100,
            gold_cents: 200,
            deluxe_cents: 300,
        }
    }
}

/// `total * percent / 100`, rounded to the nearest cent. Negative or
/// non-finite percentages pay nothing.
pub fn percent_of(total_cents: i64, percent: f64) -> i64 {
    if !percent.is_finite() || percent <= 0.0 || total_cents <= 0 {
        return 0;
    }
    ((total_cents as f64) * percent / 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_rates_follow_plan() {
        let rates = FlatRates::default();
        assert_eq!(rates.for_plan(PlanType::Insider), 100);
        assert_eq!(rates.for_plan(PlanType::Gold), 200);
        assert_eq!(rates.for_plan(PlanType::Deluxe), 300);
    }

    #[test]
    fn percentage_commission_rounds_to_cent() {
        assert_eq!(percent_of(10_000, 10.0), 1_000);
        assert_eq!(percent_of(999, 7.5), 75);
        assert_eq!(percent_of(1, 10.0), 0);
    }

    #[test]
    fn nonsense_percentages_pay_nothing() {
        assert_eq!(percent_of(10_000, -5.0), 0);
        assert_eq!(percent_of(10_000, f64::NAN), 0);
        assert_eq!(percent_of(0, 10.0), 0);
    }
}
