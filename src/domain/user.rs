use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{Currency, MembershipState, PlanType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub membership_status: MembershipStatus,
    pub membership_tier: Option<PlanType>,
    pub membership_expiry: Option<DateTime<Utc>>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub payment_failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub subscription_id: Option<String>,
    pub vault_locked: bool,
    pub is_affiliate: bool,
    pub affiliate_code: Option<String>,
    pub affiliate_balance_cents: i64,
    pub balance_currency: Currency,
    pub referrer_id: Option<String>,
    pub store_credit_cents: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn membership(&self) -> MembershipState {
        MembershipState {
            status: self.membership_status,
            tier: self.membership_tier,
            expiry: self.membership_expiry,
            last_payment_date: self.last_payment_date,
            payment_failed_at: self.payment_failed_at,
            cancelled_at: self.cancelled_at,
            subscription_id: self.subscription_id.clone(),
            vault_locked: self.vault_locked,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    None,
    Trial,
    Active,
    GracePeriod,
    CancelledPending,
    Expired,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::None => "none",
            MembershipStatus::Trial => "trial",
            MembershipStatus::Active => "active",
            MembershipStatus::GracePeriod => "grace_period",
            MembershipStatus::CancelledPending => "cancelled_pending",
            MembershipStatus::Expired => "expired",
        }
    }
}

impl FromStr for MembershipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(MembershipStatus::None),
            "trial" => Ok(MembershipStatus::Trial),
            "active" => Ok(MembershipStatus::Active),
            "grace_period" => Ok(MembershipStatus::GracePeriod),
            "cancelled_pending" => Ok(MembershipStatus::CancelledPending),
            "expired" => Ok(MembershipStatus::Expired),
            other => Err(format!("Invalid membership status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub id: Option<String>,
    pub email: String,
    pub display_name: String,
    pub referrer_id: Option<String>,
    pub balance_currency: Currency,
}

/// Who a bulk notification goes to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    All,
    Members,
    Affiliates,
}
