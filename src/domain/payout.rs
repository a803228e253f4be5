use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::Currency;

/// A disbursement attempt of affiliate balance through the payout provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: Uuid,
    pub affiliate_id: String,
    pub payout_item_id: String,
    pub amount_cents: i64,
    pub currency: Currency,
    pub status: PayoutStatus,
    pub created_at: DateTime<Utc>,
    pub processing_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStatus::Completed | PayoutStatus::Failed)
    }
}

impl FromStr for PayoutStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PayoutStatus::Pending),
            "processing" => Ok(PayoutStatus::Processing),
            "completed" => Ok(PayoutStatus::Completed),
            "failed" => Ok(PayoutStatus::Failed),
            other => Err(format!("Invalid payout status: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPayout {
    pub affiliate_id: String,
    pub payout_item_id: String,
    pub amount_cents: i64,
}

/// Result of applying a provider outcome to a payout record.
#[derive(Debug, Clone)]
pub enum PayoutTransition {
    /// The status moved; for failures the balance was refunded.
    Applied(Payout),
    /// The payout was already in the requested state.
    Unchanged(Payout),
    /// The payout is terminal in the opposite state and was left alone.
    Conflicting(Payout),
    NotFound,
}
