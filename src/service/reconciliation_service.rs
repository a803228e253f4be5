use serde::Serialize;
use std::sync::Arc;

use crate::{
    domain::{Currency, PayoutStatus},
    error::Result,
    repository::{LedgerRepository, PayoutRepository, UserRepository},
};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BalanceMismatch {
    pub affiliate_id: String,
    pub currency: Currency,
    pub recorded_cents: i64,
    pub expected_cents: i64,
}

impl BalanceMismatch {
    pub fn difference_cents(&self) -> i64 {
        self.recorded_cents - self.expected_cents
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub affiliates_checked: usize,
    pub mismatches: Vec<BalanceMismatch>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Recomputes affiliate balances from the ledger: every balance must equal
/// its commissions minus its payouts that have not failed.
pub struct ReconciliationService {
    users: Arc<dyn UserRepository>,
    ledger: Arc<dyn LedgerRepository>,
    payouts: Arc<dyn PayoutRepository>,
}

impl ReconciliationService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        ledger: Arc<dyn LedgerRepository>,
        payouts: Arc<dyn PayoutRepository>,
    ) -> Self {
        Self { users, ledger, payouts }
    }

    pub async fn check(&self) -> Result<ReconciliationReport> {
        let affiliates = self.users.list_affiliates().await?;
        let mut mismatches = Vec::new();

        for affiliate in &affiliates {
            let credited: i64 = self
                .ledger
                .list_commissions_by_affiliate(&affiliate.id)
                .await?
                .iter()
                .map(|c| c.amount_cents)
                .sum();

            let paid_out: i64 = self
                .payouts
                .list_by_affiliate(&affiliate.id)
                .await?
                .iter()
                .filter(|p| p.status != PayoutStatus::Failed)
                .map(|p| p.amount_cents)
                .sum();

            let expected_cents = credited - paid_out;
            if expected_cents != affiliate.affiliate_balance_cents {
                tracing::warn!(
                    affiliate_id = %affiliate.id,
                    recorded_cents = affiliate.affiliate_balance_cents,
                    expected_cents,
                    "Affiliate balance does not match the ledger"
                );
                mismatches.push(BalanceMismatch {
                    affiliate_id: affiliate.id.clone(),
                    currency: affiliate.balance_currency,
                    recorded_cents: affiliate.affiliate_balance_cents,
                    expected_cents,
                });
            }
        }

        Ok(ReconciliationReport {
            affiliates_checked: affiliates.len(),
            mismatches,
        })
    }
}
