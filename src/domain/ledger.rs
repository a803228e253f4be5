use serde::Serialize;

/// Outcome of a side effect guarded by a dedupe key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Applied<T> {
    Applied(T),
    /// The dedupe key was already claimed by an earlier delivery.
    Duplicate,
    /// Nothing to do, e.g. a user without a referrer.
    Skipped(String),
}

impl<T> Applied<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Applied::Applied(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Applied<U> {
        match self {
            Applied::Applied(value) => Applied::Applied(f(value)),
            Applied::Duplicate => Applied::Duplicate,
            Applied::Skipped(reason) => Applied::Skipped(reason),
        }
    }
}

/// Store credit movement recorded alongside the balance change.
#[derive(Debug, Clone)]
pub struct StoreCreditAdjustment {
    pub user_id: String,
    pub amount_cents: i64,
    pub reason: String,
    pub created_by: String,
}
