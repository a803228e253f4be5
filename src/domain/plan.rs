use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Membership plans sold through the storefront.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Insider,
    Gold,
    Deluxe,
}

/// Price thresholds used when a payment does not name its plan.
const DELUXE_THRESHOLD_CENTS: i64 = 2500;
const GOLD_THRESHOLD_CENTS: i64 = 1200;

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Insider => "insider",
            PlanType::Gold => "gold",
            PlanType::Deluxe => "deluxe",
        }
    }

    /// Guesses the plan from what was paid. Promotional prices land on the
    /// wrong tier, so callers should prefer an explicit plan when one exists.
    pub fn infer_from_amount(amount_cents: i64) -> Self {
        if amount_cents >= DELUXE_THRESHOLD_CENTS {
            PlanType::Deluxe
        } else if amount_cents >= GOLD_THRESHOLD_CENTS {
            PlanType::Gold
        } else {
            PlanType::Insider
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insider" => Ok(PlanType::Insider),
            "gold" => Ok(PlanType::Gold),
            "deluxe" => Ok(PlanType::Deluxe),
            other => Err(format!("Unknown plan type: {}", other)),
        }
    }
}

/// Parses a decimal amount such as `"12.00"` into minor units.
pub fn parse_amount_cents(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (whole, frac) = match raw.split_once('.') {
        Some((w, f)) => (w, f),
        None => (raw, ""),
    };
    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_plan_at_thresholds() {
        assert_eq!(PlanType::infer_from_amount(2500), PlanType::Deluxe);
        assert_eq!(PlanType::infer_from_amount(2499), PlanType::Gold);
        assert_eq!(PlanType::infer_from_amount(1200), PlanType::Gold);
        assert_eq!(PlanType::infer_from_amount(1199), PlanType::Insider);
        assert_eq!(PlanType::infer_from_amount(0), PlanType::Insider);
    }

    #[test]
    fn parses_amounts() {
        assert_eq!(parse_amount_cents("12.00"), Some(1200));
        assert_eq!(parse_amount_cents("12.5"), Some(1250));
        assert_eq!(parse_amount_cents("7"), Some(700));
        assert_eq!(parse_amount_cents("-1.00"), None);
        assert_eq!(parse_amount_cents("1.234"), None);
        assert_eq!(parse_amount_cents(""), None);
    }

    #[test]
    fn plan_names_round_trip_case_insensitively() {
        assert_eq!("GOLD".parse::<PlanType>().unwrap(), PlanType::Gold);
        assert!("platinum".parse::<PlanType>().is_err());
    }
}
