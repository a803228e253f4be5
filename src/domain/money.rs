use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Zar,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Zar => "ZAR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "ZAR" => Ok(Currency::Zar),
            other => Err(format!("Unsupported currency: {}", other)),
        }
    }
}

/// USD/ZAR rate together with the moment it was captured, when known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExchangeRate {
    zar_per_usd: f64,
    as_of: Option<DateTime<Utc>>,
}

impl ExchangeRate {
    /// Rejects rates that are zero, negative or not finite.
    pub fn new(zar_per_usd: f64, as_of: Option<DateTime<Utc>>) -> Result<Self, AppError> {
        if !zar_per_usd.is_finite() || zar_per_usd <= 0.0 {
            return Err(AppError::Validation(format!(
                "zar_per_usd must be a positive number, got {}",
                zar_per_usd
            )));
        }
        Ok(Self { zar_per_usd, as_of })
    }

    pub fn zar_per_usd(&self) -> f64 {
        self.zar_per_usd
    }

    pub fn as_of(&self) -> Option<DateTime<Utc>> {
        self.as_of
    }

    /// A rate with no capture date is always treated as stale.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.as_of.map_or(true, |as_of| now - as_of > max_age)
    }

    /// Converts minor units between currencies, rounding to the nearest cent.
    /// `None` when the result does not fit in an `i64`.
    pub fn convert(&self, amount_cents: i64, from: Currency, to: Currency) -> Option<i64> {
        let amount = amount_cents as f64;
        let converted = match (from, to) {
            (a, b) if a == b => return Some(amount_cents),
            (Currency::Usd, Currency::Zar) => amount * self.zar_per_usd,
            (Currency::Zar, Currency::Usd) => amount / self.zar_per_usd,
            _ => amount,
        }
        .round();

        if !converted.is_finite() || converted < i64::MIN as f64 || converted >= i64::MAX as f64 {
            return None;
        }
        Some(converted as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate() -> ExchangeRate {
        ExchangeRate::new(18.0, Some(Utc::now())).unwrap()
    }

    #[test]
    fn converts_usd_to_zar() {
        assert_eq!(rate().convert(200, Currency::Usd, Currency::Zar), Some(3600));
    }

    #[test]
    fn converts_zar_to_usd_with_rounding() {
        // R10.00 / 18 = $0.5555...
        assert_eq!(rate().convert(1000, Currency::Zar, Currency::Usd), Some(56));
    }

    #[test]
    fn same_currency_is_identity() {
        assert_eq!(rate().convert(1234, Currency::Zar, Currency::Zar), Some(1234));
    }

    #[test]
    fn rejects_unusable_rates() {
        for bad in [0.0, -18.0, f64::NAN, f64::INFINITY] {
            assert!(ExchangeRate::new(bad, Some(Utc::now())).is_err(), "accepted {}", bad);
        }
    }

    #[test]
    fn conversion_that_overflows_is_refused() {
        let tiny = ExchangeRate::new(1e-300, Some(Utc::now())).unwrap();
        assert_eq!(tiny.convert(1000, Currency::Zar, Currency::Usd), None);

        let huge = ExchangeRate::new(1e300, Some(Utc::now())).unwrap();
        assert_eq!(huge.convert(1000, Currency::Usd, Currency::Zar), None);
    }

    #[test]
    fn staleness_uses_capture_time() {
        let now = Utc::now();
        let old = ExchangeRate::new(18.0, Some(now - Duration::days(40))).unwrap();
        assert!(old.is_stale(now, Duration::days(30)));
        assert!(!rate().is_stale(now, Duration::days(30)));
    }

    #[test]
    fn unknown_capture_time_counts_as_stale() {
        let undated = ExchangeRate::new(18.0, None).unwrap();
        assert!(undated.is_stale(Utc::now(), Duration::days(3650)));
    }

    #[test]
    fn parses_currency_codes() {
        assert_eq!("usd".parse::<Currency>().unwrap(), Currency::Usd);
        assert!("EUR".parse::<Currency>().is_err());
    }
}
