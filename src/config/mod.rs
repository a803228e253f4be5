use chrono::{DateTime, Duration, Utc};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::{
    domain::{ExchangeRate, FlatRates, PlanType},
    error::AppError,
};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub paypal: PayPalConfig,
    #[serde(default)]
    pub payfast: PayFastConfig,
    #[serde(default)]
    pub membership: MembershipConfig,
    #[serde(default)]
    pub commission: CommissionConfig,
    #[serde(default)]
    pub affiliate: AffiliateConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// The store owner is always an admin, with or without the admin claim.
    pub owner_email: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PayPalConfig {
    #[serde(default)]
    pub enabled: bool,
    pub webhook_id: Option<String>,
    pub webhook_secret: Option<String>,
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_secs: u64,
}

fn default_handler_timeout() -> u64 {
    20
}

impl Default for PayPalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_id: None,
            webhook_secret: None,
            handler_timeout_secs: default_handler_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PayFastConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_payfast_cidrs")]
    pub allowed_cidrs: Vec<String>,
    #[serde(default)]
    pub trust_forwarded_for: bool,
    /// Reverse proxies whose `X-Forwarded-For` entries are trusted. Empty
    /// means only the immediate peer is.
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

/// PayFast's published ITN source ranges.
fn default_payfast_cidrs() -> Vec<String> {
    [
        "197.97.145.144/28",
        "41.74.179.192/27",
        "102.216.36.0/28",
        "102.216.36.128/28",
        "144.126.193.139/32",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for PayFastConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_cidrs: default_payfast_cidrs(),
            trust_forwarded_for: false,
            trusted_proxies: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MembershipConfig {
    pub period_days: i64,
    pub trial_days: i64,
    pub monthly_credit: MonthlyCreditConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MonthlyCreditConfig {
    pub insider_cents: i64,
    pub gold_cents: i64,
    pub deluxe_cents: i64,
}

impl MonthlyCreditConfig {
    pub fn for_plan(&self, plan: PlanType) -> i64 {
        match plan {
            PlanType::Insider => self.insider_cents,
            PlanType::Gold => self.gold_cents,
            PlanType::Deluxe => self.deluxe_cents,
        }
    }
}

impl Default for MonthlyCreditConfig {
    fn default() -> Self {
        Self {
            insider_cents: 0,
            gold_cents: 500,
            deluxe_cents: 1000,
        }
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            period_days: 30,
            trial_days: 7,
            monthly_credit: MonthlyCreditConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CommissionConfig {
    pub insider_cents: i64,
    pub gold_cents: i64,
    pub deluxe_cents: i64,
    pub zar_per_usd: f64,
    /// When `zar_per_usd` was last checked against the market. Left unset,
    /// every conversion warns that the rate's age is unknown.
    pub rate_as_of: Option<DateTime<Utc>>,
    pub max_rate_age_days: i64,
}

impl CommissionConfig {
    pub fn flat_rates(&self) -> FlatRates {
        FlatRates {
            insider_cents: self.insider_cents,
            gold_cents: self.gold_cents,
            deluxe_cents: self.deluxe_cents,
        }
    }

    pub fn exchange_rate(&self) -> Result<ExchangeRate, AppError> {
        ExchangeRate::new(self.zar_per_usd, self.rate_as_of)
    }

    pub fn max_rate_age(&self) -> Duration {
        Duration::days(self.max_rate_age_days)
    }
}

impl Default for CommissionConfig {
    fn default() -> Self {
        let rates = FlatRates::default();
        Self {
            insider_cents: rates.insider_cents,
            gold_cents: rates.gold_cents,
            deluxe_cents: rates.deluxe_cents,
            zar_per_usd: 18.0,
            rate_as_of: None,
            max_rate_age_days: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AffiliateConfig {
    pub auto_approve_after_hours: i64,
    pub code_length: usize,
}

impl Default for AffiliateConfig {
    fn default() -> Self {
        Self {
            auto_approve_after_hours: 24,
            code_length: 8,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct JobsConfig {
    pub enabled: bool,
    pub auto_approve_interval_secs: u64,
    pub expired_trial_interval_secs: u64,
    pub credit_drop_interval_secs: u64,
    pub ad_expiry_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_approve_interval_secs: 600,
            expired_trial_interval_secs: 86_400,
            credit_drop_interval_secs: 86_400,
            ad_expiry_interval_secs: 3_600,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.url", "sqlite://gemvault.db")?
            .set_default("database.max_connections", 10)?
            .set_default("auth.jwt_secret", "change-me-in-production")?
            .set_default("paypal.enabled", false)?
            .set_default("payfast.enabled", false)?

            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // Add environment variables (with GEMVAULT__ prefix, double underscore separates levels)
            .add_source(
                Environment::with_prefix("GEMVAULT")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("payfast.allowed_cidrs")
                    .with_list_parse_key("payfast.trusted_proxies")
                    .try_parsing(true),
            )

            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings
            .commission
            .exchange_rate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(settings)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://gemvault.db".to_string(),
                max_connections: 10,
            },
            auth: AuthConfig {
                jwt_secret: "change-me-in-production".to_string(),
                owner_email: None,
            },
            paypal: PayPalConfig::default(),
            payfast: PayFastConfig::default(),
            membership: MembershipConfig::default(),
            commission: CommissionConfig::default(),
            affiliate: AffiliateConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}
