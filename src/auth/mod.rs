use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Claims carried by the storefront's bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub admin: bool,
    pub exp: i64,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub email: String,
    pub admin_claim: bool,
}

impl From<Claims> for Caller {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
            admin_claim: claims.admin,
        }
    }
}

/// The one admin capability check: an explicit admin claim, or the owner's
/// email address.
pub fn is_authorized_admin(caller: &Caller, owner_email: Option<&str>) -> bool {
    if caller.admin_claim {
        return true;
    }

    owner_email
        .map(str::trim)
        .filter(|owner| !owner.is_empty())
        .map_or(false, |owner| owner.eq_ignore_ascii_case(caller.email.trim()))
}

pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    owner_email: Option<String>,
}

impl AuthService {
    pub fn new(secret: &str, owner_email: Option<String>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            owner_email,
        }
    }

    pub fn verify_token(&self, token: &str) -> Result<Caller> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            tracing::debug!("Rejected bearer token: {}", e);
            AppError::Unauthorized
        })?;

        Ok(Caller::from(data.claims))
    }

    /// Issues a token. Used by the storefront's login flow and by tests.
    pub fn issue_token(&self, user_id: &str, email: &str, admin: bool, ttl: Duration) -> Result<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            admin,
            exp: (Utc::now() + ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
    }

    pub fn is_admin(&self, caller: &Caller) -> bool {
        is_authorized_admin(caller, self.owner_email.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(email: &str, admin_claim: bool) -> Caller {
        Caller {
            user_id: "user_1".to_string(),
            email: email.to_string(),
            admin_claim,
        }
    }

    #[test]
    fn admin_claim_grants_access() {
        assert!(is_authorized_admin(&caller("staff@example.com", true), None));
    }

    #[test]
    fn owner_email_grants_access_case_insensitively() {
        let owner = Some("Owner@GemVault.example");
        assert!(is_authorized_admin(&caller("owner@gemvault.example", false), owner));
    }

    #[test]
    fn everyone_else_is_denied() {
        let owner = Some("owner@gemvault.example");
        assert!(!is_authorized_admin(&caller("customer@example.com", false), owner));
        assert!(!is_authorized_admin(&caller("", false), Some("")));
        assert!(!is_authorized_admin(&caller("owner@gemvault.example", false), None));
    }

    #[test]
    fn issued_tokens_verify() {
        let auth = AuthService::new("test-secret", None);
        let token = auth.issue_token("user_9", "nine@example.com", true, Duration::hours(1)).unwrap();
        let caller = auth.verify_token(&token).unwrap();
        assert_eq!(caller.user_id, "user_9");
        assert!(caller.admin_claim);
    }

    #[test]
    fn tokens_from_other_secrets_are_rejected() {
        let token = AuthService::new("other", None)
            .issue_token("user_9", "nine@example.com", false, Duration::hours(1))
            .unwrap();
        let auth = AuthService::new("test-secret", None);
        assert!(matches!(auth.verify_token(&token), Err(AppError::Unauthorized)));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let auth = AuthService::new("test-secret", None);
        let token = auth
            .issue_token("user_9", "nine@example.com", false, Duration::hours(-2))
            .unwrap();
        assert!(matches!(auth.verify_token(&token), Err(AppError::Unauthorized)));
    }
}
