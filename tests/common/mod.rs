#![allow(dead_code)]

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, Response},
    Router,
};
use chrono::{Duration, Utc};
use gemvault::{
    api,
    auth::AuthService,
    config::Settings,
    domain::{CreateUserRequest, Currency, Notification, NotificationKind, User},
    payments::paypal,
    repository::UserRepository,
    service::ServiceContext,
};
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::{net::SocketAddr, sync::Arc, time::Duration as StdDuration};
use tempfile::TempDir;

pub const WEBHOOK_ID: &str = "WH-TEST-123";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const JWT_SECRET: &str = "test-jwt-secret";
pub const OWNER_EMAIL: &str = "owner@gemvault.test";

pub struct TestApp {
    pub pool: SqlitePool,
    pub context: Arc<ServiceContext>,
    pub settings: Arc<Settings>,
    pub auth: AuthService,
    /// Holds the database file of a file-backed app until the test ends.
    pub scratch: Option<TempDir>,
}

/// One connection so every query sees the same in-memory database.
pub async fn test_pool() -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// A WAL database file with several connections, for tests where writers
/// really run at the same time.
pub async fn file_pool(dir: &TempDir) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("gemvault.db"))
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(StdDuration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.auth.jwt_secret = JWT_SECRET.to_string();
    settings.auth.owner_email = Some(OWNER_EMAIL.to_string());
    settings.paypal.enabled = true;
    settings.paypal.webhook_id = Some(WEBHOOK_ID.to_string());
    settings.paypal.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    settings.payfast.enabled = true;
    settings.payfast.allowed_cidrs = vec!["127.0.0.1/32".to_string()];
    settings.jobs.enabled = false;
    settings
}

impl TestApp {
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_settings(test_settings()).await
    }

    pub async fn with_settings(settings: Settings) -> anyhow::Result<Self> {
        let pool = test_pool().await?;
        Self::assemble(pool, settings, None)
    }

    pub async fn file_backed() -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        let pool = file_pool(&dir).await?;
        Self::assemble(pool, test_settings(), Some(dir))
    }

    fn assemble(pool: SqlitePool, settings: Settings, scratch: Option<TempDir>) -> anyhow::Result<Self> {
        let context = Arc::new(ServiceContext::new(pool.clone(), &settings)?);
        let auth = AuthService::new(&settings.auth.jwt_secret, settings.auth.owner_email.clone());

        Ok(Self {
            pool,
            context,
            settings: Arc::new(settings),
            auth,
            scratch,
        })
    }

    pub fn router(&self) -> Router {
        api::create_app(self.context.clone(), self.settings.clone())
    }

    pub async fn create_user(&self, id: &str, referrer_id: Option<&str>) -> anyhow::Result<User> {
        self.create_user_in(id, referrer_id, Currency::Usd).await
    }

    pub async fn create_user_in(
        &self,
        id: &str,
        referrer_id: Option<&str>,
        currency: Currency,
    ) -> anyhow::Result<User> {
        let user = self
            .context
            .user_repo
            .create(CreateUserRequest {
                id: Some(id.to_string()),
                email: format!("{}@gemvault.test", id),
                display_name: id.to_string(),
                referrer_id: referrer_id.map(str::to_string),
                balance_currency: currency,
            })
            .await?;
        Ok(user)
    }

    pub async fn user(&self, id: &str) -> anyhow::Result<User> {
        self.context
            .user_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("user {} missing", id))
    }

    pub async fn notifications(&self, user_id: &str, kind: NotificationKind) -> anyhow::Result<Vec<Notification>> {
        let all = self.context.notification_service.list_for_user(user_id).await?;
        Ok(all.into_iter().filter(|n| n.kind == kind).collect())
    }

    pub fn token(&self, user_id: &str, admin: bool) -> String {
        self.auth
            .issue_token(user_id, &format!("{}@gemvault.test", user_id), admin, Duration::hours(1))
            .expect("token")
    }

    pub fn owner_token(&self) -> String {
        self.auth
            .issue_token("owner", OWNER_EMAIL, false, Duration::hours(1))
            .expect("token")
    }
}

/// A PayPal delivery signed the way the verifier expects.
pub fn signed_paypal_request(body: &Value) -> Request<Body> {
    let body = serde_json::to_vec(body).expect("json");
    let timestamp = Utc::now().to_rfc3339();
    let signature = paypal::sign(WEBHOOK_SECRET, &timestamp, &body).expect("signature");
    let event_type = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| v["event_type"].as_str().map(str::to_string))
        .unwrap_or_default();

    Request::builder()
        .method("POST")
        .uri("/webhooks/paypal")
        .header("content-type", "application/json")
        .header(paypal::SIGNATURE_HEADER, signature)
        .header(paypal::TIMESTAMP_HEADER, timestamp)
        .header(paypal::WEBHOOK_ID_HEADER, WEBHOOK_ID)
        .header(paypal::EVENT_TYPE_HEADER, event_type)
        .body(Body::from(body))
        .expect("request")
}

pub fn payfast_request(form: &str, peer: &str) -> Request<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri("/webhooks/payfast")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .expect("request");

    let addr: SocketAddr = format!("{}:443", peer).parse().expect("socket address");
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");

    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }

    let body = match body {
        Some(value) => Body::from(serde_json::to_vec(&value).expect("json")),
        None => Body::empty(),
    };
    builder.body(body).expect("request")
}

pub async fn body_json(response: Response<Body>) -> anyhow::Result<Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&bytes)?)
}
