use std::{net::SocketAddr, sync::Arc};
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gemvault::{api, config::Settings, jobs, service::ServiceContext};

const DEFAULT_JWT_SECRET: &str = "change-me-in-production";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gemvault=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });

    if settings.auth.jwt_secret == DEFAULT_JWT_SECRET {
        tracing::warn!("auth.jwt_secret is the built-in default; set GEMVAULT__AUTH__JWT_SECRET");
    }

    if settings.paypal.enabled {
        if settings.paypal.webhook_id.is_none() || settings.paypal.webhook_secret.is_none() {
            tracing::warn!("PayPal enabled but webhook_id or webhook_secret is missing; webhooks will be refused");
        } else {
            tracing::info!("PayPal webhooks enabled");
        }
    } else {
        tracing::info!("PayPal webhooks disabled; deliveries get a 404");
    }

    if settings.payfast.enabled {
        tracing::warn!(
            ranges = settings.payfast.allowed_cidrs.len(),
            "PayFast ITN authenticity relies on the source IP allowlist only"
        );
        if settings.payfast.trust_forwarded_for && settings.payfast.trusted_proxies.is_empty() {
            tracing::warn!("Trusting X-Forwarded-For without trusted_proxies; only the rightmost hop is used");
        }
    } else {
        tracing::info!("PayFast ITNs disabled; deliveries get a 404");
    }

    if settings.commission.rate_as_of.is_none() {
        tracing::warn!(
            zar_per_usd = settings.commission.zar_per_usd,
            "commission.rate_as_of is not set; currency conversions will warn on every use"
        );
    }

    tracing::info!("Starting GemVault ledger on {}:{}", settings.server.host, settings.server.port);

    // Initialize database
    let db_pool = SqlitePoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await?;

    let settings = Arc::new(settings);
    let service_context = Arc::new(ServiceContext::new(db_pool, &settings)?);

    let job_handles = jobs::spawn_all(service_context.clone(), &settings.jobs);
    tracing::info!("Scheduled {} background jobs", job_handles.len());

    let app = api::create_app(service_context, settings.clone());

    let listener = tokio::net::TcpListener::bind(
        format!("{}:{}", settings.server.host, settings.server.port)
    ).await?;

    tracing::info!("Server listening on http://{}:{}", settings.server.host, settings.server.port);

    // PayFast's allowlist check needs the peer address
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
