pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::TraceLayer,
};
use std::sync::Arc;

use crate::{
    config::Settings,
    service::ServiceContext,
};
use state::AppState;

pub fn create_app(service_context: Arc<ServiceContext>, settings: Arc<Settings>) -> Router {
    let app_state = AppState::new(service_context, settings);

    Router::new()
        // Root and health endpoints
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::root::health_check))

        // Payment provider callbacks authenticate themselves
        .nest("/webhooks", webhook_routes())

        // Signed-in storefront users
        .nest("/api", api_routes(app_state.clone()))

        // Admin routes
        .nest("/admin", admin_routes(app_state.clone()))

        // Add state to the router
        .with_state(app_state)

        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive()) // Configure properly for production
        .layer(TraceLayer::new_for_http())
}

fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/paypal", post(handlers::webhooks::paypal))
        .route("/payfast", post(handlers::webhooks::payfast))
}

fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/affiliate/applications", post(handlers::affiliates::submit))
        .route("/affiliate/applications/me", get(handlers::affiliates::mine))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_auth,
        ))
}

fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/affiliate/applications", get(handlers::admin::list_applications))
        .route("/affiliate/applications/:id/approve", post(handlers::admin::approve_application))
        .route("/affiliate/applications/:id/reject", post(handlers::admin::reject_application))
        .route("/users/:id", delete(handlers::admin::delete_user))
        .route("/users/:id/trial", post(handlers::admin::grant_trial))
        .route("/users/:id/store-credit", post(handlers::admin::adjust_store_credit))
        .route("/notifications/bulk", post(handlers::admin::send_bulk_notification))
        .route("/payouts", post(handlers::admin::create_payout))
        .route("/jobs/:job/run", post(handlers::admin::run_job))
        .route("/reconciliation", get(handlers::admin::reconciliation))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_admin,
        ))
}
