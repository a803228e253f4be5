use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "GemVault Ledger",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Payment webhook reconciliation, commissions and memberships",
        "status": "operational",
        "endpoints": {
            "health": "/health",
            "webhooks": ["/webhooks/paypal", "/webhooks/payfast"],
            "affiliate": "/api/affiliate/applications",
            "admin": "/admin"
        }
    }))
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
