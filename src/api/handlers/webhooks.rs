use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use std::net::SocketAddr;

use crate::{api::state::AppState, error::Result};

pub async fn paypal(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    state
        .service_context
        .webhook_service
        .handle_paypal(&headers, &body)
        .await?;

    Ok(Json(json!({ "received": true })))
}

pub async fn payfast(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let peer = connect_info.map(|ConnectInfo(addr)| addr.ip());
    let forwarded_for = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());

    state
        .service_context
        .webhook_service
        .handle_payfast(peer, forwarded_for, &body)
        .await?;

    Ok(Json(json!({ "received": true })))
}
