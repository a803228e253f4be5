use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::{
    api::state::AppState,
    auth::Caller,
    error::AppError,
};

/// The verified caller, available to handlers behind either middleware.
#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub caller: Caller,
}

fn bearer_token(request: &Request) -> Result<&str, AppError> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AppError::Unauthorized)
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let caller = state.auth_service.verify_token(bearer_token(&request)?)?;

    request.extensions_mut().insert(CurrentUser { caller });

    Ok(next.run(request).await)
}

pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let caller = state.auth_service.verify_token(bearer_token(&request)?)?;

    if !state.auth_service.is_admin(&caller) {
        tracing::warn!(user_id = %caller.user_id, path = %request.uri().path(), "Non-admin caller refused");
        return Err(AppError::Forbidden);
    }

    request.extensions_mut().insert(CurrentUser { caller });

    Ok(next.run(request).await)
}
