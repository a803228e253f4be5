use axum::{
    extract::State,
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use validator::Validate;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    domain::AffiliateApplication,
    error::{AppError, Result},
};

#[derive(Debug, Default, Deserialize, Validate)]
pub struct SubmitApplicationRequest {
    #[validate(length(max = 2000))]
    pub message: Option<String>,
}

pub async fn submit(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<SubmitApplicationRequest>,
) -> Result<(StatusCode, Json<AffiliateApplication>)> {
    request.validate()?;

    let application = state
        .service_context
        .affiliate_service
        .submit_application(&user.caller.user_id, request.message, Utc::now())
        .await?;

    Ok((StatusCode::CREATED, Json(application)))
}

pub async fn mine(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<AffiliateApplication>> {
    state
        .service_context
        .affiliate_service
        .latest_for_user(&user.caller.user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No affiliate application".to_string()))
}
