use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    domain::{AffiliateApplication, ApplicationStatus, Audience, NewPayout, Payout, PlanType, User},
    error::{AppError, Result},
    service::{Job, JobReport, ReconciliationReport},
};

#[derive(Debug, Deserialize)]
pub struct ApplicationQuery {
    pub status: Option<ApplicationStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RejectApplicationRequest {
    #[validate(length(min = 1, max = 1000))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GrantTrialRequest {
    pub tier: PlanType,
    #[validate(range(min = 1, max = 365))]
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StoreCreditRequest {
    pub amount_cents: i64,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkNotificationRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 2000))]
    pub body: String,
    pub audience: Audience,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePayoutRequest {
    #[validate(length(min = 1))]
    pub affiliate_id: String,
    #[validate(length(min = 1))]
    pub payout_item_id: String,
    #[validate(range(min = 1))]
    pub amount_cents: i64,
}

pub async fn list_applications(
    State(state): State<AppState>,
    Query(query): Query<ApplicationQuery>,
) -> Result<Json<Vec<AffiliateApplication>>> {
    let applications = state
        .service_context
        .affiliate_service
        .list_applications(query.status)
        .await?;

    Ok(Json(applications))
}

pub async fn approve_application(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<AffiliateApplication>> {
    let application = state
        .service_context
        .affiliate_service
        .approve(id, &admin.caller.email, Utc::now())
        .await?;

    Ok(Json(application))
}

pub async fn reject_application(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectApplicationRequest>,
) -> Result<Json<AffiliateApplication>> {
    request.validate()?;

    let application = state
        .service_context
        .affiliate_service
        .reject(id, &request.reason, &admin.caller.email, Utc::now())
        .await?;

    Ok(Json(application))
}

pub async fn grant_trial(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    Path(user_id): Path<String>,
    Json(request): Json<GrantTrialRequest>,
) -> Result<Json<User>> {
    request.validate()?;

    let user = state
        .service_context
        .membership_service
        .grant_trial(&user_id, request.tier, request.days, Utc::now())
        .await?;

    tracing::info!(user_id = %user_id, tier = %request.tier, admin = %admin.caller.email, "Trial granted");

    Ok(Json(user))
}

pub async fn adjust_store_credit(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    Path(user_id): Path<String>,
    Json(request): Json<StoreCreditRequest>,
) -> Result<Json<User>> {
    request.validate()?;

    let user = state
        .service_context
        .admin_service
        .adjust_store_credit(
            &user_id,
            request.amount_cents,
            &request.reason,
            &admin.caller.email,
            Utc::now(),
        )
        .await?;

    Ok(Json(user))
}

pub async fn send_bulk_notification(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    Json(request): Json<BulkNotificationRequest>,
) -> Result<Json<Value>> {
    request.validate()?;

    let sent = state
        .service_context
        .admin_service
        .send_bulk_notification(request.audience, &request.title, &request.body)
        .await?;

    tracing::info!(sent, audience = ?request.audience, admin = %admin.caller.email, "Bulk notification sent");

    Ok(Json(json!({ "sent": sent })))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    Path(user_id): Path<String>,
) -> Result<StatusCode> {
    state
        .service_context
        .admin_service
        .delete_user(&user_id, &admin.caller.email)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_payout(
    State(state): State<AppState>,
    Json(request): Json<CreatePayoutRequest>,
) -> Result<(StatusCode, Json<Payout>)> {
    request.validate()?;

    let payout = state
        .service_context
        .payout_service
        .create_payout(
            NewPayout {
                affiliate_id: request.affiliate_id,
                payout_item_id: request.payout_item_id,
                amount_cents: request.amount_cents,
            },
            Utc::now(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(payout)))
}

pub async fn run_job(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    Path(job): Path<String>,
) -> Result<Json<JobReport>> {
    let job: Job = job
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Unknown job: {}", job)))?;

    tracing::info!(%job, admin = %admin.caller.email, "Running job on demand");

    let report = state.service_context.job_service.run(job, Utc::now()).await?;

    Ok(Json(report))
}

pub async fn reconciliation(State(state): State<AppState>) -> Result<Json<ReconciliationReport>> {
    let report = state.service_context.reconciliation_service.check().await?;

    Ok(Json(report))
}
