//! services/api/src/web/attendance.rs
//!
//! Class listing, attendance token management for staff, and QR scans by students.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use nipo_core::{ClassSession, Profile};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::{
    middleware::CurrentSession,
    rest::{ClassResponse, ErrorBody, HttpError, PresenceResponse},
    state::AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct IssueTokenResponse {
    pub number: i32,
    pub token: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ScanRequest {
    /// The scanned QR payload, e.g. `NIPO_AULA_12_k3j9x2`.
    pub token: String,
}

#[derive(Serialize, ToSchema)]
pub struct ScanResponse {
    pub class: ClassResponse,
    pub presence: PresenceResponse,
}

/// The viewer's profile, from the request or the session cache.
async fn viewer_profile(current: &CurrentSession) -> Result<Option<Profile>, HttpError> {
    match &current.profile {
        Some(profile) => Ok(Some(profile.clone())),
        None => Ok(current
            .manager
            .fetch_profile(current.identity.user_id, true)
            .await?),
    }
}

/// Only teachers and admins may manage tokens.
async fn require_staff(current: &CurrentSession) -> Result<Profile, HttpError> {
    match viewer_profile(current).await? {
        Some(profile) if profile.role.is_staff() => Ok(profile),
        _ => Err(HttpError::forbidden()),
    }
}

/// Class views for `current`; token strings are shown to staff only.
async fn to_responses(
    current: &CurrentSession,
    classes: Vec<ClassSession>,
) -> Result<Json<Vec<ClassResponse>>, HttpError> {
    let staff = viewer_profile(current)
        .await?
        .is_some_and(|profile| profile.role.is_staff());
    Ok(Json(
        classes
            .into_iter()
            .map(|class| ClassResponse::new(class, staff))
            .collect(),
    ))
}

/// GET /aulas - All classes, in store order
#[utoipa::path(
    get,
    path = "/aulas",
    responses(
        (status = 200, description = "All classes", body = [ClassResponse]),
        (status = 401, description = "No active session", body = ErrorBody)
    )
)]
pub async fn list_classes_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentSession>,
) -> Result<Json<Vec<ClassResponse>>, HttpError> {
    let classes = state.attendance.refresh().await?;
    to_responses(&current, classes).await
}

/// GET /aulas/upcoming - Classes scheduled for today or later, soonest first
#[utoipa::path(
    get,
    path = "/aulas/upcoming",
    responses(
        (status = 200, description = "Upcoming classes", body = [ClassResponse]),
        (status = 401, description = "No active session", body = ErrorBody)
    )
)]
pub async fn upcoming_classes_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentSession>,
) -> Result<Json<Vec<ClassResponse>>, HttpError> {
    state.attendance.refresh().await?;
    to_responses(&current, state.attendance.list_upcoming().await).await
}

/// GET /aulas/missing-token - Classes without an active attendance token
#[utoipa::path(
    get,
    path = "/aulas/missing-token",
    responses(
        (status = 200, description = "Classes needing a token", body = [ClassResponse]),
        (status = 401, description = "No active session", body = ErrorBody)
    )
)]
pub async fn missing_token_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentSession>,
) -> Result<Json<Vec<ClassResponse>>, HttpError> {
    state.attendance.refresh().await?;
    to_responses(&current, state.attendance.list_missing_token().await).await
}

/// POST /aulas/{aula}/token - Issue a new attendance token for a class number
#[utoipa::path(
    post,
    path = "/aulas/{aula}/token",
    params(("aula" = i32, Path, description = "The class number.")),
    responses(
        (status = 201, description = "Token issued", body = IssueTokenResponse),
        (status = 403, description = "Not staff", body = ErrorBody),
        (status = 404, description = "Unknown class", body = ErrorBody)
    )
)]
pub async fn issue_token_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentSession>,
    Path(number): Path<i32>,
) -> Result<(StatusCode, Json<IssueTokenResponse>), HttpError> {
    require_staff(&current).await?;
    let token = state.attendance.issue_token(number).await?;
    Ok((StatusCode::CREATED, Json(IssueTokenResponse { number, token })))
}

/// POST /aulas/{aula}/token/invalidate - Deactivate a class's attendance token
#[utoipa::path(
    post,
    path = "/aulas/{aula}/token/invalidate",
    params(("aula" = Uuid, Path, description = "The class id.")),
    responses(
        (status = 204, description = "Token deactivated"),
        (status = 403, description = "Not staff", body = ErrorBody),
        (status = 404, description = "Unknown class", body = ErrorBody)
    )
)]
pub async fn invalidate_token_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentSession>,
    Path(class_id): Path<Uuid>,
) -> Result<StatusCode, HttpError> {
    require_staff(&current).await?;
    state.attendance.invalidate_token(class_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /attendance/scan - Register the current student's presence from a QR code
#[utoipa::path(
    post,
    path = "/attendance/scan",
    request_body = ScanRequest,
    responses(
        (status = 200, description = "Presence registered", body = ScanResponse),
        (status = 400, description = "Not a class QR code", body = ErrorBody),
        (status = 403, description = "No active enrollment", body = ErrorBody),
        (status = 404, description = "Unknown class", body = ErrorBody),
        (status = 409, description = "Token was replaced", body = ErrorBody),
        (status = 410, description = "Token deactivated or class expired", body = ErrorBody)
    )
)]
pub async fn scan_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentSession>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, HttpError> {
    let outcome = state
        .attendance
        .scan(req.token.trim(), current.identity.user_id)
        .await?;
    Ok(Json(ScanResponse {
        class: ClassResponse::new(outcome.class, false),
        presence: outcome.presence.into(),
    }))
}
