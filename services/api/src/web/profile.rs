//! services/api/src/web/profile.rs
//!
//! Endpoints for the signed-in user's own profile and post-login redirects.

use axum::{
    extract::Query,
    http::StatusCode,
    Extension, Json,
};
use nipo_core::ProfileUpdate;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::web::{
    middleware::CurrentSession,
    rest::{ErrorBody, HttpError, ProfileResponse, RedirectResponse},
};

#[derive(Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct RedirectQuery {
    /// The route the client is currently on.
    pub location: String,
    /// Skip the once-per-login guard.
    #[serde(default)]
    pub force: bool,
}

/// GET /me/profile - The current user's profile
#[utoipa::path(
    get,
    path = "/me/profile",
    responses(
        (status = 200, description = "The profile", body = ProfileResponse),
        (status = 401, description = "No active session", body = ErrorBody),
        (status = 404, description = "Profile not created yet", body = ErrorBody)
    )
)]
pub async fn get_profile_handler(
    Extension(current): Extension<CurrentSession>,
) -> Result<Json<ProfileResponse>, HttpError> {
    let profile = match current.profile {
        Some(profile) => profile,
        None => current
            .manager
            .fetch_profile(current.identity.user_id, false)
            .await?
            .ok_or_else(|| {
                HttpError::new(StatusCode::NOT_FOUND, "profile_not_found", "Profile not found.")
            })?,
    };
    Ok(Json(profile.into()))
}

/// PATCH /me/profile - Update the current user's profile
#[utoipa::path(
    patch,
    path = "/me/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "The updated profile", body = ProfileResponse),
        (status = 401, description = "No active session", body = ErrorBody)
    )
)]
pub async fn update_profile_handler(
    Extension(current): Extension<CurrentSession>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, HttpError> {
    let update = ProfileUpdate {
        full_name: req.full_name,
    };
    let profile = current.manager.update_profile(&update).await?;
    Ok(Json(profile.into()))
}

/// POST /me/vote - Record that the current user has voted
#[utoipa::path(
    post,
    path = "/me/vote",
    responses(
        (status = 204, description = "Vote recorded"),
        (status = 401, description = "No active session", body = ErrorBody)
    )
)]
pub async fn vote_handler(
    Extension(current): Extension<CurrentSession>,
) -> Result<StatusCode, HttpError> {
    current.manager.record_vote().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /me/redirect - Where the client should send the user, if anywhere
#[utoipa::path(
    get,
    path = "/me/redirect",
    params(RedirectQuery),
    responses(
        (status = 200, description = "The redirect decision", body = RedirectResponse),
        (status = 401, description = "No active session", body = ErrorBody)
    )
)]
pub async fn redirect_handler(
    Extension(current): Extension<CurrentSession>,
    Query(query): Query<RedirectQuery>,
) -> Result<Json<RedirectResponse>, HttpError> {
    let decision = current
        .manager
        .redirect_for(&query.location, query.force)
        .await?;
    Ok(Json(decision.into()))
}
