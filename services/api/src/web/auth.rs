//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user signup, login, logout and confirmation emails.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Duration;
use nipo_core::{ProfileSeed, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::{
    middleware::session_cookie,
    rest::{ErrorBody, HttpError, ProfileResponse},
    state::AppState,
};

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    /// `student` (default) or `teacher`.
    pub role: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ResendConfirmationRequest {
    pub email: String,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub email: String,
    /// True when the account must confirm its email before signing in.
    pub confirmation_required: bool,
    /// Absent when the profile was not available yet.
    pub profile: Option<ProfileResponse>,
}

fn session_set_cookie(token: &str, ttl_days: i64) -> String {
    format!(
        "session={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        token,
        Duration::days(ttl_days).num_seconds()
    )
}

const CLEARED_COOKIE: &str = "session=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0";

fn signup_role(requested: Option<&str>) -> Result<Role, HttpError> {
    let role = match requested {
        None => Role::Student,
        Some(raw) => raw.parse::<Role>().map_err(|e| {
            HttpError::new(StatusCode::BAD_REQUEST, "invalid_role", e)
        })?,
    };
    if role == Role::Admin {
        return Err(HttpError::new(
            StatusCode::BAD_REQUEST,
            "invalid_role",
            "Admin accounts cannot be created by sign-up.",
        ));
    }
    Ok(role)
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/signup - Create a new user account
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created; the session cookie is only set when no email confirmation is pending", body = AuthResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 429, description = "Too many attempts", body = ErrorBody)
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<Response, HttpError> {
    let seed = ProfileSeed {
        full_name: req.full_name,
        role: signup_role(req.role.as_deref())?,
    };

    let manager = state.sessions.create();
    let pending = manager.sign_up(&req.email, &req.password, &seed).await?;

    let response = AuthResponse {
        user_id: pending.user_id,
        email: pending.email.clone(),
        confirmation_required: pending.confirmation_required(),
        profile: pending.profile.map(ProfileResponse::from),
    };

    // No cookie until the email is confirmed and the user signs in.
    let Some(identity) = pending.identity else {
        return Ok((StatusCode::CREATED, Json(response)).into_response());
    };
    state.sessions.insert(&identity.access_token, manager).await;
    let cookie = session_set_cookie(&identity.access_token, state.config.auth_session_ttl_days);

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(response),
    )
        .into_response())
}

/// POST /auth/login - Login with existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 403, description = "Email not confirmed or account disabled", body = ErrorBody)
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let manager = state.sessions.create();
    let session = manager.sign_in(&req.email, &req.password).await?;
    state
        .sessions
        .insert(&session.identity.access_token, manager)
        .await;

    let cookie = session_set_cookie(
        &session.identity.access_token,
        state.config.auth_session_ttl_days,
    );
    let response = AuthResponse {
        user_id: session.identity.user_id,
        email: session.identity.email,
        confirmation_required: false,
        profile: session.profile.map(ProfileResponse::from),
    };

    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(response)))
}

/// POST /auth/logout - Logout and invalidate session
///
/// The cookie is cleared even when the provider fails to end the session.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session", body = ErrorBody)
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HttpError> {
    let token = session_cookie(&headers).ok_or_else(HttpError::unauthorized)?;

    if let Err(e) = state.sessions.sign_out(token).await {
        warn!("Logout completed locally only: {}", e);
    }

    Ok((StatusCode::OK, [(header::SET_COOKIE, CLEARED_COOKIE.to_string())]))
}

/// POST /auth/resend-confirmation - Send the confirmation email again
#[utoipa::path(
    post,
    path = "/auth/resend-confirmation",
    request_body = ResendConfirmationRequest,
    responses(
        (status = 204, description = "Confirmation email queued"),
        (status = 404, description = "No account for this email", body = ErrorBody),
        (status = 429, description = "Too many attempts", body = ErrorBody)
    )
)]
pub async fn resend_confirmation_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResendConfirmationRequest>,
) -> Result<StatusCode, HttpError> {
    state
        .sessions
        .create()
        .resend_confirmation(&req.email)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
