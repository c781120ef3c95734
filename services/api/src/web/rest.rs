//! services/api/src/web/rest.rs
//!
//! The master definition for the OpenAPI specification, the JSON payloads shared
//! by several handlers, and the mapping from domain errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, NaiveDate, Utc};
use nipo_core::{
    AttendanceError, AuthError, ClassSession, PortError, PresenceRecord, Profile,
    RedirectDecision,
};
use serde::Serialize;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::web::{attendance, auth, profile};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::resend_confirmation_handler,
        profile::get_profile_handler,
        profile::update_profile_handler,
        profile::vote_handler,
        profile::redirect_handler,
        attendance::list_classes_handler,
        attendance::upcoming_classes_handler,
        attendance::missing_token_handler,
        attendance::issue_token_handler,
        attendance::invalidate_token_handler,
        attendance::scan_handler,
    ),
    components(
        schemas(
            ErrorBody, ProfileResponse, ClassResponse, PresenceResponse, RedirectResponse,
            auth::SignupRequest, auth::LoginRequest, auth::ResendConfirmationRequest,
            auth::AuthResponse, profile::UpdateProfileRequest,
            attendance::IssueTokenResponse, attendance::ScanRequest, attendance::ScanResponse,
        )
    ),
    tags(
        (name = "Nipo School API", description = "Session, profile and class attendance endpoints.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Shared Response Payloads
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct ProfileResponse {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub role: String,
    pub has_voted: bool,
}

impl From<Profile> for ProfileResponse {
    fn from(p: Profile) -> Self {
        Self {
            user_id: p.user_id,
            email: p.email,
            full_name: p.full_name,
            role: p.role.to_string(),
            has_voted: p.has_voted,
        }
    }
}

/// A class as shown to students and staff. The token string is only included
/// for staff, and only while it is active.
#[derive(Serialize, ToSchema)]
pub struct ClassResponse {
    pub id: Uuid,
    pub number: i32,
    pub title: String,
    pub scheduled_for: NaiveDate,
    pub objective: Option<String>,
    pub activity_summary: Option<String>,
    pub challenge: Option<String>,
    pub status: String,
    pub token: Option<String>,
    pub token_active: bool,
    pub token_issued_at: Option<DateTime<Utc>>,
}

impl ClassResponse {
    pub fn new(c: ClassSession, reveal_token: bool) -> Self {
        Self {
            token: c
                .attendance
                .active_token()
                .filter(|_| reveal_token)
                .map(String::from),
            token_active: c.attendance.active,
            token_issued_at: c.attendance.issued_at,
            id: c.id,
            number: c.number,
            title: c.title,
            scheduled_for: c.scheduled_for,
            objective: c.objective,
            activity_summary: c.activity_summary,
            challenge: c.challenge,
            status: c.status.as_str().to_string(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PresenceResponse {
    pub id: Uuid,
    pub date: NaiveDate,
    pub present: bool,
    pub note: String,
    pub recorded_at: DateTime<Utc>,
}

impl From<PresenceRecord> for PresenceResponse {
    fn from(p: PresenceRecord) -> Self {
        Self {
            id: p.id,
            date: p.date,
            present: p.present,
            note: p.note,
            recorded_at: p.recorded_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct RedirectResponse {
    pub should_redirect: bool,
    pub target: Option<String>,
    /// False when no decision was made (no profile yet, or one already running).
    pub decided: bool,
}

impl From<Option<RedirectDecision>> for RedirectResponse {
    fn from(decision: Option<RedirectDecision>) -> Self {
        match decision {
            Some(d) => Self {
                should_redirect: d.should_redirect,
                target: d.target,
                decided: true,
            },
            None => Self {
                should_redirect: false,
                target: None,
                decided: false,
            },
        }
    }
}

//=========================================================================================
// Error Responses
//=========================================================================================

/// The JSON body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// An error ready to be sent to the client.
#[derive(Debug)]
pub struct HttpError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "No active session.")
    }

    pub fn forbidden() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "forbidden",
            "Only teachers and admins can do this.",
        )
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<AuthError> for HttpError {
    fn from(err: AuthError) -> Self {
        let status = match err {
            AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::EmailNotConfirmed | AuthError::AccountDisabled => StatusCode::FORBIDDEN,
            AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::NetworkError => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Unknown(_) => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.kind(), err.to_string())
    }
}

impl From<AttendanceError> for HttpError {
    fn from(err: AttendanceError) -> Self {
        let status = match &err {
            AttendanceError::ClassNotFound(_) => StatusCode::NOT_FOUND,
            AttendanceError::MalformedToken(_) => StatusCode::BAD_REQUEST,
            AttendanceError::TokenMismatch => StatusCode::CONFLICT,
            AttendanceError::TokenInactive | AttendanceError::ClassExpired(_) => StatusCode::GONE,
            AttendanceError::NoActiveEnrollment(_) => StatusCode::FORBIDDEN,
            AttendanceError::Transport(e) => {
                error!("Attendance store failure: {:?}", e);
                StatusCode::BAD_GATEWAY
            }
        };
        Self::new(status, err.kind(), err.to_string())
    }
}

impl From<PortError> for HttpError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => Self::new(StatusCode::NOT_FOUND, "not_found", what),
            PortError::Conflict(what) => Self::new(StatusCode::CONFLICT, "conflict", what),
            PortError::Unauthorized => Self::unauthorized(),
            PortError::Unexpected(e) => {
                error!("Store failure: {}", e);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Something went wrong. Please try again.",
                )
            }
        }
    }
}
