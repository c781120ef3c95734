//! crates/nipo_core/src/error.rs
//!
//! Domain error types for the session manager and the attendance token service.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::ports::{PortError, ProviderError};
use crate::token::TokenFormatError;

//=========================================================================================
// Authentication errors
//=========================================================================================

/// The closed set of authentication failures shown to the user.
///
/// Each variant's `Display` text is the user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email or password.")]
    InvalidCredentials,
    #[error("Please confirm your email address before signing in.")]
    EmailNotConfirmed,
    #[error("Too many attempts. Please wait a moment and try again.")]
    RateLimited,
    #[error("No account was found for this email.")]
    UserNotFound,
    #[error("Could not reach the server. Check your connection.")]
    NetworkError,
    #[error("This account has been disabled.")]
    AccountDisabled,
    #[error("Unexpected authentication error: {0}")]
    Unknown(String),
}

impl AuthError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::EmailNotConfirmed => "email_not_confirmed",
            AuthError::RateLimited => "rate_limited",
            AuthError::UserNotFound => "user_not_found",
            AuthError::NetworkError => "network_error",
            AuthError::AccountDisabled => "account_disabled",
            AuthError::Unknown(_) => "unknown",
        }
    }
}

/// Maps a provider error code to its kind.
fn kind_for_code(code: &str) -> Option<AuthError> {
    let kind = match code {
        "invalid_credentials" | "invalid_grant" => AuthError::InvalidCredentials,
        "email_not_confirmed" => AuthError::EmailNotConfirmed,
        "over_request_rate_limit" | "over_email_send_rate_limit" | "too_many_requests" => {
            AuthError::RateLimited
        }
        "user_not_found" => AuthError::UserNotFound,
        "network_error" | "request_timeout" => AuthError::NetworkError,
        "user_banned" | "user_disabled" => AuthError::AccountDisabled,
        _ => return None,
    };
    Some(kind)
}

/// Lower-case message fragments, used only when the provider sends no known code.
fn kind_for_message(message: &str) -> Option<AuthError> {
    let message = message.to_lowercase();
    let kind = if message.contains("invalid login credentials") {
        AuthError::InvalidCredentials
    } else if message.contains("email not confirmed") {
        AuthError::EmailNotConfirmed
    } else if message.contains("too many requests") || message.contains("rate limit") {
        AuthError::RateLimited
    } else if message.contains("user not found") {
        AuthError::UserNotFound
    } else if message.contains("failed to fetch") || message.contains("network") {
        AuthError::NetworkError
    } else if message.contains("banned") || message.contains("disabled") {
        AuthError::AccountDisabled
    } else {
        return None;
    };
    Some(kind)
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        err.code
            .as_deref()
            .and_then(kind_for_code)
            .or_else(|| kind_for_message(&err.message))
            .unwrap_or(AuthError::Unknown(err.message))
    }
}

//=========================================================================================
// Attendance errors
//=========================================================================================

/// Failures of the attendance token service.
#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    #[error("Class {0} was not found.")]
    ClassNotFound(String),
    #[error("This QR code is not a valid class code ({0}).")]
    MalformedToken(#[from] TokenFormatError),
    #[error("This QR code has been replaced by a newer one.")]
    TokenMismatch,
    #[error("This QR code has been deactivated.")]
    TokenInactive,
    #[error("This class took place on {0}; its QR code is no longer accepted.")]
    ClassExpired(NaiveDate),
    #[error("Student {0} has no active enrollment.")]
    NoActiveEnrollment(Uuid),
    #[error("Store communication failed: {0}")]
    Transport(#[from] PortError),
}

impl AttendanceError {
    pub fn kind(&self) -> &'static str {
        match self {
            AttendanceError::ClassNotFound(_) => "class_not_found",
            AttendanceError::MalformedToken(_) => "malformed_token",
            AttendanceError::TokenMismatch => "token_mismatch",
            AttendanceError::TokenInactive => "token_inactive",
            AttendanceError::ClassExpired(_) => "class_expired",
            AttendanceError::NoActiveEnrollment(_) => "no_active_enrollment",
            AttendanceError::Transport(_) => "transport_error",
        }
    }
}

pub type AttendanceResult<T> = Result<T, AttendanceError>;
