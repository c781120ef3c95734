//! crates/nipo_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like the database or
//! the authentication provider.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::domain::{
    ClassSession, Enrollment, Identity, NewPresence, PresenceRecord, Profile, ProfileSeed,
    ProfileUpdate, Registration,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all store operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Item already exists: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// An error reported by the authentication provider.
///
/// `code` is the provider's structured error code when it sends one; the
/// message is kept for the substring fallback and for logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub code: Option<String>,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Exchanges credentials for an authenticated identity.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, ProviderError>;

    /// Creates a new account. Profile creation happens asynchronously on the store.
    /// `access_token` is `None` when the email must be confirmed first.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        seed: &ProfileSeed,
    ) -> Result<Registration, ProviderError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError>;

    async fn resend_confirmation(&self, email: &str) -> Result<(), ProviderError>;

    /// Restores the identity behind an access token, if it is still valid.
    async fn get_session(&self, access_token: &str) -> Result<Option<Identity>, ProviderError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Returns `PortError::NotFound` when no profile exists for the user.
    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile>;

    async fn record_vote(&self, user_id: Uuid) -> PortResult<()>;

    async fn update_profile(&self, user_id: Uuid, update: &ProfileUpdate) -> PortResult<Profile>;
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    // --- Classes ---
    async fn list_classes(&self) -> PortResult<Vec<ClassSession>>;

    async fn get_class_by_id(&self, class_id: Uuid) -> PortResult<ClassSession>;

    async fn get_class_by_number(&self, number: i32) -> PortResult<ClassSession>;

    /// Runs the store-side `generate_attendance_token` procedure, which replaces
    /// the class's token, re-activates it and returns the new string.
    async fn generate_attendance_token(&self, number: i32) -> PortResult<String>;

    async fn invalidate_attendance_token(
        &self,
        class_id: Uuid,
        invalidated_at: DateTime<Utc>,
    ) -> PortResult<()>;

    // --- Enrollment and presence ---
    async fn find_active_enrollment(&self, student_id: Uuid) -> PortResult<Option<Enrollment>>;

    async fn find_presence(
        &self,
        enrollment_id: Uuid,
        date: NaiveDate,
    ) -> PortResult<Option<PresenceRecord>>;

    async fn insert_presence(&self, presence: NewPresence) -> PortResult<PresenceRecord>;

    async fn update_presence(
        &self,
        presence_id: Uuid,
        present: bool,
        note: &str,
        recorded_at: DateTime<Utc>,
    ) -> PortResult<PresenceRecord>;
}
