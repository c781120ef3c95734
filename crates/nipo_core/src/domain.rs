//! crates/nipo_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Identity and Profile
//=========================================================================================

/// An authenticated identity as handed back by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    /// Opaque provider session handle (sent to the browser as the session cookie).
    pub access_token: String,
}

/// What the provider returns for a new account. No session is opened while
/// the email still awaits confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub user_id: Uuid,
    pub email: String,
    pub access_token: Option<String>,
}

impl Registration {
    /// The signed-in identity, when the provider opened a session.
    pub fn into_identity(self) -> Option<Identity> {
        let Registration {
            user_id,
            email,
            access_token,
        } = self;
        access_token.map(|access_token| Identity {
            user_id,
            email,
            access_token,
        })
    }
}

/// The role a profile holds inside the school.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    /// Teachers and admins may manage class tokens.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Teacher | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" | "aluno" => Ok(Role::Student),
            "teacher" | "professor" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// The role- and preference-bearing record attached to an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub role: Role,
    pub has_voted: bool,
}

/// Data supplied at sign-up, used by the store to create the profile.
#[derive(Debug, Clone)]
pub struct ProfileSeed {
    pub full_name: Option<String>,
    pub role: Role,
}

/// A partial profile update. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
}

//=========================================================================================
// Classes ("aulas") and attendance
//=========================================================================================

/// Kanban lifecycle of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassStatus {
    ToDo,
    InPreparation,
    Completed,
    InReview,
    Cancelled,
}

impl ClassStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassStatus::ToDo => "todo",
            ClassStatus::InPreparation => "in_preparation",
            ClassStatus::Completed => "completed",
            ClassStatus::InReview => "in_review",
            ClassStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ClassStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(ClassStatus::ToDo),
            "in_preparation" => Ok(ClassStatus::InPreparation),
            "completed" => Ok(ClassStatus::Completed),
            "in_review" => Ok(ClassStatus::InReview),
            "cancelled" => Ok(ClassStatus::Cancelled),
            other => Err(format!("unknown class status '{}'", other)),
        }
    }
}

/// The attendance-token record embedded in every class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRecord {
    pub token: Option<String>,
    pub active: bool,
    pub issued_at: Option<DateTime<Utc>>,
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// The token string, if one has been issued and is still active.
    pub fn active_token(&self) -> Option<&str> {
        if self.active {
            self.token.as_deref()
        } else {
            None
        }
    }
}

/// A scheduled class session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSession {
    pub id: Uuid,
    /// Unique sequence number, embedded in the attendance token.
    pub number: i32,
    pub title: String,
    pub scheduled_for: NaiveDate,
    pub objective: Option<String>,
    pub activity_summary: Option<String>,
    pub challenge: Option<String>,
    pub status: ClassStatus,
    pub attendance: TokenRecord,
}

/// Links a student to the school; must be active for presence to be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub active: bool,
}

/// One presence entry per enrollment per day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub id: Uuid,
    pub enrollment_id: Uuid,
    pub date: NaiveDate,
    pub present: bool,
    pub note: String,
    pub recorded_at: DateTime<Utc>,
}

/// Fields for a presence row that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewPresence {
    pub enrollment_id: Uuid,
    pub date: NaiveDate,
    pub present: bool,
    pub note: String,
    pub recorded_at: DateTime<Utc>,
}
