//! In-memory ports and an `AppState` builder for handler tests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use nipo_core::{
    AttendancePolicy, AttendanceStore, AttendanceTokenService, AuthProvider, ClassSession,
    ClassStatus, Enrollment, Identity, NewPresence, PortError, PortResult, PresenceRecord,
    Profile, ProfileSeed, ProfileStore, ProfileUpdate, ProviderError, Registration, Role,
    SessionConfig, TokenRecord,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::config::Config;
use crate::web::middleware::CurrentSession;
use crate::web::state::{AppState, SessionRegistry};

//=========================================================================================
// Auth
//=========================================================================================

#[derive(Default)]
pub struct FakeAuth {
    sessions: Mutex<HashMap<String, Identity>>,
    profiles: Option<Arc<FakeProfiles>>,
    pub require_confirmation: bool,
}

impl FakeAuth {
    /// Sign-ups also create the profile in `profiles`.
    pub fn with_profiles(profiles: Arc<FakeProfiles>, require_confirmation: bool) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            profiles: Some(profiles),
            require_confirmation,
        }
    }

    pub fn open_session(&self, user_id: Uuid, email: &str) -> Identity {
        let identity = Identity {
            user_id,
            email: email.to_string(),
            access_token: Uuid::new_v4().to_string(),
        };
        self.sessions
            .lock()
            .unwrap()
            .insert(identity.access_token.clone(), identity.clone());
        identity
    }

    pub fn revoke(&self, access_token: &str) {
        self.sessions.lock().unwrap().remove(access_token);
    }

    pub fn has_session(&self, access_token: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(access_token)
    }
}

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<Identity, ProviderError> {
        Err(ProviderError::new("invalid_credentials", "Invalid login credentials"))
    }

    async fn sign_up(
        &self,
        email: &str,
        _password: &str,
        seed: &ProfileSeed,
    ) -> Result<Registration, ProviderError> {
        let user_id = Uuid::new_v4();
        if let Some(profiles) = &self.profiles {
            profiles.insert(user_id, email, seed.role);
        }
        let access_token = if self.require_confirmation {
            None
        } else {
            Some(self.open_session(user_id, email).access_token)
        };
        Ok(Registration {
            user_id,
            email: email.to_string(),
            access_token,
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        self.revoke(access_token);
        Ok(())
    }

    async fn resend_confirmation(&self, _email: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn get_session(&self, access_token: &str) -> Result<Option<Identity>, ProviderError> {
        Ok(self.sessions.lock().unwrap().get(access_token).cloned())
    }
}

//=========================================================================================
// Profiles
//=========================================================================================

#[derive(Default)]
pub struct FakeProfiles {
    profiles: Mutex<HashMap<Uuid, Profile>>,
    /// Makes every read fail with a store error.
    pub fail_reads: AtomicBool,
}

impl FakeProfiles {
    pub fn insert(&self, user_id: Uuid, email: &str, role: Role) {
        self.profiles.lock().unwrap().insert(
            user_id,
            Profile {
                user_id,
                email: email.to_string(),
                full_name: None,
                role,
                has_voted: true,
            },
        );
    }
}

#[async_trait]
impl ProfileStore for FakeProfiles {
    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("profile store offline".into()));
        }
        self.profiles
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))
    }

    async fn record_vote(&self, user_id: Uuid) -> PortResult<()> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))?;
        profile.has_voted = true;
        Ok(())
    }

    async fn update_profile(&self, user_id: Uuid, update: &ProfileUpdate) -> PortResult<Profile> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))?;
        if let Some(name) = &update.full_name {
            profile.full_name = Some(name.clone());
        }
        Ok(profile.clone())
    }
}

//=========================================================================================
// Classes
//=========================================================================================

/// A class list without enrollments; presence writes are not needed by handler tests.
#[derive(Default)]
pub struct FakeClasses {
    classes: Mutex<Vec<ClassSession>>,
}

impl FakeClasses {
    pub fn add_with_token(&self, number: i32, token: &str) -> ClassSession {
        let class = ClassSession {
            id: Uuid::new_v4(),
            number,
            title: format!("Aula {}", number),
            scheduled_for: Utc::now().date_naive(),
            objective: None,
            activity_summary: None,
            challenge: None,
            status: ClassStatus::ToDo,
            attendance: TokenRecord {
                token: Some(token.to_string()),
                active: true,
                issued_at: Some(Utc::now()),
                invalidated_at: None,
            },
        };
        self.classes.lock().unwrap().push(class.clone());
        class
    }

    fn find(&self, pred: impl Fn(&ClassSession) -> bool) -> PortResult<ClassSession> {
        self.classes
            .lock()
            .unwrap()
            .iter()
            .find(|c| pred(c))
            .cloned()
            .ok_or_else(|| PortError::NotFound("Class not found".to_string()))
    }
}

#[async_trait]
impl AttendanceStore for FakeClasses {
    async fn list_classes(&self) -> PortResult<Vec<ClassSession>> {
        Ok(self.classes.lock().unwrap().clone())
    }

    async fn get_class_by_id(&self, class_id: Uuid) -> PortResult<ClassSession> {
        self.find(|c| c.id == class_id)
    }

    async fn get_class_by_number(&self, number: i32) -> PortResult<ClassSession> {
        self.find(|c| c.number == number)
    }

    async fn generate_attendance_token(&self, number: i32) -> PortResult<String> {
        let token = format!("NIPO_AULA_{}_{}", number, Uuid::new_v4().simple());
        let mut classes = self.classes.lock().unwrap();
        let class = classes
            .iter_mut()
            .find(|c| c.number == number)
            .ok_or_else(|| PortError::NotFound("Class not found".to_string()))?;
        class.attendance.token = Some(token.clone());
        class.attendance.active = true;
        Ok(token)
    }

    async fn invalidate_attendance_token(
        &self,
        class_id: Uuid,
        invalidated_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut classes = self.classes.lock().unwrap();
        let class = classes
            .iter_mut()
            .find(|c| c.id == class_id)
            .ok_or_else(|| PortError::NotFound("Class not found".to_string()))?;
        class.attendance.active = false;
        class.attendance.invalidated_at = Some(invalidated_at);
        Ok(())
    }

    async fn find_active_enrollment(&self, _student_id: Uuid) -> PortResult<Option<Enrollment>> {
        Ok(None)
    }

    async fn find_presence(
        &self,
        _enrollment_id: Uuid,
        _date: NaiveDate,
    ) -> PortResult<Option<PresenceRecord>> {
        Ok(None)
    }

    async fn insert_presence(&self, _presence: NewPresence) -> PortResult<PresenceRecord> {
        Err(PortError::Unexpected("presence writes are not supported here".into()))
    }

    async fn update_presence(
        &self,
        _presence_id: Uuid,
        _present: bool,
        _note: &str,
        _recorded_at: DateTime<Utc>,
    ) -> PortResult<PresenceRecord> {
        Err(PortError::Unexpected("presence writes are not supported here".into()))
    }
}

//=========================================================================================
// AppState
//=========================================================================================

pub fn app_state(
    auth: Arc<FakeAuth>,
    profiles: Arc<FakeProfiles>,
    classes: Arc<FakeClasses>,
) -> Arc<AppState> {
    let config = Config::from_lookup(|key| {
        (key == "DATABASE_URL").then(|| "postgres://localhost/nipo_test".to_string())
    })
    .unwrap();
    Arc::new(AppState {
        config: Arc::new(config),
        attendance: Arc::new(AttendanceTokenService::new(
            classes,
            AttendancePolicy::default(),
        )),
        sessions: SessionRegistry::new(auth, profiles, SessionConfig::default()),
    })
}

/// Opens a provider session for a new user with `role` and resolves it the
/// way `require_auth` does.
pub async fn signed_in(
    state: &AppState,
    auth: &FakeAuth,
    profiles: &FakeProfiles,
    role: Role,
) -> CurrentSession {
    let user_id = Uuid::new_v4();
    let email = format!("{}@nipo.school", role);
    profiles.insert(user_id, &email, role);
    let identity = auth.open_session(user_id, &email);
    let (manager, session) = state
        .sessions
        .resolve(&identity.access_token)
        .await
        .unwrap()
        .unwrap();
    CurrentSession {
        identity: session.identity,
        profile: session.profile,
        manager,
    }
}
