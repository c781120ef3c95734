//! In-memory implementations of the core ports for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use nipo_core::{
    AttendanceStore, AuthProvider, ClassSession, ClassStatus, Enrollment, Identity, NewPresence,
    PortError, PortResult, PresenceRecord, Profile, ProfileSeed, ProfileStore, ProfileUpdate,
    ProviderError, Registration, Role, TokenRecord,
};
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

//=========================================================================================
// Profiles
//=========================================================================================

#[derive(Default)]
pub struct FakeProfileStore {
    profiles: Mutex<HashMap<Uuid, Profile>>,
    /// Profiles that become visible only once their instant has passed.
    scheduled: Mutex<Vec<(Instant, Profile)>>,
    pub get_calls: AtomicUsize,
    pub fail_reads: AtomicBool,
    /// When set, `get_profile` waits for a notification before answering.
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeProfileStore {
    pub fn insert(&self, profile: Profile) {
        self.profiles.lock().unwrap().insert(profile.user_id, profile);
    }

    pub fn schedule(&self, profile: Profile, delay: Duration) {
        self.scheduled
            .lock()
            .unwrap()
            .push((Instant::now() + delay, profile));
    }

    pub fn set_gate(&self, gate: Arc<Notify>) {
        *self.gate.lock().unwrap() = Some(gate);
    }

    pub fn calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for FakeProfileStore {
    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("connection reset".into()));
        }

        {
            let now = Instant::now();
            let mut scheduled = self.scheduled.lock().unwrap();
            let mut profiles = self.profiles.lock().unwrap();
            scheduled.retain(|(ready_at, profile)| {
                if *ready_at <= now {
                    profiles.insert(profile.user_id, profile.clone());
                    false
                } else {
                    true
                }
            });
        }

        self.profiles
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("profile {user_id}")))
    }

    async fn record_vote(&self, user_id: Uuid) -> PortResult<()> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("profile {user_id}")))?;
        profile.has_voted = true;
        Ok(())
    }

    async fn update_profile(&self, user_id: Uuid, update: &ProfileUpdate) -> PortResult<Profile> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("profile {user_id}")))?;
        if let Some(name) = &update.full_name {
            profile.full_name = Some(name.clone());
        }
        Ok(profile.clone())
    }
}

pub fn profile(user_id: Uuid, email: &str, has_voted: bool) -> Profile {
    Profile {
        user_id,
        email: email.to_string(),
        full_name: Some("Aluno Teste".into()),
        role: Role::Student,
        has_voted,
    }
}

//=========================================================================================
// Auth provider
//=========================================================================================

pub struct Account {
    pub user_id: Uuid,
    pub password: String,
    pub confirmed: bool,
    pub disabled: bool,
}

pub struct FakeAuthProvider {
    accounts: Mutex<HashMap<String, Account>>,
    sessions: Mutex<HashMap<String, Identity>>,
    profiles: Arc<FakeProfileStore>,
    /// Delay before a signed-up user's profile becomes visible.
    pub profile_delay: Duration,
    pub fail_sign_out: AtomicBool,
    pub resend_calls: AtomicUsize,
    /// New accounts start unconfirmed and get no session.
    pub require_confirmation: bool,
}

impl FakeAuthProvider {
    pub fn new(profiles: Arc<FakeProfileStore>) -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            profiles,
            profile_delay: Duration::from_millis(500),
            fail_sign_out: AtomicBool::new(false),
            resend_calls: AtomicUsize::new(0),
            require_confirmation: false,
        }
    }

    pub fn add_account(&self, email: &str, password: &str) -> Uuid {
        let user_id = Uuid::new_v4();
        self.accounts.lock().unwrap().insert(
            email.to_string(),
            Account {
                user_id,
                password: password.to_string(),
                confirmed: true,
                disabled: false,
            },
        );
        user_id
    }

    pub fn update_account(&self, email: &str, f: impl FnOnce(&mut Account)) {
        if let Some(account) = self.accounts.lock().unwrap().get_mut(email) {
            f(account);
        }
    }

    fn open_session(&self, user_id: Uuid, email: &str) -> Identity {
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
}

#[async_trait]
impl AuthProvider for FakeAuthProvider {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, ProviderError> {
        let (user_id, confirmed, disabled) = {
            let accounts = self.accounts.lock().unwrap();
            let account = accounts
                .get(email)
                .ok_or_else(|| ProviderError::new("user_not_found", "User not found"))?;
            if account.password != password {
                return Err(ProviderError::message_only("Invalid login credentials"));
            }
            (account.user_id, account.confirmed, account.disabled)
        };
        if disabled {
            return Err(ProviderError::new("user_banned", "User is banned"));
        }
        if !confirmed {
            return Err(ProviderError::new("email_not_confirmed", "Email not confirmed"));
        }
        Ok(self.open_session(user_id, email))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        seed: &ProfileSeed,
    ) -> Result<Registration, ProviderError> {
        let user_id = Uuid::new_v4();
        self.accounts.lock().unwrap().insert(
            email.to_string(),
            Account {
                user_id,
                password: password.to_string(),
                confirmed: !self.require_confirmation,
                disabled: false,
            },
        );
        self.profiles.schedule(
            Profile {
                user_id,
                email: email.to_string(),
                full_name: seed.full_name.clone(),
                role: seed.role,
                has_voted: false,
            },
            self.profile_delay,
        );
        let access_token = if self.require_confirmation {
            self.resend_calls.fetch_add(1, Ordering::SeqCst);
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
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(ProviderError::new("network_error", "Failed to fetch"));
        }
        self.sessions.lock().unwrap().remove(access_token);
        Ok(())
    }

    async fn resend_confirmation(&self, _email: &str) -> Result<(), ProviderError> {
        self.resend_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_session(&self, access_token: &str) -> Result<Option<Identity>, ProviderError> {
        Ok(self.sessions.lock().unwrap().get(access_token).cloned())
    }
}

//=========================================================================================
// Attendance store
//=========================================================================================

#[derive(Default)]
pub struct FakeAttendanceStore {
    classes: Mutex<Vec<ClassSession>>,
    enrollments: Mutex<Vec<Enrollment>>,
    presences: Mutex<Vec<PresenceRecord>>,
    suffix_counter: AtomicUsize,
    pub inserts: AtomicUsize,
    pub updates: AtomicUsize,
    pub fail_all: AtomicBool,
    /// Only `list_classes` fails.
    pub fail_list: AtomicBool,
    /// `find_presence` misses existing rows, as a concurrent scan would.
    pub stale_presence_reads: AtomicBool,
}

impl FakeAttendanceStore {
    pub fn add_class(&self, number: i32, scheduled_for: NaiveDate) -> ClassSession {
        let class = ClassSession {
            id: Uuid::new_v4(),
            number,
            title: format!("Aula {number}"),
            scheduled_for,
            objective: Some("Escala de dó maior".into()),
            activity_summary: None,
            challenge: None,
            status: ClassStatus::ToDo,
            attendance: TokenRecord::default(),
        };
        self.classes.lock().unwrap().push(class.clone());
        class
    }

    /// Sets a class's token directly, as if issued earlier.
    pub fn set_token(&self, number: i32, token: &str, active: bool) {
        let mut classes = self.classes.lock().unwrap();
        if let Some(class) = classes.iter_mut().find(|c| c.number == number) {
            class.attendance = TokenRecord {
                token: Some(token.to_string()),
                active,
                issued_at: Some(Utc::now()),
                invalidated_at: None,
            };
        }
    }

    pub fn enroll(&self, student_id: Uuid, active: bool) -> Enrollment {
        let enrollment = Enrollment {
            id: Uuid::new_v4(),
            student_id,
            active,
        };
        self.enrollments.lock().unwrap().push(enrollment.clone());
        enrollment
    }

    pub fn presences(&self) -> Vec<PresenceRecord> {
        self.presences.lock().unwrap().clone()
    }

    pub fn writes(&self) -> usize {
        self.inserts.load(Ordering::SeqCst) + self.updates.load(Ordering::SeqCst)
    }

    fn check(&self) -> PortResult<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("store unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AttendanceStore for FakeAttendanceStore {
    async fn list_classes(&self) -> PortResult<Vec<ClassSession>> {
        self.check()?;
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("list query timed out".into()));
        }
        Ok(self.classes.lock().unwrap().clone())
    }

    async fn get_class_by_id(&self, class_id: Uuid) -> PortResult<ClassSession> {
        self.check()?;
        self.classes
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == class_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("class {class_id}")))
    }

    async fn get_class_by_number(&self, number: i32) -> PortResult<ClassSession> {
        self.check()?;
        self.classes
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.number == number)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("class #{number}")))
    }

    async fn generate_attendance_token(&self, number: i32) -> PortResult<String> {
        self.check()?;
        let n = self.suffix_counter.fetch_add(1, Ordering::SeqCst);
        let mut classes = self.classes.lock().unwrap();
        let class = classes
            .iter_mut()
            .find(|c| c.number == number)
            .ok_or_else(|| PortError::NotFound(format!("class #{number}")))?;
        let token = format!("NIPO_AULA_{number}_s{n:05}");
        class.attendance = TokenRecord {
            token: Some(token.clone()),
            active: true,
            issued_at: Some(Utc::now()),
            invalidated_at: None,
        };
        Ok(token)
    }

    async fn invalidate_attendance_token(
        &self,
        class_id: Uuid,
        invalidated_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.check()?;
        let mut classes = self.classes.lock().unwrap();
        let class = classes
            .iter_mut()
            .find(|c| c.id == class_id)
            .ok_or_else(|| PortError::NotFound(format!("class {class_id}")))?;
        class.attendance.active = false;
        class.attendance.invalidated_at = Some(invalidated_at);
        Ok(())
    }

    async fn find_active_enrollment(&self, student_id: Uuid) -> PortResult<Option<Enrollment>> {
        self.check()?;
        Ok(self
            .enrollments
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.student_id == student_id && e.active)
            .cloned())
    }

    async fn find_presence(
        &self,
        enrollment_id: Uuid,
        date: NaiveDate,
    ) -> PortResult<Option<PresenceRecord>> {
        self.check()?;
        if self.stale_presence_reads.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self
            .presences
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.enrollment_id == enrollment_id && p.date == date)
            .cloned())
    }

    async fn insert_presence(&self, presence: NewPresence) -> PortResult<PresenceRecord> {
        self.check()?;
        self.inserts.fetch_add(1, Ordering::SeqCst);
        let mut presences = self.presences.lock().unwrap();
        // Unique (enrollment, date): a conflicting insert updates the existing row.
        if let Some(existing) = presences
            .iter_mut()
            .find(|p| p.enrollment_id == presence.enrollment_id && p.date == presence.date)
        {
            existing.present = presence.present;
            existing.note = presence.note;
            existing.recorded_at = presence.recorded_at;
            return Ok(existing.clone());
        }
        let record = PresenceRecord {
            id: Uuid::new_v4(),
            enrollment_id: presence.enrollment_id,
            date: presence.date,
            present: presence.present,
            note: presence.note,
            recorded_at: presence.recorded_at,
        };
        presences.push(record.clone());
        Ok(record)
    }

    async fn update_presence(
        &self,
        presence_id: Uuid,
        present: bool,
        note: &str,
        recorded_at: DateTime<Utc>,
    ) -> PortResult<PresenceRecord> {
        self.check()?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut presences = self.presences.lock().unwrap();
        let record = presences
            .iter_mut()
            .find(|p| p.id == presence_id)
            .ok_or_else(|| PortError::NotFound(format!("presence {presence_id}")))?;
        record.present = present;
        record.note = note.to_string();
        record.recorded_at = recorded_at;
        Ok(record.clone())
    }
}
