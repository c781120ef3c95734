//! crates/nipo_core/src/attendance.rs
//!
//! The attendance token service: issues per-class QR tokens, validates scans
//! and registers presence at most once per enrollment per day.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{ClassSession, NewPresence, PresenceRecord};
use crate::error::{AttendanceError, AttendanceResult};
use crate::ports::{AttendanceStore, PortError};
use crate::token::AttendanceToken;

/// Note written on presence rows created or confirmed by a scan.
pub const PRESENCE_NOTE: &str = "Presence confirmed via QR code";

const EVENT_CAPACITY: usize = 64;

/// How strictly scans are checked against the class calendar.
#[derive(Debug, Clone)]
pub struct AttendancePolicy {
    /// Accept tokens of classes whose date has already passed (logged as a warning).
    pub allow_past_classes: bool,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            allow_past_classes: true,
        }
    }
}

/// Emitted after every successful presence registration.
///
/// Content unlocking subscribes to these; no entitlement logic lives here.
#[derive(Debug, Clone)]
pub struct PresenceEvent {
    pub class_id: Uuid,
    pub student_id: Uuid,
    pub presence: PresenceRecord,
    /// False when the scan confirmed a record that already existed today.
    pub first_today: bool,
}

/// A validated scan together with the presence it produced.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub class: ClassSession,
    pub presence: PresenceRecord,
}

//=========================================================================================
// Derived views
//=========================================================================================

/// Classes scheduled today or later, soonest first.
pub fn upcoming(classes: &[ClassSession], today: NaiveDate) -> Vec<ClassSession> {
    let mut upcoming: Vec<ClassSession> = classes
        .iter()
        .filter(|class| class.scheduled_for >= today)
        .cloned()
        .collect();
    upcoming.sort_by_key(|class| (class.scheduled_for, class.number));
    upcoming
}

/// Classes without an active token.
pub fn missing_token(classes: &[ClassSession]) -> Vec<ClassSession> {
    classes
        .iter()
        .filter(|class| class.attendance.active_token().is_none())
        .cloned()
        .collect()
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

//=========================================================================================
// AttendanceTokenService
//=========================================================================================

pub struct AttendanceTokenService {
    store: Arc<dyn AttendanceStore>,
    policy: AttendancePolicy,
    classes: Mutex<Vec<ClassSession>>,
    events: broadcast::Sender<PresenceEvent>,
}

impl AttendanceTokenService {
    pub fn new(store: Arc<dyn AttendanceStore>, policy: AttendancePolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            policy,
            classes: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    // --- Class list ---

    /// Re-fetches the full class list from the store.
    pub async fn refresh(&self) -> AttendanceResult<Vec<ClassSession>> {
        let classes = self.store.list_classes().await?;
        *self.classes.lock().await = classes.clone();
        Ok(classes)
    }

    pub async fn classes(&self) -> Vec<ClassSession> {
        self.classes.lock().await.clone()
    }

    pub async fn list_upcoming(&self) -> Vec<ClassSession> {
        upcoming(&self.classes.lock().await, today())
    }

    pub async fn list_missing_token(&self) -> Vec<ClassSession> {
        missing_token(&self.classes.lock().await)
    }

    // --- Token lifecycle ---

    /// Generates a fresh token for the class, replacing any previous one.
    pub async fn issue_token(&self, class_number: i32) -> AttendanceResult<String> {
        let token = self
            .store
            .generate_attendance_token(class_number)
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => AttendanceError::ClassNotFound(class_number.to_string()),
                other => AttendanceError::Transport(other),
            })?;
        info!("Issued attendance token for class {}", class_number);

        self.refresh_after_write().await;
        Ok(token)
    }

    pub async fn invalidate_token(&self, class_id: Uuid) -> AttendanceResult<()> {
        let not_found = |e: PortError| match e {
            PortError::NotFound(_) => AttendanceError::ClassNotFound(class_id.to_string()),
            other => AttendanceError::Transport(other),
        };
        let class = self.store.get_class_by_id(class_id).await.map_err(not_found)?;
        self.store
            .invalidate_attendance_token(class.id, Utc::now())
            .await
            .map_err(not_found)?;
        info!("Invalidated attendance token for class {}", class.number);

        self.refresh_after_write().await;
        Ok(())
    }

    /// The write already happened, so a failed re-fetch only leaves the list stale.
    async fn refresh_after_write(&self) {
        if let Err(e) = self.refresh().await {
            warn!("Class list refresh after a token change failed: {}", e);
        }
    }

    /// Checks format, class, exact token match and the active flag, in that order.
    pub async fn validate_token(&self, token: &str) -> AttendanceResult<ClassSession> {
        let parsed: AttendanceToken = token.parse()?;

        let class = self
            .store
            .get_class_by_number(parsed.class_number)
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => {
                    AttendanceError::ClassNotFound(parsed.class_number.to_string())
                }
                other => AttendanceError::Transport(other),
            })?;

        if class.attendance.token.as_deref() != Some(token) {
            return Err(AttendanceError::TokenMismatch);
        }
        if !class.attendance.active {
            return Err(AttendanceError::TokenInactive);
        }

        if class.scheduled_for < today() {
            if !self.policy.allow_past_classes {
                return Err(AttendanceError::ClassExpired(class.scheduled_for));
            }
            warn!(
                "Accepting token for class {} dated {}, which has already passed",
                class.number, class.scheduled_for
            );
        }

        Ok(class)
    }

    // --- Presence ---

    /// Marks the student present today, updating today's record if one exists.
    pub async fn register_presence(
        &self,
        class_id: Uuid,
        student_id: Uuid,
    ) -> AttendanceResult<PresenceRecord> {
        let enrollment = self
            .store
            .find_active_enrollment(student_id)
            .await?
            .filter(|enrollment| enrollment.active)
            .ok_or(AttendanceError::NoActiveEnrollment(student_id))?;

        let date = today();
        let now = Utc::now();
        let (presence, first_today) = match self.store.find_presence(enrollment.id, date).await? {
            Some(existing) => {
                let updated = self
                    .store
                    .update_presence(existing.id, true, PRESENCE_NOTE, now)
                    .await?;
                (updated, false)
            }
            None => {
                let inserted = self
                    .store
                    .insert_presence(NewPresence {
                        enrollment_id: enrollment.id,
                        date,
                        present: true,
                        note: PRESENCE_NOTE.to_string(),
                        recorded_at: now,
                    })
                    .await?;
                (inserted, true)
            }
        };
        info!(
            "Presence registered for student {} in class {} (first today: {})",
            student_id, class_id, first_today
        );

        // Nobody listening is fine.
        let _ = self.events.send(PresenceEvent {
            class_id,
            student_id,
            presence: presence.clone(),
            first_today,
        });
        Ok(presence)
    }

    /// Validates a scanned token and registers the student's presence.
    pub async fn scan(&self, token: &str, student_id: Uuid) -> AttendanceResult<ScanOutcome> {
        let class = self.validate_token(token).await?;
        let presence = self.register_presence(class.id, student_id).await?;
        Ok(ScanOutcome { class, presence })
    }
}
