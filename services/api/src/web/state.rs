//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-login session registry.

use crate::config::Config;
use nipo_core::{
    AttendanceTokenService, AuthError, AuthEvent, AuthProvider, ProfileStore, Session,
    SessionConfig, SessionManager,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub attendance: Arc<AttendanceTokenService>,
    pub sessions: SessionRegistry,
}

//=========================================================================================
// SessionRegistry (One SessionManager per Login)
//=========================================================================================

/// Managers unused for this long are dropped; the next request restores them.
const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

struct Entry {
    manager: Arc<SessionManager>,
    last_seen: Instant,
}

/// Keeps one `SessionManager` per access token so each browser session owns
/// its profile cache and redirect flag. The provider stays the authority on
/// whether a token is valid: every `resolve` asks it again.
#[derive(Clone)]
pub struct SessionRegistry {
    auth: Arc<dyn AuthProvider>,
    profiles: Arc<dyn ProfileStore>,
    config: SessionConfig,
    idle_ttl: Duration,
    managers: Arc<Mutex<HashMap<String, Entry>>>,
}

impl SessionRegistry {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        profiles: Arc<dyn ProfileStore>,
        config: SessionConfig,
    ) -> Self {
        Self {
            auth,
            profiles,
            config,
            idle_ttl: DEFAULT_IDLE_TTL,
            managers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    /// A fresh manager that is not yet bound to any token.
    pub fn create(&self) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            self.auth.clone(),
            self.profiles.clone(),
            self.config.clone(),
        ))
    }

    /// Binds `manager` to `access_token`, dropping idle entries on the way.
    pub async fn insert(&self, access_token: &str, manager: Arc<SessionManager>) {
        let now = Instant::now();
        let mut managers = self.managers.lock().await;
        let before = managers.len();
        managers.retain(|_, entry| now.duration_since(entry.last_seen) < self.idle_ttl);
        if managers.len() < before {
            debug!("Dropped {} idle session(s).", before - managers.len());
        }
        managers.insert(
            access_token.to_string(),
            Entry {
                manager,
                last_seen: now,
            },
        );
    }

    pub async fn get(&self, access_token: &str) -> Option<Arc<SessionManager>> {
        let now = Instant::now();
        let mut managers = self.managers.lock().await;
        let idle = managers
            .get(access_token)
            .map(|entry| now.duration_since(entry.last_seen) >= self.idle_ttl)?;
        if idle {
            managers.remove(access_token);
            return None;
        }
        let entry = managers.get_mut(access_token)?;
        entry.last_seen = now;
        Some(entry.manager.clone())
    }

    pub async fn remove(&self, access_token: &str) -> Option<Arc<SessionManager>> {
        self.managers
            .lock()
            .await
            .remove(access_token)
            .map(|entry| entry.manager)
    }

    pub async fn len(&self) -> usize {
        self.managers.lock().await.len()
    }

    /// Validates `access_token` with the provider and returns its manager,
    /// creating one when this process has not seen the token yet. A token the
    /// provider no longer knows is evicted.
    pub async fn resolve(
        &self,
        access_token: &str,
    ) -> Result<Option<(Arc<SessionManager>, Session)>, AuthError> {
        let identity = match self.auth.get_session(access_token).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                if self.remove(access_token).await.is_some() {
                    debug!("Evicted a session the provider no longer accepts.");
                }
                return Ok(None);
            }
            Err(e) => return Err(AuthError::from(e)),
        };

        if let Some(manager) = self.get(access_token).await {
            let known = manager.identity().await.map(|current| current.user_id);
            if known == Some(identity.user_id) {
                let profile = match manager.fetch_profile(identity.user_id, true).await {
                    Ok(profile) => profile,
                    Err(e) => {
                        warn!("Profile fetch for {} failed: {}", identity.user_id, e);
                        None
                    }
                };
                return Ok(Some((manager, Session { identity, profile })));
            }
        }

        let manager = self.create();
        let profile = manager
            .handle_event(AuthEvent::InitialSession(Some(identity.clone())))
            .await
            .unwrap_or_else(|e| {
                warn!("Profile fetch during restore failed: {}", e);
                None
            });
        debug!("Restored session for {}", identity.user_id);
        self.insert(access_token, manager.clone()).await;
        Ok(Some((manager, Session { identity, profile })))
    }

    /// Ends the session behind `access_token`. When no manager is bound to it,
    /// the provider session is ended directly.
    pub async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        match self.remove(access_token).await {
            Some(manager) if manager.identity().await.is_some() => manager.sign_out().await,
            _ => self
                .auth
                .sign_out(access_token)
                .await
                .map_err(AuthError::from),
        }
    }
}
