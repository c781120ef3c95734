//! crates/nipo_core/src/session.rs
//!
//! The session manager: owns the authenticated identity, a single-slot profile
//! cache and the per-identity redirect flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{Identity, Profile, ProfileSeed, ProfileUpdate};
use crate::error::AuthError;
use crate::ports::{AuthProvider, PortError, PortResult, ProfileStore};
use crate::redirect::{self, RedirectDecision, RedirectRoutes};

//=========================================================================================
// Configuration, states and events
//=========================================================================================

/// Tunables for the session manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// A cached profile older than this is fetched again.
    pub profile_cache_ttl: Duration,
    /// How long sign-up waits for the store to create the profile.
    pub signup_profile_wait: Duration,
    pub signup_poll_interval: Duration,
    pub routes: RedirectRoutes,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            profile_cache_ttl: Duration::from_secs(5),
            signup_profile_wait: Duration::from_secs(2),
            signup_poll_interval: Duration::from_millis(250),
            routes: RedirectRoutes::default(),
        }
    }
}

/// Lifecycle of the session owned by a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Restoring,
    Anonymous,
    /// `profile` is `Some` once the profile-known sub-state is reached.
    Authenticated {
        identity: Identity,
        profile: Option<Profile>,
    },
}

/// Auth lifecycle events raised by the provider.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    InitialSession(Option<Identity>),
    SignedIn(Identity),
    SignedUp(Identity),
    TokenRefreshed(Identity),
    SignedOut,
}

/// The result of a successful sign-in or session restore.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Identity,
    pub profile: Option<Profile>,
}

/// The result of a sign-up. The profile may not exist yet, and there is no
/// identity while the email awaits confirmation.
#[derive(Debug, Clone)]
pub struct PendingIdentity {
    pub user_id: Uuid,
    pub email: String,
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
}

impl PendingIdentity {
    pub fn confirmation_required(&self) -> bool {
        self.identity.is_none()
    }
}

struct CachedProfile {
    user_id: Uuid,
    profile: Profile,
    fetched_at: Instant,
}

struct Inner {
    state: SessionState,
    cache: Option<CachedProfile>,
    has_redirected: bool,
}

impl Inner {
    fn current_identity(&self) -> Option<&Identity> {
        match &self.state {
            SessionState::Authenticated { identity, .. } => Some(identity),
            _ => None,
        }
    }

    fn authenticate(&mut self, identity: Identity) {
        let same_user = self
            .current_identity()
            .is_some_and(|current| current.user_id == identity.user_id);
        let profile = match &self.state {
            SessionState::Authenticated { profile, .. } if same_user => profile.clone(),
            _ => None,
        };
        if !same_user {
            self.cache = None;
            self.has_redirected = false;
        }
        self.state = SessionState::Authenticated { identity, profile };
    }

    fn remember(&mut self, profile: &Profile) {
        self.cache = Some(CachedProfile {
            user_id: profile.user_id,
            profile: profile.clone(),
            fetched_at: Instant::now(),
        });
        if let SessionState::Authenticated {
            identity,
            profile: known,
        } = &mut self.state
        {
            if identity.user_id == profile.user_id {
                *known = Some(profile.clone());
            }
        }
    }

    fn reset(&mut self) {
        self.state = SessionState::Anonymous;
        self.cache = None;
        self.has_redirected = false;
    }
}

/// Releases the redirect guard when dropped.
struct RedirectGuard<'a>(&'a AtomicBool);

impl<'a> RedirectGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RedirectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

//=========================================================================================
// SessionManager
//=========================================================================================

pub struct SessionManager {
    auth: Arc<dyn AuthProvider>,
    profiles: Arc<dyn ProfileStore>,
    config: SessionConfig,
    inner: Mutex<Inner>,
    redirect_in_flight: AtomicBool,
}

impl SessionManager {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        profiles: Arc<dyn ProfileStore>,
        config: SessionConfig,
    ) -> Self {
        Self {
            auth,
            profiles,
            config,
            inner: Mutex::new(Inner {
                state: SessionState::Uninitialized,
                cache: None,
                has_redirected: false,
            }),
            redirect_in_flight: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// A snapshot of the current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state.clone()
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.inner.lock().await.current_identity().cloned()
    }

    // --- Credential flows ---

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let identity = self
            .auth
            .sign_in_with_password(email, password)
            .await
            .map_err(|e| {
                let err = AuthError::from(e);
                warn!("Sign-in failed for {}: {}", email, err.kind());
                err
            })?;
        info!("User {} signed in.", identity.user_id);

        let profile = self.on_signed_in(identity.clone()).await;
        Ok(Session { identity, profile })
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        seed: &ProfileSeed,
    ) -> Result<PendingIdentity, AuthError> {
        let registration = self
            .auth
            .sign_up(email, password, seed)
            .await
            .map_err(|e| {
                let err = AuthError::from(e);
                warn!("Sign-up failed for {}: {}", email, err.kind());
                err
            })?;
        let user_id = registration.user_id;
        let email = registration.email.clone();
        info!("User {} signed up.", user_id);

        let Some(identity) = registration.into_identity() else {
            info!("User {} must confirm their email before a session is opened.", user_id);
            return Ok(PendingIdentity {
                user_id,
                email,
                identity: None,
                profile: None,
            });
        };

        {
            let mut inner = self.inner.lock().await;
            inner.authenticate(identity.clone());
            inner.cache = None;
            inner.has_redirected = false;
        }
        let profile = self.await_profile(user_id).await;
        Ok(PendingIdentity {
            user_id,
            email,
            identity: Some(identity),
            profile,
        })
    }

    /// Signs out at the provider, then clears all local state even if that call failed.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let token = self
            .inner
            .lock()
            .await
            .current_identity()
            .map(|identity| identity.access_token.clone());

        let result = match token {
            Some(token) => self.auth.sign_out(&token).await.map_err(AuthError::from),
            None => Ok(()),
        };
        if let Err(e) = &result {
            warn!("Provider sign-out failed, clearing local session anyway: {}", e);
        }

        self.inner.lock().await.reset();
        info!("Session cleared.");
        result
    }

    pub async fn resend_confirmation(&self, email: &str) -> Result<(), AuthError> {
        self.auth
            .resend_confirmation(email)
            .await
            .map_err(AuthError::from)
    }

    /// Restores a session from a previously issued access token.
    pub async fn restore(&self, access_token: &str) -> Result<Option<Session>, AuthError> {
        self.inner.lock().await.state = SessionState::Restoring;

        let identity = match self.auth.get_session(access_token).await {
            Ok(identity) => identity,
            Err(e) => {
                self.inner.lock().await.reset();
                return Err(AuthError::from(e));
            }
        };

        let profile = self
            .handle_event(AuthEvent::InitialSession(identity.clone()))
            .await
            .unwrap_or_else(|e| {
                warn!("Profile fetch during restore failed: {}", e);
                None
            });
        Ok(identity.map(|identity| Session { identity, profile }))
    }

    /// Applies a provider lifecycle event and returns the profile known afterwards.
    pub async fn handle_event(&self, event: AuthEvent) -> PortResult<Option<Profile>> {
        debug!("Handling auth event: {:?}", event);
        match event {
            AuthEvent::InitialSession(None) | AuthEvent::SignedOut => {
                self.inner.lock().await.reset();
                Ok(None)
            }
            AuthEvent::InitialSession(Some(identity)) | AuthEvent::TokenRefreshed(identity) => {
                let user_id = identity.user_id;
                self.inner.lock().await.authenticate(identity);
                self.fetch_profile(user_id, true).await
            }
            AuthEvent::SignedIn(identity) | AuthEvent::SignedUp(identity) => {
                let user_id = identity.user_id;
                {
                    let mut inner = self.inner.lock().await;
                    inner.authenticate(identity);
                    inner.has_redirected = false;
                }
                self.fetch_profile(user_id, false).await
            }
        }
    }

    // --- Profile ---

    /// Returns the cached profile when it is fresh and `use_cache` is set;
    /// otherwise asks the store. A missing profile is `Ok(None)`.
    pub async fn fetch_profile(&self, user_id: Uuid, use_cache: bool) -> PortResult<Option<Profile>> {
        if use_cache {
            let inner = self.inner.lock().await;
            if let Some(cached) = &inner.cache {
                if cached.user_id == user_id
                    && cached.fetched_at.elapsed() < self.config.profile_cache_ttl
                {
                    debug!("Profile cache hit for {}", user_id);
                    return Ok(Some(cached.profile.clone()));
                }
            }
        }

        match self.profiles.get_profile(user_id).await {
            Ok(profile) => {
                self.inner.lock().await.remember(&profile);
                Ok(Some(profile))
            }
            Err(PortError::NotFound(_)) => {
                debug!("No profile yet for {}", user_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn record_vote(&self) -> PortResult<()> {
        let user_id = self.require_user().await?;
        self.profiles.record_vote(user_id).await?;

        let mut inner = self.inner.lock().await;
        let known = match (&inner.cache, &inner.state) {
            (Some(cached), _) if cached.user_id == user_id => Some(cached.profile.clone()),
            (_, SessionState::Authenticated { profile: Some(profile), .. })
                if profile.user_id == user_id =>
            {
                Some(profile.clone())
            }
            _ => None,
        };
        if let Some(mut profile) = known {
            profile.has_voted = true;
            inner.remember(&profile);
        }
        info!("Vote recorded for {}", user_id);
        Ok(())
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> PortResult<Profile> {
        let user_id = self.require_user().await?;
        let profile = self.profiles.update_profile(user_id, update).await?;
        self.inner.lock().await.remember(&profile);
        Ok(profile)
    }

    // --- Redirects ---

    /// Evaluates the redirect rules for `profile` and records a dashboard redirect.
    pub async fn decide_redirect(
        &self,
        profile: &Profile,
        location: &str,
        force: bool,
    ) -> RedirectDecision {
        let mut inner = self.inner.lock().await;
        let decision = redirect::decide(
            &self.config.routes,
            profile,
            location,
            inner.has_redirected,
            force,
        );
        if decision.is_dashboard(&self.config.routes) {
            inner.has_redirected = true;
        }
        decision
    }

    /// Guarded entry point: fetches the profile and decides. Returns `None`
    /// when no profile is known or another decision is already running.
    pub async fn redirect_for(
        &self,
        location: &str,
        force: bool,
    ) -> PortResult<Option<RedirectDecision>> {
        let Some(_guard) = RedirectGuard::acquire(&self.redirect_in_flight) else {
            debug!("Redirect decision already in flight, dropping request for {}", location);
            return Ok(None);
        };

        let Some(identity) = self.identity().await else {
            return Ok(None);
        };
        let Some(profile) = self.fetch_profile(identity.user_id, true).await? else {
            return Ok(None);
        };

        let decision = self.decide_redirect(&profile, location, force).await;
        if decision.should_redirect {
            info!(
                "Redirecting {} from {} to {:?}",
                identity.user_id, location, decision.target
            );
        }
        Ok(Some(decision))
    }

    // --- Internals ---

    async fn on_signed_in(&self, identity: Identity) -> Option<Profile> {
        match self.handle_event(AuthEvent::SignedIn(identity)).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Profile fetch after sign-in failed: {}", e);
                None
            }
        }
    }

    /// Polls the store until the freshly created profile shows up or the wait runs out.
    async fn await_profile(&self, user_id: Uuid) -> Option<Profile> {
        let deadline = Instant::now() + self.config.signup_profile_wait;
        loop {
            match self.fetch_profile(user_id, false).await {
                Ok(Some(profile)) => return Some(profile),
                Ok(None) => {}
                Err(e) => {
                    warn!("Profile fetch after sign-up failed: {}", e);
                    return None;
                }
            }
            if Instant::now() + self.config.signup_poll_interval > deadline {
                info!("Profile for {} not available yet, caller must re-fetch.", user_id);
                return None;
            }
            tokio::time::sleep(self.config.signup_poll_interval).await;
        }
    }

    async fn require_user(&self) -> PortResult<Uuid> {
        self.identity()
            .await
            .map(|identity| identity.user_id)
            .ok_or(PortError::Unauthorized)
    }
}
