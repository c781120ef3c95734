//! services/api/src/adapters/auth.rs
//!
//! Password authentication on top of the application's own database.
//! It implements the `AuthProvider` port from the `core` crate and reports
//! failures with provider error codes that the core classifies.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use nipo_core::domain::{Identity, ProfileSeed, Registration};
use nipo_core::ports::{AuthProvider, PortError, ProviderError};
use tracing::{error, info};
use uuid::Uuid;

use crate::adapters::db::DbAdapter;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `AuthProvider` port with argon2 password hashes
/// and opaque login sessions stored in Postgres.
#[derive(Clone)]
pub struct PasswordAuthAdapter {
    db: DbAdapter,
    session_ttl: Duration,
    require_email_confirmation: bool,
}

impl PasswordAuthAdapter {
    /// Creates a new `PasswordAuthAdapter`.
    pub fn new(db: DbAdapter, session_ttl: Duration, require_email_confirmation: bool) -> Self {
        Self {
            db,
            session_ttl,
            require_email_confirmation,
        }
    }

    async fn open_session(&self, user_id: Uuid, email: &str) -> Result<Identity, ProviderError> {
        let access_token = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + self.session_ttl;
        self.db
            .create_auth_session(&access_token, user_id, expires_at)
            .await
            .map_err(store_failure)?;

        Ok(Identity {
            user_id,
            email: email.to_string(),
            access_token,
        })
    }
}

fn invalid_credentials() -> ProviderError {
    ProviderError::new("invalid_credentials", "Invalid login credentials")
}

fn store_failure(e: PortError) -> ProviderError {
    error!("Auth store failure: {:?}", e);
    ProviderError::new("unexpected_failure", e.to_string())
}

fn hash_password(password: &str) -> Result<String, ProviderError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            ProviderError::new("unexpected_failure", "Failed to hash password")
        })
}

fn verify_password(password: &str, hashed: &str) -> Result<bool, ProviderError> {
    let parsed_hash = PasswordHash::new(hashed).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        ProviderError::new("unexpected_failure", "Authentication error")
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

//=========================================================================================
// `AuthProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl AuthProvider for PasswordAuthAdapter {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, ProviderError> {
        // Unknown emails look exactly like wrong passwords.
        let creds = match self.db.get_credentials_by_email(email).await {
            Ok(creds) => creds,
            Err(PortError::NotFound(_)) => return Err(invalid_credentials()),
            Err(e) => return Err(store_failure(e)),
        };

        if !verify_password(password, &creds.hashed_password)? {
            return Err(invalid_credentials());
        }
        if creds.disabled {
            return Err(ProviderError::new("user_banned", "User is banned"));
        }
        if self.require_email_confirmation && creds.email_confirmed_at.is_none() {
            return Err(ProviderError::new("email_not_confirmed", "Email not confirmed"));
        }

        self.open_session(creds.id, &creds.email).await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        seed: &ProfileSeed,
    ) -> Result<Registration, ProviderError> {
        let password_hash = hash_password(password)?;
        let confirmed_at = if self.require_email_confirmation {
            None
        } else {
            Some(Utc::now())
        };

        let user_id = self
            .db
            .create_user_with_profile(email, &password_hash, confirmed_at, seed)
            .await
            .map_err(|e| match e {
                PortError::Conflict(_) => {
                    ProviderError::new("user_already_exists", "User already registered")
                }
                other => store_failure(other),
            })?;

        // Unconfirmed accounts get no session until they confirm and sign in.
        let access_token = if self.require_email_confirmation {
            self.resend_confirmation(email).await?;
            None
        } else {
            Some(self.open_session(user_id, email).await?.access_token)
        };

        Ok(Registration {
            user_id,
            email: email.to_string(),
            access_token,
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        self.db
            .delete_auth_session(access_token)
            .await
            .map_err(store_failure)
    }

    async fn resend_confirmation(&self, email: &str) -> Result<(), ProviderError> {
        match self.db.mark_confirmation_sent(email).await {
            Ok(()) => {
                info!("Confirmation email requested for {}", email);
                Ok(())
            }
            Err(PortError::NotFound(_)) => {
                Err(ProviderError::new("user_not_found", "User not found"))
            }
            Err(e) => Err(store_failure(e)),
        }
    }

    async fn get_session(&self, access_token: &str) -> Result<Option<Identity>, ProviderError> {
        let found = self
            .db
            .validate_auth_session(access_token)
            .await
            .map_err(store_failure)?;

        Ok(found.map(|(user_id, email)| Identity {
            user_id,
            email,
            access_token: access_token.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_password_verifies_only_the_original() {
        let hash = hash_password("correct-horse-battery").unwrap();
        assert!(verify_password("correct-horse-battery", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn garbage_hash_is_an_error() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }

    #[test]
    fn invalid_credentials_code_classifies() {
        let err = nipo_core::AuthError::from(invalid_credentials());
        assert_eq!(err, nipo_core::AuthError::InvalidCredentials);
    }
}
