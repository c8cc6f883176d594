//! Identity provider seam and the session gate in front of the application.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{Store, UserRecord};
use crate::utils::ids::now_millis;
use crate::{GenieError, Result};

pub use memory::MemoryIdentityProvider;

/// Seconds a user waits before another verification email may be sent.
pub const VERIFICATION_RESEND_COOLDOWN_SECS: u64 = 300;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("email not verified")]
    EmailNotVerified,
    #[error("user disabled")]
    UserDisabled,
    #[error("too many requests")]
    TooManyRequests,
    #[error("network failure: {0}")]
    Network(String),
    #[error("recent login required")]
    RequiresRecentLogin,
    #[error("no signed-in user")]
    NotSignedIn,
    #[error("identity provider error: {0}")]
    Other(String),
}

impl AuthError {
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => {
                "Email ou senha incorretos. Verifique se digitou corretamente, incluindo maiúsculas e minúsculas."
            }
            AuthError::EmailNotVerified => "Por favor, verifique seu email antes de fazer login.",
            AuthError::UserDisabled => "Esta conta foi desativada. Entre em contato com o suporte.",
            AuthError::TooManyRequests => {
                "Muitas tentativas de login. Por favor, tente novamente mais tarde."
            }
            AuthError::Network(_) => "Erro de conexão. Verifique sua internet e tente novamente.",
            AuthError::RequiresRecentLogin => {
                "Por segurança, confirme sua senha para continuar."
            }
            AuthError::NotSignedIn => "Usuário não autenticado",
            AuthError::Other(_) => "Erro ao fazer login. Por favor, tente novamente.",
        }
    }
}

/// Account as reported by the identity provider after a successful sign-in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
}

/// Signed-in user on whose behalf every operation runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub email: Option<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email,
        }
    }
}

impl From<&AuthUser> for Session {
    fn from(user: &AuthUser) -> Self {
        Self::new(user.uid.clone(), user.email.clone())
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> std::result::Result<AuthUser, AuthError>;
    async fn sign_out(&self) -> std::result::Result<(), AuthError>;
    async fn send_email_verification(&self, uid: &str) -> std::result::Result<(), AuthError>;
    async fn send_password_reset(&self, email: &str) -> std::result::Result<(), AuthError>;
    async fn reauthenticate(&self, email: &str, password: &str)
    -> std::result::Result<(), AuthError>;
    /// Irreversibly removes the account. Providers may demand a recent
    /// sign-in and answer [`AuthError::RequiresRecentLogin`].
    async fn delete_account(&self, uid: &str) -> std::result::Result<(), AuthError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Granted(Session),
    /// Credentials were valid but the email is unverified; the user was
    /// signed out again.
    VerificationPending { uid: String, email: Option<String> },
    /// The user document is flagged `disabled`; the user was signed out.
    Disabled,
}

pub struct SessionGate {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn Store>,
}

impl SessionGate {
    pub fn new(identity: Arc<dyn IdentityProvider>, store: Arc<dyn Store>) -> Self {
        Self { identity, store }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Admission> {
        let email = email.trim().to_lowercase();
        let password = password.trim();
        if email.is_empty() || password.is_empty() {
            return Err(GenieError::InvalidInput(
                "email and password are required".to_string(),
            ));
        }

        let user = match self.identity.sign_in(&email, password).await {
            Ok(user) => user,
            Err(err) => {
                tracing::info!(error = %err, "sign-in refused by identity provider");
                return Err(err.into());
            }
        };

        if !user.email_verified {
            tracing::info!(user_id = %user.uid, "sign-in held for email verification");
            self.identity.sign_out().await?;
            return Ok(Admission::VerificationPending {
                uid: user.uid,
                email: user.email,
            });
        }

        self.admit(&user).await
    }

    /// Gate applied to an already authenticated user, e.g. one restored
    /// from a previous run.
    pub async fn admit(&self, user: &AuthUser) -> Result<Admission> {
        if !user.email_verified {
            return Ok(Admission::VerificationPending {
                uid: user.uid.clone(),
                email: user.email.clone(),
            });
        }

        let record = match self.store.load_user(&user.uid).await {
            Ok(record) => record,
            Err(err) => {
                // An unreadable profile does not lock the user out.
                tracing::warn!(user_id = %user.uid, error = %err, "user status check failed");
                return Ok(Admission::Granted(Session::from(user)));
            }
        };

        if record.as_ref().is_some_and(|r| r.disabled) {
            tracing::info!(user_id = %user.uid, "disabled user signed out");
            self.identity.sign_out().await?;
            return Ok(Admission::Disabled);
        }

        let mut record = record.unwrap_or_else(|| UserRecord::new(user.uid.clone()));
        if !record.activated {
            let now = now_millis();
            record.activated = true;
            record.activated_at_ms = Some(now);
            if record.email.is_none() {
                record.email = user.email.clone();
            }
            self.store.put_user(&record).await?;
            tracing::info!(user_id = %user.uid, "user activated");
        }

        Ok(Admission::Granted(Session::from(user)))
    }
}

/// Cooldown for verification resends. Tracks a single pending user.
#[derive(Clone, Debug, Default)]
pub struct ResendThrottle {
    blocked_until_ms: Option<u64>,
}

impl ResendThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds left before another send is allowed; zero when allowed now.
    pub fn remaining_secs(&self, now_ms: u64) -> u64 {
        match self.blocked_until_ms {
            Some(until) if until > now_ms => (until - now_ms).div_ceil(1_000),
            _ => 0,
        }
    }

    /// Sends a verification email unless the cooldown is running. A
    /// rate-limited answer from the provider also starts the cooldown.
    pub async fn resend(
        &mut self,
        identity: &dyn IdentityProvider,
        uid: &str,
        now_ms: u64,
    ) -> Result<ResendOutcome> {
        let wait = self.remaining_secs(now_ms);
        if wait > 0 {
            return Ok(ResendOutcome::CoolingDown { remaining_secs: wait });
        }

        let cooldown_until = now_ms.saturating_add(VERIFICATION_RESEND_COOLDOWN_SECS * 1_000);
        match identity.send_email_verification(uid).await {
            Ok(()) => {
                self.blocked_until_ms = Some(cooldown_until);
                Ok(ResendOutcome::Sent)
            }
            Err(AuthError::TooManyRequests) => {
                self.blocked_until_ms = Some(cooldown_until);
                Err(AuthError::TooManyRequests.into())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResendOutcome {
    Sent,
    CoolingDown { remaining_secs: u64 },
}

/// `m:ss` rendering of a countdown.
pub fn format_countdown(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}
