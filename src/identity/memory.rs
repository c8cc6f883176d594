use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AuthError, AuthUser, IdentityProvider};

/// In-process identity provider backing tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryIdentityProvider {
    state: Mutex<IdentityState>,
}

#[derive(Debug, Default)]
struct IdentityState {
    accounts: HashMap<String, Account>,
    current: Option<String>,
    require_recent_login: bool,
    recently_authenticated: bool,
    password_resets: Vec<String>,
}

#[derive(Debug, Clone)]
struct Account {
    uid: String,
    email: String,
    password: String,
    email_verified: bool,
    verification_emails: usize,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut IdentityState) -> R) -> R {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    pub fn add_user(&self, uid: &str, email: &str, password: &str, email_verified: bool) {
        self.with_state(|state| {
            state.accounts.insert(
                uid.to_string(),
                Account {
                    uid: uid.to_string(),
                    email: email.to_string(),
                    password: password.to_string(),
                    email_verified,
                    verification_emails: 0,
                },
            );
        });
    }

    /// Makes `delete_account` demand a fresh `reauthenticate` first.
    pub fn set_require_recent_login(&self, required: bool) {
        self.with_state(|state| {
            state.require_recent_login = required;
            state.recently_authenticated = false;
        });
    }

    pub fn current_user(&self) -> Option<String> {
        self.with_state(|state| state.current.clone())
    }

    pub fn has_account(&self, uid: &str) -> bool {
        self.with_state(|state| state.accounts.contains_key(uid))
    }

    pub fn verification_emails_sent(&self, uid: &str) -> usize {
        self.with_state(|state| {
            state
                .accounts
                .get(uid)
                .map(|account| account.verification_emails)
                .unwrap_or(0)
        })
    }

    pub fn password_resets_sent(&self, email: &str) -> usize {
        self.with_state(|state| {
            state
                .password_resets
                .iter()
                .filter(|sent| sent.as_str() == email)
                .count()
        })
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        self.with_state(|state| {
            let account = state
                .accounts
                .values()
                .find(|account| account.email == email && account.password == password)
                .cloned()
                .ok_or(AuthError::InvalidCredentials)?;
            state.current = Some(account.uid.clone());
            state.recently_authenticated = true;
            Ok(AuthUser {
                uid: account.uid,
                email: Some(account.email),
                email_verified: account.email_verified,
            })
        })
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.with_state(|state| {
            state.current = None;
            state.recently_authenticated = false;
        });
        Ok(())
    }

    async fn send_email_verification(&self, uid: &str) -> Result<(), AuthError> {
        self.with_state(|state| {
            let account = state.accounts.get_mut(uid).ok_or(AuthError::NotSignedIn)?;
            account.verification_emails += 1;
            Ok(())
        })
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        self.with_state(|state| {
            state.password_resets.push(email.to_string());
        });
        Ok(())
    }

    async fn reauthenticate(&self, email: &str, password: &str) -> Result<(), AuthError> {
        self.with_state(|state| {
            let ok = state
                .accounts
                .values()
                .any(|account| account.email == email && account.password == password);
            if !ok {
                return Err(AuthError::InvalidCredentials);
            }
            state.recently_authenticated = true;
            Ok(())
        })
    }

    async fn delete_account(&self, uid: &str) -> Result<(), AuthError> {
        self.with_state(|state| {
            if state.require_recent_login && !state.recently_authenticated {
                return Err(AuthError::RequiresRecentLogin);
            }
            state.accounts.remove(uid).ok_or(AuthError::NotSignedIn)?;
            if state.current.as_deref() == Some(uid) {
                state.current = None;
            }
            Ok(())
        })
    }
}
