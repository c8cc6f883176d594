use std::sync::Arc;

use serde::Serialize;

use crate::identity::{AuthError, IdentityProvider, Session};
use crate::plan::Plan;
use crate::store::{DeletedUserRecord, Store, UserRecord};
use crate::usage::UsageSummary;
use crate::utils::ids::now_millis;
use crate::{GenieError, Result};

/// Text the user must type to confirm account deletion.
pub const DELETE_CONFIRMATION: &str = "DELETAR";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProfileView {
    pub user: UserRecord,
    pub first_name: Option<String>,
    pub initials: String,
    pub plan: Plan,
    pub usage: Option<UsageSummary>,
}

pub struct AccountService {
    store: Arc<dyn Store>,
    identity: Arc<dyn IdentityProvider>,
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { store, identity }
    }

    async fn user(&self, session: &Session) -> Result<UserRecord> {
        self.store
            .load_user(&session.user_id)
            .await?
            .ok_or_else(|| GenieError::not_found("user", session.user_id.clone()))
    }

    pub async fn profile_view(&self, session: &Session) -> Result<ProfileView> {
        let user = self.user(session).await?;
        let ledger = self.store.load_ledger(&session.user_id).await?;
        let plan = user
            .plan
            .as_deref()
            .and_then(Plan::from_name)
            .unwrap_or(Plan::Padawan);
        let name = user.name.as_deref().unwrap_or_default();
        Ok(ProfileView {
            first_name: name.split_whitespace().next().map(str::to_string),
            initials: initials(name),
            plan,
            usage: ledger.map(|ledger| UsageSummary::new(&ledger, user.plan.as_deref())),
            user,
        })
    }

    /// Phone is the only self-editable profile field.
    pub async fn update_phone(&self, session: &Session, phone: &str) -> Result<UserRecord> {
        let mut user = self.user(session).await?;
        user.phone = Some(phone.trim().to_string());
        user.updated_at_ms = Some(now_millis());
        self.store.put_user(&user).await?;
        Ok(user)
    }

    pub async fn request_password_reset(&self, session: &Session) -> Result<()> {
        let email = session
            .email
            .as_deref()
            .ok_or_else(|| GenieError::InvalidInput("account has no email".to_string()))?;
        self.identity.send_password_reset(email).await?;
        Ok(())
    }

    /// Archives the profile, disables it and removes the identity account.
    ///
    /// Fails with [`AuthError::RequiresRecentLogin`] when the provider wants
    /// a fresh sign-in; continue with
    /// [`AccountService::reauthenticate_and_delete`].
    pub async fn delete_account(&self, session: &Session, confirmation: &str) -> Result<()> {
        if confirmation != DELETE_CONFIRMATION {
            return Err(GenieError::InvalidInput(format!(
                "type {DELETE_CONFIRMATION} to confirm"
            )));
        }
        self.proceed_with_deletion(session).await
    }

    pub async fn reauthenticate_and_delete(&self, session: &Session, password: &str) -> Result<()> {
        let email = session
            .email
            .as_deref()
            .ok_or_else(|| GenieError::InvalidInput("account has no email".to_string()))?;
        self.identity.reauthenticate(email, password).await?;
        self.proceed_with_deletion(session).await
    }

    async fn proceed_with_deletion(&self, session: &Session) -> Result<()> {
        let uid = session.user_id.as_str();
        let now = now_millis();
        let mut user = self
            .store
            .load_user(uid)
            .await?
            .unwrap_or_else(|| UserRecord::new(uid));

        self.store
            .put_deleted_user(&DeletedUserRecord {
                uid: uid.to_string(),
                email: session.email.clone(),
                name: user.name.clone(),
                company: user.company.clone(),
                plan: user.plan.clone(),
                deleted_at_ms: now,
            })
            .await?;

        user.disabled = true;
        user.disabled_at_ms = Some(now);
        if session.email.is_some() {
            user.email = session.email.clone();
        }
        self.store.put_user(&user).await?;

        match self.identity.delete_account(uid).await {
            Ok(()) => {
                tracing::info!(user_id = uid, "account deleted");
                Ok(())
            }
            Err(AuthError::RequiresRecentLogin) => {
                tracing::info!(user_id = uid, "account deletion needs re-authentication");
                Err(AuthError::RequiresRecentLogin.into())
            }
            Err(err) => {
                tracing::error!(user_id = uid, error = %err, "account deletion failed");
                Err(err.into())
            }
        }
    }
}

/// Up to two upper-case initials from a full name.
pub fn initials(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|part| part.chars().next())
        .flat_map(char::to_uppercase)
        .take(2)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryIdentityProvider;
    use crate::ledger::TokenLedger;
    use crate::store::MemoryStore;

    fn session() -> Session {
        Session::new("u1", Some("ana@example.com".to_string()))
    }

    async fn fixture() -> (Arc<MemoryStore>, Arc<MemoryIdentityProvider>, AccountService) {
        let store = Arc::new(MemoryStore::new());
        store
            .put_user(&UserRecord {
                name: Some("ana maria souza".to_string()),
                company: Some("Acme".to_string()),
                plan: Some("Jedi".to_string()),
                ..UserRecord::new("u1")
            })
            .await
            .expect("seed");
        let identity = Arc::new(MemoryIdentityProvider::new());
        identity.add_user("u1", "ana@example.com", "pw", true);
        let service = AccountService::new(store.clone(), identity.clone());
        (store, identity, service)
    }

    #[test]
    fn initials_take_two_letters() {
        assert_eq!(initials("ana maria souza"), "AM");
        assert_eq!(initials("Zé"), "Z");
        assert_eq!(initials(""), "");
    }

    #[tokio::test]
    async fn profile_view_includes_usage() {
        let (store, _identity, service) = fixture().await;
        store
            .put_ledger("u1", &TokenLedger::for_plan(Plan::Jedi, 0))
            .await
            .expect("ledger");

        let view = service.profile_view(&session()).await.expect("view");
        assert_eq!(view.first_name.as_deref(), Some("ana"));
        assert_eq!(view.initials, "AM");
        assert_eq!(view.plan, Plan::Jedi);
        assert_eq!(view.usage.map(|u| u.total_tokens), Some(1_000));
    }

    #[tokio::test]
    async fn deletion_requires_exact_confirmation() {
        let (store, identity, service) = fixture().await;
        let err = service
            .delete_account(&session(), "deletar")
            .await
            .expect_err("must fail");
        assert!(matches!(err, GenieError::InvalidInput(_)));
        assert!(identity.has_account("u1"));
        assert_eq!(store.load_deleted_user("u1").await.expect("load"), None);
    }

    #[tokio::test]
    async fn deletion_archives_then_disables_then_removes_identity() {
        let (store, identity, service) = fixture().await;
        service
            .delete_account(&session(), DELETE_CONFIRMATION)
            .await
            .expect("delete");

        let archived = store.load_deleted_user("u1").await.expect("load").expect("archived");
        assert_eq!(archived.company.as_deref(), Some("Acme"));
        assert_eq!(archived.plan.as_deref(), Some("Jedi"));
        let user = store.load_user("u1").await.expect("load").expect("user");
        assert!(user.disabled);
        assert!(!identity.has_account("u1"));
    }

    #[tokio::test]
    async fn stale_login_asks_for_password_then_completes() {
        let (_store, identity, service) = fixture().await;
        identity.set_require_recent_login(true);

        let err = service
            .delete_account(&session(), DELETE_CONFIRMATION)
            .await
            .expect_err("needs reauth");
        assert!(matches!(err, GenieError::Auth(AuthError::RequiresRecentLogin)));
        assert!(identity.has_account("u1"));

        let err = service
            .reauthenticate_and_delete(&session(), "wrong")
            .await
            .expect_err("bad password");
        assert!(matches!(err, GenieError::Auth(AuthError::InvalidCredentials)));

        service
            .reauthenticate_and_delete(&session(), "pw")
            .await
            .expect("delete");
        assert!(!identity.has_account("u1"));
    }

    #[tokio::test]
    async fn phone_update_and_password_reset() {
        let (store, identity, service) = fixture().await;
        service
            .update_phone(&session(), " +55 11 99999-0000 ")
            .await
            .expect("update");
        let user = store.load_user("u1").await.expect("load").expect("user");
        assert_eq!(user.phone.as_deref(), Some("+55 11 99999-0000"));

        service
            .request_password_reset(&session())
            .await
            .expect("reset");
        assert_eq!(identity.password_resets_sent("ana@example.com"), 1);
    }
}
