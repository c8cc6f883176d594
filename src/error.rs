use thiserror::Error;

use crate::config::ConfigError;
use crate::identity::AuthError;
use crate::store::StoreError;
use crate::webhook::WebhookError;

#[derive(Debug, Error)]
pub enum GenieError {
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
    #[error("webhook error: {0}")]
    Webhook(#[from] WebhookError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("token ledger not provisioned for user {user_id}")]
    LedgerNotProvisioned { user_id: String },
    #[error("token ledger for user {user_id} changed concurrently")]
    LedgerConflict { user_id: String },
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl GenieError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Text shown to the end user. Only auth errors carry a specific message;
    /// everything else asks the user to try again.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Auth(err) => err.user_message(),
            Self::NotFound { kind: "challenge", .. } => {
                "Selecione ou crie um desafio para começar."
            }
            Self::InvalidInput(_) => "Dados inválidos. Verifique e tente novamente.",
            _ => "Ocorreu um erro. Por favor, tente novamente.",
        }
    }
}

pub type Result<T> = std::result::Result<T, GenieError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_is_specific_for_auth_and_generic_otherwise() {
        let err = GenieError::from(AuthError::UserDisabled);
        assert_eq!(
            err.user_message(),
            "Esta conta foi desativada. Entre em contato com o suporte."
        );

        let err = GenieError::from(StoreError::Unavailable("down".to_string()));
        assert_eq!(
            err.user_message(),
            "Ocorreu um erro. Por favor, tente novamente."
        );

        let err = GenieError::not_found("challenge", "c-1");
        assert_eq!(err.to_string(), "challenge not found: c-1");
    }
}
