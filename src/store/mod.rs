//! Document store seam. Every durable record of the product lives behind
//! [`Store`]; the client never keeps authoritative state of its own.
//!
//! Writes are last-write-wins per document, except the token ledger which
//! also offers [`Store::swap_ledger`], an atomic compare-and-swap used to
//! keep two sessions from spending the same balance.

mod memory;
mod records;
#[cfg(feature = "store-sqlite")]
mod sqlite;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::ledger::TokenLedger;

pub use memory::MemoryStore;
pub use records::{
    ChallengeRecord, DeletedUserRecord, FraudRecord, MessageRecord, PlanHireRecord, Role,
    StartupListRecord, UserRecord,
};
#[cfg(feature = "store-sqlite")]
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "store-sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[cfg(feature = "store-sqlite")]
    #[error("sqlite join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Revision counter bumped after every successful write.
    fn changes(&self) -> watch::Receiver<u64>;

    async fn load_user(&self, uid: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn put_user(&self, user: &UserRecord) -> Result<(), StoreError>;

    async fn load_ledger(&self, uid: &str) -> Result<Option<TokenLedger>, StoreError>;
    async fn put_ledger(&self, uid: &str, ledger: &TokenLedger) -> Result<(), StoreError>;
    /// Replaces the ledger only if the stored one still equals `expected`.
    /// Returns `false` when another writer got there first.
    async fn swap_ledger(
        &self,
        uid: &str,
        expected: &TokenLedger,
        next: &TokenLedger,
    ) -> Result<bool, StoreError>;

    async fn load_plan_hire(&self, uid: &str) -> Result<Option<PlanHireRecord>, StoreError>;
    async fn put_plan_hire(&self, record: &PlanHireRecord) -> Result<(), StoreError>;

    async fn load_fraud_record(&self, uid: &str) -> Result<Option<FraudRecord>, StoreError>;
    async fn put_fraud_record(&self, record: &FraudRecord) -> Result<(), StoreError>;

    async fn load_deleted_user(&self, uid: &str)
    -> Result<Option<DeletedUserRecord>, StoreError>;
    async fn put_deleted_user(&self, record: &DeletedUserRecord) -> Result<(), StoreError>;

    async fn load_challenge(&self, id: &str) -> Result<Option<ChallengeRecord>, StoreError>;
    async fn put_challenge(&self, challenge: &ChallengeRecord) -> Result<(), StoreError>;
    /// Newest first.
    async fn list_challenges(&self, user_id: &str) -> Result<Vec<ChallengeRecord>, StoreError>;

    async fn put_message(&self, message: &MessageRecord) -> Result<(), StoreError>;
    /// Oldest first.
    async fn list_messages(&self, challenge_id: &str) -> Result<Vec<MessageRecord>, StoreError>;

    async fn put_startup_list(&self, list: &StartupListRecord) -> Result<(), StoreError>;
    async fn list_startup_lists(
        &self,
        challenge_id: &str,
    ) -> Result<Vec<StartupListRecord>, StoreError>;
}
