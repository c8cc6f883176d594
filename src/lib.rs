pub mod account;
mod app;
pub mod chat;
pub mod config;
pub mod content;
mod error;
pub mod feed;
pub mod identity;
pub mod ledger;
pub mod notice;
pub mod observability;
pub mod plan;
pub mod purchase;
pub mod store;
pub mod usage;
pub mod utils;
pub mod webhook;

pub use error::{GenieError, Result};

pub use account::{AccountService, DELETE_CONFIRMATION, ProfileView};
pub use app::GenieApp;
pub use chat::{ChatService, Delivery, Opening, SendOutcome};
pub use config::{CheckoutConfig, ConfigError, Env, GenieConfig, LoggingConfig, StoreConfig, WebhookConfig};
pub use content::{MessageContent, StartupButton};
pub use feed::{Keyed, SnapshotDiff};
pub use identity::{
    Admission, AuthError, AuthUser, IdentityProvider, MemoryIdentityProvider, ResendOutcome,
    ResendThrottle, Session, SessionGate,
};
pub use ledger::{
    Charge, ChargeOutcome, LEDGER_CYCLE_MS, LedgerService, MESSAGE_TOKEN_COST, RejectReason,
    TokenLedger,
};
pub use notice::{FixedPick, MessagePicker, RandomPick};
pub use observability::{LedgerCountersSnapshot, init_tracing};
pub use plan::Plan;
pub use purchase::{PurchaseReconciler, Reconciliation};
pub use store::{MemoryStore, Store, StoreError};
#[cfg(feature = "store-sqlite")]
pub use store::SqliteStore;
pub use usage::{UpgradeOffer, UsageSummary};
pub use webhook::{AgentReply, AgentWebhook, HttpAgentWebhook, WebhookError};
