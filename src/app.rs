use std::sync::Arc;

use crate::account::AccountService;
use crate::chat::ChatService;
use crate::config::GenieConfig;
use crate::identity::{IdentityProvider, SessionGate};
use crate::ledger::LedgerService;
use crate::notice::{MessagePicker, RandomPick};
use crate::purchase::PurchaseReconciler;
use crate::store::{MemoryStore, Store};
use crate::webhook::{AgentWebhook, HttpAgentWebhook};
use crate::Result;

/// Every service wired over one store and one identity provider.
pub struct GenieApp {
    pub store: Arc<dyn Store>,
    pub identity: Arc<dyn IdentityProvider>,
    pub gate: SessionGate,
    pub ledger: Arc<LedgerService>,
    pub chat: ChatService,
    pub purchases: PurchaseReconciler,
    pub accounts: AccountService,
}

impl GenieApp {
    /// Validates `config`, opens the configured store and builds the HTTP
    /// webhook client.
    pub async fn from_config(
        config: &GenieConfig,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let store = open_store(config).await?;
        let webhook = HttpAgentWebhook::new(config.webhook.url.clone(), config.webhook.timeout())?;
        Ok(Self::assemble(
            config,
            store,
            identity,
            Arc::new(webhook),
            Arc::new(RandomPick::default()),
        ))
    }

    pub fn assemble(
        config: &GenieConfig,
        store: Arc<dyn Store>,
        identity: Arc<dyn IdentityProvider>,
        webhook: Arc<dyn AgentWebhook>,
        picker: Arc<dyn MessagePicker>,
    ) -> Self {
        let ledger = Arc::new(LedgerService::new(Arc::clone(&store)));
        Self {
            gate: SessionGate::new(Arc::clone(&identity), Arc::clone(&store)),
            chat: ChatService::new(Arc::clone(&store), Arc::clone(&ledger), webhook, picker),
            purchases: PurchaseReconciler::new(
                Arc::clone(&store),
                Arc::clone(&identity),
                config.checkout.clone(),
            ),
            accounts: AccountService::new(Arc::clone(&store), Arc::clone(&identity)),
            ledger,
            store,
            identity,
        }
    }
}

#[cfg(feature = "store-sqlite")]
async fn open_store(config: &GenieConfig) -> Result<Arc<dyn Store>> {
    match &config.store.sqlite_path {
        Some(path) => {
            let store = crate::store::SqliteStore::new(path.clone());
            store.init().await?;
            tracing::info!(path = %path.display(), "using sqlite store");
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

#[cfg(not(feature = "store-sqlite"))]
async fn open_store(config: &GenieConfig) -> Result<Arc<dyn Store>> {
    if config.store.sqlite_path.is_some() {
        tracing::warn!("sqlite_path set but store-sqlite feature is disabled; using memory store");
    }
    Ok(Arc::new(MemoryStore::new()))
}
