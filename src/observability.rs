use serde::{Deserialize, Serialize};
use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::LoggingConfig;

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCountersSnapshot {
    pub accepted: u64,
    pub warned: u64,
    pub rejected: u64,
    pub renewed: u64,
    pub conflicts: u64,
    pub persistence_failures: u64,
}

#[derive(Debug, Default)]
pub struct LedgerCounters {
    snapshot: LedgerCountersSnapshot,
}

impl LedgerCounters {
    pub fn record_accepted(&mut self, warned: bool) {
        self.snapshot.accepted = self.snapshot.accepted.saturating_add(1);
        if warned {
            self.snapshot.warned = self.snapshot.warned.saturating_add(1);
        }
    }

    pub fn record_rejected(&mut self) {
        self.snapshot.rejected = self.snapshot.rejected.saturating_add(1);
    }

    pub fn record_renewed(&mut self) {
        self.snapshot.renewed = self.snapshot.renewed.saturating_add(1);
    }

    pub fn record_conflict(&mut self) {
        self.snapshot.conflicts = self.snapshot.conflicts.saturating_add(1);
    }

    pub fn record_persistence_failure(&mut self) {
        self.snapshot.persistence_failures = self.snapshot.persistence_failures.saturating_add(1);
    }

    pub fn snapshot(&self) -> LedgerCountersSnapshot {
        self.snapshot.clone()
    }
}
