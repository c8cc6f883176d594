//! Runtime configuration: a TOML file overlaid with `GENIE_*` variables.

mod env;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plan::Plan;
use crate::webhook::DEFAULT_WEBHOOK_TIMEOUT;

pub use env::{Env, parse_dotenv};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenieConfig {
    pub webhook: WebhookConfig,
    pub checkout: CheckoutConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout_secs: Option<u64>,
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("url", &redact(&self.url))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_WEBHOOK_TIMEOUT)
    }
}

/// Payment redirect URLs per purchasable plan.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckoutConfig {
    pub jedi: Option<String>,
    pub mestre_jedi: Option<String>,
    pub mestre_yoda: Option<String>,
}

impl std::fmt::Debug for CheckoutConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutConfig")
            .field("jedi", &self.jedi.as_deref().map(redact))
            .field("mestre_jedi", &self.mestre_jedi.as_deref().map(redact))
            .field("mestre_yoda", &self.mestre_yoda.as_deref().map(redact))
            .finish()
    }
}

impl CheckoutConfig {
    pub fn url_for(&self, plan: Plan) -> Option<&str> {
        let url = match plan {
            Plan::Padawan => None,
            Plan::Jedi => self.jedi.as_deref(),
            Plan::MestreJedi => self.mestre_jedi.as_deref(),
            Plan::MestreYoda => self.mestre_yoda.as_deref(),
        };
        url.filter(|url| !url.trim().is_empty())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite database file. Unset keeps everything in memory.
    pub sqlite_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub json: bool,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "info".to_string(),
        }
    }
}

fn redact(url: &str) -> &'static str {
    if url.is_empty() { "<unset>" } else { "<redacted>" }
}

impl GenieConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Variables present in `env` override the file.
    pub fn apply_env(&mut self, env: &Env) -> Result<(), ConfigError> {
        if let Some(url) = env.get("GENIE_WEBHOOK_URL") {
            self.webhook.url = url;
        }
        if let Some(secs) = env.get_u64("GENIE_WEBHOOK_TIMEOUT_SECS")? {
            self.webhook.timeout_secs = Some(secs);
        }
        for (key, slot) in [
            ("GENIE_PLAN_JEDI_URL", &mut self.checkout.jedi),
            ("GENIE_PLAN_MESTRE_JEDI_URL", &mut self.checkout.mestre_jedi),
            ("GENIE_PLAN_MESTRE_YODA_URL", &mut self.checkout.mestre_yoda),
        ] {
            if let Some(url) = env.get(key) {
                *slot = Some(url);
            }
        }
        if let Some(path) = env.get("GENIE_SQLITE_PATH") {
            self.store.sqlite_path = Some(PathBuf::from(path));
        }
        if let Some(json) = env.get_bool("GENIE_LOG_JSON")? {
            self.logging.json = json;
        }
        if let Some(filter) = env.get("GENIE_LOG_FILTER") {
            self.logging.filter = filter;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.webhook.url.trim();
        if url.is_empty() {
            return Err(ConfigError::Missing("webhook.url"));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "webhook.url",
                value: url.to_string(),
            });
        }
        Ok(())
    }
}
