//! Conversational agent endpoint.
//!
//! One `POST` per message with `{"message", "sessionId"}`; the agent answers
//! with a JSON array whose first element carries `output`. The output may
//! embed a `<startup cards>{...}</startup cards>` block with structured
//! recommendations.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::utils::http::send_checked_json;

pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(120);

const STARTUP_CARDS_OPEN: &str = "<startup cards>";
const STARTUP_CARDS_CLOSE: &str = "</startup cards>";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid webhook response: {0}")]
    InvalidResponse(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum AgentReply {
    /// Missing or empty `output`; nothing is shown.
    Empty,
    Text(String),
    /// Output containing a startup-cards block. `cards` is `None` when the
    /// block is not a JSON object, in which case `output` is shown as-is.
    StartupCards {
        output: String,
        cards: Option<Map<String, Value>>,
    },
}

impl AgentReply {
    pub fn from_output(output: Option<String>) -> Self {
        let Some(output) = output.filter(|output| !output.is_empty()) else {
            return AgentReply::Empty;
        };
        match startup_cards_block(&output) {
            Some(block) => {
                let cards = serde_json::from_str::<Value>(block)
                    .ok()
                    .and_then(|value| match value {
                        Value::Object(map) => Some(map),
                        _ => None,
                    });
                AgentReply::StartupCards { output, cards }
            }
            None => AgentReply::Text(output),
        }
    }
}

/// Text between the first `<startup cards>` and the closing tag after it.
pub fn startup_cards_block(output: &str) -> Option<&str> {
    let start = output.find(STARTUP_CARDS_OPEN)? + STARTUP_CARDS_OPEN.len();
    let len = output[start..].find(STARTUP_CARDS_CLOSE)?;
    Some(&output[start..start + len])
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentRequest<'a> {
    message: &'a str,
    session_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct AgentResponseItem {
    #[serde(default)]
    output: Option<String>,
}

#[async_trait]
pub trait AgentWebhook: Send + Sync {
    async fn send(&self, message: &str, session_id: &str) -> Result<AgentReply, WebhookError>;
}

#[derive(Clone)]
pub struct HttpAgentWebhook {
    url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpAgentWebhook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAgentWebhook")
            .field("url", &"<redacted>")
            .finish()
    }
}

impl HttpAgentWebhook {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl AgentWebhook for HttpAgentWebhook {
    async fn send(&self, message: &str, session_id: &str) -> Result<AgentReply, WebhookError> {
        let req = self.client.post(&self.url).json(&AgentRequest {
            message,
            session_id,
        });
        let items: Vec<AgentResponseItem> = send_checked_json(req).await?;
        let output = items.into_iter().next().and_then(|item| item.output);
        Ok(AgentReply::from_output(output))
    }
}
