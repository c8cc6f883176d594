//! Markers embedded in stored message content.

use serde::{Deserialize, Serialize};

use crate::notice::UPGRADE_PLAN_OPEN;

const STARTUP_BUTTON_OPEN: &str = "<startup-button>";
const STARTUP_BUTTON_CLOSE: &str = "</startup-button>";

/// Payload of a startup-list shortcut posted after the agent returns cards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupButton {
    #[serde(default)]
    pub title: Option<String>,
    pub created_at_ms: u64,
}

impl StartupButton {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(format!(
            "{STARTUP_BUTTON_OPEN}{}{STARTUP_BUTTON_CLOSE}",
            serde_json::to_string(self)?
        ))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageContent<'a> {
    Text(&'a str),
    /// Text preceding an upgrade call to action.
    UpgradePrompt(&'a str),
    StartupButton(StartupButton),
    /// A startup-button marker whose payload did not decode.
    Unreadable,
}

impl<'a> MessageContent<'a> {
    pub fn parse(content: &'a str) -> Self {
        if let Some((text, _)) = content.split_once(UPGRADE_PLAN_OPEN) {
            return MessageContent::UpgradePrompt(text.trim_end());
        }
        if let Some(rest) = content.strip_prefix(STARTUP_BUTTON_OPEN) {
            let json = rest.strip_suffix(STARTUP_BUTTON_CLOSE).unwrap_or(rest);
            return serde_json::from_str(json)
                .map(MessageContent::StartupButton)
                .unwrap_or(MessageContent::Unreadable);
        }
        MessageContent::Text(content)
    }
}
