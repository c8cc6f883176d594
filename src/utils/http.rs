use futures_util::StreamExt;
use serde::de::DeserializeOwned;

use crate::webhook::WebhookError;

pub(crate) const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Reads at most `max_bytes` of the body, marking the text when it was cut.
pub(crate) async fn response_text_truncated(
    response: reqwest::Response,
    max_bytes: usize,
) -> String {
    let max_bytes = max_bytes.max(1);
    let mut collected = Vec::<u8>::new();
    let mut truncated = false;

    let mut chunks = response.bytes_stream();
    while let Some(next) = chunks.next().await {
        let Ok(chunk) = next else {
            break;
        };
        let room = max_bytes.saturating_sub(collected.len());
        if chunk.len() > room {
            collected.extend_from_slice(&chunk[..room]);
            truncated = true;
            break;
        }
        collected.extend_from_slice(&chunk);
    }

    let mut body = String::from_utf8_lossy(&collected).into_owned();
    if truncated {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str("...(truncated)");
    }
    body
}

pub(crate) async fn send_checked_json<T: DeserializeOwned>(
    req: reqwest::RequestBuilder,
) -> Result<T, WebhookError> {
    let response = req.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response_text_truncated(response, MAX_ERROR_BODY_BYTES).await;
        return Err(WebhookError::Status { status, body });
    }
    let raw = response.bytes().await?;
    serde_json::from_slice(&raw).map_err(|err| WebhookError::InvalidResponse(err.to_string()))
}
