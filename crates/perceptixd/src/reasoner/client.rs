//! HTTP client for the reasoning provider (Ollama chat API).
//!
//! All reasoning stages share a single client. Requests always ask for JSON
//! output (`format: "json"`); responses are defensively stripped of markdown
//! fences before parsing because smaller models wrap JSON in ```json blocks
//! despite the format hint.

use anyhow::{anyhow, Context, Result};
use perceptix_common::config::ApiConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// Reasoning provider client. Cheap to clone is not needed; the runtime owns
/// exactly one.
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn from_config(api: &ApiConfig) -> Self {
        let api_key = api
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        if api.api_key_env.is_some() && api_key.is_none() {
            warn!("API key environment variable is set in config but empty");
        }
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(api.timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url: api.base_url.trim_end_matches('/').to_string(),
            model: api.model_name.clone(),
            api_key,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check whether the provider answers at all. Used at startup to decide
    /// between live reasoning and the deterministic fallback path.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.http.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Provider availability check failed: {}", e);
                false
            }
        }
    }

    /// Send one prompt and parse the reply as a JSON value.
    pub async fn generate_json(&self, prompt: &str) -> Result<Value> {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
            format: Some("json".to_string()),
        };

        let mut builder = self.http.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("provider request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("provider returned HTTP {}", response.status()));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("failed to decode provider response")?;

        let raw = strip_markdown_fences(&chat.message.content);
        serde_json::from_str(raw).with_context(|| {
            format!(
                "provider reply is not valid JSON (first 120 chars: {:?})",
                reply_preview(raw)
            )
        })
    }
}

/// First 120 bytes of the reply, backed off to a char boundary so a
/// multi-byte reply cannot panic the error path.
fn reply_preview(raw: &str) -> &str {
    if raw.len() <= 120 {
        return raw;
    }
    let mut end = 120;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    &raw[..end]
}

/// Strip a leading ```json / ``` fence and trailing ``` if present.
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences_json() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_markdown_fences(raw), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_fences_plain() {
        assert_eq!(strip_markdown_fences("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_fences_bare_fence() {
        let raw = "```\n{\"a\": 1}\n```";
        assert_eq!(strip_markdown_fences(raw), "{\"a\": 1}");
    }

    #[test]
    fn test_reply_preview_respects_char_boundaries() {
        // 'é' is two bytes; place it so byte 120 lands inside it.
        let reply = format!("{}é and more text", "x".repeat(119));
        let preview = reply_preview(&reply);
        assert!(preview.len() <= 120);
        assert_eq!(preview, "x".repeat(119));

        let short = "not json";
        assert_eq!(reply_preview(short), short);

        let ascii = "y".repeat(300);
        assert_eq!(reply_preview(&ascii).len(), 120);
    }
}
