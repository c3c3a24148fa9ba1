//! HTTP implementation of the [`Completer`] seam.
//!
//! - **[`ChatCompletionsClient`]** calls an OpenAI-compatible
//!   `POST {base_url}/chat/completions` endpoint (OpenRouter by default).
//! - **[`DisabledCompleter`]** is used when `llm.provider = "disabled"`.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use pkgmirage_core::error::{MirageError, MirageResult};
use pkgmirage_core::llm::{Completer, CompletionParams, Conversation, DisabledCompleter};

use crate::audit::{AuditEvent, AuditLog};
use crate::config::LlmConfig;

pub struct ChatCompletionsClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_retries: u32,
    audit: AuditLog,
}

impl ChatCompletionsClient {
    /// Reads the key from `config.api_key_env`.
    ///
    /// # Errors
    ///
    /// [`MirageError::Config`] if the variable is unset or empty.
    pub fn new(config: &LlmConfig, audit: AuditLog) -> MirageResult<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                MirageError::Config(format!(
                    "{} environment variable not set",
                    config.api_key_env
                ))
            })?;
        Self::with_key(config, &api_key, audit)
    }

    pub fn with_key(config: &LlmConfig, api_key: &str, audit: AuditLog) -> MirageResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MirageError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: api_key.to_string(),
            max_retries: config.max_retries,
            audit,
        })
    }

    async fn post_with_retry(&self, body: &serde_json::Value) -> MirageResult<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json().await.map_err(MirageError::generation);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = MirageError::Generation(format!(
                        "chat completions error {}: {}",
                        status, body_text
                    ));

                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::debug!(%status, attempt, "retryable completion failure");
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(MirageError::generation(e));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| MirageError::Generation("completion failed after retries".into())))
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response.
fn parse_chat_response(json: &serde_json::Value) -> MirageResult<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            MirageError::Generation("invalid chat response: missing choices[0].message".into())
        })
}

#[async_trait]
impl Completer for ChatCompletionsClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        params: CompletionParams,
    ) -> MirageResult<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": conversation.messages(),
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });

        let result = self
            .post_with_retry(&body)
            .await
            .and_then(|json| parse_chat_response(&json));

        match &result {
            Ok(text) => self.audit.record(
                AuditEvent::new("llm", "ok")
                    .detail(format!("{} chars", text.len()))
                    .raw(text),
            ),
            Err(e) => self
                .audit
                .record(AuditEvent::new("llm", "failed").detail(e.to_string())),
        }
        result
    }
}

/// Build the completer named by `config.provider`.
///
/// # Errors
///
/// Unknown provider, or a missing API key for `openai`.
pub fn create_completer(config: &LlmConfig, audit: AuditLog) -> Result<Arc<dyn Completer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompleter)),
        "openai" => Ok(Arc::new(ChatCompletionsClient::new(config, audit)?)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}
