//! Chat-completion providers.
//!
//! Defines the [`CompletionProvider`] trait and [`HttpChatProvider`], which
//! talks to any OpenAI-compatible `POST {base_url}/chat/completions`
//! endpoint. The text-completion, code-generation and sample-data services
//! are all instances of it with different `[providers.*]` settings.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Credentials are read from the environment variable named by
//! `api_key_env` on every call, so a server can start without keys and
//! report [`ProviderError::MissingCredentials`] per request.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use component_harness_core::error::ProviderError;
use component_harness_core::models::ChatMessage;

use crate::config::{ProviderConfig, ProvidersConfig};

/// A service that turns role-tagged messages into free text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Short label used in logs and errors (e.g. `"codegen"`).
    fn name(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError>;
}

/// OpenAI-compatible chat-completions client.
pub struct HttpChatProvider {
    name: String,
    config: ProviderConfig,
    client: reqwest::Client,
}

impl HttpChatProvider {
    pub fn from_config(name: &str, config: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            name: name.to_string(),
            config: config.clone(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "stream": false,
            "max_tokens": self.config.max_tokens,
        });
        if let Some(t) = self.config.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        body
    }

    fn api_key(&self) -> Result<String, ProviderError> {
        std::env::var(&self.config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::MissingCredentials {
                provider: self.name.clone(),
                env_var: self.config.api_key_env.clone(),
            })
    }
}

#[async_trait]
impl CompletionProvider for HttpChatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let api_key = self.api_key()?;
        let url = self.endpoint();
        let body = self.request_body(messages);

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(provider = %self.name, attempt, ?delay, "retrying provider call");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value =
                            response
                                .json()
                                .await
                                .map_err(|e| ProviderError::Malformed {
                                    provider: self.name.clone(),
                                    message: e.to_string(),
                                })?;
                        return parse_chat_response(&self.name, &json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = ProviderError::Http {
                        provider: self.name.clone(),
                        status: status.as_u16(),
                        body: body_text,
                    };

                    // Rate limited or server error
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(
                            provider = %self.name,
                            status = status.as_u16(),
                            attempt,
                            "provider call failed"
                        );
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) => {
                    warn!(provider = %self.name, attempt, error = %e, "provider unreachable");
                    last_err = Some(ProviderError::Network {
                        provider: self.name.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Network {
            provider: self.name.clone(),
            message: "request failed after retries".to_string(),
        }))
    }
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(provider: &str, json: &serde_json::Value) -> Result<String, ProviderError> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::Malformed {
            provider: provider.to_string(),
            message: "missing choices[0].message.content".to_string(),
        })
}

/// The providers a chat turn uses.
///
/// `codegen` and `sample_data` are optional: a turn without a code
/// generator always synthesizes a fallback unit, and a turn without a
/// sample-data source renders against `{}`.
#[derive(Clone)]
pub struct Providers {
    pub completion: Arc<dyn CompletionProvider>,
    pub codegen: Option<Arc<dyn CompletionProvider>>,
    pub sample_data: Option<Arc<dyn CompletionProvider>>,
}

impl Providers {
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        if !config.completion.enabled {
            anyhow::bail!("providers.completion cannot be disabled");
        }
        let completion: Arc<dyn CompletionProvider> =
            Arc::new(HttpChatProvider::from_config("completion", &config.completion)?);
        let codegen = optional_provider("codegen", &config.codegen)?;
        let sample_data = optional_provider("sample_data", &config.sample_data)?;
        Ok(Self {
            completion,
            codegen,
            sample_data,
        })
    }
}

fn optional_provider(
    name: &str,
    config: &ProviderConfig,
) -> Result<Option<Arc<dyn CompletionProvider>>> {
    if !config.enabled {
        return Ok(None);
    }
    Ok(Some(Arc::new(HttpChatProvider::from_config(name, config)?)))
}
