//! Local provider: Ollama.
//!
//! Same capability set as the cloud variant against a local Ollama daemon.
//! Two wire differences matter: the chat endpoint is `/api/chat` with
//! `stream: false`, and availability is probed with `GET /api/tags` (the
//! daemon's model listing) instead of a paid completion — it answers in
//! single-digit milliseconds when the daemon is up.
//!
//! Ollama has no request quotas, so the only retryable failures are
//! transport-level (daemon restarting, socket timeouts).

use crate::config::LlmOptions;
use crate::error::SplitError;
use crate::prompts;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{parse, BoundaryResult, LlmProvider, MetadataResult, ProviderInfo};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.1";

/// Ollama chat provider.
pub struct LocalProvider {
    client: reqwest::Client,
    probe_client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

impl LocalProvider {
    pub fn new(options: &LlmOptions) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.api_timeout_secs))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        let probe_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.probe_timeout_secs))
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            client,
            probe_client,
            base_url: options
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: options
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        }
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, SplitError> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages: vec![
                OllamaMessage {
                    role: "system",
                    content: system,
                },
                OllamaMessage {
                    role: "user",
                    content: user,
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| SplitError::Provider {
                provider: "local".into(),
                message: format!("transport: {e}"),
                retryable: e.is_timeout() || e.is_connect(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SplitError::Provider {
                provider: "local".into(),
                message: format!("HTTP {}: {}", status.as_u16(), body),
                retryable: status.is_server_error(),
            });
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| SplitError::invalid_response("local", e))?;
        Ok(parsed.message.content)
    }
}

#[async_trait]
impl LlmProvider for LocalProvider {
    async fn is_available(&self) -> bool {
        match self
            .probe_client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                debug!(error = %e, "local availability probe failed");
                false
            }
        }
    }

    async fn analyze_boundaries(
        &self,
        text: &str,
        total_pages: usize,
    ) -> Result<BoundaryResult, SplitError> {
        let user = prompts::boundary_user_prompt(text, total_pages);
        let reply = self.chat(prompts::BOUNDARY_SYSTEM_PROMPT, &user).await?;
        parse::parse_boundary_reply("local", &reply)
    }

    async fn extract_metadata(
        &self,
        text: &str,
        start_page: usize,
        end_page: usize,
    ) -> Result<MetadataResult, SplitError> {
        let user = prompts::metadata_user_prompt(text, start_page, end_page);
        let reply = self.chat(prompts::METADATA_SYSTEM_PROMPT, &user).await?;
        parse::parse_metadata_reply("local", &reply)
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "local".into(),
            model: self.model.clone(),
            endpoint: Some(self.base_url.clone()),
        }
    }
}
