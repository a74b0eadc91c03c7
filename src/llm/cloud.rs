//! Cloud provider: OpenAI-compatible chat-completions endpoint.
//!
//! The wire format is the de-facto standard `/chat/completions` JSON shape,
//! which also covers self-hosted compatible endpoints (vLLM, LiteLLM) via
//! `llm.base_url`. Error mapping is the part the workflow depends on:
//!
//! | Transport observation            | Mapped error                      |
//! |----------------------------------|-----------------------------------|
//! | HTTP 429, quota error body       | `Provider("rate limit")`, retryable |
//! | HTTP 5xx, connect/timeout error  | `Provider(...)`, retryable        |
//! | HTTP 401/403                     | `Provider(...)`, NOT retryable    |
//! | Unparseable reply JSON           | `Provider("invalid response")`, NOT retryable |
//!
//! The provider itself never retries; the backoff combinator decides.

use crate::config::LlmOptions;
use crate::error::SplitError;
use crate::prompts;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{parse, BoundaryResult, LlmProvider, MetadataResult, ProviderInfo};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI-compatible chat-completions provider.
pub struct CloudProvider {
    client: reqwest::Client,
    probe_client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl CloudProvider {
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
            api_key: options.api_key.clone(),
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

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// One chat-completions round trip, returning the reply content.
    async fn chat(
        &self,
        client: &reqwest::Client,
        system: &str,
        user: &str,
        max_tokens: usize,
    ) -> Result<String, SplitError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens,
        };

        let mut builder = client.post(self.endpoint()).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| transport_error(&e))?;
        let status = response.status();

        if status.as_u16() == 429 {
            warn!("cloud provider returned 429");
            return Err(SplitError::rate_limited("cloud"));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Some gateways report quota exhaustion with a 403 body rather
            // than a 429 status.
            if body.contains("insufficient_quota") || body.contains("rate_limit") {
                return Err(SplitError::rate_limited("cloud"));
            }
            return Err(SplitError::Provider {
                provider: "cloud".into(),
                message: format!("HTTP {}: {}", status.as_u16(), truncate(&body, 200)),
                retryable: status.is_server_error(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SplitError::invalid_response("cloud", e))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| SplitError::invalid_response("cloud", "empty choices array"))
    }
}

#[async_trait]
impl LlmProvider for CloudProvider {
    async fn is_available(&self) -> bool {
        if self.api_key.is_none() && self.base_url == DEFAULT_BASE_URL {
            return false;
        }
        // A trivial 1-token completion under the probe deadline.
        match self
            .chat(&self.probe_client, "Reply with the word ok.", "ok?", 1)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "cloud availability probe failed");
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
        let reply = self
            .chat(
                &self.client,
                prompts::BOUNDARY_SYSTEM_PROMPT,
                &user,
                self.max_tokens,
            )
            .await?;
        parse::parse_boundary_reply("cloud", &reply)
    }

    async fn extract_metadata(
        &self,
        text: &str,
        start_page: usize,
        end_page: usize,
    ) -> Result<MetadataResult, SplitError> {
        let user = prompts::metadata_user_prompt(text, start_page, end_page);
        let reply = self
            .chat(
                &self.client,
                prompts::METADATA_SYSTEM_PROMPT,
                &user,
                self.max_tokens,
            )
            .await?;
        parse::parse_metadata_reply("cloud", &reply)
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "cloud".into(),
            model: self.model.clone(),
            endpoint: Some(self.base_url.clone()),
        }
    }
}

/// Map a reqwest transport error: timeouts and connection failures are
/// retryable, everything else is not.
fn transport_error(e: &reqwest::Error) -> SplitError {
    SplitError::Provider {
        provider: "cloud".into(),
        message: format!("transport: {e}"),
        retryable: e.is_timeout() || e.is_connect(),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
