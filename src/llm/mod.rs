//! LLM provider abstraction: analyze statement boundaries and extract
//! per-statement metadata.
//!
//! One capability trait, [`LlmProvider`], and two concrete variants: a
//! [`cloud::CloudProvider`] speaking the OpenAI-compatible chat-completions
//! wire format, and a [`local::LocalProvider`] for an Ollama instance. Both
//! return the same typed results, so the boundary analyzer and metadata
//! extractor never know which variant they talk to.
//!
//! Contract notes that matter for correctness:
//!
//! * Providers parse model replies as JSON (code fences tolerated) and
//!   reject malformed payloads as non-retryable `Provider` errors — see
//!   [`parse`].
//! * Transport-level rate-limit and quota failures map to the retryable
//!   `"rate limit"` provider error so the workflow can distinguish them.
//! * Providers never retry and never sleep; admission and backoff belong to
//!   [`crate::ratelimit`].
//! * [`LlmProvider::is_available`] is a cheap probe with a short deadline,
//!   suitable for running before every document in batch mode.

pub mod cloud;
pub mod local;
pub mod parse;

use crate::config::{Config, ProviderKind};
use crate::error::SplitError;
use crate::model::Boundary;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of a boundary-analysis call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryResult {
    pub boundaries: Vec<Boundary>,
    /// Overall confidence in [0, 1].
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_notes: Option<String>,
    /// Name of the provider that produced this result.
    pub provider: String,
}

/// Result of a metadata-extraction call. Fields are raw model claims; the
/// metadata extractor normalises and the hallucination detector judges them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataResult {
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    /// Raw period text, e.g. "2024-04-01 to 2024-04-30".
    pub statement_period: Option<String>,
    pub statement_date: Option<String>,
    pub customer_name: Option<String>,
    pub confidence: f32,
    pub provider: String,
}

/// Static description of a provider instance, for logs and reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Capability set every provider variant implements.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Cheap availability probe; must complete within the configured probe
    /// timeout and never error.
    async fn is_available(&self) -> bool;

    /// Detect statement boundaries in the (possibly truncated) document text.
    async fn analyze_boundaries(
        &self,
        text: &str,
        total_pages: usize,
    ) -> Result<BoundaryResult, SplitError>;

    /// Extract statement metadata from one segment's text.
    async fn extract_metadata(
        &self,
        text: &str,
        start_page: usize,
        end_page: usize,
    ) -> Result<MetadataResult, SplitError>;

    /// Provider identity.
    fn info(&self) -> ProviderInfo;
}

/// Build the configured provider variant, or `None` for heuristic-only runs.
///
/// The factory is the single switch on the provider tag; each variant reads
/// only its own typed options from the config.
pub fn provider_from_config(config: &Config) -> Option<Arc<dyn LlmProvider>> {
    match config.llm.provider {
        ProviderKind::Cloud => Some(Arc::new(cloud::CloudProvider::new(&config.llm))),
        ProviderKind::Local => Some(Arc::new(local::LocalProvider::new(&config.llm))),
        ProviderKind::None => None,
    }
}
