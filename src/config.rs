//! Configuration types for the statement-segmentation pipeline.
//!
//! All behaviour is controlled through [`Config`], built via its
//! [`ConfigBuilder`]. The config is constructed exactly once at process start
//! and passed by reference everywhere; no module re-reads the environment
//! after init, so two runs with equal configs behave identically.
//!
//! # Design choice: builder over constructor
//! The option surface is wide (provider knobs, pipeline thresholds, DMS
//! transport, tagging policy). The builder lets callers set only what they
//! care about and rely on documented defaults for the rest, and `build()`
//! is the single place where cross-field constraints are enforced.

use crate::error::SplitError;
use crate::model::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which LLM provider variant to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Hosted OpenAI-compatible chat-completions API.
    #[default]
    Cloud,
    /// Local Ollama instance.
    Local,
    /// No provider: heuristic segmentation only.
    None,
}

impl ProviderKind {
    /// Parse a provider tag as it appears in config/CLI.
    pub fn parse(s: &str) -> Result<Self, SplitError> {
        match s.to_ascii_lowercase().as_str() {
            "cloud" | "openai" => Ok(ProviderKind::Cloud),
            "local" | "ollama" => Ok(ProviderKind::Local),
            "none" | "heuristic" => Ok(ProviderKind::None),
            other => Err(SplitError::Config(format!(
                "Unknown LLM provider '{other}' (expected cloud, local, or none)"
            ))),
        }
    }
}

/// LLM provider and rate-limit settings (`llm.*`).
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmOptions {
    /// Provider variant. Default: [`ProviderKind::Cloud`].
    pub provider: ProviderKind,
    /// Model identifier, e.g. "gpt-4o-mini" or "llama3.1". Default: provider-specific.
    pub model: Option<String>,
    /// API key for the cloud provider. Never logged.
    pub api_key: Option<String>,
    /// Base URL override (cloud) or endpoint (local, default http://localhost:11434).
    pub base_url: Option<String>,
    /// Sampling temperature. Default: 0.1.
    ///
    /// Boundary detection is a transcription-faithfulness task; low
    /// temperature keeps replies deterministic and parseable.
    pub temperature: f32,
    /// Maximum tokens the model may generate per call. Default: 2048.
    pub max_tokens: usize,
    /// Token-bucket steady rate. Default: 30.
    pub requests_per_minute: u32,
    /// Token-bucket initial burst capacity. Default: 10.
    pub burst_limit: u32,
    /// Retry attempts on retryable provider failures. Default: 3.
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds (exponential). Default: 1000.
    pub backoff_base_ms: u64,
    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,
    /// Availability-probe timeout in seconds. Default: 5.
    ///
    /// The probe runs before every document in batch mode; a short deadline
    /// keeps an unreachable provider from stalling the queue.
    pub probe_timeout_secs: u64,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Cloud,
            model: None,
            api_key: None,
            base_url: None,
            temperature: 0.1,
            max_tokens: 2048,
            requests_per_minute: 30,
            burst_limit: 10,
            max_attempts: 3,
            backoff_base_ms: 1000,
            api_timeout_secs: 60,
            probe_timeout_secs: 5,
        }
    }
}

impl fmt::Debug for LlmOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmOptions")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("burst_limit", &self.burst_limit)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Pipeline thresholds (`pipeline.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Characters per provider text chunk. Default: 12000.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks. Must be < `chunk_size`. Default: 500.
    pub chunk_overlap: usize,
    /// Boundaries spanning fewer pages than this are coalescing candidates.
    /// Default: 1 (coalescing effectively off).
    pub min_fragment_pages: usize,
    /// Maximum generated filename length, suffix and extension preserved.
    /// Default: 240.
    pub max_filename_length: usize,
    /// Boundary/metadata confidence below this raises a low-confidence error.
    /// Default: 0.5.
    pub confidence_threshold: f32,
    /// Heuristic fallback: account matches whose positions differ by less
    /// than this fraction of the document length are duplicates. Default: 0.2.
    pub fallback_dedup_ratio: f64,
    /// Permit overlapping boundaries from the analyzer. Default: false
    /// (overlaps are resolved by clamping the later boundary's start).
    pub allow_overlaps: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_size: 12000,
            chunk_overlap: 500,
            min_fragment_pages: 1,
            max_filename_length: 240,
            confidence_threshold: 0.5,
            fallback_dedup_ratio: 0.2,
            allow_overlaps: false,
        }
    }
}

/// Filesystem targets (`output.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputOptions {
    /// Directory for generated per-statement PDFs. Default: `./statements`.
    pub default_dir: PathBuf,
    /// Directory failed runs are moved into. Default: `./quarantine`.
    pub quarantine_dir: PathBuf,
    /// Directory for standalone error reports. Defaults to the quarantine dir.
    pub error_report_dir: Option<PathBuf>,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            default_dir: PathBuf::from("./statements"),
            quarantine_dir: PathBuf::from("./quarantine"),
            error_report_dir: None,
        }
    }
}

/// Post-processing tagging policy for the *input* document (`dms.input.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DmsInputOptions {
    /// Tag added to the input document after successful processing.
    pub processed_tag: Option<String>,
    /// Remove the configured unprocessed tag instead of adding one.
    pub remove_unprocessed_tag: bool,
    /// Name of the unprocessed tag to remove. Default: "unprocessed".
    pub unprocessed_tag: Option<String>,
    /// Custom processing tag, applied when set (takes precedence over
    /// `processed_tag`).
    pub processing_tag: Option<String>,
    /// Master switch for input tagging. Default: true.
    pub tagging_enabled: bool,
}

/// DMS transport and upload defaults (`dms.*`).
#[derive(Clone, Serialize, Deserialize)]
pub struct DmsOptions {
    /// Whether DMS integration is active. Default: false.
    pub enabled: bool,
    /// Base URL, e.g. "https://paperless.example.com". No trailing slash.
    pub base_url: Option<String>,
    /// API token. Never logged.
    pub token: Option<String>,
    /// Timeout for queries and tag operations, seconds. Default: 30.
    pub query_timeout_secs: u64,
    /// Timeout for uploads, seconds. Default: 60.
    pub upload_timeout_secs: u64,
    /// Timeout for downloads, seconds. Default: 60.
    pub download_timeout_secs: u64,
    /// Default tags applied to uploaded statements.
    pub tags: Vec<String>,
    /// Default correspondent name.
    pub correspondent: Option<String>,
    /// Default document type name.
    pub document_type: Option<String>,
    /// Default storage path name.
    pub storage_path: Option<String>,
    /// Input-document tagging policy.
    pub input: DmsInputOptions,
}

impl Default for DmsOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            token: None,
            query_timeout_secs: 30,
            upload_timeout_secs: 60,
            download_timeout_secs: 60,
            tags: Vec::new(),
            correspondent: None,
            document_type: None,
            storage_path: None,
            input: DmsInputOptions {
                tagging_enabled: true,
                ..DmsInputOptions::default()
            },
        }
    }
}

impl fmt::Debug for DmsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmsOptions")
            .field("enabled", &self.enabled)
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("tags", &self.tags)
            .field("correspondent", &self.correspondent)
            .field("document_type", &self.document_type)
            .field("storage_path", &self.storage_path)
            .field("input", &self.input)
            .finish()
    }
}

/// Error detection and tagging policy (`errors.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorTagOptions {
    /// Whether error detection runs at all. Default: true.
    pub detection_enabled: bool,
    /// Tags applied to the input document when errors are detected.
    pub tags: Vec<String>,
    /// Only errors at these severities trigger tagging.
    /// Default: medium, high, critical.
    pub severity_levels: Vec<Severity>,
    /// Use the bulk-edit endpoint instead of per-document patches. Default: false.
    pub batch_tagging: bool,
}

impl Default for ErrorTagOptions {
    fn default() -> Self {
        Self {
            detection_enabled: true,
            tags: Vec::new(),
            severity_levels: vec![Severity::Medium, Severity::High, Severity::Critical],
            batch_tagging: false,
        }
    }
}

/// Output validation thresholds (`validation.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOptions {
    /// Minimum acceptable output file size in bytes. Default: 1024.
    pub min_output_bytes: u64,
    /// Lower bound on Σ(output sizes) / input size. Default: 0.5.
    pub size_ratio_min: f64,
    /// Upper bound on Σ(output sizes) / input size. Default: 3.0.
    ///
    /// Each output carries its own copy of shared document objects (fonts,
    /// xref), so the total legitimately exceeds the input for multi-statement
    /// bundles.
    pub size_ratio_max: f64,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            min_output_bytes: 1024,
            size_ratio_min: 0.5,
            size_ratio_max: 3.0,
        }
    }
}

/// Complete configuration for a pipeline run.
///
/// Built via [`Config::builder()`] or [`Config::default()`].
///
/// # Example
/// ```rust
/// use statement_split::Config;
///
/// let config = Config::builder()
///     .provider("none").unwrap()
///     .output_dir("/tmp/statements")
///     .min_fragment_pages(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub llm: LlmOptions,
    pub pipeline: PipelineOptions,
    pub output: OutputOptions,
    pub dms: DmsOptions,
    pub errors: ErrorTagOptions,
    pub validation: ValidationOptions,
    /// Batch-mode worker pool size. Default: 1.
    pub workers: usize,
}

impl Config {
    /// Create a new builder seeded with defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            config: Config {
                workers: 1,
                ..Config::default()
            },
        }
    }

    /// Whether the DMS integration is enabled *and* fully configured.
    pub fn dms_ready(&self) -> bool {
        self.dms.enabled && self.dms.base_url.is_some() && self.dms.token.is_some()
    }
}

/// Builder for [`Config`].
#[derive(Debug)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn provider(mut self, tag: &str) -> Result<Self, SplitError> {
        self.config.llm.provider = ProviderKind::parse(tag)?;
        Ok(self)
    }

    pub fn provider_kind(mut self, kind: ProviderKind) -> Self {
        self.config.llm.provider = kind;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.llm.model = Some(model.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.llm.api_key = Some(key.into());
        self
    }

    pub fn llm_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.llm.base_url = Some(url.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.llm.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.llm.max_tokens = n;
        self
    }

    pub fn requests_per_minute(mut self, n: u32) -> Self {
        self.config.llm.requests_per_minute = n.max(1);
        self
    }

    pub fn burst_limit(mut self, n: u32) -> Self {
        self.config.llm.burst_limit = n.max(1);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.llm.max_attempts = n.max(1);
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.pipeline.chunk_size = n.max(1000);
        self
    }

    pub fn chunk_overlap(mut self, n: usize) -> Self {
        self.config.pipeline.chunk_overlap = n;
        self
    }

    pub fn min_fragment_pages(mut self, n: usize) -> Self {
        self.config.pipeline.min_fragment_pages = n;
        self
    }

    pub fn max_filename_length(mut self, n: usize) -> Self {
        self.config.pipeline.max_filename_length = n;
        self
    }

    pub fn confidence_threshold(mut self, t: f32) -> Self {
        self.config.pipeline.confidence_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output.default_dir = dir.into();
        self
    }

    pub fn quarantine_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output.quarantine_dir = dir.into();
        self
    }

    pub fn dms_enabled(mut self, enabled: bool) -> Self {
        self.config.dms.enabled = enabled;
        self
    }

    pub fn dms_base_url(mut self, url: impl Into<String>) -> Self {
        let url: String = url.into();
        self.config.dms.base_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    pub fn dms_token(mut self, token: impl Into<String>) -> Self {
        self.config.dms.token = Some(token.into());
        self
    }

    pub fn dms_tags(mut self, tags: Vec<String>) -> Self {
        self.config.dms.tags = tags;
        self
    }

    pub fn dms_correspondent(mut self, name: impl Into<String>) -> Self {
        self.config.dms.correspondent = Some(name.into());
        self
    }

    pub fn dms_document_type(mut self, name: impl Into<String>) -> Self {
        self.config.dms.document_type = Some(name.into());
        self
    }

    pub fn dms_storage_path(mut self, name: impl Into<String>) -> Self {
        self.config.dms.storage_path = Some(name.into());
        self
    }

    pub fn dms_input(mut self, input: DmsInputOptions) -> Self {
        self.config.dms.input = input;
        self
    }

    pub fn error_tags(mut self, tags: Vec<String>) -> Self {
        self.config.errors.tags = tags;
        self
    }

    pub fn error_detection(mut self, enabled: bool) -> Self {
        self.config.errors.detection_enabled = enabled;
        self
    }

    pub fn error_severity_levels(mut self, levels: Vec<Severity>) -> Self {
        self.config.errors.severity_levels = levels;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    /// Build the configuration, validating cross-field constraints.
    pub fn build(self) -> Result<Config, SplitError> {
        let c = &self.config;

        if c.pipeline.chunk_overlap >= c.pipeline.chunk_size {
            return Err(SplitError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                c.pipeline.chunk_overlap, c.pipeline.chunk_size
            )));
        }
        if c.pipeline.max_filename_length < 20 {
            return Err(SplitError::Config(format!(
                "max_filename_length must be at least 20, got {}",
                c.pipeline.max_filename_length
            )));
        }
        if !(0.0..=1.0).contains(&c.pipeline.fallback_dedup_ratio) {
            return Err(SplitError::Config(
                "fallback_dedup_ratio must be within [0, 1]".into(),
            ));
        }
        if c.validation.size_ratio_min >= c.validation.size_ratio_max {
            return Err(SplitError::Config(
                "validation size_ratio_min must be below size_ratio_max".into(),
            ));
        }
        if c.dms.enabled && (c.dms.base_url.is_none() || c.dms.token.is_none()) {
            return Err(SplitError::Config(
                "DMS enabled but base_url or token missing".into(),
            ));
        }
        if c.llm.provider == ProviderKind::Cloud
            && c.llm.api_key.is_none()
            && c.llm.base_url.is_none()
        {
            // A key-less cloud config only makes sense against a local
            // OpenAI-compatible endpoint, which requires base_url.
            return Err(SplitError::Config(
                "cloud provider requires llm.api_key (or llm.base_url for a \
                 key-less compatible endpoint)"
                    .into(),
            ));
        }
        if c.workers == 0 {
            return Err(SplitError::Config("workers must be ≥ 1".into()));
        }

        Ok(self.config)
    }
}
