//! Error types for the statement-split library.
//!
//! One library-level error enum covers the whole pipeline; variants carry the
//! structured context a caller needs to act (paths, HTTP status, retryability).
//! The split that matters operationally is *retryable vs terminal*:
//!
//! * **Retryable** — rate-limit and transient-network failures from the LLM
//!   provider or the DMS. These are retried by the backoff combinator in
//!   [`crate::ratelimit`]; nothing else in the crate retries.
//!
//! * **Terminal** — everything else. The workflow engine converts a terminal
//!   error into a quarantined run with an `error_report.json` beside the
//!   artifacts, so no failure is silent.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the statement-split library.
#[derive(Debug, Error)]
pub enum SplitError {
    // ── Configuration ─────────────────────────────────────────────────────

    /// Builder or CLI-supplied configuration failed validation.
    #[error("Invalid configuration: {0}")]
    Config(String),

    // ── Input errors ──────────────────────────────────────────────────────

    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but does not start with the PDF header.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    InvalidFormat { path: PathBuf, magic: [u8; 4] },

    // ── Extraction (C1) ───────────────────────────────────────────────────

    /// The document could not be parsed at all (corrupt xref, truncated file).
    #[error("Text extraction failed for '{path}': {detail}")]
    Extraction { path: PathBuf, detail: String },

    // ── LLM provider (C2) ─────────────────────────────────────────────────

    /// The provider call failed. `retryable` is true for rate-limit and
    /// transient-network classes; false for malformed replies and auth errors.
    #[error("LLM provider '{provider}' error: {message}")]
    Provider {
        provider: String,
        message: String,
        retryable: bool,
    },

    /// The configured provider is not usable (missing API key, unreachable).
    #[error("LLM provider '{provider}' is not available.\n{hint}")]
    ProviderUnavailable { provider: String, hint: String },

    // ── Hallucination detector (C4) ───────────────────────────────────────

    /// The detector rejected a provider reply as structurally impossible.
    /// Not retryable within the same call; the analyzer decides whether to
    /// re-prompt once or fall back to the heuristic path.
    #[error("Provider response rejected: {alert_count} hallucination alert(s) — {detail}")]
    HallucinationRejected { alert_count: usize, detail: String },

    // ── Segment writer (C8) ───────────────────────────────────────────────

    /// Writing one output PDF failed. Fatal for the whole run: the partial
    /// output directory is quarantined.
    #[error("Failed to write segment '{filename}': {detail}")]
    SegmentWrite { filename: String, detail: String },

    // ── Validation (C9) ───────────────────────────────────────────────────

    /// The output validator reported an invalid run.
    #[error("Output validation failed: {summary}")]
    Validation { summary: String },

    // ── DMS client (C11) ──────────────────────────────────────────────────

    /// A DMS call failed. `retryable` is true for 5xx and transport errors.
    #[error("DMS error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Dms {
        message: String,
        status: Option<u16>,
        retryable: bool,
    },

    /// DMS integration was required but is not enabled/configured.
    #[error("DMS integration is not enabled or configured.\nSet dms.enabled, dms.base_url and dms.token.")]
    DmsDisabled,

    // ── Workflow (C12) ────────────────────────────────────────────────────

    /// The operator cancelled the run; in-flight calls were allowed to finish.
    #[error("Operation cancelled by operator")]
    Cancelled,

    // ── I/O errors ────────────────────────────────────────────────────────

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SplitError {
    /// Whether the backoff combinator may retry this error.
    ///
    /// Only rate-limit/transient provider failures and transient DMS
    /// failures qualify; every other variant surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            SplitError::Provider { retryable, .. } => *retryable,
            SplitError::Dms { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Shorthand for a retryable rate-limit provider error.
    pub(crate) fn rate_limited(provider: &str) -> Self {
        SplitError::Provider {
            provider: provider.to_string(),
            message: "rate limit".to_string(),
            retryable: true,
        }
    }

    /// Shorthand for a non-retryable malformed-reply provider error.
    pub(crate) fn invalid_response(provider: &str, detail: impl std::fmt::Display) -> Self {
        SplitError::Provider {
            provider: provider.to_string(),
            message: format!("invalid response: {detail}"),
            retryable: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_classification() {
        assert!(SplitError::rate_limited("cloud").is_retryable());
        assert!(!SplitError::invalid_response("cloud", "bad json").is_retryable());
        assert!(SplitError::Dms {
            message: "gateway".into(),
            status: Some(502),
            retryable: true
        }
        .is_retryable());
        assert!(!SplitError::Cancelled.is_retryable());
        assert!(!SplitError::Config("x".into()).is_retryable());
    }

    #[test]
    fn provider_error_message_includes_classification() {
        let e = SplitError::rate_limited("cloud");
        assert!(e.to_string().contains("rate limit"));
    }

    #[test]
    fn dms_error_formats_status() {
        let e = SplitError::Dms {
            message: "boom".into(),
            status: Some(503),
            retryable: true,
        };
        assert!(e.to_string().contains("HTTP 503"));
    }
}
