//! # statement-split
//!
//! Split bundled bank-statement PDFs into per-statement files using LLM
//! boundary detection with a deterministic fallback.
//!
//! ## Why this crate?
//!
//! Scanned statement bundles arrive as one PDF holding several statements
//! back to back. Splitting them by hand means finding each statement's page
//! range, reading off the bank, account, and period, naming the file, and
//! filing it — clerical work that an LLM does well and a set of regexes
//! does acceptably when no model is reachable. This crate automates the
//! whole path and *distrusts the model by construction*: every reply passes
//! a hallucination detector, every run passes a four-tier output validator,
//! and failures land in a quarantine directory with a structured report
//! instead of producing confidently wrong files.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bundle
//!  │
//!  ├─ 1. Extract    per-page text via lopdf
//!  ├─ 2. Boundaries LLM analysis (rate-limited, hallucination-checked)
//!  │                 with heuristic fallback
//!  ├─ 3. Metadata   bank / account / period per statement
//!  ├─ 4. Segments   one PDF per statement, atomic writes
//!  ├─ 5. Validate   file count, page count, sizes, content sampling
//!  └─ 6. Route      success → DMS upload + input tagging
//!                   failure → quarantine + error report + error tags
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use statement_split::{CancelToken, Config, Workflow};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::builder()
//!         .api_key(std::env::var("OPENAI_API_KEY")?)
//!         .output_dir("./statements")
//!         .build()?;
//!
//!     let workflow = Workflow::new(config)?;
//!     let outcome = workflow
//!         .run("bundle.pdf".as_ref(), CancelToken::new())
//!         .await;
//!
//!     for output in &outcome.state.outputs {
//!         println!("{} ({} pages)", output.filename, output.page_count);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `stmt-split` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! statement-split = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod dms;
pub mod errdetect;
pub mod error;
pub mod hallucination;
pub mod heuristics;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod ratelimit;
pub mod testutil;
pub mod workflow;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Config, ConfigBuilder, ProviderKind};
pub use dms::{DmsClient, DocumentFilters, DocumentUpload, MarkOutcome};
pub use error::SplitError;
pub use llm::{BoundaryResult, LlmProvider, MetadataResult, ProviderInfo};
pub use model::{
    Boundary, CancelToken, DetectedError, ErrorKind, ErrorReport, OutputArtifact,
    Severity, Stage, StatementMetadata, StatementPeriod, UploadOutcome, ValidationReport,
    WorkflowState,
};
pub use ratelimit::{BackoffPolicy, RateLimiter, RateLimitSettings};
pub use workflow::{RunOutcome, Workflow};
