//! Core data model for the statement-segmentation pipeline.
//!
//! The types here are deliberately plain: serde-friendly structs that flow
//! between pipeline stages, with the invariants that matter documented on the
//! type. Stage logic lives in [`crate::pipeline`]; the workflow state record
//! that threads everything together is at the bottom of this module.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ── Severity ─────────────────────────────────────────────────────────────

/// Totally ordered severity scale used by hallucination alerts and detected
/// workflow errors: `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse a lowercase severity name as it appears in configuration.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

// ── Source document ──────────────────────────────────────────────────────

/// An ingested source PDF. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub path: PathBuf,
    /// Physical page count, never fabricated.
    pub page_count: usize,
    pub size_bytes: u64,
}

/// Extracted text for one page. `text` may be empty for image-only pages.
///
/// Invariant: a document's `PageText` list has exactly `page_count` entries,
/// in page order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    /// 1-based page index.
    pub index: usize,
    pub text: String,
}

// ── Boundaries ───────────────────────────────────────────────────────────

/// A contiguous page range describing one statement within a bundle.
///
/// Invariants (enforced by the boundary analyzer's post-processing):
/// `1 ≤ start_page ≤ end_page ≤ page_count`; no two boundaries share the
/// (start, end, account) triple; boundaries are sorted by `start_page`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    pub start_page: usize,
    pub end_page: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_name: Option<String>,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Boundary {
    /// Number of pages covered (inclusive range).
    pub fn page_run(&self) -> usize {
        self.end_page.saturating_sub(self.start_page) + 1
    }
}

// ── Statement metadata ───────────────────────────────────────────────────

/// The period a statement covers. For ranges, the end date is authoritative
/// for filenames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementPeriod {
    Single(NaiveDate),
    Range { start: NaiveDate, end: NaiveDate },
    /// Unparseable period text, carried verbatim for reports.
    Unknown(String),
}

impl StatementPeriod {
    /// The date used in filenames: the end of a range, the single date, or
    /// `None` when unknown.
    pub fn filename_date(&self) -> Option<NaiveDate> {
        match self {
            StatementPeriod::Single(d) => Some(*d),
            StatementPeriod::Range { end, .. } => Some(*end),
            StatementPeriod::Unknown(_) => None,
        }
    }
}

impl Default for StatementPeriod {
    fn default() -> Self {
        StatementPeriod::Unknown(String::new())
    }
}

/// Per-boundary statement metadata.
///
/// Invariants: `account_last4` equals the last four digits of
/// `account_number` when it has ≥ 4 digits, otherwise the literal `"0000"`.
/// A missing bank defaults to `"unknown"`; a missing date renders as
/// `"unknown-date"` in filenames.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatementMetadata {
    /// Raw bank name as reported (normalisation happens in the filename
    /// builder).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_name: Option<String>,
    /// Digits-only account number after separator stripping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    pub account_last4: String,
    #[serde(default)]
    pub period: StatementPeriod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    pub confidence: f32,
}

/// Strip separators and return the digits of an account string.
pub fn account_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Last four digits of an account string, or `"0000"` when fewer than four
/// digits are present.
pub fn account_last4(raw: &str) -> String {
    let digits = account_digits(raw);
    if digits.len() >= 4 {
        digits[digits.len() - 4..].to_string()
    } else {
        "0000".to_string()
    }
}

// ── Outputs ──────────────────────────────────────────────────────────────

/// A generated per-statement PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub path: PathBuf,
    pub filename: String,
    pub boundary: Boundary,
    pub size_bytes: u64,
    pub page_count: usize,
}

// ── Validation ───────────────────────────────────────────────────────────

/// Result of one validation tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub passed: bool,
    pub details: String,
}

impl CheckResult {
    pub fn passed(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            details: details.into(),
        }
    }

    pub fn failed(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: details.into(),
        }
    }
}

/// Structured report from the four-tier output validator.
///
/// The validator never errors: a catastrophic probe failure is reported as a
/// failed check, and the workflow decides what to do with the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub file_count: CheckResult,
    pub page_count: CheckResult,
    pub file_size: CheckResult,
    pub content_sampling: CheckResult,
    pub is_valid: bool,
    pub summary: String,
    pub errors: Vec<String>,
}

// ── Error detection ──────────────────────────────────────────────────────

/// Classification of workflow errors produced by the error detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    LlmAnalysisFailure,
    LowConfidenceBoundaries,
    PdfProcessingError,
    MetadataExtractionFailure,
    ValidationFailure,
}

/// One detected workflow error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Structured report written to `error_report.json` on a failed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub input: PathBuf,
    /// Stage at which the run failed.
    pub stage: String,
    /// Terminal error message.
    pub error: String,
    /// All detected errors, most severe first.
    pub errors: Vec<DetectedError>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Provider attempts consumed before failure.
    pub attempts: u32,
    /// Paths of any partial outputs that were quarantined.
    pub outputs: Vec<PathBuf>,
}

// ── DMS ──────────────────────────────────────────────────────────────────

/// A document as represented in the DMS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmsDocumentRef {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<u64>,
    #[serde(default)]
    pub correspondent: Option<u64>,
    #[serde(default)]
    pub document_type: Option<u64>,
    #[serde(default)]
    pub storage_path: Option<u64>,
}

/// Result of posting a document to the DMS: either the indexer ran
/// synchronously and produced a document id, or the ingest was queued and a
/// task id must be polled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadOutcome {
    Immediate(u64),
    Queued(String),
}

/// Outcome of one output-artifact upload, recorded in the workflow state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResult {
    pub filename: String,
    pub title: String,
    pub outcome: UploadOutcome,
}

// ── Cancellation ─────────────────────────────────────────────────────────

/// Cooperative cancellation signal threaded through the workflow state.
///
/// Cheap to clone; stages check it at their boundaries and inside provider
/// wait loops. In-flight network calls are allowed to complete (or hit their
/// own deadline) before the pipeline transitions to quarantine.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ── Workflow state ───────────────────────────────────────────────────────

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ExtractText,
    DetectBoundaries,
    ExtractMetadata,
    WriteSegments,
    ValidateOutputs,
    TagOrUpload,
    Finalize,
}

impl Stage {
    /// The stage that follows this one, or `None` after finalize.
    pub fn next(self) -> Option<Stage> {
        use Stage::*;
        match self {
            ExtractText => Some(DetectBoundaries),
            DetectBoundaries => Some(ExtractMetadata),
            ExtractMetadata => Some(WriteSegments),
            WriteSegments => Some(ValidateOutputs),
            ValidateOutputs => Some(TagOrUpload),
            TagOrUpload => Some(Finalize),
            Finalize => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::ExtractText => "extract_text",
            Stage::DetectBoundaries => "detect_boundaries",
            Stage::ExtractMetadata => "extract_metadata",
            Stage::WriteSegments => "write_segments",
            Stage::ValidateOutputs => "validate_outputs",
            Stage::TagOrUpload => "tag_or_upload",
            Stage::Finalize => "finalize",
        };
        f.write_str(s)
    }
}

/// The mutable record threaded through the workflow engine.
///
/// Ownership: the engine exclusively owns the state; stage functions receive
/// it by value and return it, and may not retain references past their
/// return.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub current_stage: Stage,
    pub source: Option<SourceDocument>,
    pub page_texts: Vec<PageText>,
    pub boundaries: Vec<Boundary>,
    pub metadata: Vec<StatementMetadata>,
    pub outputs: Vec<OutputArtifact>,
    pub validation: Option<ValidationReport>,
    pub upload_results: Vec<UploadResult>,
    pub detected_errors: Vec<DetectedError>,
    pub error_message: Option<String>,
    /// Fragments coalesced by boundary post-processing.
    pub skipped_fragments: usize,
    /// Whether the provider errored or was unavailable during analysis
    /// (drives the LlmAnalysisFailure classification).
    pub llm_analysis_failed: bool,
    /// Provider attempts consumed, for the error report.
    pub provider_attempts: u32,
    /// DMS id of the input document when it originated from the DMS.
    pub dms_source_id: Option<u64>,
    pub cancel: CancelToken,
}

impl WorkflowState {
    pub fn new(input_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_dir: output_dir.into(),
            current_stage: Stage::ExtractText,
            source: None,
            page_texts: Vec::new(),
            boundaries: Vec::new(),
            metadata: Vec::new(),
            outputs: Vec::new(),
            validation: None,
            upload_results: Vec::new(),
            detected_errors: Vec::new(),
            error_message: None,
            skipped_fragments: 0,
            llm_analysis_failed: false,
            provider_attempts: 0,
            dms_source_id: None,
            cancel: CancelToken::new(),
        }
    }

    /// Concatenated text of all pages, in page order.
    pub fn joined_text(&self) -> String {
        self.page_texts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Concatenated text for a page range (1-based, inclusive).
    pub fn slice_text(&self, start_page: usize, end_page: usize) -> String {
        self.page_texts
            .iter()
            .filter(|p| p.index >= start_page && p.index <= end_page)
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_is_totally_ordered() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn severity_parses_config_names() {
        assert_eq!(Severity::parse("critical"), Some(Severity::Critical));
        assert_eq!(Severity::parse("HIGH"), Some(Severity::High));
        assert_eq!(Severity::parse("fatal"), None);
    }

    #[test]
    fn account_last4_rules() {
        assert_eq!(account_last4("4293 1831 9017 2819"), "2819");
        assert_eq!(account_last4("1234567890123456"), "3456");
        assert_eq!(account_last4("12345"), "2345");
        assert_eq!(account_last4("123"), "0000");
        assert_eq!(account_last4(""), "0000");
        assert_eq!(account_last4("ABCD1234EFGH"), "1234");
        assert_eq!(account_last4("No digits here!"), "0000");
    }

    #[test]
    fn period_filename_date_prefers_range_end() {
        let start = NaiveDate::from_ymd_opt(2015, 4, 22).unwrap();
        let end = NaiveDate::from_ymd_opt(2015, 5, 21).unwrap();
        assert_eq!(
            StatementPeriod::Range { start, end }.filename_date(),
            Some(end)
        );
        assert_eq!(
            StatementPeriod::Single(start).filename_date(),
            Some(start)
        );
        assert_eq!(
            StatementPeriod::Unknown("n/a".into()).filename_date(),
            None
        );
    }

    #[test]
    fn boundary_page_run_is_inclusive() {
        let b = Boundary {
            start_page: 3,
            end_page: 5,
            account_number: None,
            bank_name: None,
            confidence: 0.9,
            reasoning: None,
        };
        assert_eq!(b.page_run(), 3);
    }

    #[test]
    fn stage_order_is_total() {
        let mut stage = Stage::ExtractText;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(stage, Stage::Finalize);
    }

    #[test]
    fn cancel_token_propagates() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn slice_text_is_page_bounded() {
        let mut state = WorkflowState::new("/tmp/in.pdf", "/tmp/out");
        state.page_texts = vec![
            PageText { index: 1, text: "one".into() },
            PageText { index: 2, text: "two".into() },
            PageText { index: 3, text: "three".into() },
        ];
        assert_eq!(state.slice_text(2, 3), "two\nthree");
        assert_eq!(state.slice_text(1, 1), "one");
    }
}
