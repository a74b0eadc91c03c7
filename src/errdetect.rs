//! Error detection and DMS error tagging.
//!
//! The detector runs at the end of every pipeline execution, success or
//! failure, and classifies what it finds in the final workflow state into
//! typed errors with severities. Detection is pure — it reads the state and
//! the terminal error, and never touches the network.
//!
//! The tagger is the side-effecting half: when the DMS is configured and an
//! error at an allow-listed severity was detected, it annotates the *input*
//! document so an operator finds flagged bundles by tag instead of by log
//! archaeology. Tagging always merges — existing tags on the document are
//! fetched and preserved.

use crate::config::Config;
use crate::dms::DmsClient;
use crate::error::SplitError;
use crate::model::{DetectedError, ErrorKind, Severity, WorkflowState};
use tracing::{debug, info, warn};

// ── Detection ────────────────────────────────────────────────────────────

/// Classify the run's observations into typed errors, most severe first.
///
/// `terminal` is the error that ended the run, if any.
pub fn detect_errors(
    state: &WorkflowState,
    terminal: Option<&SplitError>,
    config: &Config,
) -> Vec<DetectedError> {
    let mut errors = Vec::new();
    let threshold = config.pipeline.confidence_threshold;

    if state.llm_analysis_failed {
        errors.push(DetectedError {
            kind: ErrorKind::LlmAnalysisFailure,
            severity: Severity::High,
            description: "LLM provider returned an error or was unavailable during boundary detection".into(),
            detected_value: None,
            suggestion: Some("check provider credentials and endpoint reachability".into()),
        });
    }

    let low_boundaries: Vec<String> = state
        .boundaries
        .iter()
        .filter(|b| b.confidence < threshold)
        .map(|b| format!("{}-{} ({:.2})", b.start_page, b.end_page, b.confidence))
        .collect();
    if !low_boundaries.is_empty() {
        errors.push(DetectedError {
            kind: ErrorKind::LowConfidenceBoundaries,
            severity: Severity::Medium,
            description: format!(
                "{} boundary(ies) below the {threshold:.2} confidence threshold",
                low_boundaries.len()
            ),
            detected_value: Some(low_boundaries.join(", ")),
            suggestion: Some("review the split manually".into()),
        });
    }

    let segment_failed = matches!(terminal, Some(SplitError::SegmentWrite { .. }));
    if segment_failed || (state.outputs.is_empty() && !state.boundaries.is_empty()) {
        errors.push(DetectedError {
            kind: ErrorKind::PdfProcessingError,
            severity: Severity::Critical,
            description: if segment_failed {
                "segment writer reported a failure".into()
            } else {
                format!(
                    "{} boundaries detected but no outputs were produced",
                    state.boundaries.len()
                )
            },
            detected_value: terminal.map(|e| e.to_string()),
            suggestion: Some("inspect the quarantined artifacts".into()),
        });
    }

    let low_metadata = state
        .metadata
        .iter()
        .filter(|m| m.confidence < threshold)
        .count();
    if low_metadata > 0 {
        errors.push(DetectedError {
            kind: ErrorKind::MetadataExtractionFailure,
            severity: Severity::Medium,
            description: format!(
                "{low_metadata} statement(s) with metadata confidence below {threshold:.2}"
            ),
            detected_value: None,
            suggestion: Some("verify bank, account and period on the outputs".into()),
        });
    }

    if let Some(validation) = &state.validation {
        if !validation.is_valid {
            errors.push(DetectedError {
                kind: ErrorKind::ValidationFailure,
                severity: Severity::High,
                description: validation.summary.clone(),
                detected_value: Some(validation.errors.join("; ")),
                suggestion: Some("the run was quarantined; compare outputs against the source".into()),
            });
        }
    }

    errors.sort_by(|a, b| b.severity.cmp(&a.severity));
    debug!(count = errors.len(), "error detection complete");
    errors
}

// ── Tagging ──────────────────────────────────────────────────────────────

/// What the tagger did, for the run record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggingReport {
    pub tagged: bool,
    pub applied_tags: Vec<String>,
    pub reason: String,
}

impl TaggingReport {
    fn skipped(reason: &str) -> Self {
        Self {
            tagged: false,
            applied_tags: Vec::new(),
            reason: reason.to_string(),
        }
    }
}

/// Whether the configured policy calls for tagging these errors.
pub fn should_tag(errors: &[DetectedError], config: &Config) -> bool {
    config.dms_ready()
        && config.errors.detection_enabled
        && !config.errors.tags.is_empty()
        && errors
            .iter()
            .any(|e| config.errors.severity_levels.contains(&e.severity))
}

/// Apply the configured error tags to the DMS representation of the input
/// document. Existing tags are preserved (merge semantics).
pub async fn tag_input_document(
    client: &DmsClient,
    config: &Config,
    document_id: u64,
    errors: &[DetectedError],
) -> Result<TaggingReport, SplitError> {
    if !config.errors.detection_enabled {
        return Ok(TaggingReport::skipped("error detection disabled"));
    }
    if config.errors.tags.is_empty() {
        return Ok(TaggingReport::skipped("no error tags configured"));
    }
    if !errors
        .iter()
        .any(|e| config.errors.severity_levels.contains(&e.severity))
    {
        return Ok(TaggingReport::skipped(
            "no detected error reaches the configured severity levels",
        ));
    }

    if config.errors.batch_tagging {
        for tag in &config.errors.tags {
            client.bulk_add_tag(&[document_id], tag).await?;
        }
    } else {
        client.apply_tags(document_id, &config.errors.tags).await?;
    }

    info!(
        document_id,
        tags = ?config.errors.tags,
        "tagged input document with error tags"
    );
    Ok(TaggingReport {
        tagged: true,
        applied_tags: config.errors.tags.clone(),
        reason: format!("{} error(s) at tagged severities", errors.len()),
    })
}

/// Tag the input document, degrading to a warning when tagging itself
/// fails. A tagging failure must never mask the run's real outcome.
pub async fn tag_input_document_best_effort(
    client: &DmsClient,
    config: &Config,
    document_id: u64,
    errors: &[DetectedError],
) -> TaggingReport {
    match tag_input_document(client, config, document_id, errors).await {
        Ok(report) => report,
        Err(e) => {
            warn!(document_id, error = %e, "error tagging failed");
            TaggingReport {
                tagged: false,
                applied_tags: Vec::new(),
                reason: format!("tagging failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Boundary, CheckResult, StatementMetadata, ValidationReport, WorkflowState};

    fn config() -> Config {
        Config::builder().provider("none").unwrap().build().unwrap()
    }

    fn state() -> WorkflowState {
        WorkflowState::new("/tmp/in.pdf", "/tmp/out")
    }

    fn boundary(confidence: f32) -> Boundary {
        Boundary {
            start_page: 1,
            end_page: 2,
            account_number: None,
            bank_name: None,
            confidence,
            reasoning: None,
        }
    }

    fn failed_validation() -> ValidationReport {
        ValidationReport {
            file_count: CheckResult::failed("Missing 1 files: x.pdf"),
            page_count: CheckResult::passed(""),
            file_size: CheckResult::passed(""),
            content_sampling: CheckResult::passed(""),
            is_valid: false,
            summary: "1 of 4 validation checks failed".into(),
            errors: vec!["Missing 1 files: x.pdf".into()],
        }
    }

    #[test]
    fn clean_run_detects_nothing() {
        let mut s = state();
        s.boundaries = vec![boundary(0.9)];
        s.outputs = vec![crate::model::OutputArtifact {
            path: "/tmp/out/a.pdf".into(),
            filename: "a.pdf".into(),
            boundary: boundary(0.9),
            size_bytes: 2048,
            page_count: 2,
        }];
        s.metadata = vec![StatementMetadata {
            confidence: 0.9,
            ..StatementMetadata::default()
        }];
        assert!(detect_errors(&s, None, &config()).is_empty());
    }

    #[test]
    fn llm_failure_is_high() {
        let mut s = state();
        s.llm_analysis_failed = true;
        let errors = detect_errors(&s, None, &config());
        assert_eq!(errors[0].kind, ErrorKind::LlmAnalysisFailure);
        assert_eq!(errors[0].severity, Severity::High);
    }

    #[test]
    fn low_confidence_boundaries_are_medium() {
        let mut s = state();
        s.boundaries = vec![boundary(0.3), boundary(0.9)];
        // Pretend outputs were produced so PdfProcessingError stays quiet.
        s.outputs = vec![crate::model::OutputArtifact {
            path: "/tmp/out/a.pdf".into(),
            filename: "a.pdf".into(),
            boundary: boundary(0.9),
            size_bytes: 2048,
            page_count: 2,
        }];
        let errors = detect_errors(&s, None, &config());
        let low: Vec<_> = errors
            .iter()
            .filter(|e| e.kind == ErrorKind::LowConfidenceBoundaries)
            .collect();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].severity, Severity::Medium);
        assert!(low[0].detected_value.as_ref().unwrap().contains("0.30"));
    }

    #[test]
    fn missing_outputs_despite_boundaries_is_critical() {
        let mut s = state();
        s.boundaries = vec![boundary(0.9)];
        let errors = detect_errors(&s, None, &config());
        let pdf: Vec<_> = errors
            .iter()
            .filter(|e| e.kind == ErrorKind::PdfProcessingError)
            .collect();
        assert_eq!(pdf.len(), 1);
        assert_eq!(pdf[0].severity, Severity::Critical);
    }

    #[test]
    fn segment_write_terminal_error_is_critical() {
        let mut s = state();
        s.boundaries = vec![boundary(0.9)];
        let terminal = SplitError::SegmentWrite {
            filename: "x.pdf".into(),
            detail: "disk full".into(),
        };
        let errors = detect_errors(&s, Some(&terminal), &config());
        assert_eq!(errors[0].kind, ErrorKind::PdfProcessingError);
        assert!(errors[0].detected_value.as_ref().unwrap().contains("disk full"));
    }

    #[test]
    fn low_metadata_confidence_is_medium() {
        let mut s = state();
        s.metadata = vec![StatementMetadata {
            confidence: 0.2,
            ..StatementMetadata::default()
        }];
        let errors = detect_errors(&s, None, &config());
        assert!(errors
            .iter()
            .any(|e| e.kind == ErrorKind::MetadataExtractionFailure
                && e.severity == Severity::Medium));
    }

    #[test]
    fn validation_failure_is_high() {
        let mut s = state();
        s.validation = Some(failed_validation());
        let errors = detect_errors(&s, None, &config());
        assert!(errors
            .iter()
            .any(|e| e.kind == ErrorKind::ValidationFailure && e.severity == Severity::High));
    }

    #[test]
    fn errors_are_sorted_most_severe_first() {
        let mut s = state();
        s.llm_analysis_failed = true; // high
        s.boundaries = vec![boundary(0.3)]; // medium + critical (no outputs)
        s.validation = Some(failed_validation()); // high
        let errors = detect_errors(&s, None, &config());
        for w in errors.windows(2) {
            assert!(w[0].severity >= w[1].severity);
        }
        assert_eq!(errors[0].severity, Severity::Critical);
    }

    #[test]
    fn tagging_policy_gates() {
        let detected = vec![DetectedError {
            kind: ErrorKind::LlmAnalysisFailure,
            severity: Severity::High,
            description: "x".into(),
            detected_value: None,
            suggestion: None,
        }];
        let low_only = vec![DetectedError {
            severity: Severity::Low,
            ..detected[0].clone()
        }];

        // DMS off → never.
        assert!(!should_tag(&detected, &config()));

        let ready = Config::builder()
            .provider("none")
            .unwrap()
            .dms_enabled(true)
            .dms_base_url("https://dms.example.com")
            .dms_token("t")
            .error_tags(vec!["error:detected".into()])
            .build()
            .unwrap();
        assert!(should_tag(&detected, &ready));
        // Low severity is not in the default allow-list.
        assert!(!should_tag(&low_only, &ready));
        assert!(!should_tag(&[], &ready));

        let detection_off = Config::builder()
            .provider("none")
            .unwrap()
            .dms_enabled(true)
            .dms_base_url("https://dms.example.com")
            .dms_token("t")
            .error_tags(vec!["error:detected".into()])
            .error_detection(false)
            .build()
            .unwrap();
        assert!(!should_tag(&detected, &detection_off));
    }

    #[tokio::test]
    async fn tagging_merges_with_existing_tags() {
        use wiremock::matchers::{body_partial_json, method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        for (name, id) in [("processing:needs-review", 31u64), ("error:detected", 32u64)] {
            Mock::given(method("GET"))
                .and(path("/api/tags/"))
                .and(query_param("name__iexact", name))
                .respond_with(ResponseTemplate::new(200).set_body_json(
                    serde_json::json!({"results": [{"id": id, "name": name}]}),
                ))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/api/documents/9/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"id": 9, "title": "input.pdf", "tags": [5]}),
            ))
            .mount(&server)
            .await;
        // Existing tag 5 must survive the merge.
        Mock::given(method("PATCH"))
            .and(path("/api/documents/9/"))
            .and(body_partial_json(serde_json::json!({"tags": [5, 31, 32]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let config = Config::builder()
            .provider("none")
            .unwrap()
            .dms_enabled(true)
            .dms_base_url(server.uri())
            .dms_token("t")
            .error_tags(vec!["processing:needs-review".into(), "error:detected".into()])
            .build()
            .unwrap();
        let client = DmsClient::new(&config.dms).unwrap();

        let errors = vec![DetectedError {
            kind: ErrorKind::ValidationFailure,
            severity: Severity::High,
            description: "validation failed".into(),
            detected_value: None,
            suggestion: None,
        }];

        let report = tag_input_document(&client, &config, 9, &errors).await.unwrap();
        assert!(report.tagged);
        assert_eq!(report.applied_tags.len(), 2);
    }

    #[tokio::test]
    async fn low_severity_errors_do_not_tag() {
        let config = Config::builder()
            .provider("none")
            .unwrap()
            .dms_enabled(true)
            .dms_base_url("http://127.0.0.1:1") // would fail if contacted
            .dms_token("t")
            .error_tags(vec!["error:detected".into()])
            .build()
            .unwrap();
        let client = DmsClient::new(&config.dms).unwrap();

        let errors = vec![DetectedError {
            kind: ErrorKind::LowConfidenceBoundaries,
            severity: Severity::Low,
            description: "minor".into(),
            detected_value: None,
            suggestion: None,
        }];

        let report = tag_input_document(&client, &config, 1, &errors).await.unwrap();
        assert!(!report.tagged);
        assert!(report.reason.contains("severity"));
    }
}
