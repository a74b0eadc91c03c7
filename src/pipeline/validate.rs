//! Output validation: four independent checks against the source document.
//!
//! The validator answers one question — "can these outputs be trusted as a
//! faithful split of the input?" — with evidence, not a verdict alone. Each
//! tier catches a different failure mode:
//!
//! 1. **File count** — a segment writer that silently skipped a statement.
//! 2. **Page count** — outputs that exist but dropped or duplicated pages.
//! 3. **File size** — truncated writes (below an absolute floor) and
//!    catastrophic loss or inflation (total size outside a ratio band of
//!    the input).
//! 4. **Content sampling** — outputs whose first and last pages' text is not
//!    found in the corresponding source pages: the strongest signal that a
//!    page range was mapped to the wrong content.
//!
//! The validator never errors. Probe failures (an output that cannot be
//! parsed) are reported as failed checks; the workflow decides whether to
//! quarantine.

use crate::config::ValidationOptions;
use crate::heuristics::normalize_whitespace;
use crate::model::{
    CheckResult, OutputArtifact, PageText, SourceDocument, ValidationReport,
};
use lopdf::Document;
use std::path::Path;
use tracing::{debug, info};

/// Run all four checks and produce the structured report.
pub async fn validate_outputs(
    source: &SourceDocument,
    page_texts: &[PageText],
    outputs: &[OutputArtifact],
    expected_count: usize,
    options: &ValidationOptions,
) -> ValidationReport {
    let source = source.clone();
    let page_texts = page_texts.to_vec();
    let outputs = outputs.to_vec();
    let options = options.clone();

    tokio::task::spawn_blocking(move || {
        validate_blocking(&source, &page_texts, &outputs, expected_count, &options)
    })
    .await
    .unwrap_or_else(|e| {
        // A panicked probe is itself a validation failure, not a crash.
        failure_report(format!("validation task panicked: {e}"))
    })
}

fn validate_blocking(
    source: &SourceDocument,
    page_texts: &[PageText],
    outputs: &[OutputArtifact],
    expected_count: usize,
    options: &ValidationOptions,
) -> ValidationReport {
    let file_count = check_file_count(outputs, expected_count);
    let page_count = check_page_count(outputs, source.page_count);
    let file_size = check_file_size(outputs, source.size_bytes, options);
    let content_sampling = check_content_sampling(outputs, page_texts);

    let checks = [&file_count, &page_count, &file_size, &content_sampling];
    let failed: Vec<String> = checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| c.details.clone())
        .collect();
    let is_valid = failed.is_empty();

    let summary = if is_valid {
        "All 4 validation checks passed".to_string()
    } else {
        format!("{} of 4 validation checks failed", failed.len())
    };

    if is_valid {
        info!("output validation passed");
    } else {
        info!(failed = failed.len(), "output validation failed");
    }

    ValidationReport {
        file_count,
        page_count,
        file_size,
        content_sampling,
        is_valid,
        summary,
        errors: failed,
    }
}

// ── Tier 1: file count ───────────────────────────────────────────────────

fn check_file_count(outputs: &[OutputArtifact], expected: usize) -> CheckResult {
    let missing: Vec<&OutputArtifact> =
        outputs.iter().filter(|o| !o.path.exists()).collect();

    if outputs.len() != expected {
        return CheckResult::failed(format!(
            "Expected {expected} output file(s) but {} were produced",
            outputs.len()
        ));
    }
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(|o| o.filename.as_str()).collect();
        return CheckResult::failed(format!(
            "Missing {} files: {}",
            missing.len(),
            names.join(", ")
        ));
    }
    CheckResult::passed(format!("All {expected} output files present"))
}

// ── Tier 2: page count ───────────────────────────────────────────────────

fn check_page_count(outputs: &[OutputArtifact], source_pages: usize) -> CheckResult {
    let mut total = 0usize;
    for output in outputs {
        match probe_page_count(&output.path) {
            Ok(n) => total += n,
            Err(e) => {
                return CheckResult::failed(format!(
                    "Could not read page count of '{}': {e}",
                    output.filename
                ))
            }
        }
    }

    if total == source_pages {
        CheckResult::passed(format!(
            "Output pages sum to the source page count ({source_pages})"
        ))
    } else {
        CheckResult::failed(format!(
            "Output pages sum to {total} but the source has {source_pages}"
        ))
    }
}

fn probe_page_count(path: &Path) -> Result<usize, String> {
    Document::load(path)
        .map(|d| d.get_pages().len())
        .map_err(|e| e.to_string())
}

// ── Tier 3: file size ────────────────────────────────────────────────────

fn check_file_size(
    outputs: &[OutputArtifact],
    source_bytes: u64,
    options: &ValidationOptions,
) -> CheckResult {
    let mut total: u64 = 0;
    for output in outputs {
        let size = std::fs::metadata(&output.path).map(|m| m.len()).unwrap_or(0);
        if size < options.min_output_bytes {
            return CheckResult::failed(format!(
                "'{}' is {size} bytes, below the {}-byte floor",
                output.filename, options.min_output_bytes
            ));
        }
        total += size;
    }

    if source_bytes > 0 && !outputs.is_empty() {
        let ratio = total as f64 / source_bytes as f64;
        if ratio < options.size_ratio_min || ratio > options.size_ratio_max {
            return CheckResult::failed(format!(
                "Total output size is {ratio:.2}x the input (allowed {:.2}x–{:.2}x)",
                options.size_ratio_min, options.size_ratio_max
            ));
        }
        debug!(ratio, "output size ratio");
    }

    CheckResult::passed(format!("All outputs within size bounds ({total} bytes total)"))
}

// ── Tier 4: content sampling ─────────────────────────────────────────────

fn check_content_sampling(
    outputs: &[OutputArtifact],
    page_texts: &[PageText],
) -> CheckResult {
    for output in outputs {
        let doc = match Document::load(&output.path) {
            Ok(d) => d,
            Err(e) => {
                return CheckResult::failed(format!(
                    "Could not parse '{}' for sampling: {e}",
                    output.filename
                ))
            }
        };
        let pages = doc.get_pages().len() as u32;
        if pages == 0 {
            return CheckResult::failed(format!("'{}' has no pages", output.filename));
        }

        // First and last page of the output map onto the boundary's start
        // and end pages of the source.
        let samples = [
            (1u32, output.boundary.start_page),
            (pages, output.boundary.end_page),
        ];
        for (out_page, src_page) in samples {
            let out_text = doc
                .extract_text(&[out_page])
                .map(|t| normalize_whitespace(&t))
                .unwrap_or_default();
            let src_text = page_texts
                .iter()
                .find(|p| p.index == src_page)
                .map(|p| normalize_whitespace(&p.text))
                .unwrap_or_default();

            if src_text.is_empty() {
                // Image-only source page: nothing to compare against.
                continue;
            }
            if out_text.is_empty() || !src_text.contains(&out_text) {
                return CheckResult::failed(format!(
                    "'{}' page {out_page} text does not match source page {src_page}",
                    output.filename
                ));
            }
        }
    }

    CheckResult::passed("Sampled pages match the source text".to_string())
}

/// Report used when the validation machinery itself failed.
fn failure_report(detail: String) -> ValidationReport {
    let failed = CheckResult::failed(detail.clone());
    ValidationReport {
        file_count: failed.clone(),
        page_count: failed.clone(),
        file_size: failed.clone(),
        content_sampling: failed,
        is_valid: false,
        summary: "Validation could not run".to_string(),
        errors: vec![detail],
    }
}
