//! Metadata extraction: bank, account, and period for each boundary.
//!
//! Mirrors the boundary analyzer's two-path shape: the provider is asked
//! about each segment's text, the reply is judged by the hallucination
//! detector's metadata rules, and a rejection or provider failure degrades
//! to the deterministic fallback (known-institutions scan, the shared
//! account patterns, tolerant date parsing). Unlike boundary analysis,
//! metadata extraction never fails the pipeline — a statement with unknown
//! metadata still gets a filename from the fallback components.

use crate::config::Config;
use crate::error::SplitError;
use crate::hallucination::{self, MetadataClaim};
use crate::heuristics;
use crate::llm::{LlmProvider, MetadataResult};
use crate::model::{
    account_digits, account_last4, Boundary, CancelToken, PageText, StatementMetadata,
    StatementPeriod,
};
use crate::pipeline::boundaries::{head_chunk, HEURISTIC_CONFIDENCE};
use crate::ratelimit::{acquire_with_wait, retry, BackoffPolicy, RateLimiter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of the metadata stage.
#[derive(Debug, Clone)]
pub struct MetadataAnalysis {
    pub metadata: Vec<StatementMetadata>,
    /// Provider attempts consumed across all boundaries.
    pub attempts: u32,
}

/// Extract metadata for every boundary, in boundary order.
pub async fn extract_all_metadata(
    provider: Option<&Arc<dyn LlmProvider>>,
    limiter: &RateLimiter,
    config: &Config,
    page_texts: &[PageText],
    boundaries: &[Boundary],
    cancel: &CancelToken,
) -> Result<MetadataAnalysis, SplitError> {
    // Probe once for the whole stage, not once per boundary.
    let provider = match provider {
        Some(p) => {
            if p.is_available().await {
                Some(p)
            } else {
                warn!(provider = %p.info().name, "provider unavailable; metadata falls back to heuristics");
                None
            }
        }
        None => None,
    };

    let mut attempts = 0u32;
    let mut metadata = Vec::with_capacity(boundaries.len());

    for boundary in boundaries {
        if cancel.is_cancelled() {
            return Err(SplitError::Cancelled);
        }
        let segment_text = slice_pages(page_texts, boundary.start_page, boundary.end_page);
        let entry = match provider {
            Some(p) => {
                extract_one(
                    p,
                    limiter,
                    config,
                    &segment_text,
                    boundary,
                    cancel,
                    &mut attempts,
                )
                .await?
            }
            None => fallback_metadata(&segment_text, boundary),
        };
        metadata.push(entry);
    }

    info!(
        statements = metadata.len(),
        attempts, "metadata extraction complete"
    );
    Ok(MetadataAnalysis { metadata, attempts })
}

/// Provider-first extraction for one boundary, falling back on rejection or
/// failure.
async fn extract_one(
    provider: &Arc<dyn LlmProvider>,
    limiter: &RateLimiter,
    config: &Config,
    segment_text: &str,
    boundary: &Boundary,
    cancel: &CancelToken,
    attempts: &mut u32,
) -> Result<StatementMetadata, SplitError> {
    acquire_with_wait(limiter, cancel).await?;

    let chunk = head_chunk(segment_text, config.pipeline.chunk_size);
    let policy = BackoffPolicy::new(
        config.llm.max_attempts,
        Duration::from_millis(config.llm.backoff_base_ms),
    );

    let result = retry(&policy, |attempt| {
        *attempts += 1;
        debug!(
            start = boundary.start_page,
            end = boundary.end_page,
            attempt,
            "submitting metadata extraction"
        );
        provider.extract_metadata(chunk, boundary.start_page, boundary.end_page)
    })
    .await;

    match result {
        Ok(reply) => {
            let claim = MetadataClaim {
                bank_name: reply.bank_name.as_deref(),
                account_number: reply.account_number.as_deref(),
                period: reply.statement_period.as_deref(),
            };
            let alerts = hallucination::check_metadata(
                claim,
                segment_text,
                (boundary.start_page, boundary.end_page),
            );
            if hallucination::should_reject(&alerts) {
                warn!(
                    start = boundary.start_page,
                    "metadata reply rejected; using heuristic fallback"
                );
                Ok(fallback_metadata(segment_text, boundary))
            } else {
                Ok(from_provider_reply(reply, segment_text, boundary))
            }
        }
        Err(SplitError::Cancelled) => Err(SplitError::Cancelled),
        Err(e) => {
            warn!(error = %e, start = boundary.start_page, "metadata extraction failed; using heuristic fallback");
            Ok(fallback_metadata(segment_text, boundary))
        }
    }
}

/// Normalise an accepted provider reply into typed metadata, filling holes
/// from the boundary and the segment text.
fn from_provider_reply(
    reply: MetadataResult,
    segment_text: &str,
    boundary: &Boundary,
) -> StatementMetadata {
    let account_raw = reply
        .account_number
        .or_else(|| boundary.account_number.clone());
    let account_number = account_raw
        .as_deref()
        .map(account_digits)
        .filter(|d| !d.is_empty());

    let period = reply
        .statement_period
        .as_deref()
        .map(heuristics::parse_period)
        .unwrap_or_default();

    let statement_date = reply
        .statement_date
        .as_deref()
        .and_then(heuristics::parse_flexible_date)
        .or_else(|| period.filename_date())
        .or_else(|| heuristics::find_date_in_text(segment_text));

    StatementMetadata {
        bank_name: reply
            .bank_name
            .or_else(|| boundary.bank_name.clone())
            .or_else(|| heuristics::find_bank_in_text(segment_text)),
        account_last4: account_number
            .as_deref()
            .map(account_last4)
            .unwrap_or_else(|| "0000".to_string()),
        account_number,
        period,
        statement_date,
        customer_name: reply.customer_name,
        confidence: reply.confidence.clamp(0.0, 1.0),
    }
}

/// Deterministic extraction from the segment text alone.
pub fn fallback_metadata(segment_text: &str, boundary: &Boundary) -> StatementMetadata {
    let bank_name = boundary
        .bank_name
        .clone()
        .or_else(|| heuristics::find_bank_in_text(segment_text));

    let account_number = boundary
        .account_number
        .as_deref()
        .map(account_digits)
        .filter(|d| !d.is_empty())
        .or_else(|| {
            heuristics::find_account_candidates(segment_text)
                .into_iter()
                .next()
                .map(|c| c.digits)
        });

    let period = find_period_in_text(segment_text);
    let statement_date = period
        .filename_date()
        .or_else(|| heuristics::find_date_in_text(segment_text));

    StatementMetadata {
        bank_name,
        account_last4: account_number
            .as_deref()
            .map(account_last4)
            .unwrap_or_else(|| "0000".to_string()),
        account_number,
        period,
        statement_date,
        customer_name: None,
        confidence: HEURISTIC_CONFIDENCE,
    }
}

/// Look for a period line ("Statement Period: <start> to <end>") and parse it.
fn find_period_in_text(text: &str) -> StatementPeriod {
    for line in text.lines() {
        let lower = line.to_lowercase();
        if lower.contains("period") {
            if let Some((_, rest)) = line.split_once(':') {
                let period = heuristics::parse_period(rest);
                if !matches!(period, StatementPeriod::Unknown(_)) {
                    return period;
                }
            }
        }
    }
    StatementPeriod::Unknown(String::new())
}

/// Concatenated text for a 1-based inclusive page range.
fn slice_pages(pages: &[PageText], start: usize, end: usize) -> String {
    pages
        .iter()
        .filter(|p| p.index >= start && p.index <= end)
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
