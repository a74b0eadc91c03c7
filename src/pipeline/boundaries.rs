//! Boundary analysis: find where each statement starts and ends.
//!
//! ## Two paths, one contract
//!
//! The primary path submits page-marked text to the LLM provider — under the
//! process-wide rate limiter, wrapped in the backoff combinator — and runs
//! the reply through the hallucination detector. A rejected reply earns
//! exactly one re-prompt; a second rejection, a provider error, or an
//! unavailable provider all degrade to the **heuristic fallback**, which
//! scans for account-number patterns and estimates page positions
//! proportionally. Both paths end in the same post-processing, so the
//! invariants downstream stages rely on (sorted, non-overlapping, gap-free,
//! within page bounds) hold regardless of how the boundaries were found.
//!
//! Heuristic confidence is fixed below any accepted LLM confidence, so the
//! error detector's low-confidence rule always flags fallback runs.

use crate::config::Config;
use crate::error::SplitError;
use crate::hallucination;
use crate::heuristics;
use crate::llm::LlmProvider;
use crate::model::{Boundary, CancelToken, PageText};
use crate::prompts;
use crate::ratelimit::{acquire_with_wait, retry, BackoffPolicy, RateLimiter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Confidence assigned to heuristic boundaries. Strictly below the 0.5
/// floor an accepted LLM reply can carry, so fallback runs always trip the
/// low-confidence error rule.
pub const HEURISTIC_CONFIDENCE: f32 = 0.3;

/// Outcome of boundary analysis, with the observations the error detector
/// needs later.
#[derive(Debug, Clone)]
pub struct BoundaryAnalysis {
    pub boundaries: Vec<Boundary>,
    /// Fragments coalesced into their predecessor during post-processing.
    pub skipped_fragments: usize,
    /// Whether the heuristic path produced the result.
    pub used_fallback: bool,
    /// Whether the provider errored or was unavailable (drives the
    /// LlmAnalysisFailure classification; a hallucination rejection does not).
    pub provider_failed: bool,
    /// Provider attempts consumed.
    pub attempts: u32,
}

/// Detect statement boundaries for a document.
pub async fn detect_boundaries(
    provider: Option<&Arc<dyn LlmProvider>>,
    limiter: &RateLimiter,
    config: &Config,
    page_texts: &[PageText],
    total_pages: usize,
    cancel: &CancelToken,
) -> Result<BoundaryAnalysis, SplitError> {
    let plain_text = join_pages_plain(page_texts);

    let mut used_fallback = false;
    let mut provider_failed = false;
    let mut attempts = 0u32;

    let accepted = match provider {
        None => {
            info!("no provider configured; using heuristic segmentation");
            used_fallback = true;
            None
        }
        Some(provider) => {
            if !provider.is_available().await {
                warn!(provider = %provider.info().name, "provider unavailable; falling back to heuristic");
                provider_failed = true;
                used_fallback = true;
                None
            } else {
                match analyze_with_provider(
                    provider,
                    limiter,
                    config,
                    page_texts,
                    total_pages,
                    &plain_text,
                    cancel,
                    &mut attempts,
                )
                .await
                {
                    Ok(boundaries) => Some(boundaries),
                    Err(SplitError::Cancelled) => return Err(SplitError::Cancelled),
                    Err(e) => {
                        if !matches!(e, SplitError::HallucinationRejected { .. }) {
                            provider_failed = true;
                        }
                        warn!(error = %e, "provider analysis failed; falling back to heuristic");
                        used_fallback = true;
                        None
                    }
                }
            }
        }
    };

    let raw = match accepted {
        Some(b) => b,
        None => heuristic_boundaries(&plain_text, total_pages, config),
    };

    let (mut boundaries, skipped_fragments) = postprocess(raw, total_pages, config);

    // An accepted reply can still be empty; downstream stages need at least
    // one boundary to produce output for a non-empty document.
    if boundaries.is_empty() {
        boundaries.push(Boundary {
            start_page: 1,
            end_page: total_pages.max(1),
            account_number: None,
            bank_name: None,
            confidence: HEURISTIC_CONFIDENCE,
            reasoning: Some("empty boundary set; whole document".into()),
        });
    }

    info!(
        count = boundaries.len(),
        skipped_fragments,
        used_fallback,
        "boundary analysis complete"
    );

    Ok(BoundaryAnalysis {
        boundaries,
        skipped_fragments,
        used_fallback,
        provider_failed,
        attempts,
    })
}

// ── Provider path ────────────────────────────────────────────────────────

/// Call the provider (admitted by the rate limiter, retried with backoff)
/// and validate its reply; one re-prompt is allowed after a rejection.
#[allow(clippy::too_many_arguments)]
async fn analyze_with_provider(
    provider: &Arc<dyn LlmProvider>,
    limiter: &RateLimiter,
    config: &Config,
    page_texts: &[PageText],
    total_pages: usize,
    plain_text: &str,
    cancel: &CancelToken,
    attempts: &mut u32,
) -> Result<Vec<Boundary>, SplitError> {
    let marked = join_pages_marked(page_texts);
    let chunk = head_chunk(&marked, config.pipeline.chunk_size);
    let policy = BackoffPolicy::new(
        config.llm.max_attempts,
        Duration::from_millis(config.llm.backoff_base_ms),
    );

    let mut last_rejection = None;

    for prompt_round in 0..2 {
        if cancel.is_cancelled() {
            return Err(SplitError::Cancelled);
        }
        acquire_with_wait(limiter, cancel).await?;

        let result = retry(&policy, |attempt| {
            *attempts += 1;
            debug!(prompt_round, attempt, "submitting boundary analysis");
            provider.analyze_boundaries(chunk, total_pages)
        })
        .await?;

        let alerts = hallucination::check_boundaries(&result.boundaries, total_pages, plain_text);
        if !hallucination::should_reject(&alerts) {
            debug!(
                confidence = result.confidence,
                boundaries = result.boundaries.len(),
                "provider reply accepted"
            );
            return Ok(result.boundaries);
        }

        let summary = hallucination::summarize(&alerts);
        warn!(
            round = prompt_round,
            alerts = summary.total_alerts,
            "provider reply rejected by hallucination detector"
        );
        last_rejection = Some(SplitError::HallucinationRejected {
            alert_count: summary.total_alerts,
            detail: format!("{:?}", summary.by_kind.keys().collect::<Vec<_>>()),
        });
    }

    Err(last_rejection.expect("two rejection rounds always set last_rejection"))
}

// ── Heuristic path ───────────────────────────────────────────────────────

/// Deterministic fallback: account-pattern scan with proportional page
/// estimation.
pub fn heuristic_boundaries(text: &str, total_pages: usize, config: &Config) -> Vec<Boundary> {
    let candidates = heuristics::find_account_candidates(text);
    let deduped = dedup_candidates(
        candidates,
        text.len(),
        config.pipeline.fallback_dedup_ratio,
    );

    if deduped.is_empty() {
        // No boundary signals: the whole document is one statement.
        return vec![Boundary {
            start_page: 1,
            end_page: total_pages.max(1),
            account_number: None,
            bank_name: heuristics::find_bank_in_text(text),
            confidence: HEURISTIC_CONFIDENCE,
            reasoning: Some("no boundary signals found; whole document".into()),
        }];
    }

    // Estimate each statement's start page from its account's character
    // position. Character-proportional, which under-serves image-heavy
    // documents, but those arrive as empty text and fall into the
    // single-boundary branch above.
    let mut starts: Vec<(usize, String)> = Vec::new();
    for c in &deduped {
        let page = if text.is_empty() {
            1
        } else {
            (c.position * total_pages / text.len().max(1)) + 1
        };
        let page = page.clamp(1, total_pages.max(1));
        match starts.last() {
            Some((prev, _)) if *prev == page => continue,
            _ => starts.push((page, c.digits.clone())),
        }
    }

    // First statement always owns the document head.
    if let Some(first) = starts.first_mut() {
        first.0 = 1;
    }

    let mut boundaries = Vec::with_capacity(starts.len());
    for (i, (start, digits)) in starts.iter().enumerate() {
        let end = match starts.get(i + 1) {
            Some((next_start, _)) => next_start.saturating_sub(1).max(*start),
            None => total_pages.max(1),
        };
        boundaries.push(Boundary {
            start_page: *start,
            end_page: end,
            account_number: Some(digits.clone()),
            bank_name: None,
            confidence: HEURISTIC_CONFIDENCE,
            reasoning: Some("heuristic account-pattern segmentation".into()),
        });
    }

    boundaries
}

/// Drop repeated sightings of the same account that sit within the
/// configured window of each other; the same account re-printed on every
/// page of one statement is one statement, not many.
fn dedup_candidates(
    candidates: Vec<heuristics::AccountMatch>,
    text_len: usize,
    dedup_ratio: f64,
) -> Vec<heuristics::AccountMatch> {
    let window = (text_len as f64 * dedup_ratio) as usize;
    let mut kept: Vec<heuristics::AccountMatch> = Vec::new();

    for candidate in candidates {
        let duplicate = kept.iter().any(|k| {
            k.digits == candidate.digits
                && candidate.position.saturating_sub(k.position) <= window
        });
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

// ── Post-processing (both paths) ─────────────────────────────────────────

/// Enforce the boundary invariants: sorted, in-bounds, non-overlapping
/// (unless configured otherwise), fragments coalesced, gaps attached to the
/// preceding boundary. Returns the clean set and the coalesced count.
pub fn postprocess(
    mut boundaries: Vec<Boundary>,
    total_pages: usize,
    config: &Config,
) -> (Vec<Boundary>, usize) {
    let mut skipped = 0usize;

    boundaries.sort_by_key(|b| (b.start_page, b.end_page));

    // Clamp into the physical page range.
    for b in &mut boundaries {
        b.start_page = b.start_page.clamp(1, total_pages.max(1));
        b.end_page = b.end_page.clamp(b.start_page, total_pages.max(1));
    }

    // Exact duplicates on the (start, end, account) triple.
    boundaries.dedup_by(|b, prev| {
        b.start_page == prev.start_page
            && b.end_page == prev.end_page
            && b.account_number == prev.account_number
    });

    // Overlap resolution: clamp the later boundary's start forward.
    if !config.pipeline.allow_overlaps {
        let mut resolved: Vec<Boundary> = Vec::with_capacity(boundaries.len());
        for mut b in boundaries {
            if let Some(prev) = resolved.last() {
                if b.start_page <= prev.end_page {
                    let new_start = prev.end_page + 1;
                    if new_start > b.end_page {
                        debug!(
                            start = b.start_page,
                            end = b.end_page,
                            "boundary fully shadowed by predecessor; dropping"
                        );
                        skipped += 1;
                        continue;
                    }
                    b.start_page = new_start;
                }
            }
            resolved.push(b);
        }
        boundaries = resolved;
    }

    // Coalesce sub-threshold fragments into an indistinguishable predecessor.
    if config.pipeline.min_fragment_pages > 1 {
        let mut coalesced: Vec<Boundary> = Vec::with_capacity(boundaries.len());
        for b in boundaries {
            let merge = match coalesced.last() {
                Some(prev) => {
                    b.page_run() < config.pipeline.min_fragment_pages
                        && indistinguishable(prev, &b)
                }
                None => false,
            };
            if merge {
                let prev = coalesced.last_mut().expect("checked above");
                prev.end_page = prev.end_page.max(b.end_page);
                skipped += 1;
            } else {
                coalesced.push(b);
            }
        }
        boundaries = coalesced;
    }

    // Gap attachment: no page may be unaccounted for.
    if let Some(first) = boundaries.first_mut() {
        first.start_page = 1;
    }
    for i in 1..boundaries.len() {
        let prev_end = boundaries[i - 1].end_page;
        if boundaries[i].start_page > prev_end + 1 {
            boundaries[i - 1].end_page = boundaries[i].start_page - 1;
        }
    }
    if let Some(last) = boundaries.last_mut() {
        if last.end_page < total_pages {
            last.end_page = total_pages;
        }
    }

    (boundaries, skipped)
}

/// Whether two boundaries cannot be told apart by bank and account last-4.
fn indistinguishable(a: &Boundary, b: &Boundary) -> bool {
    let last4 = |x: &Boundary| x.account_number.as_deref().map(crate::model::account_last4);
    let bank = |x: &Boundary| x.bank_name.as_deref().map(str::to_lowercase);
    last4(a) == last4(b) && bank(a) == bank(b)
}

// ── Text shaping ─────────────────────────────────────────────────────────

/// Join page texts with the page markers the boundary prompt refers to.
pub fn join_pages_marked(pages: &[PageText]) -> String {
    let mut out = String::new();
    for p in pages {
        out.push_str(&prompts::page_marker(p.index));
        out.push_str(&p.text);
    }
    out
}

/// Join page texts without markers, for detector ground truth and the
/// heuristic scan.
pub fn join_pages_plain(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// First `max_chars` characters, cut at a char boundary.
pub fn head_chunk(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Slice text into overlapping chunks for provider calls.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    assert!(overlap < size, "overlap must be below chunk size");
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= size {
        return vec![text.to_string()];
    }
    let step = size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}
