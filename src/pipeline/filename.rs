//! Filename building: deterministic, collision-free names from metadata.
//!
//! The contract is `<bank>-<last4>-<end-date>.pdf`, with a `-p<startPage>`
//! suffix appended whenever any of the three components fell back to its
//! default. The suffix is what guarantees uniqueness across fallback cases:
//! two all-unknown statements in one bundle differ in start page by
//! construction. The DMS title for an upload is exactly the filename minus
//! the `.pdf` extension — the two must never drift apart, so both come from
//! this module.
//!
//! Everything here is a pure function of boundary + metadata; the same
//! inputs always produce byte-identical names.

use crate::model::{Boundary, StatementMetadata};

/// Fallback bank component.
pub const UNKNOWN_BANK: &str = "unknown";
/// Fallback date component.
pub const UNKNOWN_DATE: &str = "unknown-date";
/// Fallback last-4 component.
pub const UNKNOWN_LAST4: &str = "0000";

/// Maximum length of the normalised bank component.
const BANK_MAX_LEN: usize = 10;

/// Words dropped from bank names before normalisation; they carry no
/// distinguishing information in a filename.
const DROPPED_WORDS: &[&str] = &["bank", "banking", "corporation"];

/// Build the output filename for one statement.
pub fn build_filename(
    boundary: &Boundary,
    metadata: &StatementMetadata,
    max_length: usize,
) -> String {
    let bank = normalize_bank_name(metadata.bank_name.as_deref().unwrap_or(""));
    let last4 = &metadata.account_last4;
    let date = format_statement_date(metadata);

    let used_fallback =
        bank == UNKNOWN_BANK || last4 == UNKNOWN_LAST4 || date == UNKNOWN_DATE;

    let stem = format!("{bank}-{last4}-{date}");
    let suffix = if used_fallback {
        format!("-p{}", boundary.start_page)
    } else {
        String::new()
    };

    truncate_preserving(&stem, &suffix, max_length)
}

/// The DMS document title for an upload: the filename with `.pdf` stripped,
/// verbatim.
pub fn dms_title(filename: &str) -> &str {
    filename.strip_suffix(".pdf").unwrap_or(filename)
}

/// Normalise a bank name for the filename component.
///
/// Lowercase, drop the standalone words "bank"/"banking"/"corporation",
/// strip everything non-alphanumeric, truncate to 10 characters; empty
/// input (or input that normalises to nothing) falls back to `"unknown"`.
pub fn normalize_bank_name(raw: &str) -> String {
    let kept: String = raw
        .split_whitespace()
        .filter(|w| {
            let lower = w.to_lowercase();
            !DROPPED_WORDS.contains(&lower.as_str())
        })
        .collect::<Vec<_>>()
        .join("");

    let normalized: String = kept
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(BANK_MAX_LEN)
        .collect();

    if normalized.is_empty() {
        UNKNOWN_BANK.to_string()
    } else {
        normalized
    }
}

/// The date component: the period's end date (ranges) or single date, else
/// the statement date, else `"unknown-date"`.
pub fn format_statement_date(metadata: &StatementMetadata) -> String {
    metadata
        .period
        .filename_date()
        .or(metadata.statement_date)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| UNKNOWN_DATE.to_string())
}

/// Clamp `<stem><suffix>.pdf` to `max_length`, always preserving the suffix
/// and extension in full.
fn truncate_preserving(stem: &str, suffix: &str, max_length: usize) -> String {
    let tail_len = suffix.len() + ".pdf".len();
    let full_len = stem.len() + tail_len;

    if full_len <= max_length {
        return format!("{stem}{suffix}.pdf");
    }

    let allowed = max_length.saturating_sub(tail_len).max(1);
    let cut: String = stem.chars().take(allowed).collect();
    format!("{cut}{suffix}.pdf")
}
