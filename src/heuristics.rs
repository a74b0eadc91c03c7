//! Shared text heuristics: account-number patterns, the known-institutions
//! table, and tolerant date parsing.
//!
//! These are the ground-truth primitives three components agree on: the
//! hallucination detector uses them to check provider claims against the
//! document, and the boundary analyzer and metadata extractor use them as
//! the deterministic fallback when the provider is unavailable or rejected.
//! Keeping one compiled pattern set here means a boundary found by the
//! fallback is judged by the same rules the detector applies to the provider.

use crate::model::StatementPeriod;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

// ── Account numbers ──────────────────────────────────────────────────────

/// Compiled account-number patterns, most specific first.
///
/// The first pattern anchors on an "Account …" label; the second catches
/// bare digit groups formatted like card or BSB-account runs. Both tolerate
/// space and dash separators.
static ACCOUNT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)account\s*(?:number|no\.?|#)?\s*[:\-]?\s*([0-9][0-9 \-]{6,30}[0-9])")
            .unwrap(),
        Regex::new(r"\b\d(?:[ \-]?\d){7,19}\b").unwrap(),
    ]
});

/// An account-number candidate found in document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountMatch {
    /// Digits only, separators stripped.
    pub digits: String,
    /// Byte offset of the match in the scanned text.
    pub position: usize,
}

/// Scan text for account-number candidates.
///
/// A candidate must normalise to at least 8 digits; shorter runs are
/// reference numbers, dates, and amounts far more often than accounts.
pub fn find_account_candidates(text: &str) -> Vec<AccountMatch> {
    let mut found: Vec<AccountMatch> = Vec::new();
    let mut spans: Vec<(usize, usize)> = Vec::new();

    for re in ACCOUNT_PATTERNS.iter() {
        for caps in re.captures_iter(text) {
            let m = caps.get(caps.len().saturating_sub(1)).or_else(|| caps.get(0));
            let Some(m) = m else { continue };
            let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.len() < 8 {
                continue;
            }
            // One candidate per text location: a bare digit run inside an
            // already-matched labeled span is the same sighting.
            if spans.iter().any(|&(s, e)| m.start() < e && m.end() > s) {
                continue;
            }
            spans.push((m.start(), m.end()));
            found.push(AccountMatch {
                digits,
                position: m.start(),
            });
        }
    }

    found.sort_by_key(|a| a.position);
    found
}

// ── Known institutions ───────────────────────────────────────────────────

/// Financial institutions the detector accepts without corroborating
/// document text. Lowercase; matching is case-insensitive containment.
pub const KNOWN_INSTITUTIONS: &[&str] = &[
    "westpac",
    "commonwealth",
    "anz",
    "nab",
    "suncorp",
    "bendigo",
    "macquarie",
    "ing",
    "chase",
    "jpmorgan",
    "wells fargo",
    "bank of america",
    "citibank",
    "capital one",
    "us bank",
    "pnc",
    "td bank",
    "hsbc",
    "barclays",
];

/// Word-boundary matchers for the institutions table, compiled once.
///
/// Substring matching is not enough: "ing" would hit "opening" and
/// "closing" in every statement body.
static INSTITUTION_MATCHERS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    KNOWN_INSTITUTIONS
        .iter()
        .map(|k| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(k));
            (*k, Regex::new(&pattern).expect("static institution pattern"))
        })
        .collect()
});

/// Whether a reported bank name matches a known institution.
pub fn is_known_institution(name: &str) -> bool {
    INSTITUTION_MATCHERS.iter().any(|(_, re)| re.is_match(name))
}

/// Whether any token of a reported bank name appears as a word in the
/// document text.
pub fn bank_appears_in_text(name: &str, text: &str) -> bool {
    name.split_whitespace()
        .filter(|t| t.len() > 2)
        .any(|token| {
            Regex::new(&format!(r"(?i)\b{}\b", regex::escape(token)))
                .map(|re| re.is_match(text))
                .unwrap_or(false)
        })
}

/// Find the first known institution mentioned in document text, returned in
/// its table form.
pub fn find_bank_in_text(text: &str) -> Option<String> {
    INSTITUTION_MATCHERS
        .iter()
        .filter_map(|(k, re)| re.find(text).map(|m| (m.start(), *k)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, k)| k.to_string())
}

// ── Dates ────────────────────────────────────────────────────────────────

/// Date formats statements actually use, tried in order.
///
/// Day-first formats precede month-first: the source corpus is dominated by
/// Australian statements.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
];

/// Parse a single date with tolerant formats. Returns `None` when nothing
/// matches.
pub fn parse_flexible_date(s: &str) -> Option<NaiveDate> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

/// Parse a statement-period string into a typed period.
///
/// Accepts `"<start> to <end>"`, `"<start>_<end>"`, `"<start> - <end>"`,
/// or a single date. Anything else becomes [`StatementPeriod::Unknown`]
/// carrying the raw text.
pub fn parse_period(raw: &str) -> StatementPeriod {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return StatementPeriod::Unknown(String::new());
    }

    for sep in [" to ", "_", " - ", " — "] {
        if let Some((a, b)) = trimmed.split_once(sep) {
            if let (Some(start), Some(end)) = (parse_flexible_date(a), parse_flexible_date(b)) {
                return StatementPeriod::Range { start, end };
            }
        }
    }

    match parse_flexible_date(trimmed) {
        Some(d) => StatementPeriod::Single(d),
        None => StatementPeriod::Unknown(trimmed.to_string()),
    }
}

/// Scan free text for any parseable date (used by the metadata fallback).
pub fn find_date_in_text(text: &str) -> Option<NaiveDate> {
    static DATE_LIKE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"\d{4}-\d{2}-\d{2}|\d{1,2}[/-]\d{1,2}[/-]\d{4}|\d{1,2} [A-Za-z]{3,9} \d{4}|[A-Za-z]{3,9} \d{1,2}, \d{4}",
        )
        .unwrap()
    });
    DATE_LIKE
        .find_iter(text)
        .find_map(|m| parse_flexible_date(m.as_str()))
}

// ── Text normalisation ───────────────────────────────────────────────────

/// Collapse all whitespace runs to single spaces for substring comparison.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
