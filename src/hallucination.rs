//! Hallucination detection: reject structurally impossible or fabricated
//! LLM responses.
//!
//! ## Why is this necessary?
//!
//! A language model asked to find statement boundaries occasionally produces
//! output that is *plausible prose* but *impossible against the document* —
//! a boundary on page 3 of a 1-page file, the same statement reported twice,
//! a bank that appears nowhere in the text. Acting on such a reply would
//! produce confidently mis-filed output, which is worse than falling back to
//! the deterministic heuristic.
//!
//! Every rule here compares a claim against ground truth the pipeline
//! already holds: the physical page count, the extracted text, and the
//! known-institutions table. Each rule is a pure function and independently
//! testable.
//!
//! ## Rejection policy
//!
//! [`should_reject`] is true iff any alert is critical, or three or more
//! high alerts accumulate. Lower severities never reject on their own; they
//! are logged and carried into the run's error report.

use crate::heuristics;
use crate::model::{Boundary, Severity};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashSet;
use tracing::warn;

/// Joined document text shorter than this (for a non-empty document) is
/// suspicious: the reply cannot have been grounded in real content.
const MIN_DOCUMENT_TEXT_LEN: usize = 50;

/// Reported accounts longer than this are not account numbers.
const MAX_ACCOUNT_LEN: usize = 20;

// ── Alerts ───────────────────────────────────────────────────────────────

/// What kind of impossibility was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    PhantomStatement,
    InvalidPageRange,
    DuplicateBoundary,
    MissingContent,
    FabricatedBank,
    ImpossibleDates,
    NonsensicalAccount,
}

/// One detector finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_value: Option<String>,
}

impl Alert {
    fn new(
        kind: AlertKind,
        severity: Severity,
        description: impl Into<String>,
        detected_value: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
            detected_value: Some(detected_value.into()),
        }
    }
}

/// The metadata fields a provider reply claims, before they are trusted.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataClaim<'a> {
    pub bank_name: Option<&'a str>,
    pub account_number: Option<&'a str>,
    pub period: Option<&'a str>,
}

// ── Boundary rules ───────────────────────────────────────────────────────

/// Validate a boundary reply against the document's ground truth.
pub fn check_boundaries(
    boundaries: &[Boundary],
    total_pages: usize,
    document_text: &str,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    for b in boundaries {
        // A statement starting beyond the last physical page cannot exist.
        if b.start_page > total_pages {
            alerts.push(Alert::new(
                AlertKind::PhantomStatement,
                Severity::Critical,
                format!(
                    "boundary starts at page {} but the document has {} page(s)",
                    b.start_page, total_pages
                ),
                format!("{}-{}", b.start_page, b.end_page),
            ));
            continue;
        }

        if b.start_page < 1 || b.start_page > b.end_page || b.end_page > total_pages {
            alerts.push(Alert::new(
                AlertKind::InvalidPageRange,
                Severity::Critical,
                format!(
                    "invalid page range {}-{} for a {}-page document",
                    b.start_page, b.end_page, total_pages
                ),
                format!("{}-{}", b.start_page, b.end_page),
            ));
        }
    }

    // Duplicates on the (start, end, account) triple.
    let mut seen: HashSet<(usize, usize, Option<&str>)> = HashSet::new();
    for b in boundaries {
        let key = (b.start_page, b.end_page, b.account_number.as_deref());
        if !seen.insert(key) {
            alerts.push(Alert::new(
                AlertKind::DuplicateBoundary,
                Severity::Medium,
                format!(
                    "duplicate boundary {}-{} (account {})",
                    b.start_page,
                    b.end_page,
                    b.account_number.as_deref().unwrap_or("unknown")
                ),
                format!("{}-{}", b.start_page, b.end_page),
            ));
        }
    }

    // Boundaries claimed against a document with essentially no text.
    if total_pages >= 1
        && !boundaries.is_empty()
        && document_text.trim().len() < MIN_DOCUMENT_TEXT_LEN
    {
        alerts.push(Alert::new(
            AlertKind::MissingContent,
            Severity::Medium,
            format!(
                "document text has {} characters; boundary claims cannot be grounded",
                document_text.trim().len()
            ),
            document_text.trim().chars().take(40).collect::<String>(),
        ));
    }

    for alert in &alerts {
        warn!(kind = ?alert.kind, severity = %alert.severity, "{}", alert.description);
    }
    alerts
}

// ── Metadata rules ───────────────────────────────────────────────────────

/// Validate a metadata reply against the segment's text.
pub fn check_metadata(
    claim: MetadataClaim<'_>,
    segment_text: &str,
    page_range: (usize, usize),
) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let range = format!("pages {}-{}", page_range.0, page_range.1);

    if let Some(bank) = claim.bank_name.filter(|b| !b.trim().is_empty()) {
        let in_text = heuristics::bank_appears_in_text(bank, segment_text);
        let known = heuristics::is_known_institution(bank);
        if !in_text && !known {
            // A name with no token overlap at all is a stronger signal of
            // fabrication than a partial mismatch.
            alerts.push(Alert::new(
                AlertKind::FabricatedBank,
                Severity::High,
                format!("bank '{bank}' is neither in the document text nor a known institution ({range})"),
                bank,
            ));
        } else if !in_text && known {
            alerts.push(Alert::new(
                AlertKind::FabricatedBank,
                Severity::Medium,
                format!("bank '{bank}' is a known institution but does not appear in the text ({range})"),
                bank,
            ));
        }
    }

    if let Some(period) = claim.period.filter(|p| !p.trim().is_empty()) {
        for date in period_dates(period) {
            let year = date.year();
            let current_year = chrono::Utc::now().year();
            if year > current_year + 1 || year < 1900 {
                alerts.push(Alert::new(
                    AlertKind::ImpossibleDates,
                    Severity::High,
                    format!("statement date {date} has an impossible year ({range})"),
                    period,
                ));
            }
        }
    }

    if let Some(account) = claim.account_number.filter(|a| !a.trim().is_empty()) {
        if let Some(reason) = nonsensical_account(account) {
            alerts.push(Alert::new(
                AlertKind::NonsensicalAccount,
                Severity::Medium,
                format!("account '{account}' {reason} ({range})"),
                account,
            ));
        }
    }

    for alert in &alerts {
        warn!(kind = ?alert.kind, severity = %alert.severity, "{}", alert.description);
    }
    alerts
}

/// Dates claimed by a period string, for the impossible-year check.
fn period_dates(period: &str) -> Vec<chrono::NaiveDate> {
    match heuristics::parse_period(period) {
        crate::model::StatementPeriod::Single(d) => vec![d],
        crate::model::StatementPeriod::Range { start, end } => vec![start, end],
        crate::model::StatementPeriod::Unknown(_) => Vec::new(),
    }
}

/// Why an account string cannot be an account number, if it cannot.
fn nonsensical_account(account: &str) -> Option<&'static str> {
    let trimmed = account.trim();
    if trimmed.contains("***") {
        return Some("is masked");
    }
    if trimmed.len() > MAX_ACCOUNT_LEN {
        return Some("exceeds the maximum plausible length");
    }
    let digits: Vec<char> = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Some("contains no digits");
    }
    // A placeholder like 000000000: one distinct digit repeated throughout.
    if digits.len() >= 6 && digits.iter().all(|&c| c == digits[0]) {
        return Some("is a repeated-digit placeholder");
    }
    None
}

// ── Rejection policy and summary ─────────────────────────────────────────

/// True iff any alert is critical, or at least three high alerts are present.
pub fn should_reject(alerts: &[Alert]) -> bool {
    if alerts.iter().any(|a| a.severity == Severity::Critical) {
        return true;
    }
    alerts.iter().filter(|a| a.severity == Severity::High).count() >= 3
}

/// Aggregate view of a detector pass, for logs and error reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorSummary {
    pub total_alerts: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_kind: BTreeMap<AlertKind, usize>,
    pub rejection_recommended: bool,
}

/// Summarise a set of alerts.
pub fn summarize(alerts: &[Alert]) -> DetectorSummary {
    let mut by_severity = BTreeMap::new();
    let mut by_kind = BTreeMap::new();
    for a in alerts {
        *by_severity.entry(a.severity).or_insert(0) += 1;
        *by_kind.entry(a.kind).or_insert(0) += 1;
    }
    DetectorSummary {
        total_alerts: alerts.len(),
        by_severity,
        by_kind,
        rejection_recommended: should_reject(alerts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundary(start: usize, end: usize, account: &str) -> Boundary {
        Boundary {
            start_page: start,
            end_page: end,
            account_number: if account.is_empty() {
                None
            } else {
                Some(account.to_string())
            },
            bank_name: None,
            confidence: 0.9,
            reasoning: None,
        }
    }

    const LONG_TEXT: &str =
        "Westpac Banking Corporation statement content with plenty of transactions listed. \
         Opening balance, closing balance, interest earned, fees charged.";

    #[test]
    fn phantom_statements_are_critical() {
        // Three statements claimed for a 1-page document.
        let boundaries = vec![
            boundary(1, 1, "12345678"),
            boundary(2, 2, "65432187"),
            boundary(3, 3, "99999912"),
        ];
        let alerts = check_boundaries(&boundaries, 1, LONG_TEXT);

        let phantoms: Vec<_> = alerts
            .iter()
            .filter(|a| a.kind == AlertKind::PhantomStatement)
            .collect();
        assert_eq!(phantoms.len(), 2);
        assert!(phantoms.iter().all(|a| a.severity == Severity::Critical));
        assert!(should_reject(&alerts));
    }

    #[test]
    fn invalid_page_ranges_are_critical() {
        let boundaries = vec![
            boundary(3, 1, "12345678"), // start > end
            boundary(1, 6, "87654321"), // end beyond document
        ];
        let alerts = check_boundaries(&boundaries, 3, LONG_TEXT);

        let ranges: Vec<_> = alerts
            .iter()
            .filter(|a| a.kind == AlertKind::InvalidPageRange)
            .collect();
        assert_eq!(ranges.len(), 2);
        assert!(should_reject(&alerts));
    }

    #[test]
    fn duplicate_boundaries_are_medium() {
        let boundaries = vec![
            boundary(1, 2, "12345678"),
            boundary(1, 2, "12345678"),
            boundary(3, 4, "78901234"),
        ];
        let alerts = check_boundaries(&boundaries, 4, LONG_TEXT);

        let dups: Vec<_> = alerts
            .iter()
            .filter(|a| a.kind == AlertKind::DuplicateBoundary)
            .collect();
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].severity, Severity::Medium);
        assert!(!should_reject(&alerts));
    }

    #[test]
    fn same_range_different_account_is_not_duplicate() {
        let boundaries = vec![boundary(1, 2, "12345678"), boundary(1, 2, "87654321")];
        let alerts = check_boundaries(&boundaries, 2, LONG_TEXT);
        assert!(alerts.iter().all(|a| a.kind != AlertKind::DuplicateBoundary));
    }

    #[test]
    fn missing_content_detection() {
        let boundaries = vec![boundary(1, 2, "12345678")];

        let alerts = check_boundaries(&boundaries, 2, "");
        assert!(alerts.iter().any(|a| a.kind == AlertKind::MissingContent));

        let alerts = check_boundaries(&boundaries, 2, &"A".repeat(100));
        assert!(alerts.iter().all(|a| a.kind != AlertKind::MissingContent));
    }

    #[test]
    fn valid_boundaries_produce_no_rejection() {
        let boundaries = vec![boundary(1, 2, "429318311799210")];
        let alerts = check_boundaries(&boundaries, 2, LONG_TEXT);

        assert!(alerts.iter().all(|a| a.severity < Severity::High));
        assert!(!should_reject(&alerts));
    }

    #[test]
    fn fabricated_bank_detection() {
        let claim = MetadataClaim {
            bank_name: Some("Fictional Credit Institution of Dreams"),
            account_number: Some("429318311799210"),
            period: Some("2023-01-01 to 2023-01-31"),
        };
        let alerts = check_metadata(claim, LONG_TEXT, (1, 2));

        let bank_alerts: Vec<_> = alerts
            .iter()
            .filter(|a| a.kind == AlertKind::FabricatedBank)
            .collect();
        assert_eq!(bank_alerts.len(), 1);
        assert_eq!(bank_alerts[0].severity, Severity::High);
    }

    #[test]
    fn known_bank_not_in_text_is_medium() {
        let claim = MetadataClaim {
            bank_name: Some("Chase"),
            account_number: Some("429318311799210"),
            period: None,
        };
        let alerts = check_metadata(claim, LONG_TEXT, (1, 2));
        let bank_alerts: Vec<_> = alerts
            .iter()
            .filter(|a| a.kind == AlertKind::FabricatedBank)
            .collect();
        assert_eq!(bank_alerts.len(), 1);
        assert_eq!(bank_alerts[0].severity, Severity::Medium);
    }

    #[test]
    fn known_banks_in_text_are_accepted() {
        for bank in ["westpac", "commonwealth", "anz", "nab", "chase", "wells fargo"] {
            let text = format!("{bank} statement content with transactions");
            let claim = MetadataClaim {
                bank_name: Some(bank),
                account_number: Some("123456789012"),
                period: Some("2023-01-01 to 2023-01-31"),
            };
            let alerts = check_metadata(claim, &text, (1, 2));
            assert!(
                alerts.iter().all(|a| a.kind != AlertKind::FabricatedBank),
                "known bank '{bank}' raised a fabrication alert"
            );
        }
    }

    #[test]
    fn impossible_dates_detection() {
        let future_year = chrono::Utc::now().year() + 10;
        let future = format!("{future_year}-01-01 to {future_year}-12-31");
        let claim = MetadataClaim {
            bank_name: Some("Chase"),
            account_number: Some("123456789012"),
            period: Some(&future),
        };
        let alerts = check_metadata(claim, "Chase Bank statement", (1, 2));
        assert!(alerts
            .iter()
            .any(|a| a.kind == AlertKind::ImpossibleDates && a.severity == Severity::High));

        let claim = MetadataClaim {
            bank_name: Some("Wells Fargo"),
            account_number: Some("987654321098"),
            period: Some("1899-01-01 to 1899-12-31"),
        };
        let alerts = check_metadata(claim, "Wells Fargo statement", (1, 2));
        assert!(alerts.iter().any(|a| a.kind == AlertKind::ImpossibleDates));
    }

    #[test]
    fn nonsensical_accounts_detection() {
        assert_eq!(nonsensical_account("***1234***"), Some("is masked"));
        assert!(nonsensical_account(&"a".repeat(25)).is_some());
        assert_eq!(nonsensical_account("no-digits-here"), Some("contains no digits"));
        assert!(nonsensical_account("000000000").is_some());
        assert_eq!(nonsensical_account("429318311799210"), None);
    }

    #[test]
    fn rejection_thresholds() {
        let critical = Alert::new(
            AlertKind::PhantomStatement,
            Severity::Critical,
            "test",
            "v",
        );
        assert!(should_reject(&[critical]));

        let high = |i: usize| {
            Alert::new(
                AlertKind::FabricatedBank,
                Severity::High,
                format!("test {i}"),
                "v",
            )
        };
        assert!(should_reject(&[high(0), high(1), high(2)]));
        assert!(!should_reject(&[high(0), high(1)]));

        let medium = Alert::new(AlertKind::DuplicateBoundary, Severity::Medium, "test", "v");
        let low = Alert::new(AlertKind::MissingContent, Severity::Low, "test", "v");
        assert!(!should_reject(&[medium, low]));
    }

    #[test]
    fn summary_counts_by_severity_and_kind() {
        let alerts = vec![
            Alert::new(AlertKind::PhantomStatement, Severity::Critical, "a", "1"),
            Alert::new(AlertKind::FabricatedBank, Severity::High, "b", "2"),
        ];
        let summary = summarize(&alerts);
        assert_eq!(summary.total_alerts, 2);
        assert_eq!(summary.by_severity[&Severity::Critical], 1);
        assert_eq!(summary.by_severity[&Severity::High], 1);
        assert_eq!(summary.by_kind[&AlertKind::PhantomStatement], 1);
        assert_eq!(summary.by_kind[&AlertKind::FabricatedBank], 1);
        assert!(summary.rejection_recommended);

        let clean = summarize(&[]);
        assert_eq!(clean.total_alerts, 0);
        assert!(!clean.rejection_recommended);
    }

    #[test]
    fn single_page_document_accepts_at_most_one_boundary() {
        // A 1-page source must reject any multi-boundary reply.
        let reply = vec![boundary(1, 1, "11112222"), boundary(2, 2, "33334444")];
        let alerts = check_boundaries(&reply, 1, LONG_TEXT);
        assert!(should_reject(&alerts));

        let single = vec![boundary(1, 1, "11112222")];
        let alerts = check_boundaries(&single, 1, LONG_TEXT);
        assert!(!should_reject(&alerts));
    }
}
