//! Prompts for boundary analysis and metadata extraction.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — tightening the reply contract (e.g. the
//!    integer-pages rule the parser enforces) requires editing exactly one
//!    place.
//!
//! 2. **Testability** — unit tests can inspect the rendered prompts without
//!    calling a model, so a prompt regression that would break the parser is
//!    caught immediately.
//!
//! Both providers use the same prompts; the wire format differs, the task
//! does not.

/// System prompt for boundary analysis.
pub const BOUNDARY_SYSTEM_PROMPT: &str = r#"You are a bank-statement analyst. The user gives you text extracted from a PDF that may contain several bank statements concatenated into one file, plus the document's total page count.

Identify where each statement starts and ends. Follow these rules precisely:

1. PAGES
   - Pages are 1-indexed and the text marks them with "--- PAGE <n> ---"
   - start_page and end_page are inclusive and MUST be JSON integers
   - Never reference a page beyond the stated total page count

2. STATEMENTS
   - A new statement starts where the bank name, account number, or
     statement period changes
   - Continuation pages ("continued", running balances) belong to the
     statement they continue

3. OUTPUT FORMAT
   - Reply with ONLY a JSON object, no commentary, no code fences:
     {"total_statements": <int>,
      "confidence": <0.0-1.0>,
      "boundaries": [
        {"start_page": <int>, "end_page": <int>,
         "account_number": "<digits or omit>",
         "bank_name": "<name or omit>",
         "reasoning": "<one short sentence>"}
      ],
      "analysis_notes": "<one short sentence>"}"#;

/// System prompt for per-segment metadata extraction.
pub const METADATA_SYSTEM_PROMPT: &str = r#"You are a bank-statement analyst. The user gives you the text of ONE bank statement. Extract its metadata.

Follow these rules precisely:

1. FIELDS
   - bank_name: the issuing institution as printed
   - account_number: digits and separators as printed
   - statement_period: "<start> to <end>" using ISO dates when possible
   - statement_date: the closing/issue date as an ISO date
   - customer_name: the account holder, if printed

2. HONESTY
   - Omit any field you cannot find; NEVER invent a value
   - confidence reflects how much of the above you actually found

3. OUTPUT FORMAT
   - Reply with ONLY a JSON object, no commentary, no code fences:
     {"bank_name": "...", "account_number": "...",
      "statement_period": "...", "statement_date": "...",
      "customer_name": "...", "confidence": <0.0-1.0>}"#;

/// Render the user message for a boundary-analysis call.
pub fn boundary_user_prompt(text: &str, total_pages: usize) -> String {
    format!(
        "Total pages: {total_pages}\n\nDocument text:\n\"\"\"\n{text}\n\"\"\""
    )
}

/// Render the user message for a metadata-extraction call.
pub fn metadata_user_prompt(text: &str, start_page: usize, end_page: usize) -> String {
    format!(
        "Statement spanning pages {start_page}-{end_page}:\n\"\"\"\n{text}\n\"\"\""
    )
}

/// Marker inserted between pages when joining text for the provider.
///
/// The boundary prompt's page rule refers to this exact shape.
pub fn page_marker(page: usize) -> String {
    format!("\n--- PAGE {page} ---\n")
}
