//! Reply parsing: turn raw model output into typed results.
//!
//! Models are prompted to answer with bare JSON, but in practice replies
//! arrive three ways: bare JSON, JSON inside a ```json fence, and prose
//! around a JSON object. The first two are accepted (fence-stripping is
//! deterministic); anything that does not parse after fence removal is a
//! **non-retryable** provider error — retrying a model that returns prose
//! wastes quota, and the analyzer has a deterministic fallback.
//!
//! Boundary objects are validated structurally here: `start_page` and
//! `end_page` must be JSON integers. Semantic validation (page ranges vs the
//! real document) belongs to the hallucination detector, not the parser.

use crate::error::SplitError;
use crate::model::Boundary;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{BoundaryResult, MetadataResult};

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n(.*)\n```\s*$").unwrap());

/// Strip an outer ```json fence if present.
fn strip_code_fences(raw: &str) -> &str {
    match RE_OUTER_FENCES.captures(raw.trim()) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(raw),
        None => raw.trim(),
    }
}

/// Parse a reply into JSON, tolerating code fences.
fn parse_json(provider: &str, raw: &str) -> Result<Value, SplitError> {
    let body = strip_code_fences(raw);
    serde_json::from_str(body).map_err(|e| SplitError::invalid_response(provider, e))
}

/// Require a JSON integer, rejecting floats and numeric strings.
fn as_page_number(v: &Value, field: &str, provider: &str) -> Result<usize, SplitError> {
    v.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| {
            SplitError::invalid_response(
                provider,
                format!("boundary field '{field}' must be an integer, got {v}"),
            )
        })
}

fn opt_string(v: &Value, field: &str) -> Option<String> {
    v.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn confidence_of(v: &Value, default: f32) -> f32 {
    v.get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c as f32)
        .unwrap_or(default)
        .clamp(0.0, 1.0)
}

/// Parse a boundary-analysis reply.
pub fn parse_boundary_reply(provider: &str, raw: &str) -> Result<BoundaryResult, SplitError> {
    let value = parse_json(provider, raw)?;

    let items = value
        .get("boundaries")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            SplitError::invalid_response(provider, "missing 'boundaries' array")
        })?;

    let confidence = confidence_of(&value, 0.8);
    let mut boundaries = Vec::with_capacity(items.len());

    for item in items {
        let start = item
            .get("start_page")
            .ok_or_else(|| SplitError::invalid_response(provider, "boundary missing 'start_page'"))
            .and_then(|v| as_page_number(v, "start_page", provider))?;
        let end = item
            .get("end_page")
            .ok_or_else(|| SplitError::invalid_response(provider, "boundary missing 'end_page'"))
            .and_then(|v| as_page_number(v, "end_page", provider))?;

        boundaries.push(Boundary {
            start_page: start,
            end_page: end,
            account_number: opt_string(item, "account_number"),
            bank_name: opt_string(item, "bank_name"),
            confidence: confidence_of(item, confidence),
            reasoning: opt_string(item, "reasoning"),
        });
    }

    Ok(BoundaryResult {
        boundaries,
        confidence,
        analysis_notes: opt_string(&value, "analysis_notes"),
        provider: provider.to_string(),
    })
}

/// Parse a metadata-extraction reply.
pub fn parse_metadata_reply(provider: &str, raw: &str) -> Result<MetadataResult, SplitError> {
    let value = parse_json(provider, raw)?;

    if !value.is_object() {
        return Err(SplitError::invalid_response(
            provider,
            "metadata reply must be a JSON object",
        ));
    }

    Ok(MetadataResult {
        bank_name: opt_string(&value, "bank_name"),
        account_number: opt_string(&value, "account_number"),
        statement_period: opt_string(&value, "statement_period"),
        statement_date: opt_string(&value, "statement_date"),
        customer_name: opt_string(&value, "customer_name"),
        confidence: confidence_of(&value, 0.7),
        provider: provider.to_string(),
    })
}
