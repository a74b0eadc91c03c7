//! Pipeline stages for statement segmentation.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a different boundary strategy) without
//! touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! extract ──▶ boundaries ──▶ metadata ──▶ filename ──▶ segments ──▶ validate
//! (lopdf)     (LLM+fallback)  (LLM+fallback) (pure)     (lopdf)      (4-tier)
//! ```
//!
//! 1. [`extract`]    — per-page text from the source PDF; runs in
//!    `spawn_blocking` because lopdf parsing is CPU-bound
//! 2. [`boundaries`] — detect statement boundaries via the provider, checked
//!    by the hallucination detector, with a deterministic heuristic fallback
//! 3. [`metadata`]   — per-boundary bank/account/period metadata, same
//!    provider-with-fallback shape
//! 4. [`filename`]   — deterministic, collision-free output names
//! 5. [`segments`]   — one PDF per boundary, atomic writes
//! 6. [`validate`]   — file-count / page-count / file-size / content-sampling
//!    checks producing a structured report

pub mod boundaries;
pub mod extract;
pub mod filename;
pub mod metadata;
pub mod segments;
pub mod validate;
