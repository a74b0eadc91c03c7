//! Workflow engine: the staged state machine driving a document through the
//! pipeline.
//!
//! ## Transition policy
//!
//! Stages run in a fixed total order; each stage reads the
//! [`WorkflowState`], does its work, and either advances or surfaces an
//! error. Non-fatal observations (low confidence, coalesced fragments,
//! provider fallback) are recorded and the run continues. Any fatal error
//! skips directly to finalize, which quarantines the artifacts, writes
//! `error_report.json` beside them, and — when the DMS is configured — tags
//! the source document so operators find the failure by tag.
//!
//! ```text
//! extract_text ─► detect_boundaries ─► extract_metadata ─► write_segments
//!                                                               │
//!                           ┌───────────────────────────────────┘
//!                           ▼
//!                    validate_outputs
//!                           │
//!               valid? ──yes─► tag_or_upload ─► finalize (success)
//!                  │
//!                  no
//!                  ▼
//!               finalize (failure) ──► quarantine + error report
//! ```
//!
//! ## Batch mode
//!
//! [`Workflow::run_batch`] drives several documents concurrently through a
//! bounded worker pool. Workers share exactly two things: the process-wide
//! rate limiter and the DMS client (with its name-resolution cache). Each
//! document's state is owned by one worker for its whole run.

use crate::config::Config;
use crate::dms::{DmsClient, DocumentUpload};
use crate::errdetect;
use crate::error::SplitError;
use crate::llm::{provider_from_config, LlmProvider};
use crate::model::{
    CancelToken, DetectedError, ErrorReport, Stage, UploadResult, WorkflowState,
};
use crate::pipeline::{boundaries, extract, filename, metadata, segments, validate};
use crate::ratelimit::{RateLimitSettings, RateLimiter};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of one document run.
#[derive(Debug)]
pub struct RunOutcome {
    pub state: WorkflowState,
    /// True when the pipeline completed without a terminal error.
    pub success: bool,
    /// Terminal error, when the run failed.
    pub error: Option<SplitError>,
    /// Errors classified by the detector (present on success too).
    pub detected_errors: Vec<DetectedError>,
    /// Path of the written error report, on failure.
    pub report_path: Option<PathBuf>,
}

/// The pipeline driver. One instance serves any number of documents; see
/// the module docs for what is shared.
pub struct Workflow {
    config: Config,
    provider: Option<Arc<dyn LlmProvider>>,
    limiter: Arc<RateLimiter>,
    dms: Option<Arc<DmsClient>>,
}

impl Workflow {
    /// Build the engine from a validated configuration.
    pub fn new(config: Config) -> Result<Self, SplitError> {
        let provider = provider_from_config(&config);
        let limiter = Arc::new(RateLimiter::new(RateLimitSettings {
            requests_per_minute: config.llm.requests_per_minute,
            burst_limit: config.llm.burst_limit,
        }));
        let dms = if config.dms_ready() {
            Some(Arc::new(DmsClient::new(&config.dms)?))
        } else {
            None
        };

        Ok(Self {
            config,
            provider,
            limiter,
            dms,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared DMS client, when the integration is configured.
    pub fn dms(&self) -> Option<&Arc<DmsClient>> {
        self.dms.as_ref()
    }

    /// Process one document end to end. Never panics and never returns
    /// `Err`: failures are converted into a quarantined [`RunOutcome`].
    pub async fn run(&self, input_path: &Path, cancel: CancelToken) -> RunOutcome {
        let mut state = WorkflowState::new(input_path, &self.config.output.default_dir);
        state.cancel = cancel;
        self.drive(state).await
    }

    /// Like [`Workflow::run`], for a document that originated in the DMS
    /// (enables post-processing tagging of the source document).
    pub async fn run_dms_document(
        &self,
        input_path: &Path,
        dms_source_id: u64,
        cancel: CancelToken,
    ) -> RunOutcome {
        let mut state = WorkflowState::new(input_path, &self.config.output.default_dir);
        state.cancel = cancel;
        state.dms_source_id = Some(dms_source_id);
        self.drive(state).await
    }

    /// Process many documents through a bounded worker pool. Results arrive
    /// in completion order; no cross-document ordering is guaranteed.
    pub async fn run_batch(
        &self,
        inputs: &[PathBuf],
        cancel: CancelToken,
    ) -> Vec<RunOutcome> {
        let workers = self.config.workers.max(1);
        info!(documents = inputs.len(), workers, "starting batch run");

        futures::stream::iter(inputs.iter().cloned())
            .map(|path| {
                let cancel = cancel.clone();
                async move { self.run(&path, cancel).await }
            })
            .buffer_unordered(workers)
            .collect()
            .await
    }

    // ── State machine ────────────────────────────────────────────────────

    async fn drive(&self, mut state: WorkflowState) -> RunOutcome {
        let mut terminal: Option<SplitError> = None;

        while state.current_stage != Stage::Finalize {
            if state.cancel.is_cancelled() {
                terminal = Some(SplitError::Cancelled);
                state.error_message = Some("operator cancelled".into());
                break;
            }

            let result = match state.current_stage {
                Stage::ExtractText => self.extract_stage(&mut state).await,
                Stage::DetectBoundaries => self.boundaries_stage(&mut state).await,
                Stage::ExtractMetadata => self.metadata_stage(&mut state).await,
                Stage::WriteSegments => self.segments_stage(&mut state).await,
                Stage::ValidateOutputs => self.validate_stage(&mut state).await,
                Stage::TagOrUpload => self.upload_stage(&mut state).await,
                Stage::Finalize => unreachable!("loop exits before finalize"),
            };

            match result {
                Ok(()) => {
                    state.current_stage = state
                        .current_stage
                        .next()
                        .expect("non-finalize stages always have a successor");
                }
                Err(e) => {
                    // The stage stays at the failure point so the error
                    // report names it.
                    error!(stage = %state.current_stage, error = %e, "stage failed");
                    state.error_message = Some(e.to_string());
                    terminal = Some(e);
                    break;
                }
            }
        }

        self.finalize(state, terminal).await
    }

    async fn extract_stage(&self, state: &mut WorkflowState) -> Result<(), SplitError> {
        let (source, texts) = extract::extract_pages(&state.input_path).await?;
        debug_assert_eq!(texts.len(), source.page_count);
        state.source = Some(source);
        state.page_texts = texts;
        Ok(())
    }

    async fn boundaries_stage(&self, state: &mut WorkflowState) -> Result<(), SplitError> {
        let total_pages = state
            .source
            .as_ref()
            .map(|s| s.page_count)
            .unwrap_or_default();
        let analysis = boundaries::detect_boundaries(
            self.provider.as_ref(),
            &self.limiter,
            &self.config,
            &state.page_texts,
            total_pages,
            &state.cancel,
        )
        .await?;

        state.boundaries = analysis.boundaries;
        state.skipped_fragments = analysis.skipped_fragments;
        state.llm_analysis_failed = analysis.provider_failed;
        state.provider_attempts += analysis.attempts;
        Ok(())
    }

    async fn metadata_stage(&self, state: &mut WorkflowState) -> Result<(), SplitError> {
        let analysis = metadata::extract_all_metadata(
            self.provider.as_ref(),
            &self.limiter,
            &self.config,
            &state.page_texts,
            &state.boundaries,
            &state.cancel,
        )
        .await?;
        state.provider_attempts += analysis.attempts;
        state.metadata = analysis.metadata;
        Ok(())
    }

    async fn segments_stage(&self, state: &mut WorkflowState) -> Result<(), SplitError> {
        state.outputs = segments::write_segments(
            &state.input_path,
            &state.output_dir,
            &state.boundaries,
            &state.metadata,
            self.config.pipeline.max_filename_length,
        )
        .await?;
        Ok(())
    }

    async fn validate_stage(&self, state: &mut WorkflowState) -> Result<(), SplitError> {
        let source = state
            .source
            .as_ref()
            .ok_or_else(|| SplitError::Internal("validate stage without source".into()))?;
        let report = validate::validate_outputs(
            source,
            &state.page_texts,
            &state.outputs,
            state.boundaries.len(),
            &self.config.validation,
        )
        .await;

        let valid = report.is_valid;
        let summary = report.summary.clone();
        state.validation = Some(report);

        if valid {
            Ok(())
        } else {
            Err(SplitError::Validation { summary })
        }
    }

    async fn upload_stage(&self, state: &mut WorkflowState) -> Result<(), SplitError> {
        let Some(dms) = &self.dms else {
            info!("DMS not configured; skipping upload");
            return Ok(());
        };

        for output in &state.outputs {
            if state.cancel.is_cancelled() {
                return Err(SplitError::Cancelled);
            }
            let title = filename::dms_title(&output.filename).to_string();
            let upload = DocumentUpload {
                title: title.clone(),
                tags: self.config.dms.tags.clone(),
                correspondent: self.config.dms.correspondent.clone(),
                document_type: self.config.dms.document_type.clone(),
                storage_path: self.config.dms.storage_path.clone(),
            };
            let outcome = dms.upload_document(&output.path, &upload).await?;
            state.upload_results.push(UploadResult {
                filename: output.filename.clone(),
                title,
                outcome,
            });
        }

        if let Some(source_id) = state.dms_source_id {
            let outcome = dms
                .mark_input_processed(source_id, &self.config.dms.input)
                .await?;
            info!(source_id, ?outcome, "input document post-processing");
        }

        Ok(())
    }

    // ── Finalize ─────────────────────────────────────────────────────────

    async fn finalize(
        &self,
        mut state: WorkflowState,
        terminal: Option<SplitError>,
    ) -> RunOutcome {
        let detected = errdetect::detect_errors(&state, terminal.as_ref(), &self.config);
        state.detected_errors = detected.clone();

        let mut report_path = None;

        if let Some(ref e) = terminal {
            report_path = self.quarantine(&state, e, &detected).await;
        }

        // Tag the DMS source document whenever the policy calls for it —
        // failed runs and degraded successes alike.
        if let (Some(dms), Some(source_id)) = (&self.dms, state.dms_source_id) {
            if errdetect::should_tag(&detected, &self.config) {
                errdetect::tag_input_document_best_effort(
                    dms,
                    &self.config,
                    source_id,
                    &detected,
                )
                .await;
            }
        }

        let success = terminal.is_none();
        if success {
            info!(
                input = %state.input_path.display(),
                statements = state.outputs.len(),
                uploads = state.upload_results.len(),
                "pipeline run succeeded"
            );
        } else {
            warn!(
                input = %state.input_path.display(),
                error = state.error_message.as_deref().unwrap_or("unknown"),
                "pipeline run failed; artifacts quarantined"
            );
        }

        RunOutcome {
            success,
            error: terminal,
            detected_errors: detected,
            report_path,
            state,
        }
    }

    /// Move the source and any partial outputs into the quarantine
    /// directory and write the structured error report beside them.
    /// Best-effort: a quarantine failure is logged, never propagated.
    async fn quarantine(
        &self,
        state: &WorkflowState,
        terminal: &SplitError,
        detected: &[DetectedError],
    ) -> Option<PathBuf> {
        let dir = &self.config.output.quarantine_dir;
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "cannot create quarantine directory");
            return None;
        }

        let mut quarantined_outputs = Vec::new();
        for output in &state.outputs {
            let dest = dir.join(&output.filename);
            match move_file(&output.path, &dest).await {
                Ok(()) => quarantined_outputs.push(dest),
                Err(e) => warn!(file = %output.path.display(), error = %e, "failed to quarantine output"),
            }
        }

        if state.input_path.exists() {
            let input_name = state
                .input_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "input.pdf".to_string());
            let dest = dir.join(&input_name);
            if let Err(e) = move_file(&state.input_path, &dest).await {
                warn!(error = %e, "failed to quarantine source document");
            }
        }

        let report = ErrorReport {
            input: state.input_path.clone(),
            stage: state.current_stage.to_string(),
            error: terminal.to_string(),
            errors: detected.to_vec(),
            timestamp: chrono::Utc::now(),
            attempts: state.provider_attempts,
            outputs: quarantined_outputs,
        };

        let report_dir = self
            .config
            .output
            .error_report_dir
            .as_deref()
            .unwrap_or(dir);
        if let Err(e) = tokio::fs::create_dir_all(report_dir).await {
            error!(error = %e, "cannot create error report directory");
            return None;
        }
        let stem = state
            .input_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        let report_path = report_dir.join(format!("{stem}_error_report.json"));

        match serde_json::to_vec_pretty(&report) {
            Ok(bytes) => match tokio::fs::write(&report_path, bytes).await {
                Ok(()) => {
                    info!(report = %report_path.display(), "wrote error report");
                    Some(report_path)
                }
                Err(e) => {
                    error!(error = %e, "failed to write error report");
                    None
                }
            },
            Err(e) => {
                error!(error = %e, "failed to serialise error report");
                None
            }
        }
    }
}

/// Move a file, falling back to copy+remove across filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn config_with_dirs(out: &Path, quarantine: &Path) -> Config {
        let mut config = Config::builder()
            .provider("none")
            .unwrap()
            .output_dir(out)
            .quarantine_dir(quarantine)
            .build()
            .unwrap();
        // Synthetic fixtures are far smaller than scanned statements; keep
        // the size tier out of the way of what these tests assert.
        config.validation.min_output_bytes = 64;
        config.validation.size_ratio_min = 0.1;
        config.validation.size_ratio_max = 10.0;
        config
    }

    #[tokio::test]
    async fn heuristic_run_succeeds_end_to_end() {
        let src_dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let quarantine = tempfile::tempdir().unwrap();

        let input = src_dir.path().join("bundle.pdf");
        testutil::build_pdf(
            &input,
            &[
                &testutil::statement_page(
                    "WESTPAC BANKING CORPORATION",
                    "4293 1831 9017 2819",
                    "01 Apr 2024 to 30 Apr 2024",
                    "page 1",
                ),
                &testutil::continuation_page("WESTPAC BANKING CORPORATION", "2819", "page 2"),
            ],
        );

        let workflow =
            Workflow::new(config_with_dirs(out.path(), quarantine.path())).unwrap();
        let outcome = workflow.run(&input, CancelToken::new()).await;

        assert!(outcome.success, "error: {:?}", outcome.error);
        assert_eq!(outcome.state.outputs.len(), 1);
        assert_eq!(outcome.state.outputs[0].page_count, 2);
        assert!(outcome.state.validation.as_ref().unwrap().is_valid);
        // Heuristic confidence is below threshold, so the detector reports
        // low-confidence boundaries even on success.
        assert!(outcome
            .detected_errors
            .iter()
            .any(|e| e.kind == crate::model::ErrorKind::LowConfidenceBoundaries));
        // Input stays in place on success.
        assert!(input.exists());
    }

    #[tokio::test]
    async fn missing_input_is_quarantined_with_report() {
        let out = tempfile::tempdir().unwrap();
        let quarantine = tempfile::tempdir().unwrap();

        let workflow =
            Workflow::new(config_with_dirs(out.path(), quarantine.path())).unwrap();
        let outcome = workflow
            .run(Path::new("/nonexistent/bundle.pdf"), CancelToken::new())
            .await;

        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(SplitError::FileNotFound { .. })));
        let report_path = outcome.report_path.expect("report must be written");
        let report: ErrorReport =
            serde_json::from_slice(&std::fs::read(&report_path).unwrap()).unwrap();
        assert_eq!(report.stage, "extract_text");
        assert!(report.error.contains("not found"));
    }

    #[tokio::test]
    async fn cancellation_quarantines_with_operator_message() {
        let src_dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let quarantine = tempfile::tempdir().unwrap();

        let input = src_dir.path().join("bundle.pdf");
        testutil::build_pdf(&input, &["page one content"]);

        let cancel = CancelToken::new();
        cancel.cancel();

        let workflow =
            Workflow::new(config_with_dirs(out.path(), quarantine.path())).unwrap();
        let outcome = workflow.run(&input, cancel).await;

        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(SplitError::Cancelled)));
        assert_eq!(
            outcome.state.error_message.as_deref(),
            Some("operator cancelled")
        );
        // The source was moved into quarantine.
        assert!(quarantine.path().join("bundle.pdf").exists());
        assert!(!input.exists());
    }

    #[tokio::test]
    async fn batch_mode_processes_all_documents() {
        let src_dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let quarantine = tempfile::tempdir().unwrap();

        let mut inputs = Vec::new();
        for i in 0..3 {
            let path = src_dir.path().join(format!("bundle-{i}.pdf"));
            testutil::build_pdf(
                &path,
                &[&testutil::statement_page(
                    "ANZ",
                    &format!("1111 2222 3333 444{i}"),
                    "01 May 2024 to 31 May 2024",
                    "page 1",
                )],
            );
            inputs.push(path);
        }

        let mut config = config_with_dirs(out.path(), quarantine.path());
        config.workers = 2;
        let workflow = Workflow::new(config).unwrap();
        let outcomes = workflow.run_batch(&inputs, CancelToken::new()).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.success));
        // Three distinct outputs landed in the shared output directory.
        let produced = std::fs::read_dir(out.path()).unwrap().count();
        assert_eq!(produced, 3);
    }
}
