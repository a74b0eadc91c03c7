//! CLI binary for statement-split.
//!
//! A thin shim over the library crate that maps CLI flags to [`Config`]
//! and prints results. Exit codes are part of the contract:
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | all documents processed successfully |
//! | 1 | at least one run failed and was quarantined |
//! | 2 | configuration error |
//! | 3 | DMS connectivity error |

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use statement_split::{CancelToken, Config, RunOutcome, Severity, Workflow};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Split one bundle into ./statements (heuristic only, no API key needed)
  stmt-split --provider none bundle.pdf

  # Split with a cloud model
  OPENAI_API_KEY=sk-... stmt-split bundle.pdf -o ./statements

  # Split with a local Ollama model
  stmt-split --provider local --model llama3.1 bundle.pdf

  # Batch mode over a directory, 4 workers
  stmt-split ./inbox --workers 4

  # Upload results to a paperless-style DMS and tag the input
  stmt-split bundle.pdf \
      --dms-url https://paperless.home.lan --dms-token $PAPERLESS_TOKEN \
      --dms-tags bank-statement --dms-correspondent "Westpac"

  # Check DMS connectivity and exit
  stmt-split --test-dms --dms-url https://paperless.home.lan --dms-token $TOKEN

OUTPUT NAMING:
  <bank>-<last4>-<end-date>.pdf        e.g. westpac-2819-2024-04-30.pdf
  A -p<page> suffix is appended when any component fell back to its
  default, so fallback names never collide.

FAILURE HANDLING:
  Failed runs are moved to the quarantine directory together with an
  error_report.json describing the failing stage and detected errors.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY           Cloud provider API key
  STMT_SPLIT_PROVIDER      Provider: cloud, local, none
  STMT_SPLIT_MODEL         Model ID override
  STMT_SPLIT_DMS_URL       DMS base URL
  STMT_SPLIT_DMS_TOKEN     DMS API token
"#;

/// Split bundled bank-statement PDFs into per-statement files.
#[derive(Parser, Debug)]
#[command(
    name = "stmt-split",
    version,
    about = "Split bundled bank-statement PDFs into per-statement files",
    long_about = "Split PDF bundles containing several concatenated bank statements into one \
correctly-named PDF per statement, using LLM boundary detection with a deterministic \
fallback. Optionally uploads results to a paperless-style document-management service.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF bundle, or a directory of bundles for batch mode.
    #[arg(required_unless_present = "test_dms")]
    input: Option<PathBuf>,

    /// Directory for the generated per-statement PDFs.
    #[arg(short, long, env = "STMT_SPLIT_OUTPUT", default_value = "./statements")]
    output: PathBuf,

    /// Directory failed runs are moved into.
    #[arg(long, env = "STMT_SPLIT_QUARANTINE", default_value = "./quarantine")]
    quarantine: PathBuf,

    /// LLM provider: cloud, local (Ollama), or none (heuristic only).
    #[arg(long, env = "STMT_SPLIT_PROVIDER", default_value = "cloud")]
    provider: String,

    /// Model ID (e.g. gpt-4o-mini, llama3.1).
    #[arg(long, env = "STMT_SPLIT_MODEL")]
    model: Option<String>,

    /// Cloud provider API key.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Provider base URL override (OpenAI-compatible endpoint or Ollama).
    #[arg(long, env = "STMT_SPLIT_LLM_URL")]
    llm_url: Option<String>,

    /// Provider requests per minute (token-bucket refill rate).
    #[arg(long, env = "STMT_SPLIT_RPM", default_value_t = 30)]
    requests_per_minute: u32,

    /// Token-bucket burst capacity.
    #[arg(long, env = "STMT_SPLIT_BURST", default_value_t = 10)]
    burst_limit: u32,

    /// Coalesce boundaries spanning fewer pages than this.
    #[arg(long, default_value_t = 1)]
    min_fragment_pages: usize,

    /// Maximum generated filename length.
    #[arg(long, default_value_t = 240)]
    max_filename_length: usize,

    /// Boundary/metadata confidence below this raises a low-confidence error.
    #[arg(long, default_value_t = 0.5)]
    confidence_threshold: f32,

    /// Batch-mode worker pool size.
    #[arg(short, long, env = "STMT_SPLIT_WORKERS", default_value_t = 1)]
    workers: usize,

    /// DMS base URL; enables the DMS integration when set with a token.
    #[arg(long, env = "STMT_SPLIT_DMS_URL")]
    dms_url: Option<String>,

    /// DMS API token.
    #[arg(long, env = "STMT_SPLIT_DMS_TOKEN", hide_env_values = true)]
    dms_token: Option<String>,

    /// Tags applied to uploaded statements (repeatable).
    #[arg(long = "dms-tags")]
    dms_tags: Vec<String>,

    /// Correspondent name for uploads.
    #[arg(long)]
    dms_correspondent: Option<String>,

    /// Document type name for uploads.
    #[arg(long)]
    dms_document_type: Option<String>,

    /// Storage path name for uploads.
    #[arg(long)]
    dms_storage_path: Option<String>,

    /// Tags applied to the input document when errors are detected
    /// (repeatable).
    #[arg(long = "error-tags")]
    error_tags: Vec<String>,

    /// Lowest severity that triggers error tagging: low, medium, high,
    /// critical.
    #[arg(long, default_value = "medium")]
    error_severity_floor: String,

    /// Test the DMS connection and exit.
    #[arg(long)]
    test_dms: bool,

    /// Output a JSON summary instead of human-readable lines.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(serde::Serialize)]
struct JsonSummary<'a> {
    input: &'a std::path::Path,
    success: bool,
    statements: usize,
    outputs: Vec<&'a str>,
    uploads: usize,
    error: Option<String>,
    report: Option<&'a std::path::Path>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", red("error:"));
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = build_config(&cli).context("invalid configuration")?;

    // ── DMS connectivity check ───────────────────────────────────────────
    if cli.test_dms {
        let workflow = Workflow::new(config).context("invalid configuration")?;
        let Some(dms) = workflow.dms() else {
            eprintln!("{}", red("DMS is not configured (need --dms-url and --dms-token)"));
            return Ok(ExitCode::from(2));
        };
        return match dms.test_connection().await {
            Ok(()) => {
                if !cli.quiet {
                    println!("{} DMS connection ok", green("✔"));
                }
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                eprintln!("{} {e}", red("✘"));
                Ok(ExitCode::from(3))
            }
        };
    }

    let input = cli.input.clone().expect("clap requires input unless --test-dms");
    let inputs = collect_inputs(&input)?;
    if inputs.is_empty() {
        anyhow::bail!("no PDF files found under '{}'", input.display());
    }

    let workflow = Workflow::new(config).context("invalid configuration")?;

    // DMS reachability is checked up front so a dead endpoint fails the
    // whole invocation with its own exit code instead of quarantining
    // every document at the upload stage.
    if let Some(dms) = workflow.dms() {
        if let Err(e) = dms.test_connection().await {
            eprintln!("{} {e}", red("✘"));
            return Ok(ExitCode::from(3));
        }
    }

    // ── Cancellation on Ctrl-C ───────────────────────────────────────────
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n{}", dim("cancelling — in-flight calls may finish"));
                cancel.cancel();
            }
        });
    }

    // ── Progress bar ─────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && inputs.len() > 1;
    let bar = if show_progress {
        let bar = ProgressBar::new(inputs.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} documents  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        bar.set_prefix("Splitting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Some(bar)
    } else {
        None
    };

    // ── Run ──────────────────────────────────────────────────────────────
    // Same bounded worker pool as Workflow::run_batch, driven here so the
    // bar ticks as documents complete.
    let workers = workflow.config().workers.max(1);
    let mut outcomes = Vec::with_capacity(inputs.len());
    {
        let mut stream = futures::stream::iter(inputs.iter())
            .map(|p| workflow.run(p, cancel.clone()))
            .buffer_unordered(workers);
        while let Some(outcome) = stream.next().await {
            if let Some(ref bar) = bar {
                bar.inc(1);
            }
            outcomes.push(outcome);
        }
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        let summaries: Vec<JsonSummary<'_>> = outcomes.iter().map(json_summary).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else if !cli.quiet {
        for outcome in &outcomes {
            print_outcome(outcome);
        }
        let failed = outcomes.iter().filter(|o| !o.success).count();
        let total: usize = outcomes.iter().map(|o| o.state.outputs.len()).sum();
        if failed == 0 {
            eprintln!(
                "{} {} document(s) → {} statement(s)",
                green("✔"),
                bold(&outcomes.len().to_string()),
                bold(&total.to_string()),
            );
        } else {
            eprintln!(
                "{} {}/{} document(s) failed — see the quarantine directory",
                red("✘"),
                failed,
                outcomes.len(),
            );
        }
    }

    let any_failed = outcomes.iter().any(|o| !o.success);
    Ok(if any_failed {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

/// One line per document: stage-of-failure and the report path on failure,
/// the produced filenames on success.
fn print_outcome(outcome: &RunOutcome) {
    if outcome.success {
        for output in &outcome.state.outputs {
            eprintln!(
                "  {} {}  {}",
                green("✓"),
                output.filename,
                dim(&format!("{} page(s)", output.page_count)),
            );
        }
    } else {
        let stage = outcome.state.current_stage.to_string();
        let report = outcome
            .report_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<no report>".into());
        eprintln!(
            "  {} {}  failed at {}  {}",
            red("✗"),
            outcome.state.input_path.display(),
            stage,
            dim(&report),
        );
    }
}

fn json_summary(outcome: &RunOutcome) -> JsonSummary<'_> {
    JsonSummary {
        input: &outcome.state.input_path,
        success: outcome.success,
        statements: outcome.state.outputs.len(),
        outputs: outcome
            .state
            .outputs
            .iter()
            .map(|o| o.filename.as_str())
            .collect(),
        uploads: outcome.state.upload_results.len(),
        error: outcome.error.as_ref().map(|e| e.to_string()),
        report: outcome.report_path.as_deref(),
    }
}

/// Map CLI args to [`Config`].
fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let severity_floor = Severity::parse(&cli.error_severity_floor)
        .with_context(|| format!("unknown severity '{}'", cli.error_severity_floor))?;
    let severity_levels: Vec<Severity> =
        [Severity::Low, Severity::Medium, Severity::High, Severity::Critical]
            .into_iter()
            .filter(|s| *s >= severity_floor)
            .collect();

    let mut builder = Config::builder()
        .provider(&cli.provider)?
        .requests_per_minute(cli.requests_per_minute)
        .burst_limit(cli.burst_limit)
        .min_fragment_pages(cli.min_fragment_pages)
        .max_filename_length(cli.max_filename_length)
        .confidence_threshold(cli.confidence_threshold)
        .output_dir(&cli.output)
        .quarantine_dir(&cli.quarantine)
        .workers(cli.workers)
        .error_severity_levels(severity_levels);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref url) = cli.llm_url {
        builder = builder.llm_base_url(url);
    }
    if let (Some(url), Some(token)) = (&cli.dms_url, &cli.dms_token) {
        builder = builder
            .dms_enabled(true)
            .dms_base_url(url)
            .dms_token(token)
            .dms_tags(cli.dms_tags.clone());
        if let Some(ref name) = cli.dms_correspondent {
            builder = builder.dms_correspondent(name);
        }
        if let Some(ref name) = cli.dms_document_type {
            builder = builder.dms_document_type(name);
        }
        if let Some(ref name) = cli.dms_storage_path {
            builder = builder.dms_storage_path(name);
        }
    }
    if !cli.error_tags.is_empty() {
        builder = builder.error_tags(cli.error_tags.clone());
    }

    Ok(builder.build()?)
}

/// A single file, or every `.pdf` directly under a directory (sorted for
/// deterministic batch ordering).
fn collect_inputs(input: &PathBuf) -> anyhow::Result<Vec<PathBuf>> {
    if input.is_dir() {
        let mut pdfs: Vec<PathBuf> = std::fs::read_dir(input)
            .with_context(|| format!("cannot read directory '{}'", input.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .is_some_and(|x| x.eq_ignore_ascii_case("pdf"))
            })
            .collect();
        pdfs.sort();
        Ok(pdfs)
    } else {
        Ok(vec![input.clone()])
    }
}
