//! CLI binary for edgequake-docsplit.
//!
//! A thin shim over the library crate that maps CLI flags to `SplitConfig`,
//! wires Ctrl-C to run cancellation and prints the run manifest.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_docsplit::{
    split_and_deliver_cancellable, CancellationToken, DeliveryOutcome, DeliveryResult,
    DriveSettings, IdentityProvider, PageMetadata, ProgressCallback, RefreshTokenFlow,
    RunManifest, RunStatus, SplitConfig, SplitProgressCallback, Stage, StaticToken,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar over pages while extracting, then over groups
/// while delivering, with a log line per page and per upload.
struct CliProgressCallback {
    bar: ProgressBar,
    page_errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize, prefix: &'static str, unit: &str) {
        let template = format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {unit}  \
             ⏱ {{elapsed_precise}}  ETA {{eta_precise}}"
        );
        let style = ProgressStyle::with_template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS);
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix(prefix);
        self.bar.reset_eta();
    }
}

fn truncate(msg: &str, max: usize) -> String {
    if msg.chars().count() > max {
        let cut: String = msg.chars().take(max - 1).collect();
        format!("{cut}\u{2026}")
    } else {
        msg.to_string()
    }
}

impl SplitProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        self.activate_bar(total_pages, "Reading", "pages");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Reading {total_pages} pages…"))
        ));
    }

    fn on_stage(&self, stage: Stage) {
        if stage == Stage::Grouping || stage == Stage::Splitting {
            self.bar.set_message(format!("{stage}…"));
        }
    }

    fn on_page_start(&self, page_index: usize, _total_pages: usize) {
        self.bar.set_message(format!("page {page_index}"));
    }

    fn on_extraction_retry(&self, page_index: usize, attempt: u32, delay_ms: u64) {
        self.bar.println(format!(
            "  {} Page {:>3}  rate limited (attempt {}), retrying in {:.1}s",
            cyan("↻"),
            page_index,
            attempt,
            delay_ms as f64 / 1000.0
        ));
    }

    fn on_page_extracted(&self, metadata: &PageMetadata, total_pages: usize) {
        let invoice = metadata.invoice_no.as_deref().unwrap_or("—");
        let ship_to = metadata.ship_to.as_deref().unwrap_or("—");
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<16}  {}",
            green("✓"),
            metadata.page_index,
            total_pages,
            invoice,
            dim(ship_to),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_index: usize, total_pages: usize, error: &str) {
        self.page_errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            red("✗"),
            page_index,
            total_pages,
            red(&truncate(error, 80)),
        ));
        self.bar.inc(1);
    }

    fn on_delivery(&self, result: &DeliveryResult, total_groups: usize) {
        // Deliveries are reported in group order.
        if result.group_index == 1 {
            self.activate_bar(total_groups, "Delivering", "files");
        }
        let line = match result.outcome {
            DeliveryOutcome::Uploaded { .. } => format!(
                "  {} {}  →  {}",
                green("↑"),
                result.file_name,
                dim(&result.folder_name)
            ),
            DeliveryOutcome::Failed { ref error } => format!(
                "  {} {}  {}",
                red("✗"),
                result.file_name,
                red(&truncate(&error.to_string(), 80))
            ),
        };
        self.bar.println(line);
        self.bar.inc(1);
    }

    fn on_run_complete(&self, manifest: &RunManifest) {
        self.bar.finish_and_clear();
        let stats = &manifest.stats;
        let mark = match manifest.status {
            RunStatus::Done if stats.failed_deliveries == 0 => green("✔"),
            RunStatus::Done => cyan("⚠"),
            _ => red("✘"),
        };
        eprintln!(
            "{} {} files delivered from {} pages  ({} failed, {} unreadable pages)",
            mark,
            bold(&stats.uploaded.to_string()),
            stats.total_pages,
            stats.failed_deliveries,
            self.page_errors.load(Ordering::SeqCst),
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Dry run into a local directory
  docsplit batch.pdf --output-dir ./out

  # Deliver to Google Drive under a parent folder
  docsplit batch.pdf --drive-client-id 1234.apps.googleusercontent.com \
      --drive-folder-id 0AbCdEf --drive-access-token ya29...

  # Use a specific model, two pages in flight
  docsplit --provider gemini --model gemini-2.5-pro -c 2 batch.pdf --output-dir ./out

  # Write the run manifest as JSON
  docsplit batch.pdf --output-dir ./out --manifest run.json

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (preferred when set)
  OPENAI_API_KEY          OpenAI API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (gemini, openai, anthropic, ollama)
  EDGEQUAKE_MODEL         Override model ID
  DRIVE_CLIENT_ID         OAuth client id for Drive delivery
  DRIVE_FOLDER_ID         Parent Drive folder for client folders
  DRIVE_ACCESS_TOKEN      Pre-issued Drive bearer token
  DRIVE_REFRESH_TOKEN     OAuth refresh token (exchanged for an access token)
  DRIVE_CLIENT_SECRET     OAuth client secret for the refresh grant
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
"#;

/// Split scanned invoice batches into per-invoice PDFs and file them by client.
#[derive(Parser, Debug)]
#[command(
    name = "docsplit",
    version,
    about = "Split scanned invoice batches into per-invoice PDFs and file them by client",
    long_about = "Render every page of a scanned invoice batch, read the invoice number and \
ship-to client with a Vision Language Model, group consecutive pages of the same invoice, \
and deliver each invoice as its own PDF into the client's folder on Google Drive or a \
local directory.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Deliver into this directory instead of Google Drive.
    #[arg(short, long, env = "DOCSPLIT_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// OAuth client id used to obtain the Drive token.
    #[arg(long, env = "DRIVE_CLIENT_ID", default_value = "")]
    drive_client_id: String,

    /// Drive folder under which client folders are created.
    #[arg(long, env = "DRIVE_FOLDER_ID")]
    drive_folder_id: Option<String>,

    /// Pre-issued Drive bearer token.
    #[arg(long, env = "DRIVE_ACCESS_TOKEN", hide_env_values = true)]
    drive_access_token: Option<String>,

    /// OAuth refresh token, exchanged for an access token at start of delivery.
    #[arg(long, env = "DRIVE_REFRESH_TOKEN", hide_env_values = true)]
    drive_refresh_token: Option<String>,

    /// OAuth client secret for the refresh grant.
    #[arg(long, env = "DRIVE_CLIENT_SECRET", hide_env_values = true)]
    drive_client_secret: Option<String>,

    /// LLM model ID (e.g. gemini-2.5-flash, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: gemini, openai, anthropic, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Render scale factor (0.5–4.0).
    #[arg(long, env = "DOCSPLIT_SCALE", default_value_t = 1.5)]
    scale: f32,

    /// JPEG quality for page images (1–100).
    #[arg(long, env = "DOCSPLIT_JPEG_QUALITY", default_value_t = 80,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Pages rendered and extracted concurrently.
    #[arg(short, long, env = "DOCSPLIT_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Attempts per page when the model is rate limited.
    #[arg(long, env = "DOCSPLIT_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Do not ask the provider for a JSON object response.
    #[arg(long, env = "DOCSPLIT_NO_JSON_MODE")]
    no_json_mode: bool,

    /// Base backoff in milliseconds, doubled after each rate-limited attempt.
    #[arg(long, env = "DOCSPLIT_RETRY_BACKOFF_MS", default_value_t = 2000)]
    retry_backoff_ms: u64,

    /// Path to a text file containing a custom extraction prompt.
    #[arg(long, env = "DOCSPLIT_PROMPT")]
    prompt_file: Option<PathBuf>,

    /// Folder for invoices without a detected client.
    #[arg(long, env = "DOCSPLIT_UNCLASSIFIED", default_value = "Unclassified")]
    unclassified_folder: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "DOCSPLIT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Path to libpdfium (file or directory containing it).
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Write the run manifest as JSON to this file.
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Print the run manifest as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCSPLIT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCSPLIT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCSPLIT_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOCSPLIT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-page LLM call timeout in seconds.
    #[arg(long, env = "DOCSPLIT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Abandon the run after this many seconds.
    #[arg(long, env = "DOCSPLIT_RUN_TIMEOUT")]
    run_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn SplitProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Ctrl-C cancels the run; uploads already made are kept ────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", cyan("Cancelling… (uploads already made are kept)"));
                cancel.cancel();
            }
        });
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let manifest = split_and_deliver_cancellable(&cli.input, &config, cancel)
        .await
        .context("Run could not start")?;

    if let Some(ref path) = cli.manifest {
        let json = serde_json::to_string_pretty(&manifest).context("Failed to serialise manifest")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write manifest to {:?}", path))?;
    }

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&manifest).context("Failed to serialise manifest")?
        );
    } else if !cli.quiet && !show_progress {
        eprintln!(
            "Delivered {}/{} files from {} pages in {}ms",
            manifest.stats.uploaded,
            manifest.stats.groups,
            manifest.stats.total_pages,
            manifest.stats.total_duration_ms
        );
        for failed in manifest.failed() {
            if let DeliveryOutcome::Failed { ref error } = failed.outcome {
                eprintln!("  {} {}", red("✗"), error);
            }
        }
    }

    match manifest.status {
        RunStatus::Done => Ok(()),
        RunStatus::Cancelled { stage } => {
            eprintln!("{} run cancelled during {}", red("✘"), stage);
            std::process::exit(130);
        }
        RunStatus::Failed { stage, ref reason } => {
            anyhow::bail!("Run failed during {}: {}", stage, reason)
        }
    }
}

/// Map CLI args to `SplitConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<SplitConfig> {
    let mut builder = SplitConfig::builder()
        .render_scale(cli.scale)
        .jpeg_quality(cli.jpeg_quality)
        .concurrency(cli.concurrency)
        .max_attempts(cli.max_attempts)
        .json_mode(!cli.no_json_mode)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .unclassified_folder(cli.unclassified_folder.clone())
        .drive(DriveSettings {
            drive_client_id: cli.drive_client_id.clone(),
            drive_folder_id: cli.drive_folder_id.clone(),
        });

    if let Some(ref path) = cli.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read extraction prompt from {:?}", path))?;
        builder = builder.extraction_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(ref path) = cli.pdfium_lib {
        builder = builder.pdfium_library_path(path.clone());
    }
    if let Some(secs) = cli.run_timeout {
        builder = builder.run_timeout_secs(secs);
    }
    if let Some(ref dir) = cli.output_dir {
        builder = builder.output_dir(dir.clone());
    } else if let Some(identity) = identity_from_cli(cli) {
        builder = builder.identity(identity);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Access token wins over refresh token when both are given.
fn identity_from_cli(cli: &Cli) -> Option<Arc<dyn IdentityProvider>> {
    if let Some(ref token) = cli.drive_access_token {
        return Some(Arc::new(StaticToken::new(token.clone())));
    }
    cli.drive_refresh_token.as_ref().map(|refresh| {
        Arc::new(RefreshTokenFlow::new(
            refresh.clone(),
            cli.drive_client_secret.clone(),
        )) as Arc<dyn IdentityProvider>
    })
}
