//! CLI binary for market-report-extract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, picks a document store and prints outcomes.

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use market_report_extract::{
    BatchDirs, DocumentOutcome, DocumentStore, ExtractionConfig, ExtractionProgressCallback,
    MarketReportExtractor, MemoryStore, ProgressCallback, SqliteStore, process_directory,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner that turns into a submarket counter once the list is known,
/// with one log line per target.
struct CliProgressCallback {
    bar: ProgressBar,
    failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening report…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            failures: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} submarkets  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_document_start(&self, path: &Path, page_count: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{} ({page_count} pages)", path.display()))
        ));
        self.bar.set_message("market snapshot");
    }

    fn on_submarket_start(&self, index: usize, total: usize, name: &str) {
        if index == 0 {
            self.activate_bar(total);
        }
        self.bar.set_position(index as u64);
        self.bar.set_message(name.to_string());
    }

    fn on_target_complete(&self, name: &str, directory: Option<&str>, error: Option<&str>) {
        let scope = directory.unwrap_or("market");
        match error {
            None => self.bar.println(format!(
                "  {} {:<32} {}",
                green("✓"),
                name,
                dim(scope)
            )),
            Some(e) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                let msg = if e.chars().count() > 80 {
                    format!("{}\u{2026}", e.chars().take(79).collect::<String>())
                } else {
                    e.to_string()
                };
                self.bar.println(format!(
                    "  {} {:<32} {}  {}",
                    red("✗"),
                    name,
                    dim(scope),
                    red(&msg)
                ));
            }
        }
    }

    fn on_submarket_complete(&self, index: usize, _total: usize, _name: &str, _success: bool) {
        self.bar.set_position(index as u64 + 1);
    }

    fn on_document_complete(&self, path: &Path, processed: bool) {
        let mark = if processed { green("✔") } else { cyan("⚠") };
        self.bar.println(format!(
            "{} {}  {}",
            mark,
            path.display(),
            if processed { "processed" } else { "incomplete" }
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one report into ./records.sqlite
  mrextract report.pdf

  # Extract without writing to a database
  mrextract --dry-run --json report.pdf > outcome.json

  # Process a whole directory, 4 reports at a time
  mrextract --concurrency 4 inbox/

  # Also extract property lists, supply/demand and sample units
  mrextract --extended report.pdf

  # Ask a one-off question about a report
  mrextract --ask "Which submarket has the highest occupancy?" report.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium; the system library is used otherwise
"#;

/// Extract structured records from real-estate market report PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "mrextract",
    version,
    about = "Extract structured records from multi-submarket real-estate report PDFs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Report file (.pdf or .txt) or a directory of reports.
    input: PathBuf,

    /// Cache root for per-target artifacts.
    #[arg(long, env = "MREXTRACT_WORK_DIR", default_value = "./results")]
    work_dir: PathBuf,

    /// Root for per-market copies and submarket slices.
    #[arg(long, env = "MREXTRACT_SUBMARKETS_DIR", default_value = "./submarkets")]
    submarkets_dir: PathBuf,

    /// SQLite database receiving the records.
    #[arg(long, env = "MREXTRACT_DB", default_value = "./records.sqlite")]
    db: PathBuf,

    /// Keep records in memory only; nothing is written to the database.
    #[arg(long, env = "MREXTRACT_DRY_RUN")]
    dry_run: bool,

    /// LLM model ID (default gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Documents processed at once in directory mode.
    #[arg(short, long, env = "MREXTRACT_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Also extract property lists, supply/demand and sample units.
    #[arg(long, env = "MREXTRACT_EXTENDED")]
    extended: bool,

    /// Ask one question about the report instead of extracting.
    #[arg(long)]
    ask: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "MREXTRACT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "MREXTRACT_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max LLM output tokens per answer.
    #[arg(long, env = "MREXTRACT_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Attempts per question before it counts as failed.
    #[arg(long, env = "MREXTRACT_ATTEMPTS", default_value_t = 3)]
    attempts: u32,

    /// PDF user password for encrypted reports.
    #[arg(long, env = "MREXTRACT_PDF_PASSWORD")]
    password: Option<String>,

    /// Directory for fully processed reports (directory mode).
    #[arg(long, env = "MREXTRACT_PROCESSED_DIR")]
    processed_dir: Option<PathBuf>,

    /// Directory for incomplete reports (directory mode).
    #[arg(long, env = "MREXTRACT_INCOMPLETE_DIR")]
    incomplete_dir: Option<PathBuf>,

    /// Output outcomes as JSON on stdout.
    #[arg(long, env = "MREXTRACT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "MREXTRACT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MREXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MREXTRACT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && cli.ask.is_none();
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
        .with_writer(std::io::stderr)
        .init();

    // ── Build config + store ─────────────────────────────────────────────
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress).await?;

    let store: Arc<dyn DocumentStore> = if cli.dry_run || cli.ask.is_some() {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            SqliteStore::connect(&cli.db)
                .await
                .with_context(|| format!("Failed to open database {}", cli.db.display()))?,
        )
    };

    let extractor =
        MarketReportExtractor::from_config(config, store).context("Failed to set up extractor")?;

    // ── Ask mode ─────────────────────────────────────────────────────────
    if let Some(ref question) = cli.ask {
        let answer = extractor
            .ask(&cli.input, question)
            .await
            .context("Question failed")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&answer).context("Failed to serialise answer")?
            );
        } else {
            println!("{}", answer.response_message);
        }
        return Ok(());
    }

    // ── Directory mode ───────────────────────────────────────────────────
    if cli.input.is_dir() {
        let mut dirs = BatchDirs::beside(&cli.input);
        if let Some(ref p) = cli.processed_dir {
            dirs.processed = p.clone();
        }
        if let Some(ref p) = cli.incomplete_dir {
            dirs.incomplete = p.clone();
        }
        let entries = process_directory(&extractor, &dirs)
            .await
            .context("Batch run failed")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&entries).context("Failed to serialise outcomes")?
            );
        } else if !cli.quiet {
            let processed = entries
                .iter()
                .filter(|e| e.outcome.as_ref().is_some_and(DocumentOutcome::is_processed))
                .count();
            for e in entries.iter().filter(|e| e.error.is_some()) {
                eprintln!(
                    "{} {}  {}",
                    red("✘"),
                    e.source.display(),
                    red(e.error.as_deref().unwrap_or_default())
                );
            }
            eprintln!(
                "{}  {}/{} reports processed",
                if processed == entries.len() { green("✔") } else { cyan("⚠") },
                bold(&processed.to_string()),
                entries.len()
            );
        }
        return Ok(());
    }

    // ── Single document ──────────────────────────────────────────────────
    let outcome = extractor
        .process_document(&cli.input)
        .await
        .context("Extraction failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("Failed to serialise outcome")?
        );
    } else if !cli.quiet {
        print_summary(&outcome);
    }

    if !outcome.is_processed() {
        bail!("{} is incomplete", cli.input.display());
    }
    Ok(())
}

fn print_summary(outcome: &DocumentOutcome) {
    let skipped = outcome.submarkets.iter().filter(|s| s.skipped.is_some()).count();
    let failures: Vec<_> = outcome.failures().collect();
    eprintln!(
        "{}  {}  {} submarkets ({} skipped)  {} model requests",
        if outcome.is_processed() { green("✔") } else { cyan("⚠") },
        bold(outcome.market.as_deref().unwrap_or("unknown market")),
        outcome.submarkets.len(),
        skipped,
        outcome.llm_requests
    );
    for s in outcome.submarkets.iter() {
        if let Some(ref reason) = s.skipped {
            eprintln!("   {} {}", dim("skipped"), reason);
        }
    }
    for t in failures {
        eprintln!(
            "   {} {} [{}]: {}",
            red("✗"),
            t.name,
            t.directory.as_deref().unwrap_or("market"),
            t.failure().map(ToString::to_string).unwrap_or_default()
        );
    }
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ExtractionConfig::builder()
        .work_dir(&cli.work_dir)
        .submarkets_dir(&cli.submarkets_dir)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .attempts_per_request(cli.attempts)
        .concurrency(cli.concurrency)
        .extended_targets(cli.extended);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
