//! CLI binary for edgequake-esg.
//!
//! A thin shim over the library crate: `structure` writes the per-page
//! artifacts of a report, `extract` reads its tables and stores emission
//! records.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_esg::extract::store::JsonFileEmissionStore;
use edgequake_esg::extract::tables::load_report_tables;
use edgequake_esg::pipeline::manifest::ReportLayout;
use edgequake_esg::{
    resolve_provider, structure_document, Document, EmissionExtractor, EmissionRecord, ExtractionConfig,
    ExtractionMode, LlmReasoner, PageSelection, ProgressCallback, StructureConfig, StructureProgressCallback,
    TextReasoner, VisionReasoner,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Progress bar over selected pages, with one log line per fallback or skip.
struct CliProgressCallback {
    bar: ProgressBar,
    fallbacks: AtomicUsize,
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
            fallbacks: AtomicUsize::new(0),
        })
    }
}

impl StructureProgressCallback for CliProgressCallback {
    fn on_structure_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Structuring");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Structuring {total_pages} pages…"))
        ));
    }

    fn on_batch_start(&self, start: u32, end: u32) {
        self.bar.set_message(format!("pages {start}-{end}"));
    }

    fn on_page_complete(&self, _page_num: u32, _tables: usize, _figures: usize) {
        self.bar.inc(1);
    }

    fn on_page_fallback(&self, page_num: u32) {
        self.fallbacks.fetch_add(1, Ordering::SeqCst);
        self.bar
            .println(format!("  {} Page {:>4}  {}", yellow("↺"), page_num, dim("rebuilt from page image")));
    }

    fn on_page_skipped(&self, page_num: u32, reason: &str) {
        self.bar
            .println(format!("  {} Page {:>4}  {}", yellow("–"), page_num, dim(reason)));
        self.bar.inc(1);
    }

    fn on_structure_complete(&self, written: usize, skipped: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} pages written  ({} via fallback, {} skipped)",
            if skipped == 0 { green("✔") } else { yellow("⚠") },
            bold(&written.to_string()),
            self.fallbacks.load(Ordering::SeqCst),
            skipped
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Structure a report against its Docling JSON export
  esg-extract structure hanbit_2025.pdf --docling-json hanbit_2025.json -o reports

  # Only the first 40 pages, without any model calls
  esg-extract structure hanbit_2025.pdf --docling-json hanbit_2025.json --count 40 --no-llm

  # Extract with the pattern → text → vision cascade
  esg-extract extract reports/hanbit_2025 --company 한빛전자 --report-year 2025

  # Relevance-scored vision extraction, records printed as JSON
  esg-extract extract reports/hanbit_2025 --company 한빛전자 --report-year 2025 --mode auto --json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID

  PDFium must be installed where pdfium-render can find it (system library
  path or next to the binary).
"#;

/// Structure ESG disclosure PDFs and extract emission figures.
#[derive(Parser, Debug)]
#[command(
    name = "esg-extract",
    version,
    about = "Structure ESG disclosure PDFs and extract emission figures",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Never call a model, even when a provider is configured.
    #[arg(long, global = true, env = "ESG_NO_LLM")]
    no_llm: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "ESG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "ESG_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write per-page markdown, tables and figures for a PDF.
    Structure(StructureArgs),
    /// Extract emission records from a structured report.
    Extract(ExtractArgs),
}

#[derive(Args, Debug)]
struct StructureArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Docling JSON export of the same PDF.
    #[arg(long, env = "ESG_DOCLING_JSON")]
    docling_json: PathBuf,

    /// Directory that receives the report directory.
    #[arg(short, long, env = "ESG_OUTPUT_DIR", default_value = "reports")]
    output_dir: PathBuf,

    /// Report directory name. Default: the sanitised PDF file stem.
    #[arg(long)]
    report_name: Option<String>,

    /// Page selection: all, 5, 3-15, or 1,3,5-7.
    #[arg(long, env = "ESG_PAGES", default_value = "all", conflicts_with = "count")]
    pages: String,

    /// Only the first N pages.
    #[arg(long)]
    count: Option<usize>,

    /// Raster scale relative to 72 DPI.
    #[arg(long, env = "ESG_RENDER_SCALE", default_value_t = 2.0)]
    render_scale: f32,

    /// Visual-density threshold for flagging a page for review.
    #[arg(long, env = "ESG_VISUAL_THRESHOLD", default_value_t = 0.35)]
    visual_threshold: f64,

    /// Write an LLM summary next to each page.
    #[arg(long, env = "ESG_PAGE_SUMMARY")]
    page_summary: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "ESG_PASSWORD")]
    password: Option<String>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "ESG_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable progress bar.
    #[arg(long, env = "ESG_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Report directory written by `structure`.
    report_dir: PathBuf,

    /// Company name the records are stored under.
    #[arg(long, env = "ESG_COMPANY")]
    company: String,

    /// Publication year of the report; figures are for the year before.
    #[arg(long, env = "ESG_REPORT_YEAR")]
    report_year: i32,

    /// pattern, text, vision, cascade or auto.
    #[arg(long, env = "ESG_MODE", default_value = "cascade")]
    mode: ExtractionMode,

    /// JSON file the records are upserted into.
    #[arg(long, env = "ESG_STORE", default_value = "emissions.json")]
    store: PathBuf,

    /// Print the stored records as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The progress bar covers INFO-level feedback during structuring.
    let show_progress = matches!(&cli.command, Command::Structure(a) if !a.no_progress) && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Structure(args) => run_structure(&cli, args, show_progress).await,
        Command::Extract(args) => run_extract(&cli, args).await,
    }
}

/// Build the reasoner from `--provider` / `--model` or the environment.
///
/// `None` when `--no-llm` is set or no provider can be resolved.
fn reasoner(cli: &Cli) -> Option<Arc<LlmReasoner>> {
    if cli.no_llm {
        return None;
    }
    match resolve_provider(cli.provider.as_deref(), cli.model.as_deref()) {
        Ok(provider) => Some(Arc::new(LlmReasoner::new(provider))),
        Err(e) => {
            warn!("No LLM provider: {e}");
            None
        }
    }
}

async fn run_structure(cli: &Cli, args: &StructureArgs, show_progress: bool) -> Result<()> {
    let pages = match args.count {
        Some(n) => PageSelection::First(n),
        None => args.pages.parse().context("Invalid --pages")?,
    };
    let mut builder = StructureConfig::builder()
        .pages(pages)
        .render_scale(args.render_scale)
        .visual_threshold(args.visual_threshold)
        .page_summaries(args.page_summary)
        .download_timeout_secs(args.download_timeout);
    if let Some(ref pwd) = args.password {
        builder = builder.password(pwd.clone());
    }
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let llm = reasoner(cli);
    let vision = llm.clone().map(|r| r as Arc<dyn VisionReasoner>);
    let text = llm.map(|r| r as Arc<dyn TextReasoner>);

    let report = structure_document(
        &args.input,
        &args.docling_json,
        &args.output_dir,
        args.report_name.as_deref(),
        config,
        vision,
        text,
    )
    .await
    .context("Structuring failed")?;

    if !cli.quiet {
        eprintln!(
            "{}  {} pages  {} tables  {} figures  {}ms  →  {}",
            green("✔"),
            report.pages.len(),
            report.table_count(),
            report.figure_count(),
            report.total_time_ms,
            bold(&report.report_dir.display().to_string()),
        );
    }
    Ok(())
}

async fn run_extract(cli: &Cli, args: &ExtractArgs) -> Result<()> {
    let layout = ReportLayout::new(&args.report_dir);
    let tables = load_report_tables(&layout)
        .await
        .with_context(|| format!("Failed to load tables from {}", args.report_dir.display()))?;

    let filename = args
        .report_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let document = Document::new(&args.company, args.report_year, filename);

    let mut extractor = EmissionExtractor::new(ExtractionConfig::default(), document.data_year());
    if args.mode != ExtractionMode::Pattern {
        if let Some(llm) = reasoner(cli) {
            extractor = extractor
                .with_text_reasoner(llm.clone())
                .with_vision_reasoner(llm);
        }
    }

    let store = JsonFileEmissionStore::open(&args.store)
        .await
        .with_context(|| format!("Failed to open store {}", args.store.display()))?;
    let records = extractor
        .extract_and_store(&document, args.mode, &tables, &store)
        .await
        .context("Extraction failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&records).context("Failed to serialise records")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&records);
    }
    Ok(())
}

fn print_summary(records: &[EmissionRecord]) {
    let Some(head) = records.first() else {
        eprintln!("{} no emission figures found", yellow("⚠"));
        return;
    };
    let fmt = |v: Option<f64>| v.map(|v| format!("{v:.0}")).unwrap_or_else(|| dim("-"));
    eprintln!(
        "{}  {} {}  via {}",
        green("✔"),
        bold(&head.company_name),
        head.year,
        head.extraction_tier
    );
    for r in records {
        eprintln!(
            "   {}  S1 {:>10}  S2 {:>10}  S3 {:>10}{}",
            r.year,
            fmt(r.scope1),
            fmt(r.scope2),
            fmt(r.scope3),
            if r.scope_split_estimated { dim("  (split estimated)") } else { String::new() }
        );
    }
}
