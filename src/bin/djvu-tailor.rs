//! CLI binary for djvu-tailor.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `AssemblyConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use djvu_tailor::{
    assemble, default_output_path, inspect, AssemblyConfig, AssemblyProgressCallback, PageKind,
    PageSet, ProgressCallback, SliceQuality, ToneDetection, Toolchain,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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

/// Live progress bar plus one log line per finished page. Pages may finish
/// out of order when more than one worker is running.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Scanning pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, page: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl AssemblyProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_prefix("Encoding");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Encoding {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page, Instant::now());
        }
        self.bar.set_message(format!("page {page}"));
    }

    fn on_page_complete(&self, page: usize, total: usize, artifact_bytes: u64) {
        let secs = self.elapsed_secs(page);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            page,
            total,
            dim(&format!("{:>6} KiB", artifact_bytes / 1024)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_pages: usize, success_count: usize) {
        let failed = self.errors.load(Ordering::SeqCst);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages encoded, merging…",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages encoded  ({} failed), nothing written",
                red("✘"),
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"INPUT LAYOUT:
  book/
    001.tif               single-layer page (bitonal → cjb2, otherwise c44)
    002.tif               placeholder, superseded by the layer pair below
    background/002.tif    continuous-tone background layer
    foreground/002.tif    bitonal text mask
    003.tif

  Pages are ordered by file stem, comparing digit runs numerically.

EXAMPLES:
  # Assemble into book/output.djvu
  djvu-tailor book/

  # Explicit output, four parallel pages, higher resolution
  djvu-tailor book/ -o book.djvu -t 4 -r 600

  # Show how pages would be classified without encoding anything
  djvu-tailor --dry-run book/

  # Keep intermediate files for inspection
  djvu-tailor --keep-temp --temp-dir /tmp/book-work book/

REQUIRED PROGRAMS:
  tifftopnm                         netpbm
  pbmtodjvurle cjb2 c44 csepdjvu djvm   djvulibre

ENVIRONMENT VARIABLES:
  TEMPDIR                 Base directory for the run workspace
  DJVU_TAILOR_TOOL_DIR    Directory holding the programs above
  RUST_LOG                Overrides the log filter
"#;

/// Assemble a directory of scanned page images into one DjVu document.
#[derive(Parser, Debug)]
#[command(
    name = "djvu-tailor",
    version,
    about = "Assemble scanned page images into a bundled multi-page DjVu document",
    long_about = "Assemble a directory of page images into one bundled DjVu document. \
Single images become bitonal (cjb2) or photo (c44) pages; background/foreground layer pairs \
become compound pages (csepdjvu). Pages are encoded in parallel and merged with djvm.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory of page images.
    input: PathBuf,

    /// Output document [default: INPUT/output.djvu].
    #[arg(short, long, env = "DJVU_TAILOR_OUTPUT")]
    output: Option<PathBuf>,

    /// Resolution in dots per inch.
    #[arg(short = 'r', long, env = "DJVU_TAILOR_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(25..=6000))]
    dpi: u32,

    /// cjb2 loss level for bitonal pages (0 = lossless).
    #[arg(short = 'b', long = "losslevel", env = "DJVU_TAILOR_LOSSLEVEL", default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(0..=200))]
    loss_level: u32,

    /// IW44 quality slices for photo and background layers.
    #[arg(short = 'q', long, env = "DJVU_TAILOR_QUALITY", default_value = "74,89,99")]
    quality: String,

    /// Base directory for the run workspace; each run gets its own subdirectory.
    #[arg(long, env = "TEMPDIR")]
    temp_dir: Option<PathBuf>,

    /// Keep the workspace after the run.
    #[arg(long, env = "DJVU_TAILOR_KEEP_TEMP")]
    keep_temp: bool,

    /// Pages encoded in parallel.
    #[arg(short = 't', long, env = "DJVU_TAILOR_THREADS", default_value_t = 1)]
    threads: usize,

    /// Kill any single tool invocation after this many seconds.
    #[arg(long, env = "DJVU_TAILOR_TIMEOUT")]
    timeout: Option<u64>,

    /// How single-layer pages are judged bitonal.
    #[arg(long, env = "DJVU_TAILOR_TONE", value_enum, default_value = "auto")]
    tone: ToneArg,

    /// Directory holding tifftopnm and the djvulibre programs.
    #[arg(long, env = "DJVU_TAILOR_TOOL_DIR")]
    tool_dir: Option<PathBuf>,

    /// Replace an existing output file.
    #[arg(long, env = "DJVU_TAILOR_OVERWRITE")]
    overwrite: bool,

    /// Classify pages and print the plan; encode nothing.
    #[arg(long)]
    dry_run: bool,

    /// Print the run report (or page plan) as JSON on stdout.
    #[arg(long, env = "DJVU_TAILOR_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DJVU_TAILOR_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DJVU_TAILOR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(long, env = "DJVU_TAILOR_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ToneArg {
    /// Bitonal iff stored as 1 bit per pixel.
    Auto,
    Bitonal,
    Photo,
}

impl From<ToneArg> for ToneDetection {
    fn from(v: ToneArg) -> Self {
        match v {
            ToneArg::Auto => ToneDetection::ColorMode,
            ToneArg::Bitonal => ToneDetection::AlwaysBitonal,
            ToneArg::Photo => ToneDetection::AlwaysContinuousTone,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs stay quiet while the progress bar is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.dry_run;
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn AssemblyProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Dry run ──────────────────────────────────────────────────────────
    if cli.dry_run {
        let pages = inspect(&cli.input, &config)
            .map_err(|e| anyhow::anyhow!(e.failure_summary()))
            .context("Failed to classify pages")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&pages).context("Failed to serialise page plan")?
            );
        } else {
            print_plan(&pages, &cli);
        }
        return Ok(());
    }

    // ── Run assembly ─────────────────────────────────────────────────────
    let report = assemble(&cli.input, cli.output.as_deref(), &config)
        .await
        .map_err(|e| anyhow::anyhow!(e.failure_summary()))
        .context("Assembly failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        let s = &report.stats;
        eprintln!(
            "{}  {} pages ({} single, {} compound)  {} KiB  {}ms  →  {}",
            green("✔"),
            s.total_pages,
            s.single_pages,
            s.dual_pages,
            s.output_bytes / 1024,
            s.total_ms,
            bold(&report.output.display().to_string()),
        );
        if let Some(ref kept) = report.retained_workspace {
            eprintln!("   {} {}", dim("workspace kept at"), kept.display());
        }
    }

    Ok(())
}

/// Map CLI args to `AssemblyConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AssemblyConfig> {
    let quality: SliceQuality = cli
        .quality
        .parse()
        .with_context(|| format!("Invalid --quality '{}'", cli.quality))?;

    let mut builder = AssemblyConfig::builder()
        .dpi(cli.dpi)
        .bitonal_loss_level(cli.loss_level)
        .photo_quality(quality)
        .workers(cli.threads)
        .keep_temp(cli.keep_temp)
        .overwrite(cli.overwrite)
        .tone_detection(cli.tone.into());

    if let Some(ref dir) = cli.temp_dir {
        builder = builder.temp_dir(dir);
    }
    if let Some(secs) = cli.timeout {
        builder = builder.tool_timeout_secs(secs);
    }
    if let Some(ref dir) = cli.tool_dir {
        builder = builder.toolchain(Toolchain::in_dir(dir));
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_plan(pages: &PageSet, cli: &Cli) {
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.input));
    println!("Input:   {}", pages.root.display());
    println!("Output:  {}", output.display());
    println!(
        "Pages:   {} ({} single, {} compound)",
        pages.len(),
        pages.single_count(),
        pages.dual_count()
    );
    for page in &pages.pages {
        match page.kind {
            PageKind::Single { ref path } => {
                println!("  {:>4}  {:<24} {}", page.index, page.id, dim(&path.display().to_string()))
            }
            PageKind::Dual {
                ref background,
                ref foreground,
            } => println!(
                "  {:>4}  {:<24} {} + {}",
                page.index,
                page.id,
                dim(&background.display().to_string()),
                dim(&foreground.display().to_string())
            ),
        }
    }
}
