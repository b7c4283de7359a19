//! CLI binary for fontmend.
//!
//! A thin shim over the library crate that maps CLI flags to `JobConfig`
//! and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use fontmend::{
    process, scan, CompressionProfile, CoverMetadata, Dpi, JobConfig, JobProgress, PageMode,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar across the enabled stages, with
/// per-page log lines while the repair stage rebuilds pages.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_job_start

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }
}

impl JobProgress for CliProgress {
    fn on_job_start(&self, total_stages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:30.green/238}] {pos}/{len} stages  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");

        self.bar.set_length(total_stages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Processing");
    }

    fn on_stage_start(&self, _stage: &'static str, message: &'static str) {
        self.bar.set_message(message);
    }

    fn on_scan_progress(&self, pages_scanned: usize, total_pages: usize) {
        self.bar
            .set_message(format!("Scanning fonts… {pages_scanned}/{total_pages} pages"));
    }

    fn on_page_repaired(&self, page: usize, index: usize, total: usize) {
        self.bar.println(format!(
            "  {} rebuilt page {:>4}  {}",
            green("✓"),
            page,
            dim(&format!("({index}/{total})")),
        ));
    }

    fn on_stage_complete(&self, stage: &'static str) {
        self.bar.println(format!("{} {}", green("✓"), stage));
        self.bar.inc(1);
    }

    fn on_stage_skipped(&self, stage: &'static str, reason: &str) {
        let msg = if reason.len() > 100 {
            format!("{}…", &reason[..99])
        } else {
            reason.to_string()
        };
        self.bar
            .println(format!("{} {} skipped: {}", cyan("⚠"), stage, dim(&msg)));
        self.bar.inc(1);
    }

    fn on_job_complete(&self, stages_run: usize, stages_skipped: usize) {
        self.bar.finish_and_clear();
        if stages_skipped == 0 {
            eprintln!("{} {} stages completed", green("✔"), bold(&stages_run.to_string()));
        } else {
            eprintln!(
                "{} {} stages completed, {} skipped",
                cyan("⚠"),
                bold(&stages_run.to_string()),
                red(&stages_skipped.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Repair broken-font pages only (auto-detect, 600 DPI)
  fontmend scan.pdf

  # Repair + OCR + compress, explicit output name
  fontmend scan.pdf -o clean.pdf --ocr --compress

  # Rebuild specific pages at 1200 DPI
  fontmend --pages 4-6,12 --dpi 1200 book.pdf

  # Everything: unlock, repair, OCR, contents, numbers, compress, cover
  fontmend locked.pdf --unlock --ocr --toc --page-numbers --compress \
      --cover --cover-title "Board Minutes" --cover-author "K. Osei"

  # Which pages are broken? (no repair)
  fontmend --scan-only --json report.pdf

  # Clean up the shared work directory (files older than 24h, leased jobs kept)
  fontmend --sweep --work-dir /var/tmp/fontmend

REQUIRED EXTERNAL TOOLS:
  Stage          Tool       Package (Debian)
  ─────────      ────────   ─────────────────
  scan           pdffonts   poppler-utils
  rasterize      pdftoppm   poppler-utils
  re-encode      img2pdf    img2pdf
  assemble       qpdf       qpdf
  OCR            ocrmypdf   ocrmypdf          (only with --ocr)
  cover/TOC/nums pdflatex   texlive           (only with --cover/--toc/--page-numbers)
  compress       gs         ghostscript       (only with --compress)

  Only the first four are mandatory; a missing optional tool downgrades its
  stage to a warning.

ENVIRONMENT VARIABLES:
  FONTMEND_PDFFONTS   Override the font inspector binary
  FONTMEND_PDFTOPPM   Override the rasterizer binary
  FONTMEND_IMG2PDF    Override the image encoder binary
  FONTMEND_QPDF       Override the page assembler binary
  FONTMEND_OCRMYPDF   Override the OCR binary
  FONTMEND_PDFLATEX   Override the typesetter binary
  FONTMEND_GS         Override the compressor binary
"#;

/// Repair PDFs whose fonts print as garbled symbols.
#[derive(Parser, Debug)]
#[command(
    name = "fontmend",
    version,
    about = "Repair PDFs whose fonts print as garbled symbols",
    long_about = "Detect pages whose embedded fonts use custom encodings (they render fine \
on screen but print as garbage), rebuild exactly those pages as high-resolution images, and \
reassemble a byte-correct document. Optional stages: unlock, OCR, table of contents, page \
numbers, compression, cover sheet.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file to repair. (Not needed with --sweep.)
    input: Option<PathBuf>,

    /// Output path. Default: `fixed_<input name>` next to the input.
    #[arg(short, long, env = "FONTMEND_OUTPUT")]
    output: Option<PathBuf>,

    /// Rasterization DPI for rebuilt pages: 300, 600, or 1200.
    #[arg(long, env = "FONTMEND_DPI", default_value_t = 600)]
    dpi: u32,

    /// Pages to rebuild: auto (detect), all, or a list like 4-6,12.
    #[arg(long, env = "FONTMEND_PAGES", default_value = "auto")]
    pages: String,

    /// Pages per font-inspection batch during auto-detection.
    #[arg(long, default_value_t = 50)]
    batch_size: usize,

    /// Remove security restrictions before processing.
    #[arg(long)]
    unlock: bool,

    /// Password for encrypted documents (implies nothing; pair with --unlock).
    #[arg(long, env = "FONTMEND_PASSWORD")]
    password: Option<String>,

    /// Add a searchable text layer after repair.
    #[arg(long)]
    ocr: bool,

    /// Force OCR even on pages that already carry text.
    #[arg(long, requires = "ocr")]
    full_ocr: bool,

    /// Prepend a typeset table-of-contents sheet (also kept standalone).
    #[arg(long)]
    toc: bool,

    /// Stamp page numbers onto every page.
    #[arg(long)]
    page_numbers: bool,

    /// Compress the final document.
    #[arg(long)]
    compress: bool,

    /// Compression profile: screen, ebook, printer, prepress.
    #[arg(long, value_enum, default_value = "ebook")]
    compression: CompressionArg,

    /// Prepend a typeset cover sheet (also kept standalone).
    #[arg(long)]
    cover: bool,

    /// Cover sheet title. Default: the input file name.
    #[arg(long, requires = "cover")]
    cover_title: Option<String>,

    /// Cover sheet author line.
    #[arg(long, requires = "cover")]
    cover_author: Option<String>,

    /// Cover sheet organization line.
    #[arg(long, requires = "cover")]
    cover_org: Option<String>,

    /// Cover sheet date line (free text).
    #[arg(long, requires = "cover")]
    cover_date: Option<String>,

    /// Free paragraph under the cover title block.
    #[arg(long, requires = "cover")]
    cover_note: Option<String>,

    /// Report which pages are broken, repair nothing.
    #[arg(long)]
    scan_only: bool,

    /// Run the retention sweep on the work directory and exit.
    #[arg(long)]
    sweep: bool,

    /// Retention age for --sweep, in hours.
    #[arg(long, default_value_t = 24)]
    retention_hours: u64,

    /// Shared work directory for job artifacts.
    #[arg(long, env = "FONTMEND_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Per-tool-invocation timeout in seconds.
    #[arg(long, env = "FONTMEND_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// Delete the input file after a successful run.
    #[arg(long)]
    delete_input: bool,

    /// Output the job record as JSON instead of a summary.
    #[arg(long, env = "FONTMEND_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "FONTMEND_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FONTMEND_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FONTMEND_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CompressionArg {
    Screen,
    Ebook,
    Printer,
    Prepress,
}

impl From<CompressionArg> for CompressionProfile {
    fn from(v: CompressionArg) -> Self {
        match v {
            CompressionArg::Screen => CompressionProfile::Screen,
            CompressionArg::Ebook => CompressionProfile::Ebook,
            CompressionArg::Printer => CompressionProfile::Printer,
            CompressionArg::Prepress => CompressionProfile::Prepress,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active; the
    // bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Sweep mode ───────────────────────────────────────────────────────
    if cli.sweep {
        let root = cli
            .work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("fontmend"));
        let removed = fontmend::sweep(&root, Duration::from_secs(cli.retention_hours * 3600))
            .context("Retention sweep failed")?;
        if !cli.quiet {
            eprintln!("Removed {removed} expired entries from {}", root.display());
        }
        return Ok(());
    }

    let input = cli
        .input
        .clone()
        .context("INPUT is required (see --help)")?;
    let config = build_config(&cli)?;

    // ── Scan-only mode ───────────────────────────────────────────────────
    if cli.scan_only {
        let report = scan(&input, &config).await.context("Scan failed")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        } else if report.is_clean() {
            println!(
                "{} all {} pages print correctly",
                green("✔"),
                report.total_pages
            );
        } else {
            println!(
                "{} {} of {} pages use custom-encoded fonts:",
                red("✗"),
                report.problem_pages.len(),
                report.total_pages
            );
            println!("  pages {}", report.problem_ranges.join(", "));
            if !report.warnings.is_empty() && !cli.quiet {
                for w in &report.warnings {
                    eprintln!("  {} {}", cyan("⚠"), w);
                }
            }
        }
        return Ok(());
    }

    // ── Run the pipeline ─────────────────────────────────────────────────
    let output_path = cli.output.clone().unwrap_or_else(|| default_output(&input));

    let result = process(&input, &output_path, &config)
        .await
        .context("Processing failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialise job record")?
        );
    } else if !cli.quiet {
        let stats = &result.stats;
        eprintln!(
            "{}  {} pages, {} rebuilt{}  {}ms  →  {}",
            green("✔"),
            stats.total_pages,
            stats.repaired_pages,
            if stats.repaired_ranges.is_empty() {
                String::new()
            } else {
                format!(" ({})", stats.repaired_ranges.join(", "))
            },
            stats.total_duration_ms,
            bold(&output_path.display().to_string()),
        );
        for artifact in &result.standalone {
            eprintln!("   {} {}", dim("also:"), artifact.path.display());
        }
        for w in &result.warnings {
            eprintln!("   {} {}", cyan("⚠"), w);
        }
    }

    // Warnings mean the document was produced but an optional stage is
    // missing from it; exit 0 regardless, matching the job's own policy.
    let _ = io::stderr().flush();
    Ok(())
}

/// Map CLI args to `JobConfig`.
fn build_config(cli: &Cli) -> Result<JobConfig> {
    let pages = parse_pages(&cli.pages)?;
    let dpi = Dpi::from_u32(cli.dpi).context("Invalid --dpi")?;

    // No bar in scan-only mode; the report itself is the output.
    let progress: Option<ProgressCallback> =
        if !cli.quiet && !cli.no_progress && !cli.json && !cli.scan_only {
            Some(CliProgress::new() as ProgressCallback)
        } else {
            None
        };

    let mut builder = JobConfig::builder()
        .remove_security(cli.unlock)
        .dpi(dpi)
        .pages(pages)
        .scan_batch_size(cli.batch_size)
        .ocr(cli.ocr)
        .ocr_full(cli.full_ocr)
        .generate_toc(cli.toc)
        .page_numbers(cli.page_numbers)
        .compress(cli.compress)
        .compression(cli.compression.into())
        .generate_cover(cli.cover)
        .cover(CoverMetadata {
            title: cli.cover_title.clone(),
            author: cli.cover_author.clone(),
            organization: cli.cover_org.clone(),
            date: cli.cover_date.clone(),
            note: cli.cover_note.clone(),
        })
        .tool_timeout_secs(cli.timeout)
        .keep_original(!cli.delete_input);

    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(ref dir) = cli.work_dir {
        builder = builder.work_dir(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `scan.pdf` → `fixed_scan.pdf`, next to the input.
fn default_output(input: &std::path::Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    input.with_file_name(format!("fixed_{name}"))
}

/// Parse `--pages` into `PageMode`: `auto`, `all`, or `4-6,12,30`.
fn parse_pages(s: &str) -> Result<PageMode> {
    let s = s.trim().to_lowercase();
    match s.as_str() {
        "auto" => return Ok(PageMode::Auto),
        "all" => return Ok(PageMode::All),
        _ => {}
    }

    let mut pages = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let start: usize = start.trim().parse().context("Invalid start page in range")?;
            let end: usize = end.trim().parse().context("Invalid end page in range")?;
            if start < 1 {
                anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {start})");
            }
            if start > end {
                anyhow::bail!("Invalid page range '{start}-{end}': start must be <= end");
            }
            pages.extend(start..=end);
        } else {
            let page: usize = part
                .parse()
                .context(format!("Invalid page number: '{part}'"))?;
            if page < 1 {
                anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {page})");
            }
            pages.push(page);
        }
    }

    if pages.is_empty() {
        anyhow::bail!("No pages in '{s}' — use 'auto', 'all', or a list like 4-6,12");
    }
    Ok(PageMode::Custom(pages))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pages_modes() {
        assert!(matches!(parse_pages("auto").unwrap(), PageMode::Auto));
        assert!(matches!(parse_pages("ALL").unwrap(), PageMode::All));
    }

    #[test]
    fn parse_pages_lists_and_ranges() {
        match parse_pages("4-6,12").unwrap() {
            PageMode::Custom(pages) => assert_eq!(pages, vec![4, 5, 6, 12]),
            other => panic!("expected Custom, got {other:?}"),
        }
        match parse_pages("7").unwrap() {
            PageMode::Custom(pages) => assert_eq!(pages, vec![7]),
            other => panic!("expected Custom, got {other:?}"),
        }
    }

    #[test]
    fn parse_pages_rejects_garbage() {
        assert!(parse_pages("x").is_err());
        assert!(parse_pages("6-4").is_err());
        assert!(parse_pages("0").is_err());
        assert!(parse_pages(",").is_err());
    }

    #[test]
    fn default_output_prefixes_input_name() {
        assert_eq!(
            default_output(std::path::Path::new("/docs/scan.pdf")),
            PathBuf::from("/docs/fixed_scan.pdf")
        );
    }
}
