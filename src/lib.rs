//! # fontmend
//!
//! Repair PDFs whose embedded fonts use custom encodings.
//!
//! ## Why this crate?
//!
//! Some PDFs — typically produced by legacy DTP software or aggressive
//! subsetting — embed fonts whose character-to-glyph mapping follows no
//! standard encoding. They look fine on screen, then print as garbled
//! symbols because the print driver cannot resolve the mapping. The fix that
//! always works is rasterization: rebuild the affected page as a
//! high-resolution image. Doing that to a whole 400-page document is slow
//! and bloats the file, so this crate scans for exactly the pages that are
//! broken, rebuilds only those, and splices them back between the untouched
//! page ranges — the output has the same page count, with printable pixels
//! where the broken fonts were.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Unlock       strip security so the other tools can read it   (optional)
//!  ├─ 2. Font repair  scan → compact ranges → rebuild pages → reassemble
//!  ├─ 3. OCR          searchable text layer over the rebuilt images   (optional)
//!  ├─ 4. Contents     typeset TOC sheet, prepended + standalone       (optional)
//!  ├─ 5. Numbering    stamp page numbers                              (optional)
//!  ├─ 6. Compress     re-distill at a quality profile                 (optional)
//!  └─ 7. Cover        typeset cover sheet, prepended + standalone     (optional)
//! ```
//!
//! Every transformation is delegated to an external tool with a
//! file-in/file-out contract (`pdffonts`, `pdftoppm`, `img2pdf`, `qpdf`,
//! `ocrmypdf`, `pdflatex`, `gs`); the crate owns detection, ordering,
//! artifact bookkeeping, and failure policy. Font repair is mandatory and
//! fatal on failure; every optional stage degrades to a warning when its
//! tool is missing or fails.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fontmend::{process, JobConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = JobConfig::builder().ocr(true).compress(true).build()?;
//!     let output = process("scan.pdf", "scan-fixed.pdf", &config).await?;
//!     println!("rebuilt {} of {} pages",
//!         output.stats.repaired_pages,
//!         output.stats.total_pages);
//!     for w in &output.warnings {
//!         eprintln!("warning: {w}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fontmend` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! fontmend = { version = "0.4", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod tools;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CompressionProfile, CoverMetadata, Dpi, JobConfig, JobConfigBuilder, PageMode};
pub use error::{FontmendError, StageWarning};
pub use output::{JobOutput, JobStats, ScanReport, StandaloneArtifact, StandaloneKind};
pub use pipeline::ranges::PageRange;
pub use pipeline::stage::Stage;
pub use process::{process, process_sync, scan};
pub use progress::{JobProgress, NoopProgress, ProgressCallback};
pub use tools::Toolbox;
pub use workspace::{sweep, JobId, JobWorkspace, DEFAULT_RETENTION};
