//! Configuration types for a repair job.
//!
//! All job behaviour is controlled through [`JobConfig`], built via its
//! [`JobConfigBuilder`]. Keeping every knob in one struct makes it trivial to
//! share configs across jobs, serialise the choices for logging, and diff two
//! runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::error::FontmendError;
use crate::progress::ProgressCallback;
use crate::tools::Toolbox;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for one processing job.
///
/// Built via [`JobConfig::builder()`] or [`JobConfig::default()`]. Immutable
/// once a job starts: the orchestrator only ever reads it.
///
/// # Example
/// ```rust
/// use fontmend::{Dpi, JobConfig, PageMode};
///
/// let config = JobConfig::builder()
///     .dpi(Dpi::Dpi300)
///     .pages(PageMode::Auto)
///     .ocr(true)
///     .compress(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct JobConfig {
    /// Run the unlock stage (strip owner-password restrictions) first.
    /// Default: false.
    pub remove_security: bool,

    /// User password for encrypted documents, handed to the decryptor.
    pub password: Option<String>,

    /// Rasterization resolution for rebuilt pages. Default: [`Dpi::Dpi600`].
    ///
    /// 600 DPI keeps small print legible after rasterization while staying
    /// within what consumer printers resolve. 300 halves file size for
    /// screen-only use; 1200 is for archival scans of dense footnotes.
    pub dpi: Dpi,

    /// Which pages the font-repair stage rebuilds. Default: [`PageMode::Auto`].
    pub pages: PageMode,

    /// Pages per font-inspection batch during the auto-detect scan.
    /// Default: 50.
    ///
    /// The coarse pass inspects a whole batch with one collaborator call and
    /// only re-scans page-by-page when the batch report carries the
    /// custom-encoding marker. Clean documents therefore cost
    /// `total_pages / scan_batch_size` calls instead of `total_pages`.
    pub scan_batch_size: usize,

    /// Run the OCR stage after font repair. Default: false.
    pub ocr: bool,

    /// Force OCR even on pages that already carry a text layer.
    /// Default: false.
    ///
    /// Rebuilt pages are pure images, so plain OCR already covers them; full
    /// mode additionally re-processes pages whose existing text layer is
    /// garbage (the usual situation when fonts were broken to begin with).
    pub ocr_full: bool,

    /// Generate a table-of-contents sheet and prepend it. Default: false.
    pub generate_toc: bool,

    /// Stamp page numbers onto every page. Default: false.
    pub page_numbers: bool,

    /// Run the compression stage. Default: false.
    pub compress: bool,

    /// Compressor quality profile. Default: [`CompressionProfile::Ebook`].
    pub compression: CompressionProfile,

    /// Generate a cover sheet and prepend it. Default: false.
    pub generate_cover: bool,

    /// Fields typeset onto the cover sheet (and reused for the TOC title).
    pub cover: CoverMetadata,

    /// Upper bound on any single collaborator invocation, in seconds.
    /// Default: 300.
    ///
    /// The original pipeline had no timeout at all — one hung tool blocked
    /// the job forever. Expiry is treated as that stage failing.
    pub tool_timeout_secs: u64,

    /// Keep the original input file after a successful job. Default: true.
    ///
    /// The reference web deployment deleted the upload once the final
    /// artifact existed; library callers usually own the input file and want
    /// it left alone.
    pub keep_original: bool,

    /// Workspace directory shared by all jobs of this deployment.
    /// Default: `<system temp>/fontmend`.
    pub work_dir: Option<PathBuf>,

    /// Pre-resolved collaborator programs. Takes precedence over the
    /// `FONTMEND_*` environment lookups; tests use it to substitute stubs.
    pub toolbox: Option<Toolbox>,

    /// Progress callback fired per stage and per repaired page.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            remove_security: false,
            password: None,
            dpi: Dpi::default(),
            pages: PageMode::default(),
            scan_batch_size: 50,
            ocr: false,
            ocr_full: false,
            generate_toc: false,
            page_numbers: false,
            compress: false,
            compression: CompressionProfile::default(),
            generate_cover: false,
            cover: CoverMetadata::default(),
            tool_timeout_secs: 300,
            keep_original: true,
            work_dir: None,
            toolbox: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for JobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobConfig")
            .field("remove_security", &self.remove_security)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("dpi", &self.dpi)
            .field("pages", &self.pages)
            .field("scan_batch_size", &self.scan_batch_size)
            .field("ocr", &self.ocr)
            .field("ocr_full", &self.ocr_full)
            .field("generate_toc", &self.generate_toc)
            .field("page_numbers", &self.page_numbers)
            .field("compress", &self.compress)
            .field("compression", &self.compression)
            .field("generate_cover", &self.generate_cover)
            .field("cover", &self.cover)
            .field("tool_timeout_secs", &self.tool_timeout_secs)
            .field("keep_original", &self.keep_original)
            .field("work_dir", &self.work_dir)
            .field("toolbox", &self.toolbox)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn JobProgress>"),
            )
            .finish()
    }
}

impl JobConfig {
    /// Create a new builder for `JobConfig`.
    pub fn builder() -> JobConfigBuilder {
        JobConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`JobConfig`].
#[derive(Debug)]
pub struct JobConfigBuilder {
    config: JobConfig,
}

impl JobConfigBuilder {
    pub fn remove_security(mut self, v: bool) -> Self {
        self.config.remove_security = v;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn dpi(mut self, dpi: Dpi) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn pages(mut self, mode: PageMode) -> Self {
        self.config.pages = mode;
        self
    }

    pub fn scan_batch_size(mut self, n: usize) -> Self {
        self.config.scan_batch_size = n.max(1);
        self
    }

    pub fn ocr(mut self, v: bool) -> Self {
        self.config.ocr = v;
        self
    }

    pub fn ocr_full(mut self, v: bool) -> Self {
        self.config.ocr_full = v;
        self
    }

    pub fn generate_toc(mut self, v: bool) -> Self {
        self.config.generate_toc = v;
        self
    }

    pub fn page_numbers(mut self, v: bool) -> Self {
        self.config.page_numbers = v;
        self
    }

    pub fn compress(mut self, v: bool) -> Self {
        self.config.compress = v;
        self
    }

    pub fn compression(mut self, profile: CompressionProfile) -> Self {
        self.config.compression = profile;
        self
    }

    pub fn generate_cover(mut self, v: bool) -> Self {
        self.config.generate_cover = v;
        self
    }

    pub fn cover(mut self, cover: CoverMetadata) -> Self {
        self.config.cover = cover;
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tool_timeout_secs = secs.max(1);
        self
    }

    pub fn keep_original(mut self, v: bool) -> Self {
        self.config.keep_original = v;
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }

    pub fn toolbox(mut self, toolbox: Toolbox) -> Self {
        self.config.toolbox = Some(toolbox);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<JobConfig, FontmendError> {
        let c = &self.config;
        if c.scan_batch_size == 0 {
            return Err(FontmendError::InvalidConfig(
                "scan_batch_size must be ≥ 1".into(),
            ));
        }
        if let PageMode::Custom(ref pages) = c.pages {
            if pages.is_empty() {
                return Err(FontmendError::InvalidConfig(
                    "custom page list must not be empty".into(),
                ));
            }
            if pages.iter().any(|&p| p == 0) {
                return Err(FontmendError::InvalidConfig(
                    "pages are 1-indexed, 0 is not a valid page".into(),
                ));
            }
        }
        if c.ocr_full && !c.ocr {
            return Err(FontmendError::InvalidConfig(
                "ocr_full requires ocr to be enabled".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Rasterization resolution for rebuilt pages.
///
/// Restricted to the three values the rasterizer chain is calibrated for
/// rather than a free integer: anything below 300 produces visibly fuzzy
/// print, and anything above 1200 balloons file sizes with no visible gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Dpi {
    /// Screen-quality, smallest files.
    Dpi300,
    /// Print-quality. (default)
    #[default]
    Dpi600,
    /// Archival quality for dense small print.
    Dpi1200,
}

impl Dpi {
    /// The numeric value handed to the rasterizer's `-r` flag.
    pub fn as_u32(self) -> u32 {
        match self {
            Dpi::Dpi300 => 300,
            Dpi::Dpi600 => 600,
            Dpi::Dpi1200 => 1200,
        }
    }

    /// Parse a numeric DPI, accepting only the supported values.
    pub fn from_u32(v: u32) -> Result<Self, FontmendError> {
        match v {
            300 => Ok(Dpi::Dpi300),
            600 => Ok(Dpi::Dpi600),
            1200 => Ok(Dpi::Dpi1200),
            other => Err(FontmendError::InvalidConfig(format!(
                "DPI must be 300, 600, or 1200, got {other}"
            ))),
        }
    }
}

/// Which pages the font-repair stage rebuilds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageMode {
    /// Scan the document and rebuild only pages with custom-encoded fonts.
    /// (default)
    #[default]
    Auto,
    /// Rebuild every page without scanning.
    All,
    /// Rebuild exactly these pages (1-indexed).
    Custom(Vec<usize>),
}

impl PageMode {
    /// Resolve an explicit selection into a sorted, deduplicated,
    /// in-range problem page set. Returns `None` for [`PageMode::Auto`],
    /// which needs a scan instead.
    pub fn explicit_pages(&self, total_pages: usize) -> Option<Vec<usize>> {
        match self {
            PageMode::Auto => None,
            PageMode::All => Some((1..=total_pages).collect()),
            PageMode::Custom(pages) => {
                let mut pages: Vec<usize> = pages
                    .iter()
                    .copied()
                    .filter(|&p| p >= 1 && p <= total_pages)
                    .collect();
                pages.sort_unstable();
                pages.dedup();
                Some(pages)
            }
        }
    }
}

/// Compressor quality profile, passed through to the compressor collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionProfile {
    /// 72 DPI images; smallest output.
    Screen,
    /// 150 DPI images; the original pipeline's hard-coded choice. (default)
    #[default]
    Ebook,
    /// 300 DPI images.
    Printer,
    /// Colour-preserving 300 DPI; largest output.
    Prepress,
}

impl CompressionProfile {
    /// The ghostscript `-dPDFSETTINGS` value for this profile.
    pub fn gs_setting(self) -> &'static str {
        match self {
            CompressionProfile::Screen => "/screen",
            CompressionProfile::Ebook => "/ebook",
            CompressionProfile::Printer => "/printer",
            CompressionProfile::Prepress => "/prepress",
        }
    }
}

/// Fields typeset onto the cover sheet.
///
/// All fields are free text; the typesetting layer escapes them before they
/// reach the typesetter (see `pipeline::typeset`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverMetadata {
    /// Document title. Falls back to the input file stem when absent.
    pub title: Option<String>,
    pub author: Option<String>,
    pub organization: Option<String>,
    /// Free-form date line; callers format it (the crate never reads clocks
    /// for content).
    pub date: Option<String>,
    /// One free paragraph under the title block.
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = JobConfig::builder().build().unwrap();
        assert_eq!(config.dpi.as_u32(), 600);
        assert_eq!(config.scan_batch_size, 50);
        assert!(!config.ocr);
        assert!(config.keep_original);
    }

    #[test]
    fn dpi_accepts_only_supported_values() {
        assert_eq!(Dpi::from_u32(300).unwrap(), Dpi::Dpi300);
        assert_eq!(Dpi::from_u32(1200).unwrap(), Dpi::Dpi1200);
        assert!(Dpi::from_u32(450).is_err());
        assert!(Dpi::from_u32(0).is_err());
    }

    #[test]
    fn custom_pages_sorted_deduped_clipped() {
        let mode = PageMode::Custom(vec![9, 3, 3, 1, 99]);
        assert_eq!(mode.explicit_pages(10), Some(vec![1, 3, 9]));
    }

    #[test]
    fn all_mode_expands_to_every_page() {
        assert_eq!(PageMode::All.explicit_pages(4), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn auto_mode_defers_to_scan() {
        assert_eq!(PageMode::Auto.explicit_pages(4), None);
    }

    #[test]
    fn empty_custom_list_rejected() {
        let err = JobConfig::builder()
            .pages(PageMode::Custom(vec![]))
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn zero_page_rejected() {
        let err = JobConfig::builder()
            .pages(PageMode::Custom(vec![0, 2]))
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn ocr_full_requires_ocr() {
        assert!(JobConfig::builder().ocr_full(true).build().is_err());
        assert!(JobConfig::builder().ocr(true).ocr_full(true).build().is_ok());
    }

    #[test]
    fn batch_size_clamped_to_one() {
        let config = JobConfig::builder().scan_batch_size(0).build().unwrap();
        assert_eq!(config.scan_batch_size, 1);
    }

    #[test]
    fn debug_redacts_password() {
        let config = JobConfig::builder().password("hunter2").build().unwrap();
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("redacted"));
    }
}
