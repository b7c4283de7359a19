//! Error types for the fontmend library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FontmendError`] — **Fatal**: the job cannot produce a final document
//!   (bad input, font-repair failure, merge failure). Returned as
//!   `Err(FontmendError)` from the top-level `process*` functions.
//!
//! * [`StageWarning`] — **Non-fatal**: an optional stage or a single page
//!   inspection failed but the job as a whole still succeeds. Accumulated in
//!   [`crate::output::JobOutput::warnings`] so callers can inspect what was
//!   skipped instead of losing the whole document to a missing optional tool.
//!
//! The separation encodes the pipeline's failure policy directly in the type
//! system: anything that surfaces here as `FontmendError` aborts the job and
//! cleans up its intermediates; anything that surfaces as `StageWarning` is
//! logged and carried to the final report.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the fontmend library.
///
/// Optional-stage failures use [`StageWarning`] and are stored in
/// [`crate::output::JobOutput`] rather than propagated here.
#[derive(Debug, Error)]
pub enum FontmendError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// A job identifier failed UUID validation.
    #[error("Invalid job id '{id}': job ids are UUIDs")]
    InvalidJobId { id: String },

    // ── Font-repair errors (all fatal to the whole job) ───────────────────
    /// The rasterizer ran but produced no image file for the page.
    #[error("Rasterization produced no image for page {page}: {detail}")]
    RasterizationFailed { page: usize, detail: String },

    /// The image-to-PDF encoder ran but produced no single-page document.
    #[error("Re-encoding page {page} as a PDF produced no output: {detail}")]
    EncodingFailed { page: usize, detail: String },

    /// The page assembler failed to merge fragments, or the merged document
    /// came out with the wrong page count.
    #[error("Merging repaired document failed: {detail}")]
    MergeFailed { detail: String },

    /// Extracting an untouched page range from the original failed.
    #[error("Extracting pages {start}-{end} failed: {detail}")]
    ExtractFailed {
        start: usize,
        end: usize,
        detail: String,
    },

    // ── Stage/tool errors ─────────────────────────────────────────────────
    /// A pipeline stage failed fatally. Carries the stage name and the raw
    /// collaborator output for diagnosis.
    #[error("Stage '{stage}' failed: {detail}")]
    StageFailed { stage: &'static str, detail: String },

    /// A collaborator did not finish within the configured per-stage timeout.
    #[error("Tool '{tool}' timed out after {secs}s\nIncrease tool_timeout_secs if the document is very large.")]
    ToolTimeout { tool: String, secs: u64 },

    /// A collaborator ran but exited unsuccessfully. Carries its stderr for
    /// diagnosis.
    #[error("Tool '{tool}' failed: {detail}")]
    ToolFailed { tool: String, detail: String },

    /// A collaborator executable could not be started at all.
    #[error("Tool '{tool}' could not be started: {detail}\nInstall it or point the FONTMEND_* environment variable at the right binary.")]
    ToolNotFound { tool: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FontmendError {
    /// The pipeline stage this error belongs to, when it has one.
    ///
    /// Used by the orchestrator to report the failing stage with a stable
    /// name rather than a formatted message.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            FontmendError::RasterizationFailed { .. }
            | FontmendError::EncodingFailed { .. }
            | FontmendError::MergeFailed { .. }
            | FontmendError::ExtractFailed { .. } => Some("font-repair"),
            FontmendError::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// A non-fatal warning accumulated during a job.
///
/// Stored in [`crate::output::JobOutput::warnings`]. The job still produces a
/// final document; warnings record which optional effects are missing from it.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum StageWarning {
    /// The font inspector failed for a page or batch; the pages were treated
    /// as safe so an unreadable page is never falsely rebuilt.
    #[error("Font inspection unavailable for pages {start}-{end}: {detail} (treated as safe)")]
    ClassificationUnavailable {
        start: usize,
        end: usize,
        detail: String,
    },

    /// An optional stage's collaborator was missing or failed; the job
    /// continued with the prior artifact.
    #[error("Stage '{stage}' skipped: {detail}")]
    StageUnavailable { stage: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rasterization_failure_maps_to_font_repair_stage() {
        let e = FontmendError::RasterizationFailed {
            page: 7,
            detail: "no image produced".into(),
        };
        assert_eq!(e.stage(), Some("font-repair"));
        assert!(e.to_string().contains("page 7"));
    }

    #[test]
    fn stage_failed_reports_its_own_stage() {
        let e = FontmendError::StageFailed {
            stage: "font-repair",
            detail: "merge exited 2".into(),
        };
        assert_eq!(e.stage(), Some("font-repair"));
    }

    #[test]
    fn input_errors_have_no_stage() {
        let e = FontmendError::InputNotFound {
            path: PathBuf::from("/missing.pdf"),
        };
        assert_eq!(e.stage(), None);
    }

    #[test]
    fn timeout_display_names_tool_and_secs() {
        let e = FontmendError::ToolTimeout {
            tool: "ocrmypdf".into(),
            secs: 300,
        };
        let msg = e.to_string();
        assert!(msg.contains("ocrmypdf"));
        assert!(msg.contains("300"));
    }

    #[test]
    fn warning_round_trips_through_json() {
        let w = StageWarning::StageUnavailable {
            stage: "ocr".into(),
            detail: "ocrmypdf: command not found".into(),
        };
        let json = serde_json::to_string(&w).unwrap();
        let back: StageWarning = serde_json::from_str(&json).unwrap();
        assert!(back.to_string().contains("ocr"));
    }
}
