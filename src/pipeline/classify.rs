//! Page classification: which pages carry custom-encoded fonts.
//!
//! The font inspector emits a column-aligned text report, one line per font
//! used in the inspected page range. A font whose encoding column reads
//! `Custom` maps characters to glyphs with a non-standard scheme that print
//! drivers cannot resolve — the page renders as garbage on paper even though
//! it looks fine on screen. Those are the pages the repair stage rebuilds.
//!
//! ## Batched scan
//!
//! Scanning a multi-hundred-page document one inspector call per page is the
//! dominant cost on clean documents. Pages are therefore scanned in fixed
//! batches: one call covers the whole batch, and only a batch whose combined
//! report carries the marker is re-scanned page-by-page to pinpoint the exact
//! page numbers. A clean 500-page document costs 10 calls at the default
//! batch size instead of 500; a fully-broken one costs the page count plus
//! one call per batch.
//!
//! ## Failure policy
//!
//! No retries. An inspection failure classifies the affected pages as safe —
//! falsely rebuilding a page the inspector could not read would rasterize
//! content that may be perfectly printable — and records a
//! [`StageWarning::ClassificationUnavailable`].

use crate::error::StageWarning;
use crate::progress::ProgressCallback;
use crate::tools::Toolbox;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::{debug, warn};

/// Classification verdict for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVerdict {
    /// Fonts print correctly; leave the page untouched.
    Safe,
    /// At least one font uses a custom encoding; rebuild the page.
    Problematic,
}

/// Matches the dashed separator under the inspector's column headers.
static RE_HEADER_RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-+[\s-]*$").unwrap());

/// Does the inspector report flag any font with a custom encoding?
///
/// Header lines (everything up to and including the dashed rule) are
/// skipped; a data line counts when it carries the bare `Custom` token,
/// which the inspector prints only in the encoding column.
///
/// Pure and deterministic: the same report always yields the same answer.
pub fn report_has_custom_encoding(report: &str) -> bool {
    let mut in_data = false;
    for line in report.lines() {
        if !in_data {
            if RE_HEADER_RULE.is_match(line.trim()) {
                in_data = true;
            }
            continue;
        }
        if line.split_whitespace().any(|tok| tok == "Custom") {
            return true;
        }
    }
    false
}

/// Classify a single page.
///
/// Inspector failure ⇒ [`PageVerdict::Safe`] plus a warning pushed into
/// `warnings`; the failure never aborts the scan.
pub async fn classify_page(
    toolbox: &Toolbox,
    doc: &Path,
    page: usize,
    warnings: &mut Vec<StageWarning>,
) -> PageVerdict {
    match toolbox.inspect_fonts(doc, page, page).await {
        Ok(report) => {
            if report_has_custom_encoding(&report) {
                PageVerdict::Problematic
            } else {
                PageVerdict::Safe
            }
        }
        Err(e) => {
            warn!("font inspection failed for page {page}: {e}");
            warnings.push(StageWarning::ClassificationUnavailable {
                start: page,
                end: page,
                detail: e.to_string(),
            });
            PageVerdict::Safe
        }
    }
}

/// Scan the whole document and return the problem page set, sorted
/// ascending and duplicate-free (guaranteed by the traversal order).
pub async fn scan_document(
    toolbox: &Toolbox,
    doc: &Path,
    total_pages: usize,
    batch_size: usize,
    progress: Option<&ProgressCallback>,
    warnings: &mut Vec<StageWarning>,
) -> Vec<usize> {
    let batch_size = batch_size.max(1);
    let mut problems = Vec::new();

    let mut start = 1usize;
    while start <= total_pages {
        let end = (start + batch_size - 1).min(total_pages);

        match toolbox.inspect_fonts(doc, start, end).await {
            Ok(report) if report_has_custom_encoding(&report) => {
                debug!("batch {start}-{end}: marker present, pinpointing");
                for page in start..=end {
                    if classify_page(toolbox, doc, page, warnings).await
                        == PageVerdict::Problematic
                    {
                        problems.push(page);
                    }
                }
            }
            Ok(_) => {
                debug!("batch {start}-{end}: clean");
            }
            Err(e) => {
                warn!("font inspection failed for batch {start}-{end}: {e}");
                warnings.push(StageWarning::ClassificationUnavailable {
                    start,
                    end,
                    detail: e.to_string(),
                });
            }
        }

        if let Some(cb) = progress {
            cb.on_scan_progress(end, total_pages);
        }
        start = end + 1;
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN_REPORT: &str = "\
name                                 type              encoding         emb sub uni object ID
------------------------------------ ----------------- ---------------- --- --- --- ---------
ABCDEF+TimesNewRomanPSMT             TrueType          WinAnsi          yes yes no      12  0
GHIJKL+Arial-BoldMT                  TrueType          MacRoman         yes yes no      15  0
";

    const BROKEN_REPORT: &str = "\
name                                 type              encoding         emb sub uni object ID
------------------------------------ ----------------- ---------------- --- --- --- ---------
ABCDEF+TimesNewRomanPSMT             TrueType          WinAnsi          yes yes no      12  0
MNOPQR+Scanned-Body                  Type 3            Custom           yes no  no      24  0
";

    #[test]
    fn clean_report_has_no_marker() {
        assert!(!report_has_custom_encoding(CLEAN_REPORT));
    }

    #[test]
    fn broken_report_has_marker() {
        assert!(report_has_custom_encoding(BROKEN_REPORT));
    }

    #[test]
    fn marker_in_header_does_not_count() {
        // "Custom" appearing before the dashed rule is not a data line.
        let report = "\
name   type   Custom encoding
------ ------ ----------------
F1     Type1  WinAnsi
";
        assert!(!report_has_custom_encoding(report));
    }

    #[test]
    fn empty_report_is_clean() {
        assert!(!report_has_custom_encoding(""));
        // Header with no data lines: a page that uses no fonts at all.
        let header_only = "\
name   type   encoding
------ ------ --------
";
        assert!(!report_has_custom_encoding(header_only));
    }

    #[test]
    fn classification_is_deterministic() {
        for _ in 0..3 {
            assert!(report_has_custom_encoding(BROKEN_REPORT));
            assert!(!report_has_custom_encoding(CLEAN_REPORT));
        }
    }
}
