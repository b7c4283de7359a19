//! Typeset sources: cover sheet, contents sheet, and page-number overlay.
//!
//! The typesetter collaborator consumes a `.tex` source and produces a PDF.
//! This module owns the source generation; every user-supplied string is
//! escaped before it reaches the typesetter, replacing the predecessor's raw
//! string interpolation into template files.
//!
//! Documents that need to reference the current artifact (the page-number
//! wrapper) copy it into the compile directory under a fixed name first, so
//! artifact paths never appear inside TeX source at all.

use crate::config::CoverMetadata;
use crate::error::FontmendError;
use crate::pipeline::ranges::PageRange;
use crate::tools::Toolbox;
use std::path::Path;
use tracing::debug;

/// One line of the contents sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub label: String,
    pub page: usize,
}

/// Escape a user-supplied string for safe inclusion in TeX source.
///
/// Covers the ten TeX special characters. Control characters are dropped —
/// none of them have a sensible place on a cover sheet.
pub fn latex_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str(r"\textbackslash{}"),
            '{' => out.push_str(r"\{"),
            '}' => out.push_str(r"\}"),
            '$' => out.push_str(r"\$"),
            '&' => out.push_str(r"\&"),
            '#' => out.push_str(r"\#"),
            '_' => out.push_str(r"\_"),
            '%' => out.push_str(r"\%"),
            '~' => out.push_str(r"\textasciitilde{}"),
            '^' => out.push_str(r"\textasciicircum{}"),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// TeX source for a one-page cover sheet.
pub fn cover_source(meta: &CoverMetadata, fallback_title: &str) -> String {
    let title = latex_escape(meta.title.as_deref().unwrap_or(fallback_title));
    let mut body = format!("{{\\Huge\\bfseries {title}\\par}}\n");

    if let Some(ref author) = meta.author {
        body.push_str(&format!("\\vspace{{2em}}{{\\Large {}\\par}}\n", latex_escape(author)));
    }
    if let Some(ref org) = meta.organization {
        body.push_str(&format!("\\vspace{{1em}}{{\\large {}\\par}}\n", latex_escape(org)));
    }
    if let Some(ref date) = meta.date {
        body.push_str(&format!("\\vspace{{1em}}{{\\large {}\\par}}\n", latex_escape(date)));
    }
    if let Some(ref note) = meta.note {
        body.push_str(&format!(
            "\\vfill\\begin{{minipage}}{{0.8\\textwidth}}\\centering {}\\end{{minipage}}\n",
            latex_escape(note)
        ));
    }

    format!(
        "\\documentclass[12pt]{{article}}\n\
         \\usepackage[margin=2.5cm]{{geometry}}\n\
         \\pagestyle{{empty}}\n\
         \\begin{{document}}\n\
         \\begin{{titlepage}}\\centering\\vspace*{{\\fill}}\n\
         {body}\
         \\vspace*{{\\fill}}\\end{{titlepage}}\n\
         \\end{{document}}\n"
    )
}

/// TeX source for the contents sheet.
pub fn toc_source(title: &str, entries: &[TocEntry]) -> String {
    let mut lines = String::new();
    for entry in entries {
        lines.push_str(&format!(
            "\\noindent {} \\dotfill {}\\par\\vspace{{0.5em}}\n",
            latex_escape(&entry.label),
            entry.page
        ));
    }

    format!(
        "\\documentclass[12pt]{{article}}\n\
         \\usepackage[margin=2.5cm]{{geometry}}\n\
         \\pagestyle{{empty}}\n\
         \\begin{{document}}\n\
         \\section*{{{}}}\n\
         \\vspace{{1em}}\n\
         {lines}\
         \\end{{document}}\n",
        latex_escape(title)
    )
}

/// TeX source for the page-number wrapper.
///
/// Re-includes every page of `body.pdf` (copied into the compile directory
/// beforehand) and stamps a centred footer number on each.
pub fn page_number_source() -> String {
    "\\documentclass{article}\n\
     \\usepackage{pdfpages}\n\
     \\usepackage{fancyhdr}\n\
     \\fancyhf{}\n\
     \\renewcommand{\\headrulewidth}{0pt}\n\
     \\cfoot{\\thepage}\n\
     \\begin{document}\n\
     \\includepdf[pages=-,pagecommand={\\thispagestyle{fancy}}]{body.pdf}\n\
     \\end{document}\n"
        .to_string()
}

/// Contents entries derived from the repair outcome: one entry per
/// contiguous section, marking which spans were rebuilt.
pub fn toc_entries_from_repair(repaired: &[PageRange], total_pages: usize) -> Vec<TocEntry> {
    let mut entries = Vec::new();
    let mut cursor = 1usize;

    fn push_original(entries: &mut Vec<TocEntry>, start: usize, end: usize) {
        entries.push(TocEntry {
            label: format!("Pages {start}\u{2013}{end} (original)"),
            page: start,
        });
    }

    for range in repaired {
        if cursor < range.start {
            push_original(&mut entries, cursor, range.start - 1);
        }
        entries.push(TocEntry {
            label: format!("Pages {}\u{2013}{} (rebuilt)", range.start, range.end),
            page: range.start,
        });
        cursor = range.end + 1;
    }
    if cursor <= total_pages {
        push_original(&mut entries, cursor, total_pages);
    }
    entries
}

/// Write `source` into a fresh compile directory and run the typesetter.
///
/// Returns the produced PDF, moved to `out`.
pub async fn typeset_to(
    toolbox: &Toolbox,
    source: &str,
    compile_dir: &Path,
    out: &Path,
) -> Result<(), FontmendError> {
    tokio::fs::create_dir_all(compile_dir)
        .await
        .map_err(|e| FontmendError::Internal(format!("compile dir: {e}")))?;

    let tex = compile_dir.join("sheet.tex");
    tokio::fs::write(&tex, source)
        .await
        .map_err(|e| FontmendError::OutputWriteFailed {
            path: tex.clone(),
            source: e,
        })?;

    let pdf = toolbox.typeset(&tex, compile_dir).await?;
    tokio::fs::rename(&pdf, out)
        .await
        .map_err(|e| FontmendError::OutputWriteFailed {
            path: out.to_path_buf(),
            source: e,
        })?;
    debug!("typeset {} -> {}", tex.display(), out.display());
    Ok(())
}

/// Typeset the page-number wrapper around `doc`, writing `out`.
pub async fn typeset_page_numbers(
    toolbox: &Toolbox,
    doc: &Path,
    compile_dir: &Path,
    out: &Path,
) -> Result<(), FontmendError> {
    tokio::fs::create_dir_all(compile_dir)
        .await
        .map_err(|e| FontmendError::Internal(format!("compile dir: {e}")))?;

    // Fixed name inside the compile dir keeps the TeX source path-free.
    tokio::fs::copy(doc, compile_dir.join("body.pdf"))
        .await
        .map_err(|e| FontmendError::Internal(format!("copy into compile dir: {e}")))?;

    typeset_to(toolbox, &page_number_source(), compile_dir, out).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_covers_tex_specials() {
        assert_eq!(latex_escape("50% & $5 #1"), r"50\% \& \$5 \#1");
        assert_eq!(latex_escape("a_b"), r"a\_b");
        assert_eq!(latex_escape(r"C:\docs"), r"C:\textbackslash{}docs");
        assert_eq!(latex_escape("x{y}z"), r"x\{y\}z");
        assert_eq!(latex_escape("a~b^c"), r"a\textasciitilde{}b\textasciicircum{}c");
    }

    #[test]
    fn escape_drops_control_chars() {
        assert_eq!(latex_escape("a\u{7}b\nc"), "abc");
    }

    #[test]
    fn cover_uses_fallback_title_when_unset() {
        let src = cover_source(&CoverMetadata::default(), "report.pdf");
        assert!(src.contains("report.pdf"));
        assert!(src.contains("titlepage"));
    }

    #[test]
    fn cover_escapes_metadata_fields() {
        let meta = CoverMetadata {
            title: Some("Q1 & Q2 Results".into()),
            author: Some("R_D Team".into()),
            ..Default::default()
        };
        let src = cover_source(&meta, "x");
        assert!(src.contains(r"Q1 \& Q2 Results"));
        assert!(src.contains(r"R\_D Team"));
        assert!(!src.contains("Q1 & Q2"));
    }

    #[test]
    fn toc_lists_entries_with_pages() {
        let entries = vec![
            TocEntry { label: "Pages 1–3 (original)".into(), page: 1 },
            TocEntry { label: "Pages 4–6 (rebuilt)".into(), page: 4 },
        ];
        let src = toc_source("Scan Report", &entries);
        assert!(src.contains("Scan Report"));
        assert!(src.contains("\\dotfill 1"));
        assert!(src.contains("\\dotfill 4"));
    }

    #[test]
    fn toc_entries_cover_whole_document() {
        let entries = toc_entries_from_repair(&[PageRange::new(4, 6)], 10);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].page, 1);
        assert!(entries[1].label.contains("rebuilt"));
        assert_eq!(entries[2].page, 7);
    }

    #[test]
    fn toc_entries_for_clean_document_is_single_section() {
        let entries = toc_entries_from_repair(&[], 5);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].label.contains("1\u{2013}5"));
    }

    #[test]
    fn page_number_wrapper_references_fixed_body_name() {
        let src = page_number_source();
        assert!(src.contains("{body.pdf}"));
        assert!(src.contains("pdfpages"));
    }
}
