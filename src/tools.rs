//! Collaborator invocations: typed command builders for the external tools.
//!
//! Every transformation in the pipeline is delegated to an external
//! executable with a file-in/file-out contract — the font inspector, the
//! rasterizer, the image-to-PDF encoder, the page assembler, the OCR engine,
//! the typesetter, and the compressor. This module owns all of those
//! invocations so nothing else in the crate ever touches a process handle.
//!
//! Commands are built as structured argument lists, never shell strings: the
//! predecessor pipeline interpolated file names into `sh -c` lines, which
//! breaks on spaces and is an injection hazard for user-supplied names.
//!
//! Each program path can be overridden individually (field or `FONTMEND_*`
//! environment variable), so a deployment can pin exact binaries and tests
//! can substitute stubs. Every invocation runs under one bounded timeout;
//! expiry kills the child and surfaces as [`FontmendError::ToolTimeout`].

use crate::config::{CompressionProfile, Dpi};
use crate::error::FontmendError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Resolved program paths for all collaborators, plus the shared timeout.
///
/// Cheap to clone; holds no open resources.
#[derive(Debug, Clone)]
pub struct Toolbox {
    /// Font inspector (`pdffonts`): per-page font report.
    pub font_inspector: PathBuf,
    /// Rasterizer (`pdftoppm`): page → PNG at a requested DPI.
    pub rasterizer: PathBuf,
    /// Image-to-PDF encoder (`img2pdf`): PNG → one-page PDF.
    pub image_encoder: PathBuf,
    /// Page assembler (`qpdf`): merge, extract, page count, decrypt.
    pub page_assembler: PathBuf,
    /// OCR engine (`ocrmypdf`): adds a searchable text layer.
    pub ocr_engine: PathBuf,
    /// Typesetter (`pdflatex`): cover sheet, TOC sheet, number overlay.
    pub typesetter: PathBuf,
    /// Compressor (`gs`): pdfwrite re-distillation.
    pub compressor: PathBuf,
    /// Upper bound on any single invocation.
    pub timeout: Duration,
}

impl Default for Toolbox {
    fn default() -> Self {
        Self {
            font_inspector: "pdffonts".into(),
            rasterizer: "pdftoppm".into(),
            image_encoder: "img2pdf".into(),
            page_assembler: "qpdf".into(),
            ocr_engine: "ocrmypdf".into(),
            typesetter: "pdflatex".into(),
            compressor: "gs".into(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl Toolbox {
    /// Default programs with `FONTMEND_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut tb = Self::default();
        let overrides: [(&str, &mut PathBuf); 7] = [
            ("FONTMEND_PDFFONTS", &mut tb.font_inspector),
            ("FONTMEND_PDFTOPPM", &mut tb.rasterizer),
            ("FONTMEND_IMG2PDF", &mut tb.image_encoder),
            ("FONTMEND_QPDF", &mut tb.page_assembler),
            ("FONTMEND_OCRMYPDF", &mut tb.ocr_engine),
            ("FONTMEND_PDFLATEX", &mut tb.typesetter),
            ("FONTMEND_GS", &mut tb.compressor),
        ];
        for (var, slot) in overrides {
            if let Ok(v) = std::env::var(var) {
                if !v.is_empty() {
                    *slot = PathBuf::from(v);
                }
            }
        }
        tb
    }

    /// Replace the per-invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    // ── Core runner ───────────────────────────────────────────────────────

    /// Run one collaborator to completion under the timeout.
    ///
    /// Spawn failure ⇒ [`FontmendError::ToolNotFound`]; timeout ⇒
    /// [`FontmendError::ToolTimeout`] (the child is killed); the exit status
    /// is returned for the caller to police.
    async fn run(&self, program: &Path, args: &[String]) -> Result<ToolOutput, FontmendError> {
        let tool = tool_name(program);
        debug!("exec: {} {}", program.display(), args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let fut = cmd.output();
        let output = match tokio::time::timeout(self.timeout, fut).await {
            Err(_) => {
                warn!("{tool} timed out after {:?}", self.timeout);
                return Err(FontmendError::ToolTimeout {
                    tool,
                    secs: self.timeout.as_secs(),
                });
            }
            Ok(Err(e)) => {
                return Err(FontmendError::ToolNotFound {
                    tool,
                    detail: e.to_string(),
                });
            }
            Ok(Ok(out)) => out,
        };

        Ok(ToolOutput {
            tool,
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    // ── Font inspector ────────────────────────────────────────────────────

    /// Inspect the fonts used on pages `start..=end` and return the raw
    /// text report.
    pub async fn inspect_fonts(
        &self,
        doc: &Path,
        start: usize,
        end: usize,
    ) -> Result<String, FontmendError> {
        let args = vec![
            "-f".to_string(),
            start.to_string(),
            "-l".to_string(),
            end.to_string(),
            doc.display().to_string(),
        ];
        let out = self.run(&self.font_inspector, &args).await?;
        out.into_stdout()
    }

    // ── Rasterizer ────────────────────────────────────────────────────────

    /// Rasterize one page to a PNG at the given DPI.
    ///
    /// The rasterizer decides the exact output file name (it appends a page
    /// index to the prefix), so the produced file is located by scanning for
    /// the prefix afterwards. No file ⇒ [`FontmendError::RasterizationFailed`].
    pub async fn rasterize_page(
        &self,
        doc: &Path,
        page: usize,
        dpi: Dpi,
        out_prefix: &Path,
    ) -> Result<PathBuf, FontmendError> {
        let args = vec![
            "-f".to_string(),
            page.to_string(),
            "-l".to_string(),
            page.to_string(),
            "-r".to_string(),
            dpi.as_u32().to_string(),
            "-png".to_string(),
            doc.display().to_string(),
            out_prefix.display().to_string(),
        ];
        let out = self.run(&self.rasterizer, &args).await?;
        if !out.success {
            return Err(FontmendError::RasterizationFailed {
                page,
                detail: out.failure_detail(),
            });
        }

        find_with_prefix(out_prefix, "png").ok_or_else(|| FontmendError::RasterizationFailed {
            page,
            detail: "rasterizer exited 0 but produced no image file".into(),
        })
    }

    // ── Image-to-PDF encoder ──────────────────────────────────────────────

    /// Re-encode a page image as a one-page PDF at `out`.
    pub async fn encode_image(
        &self,
        image: &Path,
        page: usize,
        out: &Path,
    ) -> Result<(), FontmendError> {
        let args = vec![
            image.display().to_string(),
            "-o".to_string(),
            out.display().to_string(),
        ];
        let result = self.run(&self.image_encoder, &args).await?;
        if !result.success || !out.exists() {
            return Err(FontmendError::EncodingFailed {
                page,
                detail: if result.success {
                    "encoder exited 0 but produced no output".into()
                } else {
                    result.failure_detail()
                },
            });
        }
        Ok(())
    }

    // ── Page assembler (merge / extract / count) ──────────────────────────

    /// Number of pages in a document.
    pub async fn page_count(&self, doc: &Path) -> Result<usize, FontmendError> {
        let args = vec!["--show-npages".to_string(), doc.display().to_string()];
        let out = self.run(&self.page_assembler, &args).await?;
        let text = out.into_stdout()?;
        text.trim()
            .parse::<usize>()
            .map_err(|_| FontmendError::Internal(format!("unparseable page count: {text:?}")))
    }

    /// Copy pages `start..=end` of `doc` into a new document at `out`.
    pub async fn extract_pages(
        &self,
        doc: &Path,
        start: usize,
        end: usize,
        out: &Path,
    ) -> Result<(), FontmendError> {
        let args = vec![
            doc.display().to_string(),
            "--pages".to_string(),
            ".".to_string(),
            format!("{start}-{end}"),
            "--".to_string(),
            out.display().to_string(),
        ];
        let result = self.run(&self.page_assembler, &args).await?;
        if !result.success || !out.exists() {
            return Err(FontmendError::ExtractFailed {
                start,
                end,
                detail: if result.success {
                    "assembler exited 0 but produced no output".into()
                } else {
                    result.failure_detail()
                },
            });
        }
        Ok(())
    }

    /// Concatenate `parts` in order into one document at `out`.
    pub async fn merge(&self, parts: &[PathBuf], out: &Path) -> Result<(), FontmendError> {
        let mut args = vec!["--empty".to_string(), "--pages".to_string()];
        args.extend(parts.iter().map(|p| p.display().to_string()));
        args.push("--".to_string());
        args.push(out.display().to_string());

        let result = self.run(&self.page_assembler, &args).await?;
        if !result.success || !out.exists() {
            return Err(FontmendError::MergeFailed {
                detail: if result.success {
                    "assembler exited 0 but produced no output".into()
                } else {
                    result.failure_detail()
                },
            });
        }
        Ok(())
    }

    // ── Decryptor ─────────────────────────────────────────────────────────

    /// Strip encryption/restrictions from `doc` into `out`.
    pub async fn decrypt(
        &self,
        doc: &Path,
        password: Option<&str>,
        out: &Path,
    ) -> Result<(), FontmendError> {
        let mut args = Vec::new();
        if let Some(pw) = password {
            args.push(format!("--password={pw}"));
        }
        args.push("--decrypt".to_string());
        args.push(doc.display().to_string());
        args.push(out.display().to_string());

        let result = self.run(&self.page_assembler, &args).await?;
        result.ensure_success()?;
        if !out.exists() {
            return Err(FontmendError::ToolFailed {
                tool: tool_name(&self.page_assembler),
                detail: "decryptor exited 0 but produced no output".into(),
            });
        }
        Ok(())
    }

    // ── OCR engine ────────────────────────────────────────────────────────

    /// Add a searchable text layer to `doc`, writing `out`.
    ///
    /// `full` forces re-OCR of pages that already carry text — rebuilt pages
    /// never do, but the surviving original pages often carry the same
    /// garbage encoding the repair worked around.
    pub async fn ocr(&self, doc: &Path, out: &Path, full: bool) -> Result<(), FontmendError> {
        let mode = if full { "--force-ocr" } else { "--skip-text" };
        let args = vec![
            mode.to_string(),
            doc.display().to_string(),
            out.display().to_string(),
        ];
        let result = self.run(&self.ocr_engine, &args).await?;
        result.ensure_success()?;
        if !out.exists() {
            return Err(FontmendError::ToolFailed {
                tool: tool_name(&self.ocr_engine),
                detail: "OCR engine exited 0 but produced no output".into(),
            });
        }
        Ok(())
    }

    // ── Typesetter ────────────────────────────────────────────────────────

    /// Typeset a `.tex` source, returning the produced PDF path.
    ///
    /// Compilation runs in `workdir` so aux files never land next to job
    /// artifacts.
    pub async fn typeset(&self, tex: &Path, workdir: &Path) -> Result<PathBuf, FontmendError> {
        let args = vec![
            "-interaction=batchmode".to_string(),
            "-halt-on-error".to_string(),
            format!("-output-directory={}", workdir.display()),
            tex.display().to_string(),
        ];
        let result = self.run(&self.typesetter, &args).await?;
        result.ensure_success()?;

        let stem = tex
            .file_stem()
            .ok_or_else(|| FontmendError::Internal(format!("no file stem: {}", tex.display())))?;
        let pdf = workdir.join(stem).with_extension("pdf");
        if !pdf.exists() {
            return Err(FontmendError::ToolFailed {
                tool: tool_name(&self.typesetter),
                detail: "typesetter exited 0 but produced no PDF".into(),
            });
        }
        Ok(pdf)
    }

    // ── Compressor ────────────────────────────────────────────────────────

    /// Re-distill `doc` at the given quality profile, writing `out`.
    pub async fn compress(
        &self,
        doc: &Path,
        profile: CompressionProfile,
        out: &Path,
    ) -> Result<(), FontmendError> {
        let args = compressor_args(doc, profile, out);
        let result = self.run(&self.compressor, &args).await?;
        result.ensure_success()?;
        if !out.exists() {
            return Err(FontmendError::ToolFailed {
                tool: tool_name(&self.compressor),
                detail: "compressor exited 0 but produced no output".into(),
            });
        }
        Ok(())
    }
}

/// Captured result of one collaborator invocation.
#[derive(Debug)]
struct ToolOutput {
    tool: String,
    success: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl ToolOutput {
    /// Map an unsuccessful exit to [`FontmendError::ToolFailed`].
    fn ensure_success(&self) -> Result<(), FontmendError> {
        if self.success {
            Ok(())
        } else {
            Err(FontmendError::ToolFailed {
                tool: self.tool.clone(),
                detail: self.failure_detail(),
            })
        }
    }

    /// Like [`ensure_success`](Self::ensure_success), then yield stdout.
    fn into_stdout(self) -> Result<String, FontmendError> {
        self.ensure_success()?;
        Ok(self.stdout)
    }

    /// Exit code plus a single-line stderr excerpt for error messages.
    fn failure_detail(&self) -> String {
        let stderr = single_line(&self.stderr);
        match self.code {
            Some(code) if stderr.is_empty() => format!("exited with code {code}"),
            Some(code) => format!("exited with code {code}: {stderr}"),
            None if stderr.is_empty() => "killed by signal".to_string(),
            None => format!("killed by signal: {stderr}"),
        }
    }
}

/// Display name for error messages: file name of the configured program.
fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

/// Collapse multi-line tool chatter to one trimmed line (first 200 chars).
fn single_line(s: &str) -> String {
    let line = s
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    line.chars().take(200).collect()
}

/// Find the file the rasterizer produced for `prefix` (it appends `-N`
/// before the extension, with tool-version-dependent zero padding).
fn find_with_prefix(prefix: &Path, extension: &str) -> Option<PathBuf> {
    let dir = prefix.parent()?;
    let stem = prefix.file_name()?.to_string_lossy().into_owned();

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.extension().map(|e| e == extension).unwrap_or(false)
                && p.file_name()
                    .map(|n| n.to_string_lossy().starts_with(&stem))
                    .unwrap_or(false)
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Argument list for the compressor, kept separate so the flag set is
/// testable without a child process.
fn compressor_args(doc: &Path, profile: CompressionProfile, out: &Path) -> Vec<String> {
    vec![
        "-sDEVICE=pdfwrite".to_string(),
        "-dCompatibilityLevel=1.4".to_string(),
        format!("-dPDFSETTINGS={}", profile.gs_setting()),
        "-dNOPAUSE".to_string(),
        "-dQUIET".to_string(),
        "-dBATCH".to_string(),
        format!("-sOutputFile={}", out.display()),
        doc.display().to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_replace_defaults() {
        // Runs in-process; pick a var unlikely to clash with other tests.
        std::env::set_var("FONTMEND_QPDF", "/opt/pdf/qpdf-special");
        let tb = Toolbox::from_env();
        std::env::remove_var("FONTMEND_QPDF");
        assert_eq!(tb.page_assembler, PathBuf::from("/opt/pdf/qpdf-special"));
        assert_eq!(tb.rasterizer, PathBuf::from("pdftoppm"));
    }

    #[test]
    fn compressor_args_carry_profile_and_paths() {
        let args = compressor_args(
            Path::new("/tmp/in.pdf"),
            CompressionProfile::Ebook,
            Path::new("/tmp/out.pdf"),
        );
        assert!(args.contains(&"-dPDFSETTINGS=/ebook".to_string()));
        assert!(args.contains(&"-sOutputFile=/tmp/out.pdf".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/in.pdf");
    }

    #[test]
    fn single_line_takes_first_nonempty_and_truncates() {
        assert_eq!(single_line("\n\n  error: boom  \nmore"), "error: boom");
        assert_eq!(single_line(""), "");
        let long = "x".repeat(500);
        assert_eq!(single_line(&long).len(), 200);
    }

    #[test]
    fn failure_detail_formats_exit_code() {
        let out = ToolOutput {
            tool: "qpdf".into(),
            success: false,
            code: Some(2),
            stdout: String::new(),
            stderr: "qpdf: file.pdf: no such file\n".into(),
        };
        let detail = out.failure_detail();
        assert!(detail.starts_with("exited with code 2"));
        assert!(detail.contains("no such file"));
    }

    #[test]
    fn find_with_prefix_picks_lowest_page_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page_4-04.png"), b"x").unwrap();
        std::fs::write(dir.path().join("page_4-05.png"), b"x").unwrap();
        std::fs::write(dir.path().join("unrelated.png"), b"x").unwrap();
        std::fs::write(dir.path().join("page_4-04.txt"), b"x").unwrap();

        let found = find_with_prefix(&dir.path().join("page_4"), "png").unwrap();
        assert_eq!(found.file_name().unwrap(), "page_4-04.png");
    }

    #[test]
    fn find_with_prefix_none_when_no_match() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_with_prefix(&dir.path().join("page_9"), "png").is_none());
    }
}
