//! Stage runner: one named pipeline step, executed against the current
//! artifact.
//!
//! Every stage follows the same shape: build a collaborator invocation,
//! check that the expected output artifact exists, report the new current
//! artifact. What differs is captured on the [`Stage`] enum — the artifact
//! suffix, the progress message, and whether failure kills the job.
//!
//! ## Stage order
//!
//! The order is fixed and intentional. Security must come off before any
//! other tool can read the document. Font repair is mandatory and runs
//! before OCR, which wants the rebuilt page images in place. OCR precedes
//! page numbering so numbers are stamped on final page content. Compression
//! runs last among the content-mutating stages — compressing before adding
//! content would waste the pass. The cover sheet is prepended last of all,
//! once every other stage's pagination is final.

use crate::config::JobConfig;
use crate::error::{FontmendError, StageWarning};
use crate::output::{StandaloneArtifact, StandaloneKind};
use crate::pipeline::classify;
use crate::pipeline::ranges::{self, PageRange};
use crate::pipeline::reassemble;
use crate::pipeline::repair;
use crate::pipeline::typeset;
use crate::tools::Toolbox;
use crate::workspace::JobWorkspace;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// One named, independently enable-able pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Unlock,
    FontRepair,
    Ocr,
    Toc,
    PageNumbers,
    Compress,
    Cover,
}

impl Stage {
    /// The fixed pipeline order.
    pub const ORDER: [Stage; 7] = [
        Stage::Unlock,
        Stage::FontRepair,
        Stage::Ocr,
        Stage::Toc,
        Stage::PageNumbers,
        Stage::Compress,
        Stage::Cover,
    ];

    /// Stable machine name, used in errors and logs.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Unlock => "unlock",
            Stage::FontRepair => "font-repair",
            Stage::Ocr => "ocr",
            Stage::Toc => "toc",
            Stage::PageNumbers => "page-numbers",
            Stage::Compress => "compress",
            Stage::Cover => "cover",
        }
    }

    /// Suffix of the current artifact this stage produces.
    pub fn suffix(self) -> &'static str {
        match self {
            Stage::Unlock => "-unlocked",
            Stage::FontRepair => "-FIXED",
            Stage::Ocr => "-OCR",
            Stage::Toc => "-indexed",
            Stage::PageNumbers => "-numbered",
            Stage::Compress => "-compressed",
            Stage::Cover => "-covered",
        }
    }

    /// Suffix of the standalone side artifact, for the stages that keep one.
    pub fn standalone_suffix(self) -> Option<&'static str> {
        match self {
            Stage::Toc => Some("-TOC"),
            Stage::Cover => Some("-COVER"),
            _ => None,
        }
    }

    /// Does a failure here abort the whole job?
    pub fn fatal(self) -> bool {
        matches!(self, Stage::FontRepair)
    }

    /// Progress line shown while the stage runs.
    pub fn message(self) -> &'static str {
        match self {
            Stage::Unlock => "Removing security restrictions...",
            Stage::FontRepair => "Rebuilding pages with unprintable fonts...",
            Stage::Ocr => "Running OCR...",
            Stage::Toc => "Generating table of contents...",
            Stage::PageNumbers => "Adding page numbers...",
            Stage::Compress => "Compressing document...",
            Stage::Cover => "Generating cover sheet...",
        }
    }

    /// Is this stage enabled under `config`? Font repair always is.
    pub fn enabled(self, config: &JobConfig) -> bool {
        match self {
            Stage::Unlock => config.remove_security,
            Stage::FontRepair => true,
            Stage::Ocr => config.ocr,
            Stage::Toc => config.generate_toc,
            Stage::PageNumbers => config.page_numbers,
            Stage::Compress => config.compress,
            Stage::Cover => config.generate_cover,
        }
    }

    /// The enabled stages for `config`, in pipeline order.
    pub fn enabled_stages(config: &JobConfig) -> Vec<Stage> {
        Self::ORDER
            .iter()
            .copied()
            .filter(|s| s.enabled(config))
            .collect()
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a stage run produced.
#[derive(Debug)]
pub enum StageOutcome {
    /// The stage produced a new current artifact (and possibly a standalone
    /// side artifact kept for separate download).
    Replaced {
        artifact: PathBuf,
        standalone: Option<StandaloneArtifact>,
    },
    /// An optional stage failed; the job continues on the prior artifact.
    Skipped { warning: StageWarning },
}

/// What the font-repair stage learned and did; later stages and the final
/// stats read it.
#[derive(Debug, Default)]
pub struct RepairSummary {
    pub problem_pages: Vec<usize>,
    pub ranges: Vec<PageRange>,
    pub scan_duration_ms: u64,
    pub repair_duration_ms: u64,
}

/// Everything a stage needs besides the current artifact.
pub struct StageCtx<'a> {
    pub toolbox: &'a Toolbox,
    pub config: &'a JobConfig,
    pub workspace: &'a JobWorkspace,
    /// Sanitised input file stem, the base of every artifact name.
    pub stem: &'a str,
    pub total_pages: usize,
    pub summary: &'a mut RepairSummary,
    pub warnings: &'a mut Vec<StageWarning>,
}

impl StageCtx<'_> {
    /// Artifact path for a stage suffix: `{job}_{stem}{suffix}.pdf`.
    fn artifact(&self, suffix: &str) -> PathBuf {
        self.workspace.artifact(&format!("{}{suffix}.pdf", self.stem))
    }
}

/// Execute one stage against the current artifact.
///
/// Fatal stages propagate their error; optional stages convert any failure
/// into [`StageOutcome::Skipped`] so the orchestrator can carry on.
pub async fn run_stage(
    stage: Stage,
    current: &Path,
    ctx: &mut StageCtx<'_>,
) -> Result<StageOutcome, FontmendError> {
    if stage.fatal() {
        return run_font_repair(current, ctx).await;
    }

    let result = match stage {
        Stage::Unlock => run_unlock(current, ctx).await,
        Stage::Ocr => run_ocr(current, ctx).await,
        Stage::Toc => run_toc(current, ctx).await,
        Stage::PageNumbers => run_page_numbers(current, ctx).await,
        Stage::Compress => run_compress(current, ctx).await,
        Stage::Cover => run_cover(current, ctx).await,
        Stage::FontRepair => unreachable!("handled above"),
    };

    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            warn!("stage {} failed, continuing without it: {e}", stage.name());
            Ok(StageOutcome::Skipped {
                warning: StageWarning::StageUnavailable {
                    stage: stage.name().to_string(),
                    detail: e.to_string(),
                },
            })
        }
    }
}

// ── Unlock ────────────────────────────────────────────────────────────────

async fn run_unlock(current: &Path, ctx: &StageCtx<'_>) -> Result<StageOutcome, FontmendError> {
    let out = ctx.artifact(Stage::Unlock.suffix());
    ctx.toolbox
        .decrypt(current, ctx.config.password.as_deref(), &out)
        .await?;
    Ok(StageOutcome::Replaced {
        artifact: out,
        standalone: None,
    })
}

// ── Font repair (the core) ────────────────────────────────────────────────

async fn run_font_repair(
    current: &Path,
    ctx: &mut StageCtx<'_>,
) -> Result<StageOutcome, FontmendError> {
    let progress = ctx.config.progress_callback.as_ref();

    // 1) Problem page set: explicit selection, or the batched scan.
    let scan_start = Instant::now();
    let problems = match ctx.config.pages.explicit_pages(ctx.total_pages) {
        Some(pages) => pages,
        None => {
            classify::scan_document(
                ctx.toolbox,
                current,
                ctx.total_pages,
                ctx.config.scan_batch_size,
                progress,
                ctx.warnings,
            )
            .await
        }
    };
    ctx.summary.scan_duration_ms = scan_start.elapsed().as_millis() as u64;

    // 2) Compact into minimal contiguous ranges.
    let problem_ranges = ranges::compact(&problems);
    info!(
        "font repair: {} problem pages in {} ranges (of {} total)",
        problems.len(),
        problem_ranges.len(),
        ctx.total_pages
    );

    // 3) Rebuild each problem page, in page order.
    let repair_start = Instant::now();
    let workdir = ctx.workspace.scratch("repair");
    tokio::fs::create_dir_all(&workdir)
        .await
        .map_err(|e| FontmendError::Internal(format!("repair workdir: {e}")))?;

    let mut fragments = Vec::with_capacity(problems.len());
    for (i, &page) in problems.iter().enumerate() {
        let fragment =
            repair::repair_page(ctx.toolbox, current, page, ctx.config.dpi, &workdir).await?;
        if let Some(cb) = progress {
            cb.on_page_repaired(page, i + 1, problems.len());
        }
        fragments.push(fragment);
    }

    // 4) Reassemble: untouched spans + rebuilt pages, page order preserved.
    let out = ctx.artifact(Stage::FontRepair.suffix());
    reassemble::reassemble(
        ctx.toolbox,
        current,
        &problem_ranges,
        fragments,
        ctx.total_pages,
        &workdir,
        &out,
    )
    .await?;

    let _ = tokio::fs::remove_dir_all(&workdir).await;
    ctx.summary.repair_duration_ms = repair_start.elapsed().as_millis() as u64;
    ctx.summary.problem_pages = problems;
    ctx.summary.ranges = problem_ranges;

    Ok(StageOutcome::Replaced {
        artifact: out,
        standalone: None,
    })
}

// ── OCR ───────────────────────────────────────────────────────────────────

async fn run_ocr(current: &Path, ctx: &StageCtx<'_>) -> Result<StageOutcome, FontmendError> {
    let out = ctx.artifact(Stage::Ocr.suffix());
    ctx.toolbox.ocr(current, &out, ctx.config.ocr_full).await?;
    Ok(StageOutcome::Replaced {
        artifact: out,
        standalone: None,
    })
}

// ── Table of contents ─────────────────────────────────────────────────────

async fn run_toc(current: &Path, ctx: &StageCtx<'_>) -> Result<StageOutcome, FontmendError> {
    let title = ctx
        .config
        .cover
        .title
        .clone()
        .unwrap_or_else(|| ctx.stem.to_string());
    let entries = typeset::toc_entries_from_repair(&ctx.summary.ranges, ctx.total_pages);
    let source = typeset::toc_source(&title, &entries);

    let standalone_path = ctx.artifact("-TOC");
    let compile_dir = ctx.workspace.scratch("toc");
    let result = typeset::typeset_to(ctx.toolbox, &source, &compile_dir, &standalone_path).await;
    let _ = tokio::fs::remove_dir_all(&compile_dir).await;
    result?;

    let merged = ctx.artifact(Stage::Toc.suffix());
    prepend_merge(ctx, &standalone_path, current, &merged).await?;

    Ok(StageOutcome::Replaced {
        artifact: merged,
        standalone: Some(StandaloneArtifact {
            kind: StandaloneKind::Toc,
            path: standalone_path,
        }),
    })
}

// ── Page numbers ──────────────────────────────────────────────────────────

async fn run_page_numbers(
    current: &Path,
    ctx: &StageCtx<'_>,
) -> Result<StageOutcome, FontmendError> {
    let out = ctx.artifact(Stage::PageNumbers.suffix());
    let compile_dir = ctx.workspace.scratch("numbered");
    let result = typeset::typeset_page_numbers(ctx.toolbox, current, &compile_dir, &out).await;
    let _ = tokio::fs::remove_dir_all(&compile_dir).await;
    result?;
    Ok(StageOutcome::Replaced {
        artifact: out,
        standalone: None,
    })
}

// ── Compression ───────────────────────────────────────────────────────────

async fn run_compress(current: &Path, ctx: &StageCtx<'_>) -> Result<StageOutcome, FontmendError> {
    let out = ctx.artifact(Stage::Compress.suffix());
    ctx.toolbox
        .compress(current, ctx.config.compression, &out)
        .await?;
    Ok(StageOutcome::Replaced {
        artifact: out,
        standalone: None,
    })
}

// ── Cover sheet ───────────────────────────────────────────────────────────

async fn run_cover(current: &Path, ctx: &StageCtx<'_>) -> Result<StageOutcome, FontmendError> {
    let source = typeset::cover_source(&ctx.config.cover, ctx.stem);

    let standalone_path = ctx.artifact("-COVER");
    let compile_dir = ctx.workspace.scratch("cover");
    let result = typeset::typeset_to(ctx.toolbox, &source, &compile_dir, &standalone_path).await;
    let _ = tokio::fs::remove_dir_all(&compile_dir).await;
    result?;

    let merged = ctx.artifact(Stage::Cover.suffix());
    prepend_merge(ctx, &standalone_path, current, &merged).await?;

    Ok(StageOutcome::Replaced {
        artifact: merged,
        standalone: Some(StandaloneArtifact {
            kind: StandaloneKind::Cover,
            path: standalone_path,
        }),
    })
}

/// Prepend `sheet` to `body`, writing `out`. The standalone sheet survives —
/// it is merged by copy, not consumed.
async fn prepend_merge(
    ctx: &StageCtx<'_>,
    sheet: &Path,
    body: &Path,
    out: &Path,
) -> Result<(), FontmendError> {
    ctx.toolbox
        .merge(&[sheet.to_path_buf(), body.to_path_buf()], out)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_is_fixed_and_complete() {
        let names: Vec<&str> = Stage::ORDER.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "unlock",
                "font-repair",
                "ocr",
                "toc",
                "page-numbers",
                "compress",
                "cover"
            ]
        );
    }

    #[test]
    fn only_font_repair_is_fatal() {
        for stage in Stage::ORDER {
            assert_eq!(stage.fatal(), stage == Stage::FontRepair, "{stage}");
        }
    }

    #[test]
    fn font_repair_always_enabled() {
        let config = JobConfig::default();
        assert_eq!(Stage::enabled_stages(&config), vec![Stage::FontRepair]);
    }

    #[test]
    fn all_stages_enabled_in_order() {
        let config = JobConfig::builder()
            .remove_security(true)
            .ocr(true)
            .generate_toc(true)
            .page_numbers(true)
            .compress(true)
            .generate_cover(true)
            .build()
            .unwrap();
        assert_eq!(Stage::enabled_stages(&config), Stage::ORDER.to_vec());
    }

    #[test]
    fn suffixes_are_unique() {
        let mut suffixes: Vec<&str> = Stage::ORDER.iter().map(|s| s.suffix()).collect();
        suffixes.extend(Stage::ORDER.iter().filter_map(|s| s.standalone_suffix()));
        let mut deduped = suffixes.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(suffixes.len(), deduped.len());
    }

    #[test]
    fn standalone_suffixes_only_for_sheet_stages() {
        assert_eq!(Stage::Toc.standalone_suffix(), Some("-TOC"));
        assert_eq!(Stage::Cover.standalone_suffix(), Some("-COVER"));
        assert_eq!(Stage::Ocr.standalone_suffix(), None);
        assert_eq!(Stage::FontRepair.standalone_suffix(), None);
    }
}
