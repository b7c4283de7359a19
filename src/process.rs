//! Top-level job entry points: run the staged pipeline over one document.
//!
//! ## State threading
//!
//! The predecessor pipeline kept a global mutable `current_file` variable
//! that every stage reassigned. Here the same idea is an explicit
//! [`PipelineState`] value: each successful stage returns a new state whose
//! previous artifact has been deleted — except the original input, which is
//! preserved until the whole job completes (and beyond, unless the caller
//! opts out). A fatal stage failure deletes every job-owned intermediate and
//! surfaces a single structured error naming the stage; the input is never
//! the casualty of a failed run.

use crate::config::JobConfig;
use crate::error::FontmendError;
use crate::output::{JobOutput, JobStats, ScanReport, StandaloneArtifact};
use crate::pipeline::classify;
use crate::pipeline::ranges;
use crate::pipeline::stage::{run_stage, RepairSummary, Stage, StageCtx, StageOutcome};
use crate::tools::Toolbox;
use crate::workspace::{sanitize_stem, JobId, JobWorkspace};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Process one document through the configured pipeline.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `input`  — the document to repair; read, never modified
/// * `output` — where the final document lands
/// * `config` — which stages run, and how
///
/// # Returns
/// `Ok(JobOutput)` when a final document was produced, even if optional
/// stages were skipped (check `output.warnings`).
///
/// # Errors
/// Returns `Err(FontmendError)` only for fatal failures: missing/invalid
/// input, or the font-repair stage failing. All job-owned intermediates are
/// removed before the error is returned; the input file is left in place.
pub async fn process(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &JobConfig,
) -> Result<JobOutput, FontmendError> {
    let total_start = Instant::now();
    let input = input.as_ref();
    let output = output.as_ref();

    validate_input(input)?;
    let toolbox = resolve_toolbox(config);
    let stem = input_stem(input);

    let workspace = JobWorkspace::claim(&work_root(config), JobId::new()).await?;
    info!(
        "job {}: processing {} -> {}",
        workspace.id(),
        input.display(),
        output.display()
    );

    let stages = Stage::enabled_stages(config);
    if let Some(ref cb) = config.progress_callback {
        cb.on_job_start(stages.len());
    }

    let mut state = PipelineState::new(input.to_path_buf());
    let mut summary = RepairSummary::default();
    let mut warnings = Vec::new();
    let mut standalone: Vec<StandaloneArtifact> = Vec::new();
    let mut stages_run = 0usize;
    let mut stages_skipped = 0usize;
    let mut total_pages = 0usize;

    for stage in &stages {
        if let Some(ref cb) = config.progress_callback {
            cb.on_stage_start(stage.name(), stage.message());
        }

        // The page count is read off the current artifact right before font
        // repair: the unlock stage may have just made the document readable.
        if *stage == Stage::FontRepair {
            total_pages = match toolbox.page_count(state.current()).await {
                Ok(n) => n,
                Err(e) => {
                    return Err(fail_job(workspace, *stage, e).await);
                }
            };
            debug!("document has {total_pages} pages");
        }

        let mut ctx = StageCtx {
            toolbox: &toolbox,
            config,
            workspace: &workspace,
            stem: &stem,
            total_pages,
            summary: &mut summary,
            warnings: &mut warnings,
        };

        match run_stage(*stage, state.current(), &mut ctx).await {
            Ok(StageOutcome::Replaced {
                artifact,
                standalone: side,
            }) => {
                state = state.advance(artifact).await;
                standalone.extend(side);
                stages_run += 1;
                if let Some(ref cb) = config.progress_callback {
                    cb.on_stage_complete(stage.name());
                }
            }
            Ok(StageOutcome::Skipped { warning }) => {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_stage_skipped(stage.name(), &warning.to_string());
                }
                warnings.push(warning);
                stages_skipped += 1;
            }
            Err(e) => {
                return Err(fail_job(workspace, *stage, e).await);
            }
        }
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_job_complete(stages_run, stages_skipped);
    }

    // Final rename to the externally visible output name.
    move_file(state.current(), output).await?;

    // Standalone side artifacts land next to the final output.
    let mut published = Vec::with_capacity(standalone.len());
    for artifact in standalone {
        let suffix = match artifact.kind {
            crate::output::StandaloneKind::Toc => "-TOC",
            crate::output::StandaloneKind::Cover => "-COVER",
        };
        let dest = sibling_with_suffix(output, suffix);
        move_file(&artifact.path, &dest).await?;
        published.push(StandaloneArtifact {
            kind: artifact.kind,
            path: dest,
        });
    }

    if !config.keep_original {
        if let Err(e) = tokio::fs::remove_file(input).await {
            warn!("could not remove original input: {e}");
        }
    }

    let job_id = workspace.id().to_string();
    workspace.remove_artifacts().await;
    workspace.release().await;

    let stats = JobStats {
        total_pages,
        repaired_pages: summary.problem_pages.len(),
        repaired_ranges: summary.ranges.iter().map(|r| r.to_string()).collect(),
        stages_run,
        stages_skipped,
        scan_duration_ms: summary.scan_duration_ms,
        repair_duration_ms: summary.repair_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "job {job_id}: complete, {} pages ({} rebuilt), {} stages run, {}ms",
        stats.total_pages, stats.repaired_pages, stats.stages_run, stats.total_duration_ms
    );

    Ok(JobOutput {
        job_id,
        final_path: output.to_path_buf(),
        standalone: published,
        warnings,
        stats,
    })
}

/// Synchronous wrapper around [`process`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &JobConfig,
) -> Result<JobOutput, FontmendError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FontmendError::Internal(format!("failed to create tokio runtime: {e}")))?
        .block_on(process(input, output, config))
}

/// Scan a document for pages with unprintable fonts, without repairing
/// anything.
///
/// Runs the same batched classifier the repair stage uses. Encrypted inputs
/// should be unlocked first — the scan never runs the unlock stage.
pub async fn scan(
    input: impl AsRef<Path>,
    config: &JobConfig,
) -> Result<ScanReport, FontmendError> {
    let input = input.as_ref();
    validate_input(input)?;
    let toolbox = resolve_toolbox(config);

    let total_pages = toolbox.page_count(input).await?;
    let mut warnings = Vec::new();
    let problem_pages = classify::scan_document(
        &toolbox,
        input,
        total_pages,
        config.scan_batch_size,
        config.progress_callback.as_ref(),
        &mut warnings,
    )
    .await;

    let problem_ranges = ranges::compact(&problem_pages)
        .iter()
        .map(|r| r.to_string())
        .collect();

    Ok(ScanReport {
        total_pages,
        problem_pages,
        problem_ranges,
        warnings,
    })
}

// ── Pipeline state ────────────────────────────────────────────────────────

/// The orchestrator's working record: the current artifact and the original
/// input. Threaded through stages; never shared, never mutated in place.
struct PipelineState {
    current: PathBuf,
    original: PathBuf,
}

impl PipelineState {
    fn new(original: PathBuf) -> Self {
        Self {
            current: original.clone(),
            original,
        }
    }

    fn current(&self) -> &Path {
        &self.current
    }

    /// Hand over to a new current artifact, deleting the superseded one
    /// (unless it is the original input).
    async fn advance(self, new: PathBuf) -> Self {
        if self.current != self.original {
            if let Err(e) = tokio::fs::remove_file(&self.current).await {
                warn!(
                    "could not remove superseded artifact {}: {e}",
                    self.current.display()
                );
            }
        }
        Self {
            current: new,
            original: self.original,
        }
    }
}

// ── Internal helpers ──────────────────────────────────────────────────────

/// Check the input exists and starts with the PDF magic bytes.
fn validate_input(path: &Path) -> Result<(), FontmendError> {
    use std::io::Read;

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => {
            return Err(FontmendError::InputNotFound {
                path: path.to_path_buf(),
            })
        }
    };

    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
        return Err(FontmendError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Collaborators: config override first, then environment defaults; the
/// configured timeout applies either way.
fn resolve_toolbox(config: &JobConfig) -> Toolbox {
    config
        .toolbox
        .clone()
        .unwrap_or_else(Toolbox::from_env)
        .with_timeout(Duration::from_secs(config.tool_timeout_secs))
}

fn work_root(config: &JobConfig) -> PathBuf {
    config
        .work_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("fontmend"))
}

fn input_stem(input: &Path) -> String {
    sanitize_stem(
        &input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    )
}

/// Tear down after a fatal stage failure: all job-owned intermediates go,
/// the original input stays.
async fn fail_job(workspace: JobWorkspace, stage: Stage, e: FontmendError) -> FontmendError {
    warn!("job {}: stage {} failed fatally: {e}", workspace.id(), stage);
    workspace.remove_artifacts().await;
    workspace.release().await;
    if e.stage().is_some() {
        e
    } else {
        FontmendError::StageFailed {
            stage: stage.name(),
            detail: e.to_string(),
        }
    }
}

/// Rename, falling back to copy+remove across filesystems.
async fn move_file(from: &Path, to: &Path) -> Result<(), FontmendError> {
    if let Some(parent) = to.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FontmendError::OutputWriteFailed {
                    path: to.to_path_buf(),
                    source: e,
                })?;
        }
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| FontmendError::OutputWriteFailed {
            path: to.to_path_buf(),
            source: e,
        })?;
    let _ = tokio::fs::remove_file(from).await;
    Ok(())
}

/// `report.pdf` + `-TOC` → `report-TOC.pdf`, next to the output.
fn sibling_with_suffix(output: &Path, suffix: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pdf".to_string());
    output.with_file_name(format!("{stem}{suffix}.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_missing_and_non_pdf() {
        assert!(matches!(
            validate_input(Path::new("/no/such/file.pdf")),
            Err(FontmendError::InputNotFound { .. })
        ));

        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("not.pdf");
        std::fs::write(&bogus, b"hello world").unwrap();
        assert!(matches!(
            validate_input(&bogus),
            Err(FontmendError::NotAPdf { .. })
        ));
    }

    #[test]
    fn validate_accepts_pdf_magic() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("ok.pdf");
        std::fs::write(&pdf, b"%PDF-1.7\n...").unwrap();
        assert!(validate_input(&pdf).is_ok());
    }

    #[test]
    fn sibling_names_keep_extension() {
        assert_eq!(
            sibling_with_suffix(Path::new("/out/fixed_report.pdf"), "-TOC"),
            PathBuf::from("/out/fixed_report-TOC.pdf")
        );
    }

    #[test]
    fn stem_is_sanitized() {
        assert_eq!(input_stem(Path::new("/tmp/My Report (v2).pdf")), "My_Report__v2_");
        assert_eq!(input_stem(Path::new("/")), "document");
    }

    #[tokio::test]
    async fn advance_deletes_superseded_but_not_original() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("orig.pdf");
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        std::fs::write(&original, b"%PDF").unwrap();
        std::fs::write(&a, b"%PDF").unwrap();
        std::fs::write(&b, b"%PDF").unwrap();

        let state = PipelineState::new(original.clone());
        let state = state.advance(a.clone()).await;
        assert!(original.exists(), "original is never deleted by advance");
        assert!(a.exists());

        let state = state.advance(b.clone()).await;
        assert!(!a.exists(), "superseded intermediate is deleted");
        assert!(b.exists());
        assert_eq!(state.current(), b.as_path());
    }
}
