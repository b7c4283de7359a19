//! Output types: what a finished job hands back to the caller.

use crate::error::StageWarning;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result of a successful job.
///
/// Serialisable so front ends can store it as the job record and the CLI can
/// emit it with `--json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutput {
    /// The job's UUID; every workspace file of this run was prefixed with it.
    pub job_id: String,
    /// The final document, at the caller-requested output path.
    pub final_path: PathBuf,
    /// Side artifacts kept for separate download (cover sheet, TOC sheet).
    pub standalone: Vec<StandaloneArtifact>,
    /// Non-fatal problems encountered along the way.
    pub warnings: Vec<StageWarning>,
    pub stats: JobStats,
}

/// A side artifact produced in addition to the main document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandaloneArtifact {
    pub kind: StandaloneKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StandaloneKind {
    Toc,
    Cover,
}

/// Counters and timings for one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    /// Page count of the input document (and, by invariant, the output).
    pub total_pages: usize,
    /// Pages classified as problematic and rebuilt.
    pub repaired_pages: usize,
    /// Contiguous problem ranges, rendered as "4-6" / "12".
    pub repaired_ranges: Vec<String>,
    /// Stages that ran and replaced the current artifact.
    pub stages_run: usize,
    /// Optional stages skipped because their collaborator failed.
    pub stages_skipped: usize,
    /// Wall-clock spent scanning for problem pages.
    pub scan_duration_ms: u64,
    /// Wall-clock spent rebuilding pages and reassembling.
    pub repair_duration_ms: u64,
    /// Wall-clock for the whole job.
    pub total_duration_ms: u64,
}

/// Result of a scan-only run (no repair, no pipeline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub total_pages: usize,
    /// Problem pages, ascending.
    pub problem_pages: Vec<usize>,
    /// The same set compacted, rendered as "4-6" / "12".
    pub problem_ranges: Vec<String>,
    pub warnings: Vec<StageWarning>,
}

impl ScanReport {
    /// True when every page prints correctly as-is.
    pub fn is_clean(&self) -> bool {
        self.problem_pages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_output_round_trips_through_json() {
        let out = JobOutput {
            job_id: "0a2b4c6d-1111-4222-8333-444455556666".into(),
            final_path: "/tmp/out/fixed_report.pdf".into(),
            standalone: vec![StandaloneArtifact {
                kind: StandaloneKind::Cover,
                path: "/tmp/out/fixed_report-COVER.pdf".into(),
            }],
            warnings: vec![],
            stats: JobStats {
                total_pages: 10,
                repaired_pages: 3,
                repaired_ranges: vec!["4-6".into()],
                stages_run: 2,
                ..Default::default()
            },
        };
        let json = serde_json::to_string_pretty(&out).unwrap();
        let back: JobOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stats.total_pages, 10);
        assert_eq!(back.standalone.len(), 1);
        assert_eq!(back.standalone[0].kind, StandaloneKind::Cover);
    }

    #[test]
    fn clean_scan_report() {
        let report = ScanReport {
            total_pages: 3,
            problem_pages: vec![],
            problem_ranges: vec![],
            warnings: vec![],
        };
        assert!(report.is_clean());
    }
}
