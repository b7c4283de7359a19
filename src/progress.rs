//! Progress-callback trait for per-stage and per-page job events.
//!
//! Inject an [`Arc<dyn JobProgress>`] via
//! [`crate::config::JobConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline works through a job. The web front end
//! that drives this library forwards them into a per-job status record that
//! clients poll; the bundled CLI renders them as a progress bar.
//!
//! All methods have default no-op implementations so callers only override
//! what they care about. The trait is `Send + Sync`: a job runs on one task,
//! but callers routinely hold the callback from other threads.

use std::sync::Arc;

/// Called by the pipeline as a job advances.
pub trait JobProgress: Send + Sync {
    /// Called once when the job starts, with the number of enabled stages.
    fn on_job_start(&self, total_stages: usize) {
        let _ = total_stages;
    }

    /// Called when a stage begins. `message` is a human-readable description
    /// of what the stage is doing ("Removing security restrictions…").
    fn on_stage_start(&self, stage: &'static str, message: &'static str) {
        let _ = (stage, message);
    }

    /// Called when a stage finishes and hands over a new current artifact.
    fn on_stage_complete(&self, stage: &'static str) {
        let _ = stage;
    }

    /// Called when an optional stage is skipped because its collaborator
    /// failed or is missing.
    fn on_stage_skipped(&self, stage: &'static str, reason: &str) {
        let _ = (stage, reason);
    }

    /// Called after each font-inspection batch during the auto-detect scan.
    fn on_scan_progress(&self, pages_scanned: usize, total_pages: usize) {
        let _ = (pages_scanned, total_pages);
    }

    /// Called after each problem page is rebuilt.
    ///
    /// `index` counts repaired pages (1-based); `total` is the size of the
    /// problem page set.
    fn on_page_repaired(&self, page: usize, index: usize, total: usize) {
        let _ = (page, index, total);
    }

    /// Called once after the last stage, before the final rename.
    fn on_job_complete(&self, stages_run: usize, stages_skipped: usize) {
        let _ = (stages_run, stages_skipped);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgress;

impl JobProgress for NoopProgress {}

/// Convenience alias matching the type stored in [`crate::config::JobConfig`].
pub type ProgressCallback = Arc<dyn JobProgress>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracking {
        stages_started: AtomicUsize,
        stages_done: AtomicUsize,
        pages: AtomicUsize,
    }

    impl JobProgress for Tracking {
        fn on_stage_start(&self, _stage: &'static str, _message: &'static str) {
            self.stages_started.fetch_add(1, Ordering::SeqCst);
        }
        fn on_stage_complete(&self, _stage: &'static str) {
            self.stages_done.fetch_add(1, Ordering::SeqCst);
        }
        fn on_page_repaired(&self, _page: usize, _index: usize, _total: usize) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgress;
        cb.on_job_start(3);
        cb.on_stage_start("font-repair", "Rebuilding pages…");
        cb.on_scan_progress(50, 200);
        cb.on_page_repaired(4, 1, 3);
        cb.on_stage_complete("font-repair");
        cb.on_stage_skipped("ocr", "not installed");
        cb.on_job_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let t = Tracking {
            stages_started: AtomicUsize::new(0),
            stages_done: AtomicUsize::new(0),
            pages: AtomicUsize::new(0),
        };
        t.on_stage_start("unlock", "…");
        t.on_stage_complete("unlock");
        t.on_stage_start("font-repair", "…");
        t.on_page_repaired(4, 1, 2);
        t.on_page_repaired(5, 2, 2);
        t.on_stage_complete("font-repair");

        assert_eq!(t.stages_started.load(Ordering::SeqCst), 2);
        assert_eq!(t.stages_done.load(Ordering::SeqCst), 2);
        assert_eq!(t.pages.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgress);
        cb.on_job_start(5);
        cb.on_stage_start("compress", "Compressing…");
    }
}
