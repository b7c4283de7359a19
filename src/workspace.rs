//! Job workspace: namespaced temp storage, leases, and the retention sweep.
//!
//! One workspace directory per deployment holds every in-flight and
//! recently-completed job's artifacts. Each job gets a UUID; all of its
//! files are prefixed `{id}_`, so concurrent jobs share the directory
//! without collisions and a job's files can be enumerated by prefix.
//!
//! ## Leases
//!
//! The retention sweep deletes artifacts older than a configured age. Age
//! alone races with long-running jobs — a sweep fired from an inbound
//! request could delete a job's intermediates while a stage is still
//! writing them. Claiming a workspace therefore writes a `{id}.lease`
//! marker that the sweep honours; the marker is removed when the job
//! finishes. A lease older than the retention age no longer protects its
//! job (the owning process is assumed dead) and is swept with the rest.

use crate::error::FontmendError;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default retention age for the sweep: 24 hours.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// A job identifier: a UUID v4 rendered in its canonical hyphenated form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Validate an externally supplied id (e.g. from a download URL).
    pub fn parse(s: &str) -> Result<Self, FontmendError> {
        Uuid::parse_str(s)
            .map(|u| Self(u.to_string()))
            .map_err(|_| FontmendError::InvalidJobId { id: s.to_string() })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A claimed per-job slice of the workspace directory.
///
/// Dropping the value releases the lease (best effort); artifacts are left
/// for the caller or the sweep.
#[derive(Debug)]
pub struct JobWorkspace {
    root: PathBuf,
    id: JobId,
    released: bool,
}

impl JobWorkspace {
    /// Claim a workspace for a new job: ensure the root exists and write the
    /// lease marker.
    pub async fn claim(root: &Path, id: JobId) -> Result<Self, FontmendError> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| FontmendError::Internal(format!("workspace root: {e}")))?;
        let lease = root.join(format!("{id}.lease"));
        tokio::fs::write(&lease, std::process::id().to_string())
            .await
            .map_err(|e| FontmendError::OutputWriteFailed {
                path: lease,
                source: e,
            })?;
        debug!("claimed workspace for job {id} in {}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            id,
            released: false,
        })
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a job-namespaced artifact file.
    pub fn artifact(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}_{name}", self.id))
    }

    /// Path of a job-namespaced scratch directory (not created).
    pub fn scratch(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}_{name}.d", self.id))
    }

    /// Delete every file and scratch directory belonging to this job.
    /// The lease survives until [`release`](Self::release).
    pub async fn remove_artifacts(&self) {
        let prefix = format!("{}_", self.id);
        let Ok(mut entries) = tokio::fs::read_dir(&self.root).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(&prefix) {
                continue;
            }
            let path = entry.path();
            let result = if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            if let Err(e) = result {
                warn!("could not remove {}: {e}", path.display());
            }
        }
    }

    /// Release the lease. Artifacts stay behind for download / the sweep.
    pub async fn release(mut self) {
        let lease = self.root.join(format!("{}.lease", self.id));
        if let Err(e) = tokio::fs::remove_file(&lease).await {
            debug!("lease already gone for {}: {e}", self.id);
        }
        self.released = true;
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if !self.released {
            let lease = self.root.join(format!("{}.lease", self.id));
            let _ = std::fs::remove_file(lease);
        }
    }
}

/// Reduce a user-supplied file stem to a collision- and traversal-safe name.
///
/// Everything outside `[A-Za-z0-9._-]` becomes `_`; an empty result falls
/// back to `document`.
pub fn sanitize_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

/// Delete workspace entries older than `max_age`, skipping jobs that hold a
/// live lease. Returns the number of entries removed.
///
/// Synchronous on purpose: front ends call this opportunistically on inbound
/// requests, and the walk is pure metadata I/O.
pub fn sweep(root: &Path, max_age: Duration) -> std::io::Result<usize> {
    if !root.exists() {
        return Ok(0);
    }
    let now = SystemTime::now();

    // Live leases first; expired leases don't protect their job.
    let mut live_leases: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(root)?.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(id) = name.strip_suffix(".lease") {
            if !is_expired(&entry.path(), now, max_age) {
                live_leases.push(id.to_string());
            }
        }
    }

    let mut removed = 0usize;
    for entry in std::fs::read_dir(root)?.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        let job_id = name
            .strip_suffix(".lease")
            .map(str::to_string)
            .or_else(|| name.split('_').next().map(str::to_string));
        if let Some(id) = job_id {
            if live_leases.iter().any(|l| *l == id) {
                continue;
            }
        }

        if !is_expired(&path, now, max_age) {
            continue;
        }

        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!("sweep could not remove {}: {e}", path.display()),
        }
    }

    if removed > 0 {
        info!("retention sweep removed {removed} entries from {}", root.display());
    }
    Ok(removed)
}

fn is_expired(path: &Path, now: SystemTime, max_age: Duration) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    let Ok(mtime) = meta.modified() else {
        return false;
    };
    now.duration_since(mtime)
        .map(|age| age > max_age)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_valid_uuids_and_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert!(JobId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn parse_rejects_non_uuids() {
        assert!(JobId::parse("../../etc/passwd").is_err());
        assert!(JobId::parse("").is_err());
        assert!(JobId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn sanitize_stem_replaces_and_falls_back() {
        assert_eq!(sanitize_stem("Annual Report (2024)"), "Annual_Report__2024_");
        assert_eq!(sanitize_stem("simple-name_1.2"), "simple-name_1.2");
        assert_eq!(sanitize_stem("../.."), "_"); // slashes replaced, dots trimmed
        assert_eq!(sanitize_stem(""), "document");
        assert_eq!(sanitize_stem("..."), "document");
    }

    #[tokio::test]
    async fn claim_writes_lease_and_release_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let id = JobId::new();
        let lease = dir.path().join(format!("{id}.lease"));

        let ws = JobWorkspace::claim(dir.path(), id).await.unwrap();
        assert!(lease.exists());
        ws.release().await;
        assert!(!lease.exists());
    }

    #[tokio::test]
    async fn drop_releases_lease_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let id = JobId::new();
        let lease = dir.path().join(format!("{id}.lease"));
        {
            let _ws = JobWorkspace::claim(dir.path(), id).await.unwrap();
            assert!(lease.exists());
        }
        assert!(!lease.exists());
    }

    #[tokio::test]
    async fn remove_artifacts_only_touches_own_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::claim(dir.path(), JobId::new()).await.unwrap();
        let mine = ws.artifact("doc-FIXED.pdf");
        let other = dir.path().join("other-job_doc.pdf");
        std::fs::write(&mine, b"x").unwrap();
        std::fs::write(&other, b"x").unwrap();

        ws.remove_artifacts().await;
        assert!(!mine.exists());
        assert!(other.exists());
        ws.release().await;
    }

    #[test]
    fn sweep_removes_expired_and_skips_leased() {
        let dir = tempfile::tempdir().unwrap();
        let leased_id = JobId::new();
        let expired_id = JobId::new();

        let leased_file = dir.path().join(format!("{leased_id}_doc.pdf"));
        let expired_file = dir.path().join(format!("{expired_id}_doc.pdf"));
        let fresh_file = dir.path().join(format!("{}_doc.pdf", JobId::new()));
        std::fs::write(&leased_file, b"x").unwrap();
        std::fs::write(&expired_file, b"x").unwrap();
        std::fs::write(&fresh_file, b"x").unwrap();
        std::fs::write(dir.path().join(format!("{leased_id}.lease")), b"1").unwrap();

        // Backdate the two candidates past the retention age; the fresh file
        // and the lease keep their current mtime.
        let old = SystemTime::now() - Duration::from_secs(10);
        set_mtime(&leased_file, old);
        set_mtime(&expired_file, old);

        let removed = sweep(dir.path(), Duration::from_secs(5)).unwrap();
        assert_eq!(removed, 1, "only the unleased expired file goes");
        assert!(leased_file.exists());
        assert!(!expired_file.exists());
        assert!(fresh_file.exists());
    }

    #[test]
    fn sweep_drops_stale_leases_and_their_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let id = JobId::new();
        let artifact = dir.path().join(format!("{id}_doc.pdf"));
        let lease = dir.path().join(format!("{id}.lease"));
        std::fs::write(&artifact, b"x").unwrap();
        std::fs::write(&lease, b"1").unwrap();

        let old = SystemTime::now() - Duration::from_secs(100);
        set_mtime(&artifact, old);
        set_mtime(&lease, old);

        let removed = sweep(dir.path(), Duration::from_secs(5)).unwrap();
        assert_eq!(removed, 2);
        assert!(!artifact.exists());
        assert!(!lease.exists());
    }

    #[test]
    fn sweep_of_missing_root_is_a_noop() {
        assert_eq!(
            sweep(Path::new("/definitely/not/here"), DEFAULT_RETENTION).unwrap(),
            0
        );
    }

    /// Backdate a file's mtime.
    fn set_mtime(path: &Path, to: SystemTime) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        let times = std::fs::FileTimes::new().set_modified(to);
        file.set_times(times).unwrap();
    }
}
