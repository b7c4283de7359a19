//! Page repair: rebuild one problematic page as a rasterized image.
//!
//! A page whose fonts cannot print is replaced wholesale: rasterize it at
//! the configured DPI (the text becomes pixels, which every print driver can
//! handle), then re-encode that image as a one-page PDF. The visual result
//! is identical; only the broken font machinery is gone.
//!
//! Failure here is fatal to the font-repair stage. The predecessor pipeline
//! silently skipped pages whose rasterization failed and shipped documents
//! with missing content; a missing fragment now aborts the stage instead.

use crate::config::Dpi;
use crate::error::FontmendError;
use crate::pipeline::ranges::PageRange;
use crate::tools::Toolbox;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A temporary single-purpose document produced during font repair.
///
/// Either an untouched slice of the original or one rebuilt page. Fragments
/// are produced in page order and consumed exactly once by the reassembler,
/// which merges and then deletes them. Ownership of the on-disk file follows
/// ownership of the value.
#[derive(Debug)]
pub struct Fragment {
    path: PathBuf,
    kind: FragmentKind,
}

/// What a [`Fragment`] contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// An untouched contiguous slice of the original document.
    Untouched(PageRange),
    /// One rasterized-and-reencoded problem page.
    Repaired(usize),
}

impl Fragment {
    pub fn untouched(path: PathBuf, range: PageRange) -> Self {
        Self {
            path,
            kind: FragmentKind::Untouched(range),
        }
    }

    pub fn repaired(path: PathBuf, page: usize) -> Self {
        Self {
            path,
            kind: FragmentKind::Repaired(page),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> FragmentKind {
        self.kind
    }

    /// Pages this fragment contributes to the final document.
    pub fn page_count(&self) -> usize {
        match self.kind {
            FragmentKind::Untouched(range) => range.len(),
            FragmentKind::Repaired(_) => 1,
        }
    }

    /// Consume the fragment and remove its file.
    pub fn delete(self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("could not remove fragment {}: {e}", self.path.display());
        }
    }
}

/// Rebuild one problem page as a rasterized one-page document.
///
/// Steps: rasterize `page` of `doc` at `dpi` into a scratch directory, then
/// re-encode the image as a PDF in `workdir`. The intermediate image is
/// removed on success.
///
/// # Errors
/// [`FontmendError::RasterizationFailed`] when the rasterizer produces no
/// image; [`FontmendError::EncodingFailed`] when the encoder produces no
/// document. Both abort the font-repair stage — the caller must not skip the
/// page.
pub async fn repair_page(
    toolbox: &Toolbox,
    doc: &Path,
    page: usize,
    dpi: Dpi,
    workdir: &Path,
) -> Result<Fragment, FontmendError> {
    // Per-page scratch dir: the rasterizer names its own output files, so an
    // empty directory makes the produced image unambiguous.
    let scratch = workdir.join(format!("raster-{page:04}"));
    tokio::fs::create_dir_all(&scratch)
        .await
        .map_err(|e| FontmendError::Internal(format!("scratch dir: {e}")))?;

    let prefix = scratch.join("page");
    let image = toolbox.rasterize_page(doc, page, dpi, &prefix).await?;
    debug!("page {page}: rasterized to {}", image.display());

    let out = workdir.join(format!("repaired-{page:04}.pdf"));
    toolbox.encode_image(&image, page, &out).await?;
    debug!("page {page}: re-encoded to {}", out.display());

    // Scratch image no longer needed; the fragment is the PDF.
    let _ = tokio::fs::remove_dir_all(&scratch).await;

    Ok(Fragment::repaired(out, page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_page_counts() {
        let f = Fragment::untouched("/tmp/a.pdf".into(), PageRange::new(1, 3));
        assert_eq!(f.page_count(), 3);
        let f = Fragment::repaired("/tmp/b.pdf".into(), 4);
        assert_eq!(f.page_count(), 1);
    }

    #[test]
    fn delete_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frag.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let f = Fragment::repaired(path.clone(), 1);
        assert!(path.exists());
        f.delete();
        assert!(!path.exists());
    }

    #[test]
    fn delete_of_missing_file_is_quiet() {
        let f = Fragment::repaired("/nonexistent/frag.pdf".into(), 1);
        f.delete(); // must not panic
    }
}
