//! Document reassembly: untouched slices + rebuilt pages → final document.
//!
//! The emission plan is computed first as plain data ([`plan`]), then
//! executed against the page assembler. Splitting the walk from the I/O
//! keeps the ordering logic — the part that decides whether the output has
//! the right pages in the right order — testable without any collaborator.
//!
//! The primary correctness property lives here: for every valid input the
//! merged document has exactly `total_pages` pages. The count is verified
//! against the assembler after the merge; a mismatch is a fatal
//! [`FontmendError::MergeFailed`], never a silently short document.

use crate::error::FontmendError;
use crate::pipeline::ranges::PageRange;
use crate::pipeline::repair::Fragment;
use crate::tools::Toolbox;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One step of the reassembly walk, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    /// Copy this span of the original unchanged.
    Untouched(PageRange),
    /// Insert the rebuilt fragment for this page.
    Repaired(usize),
}

/// Compute the emission order for a document.
///
/// Walks the problem ranges ascending: before each range, an untouched span
/// covers the gap since the cursor (skipped when empty); inside the range,
/// one repaired emission per page; after the last range, a trailing
/// untouched span to `total_pages` if non-empty.
///
/// Input contract (from [`super::ranges::compact`]): ranges are ascending,
/// maximal, non-overlapping, and within `1..=total_pages`.
pub fn plan(problem_ranges: &[PageRange], total_pages: usize) -> Vec<Emission> {
    let mut emissions = Vec::new();
    let mut cursor = 1usize;

    for range in problem_ranges {
        if cursor < range.start {
            emissions.push(Emission::Untouched(PageRange::new(cursor, range.start - 1)));
        }
        for page in range.pages() {
            emissions.push(Emission::Repaired(page));
        }
        cursor = range.end + 1;
    }

    if cursor <= total_pages {
        emissions.push(Emission::Untouched(PageRange::new(cursor, total_pages)));
    }

    emissions
}

/// Pages the plan would emit — must always equal `total_pages`.
pub fn planned_pages(emissions: &[Emission]) -> usize {
    emissions
        .iter()
        .map(|e| match e {
            Emission::Untouched(r) => r.len(),
            Emission::Repaired(_) => 1,
        })
        .sum()
}

/// Merge the original's untouched spans with the rebuilt pages into `out`.
///
/// `repaired` must contain exactly one fragment per page inside
/// `problem_ranges`; a missing fragment is fatal. On success all fragments
/// (including the untouched ones extracted here) are deleted.
///
/// With no problem ranges this is a plain copy of the original.
pub async fn reassemble(
    toolbox: &Toolbox,
    original: &Path,
    problem_ranges: &[PageRange],
    repaired: Vec<Fragment>,
    total_pages: usize,
    workdir: &Path,
    out: &Path,
) -> Result<(), FontmendError> {
    if problem_ranges.is_empty() {
        debug!("no problem ranges: copying original unchanged");
        tokio::fs::copy(original, out)
            .await
            .map_err(|e| FontmendError::OutputWriteFailed {
                path: out.to_path_buf(),
                source: e,
            })?;
        return Ok(());
    }

    let mut by_page: BTreeMap<usize, Fragment> = BTreeMap::new();
    for frag in repaired {
        match frag.kind() {
            crate::pipeline::repair::FragmentKind::Repaired(page) => {
                by_page.insert(page, frag);
            }
            crate::pipeline::repair::FragmentKind::Untouched(range) => {
                return Err(FontmendError::Internal(format!(
                    "reassemble received an untouched fragment for {range}; it extracts those itself"
                )));
            }
        }
    }

    let emissions = plan(problem_ranges, total_pages);
    debug_assert_eq!(planned_pages(&emissions), total_pages);

    // Materialise the ordered fragment list: extract untouched spans, look
    // up rebuilt pages.
    let mut fragments: Vec<Fragment> = Vec::with_capacity(emissions.len());
    for emission in &emissions {
        match emission {
            Emission::Untouched(range) => {
                let path = workdir.join(format!("untouched-{:04}-{:04}.pdf", range.start, range.end));
                toolbox
                    .extract_pages(original, range.start, range.end, &path)
                    .await?;
                fragments.push(Fragment::untouched(path, *range));
            }
            Emission::Repaired(page) => {
                let frag = by_page.remove(page).ok_or_else(|| FontmendError::MergeFailed {
                    detail: format!("missing repaired fragment for page {page}"),
                })?;
                fragments.push(frag);
            }
        }
    }

    let parts: Vec<PathBuf> = fragments.iter().map(|f| f.path().to_path_buf()).collect();
    toolbox.merge(&parts, out).await?;

    // Page-count invariant: the merged document must cover every original
    // page exactly once.
    let merged_pages = toolbox.page_count(out).await?;
    if merged_pages != total_pages {
        return Err(FontmendError::MergeFailed {
            detail: format!(
                "merged document has {merged_pages} pages, expected {total_pages}"
            ),
        });
    }

    info!(
        "reassembled {} fragments into {} ({} pages)",
        fragments.len(),
        out.display(),
        total_pages
    );

    for frag in fragments {
        frag.delete();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ranges::compact;

    #[test]
    fn middle_range_sandwiched_by_untouched_spans() {
        // 10-page document, pages 4-6 problematic:
        // [1-3] [4] [5] [6] [7-10]
        let emissions = plan(&compact(&[4, 5, 6]), 10);
        assert_eq!(
            emissions,
            vec![
                Emission::Untouched(PageRange::new(1, 3)),
                Emission::Repaired(4),
                Emission::Repaired(5),
                Emission::Repaired(6),
                Emission::Untouched(PageRange::new(7, 10)),
            ]
        );
        assert_eq!(planned_pages(&emissions), 10);
    }

    #[test]
    fn empty_problem_set_is_one_untouched_span() {
        let emissions = plan(&[], 3);
        assert_eq!(emissions, vec![Emission::Untouched(PageRange::new(1, 3))]);
        assert_eq!(planned_pages(&emissions), 3);
    }

    #[test]
    fn problem_at_first_page_has_no_leading_span() {
        let emissions = plan(&compact(&[1, 2]), 5);
        assert_eq!(
            emissions,
            vec![
                Emission::Repaired(1),
                Emission::Repaired(2),
                Emission::Untouched(PageRange::new(3, 5)),
            ]
        );
    }

    #[test]
    fn problem_at_last_page_has_no_trailing_span() {
        let emissions = plan(&compact(&[5]), 5);
        assert_eq!(
            emissions,
            vec![
                Emission::Untouched(PageRange::new(1, 4)),
                Emission::Repaired(5),
            ]
        );
    }

    #[test]
    fn every_page_problematic_emits_no_untouched_spans() {
        let emissions = plan(&compact(&[1, 2, 3]), 3);
        assert!(emissions
            .iter()
            .all(|e| matches!(e, Emission::Repaired(_))));
        assert_eq!(planned_pages(&emissions), 3);
    }

    #[test]
    fn page_count_invariant_holds_for_scattered_sets() {
        let cases: [(&[usize], usize); 4] = [
            (&[2, 5, 9], 12),
            (&[1], 1),
            (&[1, 3, 5, 7, 9], 10),
            (&[10, 11, 12, 40], 300),
        ];
        for (set, total) in cases {
            let emissions = plan(&compact(set), total);
            assert_eq!(planned_pages(&emissions), total, "set {set:?}");
        }
    }
}
