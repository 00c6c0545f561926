use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::cli::MergeOrder;
use crate::progress::{ProgressEvent, ProgressSender};
use crate::scan::{choose_most_complete, scan_txt_folder, IndexedFile, ScanResult};
use crate::textio::{read_text_with_fallback, safe_output_path, write_text};
use crate::Result;

use super::{PairMergeSpec, PairMergeSummary};

/// One matched index with the chosen file from each side.
#[derive(Debug, Clone)]
pub struct MatchedPair {
    pub index: u32,
    pub left: IndexedFile,
    pub right: IndexedFile,
}

impl MatchedPair {
    /// Output filename: the more complete (longer-stemmed) of the two inputs,
    /// the right side winning ties.
    pub fn output_name(&self) -> String {
        if self.right.stem_len >= self.left.stem_len {
            self.right.file_name()
        } else {
            self.left.file_name()
        }
    }
}

/// Matching plan produced by [`PairMerger::plan`] and consumed by
/// [`PairMerger::run`]. Unmatched indices are carried along so they are
/// reported rather than silently dropped.
#[derive(Debug)]
pub struct PairMergePlan {
    pub matched: Vec<MatchedPair>,
    pub unmatched_left: Vec<u32>,
    pub unmatched_right: Vec<u32>,
    pub left_no_index: usize,
    pub right_no_index: usize,
    pub left_duplicates: Vec<u32>,
    pub right_duplicates: Vec<u32>,
}

/// Reconciles two folders of per-episode text files and writes one merged
/// document per index present in both.
pub struct PairMerger {
    spec: PairMergeSpec,
}

impl PairMerger {
    pub fn new(spec: PairMergeSpec) -> Self {
        Self { spec }
    }

    /// Scan both folders and match indices. The range filter is applied
    /// identically to both sides before intersecting, so out-of-range
    /// indices neither merge nor show up as unmatched.
    pub fn plan(&self, left_dir: &Path, right_dir: &Path) -> Result<PairMergePlan> {
        let left = scan_txt_folder(left_dir, self.spec.recursive)?;
        let right = scan_txt_folder(right_dir, self.spec.recursive)?;
        Ok(self.match_scans(&left, &right))
    }

    pub fn match_scans(&self, left: &ScanResult, right: &ScanResult) -> PairMergePlan {
        let left_ids: BTreeSet<u32> = left
            .mapping
            .keys()
            .copied()
            .filter(|i| self.spec.range.contains(*i))
            .collect();
        let right_ids: BTreeSet<u32> = right
            .mapping
            .keys()
            .copied()
            .filter(|i| self.spec.range.contains(*i))
            .collect();

        let mut matched = Vec::new();
        for idx in left_ids.intersection(&right_ids) {
            let (Some(l), Some(r)) = (
                choose_most_complete(&left.mapping[idx]),
                choose_most_complete(&right.mapping[idx]),
            ) else {
                continue;
            };
            matched.push(MatchedPair {
                index: *idx,
                left: l.clone(),
                right: r.clone(),
            });
        }

        PairMergePlan {
            matched,
            unmatched_left: left_ids.difference(&right_ids).copied().collect(),
            unmatched_right: right_ids.difference(&left_ids).copied().collect(),
            left_no_index: left.no_index.len(),
            right_no_index: right.no_index.len(),
            left_duplicates: left.duplicates().keys().copied().collect(),
            right_duplicates: right.duplicates().keys().copied().collect(),
        }
    }

    /// Merge every matched pair into `out_dir`. A read or write failure for
    /// one index is logged with that index and counted; the rest of the run
    /// continues.
    pub fn run(
        &self,
        plan: &PairMergePlan,
        out_dir: &Path,
        progress: &ProgressSender,
    ) -> Result<PairMergeSummary> {
        fs_err::create_dir_all(out_dir)?;
        let _ = progress.send(ProgressEvent::Begin {
            total: plan.matched.len() as u64,
        });

        let mut merged = 0usize;
        let mut failed = 0usize;

        for pair in &plan.matched {
            match self.merge_one(pair, out_dir) {
                Ok(path) => {
                    merged += 1;
                    tracing::debug!("P{} merged into {}", pair.index, path.display());
                    let _ = progress.send(ProgressEvent::Log {
                        message: format!(
                            "P{} -> {}",
                            pair.index,
                            path.file_name().unwrap_or_default().to_string_lossy()
                        ),
                    });
                }
                Err(err) => {
                    failed += 1;
                    tracing::warn!("merge failed for P{}: {:#}", pair.index, err);
                    let _ = progress.send(ProgressEvent::Warn {
                        message: format!("P{} failed: {:#}", pair.index, err),
                    });
                }
            }
            let _ = progress.send(ProgressEvent::Advance { units: 1 });
        }

        Ok(PairMergeSummary {
            merged,
            failed,
            unmatched_left: plan.unmatched_left.clone(),
            unmatched_right: plan.unmatched_right.clone(),
            completed_at: chrono::Utc::now(),
        })
    }

    fn merge_one(&self, pair: &MatchedPair, out_dir: &Path) -> Result<PathBuf> {
        let text = self.merge_pair_text(&pair.left.path, &pair.right.path)?;
        let out_path = safe_output_path(out_dir, &pair.output_name(), self.spec.overwrite)?;
        write_text(&out_path, &text, self.spec.encoding)?;
        Ok(out_path)
    }

    /// Build the merged document for one pair of files: both bodies in the
    /// configured order, separated by a blank line, each optionally wrapped
    /// in a labeled section.
    pub fn merge_pair_text(&self, left: &Path, right: &Path) -> Result<String> {
        let left_text = read_text_with_fallback(left)?.text.trim().to_string();
        let right_text = read_text_with_fallback(right)?.text.trim().to_string();

        let (left_part, right_part) = if self.spec.section_headers {
            (
                wrap_section("DESCRIPTION", &left_text),
                wrap_section("TRANSCRIPT", &right_text),
            )
        } else {
            (left_text, right_text)
        };

        let (first, second) = match self.spec.order {
            MergeOrder::LeftFirst => (left_part, right_part),
            MergeOrder::RightFirst => (right_part, left_part),
        };

        Ok(format!("{first}\n\n{second}\n"))
    }
}

fn wrap_section(label: &str, body: &str) -> String {
    format!("===== {label} =====\n{body}\n===== END {label} =====")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexRange;
    use crate::progress;

    fn write_files(dir: &Path, names: &[(&str, &str)]) {
        for (name, content) in names {
            fs_err::write(dir.join(name), content).unwrap();
        }
    }

    #[test]
    fn test_plan_intersects_and_reports_unmatched() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        write_files(
            left.path(),
            &[("【P1】a.txt", "1"), ("【P2】b.txt", "2"), ("【P3】c.txt", "3")],
        );
        write_files(
            right.path(),
            &[("【P2】x.txt", "2"), ("【P3】y.txt", "3"), ("【P4】z.txt", "4")],
        );

        let merger = PairMerger::new(PairMergeSpec::default());
        let plan = merger.plan(left.path(), right.path()).unwrap();

        let matched: Vec<u32> = plan.matched.iter().map(|p| p.index).collect();
        assert_eq!(matched, vec![2, 3]);
        assert_eq!(plan.unmatched_left, vec![1]);
        assert_eq!(plan.unmatched_right, vec![4]);
    }

    #[test]
    fn test_plan_applies_range_to_both_sides() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        write_files(left.path(), &[("【P1】a.txt", "1"), ("【P5】b.txt", "5")]);
        write_files(right.path(), &[("【P5】x.txt", "5"), ("【P9】y.txt", "9")]);

        let spec = PairMergeSpec {
            range: IndexRange::new(Some(4), Some(6)).unwrap(),
            ..PairMergeSpec::default()
        };
        let plan = PairMerger::new(spec).plan(left.path(), right.path()).unwrap();

        assert_eq!(plan.matched.len(), 1);
        assert_eq!(plan.matched[0].index, 5);
        // P1 and P9 are out of range: not matched, not unmatched either.
        assert!(plan.unmatched_left.is_empty());
        assert!(plan.unmatched_right.is_empty());
    }

    #[test]
    fn test_plan_picks_most_complete_duplicate() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        write_files(
            left.path(),
            &[("【P1】a.txt", "short"), ("【P1】a much longer name.txt", "long")],
        );
        write_files(right.path(), &[("【P1】r.txt", "r")]);

        let merger = PairMerger::new(PairMergeSpec::default());
        let plan = merger.plan(left.path(), right.path()).unwrap();

        assert_eq!(plan.left_duplicates, vec![1]);
        assert_eq!(
            plan.matched[0].left.file_name(),
            "【P1】a much longer name.txt"
        );
    }

    #[tokio::test]
    async fn test_run_merges_in_order_with_headers() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_files(left.path(), &[("【P1】desc of episode one.txt", "the description")]);
        write_files(right.path(), &[("【P1】t.txt", "the transcript")]);

        let merger = PairMerger::new(PairMergeSpec::default());
        let plan = merger.plan(left.path(), right.path()).unwrap();

        let (tx, handle) = progress::spawn_renderer(true);
        let summary = merger.run(&plan, out.path(), &tx).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(summary.merged, 1);
        assert_eq!(summary.failed, 0);

        // Longer left stem names the output.
        let out_path = out.path().join("【P1】desc of episode one.txt");
        let text = read_text_with_fallback(&out_path).unwrap().text;
        assert!(text.starts_with("===== DESCRIPTION ====="));
        assert!(text.contains("the description"));
        assert!(text.contains("===== TRANSCRIPT ====="));
        let desc_pos = text.find("the description").unwrap();
        let trans_pos = text.find("the transcript").unwrap();
        assert!(desc_pos < trans_pos);
    }

    #[tokio::test]
    async fn test_run_right_first_without_headers() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_files(left.path(), &[("【P1】d.txt", "DESC")]);
        write_files(right.path(), &[("【P1】t.txt", "TRANS")]);

        let spec = PairMergeSpec {
            order: MergeOrder::RightFirst,
            section_headers: false,
            ..PairMergeSpec::default()
        };
        let merger = PairMerger::new(spec);
        let plan = merger.plan(left.path(), right.path()).unwrap();

        let (tx, handle) = progress::spawn_renderer(true);
        merger.run(&plan, out.path(), &tx).unwrap();
        drop(tx);
        handle.await.unwrap();

        // Equal stem lengths: right side names the output.
        let text = read_text_with_fallback(&out.path().join("【P1】t.txt"))
            .unwrap()
            .text;
        assert_eq!(text, "TRANS\n\nDESC\n");
    }

    #[tokio::test]
    async fn test_rerun_without_overwrite_suffixes() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_files(left.path(), &[("【P1】same.txt", "a")]);
        write_files(right.path(), &[("【P1】s.txt", "b")]);

        let merger = PairMerger::new(PairMergeSpec::default());
        let plan = merger.plan(left.path(), right.path()).unwrap();

        let (tx, handle) = progress::spawn_renderer(true);
        merger.run(&plan, out.path(), &tx).unwrap();
        merger.run(&plan, out.path(), &tx).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(out.path().join("【P1】same.txt").exists());
        assert!(out.path().join("【P1】same_1.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_input_is_counted_not_fatal() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_files(left.path(), &[("【P1】a.txt", "1"), ("【P2】b.txt", "2")]);
        write_files(right.path(), &[("【P1】x.txt", "1"), ("【P2】y.txt", "2")]);

        let merger = PairMerger::new(PairMergeSpec::default());
        let plan = merger.plan(left.path(), right.path()).unwrap();

        // Remove one input between plan and run to force a per-item failure.
        fs_err::remove_file(left.path().join("【P1】a.txt")).unwrap();

        let (tx, handle) = progress::spawn_renderer(true);
        let summary = merger.run(&plan, out.path(), &tx).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(summary.merged, 1);
        assert_eq!(summary.failed, 1);
    }
}
