use serde::Serialize;

use crate::cli::{MergeOrder, OutputEncoding, SortMode, TitleSource};
use crate::index::IndexRange;

pub mod batch;
pub mod pairwise;

pub use batch::BatchMerger;
pub use pairwise::PairMerger;

/// Options for the two-folder pairwise merge.
#[derive(Debug, Clone)]
pub struct PairMergeSpec {
    /// Which side's text leads each merged document
    pub order: MergeOrder,

    /// Wrap each part in labeled section header/footer lines
    pub section_headers: bool,

    /// Recurse into subdirectories while scanning
    pub recursive: bool,

    /// Overwrite colliding output names instead of suffixing
    pub overwrite: bool,

    /// Inclusive episode range applied to both sides before matching
    pub range: IndexRange,

    /// Encoding of written documents
    pub encoding: OutputEncoding,
}

impl Default for PairMergeSpec {
    fn default() -> Self {
        Self {
            order: MergeOrder::LeftFirst,
            section_headers: true,
            recursive: false,
            overwrite: false,
            range: IndexRange::unbounded(),
            encoding: OutputEncoding::Utf8Bom,
        }
    }
}

/// Options for the grouped single-folder merge.
#[derive(Debug, Clone)]
pub struct BatchMergeSpec {
    /// Files per merged document (last group may be smaller)
    pub batch_size: usize,

    /// Sort applied before grouping
    pub sort: SortMode,

    /// Where entry titles come from
    pub title: TitleSource,

    /// Suppress the title when the body already begins with it
    pub dedupe_title: bool,

    /// Blank lines between entries
    pub blank_lines: usize,

    /// Optional separator line after each entry
    pub separator: Option<String>,

    /// Bounded width of the concurrent read pool
    pub workers: usize,

    /// Overwrite colliding output names instead of suffixing
    pub overwrite: bool,

    /// Encoding of written documents
    pub encoding: OutputEncoding,
}

impl Default for BatchMergeSpec {
    fn default() -> Self {
        Self {
            batch_size: 10,
            sort: SortMode::Natural,
            title: TitleSource::Filename,
            dedupe_title: true,
            blank_lines: 3,
            separator: None,
            workers: default_workers(),
            overwrite: false,
            encoding: OutputEncoding::Utf8,
        }
    }
}

/// Default read-pool width: available parallelism, or 4 if unknown.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Final counts of a pairwise merge run.
#[derive(Debug, Clone, Serialize)]
pub struct PairMergeSummary {
    pub merged: usize,
    pub failed: usize,
    pub unmatched_left: Vec<u32>,
    pub unmatched_right: Vec<u32>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

/// Final counts of a batch merge run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchMergeSummary {
    pub files_found: usize,
    pub files_merged: usize,
    pub read_failures: usize,
    pub groups_written: usize,
    pub groups_skipped: usize,
    pub write_failures: usize,
    pub cancelled: bool,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

impl BatchMergeSummary {
    pub fn empty() -> Self {
        Self {
            files_found: 0,
            files_merged: 0,
            read_failures: 0,
            groups_written: 0,
            groups_skipped: 0,
            write_failures: 0,
            cancelled: false,
            completed_at: chrono::Utc::now(),
        }
    }
}
