//! Episode Toolkit - CLI utilities for an episode-based content workflow
//!
//! This library reconciles and merges per-episode text files named with a
//! 【P<number>】 token, exports per-episode descriptions from a video
//! collection, and batch-transcribes local media through a speech-to-text API.

pub mod cli;
pub mod config;
pub mod index;
pub mod merge;
pub mod progress;
pub mod scan;
pub mod sheets;
pub mod sources;
pub mod textio;
pub mod utils;

pub use cli::{Cli, Commands, HeaderWriteMode, MergeOrder, OutputEncoding, SortMode, TitleSource};
pub use config::Config;
pub use index::{extract_index, IndexRange};
pub use merge::{BatchMergeSpec, PairMergeSpec};
pub use scan::{IndexedFile, ScanResult};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the toolkit
#[derive(thiserror::Error, Debug)]
pub enum ToolkitError {
    #[error("Invalid episode range: {0}")]
    InvalidRange(String),

    #[error("Not a directory: {0}")]
    MissingDirectory(String),

    #[error("No free output name for '{0}' after {1} attempts")]
    OutputNameExhausted(String, usize),

    #[error("Description fetch failed: {0}")]
    DescriptionFetchFailed(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),
}
