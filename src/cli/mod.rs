use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "epkit",
    about = "Episode Toolkit - export, transcribe, and merge per-episode text files by their 【P<n>】 index",
    version,
    long_about = "CLI toolkit for an episode-based content workflow. Scans folders of text files \
named with an episode token like 【P12】 or [P12], reconciles two folders by shared index, merges \
batches of files into grouped documents, exports per-episode descriptions from a Bilibili \
collection, and transcribes local media through a speech-to-text API."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a folder and report its episode-index mapping
    Scan {
        /// Folder containing .txt files named with an episode token
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Recurse into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Merge two folders of .txt files by shared episode index
    MergePairs {
        /// First folder, e.g. exported video descriptions
        #[arg(long, value_name = "DIR")]
        left: PathBuf,

        /// Second folder, e.g. transcripts
        #[arg(long, value_name = "DIR")]
        right: PathBuf,

        /// Output folder (defaults to merged_output next to the first folder)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Which folder's text comes first in each merged document
        #[arg(long, value_enum, default_value = "left-first")]
        order: MergeOrder,

        /// Skip the labeled section header/footer lines around each part
        #[arg(long)]
        no_headers: bool,

        /// Recurse into subdirectories while scanning
        #[arg(short, long)]
        recursive: bool,

        /// Overwrite existing output files instead of adding a numeric suffix
        #[arg(long)]
        overwrite: bool,

        /// Only merge episode indices >= this bound
        #[arg(long, value_name = "N")]
        min_index: Option<u32>,

        /// Only merge episode indices <= this bound
        #[arg(long, value_name = "N")]
        max_index: Option<u32>,

        /// Output encoding
        #[arg(long, value_enum, default_value = "utf8-bom")]
        encoding: OutputEncoding,
    },

    /// Merge every N .txt files of one folder into a single document
    MergeBatch {
        /// Input folder (scanned non-recursively)
        #[arg(value_name = "DIR")]
        input: PathBuf,

        /// Output folder (defaults to merged_output inside the input folder)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Number of files per merged document (defaults to the configured value)
        #[arg(short, long, value_name = "N", value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
        batch_size: Option<usize>,

        /// Sort order applied before grouping
        #[arg(long, value_enum, default_value = "natural")]
        sort: SortMode,

        /// Where each entry's title comes from
        #[arg(long, value_enum, default_value = "filename")]
        title: TitleSource,

        /// Insert the title even when the body already starts with it
        #[arg(long)]
        keep_duplicate_title: bool,

        /// Blank lines inserted between entries (defaults to the configured value)
        #[arg(long, value_name = "N")]
        blank_lines: Option<usize>,

        /// Separator line inserted after each entry
        #[arg(long, value_name = "LINE")]
        separator: Option<String>,

        /// Concurrent file reads (defaults to available parallelism)
        #[arg(short, long, value_name = "COUNT")]
        workers: Option<usize>,

        /// Overwrite existing output files instead of adding a numeric suffix
        #[arg(long)]
        overwrite: bool,

        /// Output encoding
        #[arg(long, value_enum, default_value = "utf8")]
        encoding: OutputEncoding,
    },

    /// Export per-episode descriptions of a video collection to .txt files
    FetchDescriptions {
        /// URL of any episode in the collection, or a bare BV id
        #[arg(value_name = "URL_OR_BVID")]
        video: String,

        /// Output folder
        #[arg(short, long, value_name = "DIR", default_value = "bili_desc_txt")]
        output: PathBuf,

        /// Cookie header (e.g. containing SESSDATA) for rate-limited collections
        #[arg(long, env = "EPKIT_BILI_COOKIE")]
        cookie: Option<String>,

        /// Overwrite existing files instead of adding a numeric suffix
        #[arg(long)]
        overwrite: bool,
    },

    /// Transcribe local media files through the configured speech-to-text API
    Transcribe {
        /// Media files to transcribe
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Output folder for transcripts
        #[arg(short, long, value_name = "DIR", default_value = "transcription_results")]
        output: PathBuf,

        /// Concurrent transcription jobs (defaults to the configured value)
        #[arg(short, long, value_name = "COUNT")]
        workers: Option<usize>,
    },

    /// Rewrite the header row of every .xlsx workbook in a folder
    RenameHeaders {
        /// Folder containing .xlsx workbooks
        #[arg(value_name = "DIR")]
        input: PathBuf,

        /// Target column names, comma- or semicolon-separated
        #[arg(short = 'c', long, value_name = "NAMES", required = true)]
        columns: String,

        /// Output folder (defaults to renamed_headers inside the input folder)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Rewrite every worksheet instead of only the first
        #[arg(long, conflicts_with = "sheets")]
        all_sheets: bool,

        /// Rewrite only these worksheets (names, case-insensitive)
        #[arg(long, value_name = "NAMES")]
        sheets: Option<String>,

        /// How the target names are applied to the existing header row
        #[arg(long, value_enum, default_value = "cover-existing")]
        mode: HeaderWriteMode,

        /// Suffix appended to each output filename stem
        #[arg(long, value_name = "TEXT", default_value = "_renamed")]
        suffix: String,

        /// Recurse into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Concurrent workbook jobs (defaults to available parallelism)
        #[arg(short, long, value_name = "COUNT")]
        workers: Option<usize>,
    },

    /// Merge every .xlsx workbook of a folder into one output workbook
    MergeSheets {
        /// Folder containing .xlsx workbooks
        #[arg(value_name = "DIR")]
        input: PathBuf,

        /// Output workbook (defaults to merged.xlsx inside the input folder)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Merge same-named worksheets separately instead of one stacked table
        #[arg(long)]
        by_sheet: bool,

        /// Keep only columns present in every sheet instead of their union
        #[arg(long)]
        intersect_columns: bool,

        /// Skip the source_file / source_sheet provenance columns
        #[arg(long)]
        no_source_columns: bool,

        /// Keep rows whose cells are all empty
        #[arg(long)]
        keep_empty_rows: bool,

        /// Drop duplicate rows sharing these key columns (comma-separated)
        #[arg(long, value_name = "NAMES")]
        dedup_on: Option<String>,

        /// Recurse into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Concurrent workbook reads (defaults to available parallelism)
        #[arg(short, long, value_name = "COUNT")]
        workers: Option<usize>,
    },

    /// Show or initialize configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

/// Which side of a matched pair leads the merged document.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOrder {
    /// Text from the first folder comes first
    LeftFirst,
    /// Text from the second folder comes first
    RightFirst,
}

/// Sort applied to batch inputs before grouping.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortMode {
    /// Numeric-aware ordering of filename segments (file2 before file10)
    Natural,
    /// Case-insensitive lexical ordering
    Lexical,
    /// Filesystem modification time, oldest first
    Mtime,
}

/// Where a batch entry's title is taken from.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TitleSource {
    /// The filename stem
    Filename,
    /// The first non-blank line of the file's content
    FirstLine,
}

/// How target column names are applied over an existing header row.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderWriteMode {
    /// Rename existing columns only; extra target names are ignored
    CoverExisting,
    /// Rename existing columns and blank the ones past the target list
    CoverAndBlank,
    /// Write the full target list, extending the header row if needed
    ForceTarget,
}

/// Encoding of merged output documents.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputEncoding {
    /// Plain UTF-8
    Utf8,
    /// UTF-8 with a byte-order mark (Windows Notepad friendly)
    Utf8Bom,
}

impl std::fmt::Display for OutputEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputEncoding::Utf8 => write!(f, "utf8"),
            OutputEncoding::Utf8Bom => write!(f, "utf8-bom"),
        }
    }
}
