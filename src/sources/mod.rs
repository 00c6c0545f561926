use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::Result;

pub mod bilibili;
pub mod sheets;
pub mod speech;

pub use bilibili::BilibiliSource;
pub use sheets::XlsxStore;
pub use speech::SpeechApiClient;

/// One episode's exported title and description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeDescription {
    /// Position within the collection, 1-based; becomes the 【P<n>】 token.
    pub page: u32,
    pub title: String,
    /// May be empty; an episode with no description still gets a file.
    pub description: String,
}

/// Per-episode title/description provider keyed by an opaque video id.
#[async_trait]
pub trait DescriptionSource: Send + Sync {
    /// Resolve `id` (a URL or platform-native id) to the ordered episodes of
    /// its collection.
    async fn fetch_collection(&self, id: &str) -> Result<Vec<EpisodeDescription>>;

    fn source_name(&self) -> &'static str;
}

/// Speech-to-text provider: media path in, transcript text out.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn transcribe(&self, media: &Path) -> Result<String>;

    fn source_name(&self) -> &'static str;
}

/// One named worksheet as rows of cell text. The first row is the header
/// for header-aware operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

/// Spreadsheet read/write layer: ordered rows in, rows out. The binary
/// format behind it stays opaque to the operations built on top.
pub trait SheetStore: Send + Sync {
    fn read_sheets(&self, path: &Path) -> Result<Vec<Sheet>>;

    fn write_sheets(&self, path: &Path, sheets: &[Sheet]) -> Result<()>;
}
