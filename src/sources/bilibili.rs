use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::BilibiliConfig;
use crate::progress::{ProgressEvent, ProgressSender};
use crate::textio::safe_output_path;
use crate::utils::sanitize_filename;
use crate::{Result, ToolkitError};

use super::{DescriptionSource, EpisodeDescription};

const API_BASE: &str = "https://api.bilibili.com";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";
const PAGE_SIZE: u32 = 30;

fn bvid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(BV[a-zA-Z0-9]+)").expect("BV pattern is valid"))
}

/// Pull a BV id out of a pasted URL, or accept a bare id.
pub fn extract_bvid(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.starts_with("BV") {
        return Ok(trimmed.to_string());
    }
    bvid_pattern()
        .captures(trimmed)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| {
            ToolkitError::DescriptionFetchFailed(format!(
                "no BV id found in '{trimmed}'; paste a video link containing BVxxxx or the bare id"
            ))
            .into()
        })
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ViewData {
    #[serde(default)]
    title: String,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    desc_v2: Option<Vec<DescSegment>>,
    owner: Option<Owner>,
    ugc_season: Option<UgcSeason>,
}

#[derive(Debug, Deserialize)]
struct DescSegment {
    #[serde(default)]
    raw_text: String,
}

#[derive(Debug, Deserialize)]
struct Owner {
    mid: i64,
}

#[derive(Debug, Deserialize)]
struct UgcSeason {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct SeasonArchivesData {
    #[serde(default)]
    archives: Vec<ArchiveItem>,
    page: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
struct ArchiveItem {
    #[serde(default)]
    bvid: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    total: Option<u64>,
}

/// Bilibili description source: resolves a collection from any of its
/// episodes and fetches each episode's own description via the web API.
pub struct BilibiliSource {
    http: reqwest::Client,
    cookie: Option<String>,
    request_delay: Duration,
}

impl BilibiliSource {
    pub fn new(config: &BilibiliConfig, cookie_override: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            cookie: cookie_override.or_else(|| config.cookie.clone()),
            request_delay: Duration::from_millis(config.request_delay_ms),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .get(format!("{API_BASE}{path}"))
            .header("Referer", "https://www.bilibili.com/")
            .header("Origin", "https://www.bilibili.com");
        if let Some(cookie) = &self.cookie {
            request = request.header("Cookie", cookie);
        }
        request
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self.get(path).query(query).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("bilibili API returned HTTP {}", response.status());
        }

        let envelope: ApiEnvelope<T> = response.json().await?;
        if envelope.code != 0 {
            return Err(ToolkitError::DescriptionFetchFailed(format!(
                "{path} failed: code={} msg={}",
                envelope.code, envelope.message
            ))
            .into());
        }
        envelope.data.ok_or_else(|| {
            ToolkitError::DescriptionFetchFailed(format!("{path} returned no data")).into()
        })
    }

    async fn view(&self, bvid: &str) -> Result<ViewData> {
        self.fetch_json(
            "/x/web-interface/view",
            &[("bvid", bvid.to_string())],
        )
        .await
    }

    /// Resolve the collection (mid, season_id) from any episode's view data.
    async fn collection_meta(&self, bvid: &str) -> Result<(i64, i64)> {
        let view = self.view(bvid).await?;
        let season = view.ugc_season.ok_or_else(|| {
            ToolkitError::DescriptionFetchFailed(
                "video is not part of a collection (no ugc_season), or the collection \
needs a login cookie"
                    .to_string(),
            )
        })?;
        let owner = view.owner.ok_or_else(|| {
            ToolkitError::DescriptionFetchFailed("view data has no owner".to_string())
        })?;
        Ok((owner.mid, season.id))
    }

    /// Page through the season archive list, de-duplicating BV ids while
    /// preserving order.
    async fn list_collection(&self, mid: i64, season_id: i64) -> Result<Vec<ArchiveItem>> {
        let mut items: Vec<ArchiveItem> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut page_num = 1u32;
        let mut total: Option<u64> = None;

        loop {
            let data: SeasonArchivesData = self
                .fetch_json(
                    "/x/polymer/web-space/seasons_archives_list",
                    &[
                        ("mid", mid.to_string()),
                        ("season_id", season_id.to_string()),
                        ("page_num", page_num.to_string()),
                        ("page_size", PAGE_SIZE.to_string()),
                        ("sort_reverse", "false".to_string()),
                    ],
                )
                .await?;

            let fetched = data.archives.len();
            for item in data.archives {
                if item.bvid.starts_with("BV") && seen.insert(item.bvid.clone()) {
                    items.push(item);
                }
            }

            if total.is_none() {
                total = data.page.and_then(|p| p.total);
            }
            if let Some(t) = total {
                if items.len() as u64 >= t {
                    break;
                }
            }
            if fetched < PAGE_SIZE as usize {
                break;
            }

            page_num += 1;
            tokio::time::sleep(self.request_delay).await;
        }

        Ok(items)
    }
}

/// Prefer the plain `desc`; fall back to joining the segmented `desc_v2`.
fn description_of(view: &ViewData) -> String {
    if !view.desc.trim().is_empty() {
        return view.desc.clone();
    }
    view.desc_v2
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|seg| seg.raw_text.as_str())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[async_trait]
impl DescriptionSource for BilibiliSource {
    async fn fetch_collection(&self, id: &str) -> Result<Vec<EpisodeDescription>> {
        let bvid = extract_bvid(id)?;
        tracing::info!("resolving collection from {}", bvid);

        let (mid, season_id) = self.collection_meta(&bvid).await?;
        tracing::info!("collection resolved: mid={} season_id={}", mid, season_id);

        let items = self.list_collection(mid, season_id).await?;
        tracing::info!("collection has {} episodes", items.len());

        let mut episodes = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let page = (i + 1) as u32;
            let mut title = if item.title.is_empty() {
                item.bvid.clone()
            } else {
                item.title.clone()
            };
            let mut description = String::new();

            // A failed per-episode fetch still yields an (empty) entry.
            match self.view(&item.bvid).await {
                Ok(view) => {
                    if !view.title.trim().is_empty() {
                        title = view.title.trim().to_string();
                    }
                    description = description_of(&view);
                }
                Err(err) => {
                    tracing::warn!("P{} ({}) fetch failed: {:#}", page, item.bvid, err);
                }
            }

            episodes.push(EpisodeDescription {
                page,
                title,
                description,
            });
            tokio::time::sleep(self.request_delay).await;
        }

        Ok(episodes)
    }

    fn source_name(&self) -> &'static str {
        "Bilibili"
    }
}

/// Counts for one description export run.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub written: usize,
    pub empty: usize,
}

/// Write one `【P<n>】<title>.txt` per episode into `out_dir`.
pub fn export_descriptions(
    episodes: &[EpisodeDescription],
    out_dir: &Path,
    overwrite: bool,
    progress: &ProgressSender,
) -> Result<ExportSummary> {
    let _ = progress.send(ProgressEvent::Begin {
        total: episodes.len() as u64,
    });

    let mut summary = ExportSummary {
        written: 0,
        empty: 0,
    };

    for episode in episodes {
        let path = episode_file_path(episode, out_dir, overwrite)?;
        fs_err::write(&path, episode.description.as_bytes())?;

        if episode.description.is_empty() {
            summary.empty += 1;
        }
        summary.written += 1;

        let _ = progress.send(ProgressEvent::Log {
            message: format!(
                "P{} desc_len={} -> {}",
                episode.page,
                episode.description.chars().count(),
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
        });
        let _ = progress.send(ProgressEvent::Advance { units: 1 });
    }

    Ok(summary)
}

fn episode_file_path(
    episode: &EpisodeDescription,
    out_dir: &Path,
    overwrite: bool,
) -> Result<PathBuf> {
    let name = format!(
        "【P{}】{}.txt",
        episode.page,
        sanitize_filename(&episode.title)
    );
    safe_output_path(out_dir, &name, overwrite)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bvid_from_bare_id() {
        assert_eq!(extract_bvid("BV1xx411c7mD").unwrap(), "BV1xx411c7mD");
        assert_eq!(extract_bvid("  BV1xx411c7mD  ").unwrap(), "BV1xx411c7mD");
    }

    #[test]
    fn test_extract_bvid_from_url() {
        let url = "https://www.bilibili.com/video/BV1xx411c7mD?p=3";
        assert_eq!(extract_bvid(url).unwrap(), "BV1xx411c7mD");
    }

    #[test]
    fn test_extract_bvid_missing() {
        assert!(extract_bvid("https://example.com/video/123").is_err());
        assert!(extract_bvid("").is_err());
    }

    #[test]
    fn test_description_prefers_desc_over_segments() {
        let view = ViewData {
            title: "t".to_string(),
            desc: "plain".to_string(),
            desc_v2: Some(vec![DescSegment {
                raw_text: "segmented".to_string(),
            }]),
            owner: None,
            ugc_season: None,
        };
        assert_eq!(description_of(&view), "plain");
    }

    #[test]
    fn test_description_falls_back_to_segments() {
        let view = ViewData {
            title: "t".to_string(),
            desc: "   ".to_string(),
            desc_v2: Some(vec![
                DescSegment {
                    raw_text: "part one".to_string(),
                },
                DescSegment {
                    raw_text: String::new(),
                },
                DescSegment {
                    raw_text: "part two".to_string(),
                },
            ]),
            owner: None,
            ugc_season: None,
        };
        assert_eq!(description_of(&view), "part one\npart two");
    }

    #[tokio::test]
    async fn test_export_writes_episode_token_names() {
        let out = tempfile::tempdir().unwrap();
        let episodes = vec![
            EpisodeDescription {
                page: 1,
                title: "intro/overview".to_string(),
                description: "hello".to_string(),
            },
            EpisodeDescription {
                page: 2,
                title: "second".to_string(),
                description: String::new(),
            },
        ];

        let (tx, handle) = crate::progress::spawn_renderer(true);
        let summary = export_descriptions(&episodes, out.path(), false, &tx).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(summary.written, 2);
        assert_eq!(summary.empty, 1);
        assert!(out.path().join("【P1】intro_overview.txt").exists());
        assert!(out.path().join("【P2】second.txt").exists());

        // Round trip: the exported names scan back to the same indices.
        let scan = crate::scan::scan_txt_folder(out.path(), false).unwrap();
        assert_eq!(scan.indices(), vec![1, 2]);
    }
}
