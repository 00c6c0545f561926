use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::SpeechConfig;
use crate::progress::{ProgressEvent, ProgressSender};
use crate::textio::safe_output_path;
use crate::{Result, ToolkitError};

use super::TranscriptSource;

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for an OpenAI-compatible `/audio/transcriptions` endpoint.
pub struct SpeechApiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl SpeechApiClient {
    pub fn new(config: &SpeechConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                ToolkitError::TranscriptionFailed(
                    "no API key: set speech.api_key in the config or the OPENAI_API_KEY \
environment variable"
                        .to_string(),
                )
            })?;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    fn guess_mime(path: &Path) -> &'static str {
        match path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .as_deref()
        {
            Some("mp3") => "audio/mpeg",
            Some("m4a") | Some("aac") => "audio/mp4",
            Some("wav") => "audio/wav",
            Some("flac") => "audio/flac",
            Some("ogg") => "audio/ogg",
            Some("webm") => "audio/webm",
            Some("mp4") => "video/mp4",
            Some("mov") => "video/quicktime",
            Some("avi") => "video/x-msvideo",
            _ => "application/octet-stream",
        }
    }
}

#[async_trait]
impl TranscriptSource for SpeechApiClient {
    async fn transcribe(&self, media: &Path) -> Result<String> {
        let file_name = media
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());
        let bytes = fs_err::read(media)?;

        tracing::debug!(
            "uploading {} ({}) for transcription",
            file_name,
            crate::utils::format_file_size(bytes.len() as u64)
        );

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(Self::guess_mime(media))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ToolkitError::TranscriptionFailed(format!(
                "HTTP {status}: {body}"
            ))
            .into());
        }

        let parsed: TranscriptionResponse = response.json().await?;
        Ok(parsed.text)
    }

    fn source_name(&self) -> &'static str {
        "OpenAI-compatible speech API"
    }
}

/// Counts for one transcription batch.
#[derive(Debug, Clone)]
pub struct TranscribeSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Transcribe `files` on a bounded worker pool, writing `<stem>.txt` per
/// input into `out_dir`. Per-file failures are counted and logged; the batch
/// continues.
pub async fn transcribe_files(
    source: Arc<dyn TranscriptSource>,
    files: &[PathBuf],
    out_dir: &Path,
    workers: usize,
    progress: &ProgressSender,
) -> Result<TranscribeSummary> {
    fs_err::create_dir_all(out_dir)?;
    let _ = progress.send(ProgressEvent::Begin {
        total: files.len() as u64,
    });

    let started = std::time::Instant::now();
    let mut jobs = stream::iter(files.iter().cloned().map(|path| {
        let source = Arc::clone(&source);
        async move {
            let result = source.transcribe(&path).await;
            (path, result)
        }
    }))
    .buffer_unordered(workers.max(1));

    let mut summary = TranscribeSummary {
        succeeded: 0,
        failed: 0,
    };

    while let Some((path, result)) = jobs.next().await {
        match result.and_then(|text| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "transcript".to_string());
            let out_path = safe_output_path(out_dir, &format!("{stem}.txt"), false)?;
            fs_err::write(&out_path, text.as_bytes())?;
            Ok(out_path)
        }) {
            Ok(out_path) => {
                summary.succeeded += 1;
                let _ = progress.send(ProgressEvent::Log {
                    message: format!(
                        "{} -> {}",
                        path.display(),
                        out_path.file_name().unwrap_or_default().to_string_lossy()
                    ),
                });
            }
            Err(err) => {
                summary.failed += 1;
                tracing::warn!("transcription failed for {}: {:#}", path.display(), err);
                let _ = progress.send(ProgressEvent::Warn {
                    message: format!("{} failed: {:#}", path.display(), err),
                });
            }
        }
        let _ = progress.send(ProgressEvent::Advance { units: 1 });
    }

    tracing::info!(
        "transcription batch finished in {}",
        crate::utils::format_duration(started.elapsed().as_secs_f64())
    );
    Ok(summary)
}
