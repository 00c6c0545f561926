use futures_util::{stream, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cli::{SortMode, TitleSource};
use crate::index::natural_key;
use crate::progress::{ProgressEvent, ProgressSender};
use crate::scan::list_txt_files;
use crate::textio::{read_text_with_fallback, safe_output_path, write_text, DecodedText};
use crate::Result;

use super::{BatchMergeSpec, BatchMergeSummary};

enum ReadOutcome {
    Done(DecodedText),
    Failed(anyhow::Error),
    Skipped,
}

/// Merges consecutive fixed-size groups of a sorted folder into one document
/// per group. Reads overlap on a bounded worker pool; each worker returns its
/// result to the coordinator, which is the only writer of the shared state.
pub struct BatchMerger {
    spec: BatchMergeSpec,
    cancel: Arc<AtomicBool>,
}

impl BatchMerger {
    pub fn new(spec: BatchMergeSpec) -> Self {
        Self {
            spec,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative cancellation flag, checked between units of work.
    /// In-flight reads finish and partial results are kept as-is.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub async fn run(
        &self,
        input_dir: &Path,
        out_dir: &Path,
        progress: &ProgressSender,
    ) -> Result<BatchMergeSummary> {
        anyhow::ensure!(self.spec.batch_size > 0, "batch size must be at least 1");

        let files = self.list_sorted(input_dir)?;
        if files.is_empty() {
            tracing::info!("no .txt files found in {}", input_dir.display());
            return Ok(BatchMergeSummary::empty());
        }
        fs_err::create_dir_all(out_dir)?;

        let total = files.len();
        let num_groups = total.div_ceil(self.spec.batch_size);
        tracing::info!("{} files -> {} groups of up to {}", total, num_groups, self.spec.batch_size);

        // One progress unit per read plus one per group.
        let _ = progress.send(ProgressEvent::Begin {
            total: (total + num_groups) as u64,
        });

        let (contents, read_failures) = self.read_all(&files, progress).await;

        let mut summary = BatchMergeSummary {
            files_found: total,
            read_failures,
            ..BatchMergeSummary::empty()
        };

        for (gi, group) in files.chunks(self.spec.batch_size).enumerate() {
            if self.cancel.load(Ordering::Relaxed) {
                tracing::info!("cancelled before group {}", gi + 1);
                break;
            }

            let entries: Vec<(&PathBuf, &str)> = group
                .iter()
                .filter_map(|p| contents.get(p).map(|text| (p, text.as_str())))
                .collect();

            // A group emptied by read failures is skipped but still advances
            // the progress counter.
            if entries.is_empty() {
                summary.groups_skipped += 1;
                let _ = progress.send(ProgressEvent::Advance { units: 1 });
                continue;
            }

            let start = gi * self.spec.batch_size + 1;
            let end = gi * self.spec.batch_size + entries.len();
            let out_name = format!("group_{:03}_{}-{}.txt", gi + 1, start, end);

            match self.write_group(&entries, out_dir, &out_name) {
                Ok(path) => {
                    summary.groups_written += 1;
                    summary.files_merged += entries.len();
                    let _ = progress.send(ProgressEvent::Log {
                        message: format!(
                            "group {}/{} -> {}",
                            gi + 1,
                            num_groups,
                            path.file_name().unwrap_or_default().to_string_lossy()
                        ),
                    });
                }
                Err(err) => {
                    summary.write_failures += 1;
                    tracing::warn!("failed to write group {}: {:#}", gi + 1, err);
                    let _ = progress.send(ProgressEvent::Warn {
                        message: format!("group {} failed: {:#}", gi + 1, err),
                    });
                }
            }
            let _ = progress.send(ProgressEvent::Advance { units: 1 });
        }

        summary.cancelled = self.cancel.load(Ordering::Relaxed);
        summary.completed_at = chrono::Utc::now();
        Ok(summary)
    }

    fn list_sorted(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = list_txt_files(dir)?;
        match self.spec.sort {
            SortMode::Natural => files.sort_by_key(|p| natural_key(&file_name_of(p))),
            SortMode::Lexical => files.sort_by_key(|p| file_name_of(p).to_lowercase()),
            SortMode::Mtime => {
                files.sort_by_key(|p| fs_err::metadata(p).and_then(|m| m.modified()).ok())
            }
        }
        Ok(files)
    }

    /// Read every file through the encoding fallback chain on a bounded pool.
    /// Workers return their outcome; only this coordinator touches the map.
    async fn read_all(
        &self,
        files: &[PathBuf],
        progress: &ProgressSender,
    ) -> (HashMap<PathBuf, String>, usize) {
        let cancel = Arc::clone(&self.cancel);

        let mut reads = stream::iter(files.iter().cloned().map(|path| {
            let cancel = Arc::clone(&cancel);
            async move {
                // No new units once cancellation is requested.
                if cancel.load(Ordering::Relaxed) {
                    return (path, ReadOutcome::Skipped);
                }
                let read_path = path.clone();
                match tokio::task::spawn_blocking(move || read_text_with_fallback(&read_path))
                    .await
                {
                    Ok(Ok(decoded)) => (path, ReadOutcome::Done(decoded)),
                    Ok(Err(err)) => (path, ReadOutcome::Failed(err)),
                    Err(join_err) => (path, ReadOutcome::Failed(join_err.into())),
                }
            }
        }))
        .buffer_unordered(self.spec.workers.max(1));

        let mut contents = HashMap::new();
        let mut failures = 0usize;

        while let Some((path, outcome)) = reads.next().await {
            let _ = progress.send(ProgressEvent::Advance { units: 1 });
            match outcome {
                ReadOutcome::Done(decoded) => {
                    if decoded.lossy {
                        tracing::warn!(
                            "{} decoded lossily after exhausting the encoding chain",
                            path.display()
                        );
                    } else {
                        tracing::debug!("{} decoded as {}", path.display(), decoded.encoding);
                    }
                    contents.insert(path, decoded.text);
                }
                ReadOutcome::Failed(err) => {
                    failures += 1;
                    tracing::warn!("failed to read {}: {:#}", path.display(), err);
                    let _ = progress.send(ProgressEvent::Warn {
                        message: format!("read failed: {}", path.display()),
                    });
                }
                ReadOutcome::Skipped => {}
            }
        }

        (contents, failures)
    }

    fn write_group(
        &self,
        entries: &[(&PathBuf, &str)],
        out_dir: &Path,
        out_name: &str,
    ) -> Result<PathBuf> {
        let text = self.build_group_text(entries);
        let out_path = safe_output_path(out_dir, out_name, self.spec.overwrite)?;
        write_text(&out_path, &text, self.spec.encoding)?;
        Ok(out_path)
    }

    /// Build one group document: per entry a title line (suppressed when the
    /// body already starts with it), the body, an optional separator line,
    /// and the configured run of blank lines.
    pub fn build_group_text(&self, entries: &[(&PathBuf, &str)]) -> String {
        let mut parts: Vec<String> = Vec::new();

        for (path, body) in entries {
            let title = self.derive_title(path, body);
            let first_line = body
                .trim_start_matches('\u{feff}')
                .trim_start()
                .lines()
                .next()
                .unwrap_or("")
                .trim_end();
            let body_has_title = !title.is_empty() && first_line == title;

            let mut entry = String::new();
            if !(self.spec.dedupe_title && body_has_title) {
                entry.push_str(&title);
                entry.push('\n');
            }
            entry.push_str(body.trim_end());
            entry.push('\n');
            parts.push(entry);

            if let Some(sep) = &self.spec.separator {
                if !sep.trim().is_empty() {
                    parts.push(format!("{}\n", sep.trim_end()));
                }
            }
            parts.push("\n".repeat(self.spec.blank_lines));
        }

        // Trim the tail so the document does not end in a run of blank lines.
        format!("{}\n", parts.concat().trim_end())
    }

    fn derive_title(&self, path: &Path, body: &str) -> String {
        match self.spec.title {
            TitleSource::Filename => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            TitleSource::FirstLine => body
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| {
                    path.file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default()
                }),
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
