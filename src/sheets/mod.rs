use futures_util::{stream, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::HeaderWriteMode;
use crate::merge::default_workers;
use crate::progress::{ProgressEvent, ProgressSender};
use crate::sources::sheets::list_xlsx_files;
use crate::sources::{Sheet, SheetStore};
use crate::{Result, ToolkitError};

/// Hard Excel worksheet row cap (header included); merged output splits
/// into numbered sheets beyond it.
pub const SHEET_MAX_ROWS: usize = 1_048_576;

const SHEET_NAME_MAX: usize = 31;

/// Which worksheets of a workbook an operation touches.
#[derive(Debug, Clone)]
pub enum SheetSelection {
    First,
    All,
    Named(Vec<String>),
}

impl SheetSelection {
    fn matches(&self, name: &str, position: usize) -> bool {
        match self {
            SheetSelection::First => position == 0,
            SheetSelection::All => true,
            SheetSelection::Named(names) => {
                let wanted = name.to_lowercase();
                names.iter().any(|n| n.to_lowercase() == wanted)
            }
        }
    }
}

/// Split user-supplied column or sheet names on commas (ASCII or
/// fullwidth), semicolons, or newlines.
pub fn parse_name_list(input: &str) -> Vec<String> {
    input
        .split(|c| matches!(c, ',' | '，' | ';' | '；' | '\n' | '\r'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Width of a row with trailing blank cells trimmed.
fn used_width(row: &[String]) -> usize {
    row.iter()
        .rposition(|cell| !cell.trim().is_empty())
        .map_or(0, |i| i + 1)
}

/// Overwrite a sheet's first row with the target headers per `mode`.
fn rewrite_header(sheet: &mut Sheet, headers: &[String], mode: HeaderWriteMode) {
    let width = sheet.rows.first().map(|row| used_width(row)).unwrap_or(0);
    let target = match mode {
        HeaderWriteMode::CoverExisting => width.min(headers.len()),
        HeaderWriteMode::CoverAndBlank => width,
        HeaderWriteMode::ForceTarget => headers.len(),
    };
    if target == 0 {
        return;
    }

    if sheet.rows.is_empty() {
        sheet.rows.push(Vec::new());
    }
    let row = &mut sheet.rows[0];
    if row.len() < target {
        row.resize(target, String::new());
    }
    for (i, cell) in row.iter_mut().take(target).enumerate() {
        *cell = headers.get(i).cloned().unwrap_or_default();
    }
}

/// Options for the header rewrite pass.
#[derive(Debug, Clone)]
pub struct RenameSpec {
    pub headers: Vec<String>,
    pub selection: SheetSelection,
    pub mode: HeaderWriteMode,
    pub recursive: bool,
    /// Appended to each output filename stem
    pub suffix: String,
    pub workers: usize,
}

impl Default for RenameSpec {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            selection: SheetSelection::First,
            mode: HeaderWriteMode::CoverExisting,
            recursive: false,
            suffix: "_renamed".to_string(),
            workers: default_workers(),
        }
    }
}

/// Final counts of a header rewrite run.
#[derive(Debug, Clone, Serialize)]
pub struct RenameSummary {
    pub files_ok: usize,
    pub files_failed: usize,
    pub sheets_renamed: usize,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

/// Rewrites the header row of every workbook in a folder. Workbooks are
/// processed on a bounded pool; a failed workbook is counted and the run
/// continues.
pub struct HeaderRenamer {
    spec: RenameSpec,
    store: Arc<dyn SheetStore>,
}

impl HeaderRenamer {
    pub fn new(spec: RenameSpec, store: Arc<dyn SheetStore>) -> Self {
        Self { spec, store }
    }

    pub async fn run(
        &self,
        input_dir: &Path,
        out_dir: &Path,
        progress: &ProgressSender,
    ) -> Result<RenameSummary> {
        anyhow::ensure!(
            !self.spec.headers.is_empty(),
            "at least one target column name is required"
        );

        let mut summary = RenameSummary {
            files_ok: 0,
            files_failed: 0,
            sheets_renamed: 0,
            completed_at: chrono::Utc::now(),
        };

        let files = list_xlsx_files(input_dir, self.spec.recursive)?;
        if files.is_empty() {
            tracing::info!("no .xlsx files found in {}", input_dir.display());
            return Ok(summary);
        }
        fs_err::create_dir_all(out_dir)?;

        let _ = progress.send(ProgressEvent::Begin {
            total: files.len() as u64,
        });

        let mut jobs = stream::iter(files.into_iter().map(|path| {
            let store = Arc::clone(&self.store);
            let spec = self.spec.clone();
            let out_dir = out_dir.to_path_buf();
            async move {
                let report_path = path.clone();
                let outcome =
                    tokio::task::spawn_blocking(move || rename_one(&*store, &spec, &path, &out_dir))
                        .await
                        .map_err(anyhow::Error::from)
                        .and_then(|result| result);
                (report_path, outcome)
            }
        }))
        .buffer_unordered(self.spec.workers.max(1));

        while let Some((path, outcome)) = jobs.next().await {
            match outcome {
                Ok((out_path, renamed)) => {
                    summary.files_ok += 1;
                    summary.sheets_renamed += renamed;
                    let _ = progress.send(ProgressEvent::Log {
                        message: format!(
                            "{} -> {} ({} sheet(s))",
                            path.display(),
                            out_path.file_name().unwrap_or_default().to_string_lossy(),
                            renamed
                        ),
                    });
                }
                Err(err) => {
                    summary.files_failed += 1;
                    tracing::warn!("header rewrite failed for {}: {:#}", path.display(), err);
                    let _ = progress.send(ProgressEvent::Warn {
                        message: format!("{} failed: {:#}", path.display(), err),
                    });
                }
            }
            let _ = progress.send(ProgressEvent::Advance { units: 1 });
        }

        summary.completed_at = chrono::Utc::now();
        Ok(summary)
    }
}

fn rename_one(
    store: &dyn SheetStore,
    spec: &RenameSpec,
    path: &Path,
    out_dir: &Path,
) -> Result<(PathBuf, usize)> {
    let mut sheets = store.read_sheets(path)?;

    let mut renamed = 0;
    for (position, sheet) in sheets.iter_mut().enumerate() {
        if spec.selection.matches(&sheet.name, position) {
            rewrite_header(sheet, &spec.headers, spec.mode);
            renamed += 1;
        }
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workbook".to_string());
    let out_path = out_dir.join(format!("{}{}.xlsx", stem, spec.suffix));
    store.write_sheets(&out_path, &sheets)?;
    Ok((out_path, renamed))
}

/// Options for merging a folder of workbooks into one output workbook.
#[derive(Debug, Clone)]
pub struct SheetMergeSpec {
    /// Merge same-named worksheets separately instead of one stacked table
    pub by_sheet: bool,

    pub recursive: bool,

    /// Prepend source_file / source_sheet provenance columns
    pub source_columns: bool,

    /// Drop rows whose cells are all empty
    pub drop_empty_rows: bool,

    /// Keep only columns present in every sheet instead of the union
    pub intersect_columns: bool,

    /// Drop duplicate rows sharing these key columns
    pub dedup_keys: Vec<String>,

    /// Bounded width of the concurrent read pool
    pub workers: usize,

    /// Row cap per output sheet, header included
    pub max_rows_per_sheet: usize,
}

impl Default for SheetMergeSpec {
    fn default() -> Self {
        Self {
            by_sheet: false,
            recursive: false,
            source_columns: true,
            drop_empty_rows: true,
            intersect_columns: false,
            dedup_keys: Vec::new(),
            workers: default_workers(),
            max_rows_per_sheet: SHEET_MAX_ROWS,
        }
    }
}

/// Final counts of a workbook merge run.
#[derive(Debug, Clone, Serialize)]
pub struct SheetMergeSummary {
    pub files_found: usize,
    pub files_read: usize,
    pub read_failures: usize,
    pub sheets_written: usize,
    pub rows_written: usize,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

impl SheetMergeSummary {
    fn empty() -> Self {
        Self {
            files_found: 0,
            files_read: 0,
            read_failures: 0,
            sheets_written: 0,
            rows_written: 0,
            completed_at: chrono::Utc::now(),
        }
    }
}

/// One normalized sheet: a deduplicated header plus rows padded to it.
#[derive(Debug, Clone)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Stacks every workbook of a folder into one output workbook. Reads
/// overlap on a bounded pool; a failed workbook is counted and the rest
/// of the run continues.
pub struct SheetMerger {
    spec: SheetMergeSpec,
    store: Arc<dyn SheetStore>,
}

impl SheetMerger {
    pub fn new(spec: SheetMergeSpec, store: Arc<dyn SheetStore>) -> Self {
        Self { spec, store }
    }

    pub async fn run(
        &self,
        input_dir: &Path,
        out_file: &Path,
        progress: &ProgressSender,
    ) -> Result<SheetMergeSummary> {
        let mut files = list_xlsx_files(input_dir, self.spec.recursive)?;
        // The output must never feed itself back in.
        files.retain(|f| f != out_file);
        if files.is_empty() {
            tracing::info!("no .xlsx files found in {}", input_dir.display());
            return Ok(SheetMergeSummary::empty());
        }

        // One progress unit per read plus one for the final write.
        let _ = progress.send(ProgressEvent::Begin {
            total: files.len() as u64 + 1,
        });

        let (books, read_failures) = self.read_all(&files, progress).await;

        let mut summary = SheetMergeSummary {
            files_found: files.len(),
            files_read: books.len(),
            read_failures,
            ..SheetMergeSummary::empty()
        };

        // Flatten in sorted file order so stacking is deterministic.
        let mut tables: Vec<(String, Table)> = Vec::new();
        for path in &files {
            let Some(sheets) = books.get(path) else { continue };
            let source = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            for sheet in sheets {
                if let Some(table) = self.normalize(sheet, &source) {
                    tables.push((sheet.name.clone(), table));
                }
            }
        }

        if tables.is_empty() {
            tracing::warn!("no rows read from {}; nothing to merge", input_dir.display());
            return Ok(summary);
        }

        let out_sheets = self.build_output(tables)?;
        summary.sheets_written = out_sheets.len();
        summary.rows_written = out_sheets
            .iter()
            .map(|s| s.rows.len().saturating_sub(1))
            .sum();

        if let Some(parent) = out_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs_err::create_dir_all(parent)?;
            }
        }
        self.store.write_sheets(out_file, &out_sheets)?;
        let _ = progress.send(ProgressEvent::Advance { units: 1 });
        let _ = progress.send(ProgressEvent::Log {
            message: format!(
                "{} sheet(s), {} row(s) -> {}",
                summary.sheets_written,
                summary.rows_written,
                out_file.display()
            ),
        });

        summary.completed_at = chrono::Utc::now();
        Ok(summary)
    }

    /// Read every workbook on a bounded pool; only this coordinator
    /// touches the map.
    async fn read_all(
        &self,
        files: &[PathBuf],
        progress: &ProgressSender,
    ) -> (HashMap<PathBuf, Vec<Sheet>>, usize) {
        let mut reads = stream::iter(files.iter().cloned().map(|path| {
            let store = Arc::clone(&self.store);
            async move {
                let read_path = path.clone();
                let outcome = tokio::task::spawn_blocking(move || store.read_sheets(&read_path))
                    .await
                    .map_err(anyhow::Error::from)
                    .and_then(|result| result);
                (path, outcome)
            }
        }))
        .buffer_unordered(self.spec.workers.max(1));

        let mut books = HashMap::new();
        let mut failures = 0usize;

        while let Some((path, outcome)) = reads.next().await {
            let _ = progress.send(ProgressEvent::Advance { units: 1 });
            match outcome {
                Ok(sheets) => {
                    tracing::debug!("{}: {} sheet(s)", path.display(), sheets.len());
                    books.insert(path, sheets);
                }
                Err(err) => {
                    failures += 1;
                    tracing::warn!("failed to read {}: {:#}", path.display(), err);
                    let _ = progress.send(ProgressEvent::Warn {
                        message: format!("read failed: {}", path.display()),
                    });
                }
            }
        }

        (books, failures)
    }

    /// Turn one sheet into a header + rows table: duplicate column names
    /// deduped, short rows padded, all-empty rows dropped, provenance
    /// columns prepended. A sheet without a header row yields nothing.
    fn normalize(&self, sheet: &Sheet, source_file: &str) -> Option<Table> {
        let mut rows_iter = sheet.rows.iter();
        let header = rows_iter.next()?;

        let mut columns = make_unique_columns(header);
        let mut rows: Vec<Vec<String>> = Vec::new();
        for row in rows_iter {
            if self.spec.drop_empty_rows && row.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            let mut cells = row.clone();
            cells.resize(columns.len(), String::new());
            cells.truncate(columns.len());
            rows.push(cells);
        }

        if self.spec.source_columns {
            columns.insert(0, "source_file".to_string());
            columns.insert(1, "source_sheet".to_string());
            for row in &mut rows {
                row.insert(0, source_file.to_string());
                row.insert(1, sheet.name.clone());
            }
        }

        Some(Table { columns, rows })
    }

    fn build_output(&self, tables: Vec<(String, Table)>) -> Result<Vec<Sheet>> {
        let data_cap = self.spec.max_rows_per_sheet.saturating_sub(1).max(1);
        let mut used = HashSet::new();
        let mut out = Vec::new();

        if self.spec.by_sheet {
            // Group by worksheet name, preserving first-seen order.
            let mut order: Vec<String> = Vec::new();
            let mut groups: HashMap<String, Vec<Table>> = HashMap::new();
            for (name, table) in tables {
                if !groups.contains_key(&name) {
                    order.push(name.clone());
                }
                groups.entry(name).or_default().push(table);
            }

            for name in order {
                let mut merged = merge_tables(&groups[&name], self.spec.intersect_columns);
                dedup_rows(&mut merged, &self.spec.dedup_keys);

                let chunks: Vec<&[Vec<String>]> = merged.rows.chunks(data_cap).collect();
                let single = chunks.len() == 1;
                for (i, chunk) in chunks.into_iter().enumerate() {
                    let suffix = if single { String::new() } else { format!("_{}", i + 1) };
                    let title = unique_sheet_name(safe_sheet_title(&name, &suffix), &mut used)?;
                    out.push(sheet_from_table(title, &merged.columns, chunk));
                }
            }
        } else {
            let only: Vec<Table> = tables.into_iter().map(|(_, t)| t).collect();
            let mut merged = merge_tables(&only, self.spec.intersect_columns);
            dedup_rows(&mut merged, &self.spec.dedup_keys);

            let chunks: Vec<&[Vec<String>]> = merged.rows.chunks(data_cap).collect();
            let single = chunks.len() == 1;
            for (i, chunk) in chunks.into_iter().enumerate() {
                let name = if single {
                    "merged".to_string()
                } else {
                    format!("merged_{}", i + 1)
                };
                let title = unique_sheet_name(name, &mut used)?;
                out.push(sheet_from_table(title, &merged.columns, chunk));
            }
        }

        Ok(out)
    }
}

/// Deduplicate column names with `_1`/`_2` suffixes, trimming whitespace.
pub fn make_unique_columns(names: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    names
        .iter()
        .map(|raw| {
            let name = raw.trim().to_string();
            let count = seen.entry(name.clone()).or_insert(0);
            let unique = if *count == 0 {
                name.clone()
            } else {
                format!("{}_{}", name, count)
            };
            *count += 1;
            unique
        })
        .collect()
}

/// Stack tables: the ordered union of columns (or their intersection in
/// first-table order), each row remapped with blanks for absent columns.
fn merge_tables(tables: &[Table], intersect: bool) -> Table {
    let Some((first, rest)) = tables.split_first() else {
        return Table {
            columns: Vec::new(),
            rows: Vec::new(),
        };
    };

    let columns: Vec<String> = if intersect {
        let mut common: HashSet<&String> = first.columns.iter().collect();
        for table in rest {
            let cols: HashSet<&String> = table.columns.iter().collect();
            common.retain(|c| cols.contains(*c));
        }
        first
            .columns
            .iter()
            .filter(|c| common.contains(c))
            .cloned()
            .collect()
    } else {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for table in tables {
            for col in &table.columns {
                if seen.insert(col.clone()) {
                    columns.push(col.clone());
                }
            }
        }
        columns
    };

    let mut rows = Vec::new();
    for table in tables {
        let position: HashMap<&String, usize> = table
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c, i))
            .collect();
        for row in &table.rows {
            rows.push(
                columns
                    .iter()
                    .map(|col| {
                        position
                            .get(col)
                            .and_then(|&i| row.get(i))
                            .cloned()
                            .unwrap_or_default()
                    })
                    .collect(),
            );
        }
    }

    Table { columns, rows }
}

/// Keep the first row per distinct key-column tuple. Keys missing from the
/// merged columns are warned about and skipped.
fn dedup_rows(table: &mut Table, keys: &[String]) {
    if keys.is_empty() {
        return;
    }
    let key_idx: Vec<usize> = keys
        .iter()
        .filter_map(|k| table.columns.iter().position(|c| c == k))
        .collect();
    if key_idx.len() < keys.len() {
        let missing: Vec<&String> = keys
            .iter()
            .filter(|k| !table.columns.contains(k))
            .collect();
        tracing::warn!("deduplication keys not found in merged columns: {:?}", missing);
    }
    if key_idx.is_empty() {
        return;
    }

    let mut seen = HashSet::new();
    table.rows.retain(|row| {
        let key = key_idx
            .iter()
            .map(|&i| row.get(i).map(String::as_str).unwrap_or(""))
            .collect::<Vec<_>>()
            .join("\u{1}");
        seen.insert(key)
    });
}

/// Excel sheet names cap at 31 characters and reject a handful of
/// characters; sanitize and truncate, leaving room for `suffix`.
pub fn safe_sheet_title(base: &str, suffix: &str) -> String {
    let mut name: String = base
        .trim()
        .chars()
        .map(|c| match c {
            '\\' | '/' | '?' | '*' | '[' | ']' | ':' => '_',
            c => c,
        })
        .collect();
    if name.is_empty() {
        name = "Sheet".to_string();
    }

    let suffix_len = suffix.chars().count();
    if name.chars().count() + suffix_len > SHEET_NAME_MAX {
        let keep = SHEET_NAME_MAX.saturating_sub(suffix_len).max(1);
        name = name.chars().take(keep).collect();
    }
    format!("{name}{suffix}")
}

/// Sheet names must be unique within a workbook, including after the
/// 31-character truncation collapses distinct names.
fn unique_sheet_name(name: String, used: &mut HashSet<String>) -> Result<String> {
    if used.insert(name.clone()) {
        return Ok(name);
    }
    for i in 2..10_000usize {
        let candidate = safe_sheet_title(&name, &format!("_{i}"));
        if used.insert(candidate.clone()) {
            return Ok(candidate);
        }
    }
    Err(ToolkitError::OutputNameExhausted(name, 10_000).into())
}

fn sheet_from_table(name: String, columns: &[String], rows: &[Vec<String>]) -> Sheet {
    let mut all = Vec::with_capacity(rows.len() + 1);
    all.push(columns.to_vec());
    all.extend(rows.iter().cloned());
    Sheet { name, rows: all }
}
