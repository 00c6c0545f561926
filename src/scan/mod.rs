use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::index::extract_index;
use crate::{Result, ToolkitError};

/// A text file together with the episode index parsed from its filename.
#[derive(Debug, Clone)]
pub struct IndexedFile {
    pub path: PathBuf,
    pub index: Option<u32>,
    /// Length of the filename stem in characters, the primary completeness key.
    pub stem_len: usize,
    pub size: u64,
}

impl IndexedFile {
    pub fn from_path(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem_len = path
            .file_stem()
            .map(|s| s.to_string_lossy().chars().count())
            .unwrap_or(0);
        let size = fs_err::metadata(&path).map(|m| m.len()).unwrap_or(0);

        Self {
            index: extract_index(&name),
            path,
            stem_len,
            size,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Result of scanning one folder. Computed fresh per invocation and never
/// persisted; every key of `mapping` was parsed from at least one filename
/// and `no_index` holds exactly the files whose extraction failed.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub mapping: BTreeMap<u32, Vec<IndexedFile>>,
    pub no_index: Vec<IndexedFile>,
}

impl ScanResult {
    /// Indices mapped to more than one file.
    pub fn duplicates(&self) -> BTreeMap<u32, &[IndexedFile]> {
        self.mapping
            .iter()
            .filter(|(_, files)| files.len() > 1)
            .map(|(idx, files)| (*idx, files.as_slice()))
            .collect()
    }

    pub fn indices(&self) -> Vec<u32> {
        self.mapping.keys().copied().collect()
    }

    pub fn file_count(&self) -> usize {
        self.mapping.values().map(Vec::len).sum::<usize>() + self.no_index.len()
    }
}

pub fn is_txt(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("txt"))
        .unwrap_or(false)
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(ToolkitError::MissingDirectory(dir.display().to_string()).into());
    }
    Ok(())
}

/// Enumerate `.txt` files in `dir`, optionally recursing, and group them by
/// extracted episode index. Only regular files are considered; directories
/// picked up during recursion are skipped. Zero matches is an empty result.
pub fn scan_txt_folder(dir: &Path, recursive: bool) -> Result<ScanResult> {
    ensure_dir(dir)?;

    let mut files = Vec::new();
    if recursive {
        for entry in WalkDir::new(dir) {
            let entry = entry?;
            if entry.file_type().is_file() && is_txt(entry.path()) {
                files.push(entry.into_path());
            }
        }
    } else {
        for entry in fs_err::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() && is_txt(&path) {
                files.push(path);
            }
        }
    }

    let mut result = ScanResult::default();
    for path in files {
        let file = IndexedFile::from_path(path);
        match file.index {
            Some(idx) => result.mapping.entry(idx).or_default().push(file),
            None => result.no_index.push(file),
        }
    }

    Ok(result)
}

/// List `.txt` files in `dir` without recursing, in directory order. The
/// batch merger applies its own sort afterwards.
pub fn list_txt_files(dir: &Path) -> Result<Vec<PathBuf>> {
    ensure_dir(dir)?;

    let mut files = Vec::new();
    for entry in fs_err::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && is_txt(&path) {
            files.push(path);
        }
    }
    Ok(files)
}

/// Pick the "most complete" file among duplicates sharing one index: the
/// longest filename stem wins, ties go to the larger file, and remaining
/// ties to the lexically smaller path so selection is fully deterministic.
pub fn choose_most_complete(files: &[IndexedFile]) -> Option<&IndexedFile> {
    files.iter().max_by(|a, b| {
        a.stem_len
            .cmp(&b.stem_len)
            .then(a.size.cmp(&b.size))
            .then_with(|| b.path.cmp(&a.path))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, stem_len: usize, size: u64) -> IndexedFile {
        IndexedFile {
            path: PathBuf::from(path),
            index: extract_index(path),
            stem_len,
            size,
        }
    }

    #[test]
    fn test_longer_stem_wins_regardless_of_size() {
        let files = vec![
            file("P3.txt", 2, 9_999),
            file("P3_full_report.txt", 14, 10),
        ];
        let chosen = choose_most_complete(&files).unwrap();
        assert_eq!(chosen.path, PathBuf::from("P3_full_report.txt"));
    }

    #[test]
    fn test_size_breaks_stem_tie() {
        let files = vec![file("aaaa.txt", 4, 10), file("bbbb.txt", 4, 20)];
        let chosen = choose_most_complete(&files).unwrap();
        assert_eq!(chosen.path, PathBuf::from("bbbb.txt"));
    }

    #[test]
    fn test_path_breaks_full_tie() {
        let files = vec![file("bbbb.txt", 4, 10), file("aaaa.txt", 4, 10)];
        let chosen = choose_most_complete(&files).unwrap();
        assert_eq!(chosen.path, PathBuf::from("aaaa.txt"));
    }

    #[test]
    fn test_empty_slice_has_no_choice() {
        assert!(choose_most_complete(&[]).is_none());
    }

    #[test]
    fn test_is_txt_case_insensitive() {
        assert!(is_txt(Path::new("a.txt")));
        assert!(is_txt(Path::new("a.TXT")));
        assert!(!is_txt(Path::new("a.md")));
        assert!(!is_txt(Path::new("txt")));
    }

    #[test]
    fn test_scan_partitions_by_index() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("【P1】a.txt"), "one").unwrap();
        fs_err::write(dir.path().join("[P1] a longer copy.txt"), "one again").unwrap();
        fs_err::write(dir.path().join("【P2】b.txt"), "two").unwrap();
        fs_err::write(dir.path().join("notes.txt"), "no token").unwrap();
        fs_err::write(dir.path().join("ignored.md"), "wrong ext").unwrap();

        let result = scan_txt_folder(dir.path(), false).unwrap();
        assert_eq!(result.indices(), vec![1, 2]);
        assert_eq!(result.mapping[&1].len(), 2);
        assert_eq!(result.no_index.len(), 1);
        assert_eq!(result.duplicates().len(), 1);
        assert!(result.duplicates().contains_key(&1));
    }

    #[test]
    fn test_scan_recursive_only_reaches_subdirs_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("nested");
        fs_err::create_dir_all(&sub).unwrap();
        fs_err::write(sub.join("【P5】deep.txt"), "five").unwrap();

        let flat = scan_txt_folder(dir.path(), false).unwrap();
        assert!(flat.mapping.is_empty());

        let deep = scan_txt_folder(dir.path(), true).unwrap();
        assert_eq!(deep.indices(), vec![5]);
    }

    #[test]
    fn test_scan_empty_dir_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let result = scan_txt_folder(dir.path(), true).unwrap();
        assert!(result.mapping.is_empty());
        assert!(result.no_index.is_empty());
    }

    #[test]
    fn test_scan_missing_dir_fails_up_front() {
        assert!(scan_txt_folder(Path::new("/nonexistent/epkit"), false).is_err());
    }
}
