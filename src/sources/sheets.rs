use calamine::{open_workbook, Reader, Xlsx};
use rust_xlsxwriter::Workbook;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::{Result, ToolkitError};

use super::{Sheet, SheetStore};

/// Excel lock files carry this prefix and must be skipped.
const TEMP_PREFIX: &str = "~$";

pub fn is_xlsx(path: &Path) -> bool {
    let lock_file = path
        .file_name()
        .map(|n| n.to_string_lossy().starts_with(TEMP_PREFIX))
        .unwrap_or(false);
    !lock_file
        && path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("xlsx"))
            .unwrap_or(false)
}

/// Enumerate `.xlsx` workbooks in `dir`, optionally recursing, sorted so
/// runs are deterministic.
pub fn list_xlsx_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ToolkitError::MissingDirectory(dir.display().to_string()).into());
    }

    let mut files = Vec::new();
    if recursive {
        for entry in WalkDir::new(dir) {
            let entry = entry?;
            if entry.file_type().is_file() && is_xlsx(entry.path()) {
                files.push(entry.into_path());
            }
        }
    } else {
        for entry in fs_err::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() && is_xlsx(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// `.xlsx` implementation of the rows-in/rows-out contract: `calamine` on
/// the read side, `rust_xlsxwriter` on the write side.
pub struct XlsxStore;

impl SheetStore for XlsxStore {
    fn read_sheets(&self, path: &Path) -> Result<Vec<Sheet>> {
        let mut workbook: Xlsx<_> = open_workbook(path)?;
        let names = workbook.sheet_names().to_owned();

        let mut sheets = Vec::with_capacity(names.len());
        for name in names {
            let range = workbook.worksheet_range(&name)?;
            let rows = range
                .rows()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect();
            sheets.push(Sheet { name, rows });
        }
        Ok(sheets)
    }

    fn write_sheets(&self, path: &Path, sheets: &[Sheet]) -> Result<()> {
        let mut workbook = Workbook::new();
        if sheets.is_empty() {
            workbook.add_worksheet();
        }
        for sheet in sheets {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&sheet.name)?;
            for (r, row) in sheet.rows.iter().enumerate() {
                for (c, cell) in row.iter().enumerate() {
                    if !cell.is_empty() {
                        worksheet.write_string(r as u32, c as u16, cell)?;
                    }
                }
            }
        }
        workbook.save(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_xlsx_skips_lock_files() {
        assert!(is_xlsx(Path::new("report.xlsx")));
        assert!(is_xlsx(Path::new("report.XLSX")));
        assert!(!is_xlsx(Path::new("~$report.xlsx")));
        assert!(!is_xlsx(Path::new("report.xls")));
        assert!(!is_xlsx(Path::new("report.txt")));
    }

    #[test]
    fn test_list_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("b.xlsx"), b"").unwrap();
        fs_err::write(dir.path().join("a.xlsx"), b"").unwrap();
        fs_err::write(dir.path().join("~$a.xlsx"), b"").unwrap();
        fs_err::write(dir.path().join("notes.txt"), b"").unwrap();

        let files = list_xlsx_files(dir.path(), false).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.xlsx", "b.xlsx"]);
    }

    #[test]
    fn test_xlsx_store_round_trips_cell_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.xlsx");
        let sheets = vec![Sheet {
            name: "数据".to_string(),
            rows: vec![
                vec!["名称".to_string(), "链接".to_string()],
                vec!["第一集".to_string(), "https://example.com".to_string()],
            ],
        }];

        XlsxStore.write_sheets(&path, &sheets).unwrap();
        let back = XlsxStore.read_sheets(&path).unwrap();
        assert_eq!(back, sheets);
    }

    #[test]
    fn test_read_missing_workbook_fails() {
        assert!(XlsxStore.read_sheets(Path::new("/nonexistent/x.xlsx")).is_err());
    }
}
