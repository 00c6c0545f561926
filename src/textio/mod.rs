use encoding_rs::{Encoding, BIG5, GB18030, UTF_16BE, UTF_16LE, UTF_8};
use std::path::{Path, PathBuf};

use crate::cli::OutputEncoding;
use crate::utils::sanitize_filename;
use crate::{Result, ToolkitError};

/// Decoders tried in order before the forced lossy fallback.
const FALLBACK_CHAIN: &[&Encoding] = &[UTF_8, GB18030, BIG5, UTF_16LE, UTF_16BE];

/// Upper bound on `_1`, `_2`, ... collision suffixes before giving up on an item.
const MAX_SUFFIX_ATTEMPTS: usize = 10_000;

/// Text decoded from disk, with the encoding that accepted it (for logging).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static str,
    pub lossy: bool,
}

/// Read a text file through the encoding fallback chain. Only the read
/// itself can fail; decoding always produces something, lossily if need be.
pub fn read_text_with_fallback(path: &Path) -> Result<DecodedText> {
    let data = fs_err::read(path)?;
    Ok(decode_with_fallback(&data))
}

/// Try each encoding in the chain (BOM-sniffing included) and keep the first
/// clean decode; force a lossy UTF-8 decode as the last resort.
pub fn decode_with_fallback(data: &[u8]) -> DecodedText {
    for encoding in FALLBACK_CHAIN {
        let (text, used, had_errors) = encoding.decode(data);
        if !had_errors {
            return DecodedText {
                text: text.into_owned(),
                encoding: used.name(),
                lossy: false,
            };
        }
    }

    let (text, _, _) = UTF_8.decode(data);
    DecodedText {
        text: text.into_owned(),
        encoding: "UTF-8 (lossy)",
        lossy: true,
    }
}

/// Write merged text as UTF-8, optionally with a byte-order mark for
/// Windows Notepad friendliness.
pub fn write_text(path: &Path, text: &str, encoding: OutputEncoding) -> Result<()> {
    match encoding {
        OutputEncoding::Utf8 => fs_err::write(path, text.as_bytes())?,
        OutputEncoding::Utf8Bom => {
            let mut data = Vec::with_capacity(text.len() + 3);
            data.extend_from_slice(b"\xEF\xBB\xBF");
            data.extend_from_slice(text.as_bytes());
            fs_err::write(path, data)?;
        }
    }
    Ok(())
}

/// Return a non-conflicting output path for `filename` under `out_dir`.
/// With overwrite off, collisions get an incrementing `_1`, `_2`, ... suffix
/// before the extension, bounded so a pathological directory cannot loop the
/// run forever.
pub fn safe_output_path(out_dir: &Path, filename: &str, overwrite: bool) -> Result<PathBuf> {
    fs_err::create_dir_all(out_dir)?;

    let mut base = sanitize_filename(filename);
    if !base.to_lowercase().ends_with(".txt") {
        base.push_str(".txt");
    }

    let candidate = out_dir.join(&base);
    if overwrite || !candidate.exists() {
        return Ok(candidate);
    }

    let stem = Path::new(&base)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| base.clone());

    for i in 1..=MAX_SUFFIX_ATTEMPTS {
        let candidate = out_dir.join(format!("{stem}_{i}.txt"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(ToolkitError::OutputNameExhausted(base, MAX_SUFFIX_ATTEMPTS).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_utf8() {
        let decoded = decode_with_fallback("简介 hello".as_bytes());
        assert_eq!(decoded.text, "简介 hello");
        assert_eq!(decoded.encoding, "UTF-8");
        assert!(!decoded.lossy);
    }

    #[test]
    fn test_decode_utf8_bom_is_stripped() {
        let mut data = b"\xEF\xBB\xBF".to_vec();
        data.extend_from_slice("title".as_bytes());
        let decoded = decode_with_fallback(&data);
        assert_eq!(decoded.text, "title");
    }

    #[test]
    fn test_decode_gb18030_fallback() {
        // "中文" in GB18030
        let data = [0xD6, 0xD0, 0xCE, 0xC4];
        let decoded = decode_with_fallback(&data);
        assert_eq!(decoded.text, "中文");
        assert!(!decoded.lossy);
    }

    #[test]
    fn test_decode_never_fails() {
        // Odd length defeats UTF-16, 0xFF sequences defeat UTF-8.
        let data = [0xFF, 0xFE, 0xFF, 0x00, 0x41, 0xFF, 0x80];
        let decoded = decode_with_fallback(&data);
        assert!(!decoded.text.is_empty());
    }

    #[test]
    fn test_lossy_output_round_trips_as_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let decoded = decode_with_fallback(&[0xC3, 0x28, 0xFF, 0xFF, 0x61]);

        let out = dir.path().join("out.txt");
        write_text(&out, &decoded.text, OutputEncoding::Utf8).unwrap();

        let reread = read_text_with_fallback(&out).unwrap();
        assert_eq!(reread.encoding, "UTF-8");
        assert!(!reread.lossy);
        assert_eq!(reread.text, decoded.text);
    }

    #[test]
    fn test_write_with_bom() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("bom.txt");
        write_text(&out, "abc", OutputEncoding::Utf8Bom).unwrap();

        let raw = fs_err::read(&out).unwrap();
        assert_eq!(&raw[..3], b"\xEF\xBB\xBF");
        assert_eq!(&raw[3..], b"abc");

        // BOM-aware reread sees the original text.
        assert_eq!(read_text_with_fallback(&out).unwrap().text, "abc");
    }

    #[test]
    fn test_safe_output_path_appends_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = safe_output_path(dir.path(), "report", false).unwrap();
        assert_eq!(path.file_name().unwrap(), "report.txt");
    }

    #[test]
    fn test_safe_output_path_suffixes_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("a.txt"), "x").unwrap();
        fs_err::write(dir.path().join("a_1.txt"), "x").unwrap();

        let path = safe_output_path(dir.path(), "a.txt", false).unwrap();
        assert_eq!(path.file_name().unwrap(), "a_2.txt");
    }

    #[test]
    fn test_safe_output_path_overwrite_keeps_name() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("a.txt"), "x").unwrap();

        let path = safe_output_path(dir.path(), "a.txt", true).unwrap();
        assert_eq!(path.file_name().unwrap(), "a.txt");
    }

    #[test]
    fn test_safe_output_path_sanitizes_illegal_chars() {
        let dir = tempfile::tempdir().unwrap();
        let path = safe_output_path(dir.path(), "a/b:c?.txt", false).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(!name.contains('/'));
        assert!(!name.contains(':'));
        assert!(!name.contains('?'));
    }
}
