/// Longest filename we will generate; keeps full output paths under the
/// common Windows path limit.
const MAX_FILENAME_LEN: usize = 180;

/// Sanitize a filename for safe cross-platform (notably Windows) usage:
/// replace reserved characters, strip control characters, collapse runs of
/// whitespace, and trim trailing dots and spaces.
pub fn sanitize_filename(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    let mut last_was_space = false;

    for c in name.chars() {
        let mapped = match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => continue,
            c => c,
        };
        if mapped == ' ' {
            if last_was_space {
                continue;
            }
            last_was_space = true;
        } else {
            last_was_space = false;
        }
        cleaned.push(mapped);
    }

    let is_trim_char = |c: char| c == '.' || c == ' ';
    let mut cleaned: String = cleaned.trim().trim_end_matches(is_trim_char).to_string();
    if cleaned.chars().count() > MAX_FILENAME_LEN {
        cleaned = cleaned.chars().take(MAX_FILENAME_LEN).collect();
        cleaned = cleaned.trim_end_matches(is_trim_char).to_string();
    }

    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

/// Format file size in human-readable form
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Format duration in human-readable form
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
