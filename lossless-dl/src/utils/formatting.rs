//! Path and name helpers
//!
//! Peers report remote paths with either Windows or POSIX separators, so every
//! helper here treats `\` and `/` the same.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Characters that are illegal in file names on at least one major platform
const ILLEGAL_FILENAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Return the file name component regardless of separator style
pub fn basename_any(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

/// Innermost directory of a remote path, the folder slskd downloads into
pub fn parent_dir_any(path: &str) -> Option<&str> {
    let mut parts = path.rsplit(['\\', '/']);
    parts.next()?;
    parts.next().filter(|dir| !dir.is_empty())
}

/// Lower-cased extension (without the dot) of a remote path, if any
pub fn extension_of(path: &str) -> Option<String> {
    let base = basename_any(path);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Collapse runs of whitespace into single spaces and trim the ends
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized key for dedupe: compatibility-folded, case-folded,
/// whitespace-collapsed
pub fn normalize_key(value: &str) -> String {
    collapse_whitespace(&value.nfkc().collect::<String>().to_lowercase())
}

/// Convert a display name into a safe file name.
///
/// Accents are decomposed and their combining marks dropped, illegal and
/// control characters removed, whitespace collapsed. Trailing dots and spaces
/// are trimmed for Windows. Falls back to `"Unknown"` when nothing is left.
pub fn safe_filename(name: &str) -> String {
    let cleaned: String = name
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| !ILLEGAL_FILENAME_CHARS.contains(c) && !c.is_control())
        .collect();

    let collapsed = collapse_whitespace(&cleaned);
    let trimmed = collapsed.trim_end_matches(['.', ' ']);

    if trimmed.is_empty() {
        "Unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Format bytes for human-readable display
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
