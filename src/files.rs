//! Local filesystem handling for attachment downloads
//!
//! Normalizes sender-supplied filenames into names safe to place on a local
//! filesystem and resolves collisions inside the target directory.

use std::path::{Path, PathBuf};

/// Longest sanitized filename, in characters
const MAX_FILENAME_CHARS: usize = 255;

/// Normalize a filename for the local filesystem
///
/// Total function, never fails. Path separators and NUL become `_`, as do
/// the characters reserved on common filesystems (`<>:"|?*`). Names longer
/// than 255 characters are truncated with the final extension preserved.
/// An empty or dot-leading result gets `attachment` prepended.
pub fn sanitize_filename(name: &str) -> String {
    let mut cleaned: String = name
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | '\0' => '_',
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();

    if cleaned.chars().count() > MAX_FILENAME_CHARS {
        cleaned = truncate_preserving_extension(&cleaned, MAX_FILENAME_CHARS);
    }

    if cleaned.is_empty() || cleaned.starts_with('.') {
        cleaned.insert_str(0, "attachment");
    }

    cleaned
}

/// Truncate to `max_chars` characters, keeping the substring from the last
/// `.` onward intact
fn truncate_preserving_extension(name: &str, max_chars: usize) -> String {
    let (stem, extension) = split_extension(name);
    let extension_chars = extension.chars().count();
    if extension_chars >= max_chars {
        return name.chars().take(max_chars).collect();
    }

    let mut truncated: String = stem.chars().take(max_chars - extension_chars).collect();
    truncated.push_str(extension);
    truncated
}

/// Split a filename at the last `.`; the extension includes the dot
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) => name.split_at(idx),
        None => (name, ""),
    }
}

/// Find a free path for `filename` inside `dir`
///
/// If the name is taken, appends `_1`, `_2`, … before the extension until a
/// free name is found.
pub fn unique_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, extension) = split_extension(filename);
    let mut counter = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}_{counter}{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::{sanitize_filename, unique_path};

    #[test]
    fn replaces_path_separators() {
        assert_eq!(sanitize_filename("path/to/file.txt"), "path_to_file.txt");
        assert_eq!(sanitize_filename("path\\to\\file.txt"), "path_to_file.txt");
    }

    #[test]
    fn replaces_reserved_characters() {
        assert_eq!(sanitize_filename("file<>:\"|?*.txt"), "file_______.txt");
    }

    #[test]
    fn empty_name_becomes_attachment() {
        assert_eq!(sanitize_filename(""), "attachment");
    }

    #[test]
    fn dot_prefixed_name_gets_attachment_prepended() {
        assert_eq!(sanitize_filename(".hidden"), "attachment.hidden");
    }

    #[test]
    fn long_name_truncates_to_exactly_255_preserving_extension() {
        let long_name = format!("{}.txt", "a".repeat(300));
        let sanitized = sanitize_filename(&long_name);
        assert_eq!(sanitized.chars().count(), 255);
        assert!(sanitized.ends_with(".txt"));
        assert!(sanitized.starts_with("aaa"));
    }

    #[test]
    fn short_names_pass_through_unchanged() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
    }

    #[test]
    fn unique_path_returns_original_when_free() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = unique_path(dir.path(), "report.pdf");
        assert_eq!(path, dir.path().join("report.pdf"));
    }

    #[test]
    fn unique_path_appends_counter_before_extension() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join("report.pdf"), b"x").expect("seed file");
        std::fs::write(dir.path().join("report_1.pdf"), b"x").expect("seed file");

        let path = unique_path(dir.path(), "report.pdf");
        assert_eq!(path, dir.path().join("report_2.pdf"));
    }

    #[test]
    fn unique_path_handles_extensionless_names() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join("README"), b"x").expect("seed file");

        let path = unique_path(dir.path(), "README");
        assert_eq!(path, dir.path().join("README_1"));
    }
}
