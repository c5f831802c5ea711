use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::loader::DocumentFormat;

/// Every loadable file under `dir`, recursively, in path order. Hidden entries are skipped.
pub fn walk_directory(dir: &Path) -> Vec<(PathBuf, DocumentFormat)> {
    let mut files: Vec<(PathBuf, DocumentFormat)> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let path = entry.into_path();
            let format = DocumentFormat::from_path(&path)?;
            Some((path, format))
        })
        .collect();
    files.sort_by(|(a, _), (b, _)| a.cmp(b));
    files
}

/// Files directly inside `dir` whose extension matches `ext`, sorted by name.
/// A missing directory yields an empty list.
pub fn list_files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(ext))
        })
        .collect();
    files.sort();
    files
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|s| s.starts_with('.'))
}
