//! Push queue enumeration

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::files::{FileSource, LocalSource};

/// Entry with size information for the push queue
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
}

/// File filter options
#[derive(Default)]
pub struct FileFilter {
    /// Only queue these extensions (without the dot, case-insensitive); empty = all
    pub extensions: Vec<String>,
    pub exclude_files: Vec<String>,
    pub exclude_dirs: Vec<String>,
}

impl FileFilter {
    /// Check if a file should be included
    fn should_include_file(&self, path: &Path) -> bool {
        let filename = path.file_name().unwrap_or_default().to_string_lossy();
        for pattern in &self.exclude_files {
            if glob_match(pattern, &filename) {
                return false;
            }
        }

        if self.extensions.is_empty() {
            return true;
        }
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        self.extensions
            .iter()
            .any(|want| want.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }

    /// Check if a directory should be included
    fn should_include_dir(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return true;
        };
        !self.exclude_dirs.iter().any(|p| glob_match(p, name))
    }
}

/// Simple glob matching (supports * wildcards)
fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if pattern.contains('*') {
        if pattern.len() > 1 && pattern.starts_with('*') && pattern.ends_with('*') {
            let middle = &pattern[1..pattern.len() - 1];
            return text.contains(middle);
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            return text.ends_with(suffix);
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            return text.starts_with(prefix);
        }
    }

    // Exact match
    pattern == text
}

/// Walk a directory in sorted order, keeping files that pass the filter
pub fn enumerate_directory_filtered(root: &Path, filter: &FileFilter) -> Result<Vec<FileEntry>> {
    use walkdir::WalkDir;

    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            // Skip excluded directories entirely (the root itself is always walked)
            if e.file_type().is_dir() && e.depth() > 0 {
                filter.should_include_dir(e.path())
            } else {
                true
            }
        })
    {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if entry.file_type().is_file() && filter.should_include_file(entry.path()) {
            let metadata = entry
                .metadata()
                .with_context(|| format!("failed to stat {}", entry.path().display()))?;
            entries.push(FileEntry {
                path: entry.path().to_path_buf(),
                size: metadata.len(),
            });
        }
    }

    Ok(entries)
}

/// Expand files and directories into the ordered list the peer will see
pub fn collect_entries(paths: &[PathBuf], filter: &FileFilter) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    for path in paths {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("cannot access {}", path.display()))?;
        if meta.is_dir() {
            entries.extend(enumerate_directory_filtered(path, filter)?);
        } else if filter.should_include_file(path) {
            entries.push(FileEntry {
                path: path.clone(),
                size: meta.len(),
            });
        }
    }
    Ok(entries)
}

/// Open every entry as a push source
pub fn open_queue(entries: &[FileEntry]) -> Result<Vec<Box<dyn FileSource>>> {
    entries
        .iter()
        .map(|e| {
            LocalSource::open(&e.path)
                .map(|s| Box::new(s) as Box<dyn FileSource>)
                .with_context(|| format!("failed to open {}", e.path.display()))
        })
        .collect()
}
