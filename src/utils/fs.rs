//! Filesystem helpers for scratch directories

use std::path::{Path, PathBuf};

use crate::errors::Result;

/// Destroy `path` if it exists and create it empty
pub fn reset_dir(path: &Path) -> Result<()> {
    if path.exists() {
        log::debug!("Removing stale directory {}", path.display());
        std::fs::remove_dir_all(path)?;
    }
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Regular files directly inside `dir`, sorted by name
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Whether a path has the given extension, ignoring case
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}
