//! Firmware build type and model type lookup

use std::path::{Path, PathBuf};

use crate::errors::{ProvisionError, Result};

/// File name of the partition table inside a build type directory
pub const PARTITIONS_CSV: &str = "partitions.csv";

/// Compiled partition table inside a build type directory
pub const PARTITION_TABLE_BIN: &str = "partition-table.bin";

/// Registry of firmware build directories, one per build type
#[derive(Debug, Clone)]
pub struct BuildTypeRegistry {
    root: PathBuf,
}

impl BuildTypeRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a build type; it must exist
    pub fn build_dir(&self, bin_type: &str) -> Result<PathBuf> {
        existing_dir(&self.root, bin_type, "build type")
    }

    /// Names of all build types available under the root
    pub fn list_build_types(&self) -> Vec<String> {
        list_dirs(&self.root)
    }
}

/// Registry of model type directories, each holding a packaged model archive
#[derive(Debug, Clone)]
pub struct ModelTypeRegistry {
    root: PathBuf,
}

impl ModelTypeRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn model_dir(&self, model_type: &str) -> Result<PathBuf> {
        existing_dir(&self.root, model_type, "model type")
    }

    pub fn list_model_types(&self) -> Vec<String> {
        list_dirs(&self.root)
    }
}

fn existing_dir(root: &Path, name: &str, what: &str) -> Result<PathBuf> {
    let dir = root.join(name);
    if !dir.is_dir() {
        return Err(ProvisionError::config(format!(
            "{} '{}' not found: {}",
            what,
            name,
            dir.display()
        )));
    }
    Ok(dir)
}

fn list_dirs(root: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(String::from))
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_dir_lookup() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("ped_alarm")).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("sdk_uvc_tw_plate")).unwrap();

        let registry = BuildTypeRegistry::new(temp_dir.path());
        assert!(registry.build_dir("ped_alarm").is_ok());
        assert_eq!(
            registry.list_build_types(),
            vec!["ped_alarm".to_string(), "sdk_uvc_tw_plate".to_string()]
        );

        let err = registry.build_dir("ms500_uvc").unwrap_err();
        assert!(err.to_string().contains("ms500_uvc"));
    }

    #[test]
    fn test_missing_root_lists_nothing() {
        let registry = ModelTypeRegistry::new("/nonexistent/model/root");
        assert!(registry.list_model_types().is_empty());
    }
}
