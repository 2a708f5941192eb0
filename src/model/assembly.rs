//! Unpacking and assembling the converted model
//!
//! The device loads its network from `/dnn` on the `storage_dl` FAT
//! partition. That directory must hold exactly one `.fpk` package and its
//! `network_info.txt`.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::errors::{ProvisionError, Result};
use crate::utils::fs::{has_extension, list_files, reset_dir};

/// Packaged model archive inside a model type directory
pub const MODEL_ARCHIVE: &str = "packerOut.zip";
/// Metadata file shipped next to the network package
pub const NETWORK_INFO: &str = "network_info.txt";
pub const MODEL_EXTENSION: &str = "fpk";
/// Root of the FAT image content
pub const ASSEMBLY_DIR: &str = "storage_dl_content";
/// Directory on the device holding the network (8.3 compatible)
pub const DNN_DIR: &str = "dnn";

/// Extract a zip archive into `dest` and return its content root.
///
/// When the archive holds a single top-level directory, that directory is
/// the content root.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<PathBuf> {
    reset_dir(dest)?;
    let file = File::open(archive).map_err(|e| {
        ProvisionError::malformed(format!("cannot open archive {}: {}", archive.display(), e))
    })?;
    let mut zip = zip::ZipArchive::new(file)?;
    zip.extract(dest)?;
    log::info!("Extracted {} entries from {}", zip.len(), archive.display());
    content_root(dest)
}

/// Descend into `dir` when it contains exactly one entry and that entry is a directory
pub fn content_root(dir: &Path) -> Result<PathBuf> {
    let entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    match entries.as_slice() {
        [single] if single.is_dir() => {
            log::debug!("Using nested directory {}", single.display());
            Ok(single.clone())
        }
        _ => Ok(dir.to_path_buf()),
    }
}

/// Copy the network package and its metadata into `<assembly_root>/dnn`.
///
/// `sidecar` replaces the archive's own `network_info.txt` when given.
/// Returns the `dnn` directory.
pub fn assemble(content: &Path, sidecar: Option<&Path>, assembly_root: &Path) -> Result<PathBuf> {
    let packages: Vec<PathBuf> = list_files(content)?
        .into_iter()
        .filter(|path| has_extension(path, MODEL_EXTENSION))
        .collect();
    let package = match packages.as_slice() {
        [package] => package,
        [] => {
            return Err(ProvisionError::malformed(format!(
                "no .{} model package in {}",
                MODEL_EXTENSION,
                content.display()
            )));
        }
        _ => {
            return Err(ProvisionError::malformed(format!(
                "{} .{} packages in {}, expected one",
                packages.len(),
                MODEL_EXTENSION,
                content.display()
            )));
        }
    };

    let info = match sidecar {
        Some(path) => {
            log::info!("Replacing {} with {}", NETWORK_INFO, path.display());
            path.to_path_buf()
        }
        None => content.join(NETWORK_INFO),
    };
    if !info.is_file() {
        return Err(ProvisionError::malformed(format!(
            "{} not found: {}",
            NETWORK_INFO,
            info.display()
        )));
    }

    reset_dir(assembly_root)?;
    let dnn_dir = assembly_root.join(DNN_DIR);
    std::fs::create_dir_all(&dnn_dir)?;

    let package_name = package
        .file_name()
        .ok_or_else(|| ProvisionError::malformed("model package has no file name"))?;
    std::fs::copy(package, dnn_dir.join(package_name))?;
    std::fs::copy(&info, dnn_dir.join(NETWORK_INFO))?;
    log::info!(
        "Assembled {} and {} into {}",
        package_name.to_string_lossy(),
        NETWORK_INFO,
        dnn_dir.display()
    );
    Ok(dnn_dir)
}

/// Check the `dnn` directory holds exactly one package and its metadata
pub fn validate_assembly(dnn_dir: &Path) -> Result<Vec<PathBuf>> {
    let files = list_files(dnn_dir)?;
    let packages = files
        .iter()
        .filter(|path| has_extension(path, MODEL_EXTENSION))
        .count();
    let infos = files
        .iter()
        .filter(|path| path.file_name().map(|n| n == NETWORK_INFO).unwrap_or(false))
        .count();
    let subdirs = std::fs::read_dir(dnn_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .count();

    if packages != 1 || infos != 1 || files.len() != 2 || subdirs != 0 {
        let names: Vec<String> = files
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        return Err(ProvisionError::malformed(format!(
            "model assembly in {} must contain one .{} file and {}, found [{}]",
            dnn_dir.display(),
            MODEL_EXTENSION,
            NETWORK_INFO,
            names.join(", ")
        )));
    }
    Ok(files)
}
