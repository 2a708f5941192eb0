//! Resolution of build output files to flash addresses

use std::collections::HashSet;
use std::path::Path;

use crate::errors::{ProvisionError, Result};
use crate::models::{FlashImage, FlashManifest, ManifestEntry, PartitionRequirement};

use super::table::PartitionTable;

/// Ordered set of images for one multi-image write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashPlan {
    images: Vec<FlashImage>,
}

impl FlashPlan {
    /// Bind every manifest file found in `build_dir` to its address.
    ///
    /// Optional entries whose file or partition is absent are skipped. A
    /// file name is bound at most once, to the first manifest entry that
    /// resolves. An empty plan is an error.
    pub fn resolve(
        manifest: &FlashManifest,
        table: &PartitionTable,
        build_dir: &Path,
    ) -> Result<Self> {
        let mut images = Vec::new();
        let mut bound_files: HashSet<&str> = HashSet::new();

        for entry in &manifest.entries {
            if bound_files.contains(entry.file_name.as_str()) {
                continue;
            }
            match resolve_entry(entry, table, build_dir)? {
                Some(image) => {
                    log::debug!(
                        "Partition {} @0x{:X} <- {}",
                        image.partition_name,
                        image.address,
                        image.path.display()
                    );
                    bound_files.insert(entry.file_name.as_str());
                    images.push(image);
                }
                None => continue,
            }
        }

        if images.is_empty() {
            return Err(ProvisionError::malformed(format!(
                "no flashable images found in {}",
                build_dir.display()
            )));
        }

        images.sort_by_key(|image| image.address);
        Ok(Self { images })
    }

    /// Plan writing a single file to a named partition
    pub fn single(table: &PartitionTable, partition: &str, file: &Path) -> Result<Self> {
        let entry = table.lookup(partition)?;
        let size = file_size(file)?.ok_or_else(|| {
            ProvisionError::malformed(format!("image file not found: {}", file.display()))
        })?;
        Ok(Self {
            images: vec![FlashImage {
                partition_name: entry.name.clone(),
                address: entry.offset,
                path: file.to_path_buf(),
                size,
            }],
        })
    }

    pub fn images(&self) -> &[FlashImage] {
        &self.images
    }

    pub fn into_images(self) -> Vec<FlashImage> {
        self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

fn resolve_entry(
    entry: &ManifestEntry,
    table: &PartitionTable,
    build_dir: &Path,
) -> Result<Option<FlashImage>> {
    let required = entry.requirement == PartitionRequirement::Required;
    let path = build_dir.join(&entry.file_name);

    let Some(size) = file_size(&path)? else {
        if required {
            return Err(ProvisionError::malformed(format!(
                "required image {} not found",
                path.display()
            )));
        }
        log::debug!("Skipping {}: file not present", entry.file_name);
        return Ok(None);
    };

    let address = match entry.fixed_address {
        Some(address) => address,
        None => match table.get(&entry.partition) {
            Some(partition) => {
                if size > partition.size && partition.size > 0 {
                    return Err(ProvisionError::malformed(format!(
                        "{} ({} bytes) does not fit partition '{}' ({} bytes)",
                        entry.file_name, size, partition.name, partition.size
                    )));
                }
                partition.offset
            }
            None if required => {
                return Err(ProvisionError::PartitionNotFound(entry.partition.clone()));
            }
            None => {
                log::debug!(
                    "Skipping {}: partition '{}' not in table",
                    entry.file_name,
                    entry.partition
                );
                return Ok(None);
            }
        },
    };

    Ok(Some(FlashImage {
        partition_name: entry.partition.clone(),
        address,
        path,
        size,
    }))
}

fn file_size(path: &Path) -> Result<Option<u64>> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TABLE: &str = "\
nvs,        data, nvs,     0x9000,  0x10000
otadata,    data, ota,     ,        0x2000
ota_0,      app,  ota_0,   0x20000, 0x400000
storage_dl, data, fat,     ,        0x800000
";

    fn build_dir(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for name in files {
            std::fs::write(dir.path().join(name), [0u8; 16]).unwrap();
        }
        dir
    }

    #[test]
    fn test_resolve_skips_missing_files() {
        let table = PartitionTable::parse(TABLE).unwrap();
        let dir = build_dir(&["bootloader.bin", "ms500_p4.bin", "storage_dl.bin"]);

        let plan = FlashPlan::resolve(&FlashManifest::ms500(), &table, dir.path()).unwrap();
        let addresses: Vec<(String, u64)> = plan
            .images()
            .iter()
            .map(|i| (i.partition_name.clone(), i.address))
            .collect();
        assert_eq!(
            addresses,
            vec![
                ("bootloader".to_string(), 0x2000),
                ("ota_0".to_string(), 0x20000),
                ("storage_dl".to_string(), 0x420000),
            ]
        );
    }

    #[test]
    fn test_app_image_falls_back_to_factory_partition() {
        let table =
            PartitionTable::parse("nvs, data, nvs, 0x9000, 0x6000\nfactory, app, factory, 0x10000, 0x100000\n")
                .unwrap();
        let dir = build_dir(&["ms500_p4.bin"]);

        let plan = FlashPlan::resolve(&FlashManifest::ms500(), &table, dir.path()).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.images()[0].partition_name, "factory");
        assert_eq!(plan.images()[0].address, 0x10000);
    }

    #[test]
    fn test_app_image_bound_once() {
        let table = PartitionTable::parse(
            "ota_0, app, ota_0, 0x20000, 0x100000\nfactory, app, factory, 0x200000, 0x100000\n",
        )
        .unwrap();
        let dir = build_dir(&["ms500_p4.bin"]);

        let plan = FlashPlan::resolve(&FlashManifest::ms500(), &table, dir.path()).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.images()[0].partition_name, "ota_0");
    }

    #[test]
    fn test_empty_plan_is_fatal() {
        let table = PartitionTable::parse(TABLE).unwrap();
        let dir = build_dir(&[]);
        let err = FlashPlan::resolve(&FlashManifest::ms500(), &table, dir.path()).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::MalformedData);
    }

    #[test]
    fn test_required_entry_missing_is_fatal() {
        let table = PartitionTable::parse(TABLE).unwrap();
        let dir = build_dir(&["ms500_p4.bin"]);
        let manifest = FlashManifest {
            entries: vec![
                ManifestEntry::optional("ota_0", "ms500_p4.bin"),
                ManifestEntry::optional("storage", "storage.bin").required(),
            ],
        };
        assert!(FlashPlan::resolve(&manifest, &table, dir.path()).is_err());
    }

    #[test]
    fn test_single_image_plan() {
        let table = PartitionTable::parse(TABLE).unwrap();
        let dir = build_dir(&["nvs.bin"]);
        let plan = FlashPlan::single(&table, "nvs", &dir.path().join("nvs.bin")).unwrap();
        assert_eq!(plan.images()[0].address, 0x9000);
        assert_eq!(plan.images()[0].size, 16);
    }
}
