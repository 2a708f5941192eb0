//! Flash-related data models

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::DeviceConfig;

/// Whether a missing manifest file is skipped or fatal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionRequirement {
    Required,
    Optional,
}

/// One file the firmware flow may write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Partition the file belongs to
    pub partition: String,
    /// File name inside the build type directory
    pub file_name: String,
    /// Address used instead of the partition table lookup
    pub fixed_address: Option<u64>,
    pub requirement: PartitionRequirement,
}

impl ManifestEntry {
    pub fn optional(partition: &str, file_name: &str) -> Self {
        Self {
            partition: partition.to_string(),
            file_name: file_name.to_string(),
            fixed_address: None,
            requirement: PartitionRequirement::Optional,
        }
    }

    pub fn at(mut self, address: u64) -> Self {
        self.fixed_address = Some(address);
        self
    }

    pub fn required(mut self) -> Self {
        self.requirement = PartitionRequirement::Required;
        self
    }
}

/// Declared mapping from partitions to build output files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashManifest {
    pub entries: Vec<ManifestEntry>,
}

impl FlashManifest {
    /// Layout of the MS500 ESP32-P4 firmware builds
    pub fn ms500() -> Self {
        Self {
            entries: vec![
                ManifestEntry::optional("bootloader", "bootloader.bin").at(0x2000),
                ManifestEntry::optional("partition-table", "partition-table.bin").at(0x8000),
                ManifestEntry::optional("otadata", "ota_data_initial.bin"),
                ManifestEntry::optional("ota_0", "ms500_p4.bin"),
                // sdk_uvc builds boot from a factory partition instead of ota_0
                ManifestEntry::optional("factory", "ms500_p4.bin"),
                ManifestEntry::optional("storage", "storage.bin"),
                ManifestEntry::optional("storage_dl", "storage_dl.bin"),
            ],
        }
    }
}

impl Default for FlashManifest {
    fn default() -> Self {
        Self::ms500()
    }
}

/// A file bound to the address it is written to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashImage {
    pub partition_name: String,
    pub address: u64,
    pub path: PathBuf,
    pub size: u64,
}

/// Parameters passed to the flasher on multi-image writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashParams {
    pub baud_rate: u32,
    pub chip: String,
    pub flash_mode: String,
    pub flash_freq: String,
    pub flash_size: String,
}

impl From<&DeviceConfig> for FlashParams {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            baud_rate: config.baud_rate,
            chip: config.chip.clone(),
            flash_mode: config.flash_mode.clone(),
            flash_freq: config.flash_freq.clone(),
            flash_size: config.flash_size.clone(),
        }
    }
}

/// Chip identity reported by the flasher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipIdentity {
    pub chip: Option<String>,
    pub mac: Option<String>,
}
