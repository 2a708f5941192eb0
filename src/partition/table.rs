//! Partition table parsing
//!
//! Rows follow the ESP-IDF `partitions.csv` layout:
//! `Name, Type, SubType, Offset, Size[, Flags]`. An empty offset is
//! allocated right after the previous row (`offset + size` of the last
//! parsed entry), without any alignment. This must match the firmware
//! build byte for byte, so the alignment rules of the ESP-IDF generator
//! are deliberately not applied here.

use std::path::Path;

use crate::config::{BuildTypeRegistry, PARTITION_TABLE_BIN, PARTITIONS_CSV};
use crate::errors::{ProvisionError, Result};
use crate::models::PartitionEntry;

/// Minimum number of fields in a partition row
const MIN_FIELDS: usize = 5;

pub const NVS_PARTITION: &str = "nvs";
pub const STORAGE_DL_PARTITION: &str = "storage_dl";

/// Parsed partition map of one firmware build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    entries: Vec<PartitionEntry>,
}

impl PartitionTable {
    /// Parse partition table text
    pub fn parse(source: &str) -> Result<Self> {
        Self::parse_with_limit(source, None)
    }

    /// Parse and reject partitions that extend past `flash_size` bytes
    pub fn parse_with_limit(source: &str, flash_size: Option<u64>) -> Result<Self> {
        let mut entries: Vec<PartitionEntry> = Vec::new();
        let mut current_offset: u64 = 0;

        for (index, raw_line) in source.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < MIN_FIELDS {
                return Err(ProvisionError::MalformedTable {
                    line: line_no,
                    reason: format!(
                        "expected at least {} fields, found {}",
                        MIN_FIELDS,
                        fields.len()
                    ),
                });
            }

            let name = fields[0];
            if name.is_empty() {
                return Err(ProvisionError::MalformedTable {
                    line: line_no,
                    reason: "empty partition name".to_string(),
                });
            }
            if entries.iter().any(|e| e.name == name) {
                return Err(ProvisionError::MalformedTable {
                    line: line_no,
                    reason: format!("duplicate partition name '{}'", name),
                });
            }

            let offset = match parse_number(fields[3]) {
                Ok(Some(offset)) => offset,
                Ok(None) => current_offset,
                Err(reason) => {
                    return Err(ProvisionError::MalformedTable {
                        line: line_no,
                        reason: format!("offset: {}", reason),
                    });
                }
            };
            let size = match parse_number(fields[4]) {
                Ok(size) => size.unwrap_or(0),
                Err(reason) => {
                    return Err(ProvisionError::MalformedTable {
                        line: line_no,
                        reason: format!("size: {}", reason),
                    });
                }
            };

            let Some(end) = offset.checked_add(size) else {
                return Err(ProvisionError::MalformedTable {
                    line: line_no,
                    reason: "offset + size overflows".to_string(),
                });
            };
            let entry = PartitionEntry::new(name, offset, size);
            if let Some(limit) = flash_size {
                if end > limit {
                    return Err(ProvisionError::MalformedTable {
                        line: line_no,
                        reason: format!(
                            "partition '{}' ends at 0x{:X}, beyond flash size 0x{:X}",
                            name,
                            end,
                            limit
                        ),
                    });
                }
            }

            current_offset = end;
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    /// Read and parse a `partitions.csv` file
    pub fn load(path: &Path, flash_size: Option<u64>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::config(format!(
                "cannot read partition table {}: {}",
                path.display(),
                e
            ))
        })?;
        let table = Self::parse_with_limit(&content, flash_size)?;
        log::debug!(
            "Loaded {} partitions from {}",
            table.entries.len(),
            path.display()
        );
        Ok(table)
    }

    /// Load the partition table shipped with a firmware build type.
    ///
    /// `partitions.csv` is preferred; builds that only ship the compiled
    /// `partition-table.bin` are read from the binary instead.
    pub fn load_for_build(
        registry: &BuildTypeRegistry,
        bin_type: &str,
        flash_size: Option<u64>,
    ) -> Result<Self> {
        let build_dir = registry.build_dir(bin_type)?;
        let csv_path = build_dir.join(PARTITIONS_CSV);
        if csv_path.exists() {
            return Self::load(&csv_path, flash_size);
        }

        let bin_path = build_dir.join(PARTITION_TABLE_BIN);
        if !bin_path.exists() {
            return Err(ProvisionError::config(format!(
                "build type '{}' has neither {} nor {}",
                bin_type, PARTITIONS_CSV, PARTITION_TABLE_BIN
            )));
        }
        log::debug!("No {}, reading {}", PARTITIONS_CSV, bin_path.display());
        let bytes = std::fs::read(&bin_path)?;
        let table = Self::from_binary(&bytes)?;
        if let Some(limit) = flash_size {
            table.check_flash_size(limit)?;
        }
        Ok(table)
    }

    /// Parse a compiled `partition-table.bin`
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let table = esp_idf_part::PartitionTable::try_from_bytes(bytes.to_vec())
            .map_err(|e| ProvisionError::malformed(format!("invalid partition table binary: {}", e)))?;

        let entries = table
            .partitions()
            .iter()
            .map(|p| PartitionEntry::new(p.name(), u64::from(p.offset()), u64::from(p.size())))
            .collect();
        Ok(Self { entries })
    }

    /// Reject entries that extend past `limit` bytes. Lines are 1-based entry indices.
    fn check_flash_size(&self, limit: u64) -> Result<()> {
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.end() > limit {
                return Err(ProvisionError::MalformedTable {
                    line: index + 1,
                    reason: format!(
                        "partition '{}' ends at 0x{:X}, beyond flash size 0x{:X}",
                        entry.name,
                        entry.end(),
                        limit
                    ),
                });
            }
        }
        Ok(())
    }

    /// Partition by name
    pub fn lookup(&self, name: &str) -> Result<&PartitionEntry> {
        self.get(name)
            .ok_or_else(|| ProvisionError::PartitionNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&PartitionEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn nvs(&self) -> Result<&PartitionEntry> {
        self.lookup(NVS_PARTITION)
    }

    pub fn storage_dl(&self) -> Result<&PartitionEntry> {
        self.lookup(STORAGE_DL_PARTITION)
    }

    /// Entries in file order
    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a hex (`0x`) or decimal literal. Empty input yields `None`.
fn parse_number(field: &str) -> std::result::Result<Option<u64>, String> {
    let text = field.trim().trim_end_matches(',').trim();
    if text.is_empty() {
        return Ok(None);
    }
    let parsed = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16)
    } else {
        text.parse::<u64>()
    };
    parsed
        .map(Some)
        .map_err(|_| format!("invalid number '{}'", text))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS500_TABLE: &str = "\
# Name,   Type, SubType, Offset,   Size, Flags
nvs,      data, nvs,     0x9000,   0x10000,
otadata,  data, ota,     ,         0x2000,
phy_init, data, phy,     ,         0x1000,
ota_0,    app,  ota_0,   0x20000,  0x400000,
storage,  data, fat,     ,         0x200000,

storage_dl, data, fat,   ,         0x800000,
";

    #[test]
    fn test_parse_explicit_and_inferred_offsets() {
        let table = PartitionTable::parse(MS500_TABLE).unwrap();
        assert_eq!(table.len(), 6);

        let nvs = table.nvs().unwrap();
        assert_eq!((nvs.offset, nvs.size), (0x9000, 0x10000));

        let otadata = table.lookup("otadata").unwrap();
        assert_eq!(otadata.offset, 0x19000);
        let phy = table.lookup("phy_init").unwrap();
        assert_eq!(phy.offset, 0x1B000);

        let storage = table.lookup("storage").unwrap();
        assert_eq!(storage.offset, 0x420000);
        let storage_dl = table.storage_dl().unwrap();
        assert_eq!(storage_dl.offset, 0x620000);
        assert_eq!(storage_dl.offset_hex(), "0x620000");
    }

    #[test]
    fn test_parse_is_idempotent() {
        let first = PartitionTable::parse(MS500_TABLE).unwrap();
        let second = PartitionTable::parse(MS500_TABLE).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_inferred_offset_is_previous_end() {
        let table = PartitionTable::parse(MS500_TABLE).unwrap();
        for pair in table.entries().windows(2) {
            if pair[1].name == "ota_0" {
                continue;
            }
            assert_eq!(pair[1].offset, pair[0].end(), "{}", pair[1].name);
        }
    }

    #[test]
    fn test_decimal_and_empty_size() {
        let table = PartitionTable::parse("a, data, nvs, 36864, 4096\nb, data, fat, ,\n").unwrap();
        assert_eq!(table.lookup("a").unwrap().offset, 0x9000);
        let b = table.lookup("b").unwrap();
        assert_eq!((b.offset, b.size), (0xA000, 0));
    }

    #[test]
    fn test_short_row_is_malformed() {
        let err = PartitionTable::parse("# header\nnvs, data, nvs, 0x9000\n").unwrap_err();
        match err {
            ProvisionError::MalformedTable { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_duplicate_name_is_malformed() {
        let err =
            PartitionTable::parse("nvs, data, nvs, 0x9000, 0x1000\nnvs, data, nvs, , 0x1000\n")
                .unwrap_err();
        assert!(matches!(err, ProvisionError::MalformedTable { line: 2, .. }));
    }

    #[test]
    fn test_invalid_number_is_malformed() {
        let err = PartitionTable::parse("nvs, data, nvs, 0xZZ, 0x1000\n").unwrap_err();
        assert!(err.to_string().contains("invalid number"));
    }

    #[test]
    fn test_flash_size_limit() {
        let source = "big, app, factory, 0x10000, 0x1000000\n";
        assert!(PartitionTable::parse(source).is_ok());
        let err = PartitionTable::parse_with_limit(source, Some(16 * 1024 * 1024)).unwrap_err();
        assert!(err.to_string().contains("beyond flash size"));
    }

    #[test]
    fn test_offset_overflow_is_malformed() {
        let err = PartitionTable::parse("a, data, nvs, 0xFFFFFFFFFFFFFFF0, 0x100\n").unwrap_err();
        match err {
            ProvisionError::MalformedTable { line, reason } => {
                assert_eq!(line, 1);
                assert_eq!(reason, "offset + size overflows");
            }
            other => panic!("unexpected error: {}", other),
        }

        let err = PartitionTable::parse("a, data, nvs, 0xFFFFFFFFFFFFE000, 0x1000\nb, data, fat, , 0x1000\n")
            .unwrap_err();
        assert!(matches!(err, ProvisionError::MalformedTable { line: 2, .. }));
    }

    const COMPILED_TABLE: &str = "\
nvs,      data, nvs,   0x9000,  0x6000,
otadata,  data, ota,   0xf000,  0x2000,
ota_0,    app,  ota_0, 0x20000, 0x300000,
storage_dl, data, fat, 0x420000, 0x200000,
";

    fn compiled_table() -> Vec<u8> {
        esp_idf_part::PartitionTable::try_from_str(COMPILED_TABLE)
            .unwrap()
            .to_bin()
            .unwrap()
    }

    #[test]
    fn test_from_binary() {
        let table = PartitionTable::from_binary(&compiled_table()).unwrap();
        let names: Vec<&str> = table.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["nvs", "otadata", "ota_0", "storage_dl"]);
        assert_eq!(table.nvs().unwrap().size, 0x6000);
        assert_eq!(table.storage_dl().unwrap().offset, 0x420000);

        let err = PartitionTable::from_binary(&[0xA5; 0xC00]).unwrap_err();
        assert!(err.to_string().contains("invalid partition table binary"));
    }

    #[test]
    fn test_build_without_csv_uses_compiled_table() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let build_dir = temp_dir.path().join("ped_alarm");
        std::fs::create_dir_all(&build_dir).unwrap();
        std::fs::write(build_dir.join(PARTITION_TABLE_BIN), compiled_table()).unwrap();
        let registry = BuildTypeRegistry::new(temp_dir.path());

        let table = PartitionTable::load_for_build(&registry, "ped_alarm", None).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.nvs().unwrap().offset, 0x9000);

        let err = PartitionTable::load_for_build(&registry, "ped_alarm", Some(0x400000)).unwrap_err();
        assert!(matches!(err, ProvisionError::MalformedTable { line: 4, .. }));

        // csv wins when both are present
        std::fs::write(build_dir.join(PARTITIONS_CSV), "nvs, data, nvs, 0x9000, 0x4000\n").unwrap();
        let table = PartitionTable::load_for_build(&registry, "ped_alarm", None).unwrap();
        assert_eq!(table.len(), 1);

        std::fs::remove_file(build_dir.join(PARTITIONS_CSV)).unwrap();
        std::fs::remove_file(build_dir.join(PARTITION_TABLE_BIN)).unwrap();
        let err = PartitionTable::load_for_build(&registry, "ped_alarm", None).unwrap_err();
        assert!(err.to_string().contains(PARTITION_TABLE_BIN));
    }

    #[test]
    fn test_lookup_missing_partition() {
        let table = PartitionTable::parse(MS500_TABLE).unwrap();
        assert!(matches!(
            table.lookup("factory"),
            Err(ProvisionError::PartitionNotFound(name)) if name == "factory"
        ));
    }
}
