//! Partition table entries

use serde::{Deserialize, Serialize};
use std::fmt;

/// One named flash region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionEntry {
    pub name: String,
    pub offset: u64,
    pub size: u64,
}

impl PartitionEntry {
    pub fn new(name: impl Into<String>, offset: u64, size: u64) -> Self {
        Self {
            name: name.into(),
            offset,
            size,
        }
    }

    /// First address after this partition, clamped at `u64::MAX`
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    /// Offset in the canonical `0x` + uppercase hex form
    pub fn offset_hex(&self) -> String {
        to_hex(self.offset)
    }

    /// Size in the canonical `0x` + uppercase hex form
    pub fn size_hex(&self) -> String {
        to_hex(self.size)
    }
}

impl fmt::Display for PartitionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<16} offset={:<10} size={}",
            self.name,
            self.offset_hex(),
            self.size_hex()
        )
    }
}

/// Canonical hex form used on flasher command lines
pub fn to_hex(value: u64) -> String {
    format!("0x{:X}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_hex() {
        let entry = PartitionEntry::new("nvs", 0x9000, 0x10000);
        assert_eq!(entry.offset_hex(), "0x9000");
        assert_eq!(entry.size_hex(), "0x10000");
        assert_eq!(to_hex(0x8a0000), "0x8A0000");
        assert_eq!(entry.end(), 0x19000);
    }
}
