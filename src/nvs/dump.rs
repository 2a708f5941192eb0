//! Parsing of the decoder's `namespace:key = value` dump

use crate::models::{NVS_NAMESPACE, NvsRecordSet};

/// Number of leading bytes inspected by [`is_blank`]
pub const BLANK_CHECK_LEN: usize = 256;

/// Erased flash byte
pub const ERASED_BYTE: u8 = 0xFF;

/// A partition is blank when its first 256 bytes are all erased.
/// Bytes after the first 256 are never inspected.
pub fn is_blank(image: &[u8]) -> bool {
    !image.is_empty()
        && image
            .iter()
            .take(BLANK_CHECK_LEN)
            .all(|&byte| byte == ERASED_BYTE)
}

/// Parse the minimal dump format into one flat record set.
///
/// Keys from every namespace are kept; the re-encoded partition
/// carries them all under the provisioning namespace.
///
/// ```text
/// Page no. 0, Status: Full
/// factory:g_camera_id = b'100B50501A2101059064011000000000\x00'
/// factory:wake_count = 3
/// ```
pub fn parse_dump(text: &str) -> NvsRecordSet {
    let mut records = NvsRecordSet::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with("Page") {
            continue;
        }
        let Some((key_part, value_part)) = line.split_once(" = ") else {
            continue;
        };
        let Some((namespace, key)) = key_part.trim().split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let namespace = namespace.trim();
        if namespace != NVS_NAMESPACE {
            log::debug!("Keeping key {}:{} from a foreign namespace", namespace, key);
        }
        records.insert(key, clean_value(value_part));
    }

    records
}

/// Strip the `b'...'` wrapper and NUL padding the decoder prints
pub fn clean_value(raw: &str) -> String {
    let mut value = raw.trim();
    if value.len() >= 3 && value.starts_with("b'") && value.ends_with('\'') {
        value = &value[2..value.len() - 1];
    }
    value
        .replace("\\x00", "")
        .trim_end_matches('\0')
        .to_string()
}
