//! Canonical CSV form consumed by the NVS partition generator

use crate::errors::{ProvisionError, Result};
use crate::models::{NVS_NAMESPACE, NvsRecordSet, NvsType};

/// Longest key the NVS format accepts
pub const MAX_KEY_LEN: usize = 15;

pub const CSV_HEADER: &str = "key,type,encoding,value";

/// Render records as `key,type,encoding,value` CSV in record order
pub fn render_csv(records: &NvsRecordSet) -> Result<String> {
    let mut out = String::new();
    out.push_str(CSV_HEADER);
    out.push('\n');
    out.push_str(&format!("{},namespace,,\n", NVS_NAMESPACE));

    for record in records.iter() {
        let key = record.key();
        let value = record.value().to_string();

        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(encode_error(format!(
                "key '{}' must be 1..={} characters",
                key, MAX_KEY_LEN
            )));
        }
        if [key, value.as_str()]
            .iter()
            .any(|field| field.contains([',', '\n', '\r', '"']))
        {
            return Err(encode_error(format!(
                "value of '{}' contains a character the CSV form cannot carry",
                key
            )));
        }
        if record.nvs_type() == NvsType::U32 && value.parse::<u32>().is_err() {
            return Err(encode_error(format!(
                "value of '{}' ({}) is out of range for u32",
                key, value
            )));
        }

        out.push_str(&format!("{},data,{},{}\n", key, record.nvs_type(), value));
    }

    Ok(out)
}

fn encode_error(reason: String) -> ProvisionError {
    ProvisionError::Encode {
        reason,
        output: None,
    }
}
