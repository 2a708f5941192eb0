//! NVS records and record sets
//!
//! All keys live in a single fixed namespace. A record's type is never
//! stored independently of its value: it is derived by [`infer_type`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// The namespace every provisioning key is written to
pub const NVS_NAMESPACE: &str = "factory";

/// NVS entry encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NvsType {
    U32,
    String,
}

impl NvsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NvsType::U32 => "u32",
            NvsType::String => "string",
        }
    }
}

impl fmt::Display for NvsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value as produced by a decoder or a provisioning step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NvsValue {
    Integer(u64),
    Text(String),
}

impl NvsValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            NvsValue::Text(text) => Some(text),
            NvsValue::Integer(_) => None,
        }
    }
}

impl fmt::Display for NvsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NvsValue::Integer(value) => write!(f, "{}", value),
            NvsValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for NvsValue {
    fn from(value: &str) -> Self {
        NvsValue::Text(value.to_string())
    }
}

impl From<String> for NvsValue {
    fn from(value: String) -> Self {
        NvsValue::Text(value)
    }
}

impl From<u64> for NvsValue {
    fn from(value: u64) -> Self {
        NvsValue::Integer(value)
    }
}

/// Classify a value: integers and non-empty all-digit strings are `u32`,
/// everything else is `string`.
pub fn infer_type(value: &NvsValue) -> NvsType {
    match value {
        NvsValue::Integer(_) => NvsType::U32,
        NvsValue::Text(text) => {
            if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
                NvsType::U32
            } else {
                NvsType::String
            }
        }
    }
}

/// One key in the provisioning namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvsRecord {
    key: String,
    value: NvsValue,
    nvs_type: NvsType,
}

impl NvsRecord {
    pub fn new(key: impl Into<String>, value: impl Into<NvsValue>) -> Self {
        let value = value.into();
        Self {
            key: key.into(),
            nvs_type: infer_type(&value),
            value,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &NvsValue {
        &self.value
    }

    pub fn nvs_type(&self) -> NvsType {
        self.nvs_type
    }
}

/// Insertion-ordered set of records with unique keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NvsRecordSet {
    records: Vec<NvsRecord>,
}

impl NvsRecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a key. A replaced key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<NvsValue>) {
        let record = NvsRecord::new(key, value);
        match self.records.iter_mut().find(|r| r.key == record.key) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    pub fn get(&self, key: &str) -> Option<&NvsValue> {
        self.records
            .iter()
            .find(|r| r.key == key)
            .map(|r| &r.value)
    }

    /// Textual form of a value regardless of how it was stored
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.records.iter().any(|r| r.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &NvsRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Overlay `new` on top of `old`: keys only in `old` survive verbatim,
    /// keys in both take `new`'s value.
    pub fn merge(old: &NvsRecordSet, new: &NvsRecordSet) -> NvsRecordSet {
        let mut merged = old.clone();
        for record in &new.records {
            merged.insert(record.key.clone(), record.value.clone());
        }
        merged
    }
}

impl<K, V> FromIterator<(K, V)> for NvsRecordSet
where
    K: Into<String>,
    V: Into<NvsValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = NvsRecordSet::new();
        for (key, value) in iter {
            set.insert(key, value);
        }
        set
    }
}
