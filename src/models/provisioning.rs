//! Device provisioning record and session state machine

use serde::{Deserialize, Serialize};
use std::fmt;

use super::nvs::{NvsRecordSet, NvsValue};
use crate::errors::{ProvisionError, Result};

/// Well-known NVS keys
pub mod keys {
    pub const G_CAMERA_ID: &str = "g_camera_id";
    pub const U_CAMERA_ID: &str = "u_camera_id";
    pub const U_UNIT_ID: &str = "u_unit_id";
    pub const U_ACCOUNT_ID: &str = "u_account_id";
    pub const PASSWORD: &str = "password";
    pub const DEVICE_TOKEN: &str = "device_token";
    pub const C_SENSOR: &str = "c_sensor";
    pub const C_SN: &str = "c_sn";
    pub const U_SN: &str = "u_sn";
    pub const U_URL: &str = "u_url";
    pub const SERVER_URL: &str = "server_url";
    pub const MAC: &str = "mac";
    pub const IS_MODEL_UPDATE: &str = "is_model_update";
}

/// Length of a hardware camera identity
pub const G_CAMERA_ID_LEN: usize = 32;

/// Prefix every 32-character camera identity must carry
pub const G_CAMERA_ID_PREFIX: &str = "100B";

/// Rewrite the first four characters of a 32-character camera id to the
/// canonical prefix. Returns `None` when nothing has to change.
pub fn correct_camera_id(id: &str) -> Option<String> {
    if id.chars().count() != G_CAMERA_ID_LEN {
        return None;
    }
    let prefix_len = G_CAMERA_ID_PREFIX.chars().count();
    let current: String = id.chars().take(prefix_len).collect();
    if current == G_CAMERA_ID_PREFIX {
        return None;
    }
    let rest: String = id.chars().skip(prefix_len).collect();
    Some(format!("{}{}", G_CAMERA_ID_PREFIX, rest))
}

/// A camera id the backend and the model service can bind to
pub fn is_usable_camera_id(id: &str) -> bool {
    id.len() == G_CAMERA_ID_LEN
        && id.starts_with(G_CAMERA_ID_PREFIX)
        && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Everything the device keeps in its provisioning namespace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceProvisioningRecord {
    records: NvsRecordSet,
}

impl DeviceProvisioningRecord {
    /// Record for a device whose NVS partition is blank
    pub fn blank() -> Self {
        Self::default()
    }

    /// Wrap decoded records, correcting the camera id prefix when needed
    pub fn from_records(mut records: NvsRecordSet) -> Self {
        if let Some(original) = records.get_string(keys::G_CAMERA_ID) {
            if let Some(corrected) = correct_camera_id(&original) {
                log::warn!("g_camera_id prefix corrected");
                log::warn!("  original:  {}", original);
                log::warn!("  corrected: {}", corrected);
                records.insert(keys::G_CAMERA_ID, corrected);
            }
        }
        Self { records }
    }

    pub fn records(&self) -> &NvsRecordSet {
        &self.records
    }

    pub fn into_records(self) -> NvsRecordSet {
        self.records
    }

    pub fn g_camera_id(&self) -> Option<String> {
        self.records
            .get_string(keys::G_CAMERA_ID)
            .filter(|id| !id.is_empty())
    }

    pub fn has_usable_camera_id(&self) -> bool {
        self.g_camera_id()
            .map(|id| is_usable_camera_id(&id))
            .unwrap_or(false)
    }

    /// Overlay new values; keys not in `updates` are kept
    pub fn apply(&mut self, updates: &NvsRecordSet) {
        self.records = NvsRecordSet::merge(&self.records, updates);
    }

    pub fn set(&mut self, key: &str, value: impl Into<NvsValue>) {
        self.records.insert(key, value);
    }

    pub fn model_update_pending(&self) -> bool {
        self.records.get_string(keys::IS_MODEL_UPDATE).as_deref() == Some("1")
    }
}

/// Classification of a device from its NVS partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceClassification {
    /// Blank partition, never provisioned
    Unprovisioned,
    /// Decoded and carries a usable camera id
    ProvisionedValid(DeviceProvisioningRecord),
    /// Decoded but the device never generated its camera id
    ProvisionedInvalid(DeviceProvisioningRecord),
}

impl DeviceClassification {
    pub fn from_record(record: DeviceProvisioningRecord) -> Self {
        if record.has_usable_camera_id() {
            DeviceClassification::ProvisionedValid(record)
        } else {
            DeviceClassification::ProvisionedInvalid(record)
        }
    }

    pub fn state(&self) -> ProvisioningState {
        match self {
            DeviceClassification::Unprovisioned => ProvisioningState::Unprovisioned,
            DeviceClassification::ProvisionedValid(_) => ProvisioningState::ProvisionedValid,
            DeviceClassification::ProvisionedInvalid(_) => ProvisioningState::ProvisionedInvalid,
        }
    }
}

/// Lifecycle of one device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    /// Session opened, nothing read yet
    Reading,
    Unprovisioned,
    ProvisionedValid,
    ProvisionedInvalid,
    Registering,
    ModelPending,
    Merging,
    Encoding,
    Flashing,
    Done,
    Aborted,
}

impl ProvisioningState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProvisioningState::Done | ProvisioningState::Aborted)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: ProvisioningState) -> bool {
        use ProvisioningState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Aborted {
            return true;
        }
        match (self, next) {
            (Reading, Unprovisioned | ProvisionedValid | ProvisionedInvalid) => true,
            // firmware images are written without looking at NVS
            (Reading, Flashing) => true,
            (Unprovisioned, Registering) => true,
            (ProvisionedValid, Registering | ModelPending | Merging | Done) => true,
            (Registering, Merging) => true,
            (ModelPending, Flashing) => true,
            (Merging, Encoding) => true,
            (Encoding, Flashing) => true,
            // model image written, flag update follows
            (Flashing, Merging) => true,
            (Flashing, Done) => true,
            _ => false,
        }
    }
}

impl ProvisioningState {
    /// Checked move to `next`
    pub fn transition_to(self, next: ProvisioningState) -> Result<ProvisioningState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ProvisionError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Step of a provisioning run, used to report how far a run got
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Prepare,
    ReadNvs,
    Decode,
    Classify,
    Register,
    ConvertModel,
    BuildImage,
    Merge,
    Encode,
    Flash,
    Reset,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Prepare => "prepare",
            Stage::ReadNvs => "read NVS",
            Stage::Decode => "decode NVS",
            Stage::Classify => "classify device",
            Stage::Register => "register device",
            Stage::ConvertModel => "convert model",
            Stage::BuildImage => "build image",
            Stage::Merge => "merge records",
            Stage::Encode => "encode NVS",
            Stage::Flash => "flash",
            Stage::Reset => "reset",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}
