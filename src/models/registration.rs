//! Registration request/response records

use serde::{Deserialize, Serialize};

use super::nvs::{NvsRecordSet, NvsValue};
use super::provisioning::keys;

/// Parameters identifying the device to the management server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub server_url: String,
    /// Camera serial number
    pub c_sn: String,
    /// Unit serial number, also the device account's username
    pub u_sn: String,
    pub u_url: String,
    /// Hardware camera id, sent as the camera's sensor binding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub g_camera_id: Option<String>,
}

/// Identity and credentials obtained from the management server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub u_camera_id: u64,
    pub u_unit_id: u64,
    pub u_account_id: u64,
    pub password: String,
    pub device_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c_sensor: Option<String>,
}

impl RegistrationResult {
    /// Records written to NVS after a successful registration
    pub fn to_records(&self, request: &RegistrationRequest, mac: Option<&str>) -> NvsRecordSet {
        let mut records = NvsRecordSet::new();
        records.insert(keys::C_SN, request.c_sn.as_str());
        records.insert(keys::U_SN, request.u_sn.as_str());
        records.insert(keys::DEVICE_TOKEN, self.device_token.as_str());
        records.insert(keys::U_CAMERA_ID, NvsValue::Integer(self.u_camera_id));
        records.insert(keys::U_UNIT_ID, NvsValue::Integer(self.u_unit_id));
        records.insert(keys::U_ACCOUNT_ID, NvsValue::Integer(self.u_account_id));
        records.insert(keys::PASSWORD, self.password.as_str());
        records.insert(keys::U_URL, request.u_url.as_str());
        records.insert(keys::SERVER_URL, request.server_url.as_str());
        if let Some(sensor) = &self.c_sensor {
            records.insert(keys::C_SENSOR, sensor.as_str());
        }
        if let Some(mac) = mac {
            records.insert(keys::MAC, mac);
        }
        records
    }
}

/// Request parameters as written to the run artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRequest {
    pub server_url: String,
    pub c_sn: String,
    pub u_sn: String,
    pub u_url: String,
}

/// Audit record pairing the input parameters with the obtained identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArtifact {
    pub request: ArtifactRequest,
    pub response: RegistrationResult,
}

impl RunArtifact {
    pub fn new(request: &RegistrationRequest, response: RegistrationResult) -> Self {
        Self {
            request: ArtifactRequest {
                server_url: request.server_url.clone(),
                c_sn: request.c_sn.clone(),
                u_sn: request.u_sn.clone(),
                u_url: request.u_url.clone(),
            },
            response,
        }
    }
}
