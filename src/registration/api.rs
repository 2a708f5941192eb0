//! Registration calls consumed from the management server

use async_trait::async_trait;

use crate::errors::Result;

/// Status written to newly created camera and unit records
pub const NOT_CONNECTED_STATUS: &str = "NVCONNCTD";

/// Account type of device logins
pub const DEVICE_ACCOUNT_TYPE: &str = "Device";

/// Operations of the device management server used during registration.
///
/// Connection failures surface as `TransientLink`, structured rejections
/// as `RemoteRejection`. Callers must not retry: every create call adds a
/// backend record.
#[async_trait]
pub trait RegistrationApi: Send + Sync {
    /// Id of the camera registered under `c_sn`, if any
    async fn query_existing_camera(&self, c_sn: &str) -> Result<Option<u64>>;

    async fn create_camera(&self, c_sn: &str, sensor: Option<&str>) -> Result<u64>;

    async fn create_unit(&self, u_sn: &str, camera_id: u64, url: Option<&str>) -> Result<u64>;

    /// Create the device login; returns the account id and its password
    async fn create_account(&self, u_sn: &str) -> Result<(u64, String)>;

    /// Exchange credentials for a session token
    async fn authenticate(&self, username: &str, password: &str) -> Result<String>;
}
