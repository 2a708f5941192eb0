//! Registration sequence and run artifact persistence

use std::path::Path;

use crate::errors::{ProvisionError, Result};
use crate::models::{RegistrationRequest, RegistrationResult, RunArtifact};

use super::api::RegistrationApi;

/// Register a device: camera, then unit, then account, then token.
///
/// A camera already known under `c_sn` stops the sequence before anything
/// is created. A failure part way through leaves the records created so
/// far on the server; nothing is rolled back.
pub async fn register_device(
    api: &dyn RegistrationApi,
    request: &RegistrationRequest,
) -> Result<RegistrationResult> {
    log::info!("Registering {} / {} with {}", request.c_sn, request.u_sn, request.server_url);

    if let Some(existing) = api.query_existing_camera(&request.c_sn).await? {
        return Err(ProvisionError::rejected(
            "Registration server",
            format!(
                "camera SN '{}' is already registered with ID {}; change the serial number in the configuration",
                request.c_sn, existing
            ),
        ));
    }

    let sensor = request.g_camera_id.as_deref();
    let u_camera_id = api.create_camera(&request.c_sn, sensor).await?;
    let url = Some(request.u_url.as_str()).filter(|u| !u.is_empty());
    let u_unit_id = api.create_unit(&request.u_sn, u_camera_id, url).await?;
    let (u_account_id, password) = api.create_account(&request.u_sn).await?;
    let device_token = api.authenticate(&request.u_sn, &password).await?;

    log::info!(
        "Registration complete: camera={} unit={} account={}",
        u_camera_id,
        u_unit_id,
        u_account_id
    );

    Ok(RegistrationResult {
        u_camera_id,
        u_unit_id,
        u_account_id,
        password,
        device_token,
        c_sensor: request.g_camera_id.clone(),
    })
}

/// Write the request/response record as pretty JSON
pub fn save_run_artifact(path: &Path, artifact: &RunArtifact) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(artifact)?;
    std::fs::write(path, json)?;
    log::info!("Registration record saved to {}", path.display());
    Ok(())
}

pub fn load_run_artifact(path: &Path) -> Result<RunArtifact> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
