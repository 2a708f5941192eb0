//! Application configuration management
//!
//! The configuration is read once and then handed to each component's
//! constructor. Nothing in the crate keeps configuration in global state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{ProvisionError, Result};

/// Main provisioning configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Serial link and flash parameters
    pub device: DeviceConfig,
    /// External tool locations
    pub tools: ToolsConfig,
    /// Artifact and working directories
    pub paths: PathsConfig,
    /// Device management server parameters
    pub registration: RegistrationConfig,
    /// Model conversion service parameters
    pub conversion: ConversionConfig,
}

/// Serial link and flash parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port; auto-detected when absent
    pub port: Option<String>,
    pub baud_rate: u32,
    pub chip: String,
    pub flash_mode: String,
    pub flash_freq: String,
    pub flash_size: String,
    /// Firmware build type, a directory under `paths.build_types_root`
    pub bin_type: String,
    /// Model type, a directory under `paths.model_types_root`
    pub model_type: String,
}

/// External tool locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Flasher command line, e.g. `["esptool.py"]` or `["python", "-m", "esptool"]`
    pub esptool: Vec<String>,
    /// Python interpreter with the ESP-IDF packages installed
    pub python: PathBuf,
    /// NVS decoder script
    pub nvs_tool_script: PathBuf,
    /// NVS partition generator module
    pub nvs_gen_module: String,
    /// FAT image generator script
    pub fatfs_gen_script: PathBuf,
    /// Seconds to wait for the reset command before assuming the device rebooted
    pub reset_timeout_secs: u64,
}

/// Artifact and working directories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding one sub-directory per firmware build type
    pub build_types_root: PathBuf,
    /// Directory holding one sub-directory per model type
    pub model_types_root: PathBuf,
    /// Scratch directory, destroyed and recreated at the start of every run
    pub work_dir: PathBuf,
    /// Where the registration request/response record is written
    pub run_artifact: PathBuf,
}

/// Device management server parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub server_url: String,
    /// Admin token per server URL
    pub admin_tokens: BTreeMap<String, String>,
    /// Camera serial number
    pub c_sn: String,
    /// Unit serial number
    pub u_sn: String,
    pub u_url: String,
    pub timeout_secs: u64,
}

/// Model conversion service parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// OAuth domain issuing client-credentials tokens
    pub auth_domain: String,
    /// Conversion/packaging API domain
    pub system_domain: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub poll_interval_secs: u64,
    pub network_type: String,
    pub input_format: String,
    pub ordinal: u32,
    pub key_generation: String,
    pub packager_version: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 460800,
            chip: "esp32p4".to_string(),
            flash_mode: "dio".to_string(),
            flash_freq: "80m".to_string(),
            flash_size: "16MB".to_string(),
            bin_type: "ped_alarm".to_string(),
            model_type: "ped_alarm".to_string(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            esptool: vec!["esptool.py".to_string()],
            python: PathBuf::from("python"),
            nvs_tool_script: PathBuf::from("esp_components/nvs_tools/nvs_tool.py"),
            nvs_gen_module: "esp_idf_nvs_partition_gen".to_string(),
            fatfs_gen_script: PathBuf::from("esp_components/fatfs_tools/wl_fatfsgen.py"),
            reset_timeout_secs: 10,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            build_types_root: PathBuf::from("bin_type"),
            model_types_root: PathBuf::from("type_model"),
            work_dir: PathBuf::from("temp"),
            run_artifact: PathBuf::from("as_respond.json"),
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            admin_tokens: BTreeMap::new(),
            c_sn: String::new(),
            u_sn: String::new(),
            u_url: "127.0.0.1".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            auth_domain: String::new(),
            system_domain: String::new(),
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            poll_interval_secs: 10,
            network_type: "1".to_string(),
            input_format: "RGB".to_string(),
            ordinal: 0,
            key_generation: "0001".to_string(),
            packager_version: "4.00.00".to_string(),
        }
    }
}

impl ProvisionConfig {
    /// Load configuration from a `.json` or `.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::config(format!(
                "cannot read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let config: ProvisionConfig = if is_json {
            serde_json::from_str(&content).map_err(|e| {
                ProvisionError::config(format!("failed to parse {}: {}", path.display(), e))
            })?
        } else {
            toml::from_str(&content)?
        };

        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Write configuration as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl DeviceConfig {
    /// Flash size in bytes, `None` for sizes the flasher detects itself
    pub fn flash_size_bytes(&self) -> Option<u64> {
        let size = self.flash_size.trim().to_ascii_uppercase();
        let megabytes = size.strip_suffix("MB")?.trim().parse::<u64>().ok()?;
        Some(megabytes * 1024 * 1024)
    }
}

impl ToolsConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

impl RegistrationConfig {
    /// Check that all parameters needed to register a device are present
    pub fn validate(&self) -> Result<()> {
        self.require_identity()?;
        self.admin_token()?;
        Ok(())
    }

    /// Check the parameters identifying the device to the server
    pub fn require_identity(&self) -> Result<()> {
        let required = [
            ("server_url", &self.server_url),
            ("c_sn", &self.c_sn),
            ("u_sn", &self.u_sn),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ProvisionError::config(format!(
                    "missing configuration parameter: registration.{}",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Admin token for the configured server
    pub fn admin_token(&self) -> Result<&str> {
        let server = self.server_url.trim_end_matches('/');
        self.admin_tokens
            .iter()
            .find(|(url, _)| url.trim_end_matches('/') == server)
            .map(|(_, token)| token.as_str())
            .ok_or_else(|| {
                let available: Vec<&str> =
                    self.admin_tokens.keys().map(|k| k.as_str()).collect();
                ProvisionError::config(format!(
                    "no admin token for server '{}'; configured servers: [{}]",
                    self.server_url,
                    available.join(", ")
                ))
            })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ConversionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
