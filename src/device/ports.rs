//! Serial port discovery

use crate::errors::{ProvisionError, Result};

/// Environment variable overriding port selection
pub const PORT_ENV_VAR: &str = "ESPFLASH_PORT";

/// List serial ports that look like an ESP32 USB connection
pub fn find_esp_ports() -> Result<Vec<String>> {
    log::debug!("Scanning for ESP32-compatible serial ports...");

    let ports = serialport::available_ports()
        .map_err(|e| ProvisionError::TransientLink(format!("cannot list serial ports: {}", e)))?;

    let esp_ports: Vec<String> = ports
        .into_iter()
        .filter(|port| {
            is_esp_port_name(&port.port_name)
                || matches!(port.port_type, serialport::SerialPortType::UsbPort(_))
        })
        .map(|port| port.port_name)
        .collect();

    log::debug!("Found {} ESP32-compatible serial ports", esp_ports.len());
    for port in &esp_ports {
        log::debug!("  {}", port);
    }
    Ok(esp_ports)
}

/// USB serial device names on macOS and Linux
pub fn is_esp_port_name(name: &str) -> bool {
    [
        "/dev/cu.usbmodem",
        "/dev/cu.usbserial",
        "/dev/tty.usbmodem",
        "/dev/tty.usbserial",
        "/dev/ttyUSB",
        "/dev/ttyACM",
    ]
    .iter()
    .any(|prefix| name.starts_with(prefix))
}

/// Pick the port to use: explicit value, then `ESPFLASH_PORT`, then the
/// first detected port.
pub fn select_port(configured: Option<&str>) -> Result<String> {
    if let Some(port) = configured.filter(|p| !p.trim().is_empty()) {
        return Ok(port.trim().to_string());
    }

    if let Ok(port) = std::env::var(PORT_ENV_VAR) {
        if !port.trim().is_empty() {
            log::info!("Using port from {}: {}", PORT_ENV_VAR, port);
            return Ok(port.trim().to_string());
        }
    }

    let ports = find_esp_ports()?;
    match ports.as_slice() {
        [] => Err(ProvisionError::TransientLink(
            "no ESP32-compatible serial ports found; connect the device via USB or pass --port"
                .to_string(),
        )),
        [port] => {
            log::info!("Auto-selected single available port: {}", port);
            Ok(port.clone())
        }
        [first, ..] => {
            log::warn!(
                "Multiple ports available, auto-selected first: {} (set {} to override)",
                first,
                PORT_ENV_VAR
            );
            log::warn!("Available ports: {}", ports.join(", "));
            Ok(first.clone())
        }
    }
}
