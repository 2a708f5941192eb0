//! Ports command implementation

use anyhow::Result;

use crate::device::{PORT_ENV_VAR, find_esp_ports};

pub async fn execute_ports_command() -> Result<()> {
    let ports = find_esp_ports()?;

    if ports.is_empty() {
        println!("❌ No ESP32-compatible serial ports found");
        return Ok(());
    }

    println!("🔌 ESP32-compatible serial ports:");
    for port in &ports {
        println!("   {}", port);
    }
    if let Ok(port) = std::env::var(PORT_ENV_VAR) {
        println!("   ({} is set to {})", PORT_ENV_VAR, port);
    }
    Ok(())
}
