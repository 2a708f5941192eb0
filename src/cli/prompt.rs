//! Interactive operator prompt

use async_trait::async_trait;
use std::io::Write;

use crate::models::DeviceProvisioningRecord;
use crate::orchestrator::OperatorPrompt;

/// Asks the operator on stdin
pub struct StdinPrompt;

#[async_trait]
impl OperatorPrompt for StdinPrompt {
    async fn confirm_reprovision(&self, record: &DeviceProvisioningRecord) -> bool {
        println!();
        println!("✅ Device is already registered and g_camera_id is valid");
        if let Some(id) = record.g_camera_id() {
            println!("   g_camera_id: {}", id);
        }
        print!("❓ Register it again? (y/n): ");
        let _ = std::io::stdout().flush();

        let answer = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => line.trim().eq_ignore_ascii_case("y"),
            _ => false,
        }
    }
}
