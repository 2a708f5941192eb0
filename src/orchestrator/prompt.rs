use async_trait::async_trait;

use crate::models::DeviceProvisioningRecord;

/// Operator decisions requested during a run
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    /// Whether an already provisioned device should be registered again
    async fn confirm_reprovision(&self, record: &DeviceProvisioningRecord) -> bool;
}

/// Prompt with a preset answer, for unattended runs
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

#[async_trait]
impl OperatorPrompt for FixedAnswer {
    async fn confirm_reprovision(&self, _record: &DeviceProvisioningRecord) -> bool {
        self.0
    }
}
