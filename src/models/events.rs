//! Progress events emitted during a provisioning run

use super::provisioning::{ProvisioningState, Stage};

/// Events sent to an optional progress channel while a run executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionEvent {
    StageStarted(Stage),
    StageCompleted(Stage),
    StateChanged(ProvisioningState),
    /// Free-form progress line
    Output(String),
    /// Operator guidance that must be shown even in quiet mode
    Guidance(String),
}
