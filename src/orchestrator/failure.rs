use std::fmt;

use crate::errors::{ErrorKind, ProvisionError};
use crate::models::Stage;

/// Terminal error of a provisioning run with the furthest stage it reached
#[derive(Debug)]
pub struct RunFailure {
    /// Flow that was running (`info`, `firmware`, `model`, `flag`)
    pub flow: &'static str,
    pub stage: Stage,
    pub error: ProvisionError,
}

impl RunFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Operator advice for resuming after this failure
    pub fn advice(&self) -> &'static str {
        match self.kind() {
            ErrorKind::TransientLink => {
                "Check the cable, the serial port and the network, then re-run the same step."
            }
            ErrorKind::PartialWriteRisk => {
                "A flash write failed; the partition content is undefined. Re-run the flash step before using the device."
            }
            ErrorKind::Precondition => {
                "Power the device on once so it can generate its camera id, then re-run."
            }
            ErrorKind::RemoteRejection => {
                "The server rejected the request. Review the configuration before retrying; records created so far are not removed."
            }
            ErrorKind::MalformedData => "Check the build artifacts and the device data.",
            ErrorKind::Config => "Fix the configuration file and re-run.",
            ErrorKind::Io => "Check the working directory permissions and free space.",
            ErrorKind::Internal => "This is a bug in the provisioning tool. Report it together with the log.",
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} flow aborted at stage '{}': {}",
            self.flow, self.stage, self.error
        )
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Result of a provisioning flow
pub type RunResult<T> = std::result::Result<T, RunFailure>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProvisioningState;

    #[test]
    fn test_sequencing_bug_is_not_reported_as_device_precondition() {
        let failure = RunFailure {
            flow: "flag",
            stage: Stage::Merge,
            error: ProvisionError::InvalidTransition {
                from: ProvisioningState::Done,
                to: ProvisioningState::Merging,
            },
        };
        assert_eq!(failure.kind(), ErrorKind::Internal);
        assert!(!failure.advice().contains("Power the device on"));
        assert!(failure.to_string().contains("Done -> Merging"));
    }
}
