//! Custom error types for MS500 provisioning
//!
//! Every failure that comes out of an external tool keeps the tool's full
//! stdout/stderr so the operator can see exactly what the flasher or the
//! NVS generator printed.

use std::fmt;

use crate::models::ProvisioningState;
use crate::tools::ToolOutput;

/// Broad failure classes used to decide how a run is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Serial or network hiccup; the operator should check the connection and re-run
    TransientLink,
    /// Unparseable partition table, undecodable NVS image, nothing to flash
    MalformedData,
    /// The device lacks a value it must generate itself
    Precondition,
    /// A remote service answered with a structured failure
    RemoteRejection,
    /// A flash write failed and the partition content is undefined
    PartialWriteRisk,
    /// Invalid or missing configuration
    Config,
    /// Local filesystem failure
    Io,
    /// The orchestrator itself sequenced its steps wrongly
    Internal,
}

/// Device operation issued through the flashing tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOperation {
    ReadFlash,
    WriteFlash,
    ChipId,
    ReadMac,
    Reset,
}

impl fmt::Display for LinkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkOperation::ReadFlash => "read_flash",
            LinkOperation::WriteFlash => "write_flash",
            LinkOperation::ChipId => "chip_id",
            LinkOperation::ReadMac => "read_mac",
            LinkOperation::Reset => "run",
        };
        f.write_str(name)
    }
}

/// Main error type for provisioning operations
#[derive(Debug)]
pub enum ProvisionError {
    /// Configuration related errors
    Config(String),
    /// A partition table row could not be parsed
    MalformedTable { line: usize, reason: String },
    /// A named partition is absent from the table
    PartitionNotFound(String),
    /// The NVS image has data but could not be decoded
    Decode {
        reason: String,
        output: Option<ToolOutput>,
    },
    /// The NVS image could not be generated
    Encode {
        reason: String,
        output: Option<ToolOutput>,
    },
    /// A filesystem image for a data partition could not be built
    ImageBuild {
        reason: String,
        output: Option<ToolOutput>,
    },
    /// Other malformed input (empty flash plan, invalid model assembly)
    MalformedData(String),
    /// The flashing tool exited non-zero
    Link {
        operation: LinkOperation,
        port: String,
        output: ToolOutput,
    },
    /// Connection level failure without tool output (HTTP connect, missing MAC)
    TransientLink(String),
    /// The device state does not allow this step
    Precondition(String),
    /// A flow attempted a state change the state machine forbids
    InvalidTransition {
        from: ProvisioningState,
        to: ProvisioningState,
    },
    /// A remote service rejected the request
    RemoteRejection { service: String, message: String },
    /// General I/O errors
    Io(std::io::Error),
    /// Serialization errors
    Serialization(String),
}

impl ProvisionError {
    pub fn config(msg: impl Into<String>) -> Self {
        ProvisionError::Config(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        ProvisionError::MalformedData(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        ProvisionError::Precondition(msg.into())
    }

    pub fn rejected(service: impl Into<String>, message: impl Into<String>) -> Self {
        ProvisionError::RemoteRejection {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Failure class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvisionError::Config(_) => ErrorKind::Config,
            ProvisionError::MalformedTable { .. }
            | ProvisionError::PartitionNotFound(_)
            | ProvisionError::Decode { .. }
            | ProvisionError::Encode { .. }
            | ProvisionError::ImageBuild { .. }
            | ProvisionError::MalformedData(_)
            | ProvisionError::Serialization(_) => ErrorKind::MalformedData,
            ProvisionError::Link { operation, .. } => {
                if *operation == LinkOperation::WriteFlash {
                    ErrorKind::PartialWriteRisk
                } else {
                    ErrorKind::TransientLink
                }
            }
            ProvisionError::TransientLink(_) => ErrorKind::TransientLink,
            ProvisionError::Precondition(_) => ErrorKind::Precondition,
            ProvisionError::InvalidTransition { .. } => ErrorKind::Internal,
            ProvisionError::RemoteRejection { .. } => ErrorKind::RemoteRejection,
            ProvisionError::Io(_) => ErrorKind::Io,
        }
    }

    /// Raw external tool output attached to this error, if any
    pub fn tool_output(&self) -> Option<&ToolOutput> {
        match self {
            ProvisionError::Link { output, .. } => Some(output),
            ProvisionError::Decode { output, .. }
            | ProvisionError::Encode { output, .. }
            | ProvisionError::ImageBuild { output, .. } => output.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ProvisionError::MalformedTable { line, reason } => {
                write!(f, "Malformed partition table at line {}: {}", line, reason)
            }
            ProvisionError::PartitionNotFound(name) => {
                write!(f, "Partition '{}' not found in partition table", name)
            }
            ProvisionError::Decode { reason, output } => {
                write!(f, "NVS decode failed: {}", reason)?;
                if let Some(output) = output {
                    write!(f, "\n{}", output.diagnostic())?;
                }
                Ok(())
            }
            ProvisionError::Encode { reason, output } => {
                write!(f, "NVS encode failed: {}", reason)?;
                if let Some(output) = output {
                    write!(f, "\n{}", output.diagnostic())?;
                }
                Ok(())
            }
            ProvisionError::ImageBuild { reason, output } => {
                write!(f, "Image build failed: {}", reason)?;
                if let Some(output) = output {
                    write!(f, "\n{}", output.diagnostic())?;
                }
                Ok(())
            }
            ProvisionError::MalformedData(msg) => write!(f, "Malformed data: {}", msg),
            ProvisionError::Link {
                operation,
                port,
                output,
            } => {
                writeln!(f, "Flash tool '{}' failed on {}", operation, port)?;
                writeln!(f, "Please check:")?;
                writeln!(f, "  1. The device is connected to {}", port)?;
                writeln!(f, "  2. The serial port name is correct")?;
                writeln!(f, "  3. The device is in download (bootloader) mode")?;
                writeln!(f, "  4. The port is not held by another program")?;
                write!(f, "{}", output.diagnostic())
            }
            ProvisionError::TransientLink(msg) => write!(f, "Connection error: {}", msg),
            ProvisionError::Precondition(msg) => write!(f, "Precondition failed: {}", msg),
            ProvisionError::InvalidTransition { from, to } => {
                write!(f, "Internal error: invalid state transition {} -> {}", from, to)
            }
            ProvisionError::RemoteRejection { service, message } => {
                write!(f, "{} rejected the request: {}", service, message)
            }
            ProvisionError::Io(err) => write!(f, "I/O error: {}", err),
            ProvisionError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for ProvisionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProvisionError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProvisionError {
    fn from(err: std::io::Error) -> Self {
        ProvisionError::Io(err)
    }
}

impl From<serde_json::Error> for ProvisionError {
    fn from(err: serde_json::Error) -> Self {
        ProvisionError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ProvisionError {
    fn from(err: toml::de::Error) -> Self {
        ProvisionError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ProvisionError {
    fn from(err: toml::ser::Error) -> Self {
        ProvisionError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for ProvisionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            ProvisionError::TransientLink(err.to_string())
        } else if err.is_decode() {
            ProvisionError::Serialization(err.to_string())
        } else {
            ProvisionError::TransientLink(format!("HTTP request failed: {}", err))
        }
    }
}

impl From<zip::result::ZipError> for ProvisionError {
    fn from(err: zip::result::ZipError) -> Self {
        ProvisionError::MalformedData(format!("invalid model archive: {}", err))
    }
}

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_failure_is_partial_write_risk() {
        let err = ProvisionError::Link {
            operation: LinkOperation::WriteFlash,
            port: "/dev/ttyUSB0".to_string(),
            output: ToolOutput::failed(2, "", "A fatal error occurred"),
        };
        assert_eq!(err.kind(), ErrorKind::PartialWriteRisk);
        assert!(err.to_string().contains("A fatal error occurred"));
        assert!(err.to_string().contains("bootloader"));
    }

    #[test]
    fn test_read_failure_is_transient() {
        let err = ProvisionError::Link {
            operation: LinkOperation::ReadFlash,
            port: "COM4".to_string(),
            output: ToolOutput::failed(1, "Connecting....", ""),
        };
        assert_eq!(err.kind(), ErrorKind::TransientLink);
        assert!(err.tool_output().is_some());
    }

    #[test]
    fn test_decode_and_table_errors_are_malformed_data() {
        let decode = ProvisionError::Decode {
            reason: "no entries".to_string(),
            output: None,
        };
        let table = ProvisionError::MalformedTable {
            line: 3,
            reason: "too few fields".to_string(),
        };
        assert_eq!(decode.kind(), ErrorKind::MalformedData);
        assert_eq!(table.kind(), ErrorKind::MalformedData);
        assert_eq!(
            ProvisionError::PartitionNotFound("nvs".into()).kind(),
            ErrorKind::MalformedData
        );
    }
}
