//! MS500 Provision - factory provisioning for MS500 / ESP32-P4 cameras
//!
//! Reads the device NVS partition, registers the device with the
//! management server, writes the resulting identity back to NVS, flashes
//! firmware images and converts and flashes the on-device AI model.

pub mod cli;
pub mod config;
pub mod device;
pub mod errors;
pub mod model;
pub mod models;
pub mod nvs;
pub mod orchestrator;
pub mod partition;
pub mod registration;
pub mod tools;
pub mod utils;

// Re-export commonly used types
pub use errors::*;
pub use models::*;
pub use orchestrator::{InfoOutcome, ProvisioningOrchestrator, RunFailure};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "ms500-provision";
