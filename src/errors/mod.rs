//! Error types for provisioning operations

pub mod types;

pub use types::*;
