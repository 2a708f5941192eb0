//! Utility functions and helpers used throughout the provisioning tool

pub mod fs;
pub mod logging;
