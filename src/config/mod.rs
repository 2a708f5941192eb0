//! Configuration management for provisioning runs

pub mod app_config;
pub mod build_types;

pub use app_config::*;
pub use build_types::*;
