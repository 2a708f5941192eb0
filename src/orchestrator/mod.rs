//! Provisioning run sequencing

pub mod failure;
pub mod prompt;
pub mod runner;

pub use failure::*;
pub use prompt::*;
pub use runner::*;
