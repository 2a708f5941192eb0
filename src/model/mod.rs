//! Model preparation for the `storage_dl` partition

pub mod assembly;
pub mod converter;
pub mod provisioner;

pub use assembly::*;
pub use converter::*;
pub use provisioner::*;
