//! Data models and types used throughout the provisioning flows

pub mod events;
pub mod flash;
pub mod nvs;
pub mod partition;
pub mod provisioning;
pub mod registration;

// Re-export commonly used types
pub use events::*;
pub use flash::*;
pub use nvs::*;
pub use partition::*;
pub use provisioning::*;
pub use registration::*;
