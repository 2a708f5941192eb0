//! Partition table parsing and flash address resolution

pub mod plan;
pub mod table;

pub use plan::*;
pub use table::*;
