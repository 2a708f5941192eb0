//! Serial device access through the flashing tool

pub mod link;
pub mod ports;

pub use link::*;
pub use ports::*;
