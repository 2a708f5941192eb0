//! NVS partition codec
//!
//! The binary layout is handled by external ESP-IDF tools. This module
//! owns blank detection, the textual dump and CSV formats, and the
//! merge-then-encode round trip.

pub mod codec;
pub mod csv;
pub mod dump;

pub use codec::*;
pub use csv::*;
pub use dump::*;
