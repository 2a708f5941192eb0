//! Device registration with the management server

pub mod api;
pub mod http;
pub mod password;
pub mod register;

pub use api::*;
pub use http::*;
pub use password::*;
pub use register::*;
