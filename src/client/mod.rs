//! Client module - endpoint registry and the HTTP executor.

mod http;
mod registry;

pub use http::*;
pub use registry::*;
