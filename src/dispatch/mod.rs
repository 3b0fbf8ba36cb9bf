//! Dispatch module - fans calls out to endpoints under per-endpoint limits.

mod backoff;
mod dispatcher;
mod executor;
mod state;

pub use backoff::*;
pub use dispatcher::*;
pub use executor::*;
pub use state::*;
