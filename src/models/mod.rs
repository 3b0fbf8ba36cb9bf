//! Core data models for fanout.
//!
//! Epistemic mapping:
//! - K_i (Knowledge): Descriptors and value types with checked construction
//! - B_i (Beliefs): Remote outcomes wrapped in Outcome/Result
//! - I^R (Resolvable): Config parameters
//! - I^B (Bounded): Error variants captured per call

mod call;
mod config;
mod endpoint;
mod error;
mod record;

pub use call::*;
pub use config::*;
pub use endpoint::*;
pub use error::*;
pub use record::*;
