//! Combination sampler - uniform k-subsets without enumerating C(n,k).

mod colex;
mod combinations;
mod floyd;

pub use colex::*;
pub use combinations::*;
pub use floyd::*;
