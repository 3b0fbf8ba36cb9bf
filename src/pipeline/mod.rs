//! Pipeline module - multi-hop generation over sampled chunk groupings.

mod multihop;

pub use multihop::*;
