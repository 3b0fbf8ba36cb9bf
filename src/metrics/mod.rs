//! Metrics module - attempt records and the sinks that consume them.

mod ledger;
mod progress;
mod record;
mod sink;

pub use ledger::*;
pub use progress::*;
pub use record::*;
pub use sink::*;
