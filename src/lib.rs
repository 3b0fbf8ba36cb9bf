//! fanout - Bounded-concurrency fan-out of calls to many endpoints, with
//! uniform combination sampling for multi-hop generation.
//!
//! ## Architecture
//!
//! - **Sampler**: Draws distinct k-subsets of n items uniformly (colex
//!   unranking + Floyd's algorithm), exact even when C(n, k) is astronomically large
//! - **Dispatcher**: Runs every call against every endpoint, each endpoint
//!   capped by its own limiter, retrying with exponential backoff
//! - **Metrics**: One record per attempt and per exhausted call, consumed by
//!   pluggable sinks (usage ledger, progress bar, in-memory)
//!
//! ## Pipeline
//!
//! - **Multi-hop**: Chunks → k-chunk groupings → Calls → Dispatcher → JSONL
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Outcome)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Network/API uncertainties (retry, backoff, timeout)

pub mod client;
pub mod dispatch;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod sampler;

// Re-exports for convenience
pub use client::{EndpointRegistry, HttpExecutor};
pub use dispatch::{Backoff, Dispatcher, Executor, dispatch};
pub use metrics::{MemorySink, MetricsSink, NullSink, UsageLedger};
pub use models::{Call, Config, DispatchResult, Endpoint, FanoutError, Outcome, Result};
pub use pipeline::MultiHopPipeline;
pub use sampler::{floyd_sample, sample_exact_combinations, unrank};
