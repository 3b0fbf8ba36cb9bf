//! Endpoint descriptors.
//!
//! K_i: A descriptor is immutable once built.
//! K_i: The concurrency limiter belongs to the descriptor, so two descriptors
//! never share a cap even when they carry the same name.

use crate::models::{FanoutError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// A named remote destination with its own concurrency cap and retry defaults.
///
/// Cloning shares the descriptor, including its limiter. Use
/// [`Endpoint::with_concurrency`] to build a fresh descriptor with another cap.
#[derive(Debug, Clone)]
pub struct Endpoint {
    name: String,
    concurrency: usize,
    max_retries: u32,
    timeout: Duration,
    limiter: Arc<Semaphore>,
}

impl Endpoint {
    /// Build a descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty name, a zero (or oversized) cap, or a
    /// zero timeout.
    pub fn new(
        name: impl Into<String>,
        concurrency: usize,
        max_retries: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(FanoutError::invalid("endpoint name must not be empty"));
        }
        if concurrency == 0 || concurrency > Semaphore::MAX_PERMITS {
            return Err(FanoutError::invalid(format!(
                "endpoint '{name}': concurrency must be in 1..={}, got {concurrency}",
                Semaphore::MAX_PERMITS
            )));
        }
        if timeout.is_zero() {
            return Err(FanoutError::invalid(format!(
                "endpoint '{name}': timeout must be positive"
            )));
        }

        Ok(Self {
            limiter: Arc::new(Semaphore::new(concurrency)),
            name,
            concurrency,
            max_retries,
            timeout,
        })
    }

    /// New descriptor with the same identity and defaults but another cap.
    ///
    /// Work still running on `self` keeps using the old limiter.
    pub fn with_concurrency(&self, concurrency: usize) -> Result<Self> {
        Self::new(self.name.clone(), concurrency, self.max_retries, self.timeout)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum attempts in flight at once.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Default attempt count for calls without an override.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Default per-attempt timeout for calls without an override.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Permits currently free on this descriptor's limiter.
    pub fn available_permits(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Whether both handles point at the same descriptor.
    pub fn same_descriptor(&self, other: &Endpoint) -> bool {
        Arc::ptr_eq(&self.limiter, &other.limiter)
    }

    pub(crate) fn limiter(&self) -> &Arc<Semaphore> {
        &self.limiter
    }
}
