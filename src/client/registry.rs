//! Endpoint registry: the named, ordered set of endpoint descriptors.
//!
//! Epistemic foundation:
//! - K_i: Endpoint names are unique within a registry
//! - K_i: Descriptors are immutable once registered
//! - I^R: User configures which endpoints exist and how wide each one is

use crate::models::{Config, ConfigError, Endpoint, FanoutError, Result};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

/// Read-only registry of endpoint descriptors.
///
/// Order is the order endpoints were registered in (for `from_config`, the
/// sorted order of the `[endpoints.*]` tables). Cloning a registry clones the
/// descriptors, so clones share each endpoint's concurrency limiter.
///
/// # Example
///
/// ```ignore
/// use fanout::{Config, EndpointRegistry};
///
/// let config = Config::from_file("fanout.toml".as_ref())?;
/// let registry = EndpointRegistry::from_config(&config)?;
///
/// // Dispatch to a subset, in the order given
/// let chosen = registry.select(&["local".to_string()])?;
/// ```
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    endpoints: Vec<Endpoint>,
}

impl EndpointRegistry {
    /// # Errors
    ///
    /// `InvalidArgument` for an empty list or a repeated name.
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(FanoutError::invalid("registry needs at least one endpoint"));
        }

        let mut seen = HashSet::with_capacity(endpoints.len());
        for endpoint in &endpoints {
            if !seen.insert(endpoint.name()) {
                return Err(FanoutError::invalid(format!(
                    "endpoint '{}' registered twice",
                    endpoint.name()
                )));
            }
        }

        Ok(Self { endpoints })
    }

    /// Build one descriptor per `[endpoints.<name>]` table.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut endpoints = Vec::with_capacity(config.endpoints.len());

        for (name, endpoint_config) in &config.endpoints {
            let endpoint = Endpoint::new(
                name.clone(),
                endpoint_config.concurrency,
                endpoint_config.max_retries,
                Duration::from_secs(endpoint_config.timeout_secs),
            )?;
            debug!(
                endpoint = %name,
                concurrency = endpoint.concurrency(),
                max_retries = endpoint.max_retries(),
                "Registered endpoint"
            );
            endpoints.push(endpoint);
        }

        Self::new(endpoints)
    }

    pub fn get(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.endpoints.iter().map(Endpoint::name).collect()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Descriptors for `names`, in the order given.
    ///
    /// The returned descriptors share limiters with this registry.
    pub fn select(&self, names: &[String]) -> Result<Vec<Endpoint>> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .cloned()
                    .ok_or_else(|| FanoutError::from(ConfigError::EndpointNotFound(name.clone())))
            })
            .collect()
    }

    /// New registry with the descriptor of the same name swapped for `endpoint`.
    ///
    /// The original registry is untouched and keeps its own limiter.
    pub fn with_replaced(&self, endpoint: Endpoint) -> Result<Self> {
        let position = self
            .endpoints
            .iter()
            .position(|e| e.name() == endpoint.name())
            .ok_or_else(|| ConfigError::EndpointNotFound(endpoint.name().to_string()))?;

        let mut endpoints = self.endpoints.clone();
        endpoints[position] = endpoint;
        Ok(Self { endpoints })
    }
}
