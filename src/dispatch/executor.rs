//! The remote-call capability the dispatcher drives.

use crate::models::{Call, Endpoint, ExecutorError, Response};
use async_trait::async_trait;

/// Performs one remote request for one call against one endpoint.
///
/// Implementations do a single attempt and map provider-specific failures
/// into [`ExecutorError`]. Retries, timeouts and concurrency limits belong to
/// the dispatcher.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, endpoint: &Endpoint, call: &Call) -> Result<Response, ExecutorError>;
}
