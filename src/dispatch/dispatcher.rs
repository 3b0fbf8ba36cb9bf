//! Bounded-concurrency, retrying call dispatcher.
//!
//! Epistemic foundation:
//! - K_i: In-flight attempts per endpoint descriptor never exceed its cap
//! - K_i: result[endpoint][i] always corresponds to calls[i]
//! - B_i: Each attempt may fail → retried with exponential backoff
//! - I^B: Completion order is unknowable → index-addressed reassembly

use crate::dispatch::{Backoff, Executor, UnitState};
use crate::metrics::{AttemptRecord, MetricsSink, NullSink, RecordKind};
use crate::models::{
    Call, DispatchResult, Endpoint, ExecutorError, Failure, FanoutError, Outcome, Response,
    Result,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Executes every (endpoint, call) pair concurrently.
///
/// Each endpoint's own limiter bounds how many of its attempts run at once.
/// A call that keeps failing is captured as [`Outcome::Failed`]; it never
/// aborts the rest of the batch.
#[derive(Clone)]
pub struct Dispatcher {
    executor: Arc<dyn Executor>,
    sink: Arc<dyn MetricsSink>,
    backoff: Backoff,
}

impl Dispatcher {
    /// Dispatcher with no metrics and the default backoff.
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            sink: Arc::new(NullSink),
            backoff: Backoff::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn sink(&self) -> &Arc<dyn MetricsSink> {
        &self.sink
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Run every call against every endpoint.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `endpoints` is empty or has duplicate names.
    /// Remote failures never surface here; they become [`Outcome::Failed`].
    pub async fn dispatch(&self, endpoints: &[Endpoint], calls: &[Call]) -> Result<DispatchResult> {
        if endpoints.is_empty() {
            return Err(FanoutError::invalid("dispatch needs at least one endpoint"));
        }
        let mut seen = HashSet::with_capacity(endpoints.len());
        for endpoint in endpoints {
            if !seen.insert(endpoint.name()) {
                return Err(FanoutError::invalid(format!(
                    "endpoint '{}' listed twice",
                    endpoint.name()
                )));
            }
        }

        let start = Instant::now();
        let calls: Vec<Arc<Call>> = calls.iter().cloned().map(Arc::new).collect();
        let mut slots: Vec<Vec<Option<Outcome>>> =
            vec![vec![None; calls.len()]; endpoints.len()];

        info!(
            endpoints = endpoints.len(),
            calls = calls.len(),
            units = endpoints.len() * calls.len(),
            "Dispatching"
        );

        let mut units = JoinSet::new();
        for (endpoint_idx, endpoint) in endpoints.iter().enumerate() {
            for (call_idx, call) in calls.iter().enumerate() {
                let unit = Unit {
                    endpoint: endpoint.clone(),
                    call: Arc::clone(call),
                    executor: Arc::clone(&self.executor),
                    sink: Arc::clone(&self.sink),
                    backoff: self.backoff,
                };
                units.spawn(async move { (endpoint_idx, call_idx, unit.run().await) });
            }
        }

        while let Some(joined) = units.join_next().await {
            match joined {
                Ok((endpoint_idx, call_idx, outcome)) => {
                    slots[endpoint_idx][call_idx] = Some(outcome);
                }
                // The slot stays empty and is filled below.
                Err(e) => warn!(error = %e, "Dispatch unit did not complete"),
            }
        }

        let mut outcomes = HashMap::with_capacity(endpoints.len());
        for (endpoint, endpoint_slots) in endpoints.iter().zip(slots) {
            let aligned = endpoint_slots
                .into_iter()
                .zip(&calls)
                .map(|(slot, call)| slot.unwrap_or_else(|| self.abandoned(endpoint, call)))
                .collect();
            outcomes.insert(endpoint.name().to_string(), aligned);
        }

        let result = DispatchResult::new(outcomes);
        info!(
            succeeded = result.success_count(),
            failed = result.failure_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Dispatch complete"
        );
        Ok(result)
    }

    /// Failure for a unit whose task panicked; recorded as exhausted.
    fn abandoned(&self, endpoint: &Endpoint, call: &Call) -> Outcome {
        let last_error = "task panicked: unit did not complete".to_string();
        error!(
            endpoint = %endpoint.name(),
            call_id = %call.id,
            last_error = %last_error,
            "Call abandoned"
        );
        self.sink.record(AttemptRecord {
            endpoint: endpoint.name().to_string(),
            call_id: call.id.clone(),
            tags: call.tags.clone(),
            kind: RecordKind::Exhausted {
                attempts: 0,
                last_error: last_error.clone(),
            },
            input_size: 0,
            output_size: 0,
            elapsed: Duration::ZERO,
        });

        Outcome::Failed(Failure {
            attempts: 0,
            last_error,
        })
    }
}

/// Dispatch with no metrics and the default backoff.
pub async fn dispatch(
    endpoints: &[Endpoint],
    calls: &[Call],
    executor: Arc<dyn Executor>,
) -> Result<DispatchResult> {
    Dispatcher::new(executor).dispatch(endpoints, calls).await
}

/// One (endpoint, call) pair and everything it needs to run on its own task.
struct Unit {
    endpoint: Endpoint,
    call: Arc<Call>,
    executor: Arc<dyn Executor>,
    sink: Arc<dyn MetricsSink>,
    backoff: Backoff,
}

impl Unit {
    async fn run(self) -> Outcome {
        let policy = self.call.resolve(&self.endpoint);
        let mut state = UnitState::initial();
        let mut last_error: Option<ExecutorError> = None;

        loop {
            state = state.begin_attempt();
            let UnitState::Attempting { attempt } = state else {
                break;
            };

            let (result, elapsed) = self.attempt(policy.timeout).await;
            state = state.finish_attempt(result.is_ok(), policy.max_attempts);

            match result {
                Ok(response) => {
                    self.record_attempt(attempt, None, Some(&response), elapsed);
                    return Outcome::Success(response);
                }
                Err(e) => {
                    warn!(
                        endpoint = %self.endpoint.name(),
                        call_id = %self.call.id,
                        attempt,
                        max_attempts = policy.max_attempts,
                        category = e.category(),
                        retryable = e.is_retryable(),
                        error = %e,
                        "Attempt failed"
                    );
                    self.record_attempt(attempt, Some(&e), None, elapsed);
                    last_error = Some(e);
                }
            }

            if let UnitState::Pending { .. } = state {
                let delay = self.backoff.delay(attempt - 1, &mut rand::rng());
                debug!(
                    endpoint = %self.endpoint.name(),
                    call_id = %self.call.id,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    "Retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
        debug_assert!(state.is_terminal());

        let attempts = match state {
            UnitState::PermanentlyFailed { attempts } => attempts,
            _ => policy.max_attempts,
        };
        let last_error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt was made".to_string());

        error!(
            endpoint = %self.endpoint.name(),
            call_id = %self.call.id,
            attempts,
            last_error = %last_error,
            "Call failed after all retries"
        );
        self.sink.record(AttemptRecord {
            endpoint: self.endpoint.name().to_string(),
            call_id: self.call.id.clone(),
            tags: self.call.tags.clone(),
            kind: RecordKind::Exhausted {
                attempts,
                last_error: last_error.clone(),
            },
            input_size: 0,
            output_size: 0,
            elapsed: Duration::ZERO,
        });

        Outcome::Failed(Failure {
            attempts,
            last_error,
        })
    }

    /// One attempt: take a slot, run the executor under the timeout, give the
    /// slot back. The elapsed time excludes waiting for the slot.
    async fn attempt(&self, timeout: Duration) -> (std::result::Result<Response, ExecutorError>, Duration) {
        let _permit = match self.endpoint.limiter().acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                let closed = ExecutorError::Other("concurrency limiter closed".to_string());
                return (Err(closed), Duration::ZERO);
            }
        };

        let started = Instant::now();
        let result =
            match tokio::time::timeout(timeout, self.executor.execute(&self.endpoint, &self.call))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ExecutorError::Timeout(timeout)),
            };
        (result, started.elapsed())
    }

    fn record_attempt(
        &self,
        attempt: u32,
        error: Option<&ExecutorError>,
        response: Option<&Response>,
        elapsed: Duration,
    ) {
        let input_size = response
            .map(|r| r.input_size)
            .filter(|&size| size > 0)
            .unwrap_or_else(|| self.call.approx_input_size());

        self.sink.record(AttemptRecord {
            endpoint: self.endpoint.name().to_string(),
            call_id: self.call.id.clone(),
            tags: self.call.tags.clone(),
            kind: RecordKind::Attempt {
                attempt,
                success: response.is_some(),
                error: error.map(|e| e.category().to_string()),
            },
            input_size,
            output_size: response.map_or(0, |r| r.output_size),
            elapsed,
        });
    }
}
