//! Call, response and outcome types.
//!
//! K_i: Calls are immutable value objects; one call may go to many endpoints.
//! K_i: Results are positionally aligned with the input calls.

use crate::models::Endpoint;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Rough token estimate used when a provider reports no usage.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// One logical remote request.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Caller-chosen identifier (logs and output records only)
    pub id: String,
    /// Opaque request body, interpreted by the executor
    pub payload: serde_json::Value,
    /// Free-form accounting labels
    pub tags: BTreeSet<String>,
    /// Overrides the endpoint's attempt count; zero means no override
    pub max_retries: Option<u32>,
    /// Overrides the endpoint's per-attempt timeout
    pub timeout: Option<Duration>,
}

impl Call {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
            tags: BTreeSet::new(),
            max_retries: None,
            timeout: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolve overrides against an endpoint's defaults.
    ///
    /// A zero override falls back to the endpoint's count, and a zero
    /// endpoint count still gets one attempt.
    pub fn resolve(&self, endpoint: &Endpoint) -> CallPolicy {
        let max_retries = self
            .max_retries
            .filter(|&n| n > 0)
            .unwrap_or(endpoint.max_retries());
        CallPolicy {
            max_attempts: max_retries.max(1),
            timeout: self.timeout.unwrap_or(endpoint.timeout()),
        }
    }

    /// Approximate input size, for attempts that produced no usage numbers.
    pub fn approx_input_size(&self) -> u64 {
        match &self.payload {
            serde_json::Value::String(text) => estimate_tokens(text),
            other => estimate_tokens(&other.to_string()),
        }
    }
}

/// Retry settings for one (endpoint, call) unit, resolved once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
}

/// Successful executor output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Generated content
    pub content: String,
    /// Input size (tokens if reported, otherwise estimated)
    pub input_size: u64,
    /// Output size (tokens if reported, otherwise estimated)
    pub output_size: u64,
    /// Model that actually answered, when the provider says
    pub model: Option<String>,
}

impl Response {
    /// Response with an estimated output size and unknown input size.
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            output_size: estimate_tokens(&content),
            content,
            input_size: 0,
            model: None,
        }
    }

    pub fn with_usage(mut self, input_size: u64, output_size: u64) -> Self {
        self.input_size = input_size;
        self.output_size = output_size;
        self
    }
}

/// A unit that ran out of attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub attempts: u32,
    pub last_error: String,
}

/// Final state of one (endpoint, call) unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Response),
    Failed(Failure),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Success(response) => Some(response),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Success(_) => None,
            Self::Failed(failure) => Some(failure),
        }
    }

    /// Content, with the empty-string sentinel standing in for a failure.
    ///
    /// An empty successful response looks the same here; use
    /// [`Outcome::is_success`] to tell them apart.
    pub fn content(&self) -> &str {
        match self {
            Self::Success(response) => &response.content,
            Self::Failed(_) => "",
        }
    }
}

/// Per-endpoint outcomes, each aligned with the input call order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchResult {
    outcomes: HashMap<String, Vec<Outcome>>,
}

impl DispatchResult {
    pub(crate) fn new(outcomes: HashMap<String, Vec<Outcome>>) -> Self {
        Self { outcomes }
    }

    /// Outcomes for one endpoint, or `None` if it was not dispatched to.
    pub fn get(&self, endpoint: &str) -> Option<&[Outcome]> {
        self.outcomes.get(endpoint).map(Vec::as_slice)
    }

    /// Legacy view: contents with `""` for failed units.
    pub fn contents(&self, endpoint: &str) -> Option<Vec<&str>> {
        self.get(endpoint)
            .map(|outcomes| outcomes.iter().map(Outcome::content).collect())
    }

    pub fn endpoint_names(&self) -> impl Iterator<Item = &str> {
        self.outcomes.keys().map(String::as_str)
    }

    /// Number of endpoints in the result.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Successful units across every endpoint.
    pub fn success_count(&self) -> usize {
        self.outcomes
            .values()
            .flatten()
            .filter(|o| o.is_success())
            .count()
    }

    /// Failed units across every endpoint.
    pub fn failure_count(&self) -> usize {
        self.outcomes
            .values()
            .flatten()
            .filter(|o| !o.is_success())
            .count()
    }

    pub fn into_inner(self) -> HashMap<String, Vec<Outcome>> {
        self.outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint(max_retries: u32) -> Endpoint {
        Endpoint::new("a", 1, max_retries, Duration::from_secs(30)).unwrap()
    }

    #[test]
    fn test_resolve_uses_endpoint_defaults() {
        let call = Call::new("c", json!("hi"));
        let policy = call.resolve(&endpoint(4));
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_resolve_prefers_overrides() {
        let call = Call::new("c", json!("hi"))
            .with_max_retries(7)
            .with_timeout(Duration::from_millis(250));
        let policy = call.resolve(&endpoint(4));
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_retries_still_attempts_once() {
        let call = Call::new("c", json!("hi"));
        assert_eq!(call.resolve(&endpoint(0)).max_attempts, 1);
        let call = Call::new("c", json!("hi")).with_max_retries(0);
        assert_eq!(call.resolve(&endpoint(0)).max_attempts, 1);
    }

    #[test]
    fn test_zero_override_falls_back_to_endpoint() {
        let call = Call::new("c", json!("hi")).with_max_retries(0);
        assert_eq!(call.resolve(&endpoint(4)).max_attempts, 4);
    }

    #[test]
    fn test_sentinel_content() {
        let failed = Outcome::Failed(Failure {
            attempts: 3,
            last_error: "timeout".into(),
        });
        let empty = Outcome::Success(Response::new(""));
        assert_eq!(failed.content(), "");
        assert_eq!(empty.content(), "");
        assert!(!failed.is_success());
        assert!(empty.is_success());
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(Call::new("c", json!("abcdefgh")).approx_input_size(), 2);
    }

    #[test]
    fn test_tags_are_deduplicated() {
        let call = Call::new("c", json!(null))
            .with_tag("hops:2")
            .with_tags(["hops:2", "qa"]);
        assert_eq!(call.tags.len(), 2);
    }
}
