//! HTTP executor for OpenAI-compatible chat completion endpoints.
//!
//! Epistemic foundation:
//! - K_i: OpenAI chat completion schema is the de facto standard
//! - K_i: Aggregators (OpenRouter) and on-prem servers (vLLM, Ollama) all speak it
//! - B_i: Endpoint responds with valid JSON (might not) → InvalidResponse
//! - I^B: Network availability unknowable → single attempt, dispatcher retries

use crate::dispatch::Executor;
use crate::models::{
    Call, Config, Endpoint, ExecutorError, FanoutError, Response, Result, expand_headers,
};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Message in a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion request payload.
#[derive(Debug, PartialEq, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Where and how to reach one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    /// Base URL, without the `/chat/completions` suffix
    pub base_url: String,
    /// Model identifier sent with every request
    pub model: String,
    /// Bearer token (None for local endpoints without auth)
    pub api_key: Option<String>,
    /// Extra headers, already env-expanded
    pub headers: HashMap<String, String>,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Connection {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            headers: HashMap::new(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Build headers for a request.
    fn header_map(&self) -> std::result::Result<HeaderMap, ExecutorError> {
        let mut headers = HeaderMap::new();

        if let Some(api_key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| ExecutorError::Other(format!("invalid API key header: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Custom headers that are not valid HTTP are skipped
        for (key, value) in &self.headers {
            if let (Ok(name), Ok(val)) = (
                HeaderName::try_from(key.as_str()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, val);
            }
        }

        Ok(headers)
    }

    /// Map a call payload onto a chat completion request.
    ///
    /// - string: one user message
    /// - array: the messages themselves
    /// - object with `messages`: those messages, plus optional
    ///   `temperature` / `max_tokens` overrides
    fn request(&self, payload: &Value) -> std::result::Result<ChatCompletionRequest, ExecutorError> {
        let mut request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: Vec::new(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        match payload {
            Value::String(prompt) => request.messages.push(Message::user(prompt.as_str())),
            Value::Array(_) => request.messages = parse_messages(payload)?,
            Value::Object(fields) => {
                let messages = fields.get("messages").ok_or_else(|| {
                    ExecutorError::Other("payload object has no 'messages' field".to_string())
                })?;
                request.messages = parse_messages(messages)?;

                if let Some(temperature) = fields.get("temperature").and_then(Value::as_f64) {
                    request.temperature = temperature;
                }
                if let Some(max_tokens) = fields.get("max_tokens").and_then(Value::as_u64) {
                    request.max_tokens = u32::try_from(max_tokens).unwrap_or(u32::MAX);
                }
            }
            other => {
                return Err(ExecutorError::Other(format!(
                    "unsupported payload type: {}",
                    json_type(other)
                )));
            }
        }

        Ok(request)
    }
}

fn parse_messages(value: &Value) -> std::result::Result<Vec<Message>, ExecutorError> {
    serde_json::from_value(value.clone())
        .map_err(|e| ExecutorError::Other(format!("invalid messages in payload: {e}")))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// [`Executor`] that POSTs each call to `{base_url}/chat/completions`.
///
/// Exactly one request per `execute`. Retries, backoff and the per-attempt
/// timeout belong to the dispatcher; the call's resolved timeout is also set
/// on the request so a stalled socket is reported as a timeout.
pub struct HttpExecutor {
    client: reqwest::Client,
    connections: HashMap<String, Connection>,
}

impl HttpExecutor {
    pub fn new(connections: HashMap<String, Connection>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(FanoutError::Network)?;

        Ok(Self {
            client,
            connections,
        })
    }

    /// One connection per `[endpoints.<name>]` table, API keys and header
    /// variables resolved from the environment.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut connections = HashMap::with_capacity(config.endpoints.len());

        for (name, endpoint) in &config.endpoints {
            let connection = Connection {
                base_url: endpoint.base_url.clone(),
                model: endpoint.model.clone(),
                api_key: config.resolve_endpoint_api_key(name)?,
                headers: expand_headers(&endpoint.headers),
                max_tokens: endpoint.max_tokens,
                temperature: endpoint.temperature,
            };
            connections.insert(name.clone(), connection);
        }

        Self::new(connections)
    }

    pub fn connection(&self, endpoint: &str) -> Option<&Connection> {
        self.connections.get(endpoint)
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, endpoint: &Endpoint, call: &Call) -> std::result::Result<Response, ExecutorError> {
        let connection = self.connections.get(endpoint.name()).ok_or_else(|| {
            ExecutorError::Other(format!("no connection configured for '{}'", endpoint.name()))
        })?;
        let request = connection.request(&call.payload)?;
        let timeout = call.resolve(endpoint).timeout;

        debug!(
            endpoint = %endpoint.name(),
            call_id = %call.id,
            model = %request.model,
            messages = request.messages.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(connection.url())
            .headers(connection.header_map()?)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExecutorError::Timeout(timeout)
                } else {
                    ExecutorError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(1.0);
            return Err(ExecutorError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .map(|api_error| api_error.error.message)
                .unwrap_or(error_body);
            return Err(ExecutorError::Api { status, message });
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ExecutorError::InvalidResponse(format!("failed to parse body: {e}")))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| ExecutorError::InvalidResponse("no choices in response".to_string()))?;

        let mut result = Response::new(content);
        if let Some(usage) = body.usage {
            result = result.with_usage(usage.prompt_tokens, usage.completion_tokens);
        }
        result.model = body.model;
        Ok(result)
    }
}
