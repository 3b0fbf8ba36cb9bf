//! Configuration models for fanout.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The user resolves these unknowns at runtime via config file.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Top-level configuration for fanout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote endpoints, keyed by name. Ordered so registry order is stable.
    pub endpoints: BTreeMap<String, EndpointConfig>,

    /// Retry/backoff settings shared by every dispatch
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Combination sampling settings
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Prompt construction settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Configuration for one OpenAI-compatible endpoint.
///
/// Works for aggregators (OpenRouter, Together, Groq) and on-prem servers
/// (vLLM, TGI, Ollama, llama.cpp).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL for the API (e.g., "http://localhost:11434/v1")
    pub base_url: String,

    /// Model ID sent with every request
    pub model: String,

    /// API key (optional, can be omitted for local endpoints)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Custom headers; values may contain ${ENV_VAR}
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Maximum attempts in flight at once against this endpoint
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts per call unless the call overrides it
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Input price per 1M tokens (USD) - 0 for on-prem
    #[serde(default)]
    pub input_price_per_1m: f64,

    /// Output price per 1M tokens (USD) - 0 for on-prem
    #[serde(default)]
    pub output_price_per_1m: f64,
}

fn default_concurrency() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout() -> u64 {
    180
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    0.7
}

/// Retry/backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Backoff time unit in milliseconds; the delay after attempt i is unit * 2^(i+2)
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,

    /// Add uniform random jitter on top of each backoff delay
    #[serde(default)]
    pub jitter: bool,
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backoff_unit_ms: default_backoff_unit_ms(),
            jitter: false,
        }
    }
}

/// Combination sampling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Chunks per grouping (1 = single-chunk generation)
    #[serde(default = "default_hops")]
    pub hops: usize,

    /// Number of groupings to generate (default: one per chunk, clamped to C(n, hops))
    #[serde(default)]
    pub samples: Option<usize>,

    /// Seed for reproducible sampling
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_hops() -> usize {
    1
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            hops: default_hops(),
            samples: None,
            seed: None,
        }
    }
}

/// Prompt construction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Path to system prompt file
    #[serde(default)]
    pub system_prompt: Option<PathBuf>,

    /// User message template; `{chunks}` is replaced by the grouped chunk texts
    #[serde(default = "default_user_template")]
    pub user_template: String,

    /// Extra tags attached to every call for accounting
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_user_template() -> String {
    "{chunks}".to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            user_template: default_user_template(),
            tags: Vec::new(),
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Default output file path (CLI flag wins)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Where `UsageLedger::flush` writes the usage/cost report
    #[serde(default)]
    pub usage_report: Option<PathBuf>,

    /// Whether to write records for calls that exhausted their retries
    #[serde(default)]
    pub include_failed: bool,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Resolve the API key for a specific endpoint.
    ///
    /// Explicit `api_key` wins (with ${VAR} expansion), then `api_key_env`.
    /// No key at all is valid for local endpoints.
    pub fn resolve_endpoint_api_key(
        &self,
        endpoint_name: &str,
    ) -> Result<Option<String>, ConfigError> {
        let endpoint = self
            .endpoints
            .get(endpoint_name)
            .ok_or_else(|| ConfigError::EndpointNotFound(endpoint_name.to_string()))?;

        if let Some(key) = &endpoint.api_key {
            return Ok(Some(expand_env_vars(key)));
        }

        if let Some(env_var) = &endpoint.api_key_env {
            return std::env::var(env_var)
                .map(Some)
                .map_err(|_| ConfigError::MissingApiKey {
                    endpoint: endpoint_name.to_string(),
                    env_var: env_var.clone(),
                });
        }

        Ok(None)
    }

    /// Check values serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [endpoints.<name>] table is required".to_string(),
            ));
        }

        for (name, endpoint) in &self.endpoints {
            if endpoint.concurrency == 0 {
                return Err(ConfigError::Invalid(format!(
                    "endpoint '{name}': concurrency must be positive"
                )));
            }
            if endpoint.timeout_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "endpoint '{name}': timeout_secs must be positive"
                )));
            }
        }

        if self.sampling.hops == 0 {
            return Err(ConfigError::Invalid(
                "sampling.hops must be positive".to_string(),
            ));
        }

        if !self.generation.user_template.contains("{chunks}") {
            return Err(ConfigError::Invalid(
                "generation.user_template must contain {chunks}".to_string(),
            ));
        }

        Ok(())
    }
}

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in ENV_VAR_PATTERN.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Expand environment variables in all headers.
pub fn expand_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), expand_env_vars(v)))
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(
        "Missing API key for endpoint '{endpoint}': set {env_var} env var or api_key in config"
    )]
    MissingApiKey { endpoint: String, env_var: String },

    #[error("Endpoint not found: '{0}' (not configured in [endpoints.*])")]
    EndpointNotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
