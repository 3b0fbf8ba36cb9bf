//! Chunk and output record types for the generation pipeline.
//!
//! K_i: These types represent the data flowing in and out of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One content unit read from the input corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier for this chunk
    pub id: String,

    /// Chunk text
    pub text: String,

    /// Optional metadata (passed through to output)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

/// Status of one (endpoint, call) unit in the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Succeeded,
    Failed,
}

/// One line of the output JSONL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Unique identifier for this record
    pub id: String,

    /// Call identifier (chunk ids joined by '+')
    pub call_id: String,

    /// Endpoint the call was sent to
    pub endpoint: String,

    /// Source chunk IDs, in grouping order
    pub chunk_ids: Vec<String>,

    pub status: RecordStatus,

    /// Generated content (empty for failed units)
    pub output: String,

    /// Model reported by the provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    pub input_size: u64,
    pub output_size: u64,

    /// Last error for failed units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub tags: Vec<String>,

    pub generated_at: DateTime<Utc>,

    /// Metadata of every chunk in the grouping
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<serde_json::Value>,
}

/// Statistics for a generation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Chunks read from input
    pub total_chunks: usize,

    /// Calls built (one per grouping)
    pub total_calls: usize,

    /// (endpoint, call) units dispatched
    pub total_units: usize,

    pub succeeded: usize,
    pub failed: usize,

    /// Records written to the output file
    pub written: usize,

    /// Total runtime in seconds
    pub runtime_secs: f64,

    /// Successful units per hour
    pub throughput_per_hour: f64,

    /// Success rate (0.0 - 1.0)
    pub success_rate: f64,
}

impl RunStats {
    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        if self.total_units > 0 {
            self.success_rate = self.succeeded as f64 / self.total_units as f64;
        }
        if self.runtime_secs > 0.0 {
            self.throughput_per_hour = self.succeeded as f64 / self.runtime_secs * 3600.0;
        }
    }
}
