//! Per-attempt records emitted by the dispatcher.

use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;

/// What a record describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordKind {
    /// One executor attempt (1-based `attempt`)
    Attempt {
        attempt: u32,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The unit ran out of attempts; emitted once, after its last attempt record
    Exhausted { attempts: u32, last_error: String },
}

/// One record per attempt, plus one extra per exhausted unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub endpoint: String,
    pub call_id: String,
    pub tags: BTreeSet<String>,
    #[serde(flatten)]
    pub kind: RecordKind,
    /// Approximate input size (zero on exhausted records)
    pub input_size: u64,
    /// Approximate output size (zero unless the attempt succeeded)
    pub output_size: u64,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl AttemptRecord {
    /// A successful attempt.
    pub fn is_success(&self) -> bool {
        matches!(self.kind, RecordKind::Attempt { success: true, .. })
    }

    /// A failed attempt (not an exhaustion record).
    pub fn is_failed_attempt(&self) -> bool {
        matches!(self.kind, RecordKind::Attempt { success: false, .. })
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.kind, RecordKind::Exhausted { .. })
    }

    /// Whether this record closes its unit (success or exhaustion).
    pub fn is_terminal(&self) -> bool {
        self.is_success() || self.is_exhausted()
    }
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}
