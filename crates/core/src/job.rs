//! Job, payload and outcome types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::JobError;
use crate::id::JobId;

/// Identifier of the object a job asks to recompute.
///
/// Bound as the single positional parameter (`$1`) of every statement in the
/// matching query set, without conversion.
///
/// Only integers that fit in `i64` and strings are accepted. Larger integers
/// (`bigint` cannot hold them) and fractional numbers make the payload
/// invalid; producers with such ids must send them as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectId {
    Int(i64),
    Text(String),
}

impl core::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ObjectId::Int(v) => write!(f, "{v}"),
            ObjectId::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for ObjectId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ObjectId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// The part of a job payload the compiler interprets.
///
/// Extra fields in the payload are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub id: ObjectId,
    /// Table key selecting the query set (case-sensitive).
    #[serde(rename = "type")]
    pub table: String,
}

impl JobPayload {
    pub fn new(id: impl Into<ObjectId>, table: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            table: table.into(),
        }
    }

    /// Decode from a raw queue payload.
    pub fn from_value(value: &JsonValue) -> Result<Self, JobError> {
        JobPayload::deserialize(value).map_err(|e| JobError::invalid_payload(e.to_string()))
    }

    pub fn to_value(&self) -> JsonValue {
        serde_json::json!({ "id": self.id, "type": self.table })
    }
}

/// A job as delivered by the queue for one lease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Raw payload; decoded by the handler.
    pub payload: JsonValue,
    /// Scheduling hint for the queue. Not interpreted by the compiler.
    pub priority: i32,
    /// Number of previous failed deliveries.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(payload: JsonValue) -> Self {
        Self {
            id: JobId::new(),
            payload,
            priority: 0,
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Successful result of one job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Every statement of the query set ran.
    Compiled { statements: usize },
    /// No query set is configured for the job's type; nothing ran.
    Skipped,
}

impl JobOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, JobOutcome::Skipped)
    }
}
