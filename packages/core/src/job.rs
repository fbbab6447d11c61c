//! Job domain types for the server-side RPC queue.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{KbPath, RequestId};

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be claimed.
    New,
    /// Claimed by exactly one consumer.
    Processing,
    /// Terminal until the path is cleared.
    Completed,
}

impl JobState {
    /// Get a simple state string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::New => "new",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job pushed onto a server path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Server path owning this job.
    pub path: KbPath,
    /// Caller correlation id.
    pub request_id: RequestId,
    /// Opcode routed to a handler.
    pub action: String,
    /// Opaque request payload.
    pub payload: serde_json::Value,
    /// Free-form correlation tag.
    pub transaction_tag: String,
    /// Higher values are served first.
    pub priority: i64,
    /// Current lifecycle state.
    pub state: JobState,
    /// Client pool that should receive the reply, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_route: Option<KbPath>,
    /// When the job was pushed.
    pub enqueued_at: DateTime<Utc>,
    /// When the job moved to Processing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    /// When the job moved to Completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a new job in the `New` state with default priority 0.
    pub fn new(
        path: KbPath,
        request_id: RequestId,
        action: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: JobId::new(),
            path,
            request_id,
            action: action.into(),
            payload,
            transaction_tag: String::new(),
            priority: 0,
            state: JobState::New,
            reply_route: None,
            enqueued_at: Utc::now(),
            claimed_at: None,
            completed_at: None,
        }
    }

    /// Use a specific id (the queue hands out monotonic ones).
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    /// Set the priority for this job.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Set the transaction tag.
    pub fn with_transaction_tag(mut self, tag: impl Into<String>) -> Self {
        self.transaction_tag = tag.into();
        self
    }

    /// Set the client path the reply is routed to.
    pub fn with_reply_route(mut self, route: Option<KbPath>) -> Self {
        self.reply_route = route;
        self
    }

    /// Serving order: priority descending, then enqueue time, then id.
    pub fn serve_order(a: &JobRecord, b: &JobRecord) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.enqueued_at.cmp(&b.enqueued_at))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// When the job entered its current state.
    pub fn state_changed_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            JobState::New => Some(self.enqueued_at),
            JobState::Processing => self.claimed_at,
            JobState::Completed => self.completed_at,
        }
    }

    /// Listing order: serving order among New jobs, otherwise oldest state
    /// change first.
    pub fn listing_order(a: &JobRecord, b: &JobRecord) -> Ordering {
        if a.state == JobState::New && b.state == JobState::New {
            return Self::serve_order(a, b);
        }
        a.state_changed_at()
            .cmp(&b.state_changed_at())
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Snapshot counts of a server path, one per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStats {
    pub new: u64,
    pub processing: u64,
    pub completed: u64,
}

impl JobStats {
    /// Jobs not yet completed.
    pub fn active(&self) -> u64 {
        self.new + self.processing
    }

    /// All jobs on the path.
    pub fn total(&self) -> u64 {
        self.new + self.processing + self.completed
    }
}
