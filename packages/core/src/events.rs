//! Event types for observing queue and pool activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobRecord, KbPath, RequestId, SlotId};

/// Events emitted by the job queue and reply pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RpcEvent {
    // Server queue events
    /// A new job was pushed.
    JobPushed { job: Box<JobRecord>, timestamp: DateTime<Utc> },
    /// A job was claimed and is now processing.
    JobClaimed {
        job_id: JobId,
        path: KbPath,
        timestamp: DateTime<Utc>,
    },
    /// A processing job was completed.
    JobCompleted {
        job_id: JobId,
        path: KbPath,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// Every job on a path was removed.
    JobsCleared {
        path: KbPath,
        removed: u64,
        timestamp: DateTime<Utc>,
    },

    // Reply pool events
    /// A reply was written into a free slot.
    ReplyPushed {
        slot_id: SlotId,
        path: KbPath,
        request_id: RequestId,
        timestamp: DateTime<Utc>,
    },
    /// A reply was taken by the client and its slot freed.
    ReplyClaimed {
        slot_id: SlotId,
        path: KbPath,
        request_id: RequestId,
        timestamp: DateTime<Utc>,
    },
    /// Every slot on a path was reset to free.
    PoolCleared {
        path: KbPath,
        reset: u64,
        timestamp: DateTime<Utc>,
    },
}

impl RpcEvent {
    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            RpcEvent::JobPushed { job, .. } => Some(job.id),
            RpcEvent::JobClaimed { job_id, .. } => Some(*job_id),
            RpcEvent::JobCompleted { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            RpcEvent::JobPushed { job, .. } => {
                format!("Job {} pushed to {} ({})", job.id, job.path, job.action)
            }
            RpcEvent::JobClaimed { job_id, path, .. } => {
                format!("Job {} claimed on {}", job_id, path)
            }
            RpcEvent::JobCompleted {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} completed in {}ms", job_id, duration_ms),
            RpcEvent::JobsCleared { path, removed, .. } => {
                format!("Cleared {} jobs from {}", removed, path)
            }
            RpcEvent::ReplyPushed {
                path, request_id, ..
            } => format!("Reply for {} queued on {}", request_id, path),
            RpcEvent::ReplyClaimed {
                path, request_id, ..
            } => format!("Reply for {} taken from {}", request_id, path),
            RpcEvent::PoolCleared { path, reset, .. } => {
                format!("Reset {} reply slots on {}", reset, path)
            }
        }
    }
}
