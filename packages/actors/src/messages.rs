//! Message types for actor communication.

use rpc_core::RpcError;
use ractor::RpcReplyPort;
use serde::{Deserialize, Serialize};

/// Messages for the RpcServerActor.
#[derive(Debug)]
pub enum ServerMessage {
    /// Claim the next job and serve it.
    Poll,

    /// Stop claiming new jobs.
    Pause,

    /// Resume claiming.
    Resume,

    /// Get serving counters.
    GetStats { reply: RpcReplyPort<ServerStats> },

    /// Stop the server.
    Shutdown,
}

/// Counters kept by a running server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStats {
    /// Jobs claimed and completed.
    pub served: u64,
    /// Jobs whose handler failed, timed out or was missing.
    pub failed: u64,
    /// Replies that could not be delivered to their route.
    pub replies_dropped: u64,
    /// Whether claiming is paused.
    pub paused: bool,
}

/// Result type for actor operations.
pub type ActorResult<T> = Result<T, ActorError>;

/// Error type for actor operations.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("Queue error: {0}")]
    Queue(#[from] RpcError),

    #[error("Failed to spawn actor: {0}")]
    Spawn(String),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Timeout")]
    Timeout,
}

impl From<ractor::SpawnErr> for ActorError {
    fn from(err: ractor::SpawnErr) -> Self {
        ActorError::Spawn(err.to_string())
    }
}
