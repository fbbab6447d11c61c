//! Core domain types for the path-addressed RPC queue.
//!
//! This crate contains shared types used across all packages:
//! - KbPath and RequestId for addressing and correlation
//! - JobRecord and JobState for server-side jobs
//! - ReplySlot and ReplyPayload for client-side reply pools
//! - RetryPolicy, ClaimResult and RpcError for the claim protocol
//! - ListOptions for paged listings
//! - Events for observing activity

mod claim;
mod error;
mod events;
mod job;
mod listing;
mod path;
mod retry;
mod slot;

pub use claim::ClaimResult;
pub use error::{RpcError, RpcResult};
pub use events::RpcEvent;
pub use job::{JobId, JobRecord, JobState, JobStats};
pub use listing::ListOptions;
pub use path::{KbPath, RequestId};
pub use retry::{Backoff, MAX_BACKOFF, RetryPolicy};
pub use slot::{ReplyPayload, ReplyPoolStats, ReplySlot, ReplyWrite, SlotId};
