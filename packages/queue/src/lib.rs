//! Path-addressed RPC queues.
//!
//! Servers pull jobs from a [`ServerJobQueue`] keyed by server path; replies
//! travel back through a bounded [`ClientReplySlotPool`] keyed by client
//! path. Both are built on the [`ClaimCoordinator`], which gives at-most-once
//! claims over any [`db::RecordStore`].
//!
//! # Example
//!
//! ```ignore
//! let queues = RpcQueues::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()));
//! queues.provision_pool(&client, 4).await?;
//!
//! let request = JobRequest::new(server.clone(), RequestId::generate(), "echo", json!({}))
//!     .with_reply_route(client.clone());
//! queues.push_job(request).await?;
//!
//! if let Some(job) = queues.claim_job(&server).await? {
//!     queues.complete_job(&server, job.id).await?;
//! }
//! ```

mod claim;
mod client;
mod facade;
mod job_queue;
mod provision;
mod reply_pool;

pub use claim::{ClaimCoordinator, KeyedUpdate};
pub use client::RpcClient;
pub use facade::RpcQueues;
pub use job_queue::{JobRequest, ServerJobQueue};
pub use provision::provision_reply_pool;
pub use reply_pool::ClientReplySlotPool;
