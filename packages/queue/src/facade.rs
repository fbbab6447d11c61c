//! Single entry point routing to the job queue and the reply pool.

use std::sync::Arc;

use db::RecordStore;
use rpc_core::{
    JobId, JobRecord, JobState, JobStats, KbPath, ListOptions, ReplyPayload, ReplyPoolStats,
    ReplySlot, ReplyWrite, RetryPolicy, RpcEvent, RpcResult, SlotId,
};
use tokio::sync::broadcast;

use crate::job_queue::{JobRequest, ServerJobQueue};
use crate::provision::provision_reply_pool;
use crate::reply_pool::ClientReplySlotPool;

/// Capacity of the event channel.
const EVENT_CAPACITY: usize = 1024;

/// Push, claim, complete, count and clear operations for both queue types.
///
/// Every retrying operation uses the facade's [`RetryPolicy`]. Events from
/// both queues are published on one broadcast channel.
pub struct RpcQueues<J, P> {
    jobs: ServerJobQueue<J>,
    replies: ClientReplySlotPool<P>,
    slots: Arc<P>,
    policy: RetryPolicy,
    event_tx: broadcast::Sender<RpcEvent>,
}

impl<J, P> RpcQueues<J, P>
where
    J: RecordStore<JobRecord>,
    P: RecordStore<ReplySlot>,
{
    /// Create a facade over a job store and a reply slot store.
    pub fn new(job_store: Arc<J>, slot_store: Arc<P>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            jobs: ServerJobQueue::new(job_store).with_event_tx(event_tx.clone()),
            replies: ClientReplySlotPool::new(slot_store.clone()).with_event_tx(event_tx.clone()),
            slots: slot_store,
            policy: RetryPolicy::default(),
            event_tx,
        }
    }

    /// Set the retry policy used by every operation.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The retry policy in use.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Subscribe to queue and pool events.
    pub fn subscribe(&self) -> broadcast::Receiver<RpcEvent> {
        self.event_tx.subscribe()
    }

    // Server job queue

    pub async fn push_job(&self, request: JobRequest) -> RpcResult<JobId> {
        self.jobs.push(request).await
    }

    pub async fn claim_job(&self, path: &KbPath) -> RpcResult<Option<JobRecord>> {
        self.jobs.peek_and_claim(path, &self.policy).await
    }

    pub async fn complete_job(&self, path: &KbPath, job_id: JobId) -> RpcResult<JobRecord> {
        self.jobs.mark_completion(path, job_id, &self.policy).await
    }

    pub async fn count_jobs(&self, path: &KbPath, state: JobState) -> RpcResult<u64> {
        self.jobs.count_by_state(path, state).await
    }

    pub async fn count_jobs_by_action(&self, path: &KbPath, action: &str) -> RpcResult<u64> {
        self.jobs.count_by_action(path, action).await
    }

    pub async fn list_jobs(
        &self,
        path: &KbPath,
        state: JobState,
        options: &ListOptions,
    ) -> RpcResult<Vec<JobRecord>> {
        self.jobs.list_by_state(path, state, options).await
    }

    pub async fn job_stats(&self, path: &KbPath) -> RpcResult<JobStats> {
        self.jobs.stats(path).await
    }

    pub async fn clear_jobs(&self, path: &KbPath) -> RpcResult<u64> {
        self.jobs.clear(path, &self.policy).await
    }

    // Client reply pool

    /// Provision a reply pool of `depth` slots for `path`.
    pub async fn provision_pool(&self, path: &KbPath, depth: usize) -> RpcResult<Vec<SlotId>> {
        provision_reply_pool(self.slots.as_ref(), path, depth).await
    }

    pub async fn push_reply(&self, path: &KbPath, reply: ReplyWrite) -> RpcResult<SlotId> {
        self.replies
            .push_and_claim_reply(path, reply, &self.policy)
            .await
    }

    pub async fn claim_reply(&self, path: &KbPath) -> RpcResult<Option<ReplyPayload>> {
        self.replies.peek_and_claim_reply(path, &self.policy).await
    }

    pub async fn free_slots(&self, path: &KbPath) -> RpcResult<u64> {
        self.replies.free_count(path).await
    }

    pub async fn occupied_slots(&self, path: &KbPath) -> RpcResult<u64> {
        self.replies.occupied_count(path).await
    }

    pub async fn waiting_replies(
        &self,
        path: &KbPath,
        options: &ListOptions,
    ) -> RpcResult<Vec<ReplyPayload>> {
        self.replies.list_waiting(path, options).await
    }

    pub async fn pool_stats(&self, path: &KbPath) -> RpcResult<ReplyPoolStats> {
        self.replies.stats(path).await
    }

    pub async fn clear_replies(&self, path: &KbPath) -> RpcResult<u64> {
        self.replies.clear_all(path, &self.policy).await
    }
}
