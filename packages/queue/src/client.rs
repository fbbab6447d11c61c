//! Caller-side helper pairing a server path with the caller's reply pool.

use std::sync::Arc;

use db::RecordStore;
use rpc_core::{JobRecord, KbPath, ReplyPayload, ReplySlot, RequestId, RpcResult};

use crate::facade::RpcQueues;
use crate::job_queue::JobRequest;

/// Issues requests whose replies come back to a fixed client path.
pub struct RpcClient<J, P> {
    queues: Arc<RpcQueues<J, P>>,
    client_path: KbPath,
}

impl<J, P> RpcClient<J, P>
where
    J: RecordStore<JobRecord>,
    P: RecordStore<ReplySlot>,
{
    /// Create a client replying to `client_path`. The pool must already be
    /// provisioned.
    pub fn new(queues: Arc<RpcQueues<J, P>>, client_path: KbPath) -> Self {
        Self {
            queues,
            client_path,
        }
    }

    /// The path replies are delivered to.
    pub fn client_path(&self) -> &KbPath {
        &self.client_path
    }

    /// Push a request to `server_path` and return its correlation id.
    pub async fn call(
        &self,
        server_path: &KbPath,
        action: &str,
        payload: serde_json::Value,
        priority: i64,
    ) -> RpcResult<RequestId> {
        let request_id = RequestId::generate();
        let request = JobRequest::new(server_path.clone(), request_id.clone(), action, payload)
            .with_priority(priority)
            .with_transaction_tag(request_id.as_str())
            .with_reply_route(self.client_path.clone());

        let job_id = self.queues.push_job(request).await?;
        tracing::debug!("Called {} on {} as job {} ({})", action, server_path, job_id, request_id);
        Ok(request_id)
    }

    /// Take the oldest reply waiting for this client, if any.
    pub async fn poll_reply(&self) -> RpcResult<Option<ReplyPayload>> {
        self.queues.claim_reply(&self.client_path).await
    }
}
