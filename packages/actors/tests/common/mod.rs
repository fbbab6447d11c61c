#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use db::MemoryStore;
use rpc_core::{JobRecord, KbPath, ReplyPayload, ReplySlot, RetryPolicy, RpcResult};
use rpc_queue::{RpcClient, RpcQueues};

pub type MemoryQueues = RpcQueues<MemoryStore<JobRecord>, MemoryStore<ReplySlot>>;

pub fn path(raw: &str) -> KbPath {
    KbPath::parse(raw).expect("valid test path")
}

pub fn memory_queues() -> Arc<MemoryQueues> {
    Arc::new(
        RpcQueues::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
            .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(5))),
    )
}

/// Poll until a reply arrives or two seconds pass.
pub async fn wait_for_reply(
    client: &RpcClient<MemoryStore<JobRecord>, MemoryStore<ReplySlot>>,
) -> RpcResult<Option<ReplyPayload>> {
    for _ in 0..200 {
        if let Some(reply) = client.poll_reply().await? {
            return Ok(Some(reply));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(None)
}
