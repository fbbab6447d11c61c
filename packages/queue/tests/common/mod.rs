#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use db::{
    Comparator, DbConfig, Intent, MemoryStore, Mutation, Predicate, RecordStore, Scan, StoreError,
    StoreRecord, SurrealStore, Sweep,
};
use rpc_core::{JobRecord, KbPath, ReplySlot, ReplyWrite, RequestId, RetryPolicy};
use rpc_queue::{JobRequest, RpcQueues};
use serde_json::json;

pub type MemoryQueues = RpcQueues<MemoryStore<JobRecord>, MemoryStore<ReplySlot>>;

pub type SurrealQueues = RpcQueues<SurrealStore<JobRecord>, SurrealStore<ReplySlot>>;

pub fn path(raw: &str) -> KbPath {
    KbPath::parse(raw).expect("valid test path")
}

/// Short retry budget so exhaustion tests finish quickly.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(5))
}

pub fn memory_queues() -> MemoryQueues {
    queues_over(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
}

/// Facade with the fast policy over stores the test keeps a handle on.
pub fn queues_over<J, P>(jobs: Arc<J>, slots: Arc<P>) -> RpcQueues<J, P>
where
    J: RecordStore<JobRecord>,
    P: RecordStore<ReplySlot>,
{
    RpcQueues::new(jobs, slots).with_retry_policy(fast_policy())
}

/// Job and slot stores over a fresh in-memory SurrealDB.
pub async fn surreal_stores()
-> Result<(Arc<SurrealStore<JobRecord>>, Arc<SurrealStore<ReplySlot>>), StoreError> {
    let db_conn = db::init(&DbConfig::memory()).await?;
    Ok((
        Arc::new(SurrealStore::new(db_conn.clone())),
        Arc::new(SurrealStore::new(db_conn)),
    ))
}

pub async fn surreal_queues() -> Result<SurrealQueues, StoreError> {
    let (jobs, slots) = surreal_stores().await?;
    Ok(queues_over(jobs, slots))
}

pub fn request(raw_path: &str, action: &str, priority: i64) -> JobRequest {
    JobRequest::new(
        path(raw_path),
        RequestId::generate(),
        action,
        json!({ "priority": priority }),
    )
    .with_priority(priority)
}

pub fn reply(server: &str, action: &str) -> ReplyWrite {
    ReplyWrite {
        request_id: RequestId::generate(),
        server_path: path(server),
        action: action.to_string(),
        transaction_tag: String::new(),
        payload: json!({ "ok": true }),
    }
}

/// Memory store whose commits can be made to fail on demand.
pub struct FailingStore<R> {
    inner: MemoryStore<R>,
    fail_commits: AtomicBool,
    contend_commits: AtomicBool,
}

impl<R: StoreRecord> FailingStore<R> {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_commits: AtomicBool::new(false),
            contend_commits: AtomicBool::new(false),
        }
    }

    /// Commits fail with a fatal storage error.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Commits report a transient conflict and leave the intent in place.
    pub fn contend_commits(&self, contend: bool) {
        self.contend_commits.store(contend, Ordering::SeqCst);
    }
}

impl<R: StoreRecord> RecordStore<R> for FailingStore<R> {
    async fn insert(&self, record: R) -> Result<R, StoreError> {
        self.inner.insert(record).await
    }

    async fn get(&self, scope: &str, key: &str) -> Result<Option<R>, StoreError> {
        self.inner.get(scope, key).await
    }

    async fn query_eligible(
        &self,
        scope: &str,
        eligible: &Predicate<R>,
        order: &Comparator<R>,
        limit: usize,
    ) -> Result<Scan<R>, StoreError> {
        self.inner.query_eligible(scope, eligible, order, limit).await
    }

    async fn try_acquire_intent(&self, scope: &str, key: &str) -> Result<Option<Intent>, StoreError> {
        self.inner.try_acquire_intent(scope, key).await
    }

    async fn release_intent(&self, intent: &Intent) -> Result<(), StoreError> {
        self.inner.release_intent(intent).await
    }

    async fn apply_and_commit(
        &self,
        intent: &Intent,
        guard: &Predicate<R>,
        mutation: &Mutation<R>,
    ) -> Result<Option<R>, StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Query("disk on fire".into()));
        }
        if self.contend_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Contended(intent.key.clone()));
        }
        self.inner.apply_and_commit(intent, guard, mutation).await
    }

    async fn delete_or_reset(
        &self,
        scope: &str,
        predicate: &Predicate<R>,
        sweep: &Sweep<R>,
    ) -> Result<usize, StoreError> {
        self.inner.delete_or_reset(scope, predicate, sweep).await
    }

    async fn count_matching(&self, scope: &str, predicate: &Predicate<R>) -> Result<usize, StoreError> {
        self.inner.count_matching(scope, predicate).await
    }

    async fn list_matching(
        &self,
        scope: &str,
        predicate: &Predicate<R>,
        order: &Comparator<R>,
    ) -> Result<Vec<R>, StoreError> {
        self.inner.list_matching(scope, predicate, order).await
    }
}
