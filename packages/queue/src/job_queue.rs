//! Server-side job queue.
//!
//! Every server path is an independent priority queue. Jobs move through
//! `New -> Processing -> Completed`; each pushed job is handed to exactly one
//! consumer, highest priority first and first-in-first-out among equals.

use std::sync::Arc;

use chrono::Utc;
use db::{Comparator, Mutation, Predicate, RecordStore, Sweep, store};
use rpc_core::{
    JobId, JobRecord, JobState, JobStats, KbPath, ListOptions, RequestId, RetryPolicy, RpcError,
    RpcEvent, RpcResult,
};
use tokio::sync::{Mutex, broadcast};
use ulid::Generator;

use crate::claim::{ClaimCoordinator, KeyedUpdate};

/// Everything a producer supplies when pushing a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub path: KbPath,
    pub request_id: RequestId,
    pub action: String,
    pub payload: serde_json::Value,
    pub transaction_tag: String,
    pub priority: i64,
    pub reply_route: Option<KbPath>,
}

impl JobRequest {
    /// Create a request with priority 0, no tag and no reply route.
    pub fn new(
        path: KbPath,
        request_id: RequestId,
        action: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            path,
            request_id,
            action: action.into(),
            payload,
            transaction_tag: String::new(),
            priority: 0,
            reply_route: None,
        }
    }

    /// Set the priority. Higher values are served first.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Set the transaction tag.
    pub fn with_transaction_tag(mut self, tag: impl Into<String>) -> Self {
        self.transaction_tag = tag.into();
        self
    }

    /// Route the reply to a client pool.
    pub fn with_reply_route(mut self, route: KbPath) -> Self {
        self.reply_route = Some(route);
        self
    }
}

/// Priority job queue over a [`RecordStore`].
pub struct ServerJobQueue<S> {
    claims: Arc<ClaimCoordinator<JobRecord, S>>,
    ids: Mutex<Generator>,
    event_tx: Option<broadcast::Sender<RpcEvent>>,
}

fn in_state(state: JobState) -> Predicate<JobRecord> {
    store::predicate(move |job: &JobRecord| job.state == state)
}

fn serve_order() -> Comparator<JobRecord> {
    store::comparator(JobRecord::serve_order)
}

impl<S: RecordStore<JobRecord>> ServerJobQueue<S> {
    /// Create a queue over a shared store.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_coordinator(Arc::new(ClaimCoordinator::new(store)))
    }

    /// Create a queue around an existing coordinator.
    fn with_coordinator(claims: Arc<ClaimCoordinator<JobRecord, S>>) -> Self {
        Self {
            claims,
            ids: Mutex::new(Generator::new()),
            event_tx: None,
        }
    }

    /// Set the event broadcaster.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<RpcEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn broadcast(&self, event: RpcEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// The record as committed by `mutation`. Falls back to replaying the
    /// mutation when it cannot be read back.
    async fn read_back(
        &self,
        path: &KbPath,
        previous: &JobRecord,
        mutation: &Mutation<JobRecord>,
    ) -> JobRecord {
        match self.claims.store().get(path.as_str(), &previous.id.to_string()).await {
            Ok(Some(job)) => job,
            Ok(None) => mutation(previous),
            Err(e) => {
                tracing::warn!("Failed to read back job {} on {}: {}", previous.id, path, e);
                mutation(previous)
            }
        }
    }

    /// Insert a new job. Duplicate request ids are accepted as-is.
    pub async fn push(&self, request: JobRequest) -> RpcResult<JobId> {
        if request.action.trim().is_empty() {
            return Err(RpcError::Validation("action must not be empty".into()));
        }

        // Id and enqueue time are taken together so both orderings agree.
        let (id, now) = {
            let mut ids = self.ids.lock().await;
            let id = ids
                .generate()
                .map_err(|e| RpcError::Storage(format!("job id generator: {}", e)))?;
            (JobId(id), Utc::now())
        };

        let mut job = JobRecord::new(request.path, request.request_id, request.action, request.payload)
            .with_id(id)
            .with_priority(request.priority)
            .with_transaction_tag(request.transaction_tag)
            .with_reply_route(request.reply_route);
        job.enqueued_at = now;

        let job = self.claims.store().insert(job).await?;
        tracing::debug!(
            "Pushed job {} ({}) on {} with priority {}",
            job.id,
            job.action,
            job.path,
            job.priority
        );

        self.broadcast(RpcEvent::JobPushed {
            job: Box::new(job),
            timestamp: now,
        });
        Ok(id)
    }

    /// Claim the best New job on `path` and move it to Processing.
    ///
    /// `Ok(None)` means the path has no New job. The returned record already
    /// carries the Processing state and `claimed_at`.
    pub async fn peek_and_claim(
        &self,
        path: &KbPath,
        policy: &RetryPolicy,
    ) -> RpcResult<Option<JobRecord>> {
        let start = store::mutation(|job: &JobRecord| JobRecord {
            state: JobState::Processing,
            claimed_at: Some(Utc::now()),
            ..job.clone()
        });

        let claimed = self
            .claims
            .claim_with_retry(
                path.as_str(),
                &in_state(JobState::New),
                &serve_order(),
                &start,
                policy,
            )
            .await?;

        let Some(previous) = claimed else {
            return Ok(None);
        };
        let job = self.read_back(path, &previous, &start).await;
        tracing::debug!("Claimed job {} ({}) on {}", job.id, job.action, path);

        self.broadcast(RpcEvent::JobClaimed {
            job_id: job.id,
            path: path.clone(),
            timestamp: job.claimed_at.unwrap_or_else(Utc::now),
        });
        Ok(Some(job))
    }

    /// Move a Processing job on `path` to Completed.
    ///
    /// Unknown ids fail with `NotFound`, New or Completed jobs with
    /// `ProtocolViolation`. Neither failure touches the record.
    pub async fn mark_completion(
        &self,
        path: &KbPath,
        job_id: JobId,
        policy: &RetryPolicy,
    ) -> RpcResult<JobRecord> {
        let finish = store::mutation(|job: &JobRecord| JobRecord {
            state: JobState::Completed,
            completed_at: Some(Utc::now()),
            ..job.clone()
        });

        let outcome = self
            .claims
            .update_key(
                path.as_str(),
                &job_id.to_string(),
                &in_state(JobState::Processing),
                &finish,
                policy,
            )
            .await?;

        match outcome {
            KeyedUpdate::Applied(previous) => {
                let job = self.read_back(path, &previous, &finish).await;
                let now = job.completed_at.unwrap_or_else(Utc::now);
                let duration_ms = job
                    .claimed_at
                    .map(|claimed| (now - claimed).num_milliseconds().max(0) as u64)
                    .unwrap_or_default();
                tracing::debug!("Completed job {} on {} in {}ms", job.id, path, duration_ms);

                self.broadcast(RpcEvent::JobCompleted {
                    job_id,
                    path: path.clone(),
                    duration_ms,
                    timestamp: now,
                });
                Ok(job)
            }
            KeyedUpdate::Rejected(current) => Err(RpcError::ProtocolViolation {
                id: job_id,
                state: current.state,
            }),
            KeyedUpdate::Missing => Err(RpcError::NotFound {
                path: path.to_string(),
                id: job_id.to_string(),
            }),
        }
    }

    /// Number of jobs on `path` in `state`. May be stale.
    pub async fn count_by_state(&self, path: &KbPath, state: JobState) -> RpcResult<u64> {
        self.claims.count(path.as_str(), &in_state(state)).await
    }

    /// Number of jobs on `path` carrying `action`, in any state. May be stale.
    pub async fn count_by_action(&self, path: &KbPath, action: &str) -> RpcResult<u64> {
        let action = action.to_string();
        let matches = store::predicate(move |job: &JobRecord| job.action == action);
        self.claims.count(path.as_str(), &matches).await
    }

    /// A page of the jobs on `path` in `state`.
    ///
    /// New jobs come in serving order; Processing and Completed jobs oldest
    /// claim or completion first. The window of `options` applies to the
    /// time the job entered `state`.
    pub async fn list_by_state(
        &self,
        path: &KbPath,
        state: JobState,
        options: &ListOptions,
    ) -> RpcResult<Vec<JobRecord>> {
        let window = *options;
        let matches = store::predicate(move |job: &JobRecord| {
            job.state == state && window.in_window(job.state_changed_at())
        });
        let jobs = self
            .claims
            .list(path.as_str(), &matches, &store::comparator(JobRecord::listing_order))
            .await?;
        Ok(options.page(jobs))
    }

    /// Per-state counts for `path`, taken from one snapshot.
    pub async fn stats(&self, path: &KbPath) -> RpcResult<JobStats> {
        let all = store::predicate(|_: &JobRecord| true);
        let jobs = self.claims.list(path.as_str(), &all, &serve_order()).await?;

        let mut stats = JobStats::default();
        for job in &jobs {
            match job.state {
                JobState::New => stats.new += 1,
                JobState::Processing => stats.processing += 1,
                JobState::Completed => stats.completed += 1,
            }
        }
        Ok(stats)
    }

    /// Remove every job on `path` regardless of state.
    ///
    /// Jobs pushed while the clear is running may survive it.
    pub async fn clear(&self, path: &KbPath, policy: &RetryPolicy) -> RpcResult<u64> {
        let all = store::predicate(|_: &JobRecord| true);
        let removed = self
            .claims
            .sweep_with_retry(path.as_str(), &all, &Sweep::Delete, policy)
            .await? as u64;
        tracing::info!("Cleared {} jobs from {}", removed, path);

        self.broadcast(RpcEvent::JobsCleared {
            path: path.clone(),
            removed,
            timestamp: Utc::now(),
        });
        Ok(removed)
    }
}
