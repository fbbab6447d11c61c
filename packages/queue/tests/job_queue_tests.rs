#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;

use std::time::Duration;

use chrono::Utc;
use db::{MemoryStore, RecordStore};
use futures_util::future::join_all;
use rpc_core::{JobId, JobRecord, JobState, ListOptions, RetryPolicy, RpcError, RpcEvent};
use rpc_queue::ServerJobQueue;

#[tokio::test]
async fn test_priority_order() -> Result<(), Box<dyn Error>> {
    let queues = common::memory_queues();
    let svc = common::path("svc.a");

    for priority in [1, 5, 3] {
        queues.push_job(common::request("svc.a", "work", priority)).await?;
    }

    let mut served = Vec::new();
    while let Some(job) = queues.claim_job(&svc).await? {
        assert_eq!(job.state, JobState::Processing);
        assert!(job.claimed_at.is_some());
        served.push(job.priority);
    }
    assert_eq!(served, vec![5, 3, 1]);
    Ok(())
}

#[tokio::test]
async fn test_fifo_among_equal_priority() -> Result<(), Box<dyn Error>> {
    let queues = common::memory_queues();
    let svc = common::path("svc.fifo");

    let mut pushed = Vec::new();
    for _ in 0..5 {
        pushed.push(queues.push_job(common::request("svc.fifo", "work", 2)).await?);
    }

    let mut served = Vec::new();
    while let Some(job) = queues.claim_job(&svc).await? {
        served.push(job.id);
    }
    assert_eq!(served, pushed);
    Ok(())
}

#[tokio::test]
async fn test_end_to_end_counts() -> Result<(), Box<dyn Error>> {
    let queues = common::memory_queues();
    let svc = common::path("svc.a");

    for priority in [1, 2, 3] {
        queues.push_job(common::request("svc.a", "work", priority)).await?;
    }

    let job = queues.claim_job(&svc).await?.expect("job available");
    assert_eq!(job.priority, 3);

    let completed = queues.complete_job(&svc, job.id).await?;
    assert_eq!(completed.state, JobState::Completed);
    assert!(completed.completed_at.is_some());

    assert_eq!(queues.count_jobs(&svc, JobState::New).await?, 2);
    assert_eq!(queues.count_jobs(&svc, JobState::Processing).await?, 0);
    assert_eq!(queues.count_jobs(&svc, JobState::Completed).await?, 1);

    let stats = queues.job_stats(&svc).await?;
    assert_eq!(stats.new, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.total(), 3);
    Ok(())
}

#[tokio::test]
async fn test_paths_are_independent() -> Result<(), Box<dyn Error>> {
    let queues = common::memory_queues();
    queues.push_job(common::request("svc.a", "work", 1)).await?;

    assert!(queues.claim_job(&common::path("svc.b")).await?.is_none());
    assert!(queues.claim_job(&common::path("svc.a")).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_empty_queue_claims_nothing() -> Result<(), Box<dyn Error>> {
    let queues = common::memory_queues();
    assert!(queues.claim_job(&common::path("svc.empty")).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_count_by_action() -> Result<(), Box<dyn Error>> {
    let queues = common::memory_queues();
    let svc = common::path("svc.a");
    queues.push_job(common::request("svc.a", "resize", 1)).await?;
    queues.push_job(common::request("svc.a", "resize", 2)).await?;
    queues.push_job(common::request("svc.a", "thumbnail", 3)).await?;

    assert_eq!(queues.count_jobs_by_action(&svc, "resize").await?, 2);
    assert_eq!(queues.count_jobs_by_action(&svc, "thumbnail").await?, 1);
    assert_eq!(queues.count_jobs_by_action(&svc, "missing").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_list_by_state_in_serving_order() -> Result<(), Box<dyn Error>> {
    let queues = common::memory_queues();
    let svc = common::path("svc.a");
    for priority in [2, 9, 4] {
        queues.push_job(common::request("svc.a", "work", priority)).await?;
    }

    let listed: Vec<i64> = queues
        .list_jobs(&svc, JobState::New, &ListOptions::all())
        .await?
        .iter()
        .map(|job| job.priority)
        .collect();
    assert_eq!(listed, vec![9, 4, 2]);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_request_ids_coexist() -> Result<(), Box<dyn Error>> {
    let queues = common::memory_queues();
    let svc = common::path("svc.a");
    let request = common::request("svc.a", "work", 1);

    let first = queues.push_job(request.clone()).await?;
    let second = queues.push_job(request).await?;
    assert_ne!(first, second);
    assert_eq!(queues.count_jobs(&svc, JobState::New).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_push_rejects_empty_action() -> Result<(), Box<dyn Error>> {
    let queues = common::memory_queues();
    let result = queues.push_job(common::request("svc.a", "  ", 1)).await;
    assert!(matches!(result, Err(RpcError::Validation(_))));
    assert_eq!(queues.count_jobs(&common::path("svc.a"), JobState::New).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_protocol_violations_leave_jobs_untouched() -> Result<(), Box<dyn Error>> {
    let queues = common::memory_queues();
    let svc = common::path("svc.a");

    let new_id = queues.push_job(common::request("svc.a", "work", 1)).await?;
    let result = queues.complete_job(&svc, new_id).await;
    assert_eq!(
        result,
        Err(RpcError::ProtocolViolation {
            id: new_id,
            state: JobState::New
        })
    );
    assert_eq!(queues.count_jobs(&svc, JobState::New).await?, 1);

    let job = queues.claim_job(&svc).await?.expect("job available");
    queues.complete_job(&svc, job.id).await?;
    let again = queues.complete_job(&svc, job.id).await;
    assert!(matches!(
        again,
        Err(RpcError::ProtocolViolation {
            state: JobState::Completed,
            ..
        })
    ));

    let unknown = queues.complete_job(&svc, JobId::new()).await;
    assert!(matches!(unknown, Err(RpcError::NotFound { .. })));

    // A job cannot be completed through another path.
    let other = queues.push_job(common::request("svc.a", "work", 1)).await?;
    let claimed = queues.claim_job(&svc).await?.expect("job available");
    assert_eq!(claimed.id, other);
    let wrong_path = queues.complete_job(&common::path("svc.b"), other).await;
    assert!(matches!(wrong_path, Err(RpcError::NotFound { .. })));
    assert_eq!(queues.count_jobs(&svc, JobState::Processing).await?, 1);
    assert_eq!(queues.count_jobs(&svc, JobState::Completed).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_clear_is_idempotent() -> Result<(), Box<dyn Error>> {
    let queues = common::memory_queues();
    let svc = common::path("svc.a");
    for priority in [1, 2, 3] {
        queues.push_job(common::request("svc.a", "work", priority)).await?;
    }
    let job = queues.claim_job(&svc).await?.expect("job available");
    queues.complete_job(&svc, job.id).await?;
    queues.claim_job(&svc).await?.expect("job available");

    assert_eq!(queues.clear_jobs(&svc).await?, 3);
    assert_eq!(queues.clear_jobs(&svc).await?, 0);
    assert_eq!(queues.job_stats(&svc).await?.total(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_are_at_most_once() -> Result<(), Box<dyn Error>> {
    let queues = Arc::new(common::memory_queues().with_retry_policy(
        RetryPolicy::new(50, Duration::from_millis(1)),
    ));
    let svc = common::path("svc.race");

    const JOBS: usize = 20;
    const CLAIMERS: usize = 32;
    for i in 0..JOBS {
        queues
            .push_job(common::request("svc.race", "work", (i % 4) as i64))
            .await?;
    }

    let handles = (0..CLAIMERS).map(|_| {
        let queues = queues.clone();
        let svc = svc.clone();
        tokio::spawn(async move { queues.claim_job(&svc).await })
    });

    let mut claimed = Vec::new();
    for joined in join_all(handles).await {
        if let Some(job) = joined?? {
            claimed.push(job.id);
        }
    }

    let distinct: HashSet<JobId> = claimed.iter().copied().collect();
    assert_eq!(claimed.len(), JOBS.min(CLAIMERS));
    assert_eq!(distinct.len(), claimed.len());
    assert_eq!(queues.count_jobs(&svc, JobState::Processing).await?, JOBS as u64);
    assert_eq!(queues.count_jobs(&svc, JobState::New).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_storage_failure_leaves_job_claimable() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(common::FailingStore::<JobRecord>::new());
    let queue = ServerJobQueue::new(store.clone());
    let svc = common::path("svc.a");
    let policy = common::fast_policy();

    let id = queue.push(common::request("svc.a", "work", 1)).await?;

    store.fail_commits(true);
    let failed = queue.peek_and_claim(&svc, &policy).await;
    assert!(matches!(failed, Err(RpcError::Storage(_))));
    assert!(failed.is_err_and(|e| e.is_fatal()));
    assert_eq!(queue.count_by_state(&svc, JobState::New).await?, 1);

    // The intent was released, so the job is claimable again.
    store.fail_commits(false);
    let job = queue.peek_and_claim(&svc, &policy).await?.expect("job available");
    assert_eq!(job.id, id);
    Ok(())
}

#[tokio::test]
async fn test_events_are_broadcast() -> Result<(), Box<dyn Error>> {
    let queues = common::memory_queues();
    let mut events = queues.subscribe();
    let svc = common::path("svc.a");

    let id = queues.push_job(common::request("svc.a", "work", 1)).await?;
    queues.claim_job(&svc).await?;
    queues.complete_job(&svc, id).await?;
    queues.clear_jobs(&svc).await?;

    assert!(matches!(events.recv().await?, RpcEvent::JobPushed { .. }));
    let claimed = events.recv().await?;
    assert_eq!(claimed.job_id(), Some(id));
    assert!(matches!(claimed, RpcEvent::JobClaimed { .. }));
    assert!(matches!(events.recv().await?, RpcEvent::JobCompleted { .. }));
    assert!(matches!(
        events.recv().await?,
        RpcEvent::JobsCleared { removed: 1, .. }
    ));
    Ok(())
}

#[tokio::test]
async fn test_list_pages_after_ordering() -> Result<(), Box<dyn Error>> {
    let queues = common::memory_queues();
    let svc = common::path("svc.a");
    for priority in [1, 7, 3, 9, 5] {
        queues.push_job(common::request("svc.a", "work", priority)).await?;
    }

    let page = |offset, limit| ListOptions::all().with_offset(offset).with_limit(limit);
    let priorities = |jobs: Vec<JobRecord>| jobs.iter().map(|job| job.priority).collect::<Vec<_>>();

    let first = queues.list_jobs(&svc, JobState::New, &page(0, 2)).await?;
    assert_eq!(priorities(first), vec![9, 7]);
    let second = queues.list_jobs(&svc, JobState::New, &page(2, 2)).await?;
    assert_eq!(priorities(second), vec![5, 3]);
    let last = queues.list_jobs(&svc, JobState::New, &page(4, 2)).await?;
    assert_eq!(priorities(last), vec![1]);
    assert!(queues.list_jobs(&svc, JobState::New, &page(5, 2)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_completed_listing_window() -> Result<(), Box<dyn Error>> {
    let queues = common::memory_queues();
    let svc = common::path("svc.a");
    for _ in 0..3 {
        queues.push_job(common::request("svc.a", "work", 1)).await?;
    }

    let mut completed = Vec::new();
    while let Some(job) = queues.claim_job(&svc).await? {
        completed.push(queues.complete_job(&svc, job.id).await?.id);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let listed = queues
        .list_jobs(&svc, JobState::Completed, &ListOptions::all())
        .await?;
    let ids: Vec<JobId> = listed.iter().map(|job| job.id).collect();
    assert_eq!(ids, completed);

    // Both bounds are inclusive.
    let second_done = listed[1].completed_at.expect("completion time");
    let from_second = ListOptions::all().with_after(second_done);
    let window = queues.list_jobs(&svc, JobState::Completed, &from_second).await?;
    assert_eq!(window.iter().map(|job| job.id).collect::<Vec<_>>(), ids[1..]);

    let up_to_second = ListOptions::all().with_before(second_done);
    let window = queues.list_jobs(&svc, JobState::Completed, &up_to_second).await?;
    assert_eq!(window.iter().map(|job| job.id).collect::<Vec<_>>(), ids[..2]);

    let future = ListOptions::all().with_after(Utc::now() + chrono::Duration::seconds(60));
    assert!(queues.list_jobs(&svc, JobState::Completed, &future).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_claimed_record_matches_store() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(MemoryStore::<JobRecord>::new());
    let queue = ServerJobQueue::new(store.clone());
    let svc = common::path("svc.a");
    let policy = common::fast_policy();
    let before = Utc::now();

    let id = queue.push(common::request("svc.a", "work", 1)).await?;
    let claimed = queue.peek_and_claim(&svc, &policy).await?.expect("job available");
    let stored = store
        .get(svc.as_str(), &id.to_string())
        .await?
        .expect("job stored");
    assert_eq!(claimed, stored);
    assert!(claimed.claimed_at.is_some_and(|at| at >= before));

    let completed = queue.mark_completion(&svc, id, &policy).await?;
    let stored = store
        .get(svc.as_str(), &id.to_string())
        .await?
        .expect("job stored");
    assert_eq!(completed, stored);
    assert!(completed.completed_at >= completed.claimed_at);
    Ok(())
}

#[tokio::test]
async fn test_held_job_exhausts_contention_retries() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(MemoryStore::<JobRecord>::new());
    let slots = Arc::new(MemoryStore::<rpc_core::ReplySlot>::new());
    let queues = common::queues_over(store.clone(), slots);
    let svc = common::path("svc.a");

    let id = queues.push_job(common::request("svc.a", "work", 1)).await?;
    let intent = store
        .try_acquire_intent(svc.as_str(), &id.to_string())
        .await?
        .expect("intent on a fresh job");

    let attempts = common::fast_policy().max_attempts();
    let claim = queues.claim_job(&svc).await;
    assert_eq!(
        claim,
        Err(RpcError::ContentionExhausted {
            path: svc.to_string(),
            attempts
        })
    );
    let clear = queues.clear_jobs(&svc).await;
    assert!(matches!(clear, Err(RpcError::ContentionExhausted { .. })));
    assert_eq!(queues.count_jobs(&svc, JobState::New).await?, 1);
    assert_eq!(queues.count_jobs(&svc, JobState::Processing).await?, 0);

    store.release_intent(&intent).await?;
    let job = queues.claim_job(&svc).await?.expect("job available");
    assert_eq!(job.id, id);
    Ok(())
}

#[tokio::test]
async fn test_abandoned_intent_expires() -> Result<(), Box<dyn Error>> {
    let store =
        Arc::new(MemoryStore::<JobRecord>::new().with_intent_lease(Duration::from_millis(20)));
    let slots = Arc::new(MemoryStore::<rpc_core::ReplySlot>::new());
    let queues = common::queues_over(store.clone(), slots);
    let svc = common::path("svc.a");

    let id = queues.push_job(common::request("svc.a", "work", 1)).await?;
    store
        .try_acquire_intent(svc.as_str(), &id.to_string())
        .await?
        .expect("intent on a fresh job");

    tokio::time::sleep(Duration::from_millis(40)).await;
    let job = queues.claim_job(&svc).await?.expect("lease expired");
    assert_eq!(job.id, id);
    Ok(())
}

#[tokio::test]
async fn test_conflicted_commit_releases_intent() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(common::FailingStore::<JobRecord>::new());
    let queue = ServerJobQueue::new(store.clone());
    let svc = common::path("svc.a");
    let policy = common::fast_policy();

    let id = queue.push(common::request("svc.a", "work", 1)).await?;

    store.contend_commits(true);
    let failed = queue.peek_and_claim(&svc, &policy).await;
    assert!(matches!(failed, Err(RpcError::ContentionExhausted { .. })));

    // Each conflicted attempt released its intent, so nothing is left held.
    store.contend_commits(false);
    let job = queue.peek_and_claim(&svc, &policy).await?.expect("job available");
    assert_eq!(job.id, id);

    store.contend_commits(true);
    let failed = queue.mark_completion(&svc, id, &policy).await;
    assert!(matches!(failed, Err(RpcError::ContentionExhausted { .. })));
    assert_eq!(queue.count_by_state(&svc, JobState::Processing).await?, 1);

    store.contend_commits(false);
    let completed = queue.mark_completion(&svc, id, &policy).await?;
    assert_eq!(completed.state, JobState::Completed);
    Ok(())
}
