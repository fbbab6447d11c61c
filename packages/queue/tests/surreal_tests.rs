#![allow(clippy::disallowed_methods)]

//! Queue behaviour over the SurrealDB store. Each test uses its own paths.

mod common;

use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use db::{DbConfig, RecordStore, SurrealStore};
use futures_util::future::join_all;
use rpc_core::{JobId, JobRecord, JobState, ListOptions, ReplySlot, RetryPolicy, RpcError};

#[tokio::test]
async fn test_priority_then_fifo_order() -> Result<(), Box<dyn Error>> {
    let queues = common::surreal_queues().await?;
    let svc = common::path("svc.order");

    let mut pushed = Vec::new();
    for priority in [1, 5, 3, 5] {
        pushed.push(queues.push_job(common::request("svc.order", "work", priority)).await?);
    }

    let mut served = Vec::new();
    while let Some(job) = queues.claim_job(&svc).await? {
        assert_eq!(job.state, JobState::Processing);
        served.push(job.id);
    }
    assert_eq!(served, vec![pushed[1], pushed[3], pushed[2], pushed[0]]);
    assert_eq!(queues.count_jobs(&svc, JobState::Processing).await?, 4);

    let completed = queues.complete_job(&svc, served[0]).await?;
    assert_eq!(completed.state, JobState::Completed);
    let listed = queues
        .list_jobs(&svc, JobState::Completed, &ListOptions::all())
        .await?;
    assert_eq!(listed.len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_are_at_most_once() -> Result<(), Box<dyn Error>> {
    let queues = Arc::new(
        common::surreal_queues()
            .await?
            .with_retry_policy(RetryPolicy::new(50, Duration::from_millis(2))),
    );
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
        match joined? {
            Ok(Some(job)) => claimed.push(job.id),
            Ok(None) => {}
            // Losing every race is allowed; claiming twice is not.
            Err(RpcError::ContentionExhausted { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    }
    while let Some(job) = queues.claim_job(&svc).await? {
        claimed.push(job.id);
    }

    let distinct: HashSet<JobId> = claimed.iter().copied().collect();
    assert_eq!(claimed.len(), JOBS);
    assert_eq!(distinct.len(), JOBS);
    assert_eq!(queues.count_jobs(&svc, JobState::Processing).await?, JOBS as u64);
    assert_eq!(queues.count_jobs(&svc, JobState::New).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_pool_exhaustion_and_reuse() -> Result<(), Box<dyn Error>> {
    let queues = common::surreal_queues().await?;
    let client = common::path("client.pool");
    queues.provision_pool(&client, 2).await?;

    queues.push_reply(&client, common::reply("svc.a", "echo")).await?;
    queues.push_reply(&client, common::reply("svc.b", "echo")).await?;
    let third = queues.push_reply(&client, common::reply("svc.c", "echo")).await;
    assert!(matches!(third, Err(RpcError::PoolExhausted { attempts: 4, .. })));
    assert_eq!(queues.occupied_slots(&client).await?, 2);

    let first = queues.claim_reply(&client).await?.expect("reply waiting");
    assert_eq!(first.server_path, common::path("svc.a"));
    let reused = queues.push_reply(&client, common::reply("svc.c", "echo")).await?;
    assert_eq!(reused, first.slot_id);
    assert_eq!(queues.free_slots(&client).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_clear_removes_every_job() -> Result<(), Box<dyn Error>> {
    let queues = common::surreal_queues().await?;
    let svc = common::path("svc.clear");
    for priority in [1, 2, 3] {
        queues.push_job(common::request("svc.clear", "work", priority)).await?;
    }
    queues.push_job(common::request("svc.other", "work", 1)).await?;
    let job = queues.claim_job(&svc).await?.expect("job available");
    queues.complete_job(&svc, job.id).await?;

    assert_eq!(queues.clear_jobs(&svc).await?, 3);
    assert_eq!(queues.clear_jobs(&svc).await?, 0);
    assert_eq!(queues.job_stats(&svc).await?.total(), 0);
    assert_eq!(queues.job_stats(&common::path("svc.other")).await?.total(), 1);
    Ok(())
}

#[tokio::test]
async fn test_clear_all_frees_every_slot() -> Result<(), Box<dyn Error>> {
    let queues = common::surreal_queues().await?;
    let client = common::path("client.reset");
    queues.provision_pool(&client, 3).await?;
    queues.push_reply(&client, common::reply("svc.a", "echo")).await?;
    queues.push_reply(&client, common::reply("svc.b", "echo")).await?;

    assert_eq!(queues.clear_replies(&client).await?, 3);
    assert_eq!(queues.free_slots(&client).await?, 3);
    assert!(
        queues
            .waiting_replies(&client, &ListOptions::all())
            .await?
            .is_empty()
    );
    assert!(queues.claim_reply(&client).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_held_job_blocks_claim_and_clear() -> Result<(), Box<dyn Error>> {
    let (jobs, slots) = common::surreal_stores().await?;
    let queues = common::queues_over(jobs.clone(), slots);
    let svc = common::path("svc.held");

    let id = queues.push_job(common::request("svc.held", "work", 1)).await?;
    let intent = jobs
        .try_acquire_intent(svc.as_str(), &id.to_string())
        .await?
        .expect("intent on a fresh job");

    let claim = queues.claim_job(&svc).await;
    assert!(matches!(claim, Err(RpcError::ContentionExhausted { attempts: 4, .. })));
    let clear = queues.clear_jobs(&svc).await;
    assert!(matches!(clear, Err(RpcError::ContentionExhausted { .. })));
    assert_eq!(queues.count_jobs(&svc, JobState::New).await?, 1);

    jobs.release_intent(&intent).await?;
    let job = queues.claim_job(&svc).await?.expect("job available");
    assert_eq!(job.id, id);
    Ok(())
}

#[tokio::test]
async fn test_abandoned_intent_expires() -> Result<(), Box<dyn Error>> {
    let db_conn = db::init(&DbConfig::memory()).await?;
    let jobs = Arc::new(
        SurrealStore::<JobRecord>::new(db_conn.clone()).with_intent_lease(Duration::from_millis(50)),
    );
    let slots = Arc::new(SurrealStore::<ReplySlot>::new(db_conn));
    let queues = common::queues_over(jobs.clone(), slots);
    let svc = common::path("svc.lease");

    let id = queues.push_job(common::request("svc.lease", "work", 1)).await?;
    jobs.try_acquire_intent(svc.as_str(), &id.to_string())
        .await?
        .expect("intent on a fresh job");

    tokio::time::sleep(Duration::from_millis(120)).await;
    let job = queues.claim_job(&svc).await?.expect("lease expired");
    assert_eq!(job.id, id);
    assert_eq!(queues.clear_jobs(&svc).await?, 1);
    Ok(())
}
