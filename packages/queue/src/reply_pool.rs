//! Client-side bounded reply pool.
//!
//! A client path owns a fixed number of slots provisioned up front. Servers
//! write replies into free slots, the client takes them back out oldest
//! first. Slots are only recycled between Free and Occupied, so the pool
//! never grows and `free + occupied` stays at the provisioned depth.

use std::sync::Arc;

use chrono::Utc;
use db::{Comparator, Predicate, RecordStore, Sweep, store};
use rpc_core::{
    KbPath, ListOptions, ReplyPayload, ReplyPoolStats, ReplySlot, ReplyWrite, RetryPolicy,
    RpcError, RpcEvent, RpcResult, SlotId,
};
use tokio::sync::broadcast;

use crate::claim::ClaimCoordinator;

fn is_free() -> Predicate<ReplySlot> {
    store::predicate(|slot: &ReplySlot| !slot.occupied)
}

fn is_occupied() -> Predicate<ReplySlot> {
    store::predicate(|slot: &ReplySlot| slot.occupied)
}

fn oldest_first() -> Comparator<ReplySlot> {
    store::comparator(ReplySlot::oldest_first)
}

/// Fixed-size reply pool over a [`RecordStore`].
pub struct ClientReplySlotPool<S> {
    claims: Arc<ClaimCoordinator<ReplySlot, S>>,
    event_tx: Option<broadcast::Sender<RpcEvent>>,
}

impl<S: RecordStore<ReplySlot>> ClientReplySlotPool<S> {
    /// Create a pool view over a shared store.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_coordinator(Arc::new(ClaimCoordinator::new(store)))
    }

    /// Create a pool view around an existing coordinator.
    fn with_coordinator(claims: Arc<ClaimCoordinator<ReplySlot, S>>) -> Self {
        Self {
            claims,
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

    /// Number of free slots on `path`.
    pub async fn free_count(&self, path: &KbPath) -> RpcResult<u64> {
        self.claims.count(path.as_str(), &is_free()).await
    }

    /// Number of slots on `path` holding an unclaimed reply.
    pub async fn occupied_count(&self, path: &KbPath) -> RpcResult<u64> {
        self.claims.count(path.as_str(), &is_occupied()).await
    }

    /// Free and occupied counts from one snapshot.
    pub async fn stats(&self, path: &KbPath) -> RpcResult<ReplyPoolStats> {
        let all = store::predicate(|_: &ReplySlot| true);
        let slots = self.claims.list(path.as_str(), &all, &oldest_first()).await?;
        let occupied = slots.iter().filter(|slot| slot.occupied).count() as u64;
        Ok(ReplyPoolStats {
            free: slots.len() as u64 - occupied,
            occupied,
        })
    }

    /// Write a reply into any free slot of `path`.
    ///
    /// Waits for a slot to free up within the retry policy. A pool that stays
    /// full fails with `PoolExhausted`.
    pub async fn push_and_claim_reply(
        &self,
        path: &KbPath,
        reply: ReplyWrite,
        policy: &RetryPolicy,
    ) -> RpcResult<SlotId> {
        if reply.action.trim().is_empty() {
            return Err(RpcError::Validation("action must not be empty".into()));
        }

        let request_id = reply.request_id.clone();
        // Stamped at commit so replies that waited for a slot sort by when
        // they actually landed.
        let fill = store::mutation(move |slot: &ReplySlot| slot.occupy(&reply, Utc::now()));

        let slot = self
            .claims
            .claim_when_available(path.as_str(), &is_free(), &oldest_first(), &fill, policy)
            .await?;
        tracing::debug!("Reply {} written to slot {} on {}", request_id, slot.id, path);

        self.broadcast(RpcEvent::ReplyPushed {
            slot_id: slot.id,
            path: path.clone(),
            request_id,
            timestamp: Utc::now(),
        });
        Ok(slot.id)
    }

    /// Take the oldest reply on `path` and free its slot.
    ///
    /// `Ok(None)` means no slot is occupied.
    pub async fn peek_and_claim_reply(
        &self,
        path: &KbPath,
        policy: &RetryPolicy,
    ) -> RpcResult<Option<ReplyPayload>> {
        let free = store::mutation(ReplySlot::release);

        let claimed = self
            .claims
            .claim_with_retry(path.as_str(), &is_occupied(), &oldest_first(), &free, policy)
            .await?;
        let Some(slot) = claimed else {
            return Ok(None);
        };

        let Some(reply) = slot.to_payload() else {
            return Err(RpcError::Storage(format!(
                "slot {} on {} was occupied without a complete reply",
                slot.id, path
            )));
        };
        tracing::debug!("Reply {} taken from slot {} on {}", reply.request_id, slot.id, path);

        self.broadcast(RpcEvent::ReplyClaimed {
            slot_id: slot.id,
            path: path.clone(),
            request_id: reply.request_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(Some(reply))
    }

    /// A page of the unclaimed replies on `path`, oldest first. The window
    /// of `options` applies to the write time.
    pub async fn list_waiting(
        &self,
        path: &KbPath,
        options: &ListOptions,
    ) -> RpcResult<Vec<ReplyPayload>> {
        let window = *options;
        let matches = store::predicate(move |slot: &ReplySlot| {
            slot.occupied && window.in_window(slot.written_at)
        });
        let slots = self
            .claims
            .list(path.as_str(), &matches, &oldest_first())
            .await?;
        Ok(options.page(slots.iter().filter_map(ReplySlot::to_payload).collect()))
    }

    /// Reset every slot on `path` to free, dropping unclaimed replies.
    ///
    /// Replies written while the reset is running may survive it.
    pub async fn clear_all(&self, path: &KbPath, policy: &RetryPolicy) -> RpcResult<u64> {
        let all = store::predicate(|_: &ReplySlot| true);
        let reset = Sweep::Reset(store::mutation(|slot: &ReplySlot| slot.reset(Utc::now())));

        let count = self
            .claims
            .sweep_with_retry(path.as_str(), &all, &reset, policy)
            .await? as u64;
        tracing::info!("Reset {} reply slots on {}", count, path);

        self.broadcast(RpcEvent::PoolCleared {
            path: path.clone(),
            reset: count,
            timestamp: Utc::now(),
        });
        Ok(count)
    }
}
