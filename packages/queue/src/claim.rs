//! Store-agnostic claim protocol.
//!
//! A claim selects at most one eligible record, mutates it and commits, all
//! while other callers race for the same records. Exclusion comes from the
//! store's intents: a candidate someone else holds is skipped, never waited
//! on. Waiting only ever happens in the retry sleep between attempts.

use std::marker::PhantomData;
use std::sync::Arc;

use db::{Comparator, Intent, Mutation, Predicate, RecordStore, StoreError, StoreRecord, Sweep};
use rpc_core::{ClaimResult, RetryPolicy, RpcError, RpcResult};

/// Candidates fetched per scan. Claimants racing on the head of a queue fall
/// through to the next candidate instead of reporting `Busy` straight away.
const CANDIDATE_WINDOW: usize = 16;

/// Outcome of a keyed update.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyedUpdate<R> {
    /// The guard held; carries the pre-mutation record.
    Applied(R),
    /// The guard rejected the current record, which is left untouched.
    Rejected(R),
    /// No record with this key exists in the scope.
    Missing,
}

/// Claims records from a [`RecordStore`] with contention retry.
pub struct ClaimCoordinator<R, S> {
    store: Arc<S>,
    _record: PhantomData<fn() -> R>,
}

impl<R: StoreRecord, S: RecordStore<R>> ClaimCoordinator<R, S> {
    /// Create a coordinator over a shared store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            _record: PhantomData,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Single claim attempt. Never sleeps.
    ///
    /// Candidates are tried best first; one held by another claimant, or one
    /// that stopped being eligible between the scan and the intent, is
    /// skipped. Returns `Busy` when eligible records exist but none could be
    /// taken.
    pub async fn attempt_claim(
        &self,
        scope: &str,
        eligible: &Predicate<R>,
        order: &Comparator<R>,
        mutate: &Mutation<R>,
    ) -> RpcResult<ClaimResult<R>> {
        let scan = self
            .store
            .query_eligible(scope, eligible, order, CANDIDATE_WINDOW)
            .await
            .map_err(RpcError::from)?;
        if scan.is_empty() {
            return Ok(ClaimResult::NoneEligible);
        }

        for candidate in &scan.candidates {
            let key = candidate.key();
            let intent = match self.store.try_acquire_intent(scope, &key).await {
                Ok(Some(intent)) => intent,
                Ok(None) | Err(StoreError::Contended(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            match self.store.apply_and_commit(&intent, eligible, mutate).await {
                Ok(Some(previous)) => {
                    tracing::debug!("Claimed {} {} on {}", R::TABLE, key, scope);
                    return Ok(ClaimResult::Claimed(previous));
                }
                Ok(None) => continue,
                Err(StoreError::Contended(_)) => {
                    self.abandon(&intent).await;
                    continue;
                }
                Err(e) => {
                    self.abandon(&intent).await;
                    tracing::error!("Claim of {} {} on {} failed: {}", R::TABLE, key, scope, e);
                    return Err(e.into());
                }
            }
        }

        tracing::debug!(
            "None of {} eligible {} records on {} could be taken",
            scan.candidates.len() + scan.held,
            R::TABLE,
            scope
        );
        Ok(ClaimResult::Busy)
    }

    /// Claim with contention retry.
    ///
    /// `NoneEligible` returns `Ok(None)` at once. `Busy` sleeps and retries
    /// until the policy runs out, then fails with `ContentionExhausted`.
    pub async fn claim_with_retry(
        &self,
        scope: &str,
        eligible: &Predicate<R>,
        order: &Comparator<R>,
        mutate: &Mutation<R>,
        policy: &RetryPolicy,
    ) -> RpcResult<Option<R>> {
        let attempts = policy.max_attempts();
        for attempt in 0..attempts {
            match self.attempt_claim(scope, eligible, order, mutate).await? {
                ClaimResult::Claimed(record) => return Ok(Some(record)),
                ClaimResult::NoneEligible => return Ok(None),
                ClaimResult::Busy => {
                    if attempt + 1 < attempts {
                        tokio::time::sleep(policy.delay_for(attempt + 1)).await;
                    }
                }
            }
        }

        tracing::warn!("Contention on {} not resolved after {} attempts", scope, attempts);
        Err(RpcError::ContentionExhausted {
            path: scope.to_string(),
            attempts,
        })
    }

    /// Claim, also waiting out an empty scope.
    ///
    /// Used where absence means backpressure rather than an empty queue. When
    /// the policy runs out, the last attempt decides the error: nothing
    /// eligible yields `PoolExhausted`, held records yield
    /// `ContentionExhausted`.
    pub async fn claim_when_available(
        &self,
        scope: &str,
        eligible: &Predicate<R>,
        order: &Comparator<R>,
        mutate: &Mutation<R>,
        policy: &RetryPolicy,
    ) -> RpcResult<R> {
        let attempts = policy.max_attempts();
        let mut last_busy = false;
        for attempt in 0..attempts {
            match self.attempt_claim(scope, eligible, order, mutate).await? {
                ClaimResult::Claimed(record) => return Ok(record),
                outcome => {
                    last_busy = outcome.is_busy();
                    if attempt + 1 < attempts {
                        tokio::time::sleep(policy.delay_for(attempt + 1)).await;
                    }
                }
            }
        }

        if last_busy {
            tracing::warn!("Contention on {} not resolved after {} attempts", scope, attempts);
            Err(RpcError::ContentionExhausted {
                path: scope.to_string(),
                attempts,
            })
        } else {
            tracing::warn!("No eligible {} on {} after {} attempts", R::TABLE, scope, attempts);
            Err(RpcError::PoolExhausted {
                path: scope.to_string(),
                attempts,
            })
        }
    }

    /// Update one record by key if `guard` accepts it.
    ///
    /// A held record is retried like a busy claim. A rejected record is
    /// returned as it currently is so the caller can report why.
    pub async fn update_key(
        &self,
        scope: &str,
        key: &str,
        guard: &Predicate<R>,
        mutate: &Mutation<R>,
        policy: &RetryPolicy,
    ) -> RpcResult<KeyedUpdate<R>> {
        let attempts = policy.max_attempts();
        for attempt in 0..attempts {
            let Some(current) = self.store.get(scope, key).await? else {
                return Ok(KeyedUpdate::Missing);
            };
            if !guard(&current) {
                return Ok(KeyedUpdate::Rejected(current));
            }

            let acquired = match self.store.try_acquire_intent(scope, key).await {
                Ok(intent) => intent,
                Err(StoreError::Contended(_)) => None,
                Err(e) => return Err(e.into()),
            };
            if let Some(intent) = acquired {
                match self.store.apply_and_commit(&intent, guard, mutate).await {
                    Ok(Some(previous)) => return Ok(KeyedUpdate::Applied(previous)),
                    Ok(None) => {
                        // Changed between the read and the intent; report the
                        // fresh state.
                        return match self.store.get(scope, key).await? {
                            Some(current) => Ok(KeyedUpdate::Rejected(current)),
                            None => Ok(KeyedUpdate::Missing),
                        };
                    }
                    Err(StoreError::Contended(_)) => self.abandon(&intent).await,
                    Err(e) => {
                        self.abandon(&intent).await;
                        return Err(e.into());
                    }
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(policy.delay_for(attempt + 1)).await;
            }
        }

        tracing::warn!("{} {} on {} stayed held for {} attempts", R::TABLE, key, scope, attempts);
        Err(RpcError::ContentionExhausted {
            path: scope.to_string(),
            attempts,
        })
    }

    /// Delete or reset every record of `scope` matching `predicate`, backing
    /// off while any of them is held.
    pub async fn sweep_with_retry(
        &self,
        scope: &str,
        predicate: &Predicate<R>,
        sweep: &Sweep<R>,
        policy: &RetryPolicy,
    ) -> RpcResult<usize> {
        let attempts = policy.max_attempts();
        for attempt in 0..attempts {
            match self.store.delete_or_reset(scope, predicate, sweep).await {
                Ok(count) => return Ok(count),
                Err(StoreError::Contended(key)) => {
                    tracing::debug!("Sweep of {} blocked by held {} {}", scope, R::TABLE, key);
                    if attempt + 1 < attempts {
                        tokio::time::sleep(policy.delay_for(attempt + 1)).await;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!("Sweep of {} not completed after {} attempts", scope, attempts);
        Err(RpcError::ContentionExhausted {
            path: scope.to_string(),
            attempts,
        })
    }

    /// Count records of `scope` matching `predicate`. Unlocked snapshot.
    pub async fn count(&self, scope: &str, predicate: &Predicate<R>) -> RpcResult<u64> {
        let count = self.store.count_matching(scope, predicate).await?;
        Ok(count as u64)
    }

    /// List records of `scope` matching `predicate`. Unlocked snapshot.
    pub async fn list(
        &self,
        scope: &str,
        predicate: &Predicate<R>,
        order: &Comparator<R>,
    ) -> RpcResult<Vec<R>> {
        Ok(self.store.list_matching(scope, predicate, order).await?)
    }

    async fn abandon(&self, intent: &Intent) {
        if let Err(e) = self.store.release_intent(intent).await {
            tracing::warn!("Failed to release intent on {} {}: {}", R::TABLE, intent.key, e);
        }
    }
}
