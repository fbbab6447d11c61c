//! Storage contract used by the claim protocol.
//!
//! A [`RecordStore`] is a dumb table of records partitioned by a scope
//! string (the record's path). It knows nothing about jobs or slots; all
//! queue semantics are expressed by the predicates, orderings and mutations
//! passed in by the caller.
//!
//! # Intents
//!
//! An intent is a non-blocking exclusive marker on a single record, the
//! equivalent of a row lock taken with `FOR UPDATE SKIP LOCKED`. At most one
//! holder exists per record. Scans report intent-held records separately
//! instead of returning them, and sweeps refuse to touch a scope while any
//! matching record is held.
//!
//! Intents are leases. One older than the store's lease counts as abandoned
//! and the record is free again, so a claimant that dies between acquiring
//! and committing cannot strand a record.

use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::StoreError;

/// How long an intent protects its record before it counts as abandoned.
/// Intents live from acquire to commit, which takes milliseconds.
pub const DEFAULT_INTENT_LEASE: Duration = Duration::from_secs(30);

/// Filter deciding whether a record takes part in an operation.
pub type Predicate<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// Ordering of candidate records, best first.
pub type Comparator<R> = Arc<dyn Fn(&R, &R) -> Ordering + Send + Sync>;

/// Pure transformation applied to a record on commit.
pub type Mutation<R> = Arc<dyn Fn(&R) -> R + Send + Sync>;

/// A record that can live in a [`RecordStore`].
pub trait StoreRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table the record lives in.
    const TABLE: &'static str;

    /// Unique key of this record.
    fn key(&self) -> String;

    /// Namespace the record belongs to.
    fn scope(&self) -> &str;
}

/// Proof of an exclusive intent on one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub scope: String,
    pub key: String,
    pub token: String,
}

/// Candidates returned by a scan.
#[derive(Debug, Clone)]
pub struct Scan<R> {
    /// Eligible records nobody holds, best first.
    pub candidates: Vec<R>,
    /// Eligible records skipped because another claimant holds them.
    pub held: usize,
}

impl<R> Scan<R> {
    /// Nothing eligible at all, held or not.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty() && self.held == 0
    }
}

/// What a sweep does to each matching record.
#[derive(Clone)]
pub enum Sweep<R> {
    /// Remove the records.
    Delete,
    /// Replace each record with the mutation's output.
    Reset(Mutation<R>),
}

impl<R> std::fmt::Debug for Sweep<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sweep::Delete => f.write_str("Delete"),
            Sweep::Reset(_) => f.write_str("Reset"),
        }
    }
}

/// Record storage used by the claim protocol.
///
/// Every write is atomic per record. Failed writes leave the record as it
/// was before the call.
pub trait RecordStore<R: StoreRecord>: Send + Sync + 'static {
    /// Insert a new record. Fails if the key already exists.
    fn insert(&self, record: R) -> impl Future<Output = Result<R, StoreError>> + Send;

    /// Fetch a record of `scope` by key.
    fn get(
        &self,
        scope: &str,
        key: &str,
    ) -> impl Future<Output = Result<Option<R>, StoreError>> + Send;

    /// Return up to `limit` eligible records of `scope` that nobody holds,
    /// ordered by `order`.
    fn query_eligible(
        &self,
        scope: &str,
        eligible: &Predicate<R>,
        order: &Comparator<R>,
        limit: usize,
    ) -> impl Future<Output = Result<Scan<R>, StoreError>> + Send;

    /// Take an intent on `key` in `scope` without waiting. `None` if the record is held
    /// elsewhere or no longer exists. An expired intent does not count as held.
    fn try_acquire_intent(
        &self,
        scope: &str,
        key: &str,
    ) -> impl Future<Output = Result<Option<Intent>, StoreError>> + Send;

    /// Drop an intent without writing. Releasing a stale intent is a no-op.
    fn release_intent(&self, intent: &Intent) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Re-check `guard` against the current record and, if it holds, write
    /// `mutation`'s output and release the intent in one step. Returns the
    /// pre-mutation record, or `None` (intent released, nothing written) when
    /// the guard no longer holds.
    fn apply_and_commit(
        &self,
        intent: &Intent,
        guard: &Predicate<R>,
        mutation: &Mutation<R>,
    ) -> impl Future<Output = Result<Option<R>, StoreError>> + Send;

    /// Delete or reset every record of `scope` matching `predicate`, all or
    /// nothing. Fails with [`StoreError::Contended`] without touching anything
    /// if a matching record is held.
    fn delete_or_reset(
        &self,
        scope: &str,
        predicate: &Predicate<R>,
        sweep: &Sweep<R>,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Count records of `scope` matching `predicate`. No intents involved.
    fn count_matching(
        &self,
        scope: &str,
        predicate: &Predicate<R>,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// All records of `scope` matching `predicate`, ordered by `order`,
    /// including held ones. Read-only snapshot.
    fn list_matching(
        &self,
        scope: &str,
        predicate: &Predicate<R>,
        order: &Comparator<R>,
    ) -> impl Future<Output = Result<Vec<R>, StoreError>> + Send;
}

/// Wrap a closure as a [`Predicate`].
pub fn predicate<R: 'static>(f: impl Fn(&R) -> bool + Send + Sync + 'static) -> Predicate<R> {
    Arc::new(f)
}

/// Wrap a closure as a [`Comparator`].
pub fn comparator<R: 'static>(f: impl Fn(&R, &R) -> Ordering + Send + Sync + 'static) -> Comparator<R> {
    Arc::new(f)
}

/// Wrap a closure as a [`Mutation`].
pub fn mutation<R: 'static>(f: impl Fn(&R) -> R + Send + Sync + 'static) -> Mutation<R> {
    Arc::new(f)
}
