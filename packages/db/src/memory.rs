//! In-process record store.
//!
//! Records are partitioned by scope, each partition behind its own mutex, so
//! operations on different paths never contend with each other. Intents are
//! tokens stored next to the record; every read-modify-write happens under
//! the partition lock, which makes each call atomic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::StoreError;
use crate::store::{
    Comparator, DEFAULT_INTENT_LEASE, Intent, Mutation, Predicate, RecordStore, Scan, StoreRecord,
    Sweep,
};

struct Held {
    token: String,
    since: Instant,
}

struct Entry<R> {
    record: R,
    intent: Option<Held>,
}

impl<R> Entry<R> {
    /// Whether an unexpired intent protects this record.
    fn is_held(&self, lease: Duration) -> bool {
        self.intent
            .as_ref()
            .is_some_and(|held| held.since.elapsed() < lease)
    }

    fn is_held_by(&self, token: &str) -> bool {
        self.intent.as_ref().is_some_and(|held| held.token == token)
    }
}

type Partition<R> = HashMap<String, Entry<R>>;

/// Thread-safe in-memory [`RecordStore`].
pub struct MemoryStore<R> {
    partitions: RwLock<HashMap<String, Arc<Mutex<Partition<R>>>>>,
    lease: Duration,
}

impl<R: StoreRecord> MemoryStore<R> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            lease: DEFAULT_INTENT_LEASE,
        }
    }

    /// Set how long an intent lives before it counts as abandoned.
    pub fn with_intent_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    async fn partition(&self, scope: &str) -> Option<Arc<Mutex<Partition<R>>>> {
        let partitions = self.partitions.read().await;
        partitions.get(scope).cloned()
    }

    async fn partition_or_create(&self, scope: &str) -> Arc<Mutex<Partition<R>>> {
        if let Some(partition) = self.partition(scope).await {
            return partition;
        }
        let mut partitions = self.partitions.write().await;
        partitions.entry(scope.to_string()).or_default().clone()
    }

    /// Number of records across all scopes.
    pub async fn len(&self) -> usize {
        let partitions: Vec<_> = self.partitions.read().await.values().cloned().collect();
        let mut total = 0;
        for partition in partitions {
            total += partition.lock().await.len();
        }
        total
    }

    /// Check if the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<R: StoreRecord> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: StoreRecord> RecordStore<R> for MemoryStore<R> {
    async fn insert(&self, record: R) -> Result<R, StoreError> {
        let partition = self.partition_or_create(record.scope()).await;
        let mut partition = partition.lock().await;
        let key = record.key();
        if partition.contains_key(&key) {
            return Err(StoreError::Query(format!(
                "{} record already exists: {}",
                R::TABLE,
                key
            )));
        }
        partition.insert(
            key,
            Entry {
                record: record.clone(),
                intent: None,
            },
        );
        Ok(record)
    }

    async fn get(&self, scope: &str, key: &str) -> Result<Option<R>, StoreError> {
        let Some(partition) = self.partition(scope).await else {
            return Ok(None);
        };
        let partition = partition.lock().await;
        Ok(partition.get(key).map(|e| e.record.clone()))
    }

    async fn query_eligible(
        &self,
        scope: &str,
        eligible: &Predicate<R>,
        order: &Comparator<R>,
        limit: usize,
    ) -> Result<Scan<R>, StoreError> {
        let Some(partition) = self.partition(scope).await else {
            return Ok(Scan {
                candidates: Vec::new(),
                held: 0,
            });
        };
        let partition = partition.lock().await;

        let mut held = 0;
        let mut candidates = Vec::new();
        for entry in partition.values() {
            if !eligible(&entry.record) {
                continue;
            }
            if entry.is_held(self.lease) {
                held += 1;
            } else {
                candidates.push(entry.record.clone());
            }
        }
        drop(partition);

        candidates.sort_by(|a, b| order(a, b));
        candidates.truncate(limit);
        Ok(Scan { candidates, held })
    }

    async fn try_acquire_intent(&self, scope: &str, key: &str) -> Result<Option<Intent>, StoreError> {
        let Some(partition) = self.partition(scope).await else {
            return Ok(None);
        };
        let mut partition = partition.lock().await;
        match partition.get_mut(key) {
            Some(entry) if !entry.is_held(self.lease) => {
                let token = Ulid::new().to_string();
                entry.intent = Some(Held {
                    token: token.clone(),
                    since: Instant::now(),
                });
                Ok(Some(Intent {
                    scope: scope.to_string(),
                    key: key.to_string(),
                    token,
                }))
            }
            _ => Ok(None),
        }
    }

    async fn release_intent(&self, intent: &Intent) -> Result<(), StoreError> {
        let Some(partition) = self.partition(&intent.scope).await else {
            return Ok(());
        };
        let mut partition = partition.lock().await;
        if let Some(entry) = partition.get_mut(&intent.key)
            && entry.is_held_by(&intent.token)
        {
            entry.intent = None;
        }
        Ok(())
    }

    async fn apply_and_commit(
        &self,
        intent: &Intent,
        guard: &Predicate<R>,
        mutation: &Mutation<R>,
    ) -> Result<Option<R>, StoreError> {
        let Some(partition) = self.partition(&intent.scope).await else {
            return Ok(None);
        };
        let mut partition = partition.lock().await;
        let Some(entry) = partition.get_mut(&intent.key) else {
            return Ok(None);
        };
        if !entry.is_held_by(&intent.token) {
            return Err(StoreError::Contended(intent.key.clone()));
        }
        entry.intent = None;
        if !guard(&entry.record) {
            return Ok(None);
        }

        let next = mutation(&entry.record);
        if next.key() != intent.key || next.scope() != intent.scope {
            return Err(StoreError::Query(format!(
                "mutation changed the identity of {} record {}",
                R::TABLE,
                intent.key
            )));
        }
        Ok(Some(std::mem::replace(&mut entry.record, next)))
    }

    async fn delete_or_reset(
        &self,
        scope: &str,
        predicate: &Predicate<R>,
        sweep: &Sweep<R>,
    ) -> Result<usize, StoreError> {
        let Some(partition) = self.partition(scope).await else {
            return Ok(0);
        };
        let mut partition = partition.lock().await;

        let keys: Vec<String> = partition
            .iter()
            .filter(|(_, entry)| predicate(&entry.record))
            .map(|(key, _)| key.clone())
            .collect();
        if let Some(held) = keys
            .iter()
            .find(|key| partition.get(*key).is_some_and(|e| e.is_held(self.lease)))
        {
            return Err(StoreError::Contended(held.clone()));
        }

        match sweep {
            Sweep::Delete => {
                for key in &keys {
                    partition.remove(key);
                }
            }
            Sweep::Reset(reset) => {
                // Compute every replacement first so a bad mutation leaves the
                // partition untouched.
                let mut replacements = Vec::with_capacity(keys.len());
                for key in &keys {
                    if let Some(entry) = partition.get(key) {
                        let next = reset(&entry.record);
                        if next.key() != *key {
                            return Err(StoreError::Query(format!(
                                "reset changed the identity of {} record {}",
                                R::TABLE,
                                key
                            )));
                        }
                        replacements.push((key.clone(), next));
                    }
                }
                for (key, next) in replacements {
                    if let Some(entry) = partition.get_mut(&key) {
                        entry.record = next;
                        entry.intent = None;
                    }
                }
            }
        }
        Ok(keys.len())
    }

    async fn count_matching(&self, scope: &str, predicate: &Predicate<R>) -> Result<usize, StoreError> {
        let Some(partition) = self.partition(scope).await else {
            return Ok(0);
        };
        let partition = partition.lock().await;
        Ok(partition.values().filter(|e| predicate(&e.record)).count())
    }

    async fn list_matching(
        &self,
        scope: &str,
        predicate: &Predicate<R>,
        order: &Comparator<R>,
    ) -> Result<Vec<R>, StoreError> {
        let Some(partition) = self.partition(scope).await else {
            return Ok(Vec::new());
        };
        let partition = partition.lock().await;
        let mut records: Vec<R> = partition
            .values()
            .filter(|e| predicate(&e.record))
            .map(|e| e.record.clone())
            .collect();
        drop(partition);
        records.sort_by(|a, b| order(a, b));
        Ok(records)
    }
}
