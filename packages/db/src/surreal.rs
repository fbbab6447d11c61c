//! SurrealDB-backed record store.
//!
//! Each record is stored as a row `{ record_key, record_scope, intent,
//! intent_at, body }` where `body` is the serialized record. Intents are
//! written into the row with a conditional update, so two claimants can never
//! both see their token land. Eligibility and ordering are evaluated in Rust
//! over the rows of a single scope.

use std::marker::PhantomData;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::StoreError;
use crate::connection::Database;
use crate::store::{
    Comparator, DEFAULT_INTENT_LEASE, Intent, Mutation, Predicate, RecordStore, Scan, StoreRecord,
    Sweep,
};

/// Internal row type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "R: Serialize + DeserializeOwned")]
struct Row<R> {
    #[serde(rename = "record_key")]
    key: String,
    #[serde(rename = "record_scope")]
    scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    intent: Option<String>,
    /// Acquire time of `intent`, in Unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    intent_at: Option<i64>,
    body: R,
}

impl<R> Row<R> {
    fn is_held(&self, stale_before: i64) -> bool {
        self.intent.is_some() && self.intent_at.is_some_and(|at| at >= stale_before)
    }
}

const SELECT_SCOPE: &str = r#"
    SELECT record_key, record_scope, intent, intent_at, body FROM type::table($tb)
    WHERE record_scope = $scope
"#;

const SELECT_ONE: &str = r#"
    SELECT record_key, record_scope, intent, intent_at, body FROM type::table($tb)
    WHERE record_scope = $scope AND record_key = $key
"#;

const ACQUIRE: &str = r#"
    UPDATE type::table($tb) SET intent = $intent_token, intent_at = $acquired_at
    WHERE record_scope = $scope AND record_key = $key
        AND (intent = NONE OR intent_at = NONE OR intent_at < $stale_before)
    RETURN NONE;
    SELECT record_key, record_scope, intent, intent_at, body FROM type::table($tb)
    WHERE record_scope = $scope AND record_key = $key AND intent = $intent_token;
"#;

const RELEASE: &str = r#"
    UPDATE type::table($tb) SET intent = NONE, intent_at = NONE
    WHERE record_scope = $scope AND record_key = $key AND intent = $intent_token
    RETURN NONE
"#;

const COMMIT: &str = r#"
    UPDATE type::table($tb) SET body = $body, intent = NONE, intent_at = NONE
    WHERE record_scope = $scope AND record_key = $key AND intent = $intent_token
    RETURN AFTER
"#;

const ACQUIRE_SWEEP: &str = r#"
    UPDATE type::table($tb) SET intent = $intent_token, intent_at = $acquired_at
    WHERE record_scope = $scope AND record_key INSIDE $keys
        AND (intent = NONE OR intent_at = NONE OR intent_at < $stale_before)
    RETURN NONE;
    SELECT record_key, record_scope, intent, intent_at, body FROM type::table($tb)
    WHERE record_scope = $scope AND intent = $intent_token;
"#;

const RELEASE_SWEEP: &str = r#"
    UPDATE type::table($tb) SET intent = NONE, intent_at = NONE
    WHERE record_scope = $scope AND intent = $intent_token
    RETURN NONE
"#;

const DELETE_SWEEP: &str = r#"
    BEGIN TRANSACTION;
    DELETE type::table($tb)
    WHERE record_scope = $scope AND intent = $intent_token AND record_key INSIDE $keys;
    UPDATE type::table($tb) SET intent = NONE, intent_at = NONE
    WHERE record_scope = $scope AND intent = $intent_token
    RETURN NONE;
    COMMIT TRANSACTION;
"#;

const RESET_SWEEP: &str = r#"
    BEGIN TRANSACTION;
    FOR $row IN $rows {
        UPDATE type::thing($tb, $row.record_key)
        SET body = $row.body, intent = NONE, intent_at = NONE
        WHERE record_scope = $scope AND intent = $intent_token
        RETURN NONE;
    };
    UPDATE type::table($tb) SET intent = NONE, intent_at = NONE
    WHERE record_scope = $scope AND intent = $intent_token
    RETURN NONE;
    COMMIT TRANSACTION;
"#;

/// [`RecordStore`] persisting records in a SurrealDB table.
pub struct SurrealStore<R> {
    db: Database,
    lease: Duration,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for SurrealStore<R> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            lease: self.lease,
            _record: PhantomData,
        }
    }
}

impl<R: StoreRecord> SurrealStore<R> {
    /// Wrap a connected database. The schema must already be defined.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            lease: DEFAULT_INTENT_LEASE,
            _record: PhantomData,
        }
    }

    /// Set how long an intent lives before it counts as abandoned.
    pub fn with_intent_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Oldest acquire time, in Unix milliseconds, of an intent still in force.
    fn stale_before(&self) -> i64 {
        let lease = i64::try_from(self.lease.as_millis()).unwrap_or(i64::MAX);
        Utc::now().timestamp_millis().saturating_sub(lease)
    }

    async fn rows(&self, scope: &str) -> Result<Vec<Row<R>>, StoreError> {
        let mut response = self
            .db
            .query(SELECT_SCOPE)
            .bind(("tb", R::TABLE))
            .bind(("scope", scope.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    async fn row(&self, scope: &str, key: &str) -> Result<Option<Row<R>>, StoreError> {
        let mut response = self
            .db
            .query(SELECT_ONE)
            .bind(("tb", R::TABLE))
            .bind(("scope", scope.to_string()))
            .bind(("key", key.to_string()))
            .await?;
        let rows: Vec<Row<R>> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Write `body` if `intent` is still the holder. Fails with `Contended`
    /// when the intent was lost, e.g. after its lease ran out.
    async fn write_body(&self, intent: &Intent, body: &R) -> Result<(), StoreError> {
        let body = to_value(body)?;
        let mut response = self
            .db
            .query(COMMIT)
            .bind(("tb", R::TABLE))
            .bind(("scope", intent.scope.clone()))
            .bind(("key", intent.key.clone()))
            .bind(("intent_token", intent.token.clone()))
            .bind(("body", body))
            .await?
            .check()?;
        let written: Vec<Row<R>> = response.take(0)?;
        if written.is_empty() {
            return Err(StoreError::Contended(intent.key.clone()));
        }
        Ok(())
    }

    async fn release_sweep(&self, scope: &str, token: &str) {
        let released = self
            .db
            .query(RELEASE_SWEEP)
            .bind(("tb", R::TABLE))
            .bind(("scope", scope.to_string()))
            .bind(("intent_token", token.to_string()))
            .await
            .and_then(|response| response.check());
        if let Err(e) = released {
            tracing::warn!("Failed to release sweep intents on {} {}: {}", R::TABLE, scope, e);
        }
    }

    /// Hold every row of `keys` under one token, or none of them.
    async fn acquire_all(
        &self,
        scope: &str,
        keys: &[String],
        token: &str,
    ) -> Result<Vec<Row<R>>, StoreError> {
        let mut response = self
            .db
            .query(ACQUIRE_SWEEP)
            .bind(("tb", R::TABLE))
            .bind(("scope", scope.to_string()))
            .bind(("keys", keys.to_vec()))
            .bind(("intent_token", token.to_string()))
            .bind(("acquired_at", Utc::now().timestamp_millis()))
            .bind(("stale_before", self.stale_before()))
            .await?
            .check()?;
        let held: Vec<Row<R>> = response.take(1)?;

        if held.len() < keys.len() {
            self.release_sweep(scope, token).await;
            let missing = keys
                .iter()
                .find(|key| !held.iter().any(|row| &row.key == *key))
                .cloned()
                .unwrap_or_default();
            return Err(StoreError::Contended(missing));
        }
        Ok(held)
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl<R: StoreRecord> RecordStore<R> for SurrealStore<R> {
    async fn insert(&self, record: R) -> Result<R, StoreError> {
        let key = record.key();
        let row = serde_json::json!({
            "record_key": key,
            "record_scope": record.scope(),
            "body": to_value(&record)?,
        });

        self.db
            .query("CREATE type::thing($tb, $key) CONTENT $row RETURN NONE")
            .bind(("tb", R::TABLE))
            .bind(("key", key))
            .bind(("row", row))
            .await?
            .check()?;

        Ok(record)
    }

    async fn get(&self, scope: &str, key: &str) -> Result<Option<R>, StoreError> {
        Ok(self.row(scope, key).await?.map(|row| row.body))
    }

    async fn query_eligible(
        &self,
        scope: &str,
        eligible: &Predicate<R>,
        order: &Comparator<R>,
        limit: usize,
    ) -> Result<Scan<R>, StoreError> {
        let stale_before = self.stale_before();
        let mut held = 0;
        let mut candidates = Vec::new();
        for row in self.rows(scope).await? {
            if !eligible(&row.body) {
                continue;
            }
            if row.is_held(stale_before) {
                held += 1;
            } else {
                candidates.push(row.body);
            }
        }
        candidates.sort_by(|a, b| order(a, b));
        candidates.truncate(limit);
        Ok(Scan { candidates, held })
    }

    async fn try_acquire_intent(&self, scope: &str, key: &str) -> Result<Option<Intent>, StoreError> {
        let token = Ulid::new().to_string();
        let result = self
            .db
            .query(ACQUIRE)
            .bind(("tb", R::TABLE))
            .bind(("scope", scope.to_string()))
            .bind(("key", key.to_string()))
            .bind(("intent_token", token.clone()))
            .bind(("acquired_at", Utc::now().timestamp_millis()))
            .bind(("stale_before", self.stale_before()))
            .await;

        let mut response = match result.map_err(StoreError::from) {
            Ok(response) => response,
            Err(StoreError::Contended(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let rows: Vec<Row<R>> = match response.take::<Vec<Row<R>>>(1).map_err(StoreError::from) {
            Ok(rows) => rows,
            Err(StoreError::Contended(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok((!rows.is_empty()).then(|| Intent {
            scope: scope.to_string(),
            key: key.to_string(),
            token,
        }))
    }

    async fn release_intent(&self, intent: &Intent) -> Result<(), StoreError> {
        self.db
            .query(RELEASE)
            .bind(("tb", R::TABLE))
            .bind(("scope", intent.scope.clone()))
            .bind(("key", intent.key.clone()))
            .bind(("intent_token", intent.token.clone()))
            .await?
            .check()?;
        Ok(())
    }

    async fn apply_and_commit(
        &self,
        intent: &Intent,
        guard: &Predicate<R>,
        mutation: &Mutation<R>,
    ) -> Result<Option<R>, StoreError> {
        let Some(row) = self.row(&intent.scope, &intent.key).await? else {
            return Ok(None);
        };
        if row.intent.as_deref() != Some(intent.token.as_str()) {
            return Err(StoreError::Contended(intent.key.clone()));
        }
        if !guard(&row.body) {
            self.release_intent(intent).await?;
            return Ok(None);
        }

        let next = mutation(&row.body);
        if next.key() != intent.key || next.scope() != intent.scope {
            self.release_intent(intent).await?;
            return Err(StoreError::Query(format!(
                "mutation changed the identity of {} record {}",
                R::TABLE,
                intent.key
            )));
        }

        self.write_body(intent, &next).await?;
        Ok(Some(row.body))
    }

    async fn delete_or_reset(
        &self,
        scope: &str,
        predicate: &Predicate<R>,
        sweep: &Sweep<R>,
    ) -> Result<usize, StoreError> {
        let stale_before = self.stale_before();
        let matching: Vec<Row<R>> = self
            .rows(scope)
            .await?
            .into_iter()
            .filter(|row| predicate(&row.body))
            .collect();
        if let Some(row) = matching.iter().find(|row| row.is_held(stale_before)) {
            return Err(StoreError::Contended(row.key.clone()));
        }
        if matching.is_empty() {
            return Ok(0);
        }

        // Hold every matching row under one token, then apply the whole sweep
        // in a single transaction.
        let token = Ulid::new().to_string();
        let keys: Vec<String> = matching.iter().map(|row| row.key.clone()).collect();
        let held = self.acquire_all(scope, &keys, &token).await?;

        // Rows may have changed between the scan and the intents.
        let held: Vec<Row<R>> = held.into_iter().filter(|row| predicate(&row.body)).collect();
        let swept = held.len();

        let query = match sweep {
            Sweep::Delete => {
                let keys: Vec<String> = held.into_iter().map(|row| row.key).collect();
                self.db.query(DELETE_SWEEP).bind(("keys", keys))
            }
            Sweep::Reset(reset) => {
                let rows: Result<Vec<_>, StoreError> = held
                    .iter()
                    .map(|row| {
                        let next = reset(&row.body);
                        if next.key() != row.key || next.scope() != scope {
                            return Err(StoreError::Query(format!(
                                "reset changed the identity of {} record {}",
                                R::TABLE,
                                row.key
                            )));
                        }
                        Ok(serde_json::json!({
                            "record_key": row.key,
                            "body": to_value(&next)?,
                        }))
                    })
                    .collect();
                let rows = match rows {
                    Ok(rows) => rows,
                    Err(e) => {
                        self.release_sweep(scope, &token).await;
                        return Err(e);
                    }
                };
                self.db.query(RESET_SWEEP).bind(("rows", rows))
            }
        };

        let outcome = query
            .bind(("tb", R::TABLE))
            .bind(("scope", scope.to_string()))
            .bind(("intent_token", token.clone()))
            .await
            .and_then(|response| response.check());
        if let Err(e) = outcome {
            // The transaction rolled back as a whole; only the intents remain.
            self.release_sweep(scope, &token).await;
            return Err(e.into());
        }
        Ok(swept)
    }

    async fn count_matching(&self, scope: &str, predicate: &Predicate<R>) -> Result<usize, StoreError> {
        Ok(self
            .rows(scope)
            .await?
            .iter()
            .filter(|row| predicate(&row.body))
            .count())
    }

    async fn list_matching(
        &self,
        scope: &str,
        predicate: &Predicate<R>,
        order: &Comparator<R>,
    ) -> Result<Vec<R>, StoreError> {
        let mut records: Vec<R> = self
            .rows(scope)
            .await?
            .into_iter()
            .map(|row| row.body)
            .filter(|record| predicate(record))
            .collect();
        records.sort_by(|a, b| order(a, b));
        Ok(records)
    }
}
