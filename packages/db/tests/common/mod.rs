#![allow(dead_code)]

use std::sync::LazyLock;

use rpc_core::{JobRecord, KbPath, RequestId};
use serde_json::json;
use tokio::sync::{Mutex, MutexGuard};

use db::{Database, DbConfig, StoreError};

static TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Fresh in-memory SurrealDB with the schema defined and tables emptied.
pub async fn setup_db() -> Result<(MutexGuard<'static, ()>, Database), StoreError> {
    let guard = TEST_LOCK.lock().await;
    let db_conn = db::init(&DbConfig::memory()).await?;
    db_conn
        .query("DELETE rpc_job; DELETE rpc_reply_slot;")
        .await?
        .check()?;
    Ok((guard, db_conn))
}

pub fn path(raw: &str) -> KbPath {
    KbPath::parse(raw).expect("valid test path")
}

pub fn job(raw_path: &str, priority: i64) -> JobRecord {
    JobRecord::new(
        path(raw_path),
        RequestId::generate(),
        "echo",
        json!({ "priority": priority }),
    )
    .with_priority(priority)
}
