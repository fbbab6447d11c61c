//! Database schema definitions using SurrealQL.

use crate::connection::Database;
use crate::StoreError;

/// Initialize the database schema.
///
/// Defines the job and reply slot tables. Safe to run repeatedly.
pub async fn init_schema(db: &Database) -> Result<(), StoreError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;
    db.query(REPLY_SLOT_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
const JOB_SCHEMA: &str = r#"
-- Server-side jobs, one row per request
DEFINE TABLE IF NOT EXISTS rpc_job SCHEMALESS;

DEFINE FIELD IF NOT EXISTS record_key ON rpc_job TYPE string;
DEFINE FIELD IF NOT EXISTS record_scope ON rpc_job TYPE string;
DEFINE FIELD IF NOT EXISTS intent ON rpc_job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS intent_at ON rpc_job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS body ON rpc_job TYPE object;

-- Claims always scan a single path
DEFINE INDEX IF NOT EXISTS rpc_job_key ON rpc_job FIELDS record_key UNIQUE;
DEFINE INDEX IF NOT EXISTS rpc_job_scope ON rpc_job FIELDS record_scope;
"#;

/// Reply slot table schema.
const REPLY_SLOT_SCHEMA: &str = r#"
-- Client-side reply slots, provisioned per client path
DEFINE TABLE IF NOT EXISTS rpc_reply_slot SCHEMALESS;

DEFINE FIELD IF NOT EXISTS record_key ON rpc_reply_slot TYPE string;
DEFINE FIELD IF NOT EXISTS record_scope ON rpc_reply_slot TYPE string;
DEFINE FIELD IF NOT EXISTS intent ON rpc_reply_slot TYPE option<string>;
DEFINE FIELD IF NOT EXISTS intent_at ON rpc_reply_slot TYPE option<int>;
DEFINE FIELD IF NOT EXISTS body ON rpc_reply_slot TYPE object;

DEFINE INDEX IF NOT EXISTS rpc_reply_slot_key ON rpc_reply_slot FIELDS record_key UNIQUE;
DEFINE INDEX IF NOT EXISTS rpc_reply_slot_scope ON rpc_reply_slot FIELDS record_scope;
"#;
