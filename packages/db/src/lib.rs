//! Record storage for the RPC queues.
//!
//! This crate defines the [`RecordStore`] contract the claim protocol runs
//! against, plus two implementations: [`MemoryStore`] for a single process
//! and [`SurrealStore`] backed by SurrealDB.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory SurrealDB for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod error;
mod memory;
mod records;
mod schema;
pub mod store;
mod surreal;

pub use connection::{Database, DbConfig, connect};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use records::{JOB_TABLE, REPLY_SLOT_TABLE};
pub use schema::init_schema;
pub use store::{Comparator, DEFAULT_INTENT_LEASE, Intent, Mutation, Predicate, RecordStore, Scan, StoreRecord, Sweep};
pub use surreal::SurrealStore;

/// Connect and define the schema.
///
/// This should be called once at application startup.
pub async fn init(config: &DbConfig) -> Result<Database, StoreError> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}
