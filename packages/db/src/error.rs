//! Storage errors.

use rpc_core::RpcError;
use thiserror::Error;

/// Errors raised by record stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another claimant holds the record; safe to retry.
    #[error("Record is held by another claimant: {0}")]
    Contended(String),
    #[error("Connection error: {0}")]
    Connection(surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<surrealdb::Error> for StoreError {
    fn from(err: surrealdb::Error) -> Self {
        // Optimistic transaction conflicts are reported as retryable errors;
        // treat them the same way as a held intent.
        let message = err.to_string();
        if message.contains("can be retried") || message.contains("conflict") {
            StoreError::Contended(message)
        } else {
            StoreError::Connection(err)
        }
    }
}

impl From<StoreError> for RpcError {
    fn from(err: StoreError) -> Self {
        RpcError::Storage(err.to_string())
    }
}
