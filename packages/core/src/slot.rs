//! Reply slot types for the client-side bounded reply pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{KbPath, RequestId};

/// Unique identifier for a reply slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub Ulid);

impl SlotId {
    /// Create a new unique slot ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SlotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A preallocated, recyclable reply slot.
///
/// Slots are only ever flipped between Free and Occupied; the number of slots
/// for a client path is fixed when the pool is provisioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplySlot {
    pub id: SlotId,
    pub client_path: KbPath,
    pub occupied: bool,
    #[serde(default)]
    pub request_id: Option<RequestId>,
    #[serde(default)]
    pub server_path: Option<KbPath>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub transaction_tag: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub written_at: Option<DateTime<Utc>>,
}

impl ReplySlot {
    /// Create a free slot for a client path.
    pub fn free(client_path: KbPath) -> Self {
        Self {
            id: SlotId::new(),
            client_path,
            occupied: false,
            request_id: None,
            server_path: None,
            action: None,
            transaction_tag: None,
            payload: None,
            written_at: None,
        }
    }

    /// Return a copy holding `reply`, marked occupied.
    pub fn occupy(&self, reply: &ReplyWrite, now: DateTime<Utc>) -> Self {
        Self {
            id: self.id,
            client_path: self.client_path.clone(),
            occupied: true,
            request_id: Some(reply.request_id.clone()),
            server_path: Some(reply.server_path.clone()),
            action: Some(reply.action.clone()),
            transaction_tag: Some(reply.transaction_tag.clone()),
            payload: Some(reply.payload.clone()),
            written_at: Some(now),
        }
    }

    /// Return a copy marked free, keeping the last reply fields for inspection.
    pub fn release(&self) -> Self {
        Self {
            occupied: false,
            ..self.clone()
        }
    }

    /// Return a wiped free copy with a fresh placeholder correlation id.
    pub fn reset(&self, now: DateTime<Utc>) -> Self {
        Self {
            id: self.id,
            client_path: self.client_path.clone(),
            occupied: false,
            request_id: Some(RequestId::generate()),
            server_path: Some(self.client_path.clone()),
            action: None,
            transaction_tag: None,
            payload: None,
            written_at: Some(now),
        }
    }

    /// Reply fields held by an occupied slot.
    pub fn to_payload(&self) -> Option<ReplyPayload> {
        if !self.occupied {
            return None;
        }
        Some(ReplyPayload {
            slot_id: self.id,
            client_path: self.client_path.clone(),
            request_id: self.request_id.clone()?,
            server_path: self.server_path.clone()?,
            action: self.action.clone().unwrap_or_default(),
            transaction_tag: self.transaction_tag.clone().unwrap_or_default(),
            payload: self.payload.clone().unwrap_or(serde_json::Value::Null),
            written_at: self.written_at?,
        })
    }

    /// Order occupied slots oldest reply first.
    pub fn oldest_first(a: &ReplySlot, b: &ReplySlot) -> std::cmp::Ordering {
        a.written_at
            .cmp(&b.written_at)
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Reply fields written into a slot by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyWrite {
    pub request_id: RequestId,
    pub server_path: KbPath,
    pub action: String,
    pub transaction_tag: String,
    pub payload: serde_json::Value,
}

/// A reply handed to the client that claimed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub slot_id: SlotId,
    pub client_path: KbPath,
    pub request_id: RequestId,
    pub server_path: KbPath,
    pub action: String,
    pub transaction_tag: String,
    pub payload: serde_json::Value,
    pub written_at: DateTime<Utc>,
}

/// Snapshot counts of a reply pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPoolStats {
    pub free: u64,
    pub occupied: u64,
}

impl ReplyPoolStats {
    /// Provisioned capacity of the pool.
    pub fn capacity(&self) -> u64 {
        self.free + self.occupied
    }
}
