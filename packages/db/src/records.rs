//! Table bindings for the queue record types.

use rpc_core::{JobRecord, ReplySlot};

use crate::store::StoreRecord;

/// Table holding server-side jobs.
pub const JOB_TABLE: &str = "rpc_job";

/// Table holding client-side reply slots.
pub const REPLY_SLOT_TABLE: &str = "rpc_reply_slot";

impl StoreRecord for JobRecord {
    const TABLE: &'static str = JOB_TABLE;

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn scope(&self) -> &str {
        self.path.as_str()
    }
}

impl StoreRecord for ReplySlot {
    const TABLE: &'static str = REPLY_SLOT_TABLE;

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn scope(&self) -> &str {
        self.client_path.as_str()
    }
}
