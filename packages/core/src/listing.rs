//! Paging and time windows for read-only listings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Selects a page of a listing.
///
/// The time window is inclusive at both ends and applies to the timestamp
/// that matters for what is listed: enqueue, claim or completion time for
/// jobs, write time for replies. Records without that timestamp fall outside
/// any bounded window. Offset and limit apply after the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListOptions {
    pub limit: Option<usize>,
    pub offset: usize,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

impl ListOptions {
    /// Everything, unpaged.
    pub fn all() -> Self {
        Self::default()
    }

    /// Return at most `limit` records.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first `offset` records.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Only records stamped at or after `after`.
    pub fn with_after(mut self, after: DateTime<Utc>) -> Self {
        self.after = Some(after);
        self
    }

    /// Only records stamped at or before `before`.
    pub fn with_before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }

    /// Whether a record stamped `at` falls inside the window.
    pub fn in_window(&self, at: Option<DateTime<Utc>>) -> bool {
        match at {
            Some(at) => {
                self.after.is_none_or(|after| at >= after)
                    && self.before.is_none_or(|before| at <= before)
            }
            None => self.after.is_none() && self.before.is_none(),
        }
    }

    /// Apply offset and limit to an ordered listing.
    pub fn page<T>(&self, items: Vec<T>) -> Vec<T> {
        let items = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => items.take(limit).collect(),
            None => items.collect(),
        }
    }
}
