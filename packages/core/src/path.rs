//! Hierarchical path and correlation id types.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::RpcError;

/// Dot-delimited hierarchical address, e.g. `svc.billing.invoices`.
///
/// Each label must be non-empty, start with an ASCII letter or `_`, and
/// contain only ASCII alphanumerics and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KbPath(String);

impl KbPath {
    /// Parse and validate a path.
    pub fn parse(s: impl Into<String>) -> Result<Self, RpcError> {
        let s = s.into();
        if s.is_empty() {
            return Err(RpcError::Validation("path must not be empty".into()));
        }
        for label in s.split('.') {
            if !is_valid_label(label) {
                return Err(RpcError::Validation(format!(
                    "invalid path '{}': bad label '{}'",
                    s, label
                )));
            }
        }
        Ok(Self(s))
    }

    /// The path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the labels of this path.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Number of labels in this path.
    pub fn depth(&self) -> usize {
        self.labels().count()
    }
}

fn is_valid_label(label: &str) -> bool {
    let mut chars = label.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl std::fmt::Display for KbPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for KbPath {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for KbPath {
    type Error = RpcError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<KbPath> for String {
    fn from(path: KbPath) -> Self {
        path.0
    }
}

impl AsRef<str> for KbPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Caller-chosen correlation string for a request.
///
/// Uniqueness is the caller's concern; the queues never deduplicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh request id.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Wrap a caller-provided id, rejecting blank values.
    pub fn parse(s: impl Into<String>) -> Result<Self, RpcError> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(RpcError::Validation("request id must not be empty".into()));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
