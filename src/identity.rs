/// Node identity.
///
/// The cluster's node set is fixed at init, so identities are opaque,
/// human-assignable strings rather than generated UUIDs — unlike a
/// dynamic-membership cluster, there is no need to mint fresh ids at
/// runtime, only to compare and order the ones handed to `init`.
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque, totally-ordered node identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
