//! Keyed query cache invalidation seam
//!
//! The host application owns the query cache (the thing that refetches data
//! for screens). The realtime client only ever tells it "this key is stale".

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hierarchical cache key, e.g. `["case", "case-42"]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    /// Build a key from its segments
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Key segments
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// External keyed-cache invalidation capability
///
/// Implementations must return quickly: they are called from the socket
/// receive loop. Schedule the actual refetch elsewhere.
pub trait CacheInvalidator: Send + Sync {
    /// Mark a key as stale
    fn invalidate(&self, key: &QueryKey);
}
