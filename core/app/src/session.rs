//! Cache session bookkeeping.

use std::collections::BTreeMap;

use salecache_common::CollectionName;
use salecache_sync::Hydration;
use uuid::Uuid;

/// Session handle for tracking the active key session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(String);

impl SessionHandle {
    /// Generate a new unique session handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the handle string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of opening a session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub handle: SessionHandle,
    /// How each collection was restored.
    pub hydration: BTreeMap<CollectionName, Hydration>,
}

impl SessionReport {
    /// Collections whose stored cache was discarded and need a full sync.
    pub fn reset_collections(&self) -> Vec<CollectionName> {
        self.hydration
            .iter()
            .filter(|(_, h)| **h == Hydration::Reset)
            .map(|(c, _)| *c)
            .collect()
    }
}
