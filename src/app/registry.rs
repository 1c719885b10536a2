use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Live connection -> authenticated device cuid.
///
/// Owned by the server for its lifetime and shared by reference; entries are
/// never persisted. A connection is either absent or mapped to exactly one
/// device.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<ConnectionId, String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the device previously bound to this connection, if any.
    pub fn register(&self, connection_id: ConnectionId, device_id: String) -> Option<String> {
        self.sessions().insert(connection_id, device_id)
    }

    pub fn unregister(&self, connection_id: ConnectionId) -> Option<String> {
        self.sessions().remove(&connection_id)
    }

    pub fn lookup(&self, connection_id: ConnectionId) -> Option<String> {
        self.sessions().get(&connection_id).cloned()
    }

    pub fn is_authorized(&self, connection_id: ConnectionId) -> bool {
        self.sessions().contains_key(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    // Every critical section is a single map operation, so a poisoned map is
    // still consistent.
    fn sessions(&self) -> MutexGuard<'_, HashMap<ConnectionId, String>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
