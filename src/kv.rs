//! A narrow trait standing in for the remote key-value store the backup
//! and restore routines ship map files through.
//!
//! No concrete network client is in scope here — an embedder wires a real
//! client (Tokyo Tyrant, Redis, whatever the deployment uses) behind
//! [`RemoteKv`]. [`InMemoryKv`] is a test double the backup/restore test
//! suites run against.

use std::collections::BTreeMap;

use thiserror::Error;

/// Errors a [`RemoteKv`] implementation may surface.
#[derive(Debug, Error)]
pub enum KvError {
    /// An operation was attempted before [`RemoteKv::connect`] succeeded.
    #[error("not connected")]
    NotConnected,

    /// No value is stored under the requested key.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The backend rejected the operation for a reason specific to it.
    #[error("backend error: {0}")]
    Backend(String),
}

/// The operations the backup and restore routines need from a remote
/// store: connect once, then put/get/delete individual keys and scan by
/// prefix (used to clear or enumerate a backup generation).
pub trait RemoteKv {
    fn connect(&mut self) -> Result<(), KvError>;
    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), KvError>;
    fn get(&mut self, key: &str) -> Result<Vec<u8>, KvError>;
    fn delete(&mut self, key: &str) -> Result<(), KvError>;

    /// Every stored key starting with `prefix`, in unspecified order.
    fn prefix_scan(&mut self, prefix: &str) -> Result<Vec<String>, KvError>;

    /// Asks the backend to compact/reclaim space. A no-op for stores that
    /// don't need it; [`BackupRoutine`](crate::backup::routine::BackupRoutine)
    /// calls this periodically rather than on every run.
    fn optimize(&mut self) -> Result<(), KvError>;
}

/// An in-process stand-in for a remote store, backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct InMemoryKv {
    connected: bool,
    entries: BTreeMap<String, Vec<u8>>,
    pub optimize_calls: u32,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RemoteKv for InMemoryKv {
    fn connect(&mut self) -> Result<(), KvError> {
        self.connected = true;
        Ok(())
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), KvError> {
        if !self.connected {
            return Err(KvError::NotConnected);
        }
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&mut self, key: &str) -> Result<Vec<u8>, KvError> {
        if !self.connected {
            return Err(KvError::NotConnected);
        }
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| KvError::NotFound(key.to_string()))
    }

    fn delete(&mut self, key: &str) -> Result<(), KvError> {
        if !self.connected {
            return Err(KvError::NotConnected);
        }
        self.entries.remove(key);
        Ok(())
    }

    fn prefix_scan(&mut self, prefix: &str) -> Result<Vec<String>, KvError> {
        if !self.connected {
            return Err(KvError::NotConnected);
        }
        Ok(self
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn optimize(&mut self) -> Result<(), KvError> {
        if !self.connected {
            return Err(KvError::NotConnected);
        }
        self.optimize_calls += 1;
        Ok(())
    }
}
