//! Persistent key-value storage shared by the cache and the connectivity
//! tracker.
//!
//! This plays the part an origin-scoped key-value store plays for a web
//! client: every instance in the process that holds the same store sees the
//! same keys, and every write is broadcast as a [`StorageChange`] so other
//! instances can react to it (the connectivity flag relies on this).
//!
//! Two backends are provided:
//! - [`FileStore`]: one file per key inside a directory
//! - [`MemoryStore`]: a map behind a mutex, for tests and ephemeral sessions

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use thiserror::Error;
use tokio::sync::broadcast;

/// Capacity of the change broadcast. Slow subscribers skip missed events.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage quota exceeded: writing {key} needs {needed} bytes, quota is {quota}")]
    QuotaExceeded {
        key: String,
        needed: usize,
        quota: usize,
    },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A write observed on a shared store. `new_value` is `None` for removals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    pub new_value: Option<String>,
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Overwrite `key` with `value`. Fails with `QuotaExceeded` when the
    /// store's byte quota would be exceeded.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Subscribe to every subsequent successful `set`/`remove`.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// Broadcasts store writes to subscribers.
#[derive(Debug)]
pub(crate) struct ChangeNotifier {
    sender: broadcast::Sender<StorageChange>,
}

impl ChangeNotifier {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn notify(&self, key: &str, new_value: Option<&str>) {
        // No receivers is the common case and not an error
        let _ = self.sender.send(StorageChange {
            key: key.to_string(),
            new_value: new_value.map(str::to_string),
        });
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.sender.subscribe()
    }
}
