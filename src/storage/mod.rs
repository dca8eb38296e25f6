//! Leaderboard Persistence
//!
//! The leaderboard is loaded once at startup and rewritten wholesale after
//! every new entry. Stores are synchronous: writes are tiny and happen at
//! most once per completed run.

pub mod json_file;

use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::game::LeaderboardEntry;

pub use json_file::JsonFileStore;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("leaderboard io error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored data could not be (de)serialized.
    #[error("leaderboard json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Load/save collaborator for the leaderboard.
pub trait LeaderboardStore: Send {
    /// Read persisted entries. Missing data is an empty list, not an error.
    fn load(&self) -> Result<Vec<LeaderboardEntry>, StorageError>;

    /// Replace persisted entries.
    fn save(&mut self, entries: &[LeaderboardEntry]) -> Result<(), StorageError>;
}

/// In-memory store. Clones share the same backing list.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<Vec<LeaderboardEntry>>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with entries.
    pub fn with_entries(entries: Vec<LeaderboardEntry>) -> Self {
        Self { entries: Arc::new(Mutex::new(entries)) }
    }

    /// Snapshot of what has been saved.
    pub fn saved(&self) -> Vec<LeaderboardEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl LeaderboardStore for MemoryStore {
    fn load(&self) -> Result<Vec<LeaderboardEntry>, StorageError> {
        Ok(self.saved())
    }

    fn save(&mut self, entries: &[LeaderboardEntry]) -> Result<(), StorageError> {
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = entries.to_vec();
        Ok(())
    }
}
