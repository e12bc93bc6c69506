//! # Attempts History Module
//!
//! A bounded, newest-first log of how many wrong notes preceded each
//! successful round. The log survives restarts through a [`HistoryStore`].

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::HistoryError;

/// Number of finished rounds kept unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 10;

/// Backing store for the attempts history.
pub trait HistoryStore {
    /// Reads the persisted sequence, newest first. An absent store is an
    /// empty history, not an error.
    fn load(&self) -> Result<Vec<u32>, HistoryError>;

    /// Replaces the persisted sequence.
    fn save(&mut self, attempts: &[u32]) -> Result<(), HistoryError>;
}

impl<T: HistoryStore + ?Sized> HistoryStore for Box<T> {
    fn load(&self) -> Result<Vec<u32>, HistoryError> {
        (**self).load()
    }

    fn save(&mut self, attempts: &[u32]) -> Result<(), HistoryError> {
        (**self).save(attempts)
    }
}

/// On-disk layout of the history file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredAttempts {
    last_attempts: Vec<u32>,
}

/// Keeps the history in a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HistoryStore for JsonFileStore {
    fn load(&self) -> Result<Vec<u32>, HistoryError> {
        if !self.path.exists() {
            debug!("No history at {}, starting fresh", self.path.display());
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path)?;
        let stored: StoredAttempts = serde_json::from_str(&data)?;
        Ok(stored.last_attempts)
    }

    fn save(&mut self, attempts: &[u32]) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let stored = StoredAttempts {
            last_attempts: attempts.to_vec(),
        };
        let json_string = serde_json::to_string_pretty(&stored)?;
        fs::write(&self.path, json_string)?;
        Ok(())
    }
}

/// Keeps the history in memory only.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    attempts: Option<Vec<u32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `attempts`, as if saved by an earlier run.
    pub fn with_attempts(attempts: Vec<u32>) -> Self {
        Self {
            attempts: Some(attempts),
        }
    }
}

impl HistoryStore for MemoryStore {
    fn load(&self) -> Result<Vec<u32>, HistoryError> {
        Ok(self.attempts.clone().unwrap_or_default())
    }

    fn save(&mut self, attempts: &[u32]) -> Result<(), HistoryError> {
        self.attempts = Some(attempts.to_vec());
        Ok(())
    }
}

/// The cached history plus the store it is written through to.
#[derive(Debug)]
pub struct AttemptsHistory<S: HistoryStore> {
    records: Vec<u32>,
    capacity: usize,
    store: S,
}

impl<S: HistoryStore> AttemptsHistory<S> {
    /// Loads the history from `store`.
    ///
    /// Never fails: an unreadable or malformed store is logged and the
    /// history starts empty. Loaded sequences longer than `capacity` are cut
    /// down to their newest entries.
    pub fn load(store: S, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut records = match store.load() {
            Ok(records) => records,
            Err(e) => {
                warn!("Could not load attempts history, starting empty: {}", e);
                Vec::new()
            }
        };
        records.truncate(capacity);
        Self {
            records,
            capacity,
            store,
        }
    }

    /// Logs a finished round.
    ///
    /// The mistake count goes to the front, the oldest entry is dropped when
    /// over capacity, and the result is saved best-effort.
    ///
    /// # Arguments
    /// * `mistakes` - Wrong guesses made before the round was won
    ///
    /// # Returns
    /// * The updated history, newest first
    pub fn record(&mut self, mistakes: u32) -> &[u32] {
        self.records.insert(0, mistakes);
        self.records.truncate(self.capacity);
        if let Err(e) = self.store.save(&self.records) {
            warn!("Could not save attempts history: {}", e);
        }
        &self.records
    }

    /// The cached history, newest first.
    pub fn records(&self) -> &[u32] {
        &self.records
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A store whose every operation fails.
    struct BrokenStore;

    impl HistoryStore for BrokenStore {
        fn load(&self) -> Result<Vec<u32>, HistoryError> {
            Err(HistoryError::Io(std::io::Error::other("disk on fire")))
        }

        fn save(&mut self, _attempts: &[u32]) -> Result<(), HistoryError> {
            Err(HistoryError::Io(std::io::Error::other("disk on fire")))
        }
    }

    #[test]
    fn test_record_prepends() {
        let mut history = AttemptsHistory::load(MemoryStore::new(), DEFAULT_CAPACITY);
        assert!(history.records().is_empty());

        history.record(3);
        history.record(0);
        assert_eq!(history.record(5), &[5, 0, 3]);
        assert_eq!(history.store().load().unwrap(), vec![5, 0, 3]);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = AttemptsHistory::load(MemoryStore::new(), DEFAULT_CAPACITY);
        for mistakes in 1..=15 {
            history.record(mistakes);
        }
        assert_eq!(history.records().len(), 10);
        assert_eq!(history.records(), &[15, 14, 13, 12, 11, 10, 9, 8, 7, 6]);
        assert_eq!(history.store().load().unwrap().len(), 10);
    }

    #[test]
    fn test_oversized_store_is_truncated_on_load() {
        let store = MemoryStore::with_attempts((0..20).collect());
        let history = AttemptsHistory::load(store, 4);
        assert_eq!(history.records(), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_broken_store_is_not_fatal() {
        let mut history = AttemptsHistory::load(BrokenStore, DEFAULT_CAPACITY);
        assert!(history.records().is_empty());
        assert_eq!(history.record(2), &[2]);
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");

        let mut history = AttemptsHistory::load(JsonFileStore::new(&path), DEFAULT_CAPACITY);
        assert!(history.records().is_empty());
        history.record(1);
        history.record(4);

        let reloaded = AttemptsHistory::load(JsonFileStore::new(&path), DEFAULT_CAPACITY);
        assert_eq!(reloaded.records(), &[4, 1]);
    }

    #[test]
    fn test_json_store_tolerates_malformed_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, r#"{ "last_attempts": ["three", -1] }"#).unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load(), Err(HistoryError::Malformed(_))));

        let mut history = AttemptsHistory::load(store, DEFAULT_CAPACITY);
        assert!(history.records().is_empty());
        history.record(7);
        assert_eq!(JsonFileStore::new(&path).load().unwrap(), vec![7]);
    }
}
