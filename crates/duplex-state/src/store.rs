//! HistoryStore: redb-backed deployment history.
//!
//! Records are JSON-serialized into a single table keyed by sequence
//! number. Appends trim the table down to `max_entries`.

use std::path::Path;
use std::sync::Arc;

use duplex_core::config::DEFAULT_HISTORY_MAX;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::HISTORY;
use crate::types::DeployRecord;

/// Append-only deployment log as the orchestrator sees it.
pub trait DeployHistory: Send + Sync {
    fn append(&self, record: &DeployRecord) -> StateResult<()>;

    /// Up to `limit` records, newest first.
    fn recent(&self, limit: usize) -> StateResult<Vec<DeployRecord>>;

    /// Tag at `index` in newest-first order (0 = current, 1 = previous).
    fn tag_at(&self, index: usize) -> StateResult<Option<String>> {
        let records = self.recent(index + 1)?;
        Ok(records.into_iter().nth(index).map(|r| r.tag))
    }

    fn current_tag(&self) -> StateResult<Option<String>> {
        self.tag_at(0)
    }

    /// The tag deployed before the current one, for rollbacks.
    fn previous_tag(&self) -> StateResult<Option<String>> {
        self.tag_at(1)
    }
}

/// Thread-safe history store backed by redb.
#[derive(Clone)]
pub struct HistoryStore {
    db: Arc<Database>,
    max_entries: usize,
}

impl HistoryStore {
    /// Open (or create) a persistent history store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(|e| StateError::Open {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let store = Self {
            db: Arc::new(db),
            max_entries: DEFAULT_HISTORY_MAX,
        };
        store.ensure_tables()?;
        debug!(?path, "history store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory history store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(|e| StateError::Open {
                path: ":memory:".to_string(),
                message: e.to_string(),
            })?;
        let store = Self {
            db: Arc::new(db),
            max_entries: DEFAULT_HISTORY_MAX,
        };
        store.ensure_tables()?;
        debug!("in-memory history store opened");
        Ok(store)
    }

    /// Cap retention at `max_entries` (minimum 1).
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(StateError::database)?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(HISTORY).map_err(StateError::database)?;
        txn.commit().map_err(StateError::database)?;
        Ok(())
    }

    /// Find the newest record carrying `tag`.
    pub fn find(&self, tag: &str) -> StateResult<Option<DeployRecord>> {
        let txn = self.db.begin_read().map_err(StateError::database)?;
        let table = txn.open_table(HISTORY).map_err(StateError::database)?;
        for entry in table.iter().map_err(StateError::database)?.rev() {
            let (key, value) = entry.map_err(StateError::database)?;
            let record = decode(key.value(), value.value())?;
            if record.tag == tag {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    pub fn len(&self) -> StateResult<usize> {
        let txn = self.db.begin_read().map_err(StateError::database)?;
        let table = txn.open_table(HISTORY).map_err(StateError::database)?;
        let mut count = 0;
        for entry in table.iter().map_err(StateError::database)? {
            entry.map_err(StateError::database)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> StateResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn decode(seq: u64, bytes: &[u8]) -> StateResult<DeployRecord> {
    serde_json::from_slice(bytes).map_err(|e| StateError::CorruptRecord {
        seq,
        message: e.to_string(),
    })
}

impl DeployHistory for HistoryStore {
    fn append(&self, record: &DeployRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(|e| StateError::Encode {
            tag: record.tag.clone(),
            message: e.to_string(),
        })?;
        let txn = self.db.begin_write().map_err(StateError::database)?;
        let (seq, trimmed) = {
            let mut table = txn.open_table(HISTORY).map_err(StateError::database)?;
            let seq = table
                .last()
                .map_err(StateError::database)?
                .map(|(key, _)| key.value() + 1)
                .unwrap_or(0);
            table
                .insert(seq, value.as_slice())
                .map_err(StateError::database)?;

            let mut keys = Vec::new();
            for entry in table.iter().map_err(StateError::database)? {
                let (key, _) = entry.map_err(StateError::database)?;
                keys.push(key.value());
            }
            let excess = keys.len().saturating_sub(self.max_entries);
            for key in &keys[..excess] {
                table.remove(*key).map_err(StateError::database)?;
            }
            (seq, excess)
        };
        txn.commit().map_err(StateError::database)?;
        debug!(seq, tag = %record.tag, trimmed, "deploy recorded");
        Ok(())
    }

    fn recent(&self, limit: usize) -> StateResult<Vec<DeployRecord>> {
        let txn = self.db.begin_read().map_err(StateError::database)?;
        let table = txn.open_table(HISTORY).map_err(StateError::database)?;
        let mut results = Vec::new();
        if limit == 0 {
            return Ok(results);
        }
        for entry in table.iter().map_err(StateError::database)?.rev() {
            let (key, value) = entry.map_err(StateError::database)?;
            let record = decode(key.value(), value.value())?;
            results.push(record);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: &str) -> DeployRecord {
        DeployRecord::new(tag, "all", Some("ci"))
    }

    #[test]
    fn empty_store_operations() {
        let store = HistoryStore::open_in_memory().unwrap();
        assert!(store.recent(10).unwrap().is_empty());
        assert_eq!(store.current_tag().unwrap(), None);
        assert_eq!(store.previous_tag().unwrap(), None);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn recent_is_newest_first() {
        let store = HistoryStore::open_in_memory().unwrap();
        for tag in ["main-a", "main-b", "main-c"] {
            store.append(&record(tag)).unwrap();
        }

        let tags: Vec<_> = store
            .recent(10)
            .unwrap()
            .into_iter()
            .map(|r| r.tag)
            .collect();
        assert_eq!(tags, ["main-c", "main-b", "main-a"]);

        let limited = store.recent(2).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].tag, "main-c");
    }

    #[test]
    fn current_and_previous_tags() {
        let store = HistoryStore::open_in_memory().unwrap();
        store.append(&record("main-a")).unwrap();
        assert_eq!(store.current_tag().unwrap().as_deref(), Some("main-a"));
        assert_eq!(store.previous_tag().unwrap(), None);

        store.append(&record("main-b")).unwrap();
        assert_eq!(store.current_tag().unwrap().as_deref(), Some("main-b"));
        assert_eq!(store.previous_tag().unwrap().as_deref(), Some("main-a"));
        assert_eq!(store.tag_at(5).unwrap(), None);
    }

    #[test]
    fn append_trims_to_max_entries() {
        let store = HistoryStore::open_in_memory().unwrap().with_max_entries(3);
        for i in 0..5 {
            store.append(&record(&format!("main-{i}"))).unwrap();
        }

        assert_eq!(store.len().unwrap(), 3);
        let tags: Vec<_> = store
            .recent(10)
            .unwrap()
            .into_iter()
            .map(|r| r.tag)
            .collect();
        assert_eq!(tags, ["main-4", "main-3", "main-2"]);
    }

    #[test]
    fn find_returns_newest_match() {
        let store = HistoryStore::open_in_memory().unwrap();
        store.append(&DeployRecord::new("main-a", "api", Some("alice"))).unwrap();
        store.append(&DeployRecord::new("main-b", "all", Some("bob"))).unwrap();
        store.append(&DeployRecord::new("main-a", "all", Some("carol"))).unwrap();

        let found = store.find("main-a").unwrap().unwrap();
        assert_eq!(found.deployed_by, "carol");
        assert!(store.find("main-z").unwrap().is_none());
    }

    #[test]
    fn unreadable_entry_names_its_sequence_number() {
        let store = HistoryStore::open_in_memory().unwrap();
        store.append(&record("main-a")).unwrap();
        {
            let txn = store.db.begin_write().unwrap();
            {
                let mut table = txn.open_table(HISTORY).unwrap();
                table.insert(1, b"not json".as_slice()).unwrap();
            }
            txn.commit().unwrap();
        }

        let err = store.recent(10).unwrap_err();
        assert!(matches!(err, StateError::CorruptRecord { seq: 1, .. }));
        assert!(err.to_string().starts_with("history entry #1 is unreadable"));
        assert!(store.find("main-z").is_err());
    }

    #[test]
    fn open_failure_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("history.redb");

        let err = HistoryStore::open(&path).err().unwrap();
        assert!(matches!(err, StateError::Open { .. }));
        assert!(err.to_string().contains("missing-dir"));
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.redb");

        {
            let store = HistoryStore::open(&path).unwrap();
            store.append(&record("main-a")).unwrap();
            store.append(&record("main-b")).unwrap();
        }

        let store = HistoryStore::open(&path).unwrap();
        assert_eq!(store.previous_tag().unwrap().as_deref(), Some("main-a"));

        // Sequence numbering continues after reopen.
        store.append(&record("main-c")).unwrap();
        assert_eq!(store.current_tag().unwrap().as_deref(), Some("main-c"));
    }
}
