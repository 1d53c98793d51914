//! Ordered storage for stop_times, the one table that can outgrow memory.
//!
//! Rows are ordered by `(trip_id, stop_sequence)` and indexed by stop. The
//! memory backend keeps a B-tree; the spill backend keeps an SQLite file in a
//! caller-chosen directory and removes it when dropped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;
use transitfeed_model::FeedId;

use crate::entity::StopTime;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("stop time storage failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stop time record could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("could not use spill directory {}: {source}", path.display())]
    SpillDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One visit of a stop by a trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StopVisit {
    pub trip_id: FeedId,
    pub stop_sequence: u32,
}

/// Operations every stop-time backend provides.
pub trait StopTimeBackend: Send {
    fn insert(&mut self, stop_time: StopTime) -> Result<(), StoreError>;

    /// Inserts a batch, atomically where the backend supports it.
    fn insert_many(&mut self, stop_times: Vec<StopTime>) -> Result<(), StoreError> {
        for stop_time in stop_times {
            self.insert(stop_time)?;
        }
        Ok(())
    }

    /// Rows of one trip in sequence order; equal sequences keep insertion order.
    fn trip_stop_times(&self, trip_id: &str) -> Result<Vec<StopTime>, StoreError>;

    fn last_stop_time(&self, trip_id: &str) -> Result<Option<StopTime>, StoreError>;

    fn trip_count(&self, trip_id: &str) -> Result<usize, StoreError>;

    /// Deletes every row of a trip and returns how many were removed.
    fn remove_trip(&mut self, trip_id: &str) -> Result<usize, StoreError>;

    fn stop_visits(&self, stop_id: &str) -> Result<Vec<StopVisit>, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;
}

type RowKey = (FeedId, u32, u64);

#[derive(Debug, Default)]
pub struct MemoryBackend {
    rows: BTreeMap<RowKey, StopTime>,
    by_stop: FxHashMap<FeedId, Vec<StopVisit>>,
    next_insert: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn trip_range(&self, trip_id: &str) -> impl DoubleEndedIterator<Item = &StopTime> {
        let trip = FeedId::from(trip_id);
        self.rows
            .range((trip.clone(), 0, 0)..=(trip, u32::MAX, u64::MAX))
            .map(|(_, stop_time)| stop_time)
    }
}

impl StopTimeBackend for MemoryBackend {
    fn insert(&mut self, stop_time: StopTime) -> Result<(), StoreError> {
        self.by_stop
            .entry(stop_time.stop_id.clone())
            .or_default()
            .push(StopVisit {
                trip_id: stop_time.trip_id.clone(),
                stop_sequence: stop_time.stop_sequence,
            });
        let key = (stop_time.trip_id.clone(), stop_time.stop_sequence, self.next_insert);
        self.next_insert += 1;
        self.rows.insert(key, stop_time);
        Ok(())
    }

    fn trip_stop_times(&self, trip_id: &str) -> Result<Vec<StopTime>, StoreError> {
        Ok(self.trip_range(trip_id).cloned().collect())
    }

    fn last_stop_time(&self, trip_id: &str) -> Result<Option<StopTime>, StoreError> {
        Ok(self.trip_range(trip_id).next_back().cloned())
    }

    fn trip_count(&self, trip_id: &str) -> Result<usize, StoreError> {
        Ok(self.trip_range(trip_id).count())
    }

    fn remove_trip(&mut self, trip_id: &str) -> Result<usize, StoreError> {
        let keys: Vec<RowKey> = {
            let trip = FeedId::from(trip_id);
            self.rows
                .range((trip.clone(), 0, 0)..=(trip, u32::MAX, u64::MAX))
                .map(|(key, _)| key.clone())
                .collect()
        };
        for key in &keys {
            if let Some(removed) = self.rows.remove(key) {
                if let Some(visits) = self.by_stop.get_mut(&removed.stop_id) {
                    visits.retain(|visit| visit.trip_id != trip_id);
                    if visits.is_empty() {
                        self.by_stop.remove(&removed.stop_id);
                    }
                }
            }
        }
        Ok(keys.len())
    }

    fn stop_visits(&self, stop_id: &str) -> Result<Vec<StopVisit>, StoreError> {
        Ok(self.by_stop.get(stop_id).cloned().unwrap_or_default())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.rows.len())
    }
}

/// Removes the database file once the connection has closed.
#[derive(Debug)]
struct SpillFile(PathBuf);

impl Drop for SpillFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.0) {
            debug!("could not remove spill file {}: {}", self.0.display(), err);
        }
    }
}

/// SQLite-backed store. Each row keeps its key columns for indexing and the
/// full record as JSON, extra columns included.
#[derive(Debug)]
pub struct SpillBackend {
    conn: Connection,
    file: SpillFile,
}

const SPILL_SCHEMA: &str = "
    PRAGMA journal_mode = OFF;
    PRAGMA synchronous = OFF;
    CREATE TABLE stop_times (
        id INTEGER PRIMARY KEY,
        trip_id TEXT NOT NULL,
        stop_id TEXT NOT NULL,
        stop_sequence INTEGER NOT NULL,
        record TEXT NOT NULL
    );
    CREATE INDEX stop_times_by_trip ON stop_times (trip_id, stop_sequence);
    CREATE INDEX stop_times_by_stop ON stop_times (stop_id);
";

impl SpillBackend {
    pub fn create_in(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::SpillDirectory {
            path: dir.to_path_buf(),
            source,
        })?;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        let path = dir.join(format!("stop_times_{}_{}.db", std::process::id(), nanos));
        let conn = Connection::open(&path)?;
        let file = SpillFile(path);
        conn.execute_batch(SPILL_SCHEMA)?;
        debug!("spilling stop times to {}", file.0.display());
        Ok(Self { conn, file })
    }

    pub fn path(&self) -> &Path {
        &self.file.0
    }

    fn decode(record: String) -> Result<StopTime, StoreError> {
        Ok(serde_json::from_str(&record)?)
    }
}

impl StopTimeBackend for SpillBackend {
    fn insert(&mut self, stop_time: StopTime) -> Result<(), StoreError> {
        let record = serde_json::to_string(&stop_time)?;
        self.conn
            .prepare_cached(
                "INSERT INTO stop_times (trip_id, stop_id, stop_sequence, record) VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![
                stop_time.trip_id.as_str(),
                stop_time.stop_id.as_str(),
                stop_time.stop_sequence,
                record
            ])?;
        Ok(())
    }

    fn insert_many(&mut self, stop_times: Vec<StopTime>) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO stop_times (trip_id, stop_id, stop_sequence, record) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for stop_time in &stop_times {
                let record = serde_json::to_string(stop_time)?;
                stmt.execute(params![
                    stop_time.trip_id.as_str(),
                    stop_time.stop_id.as_str(),
                    stop_time.stop_sequence,
                    record
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn trip_stop_times(&self, trip_id: &str) -> Result<Vec<StopTime>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT record FROM stop_times WHERE trip_id = ?1 ORDER BY stop_sequence, id",
        )?;
        let records = stmt
            .query_map(params![trip_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        records.into_iter().map(Self::decode).collect()
    }

    fn last_stop_time(&self, trip_id: &str) -> Result<Option<StopTime>, StoreError> {
        let record = self
            .conn
            .prepare_cached(
                "SELECT record FROM stop_times WHERE trip_id = ?1 \
                 ORDER BY stop_sequence DESC, id DESC LIMIT 1",
            )?
            .query_row(params![trip_id], |row| row.get::<_, String>(0))
            .optional()?;
        record.map(Self::decode).transpose()
    }

    fn trip_count(&self, trip_id: &str) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .prepare_cached("SELECT COUNT(*) FROM stop_times WHERE trip_id = ?1")?
            .query_row(params![trip_id], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn remove_trip(&mut self, trip_id: &str) -> Result<usize, StoreError> {
        let removed = self
            .conn
            .prepare_cached("DELETE FROM stop_times WHERE trip_id = ?1")?
            .execute(params![trip_id])?;
        Ok(removed)
    }

    fn stop_visits(&self, stop_id: &str) -> Result<Vec<StopVisit>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT trip_id, stop_sequence FROM stop_times WHERE stop_id = ?1 ORDER BY id",
        )?;
        let visits = stmt
            .query_map(params![stop_id], |row| {
                Ok(StopVisit {
                    trip_id: FeedId::from(row.get::<_, String>(0)?),
                    stop_sequence: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(visits)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM stop_times", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

/// Front for whichever backend the schedule was created with.
pub struct StopTimeStore {
    backend: Box<dyn StopTimeBackend>,
}

impl std::fmt::Debug for StopTimeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopTimeStore")
            .field("len", &self.backend.len().ok())
            .finish()
    }
}

impl Default for StopTimeStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl StopTimeStore {
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(MemoryBackend::new()),
        }
    }

    pub fn spill_to(dir: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            backend: Box::new(SpillBackend::create_in(dir)?),
        })
    }

    pub fn with_backend(backend: Box<dyn StopTimeBackend>) -> Self {
        Self { backend }
    }

    pub fn insert(&mut self, stop_time: StopTime) -> Result<(), StoreError> {
        self.backend.insert(stop_time)
    }

    pub fn insert_many(&mut self, stop_times: Vec<StopTime>) -> Result<(), StoreError> {
        if stop_times.is_empty() {
            return Ok(());
        }
        self.backend.insert_many(stop_times)
    }

    pub fn trip_stop_times(&self, trip_id: &str) -> Result<Vec<StopTime>, StoreError> {
        self.backend.trip_stop_times(trip_id)
    }

    pub fn last_stop_time(&self, trip_id: &str) -> Result<Option<StopTime>, StoreError> {
        self.backend.last_stop_time(trip_id)
    }

    pub fn trip_count(&self, trip_id: &str) -> Result<usize, StoreError> {
        self.backend.trip_count(trip_id)
    }

    pub fn remove_trip(&mut self, trip_id: &str) -> Result<usize, StoreError> {
        self.backend.remove_trip(trip_id)
    }

    pub fn stop_visits(&self, stop_id: &str) -> Result<Vec<StopVisit>, StoreError> {
        self.backend.stop_visits(stop_id)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        self.backend.len()
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transitfeed_model::GtfsTime;

    fn stop_time(trip: &str, stop: &str, sequence: u32, secs: i32) -> StopTime {
        let mut stop_time = StopTime::at(trip, stop, GtfsTime::from_seconds(secs));
        stop_time.stop_sequence = sequence;
        stop_time
    }

    fn spill_dir() -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("transitfeed_store_{}_{}", std::process::id(), nanos))
    }

    fn exercise(mut store: StopTimeStore) {
        store.insert(stop_time("T1", "C", 3, 300)).unwrap();
        store.insert(stop_time("T1", "A", 1, 100)).unwrap();
        store
            .insert_many(vec![stop_time("T2", "A", 1, 50), stop_time("T1", "B", 2, 200)])
            .unwrap();

        let sequences: Vec<u32> = store
            .trip_stop_times("T1")
            .unwrap()
            .iter()
            .map(|stop_time| stop_time.stop_sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(store.trip_count("T1").unwrap(), 3);
        assert_eq!(store.trip_count("T3").unwrap(), 0);
        assert_eq!(store.len().unwrap(), 4);

        let mut visits = store.stop_visits("A").unwrap();
        visits.sort_by(|a, b| a.trip_id.cmp(&b.trip_id));
        assert_eq!(
            visits,
            vec![
                StopVisit { trip_id: "T1".into(), stop_sequence: 1 },
                StopVisit { trip_id: "T2".into(), stop_sequence: 1 },
            ]
        );

        assert_eq!(store.last_stop_time("T1").unwrap().unwrap().stop_id, "C");
        assert!(store.last_stop_time("T9").unwrap().is_none());

        assert_eq!(store.remove_trip("T1").unwrap(), 3);
        assert!(store.trip_stop_times("T1").unwrap().is_empty());
        assert_eq!(store.stop_visits("A").unwrap().len(), 1);
        assert!(store.stop_visits("C").unwrap().is_empty());
    }

    #[test]
    fn memory_backend_orders_by_sequence() {
        exercise(StopTimeStore::in_memory());
    }

    #[test]
    fn spill_backend_orders_by_sequence() {
        let dir = spill_dir();
        exercise(StopTimeStore::spill_to(&dir).unwrap());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn spill_backend_keeps_extra_columns_and_removes_its_file() {
        let dir = spill_dir();
        let mut backend = SpillBackend::create_in(&dir).unwrap();
        let path = backend.path().to_path_buf();
        let mut row = stop_time("T1", "A", 1, 100);
        row.extra.set("timepoint", "1".to_string());
        row.stop_headsign = Some("Downtown".to_string());
        backend.insert(row.clone()).unwrap();
        assert_eq!(backend.trip_stop_times("T1").unwrap(), vec![row]);
        assert!(path.exists());
        drop(backend);
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn equal_sequences_keep_insertion_order() {
        let mut store = StopTimeStore::in_memory();
        store.insert(stop_time("T1", "first", 5, 10)).unwrap();
        store.insert(stop_time("T1", "second", 5, 20)).unwrap();
        let stops: Vec<_> = store
            .trip_stop_times("T1")
            .unwrap()
            .into_iter()
            .map(|stop_time| stop_time.stop_id)
            .collect();
        assert_eq!(stops, vec!["first", "second"]);
    }
}
