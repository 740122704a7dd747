//! C1 — the inverted index store.
//!
//! One `PartitionIndex` backs a single partition directory. Writers mutate a
//! `Mutex`-guarded working set; `commit()` builds a fresh immutable
//! `IndexSnapshot` and swaps it into an `ArcSwap` so that readers never block
//! on writers and always see either the whole previous snapshot or the whole
//! new one (§4.1's "readers take a snapshot reference with no writer
//! interaction").

mod snapshot;
mod tokenize;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use arc_swap::ArcSwap;
use uuid::Uuid;

use crate::model::event::LogEvent;
use crate::model::query::{Predicate, SortSpec};

pub use snapshot::IndexSnapshot;
pub(crate) use tokenize::tokenize;

/// Sort a plain `Vec<LogEvent>` (e.g. after merging results across
/// partitions) using the same comparator `IndexSnapshot::search` uses.
pub fn sort_events(events: &mut [LogEvent], sort: &SortSpec) {
    let mut refs: Vec<&LogEvent> = events.iter().collect();
    snapshot::sort_rows(&mut refs, sort);
    let order: Vec<Uuid> = refs.iter().map(|e| e.id).collect();
    events.sort_by_key(|e| order.iter().position(|id| *id == e.id).unwrap_or(usize::MAX));
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(String),
    #[error("partition is closed")]
    Closed,
}

struct WriteState {
    docs: BTreeMap<Uuid, LogEvent>,
    closed: bool,
}

/// Required document fields per spec §4.1: `id`, `timestamp` (ingest time),
/// `recordTime`, `level`, `source`, `message`, `rawContent`, plus metadata and
/// extracted fields — all carried directly on `LogEvent` so no separate
/// document projection is needed.
pub struct PartitionIndex {
    directory: PathBuf,
    write: Mutex<WriteState>,
    snapshot: ArcSwap<IndexSnapshot>,
}

impl PartitionIndex {
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(|e| IndexError::Io(e.to_string()))?;
        let segments_dir = directory.join("segments");
        std::fs::create_dir_all(&segments_dir).map_err(|e| IndexError::Io(e.to_string()))?;
        let docs = Self::load_segments(&segments_dir)?;
        let snapshot = IndexSnapshot::build(&docs);
        Ok(Self {
            directory,
            write: Mutex::new(WriteState { docs, closed: false }),
            snapshot: ArcSwap::from_pointee(snapshot),
        })
    }

    fn load_segments(segments_dir: &Path) -> Result<BTreeMap<Uuid, LogEvent>, IndexError> {
        let mut docs = BTreeMap::new();
        let Ok(read_dir) = std::fs::read_dir(segments_dir) else {
            return Ok(docs);
        };
        for entry in read_dir.flatten() {
            let Ok(contents) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            for line in contents.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogEvent>(line) {
                    Ok(event) => {
                        docs.insert(event.id, event);
                    }
                    Err(e) => {
                        tracing::warn!("segment {}: skipping unreadable record: {e}", entry.path().display());
                    }
                }
            }
        }
        Ok(docs)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Append-only write of a single event. Atomic per event: the event is
    /// either fully durable in the write-ahead segment or not written at all.
    pub fn add(&self, event: LogEvent) -> Result<(), IndexError> {
        let mut state = self.write.lock().unwrap();
        if state.closed {
            return Err(IndexError::Closed);
        }
        self.append_segment(&event)?;
        state.docs.insert(event.id, event);
        Ok(())
    }

    fn append_segment(&self, event: &LogEvent) -> Result<(), IndexError> {
        use std::io::Write;
        let path = self.directory.join("segments").join("current.jsonl");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| IndexError::Io(e.to_string()))?;
        let line = serde_json::to_string(event).map_err(|e| IndexError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| IndexError::Io(e.to_string()))?;
        Ok(())
    }

    /// Delete every document matching `predicate` (typically `timestamp < T`
    /// and optionally `source = s`). Returns the number removed.
    pub fn delete_by_predicate(&self, predicate: &Predicate) -> Result<usize, IndexError> {
        let mut state = self.write.lock().unwrap();
        if state.closed {
            return Err(IndexError::Closed);
        }
        let snapshot = IndexSnapshot::build(&state.docs);
        let matches = snapshot.evaluate(predicate);
        let before = state.docs.len();
        state.docs.retain(|id, _| !matches.contains(id));
        let removed = before - state.docs.len();
        Ok(removed)
    }

    /// Durability barrier: build a fresh snapshot from the current write set
    /// and swap it in. Double-commit with no intervening writes is a no-op
    /// observable effect (the snapshot content is unchanged).
    pub fn commit(&self) -> Result<(), IndexError> {
        let state = self.write.lock().unwrap();
        if state.closed {
            return Err(IndexError::Closed);
        }
        self.rewrite_segment(&state.docs)?;
        let snapshot = IndexSnapshot::build(&state.docs);
        self.snapshot.store(std::sync::Arc::new(snapshot));
        Ok(())
    }

    fn rewrite_segment(&self, docs: &BTreeMap<Uuid, LogEvent>) -> Result<(), IndexError> {
        use std::io::Write;
        let tmp = self.directory.join("segments").join("current.jsonl.tmp");
        let mut file = std::fs::File::create(&tmp).map_err(|e| IndexError::Io(e.to_string()))?;
        for event in docs.values() {
            let line = serde_json::to_string(event).map_err(|e| IndexError::Io(e.to_string()))?;
            writeln!(file, "{line}").map_err(|e| IndexError::Io(e.to_string()))?;
        }
        drop(file);
        std::fs::rename(&tmp, self.directory.join("segments").join("current.jsonl"))
            .map_err(|e| IndexError::Io(e.to_string()))?;
        Ok(())
    }

    /// A point-in-time, writer-independent view for search.
    pub fn snapshot(&self) -> std::sync::Arc<IndexSnapshot> {
        self.snapshot.load_full()
    }

    pub fn search(&self, predicate: &Predicate, limit: usize, sort: &SortSpec) -> Vec<LogEvent> {
        self.snapshot().search(predicate, limit, sort)
    }

    pub fn close(&self) -> Result<(), IndexError> {
        let mut state = self.write.lock().unwrap();
        self.rewrite_segment(&state.docs)?;
        let snapshot = IndexSnapshot::build(&state.docs);
        self.snapshot.store(std::sync::Arc::new(snapshot));
        state.closed = true;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.write.lock().unwrap().docs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::query::{Predicate, PredicateLeaf, SortSpec};

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("grepwise-index-test-{}", Uuid::new_v4()))
    }

    #[test]
    fn add_then_commit_then_search_is_read_your_writes() {
        let dir = scratch_dir();
        let idx = PartitionIndex::open(&dir).unwrap();
        let e = LogEvent::new("host-a", "hello world");
        let id = e.id;
        idx.add(e).unwrap();
        idx.commit().unwrap();

        let results = idx.search(
            &Predicate::Leaf(PredicateLeaf::Term {
                field: "message".into(),
                value: "hello".into(),
            }),
            10,
            &SortSpec::default(),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn delete_by_predicate_removes_matching_docs() {
        let dir = scratch_dir();
        let idx = PartitionIndex::open(&dir).unwrap();
        idx.add(LogEvent::new("a", "keep me")).unwrap();
        let e2 = LogEvent::new("b", "drop me");
        idx.add(e2.clone()).unwrap();
        idx.commit().unwrap();

        let removed = idx
            .delete_by_predicate(&Predicate::Leaf(PredicateLeaf::Term {
                field: "source".into(),
                value: "b".into(),
            }))
            .unwrap();
        assert_eq!(removed, 1);
        idx.commit().unwrap();
        assert_eq!(idx.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn double_commit_is_a_no_op() {
        let dir = scratch_dir();
        let idx = PartitionIndex::open(&dir).unwrap();
        idx.add(LogEvent::new("a", "x")).unwrap();
        idx.commit().unwrap();
        let before = idx.snapshot().doc_count();
        idx.commit().unwrap();
        assert_eq!(before, idx.snapshot().doc_count());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn closed_partition_rejects_writes() {
        let dir = scratch_dir();
        let idx = PartitionIndex::open(&dir).unwrap();
        idx.close().unwrap();
        assert!(matches!(idx.add(LogEvent::new("a", "x")), Err(IndexError::Closed)));
        std::fs::remove_dir_all(&dir).ok();
    }
}
