//! C2 — routes events to the right partition, rolls buckets over, seals the
//! oldest active partition, and fans out searches across all overlapping
//! partitions.

use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::index::{IndexError, PartitionIndex};
use crate::model::event::LogEvent;
use crate::model::partition::{PartitionBucketType, PartitionKey, PartitionState};
use crate::model::query::{CompiledQuery, Predicate, SortSpec};

/// External collaborator: hands a sealed partition's directory to archival
/// storage. The plugin registry/backup machinery that would implement this
/// for real is out of scope (§1); a no-op default lets the core compile and
/// be exercised without it.
pub trait ArchiveSink: Send + Sync {
    fn archive(&self, directory: &std::path::Path) -> Result<(), IndexError>;
}

pub struct NoopArchiveSink;

impl ArchiveSink for NoopArchiveSink {
    fn archive(&self, directory: &std::path::Path) -> Result<(), IndexError> {
        tracing::info!("archive sink (noop): would archive {}", directory.display());
        Ok(())
    }
}

struct PartitionEntry {
    index: Arc<PartitionIndex>,
    state: std::sync::RwLock<PartitionState>,
}

pub struct PartitionManager {
    root: PathBuf,
    bucket_type: PartitionBucketType,
    max_active_partitions: usize,
    auto_archive: bool,
    archive_sink: Arc<dyn ArchiveSink>,
    partitions: DashMap<PartitionKey, Arc<PartitionEntry>>,
    /// Active bucket indices only, most-recent-first is not tracked here —
    /// derived on demand from `partitions` to keep a single source of truth.
    active_keys: std::sync::Mutex<Vec<PartitionKey>>,
}

impl PartitionManager {
    pub fn new(root: impl Into<PathBuf>, bucket_type: PartitionBucketType, max_active_partitions: usize, auto_archive: bool) -> Self {
        Self {
            root: root.into(),
            bucket_type,
            max_active_partitions: max_active_partitions.max(1),
            auto_archive,
            archive_sink: Arc::new(NoopArchiveSink),
            partitions: DashMap::new(),
            active_keys: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_archive_sink(mut self, sink: Arc<dyn ArchiveSink>) -> Self {
        self.archive_sink = sink;
        self
    }

    fn partition_dir(&self, key: &PartitionKey) -> PathBuf {
        self.root.join("partitions").join(key.dir_name())
    }

    /// Route a single event to its partition, creating a new ACTIVE partition
    /// on first write in that bucket and rolling over if needed.
    pub fn route(&self, event: LogEvent) -> Result<(), IndexError> {
        let key = PartitionKey::for_event(self.bucket_type, event.partition_time(), Some(event.source.clone()));
        let entry = self.get_or_create(&key)?;
        {
            let state = entry.state.read().unwrap();
            if *state != PartitionState::Active {
                return Err(IndexError::Closed);
            }
        }
        entry.index.add(event)
    }

    fn get_or_create(&self, key: &PartitionKey) -> Result<Arc<PartitionEntry>, IndexError> {
        if let Some(entry) = self.partitions.get(key) {
            return Ok(entry.clone());
        }
        let index = Arc::new(PartitionIndex::open(self.partition_dir(key))?);
        let entry = Arc::new(PartitionEntry {
            index,
            state: std::sync::RwLock::new(PartitionState::Active),
        });
        self.partitions.insert(key.clone(), entry.clone());
        self.active_keys.lock().unwrap().push(key.clone());
        self.roll_over()?;
        Ok(entry)
    }

    /// Seal the oldest ACTIVE partition(s) until at most
    /// `max_active_partitions` remain active.
    fn roll_over(&self) -> Result<(), IndexError> {
        let mut active = self.active_keys.lock().unwrap();
        active.sort_by_key(|k| k.bucket_index);
        while active.len() > self.max_active_partitions {
            let oldest = active.remove(0);
            if let Some(entry) = self.partitions.get(&oldest) {
                entry.index.commit()?;
                *entry.state.write().unwrap() = PartitionState::Sealed;
                tracing::info!("partition {} sealed (rollover)", oldest.dir_name());
                if self.auto_archive {
                    let dir = entry.index.directory().to_path_buf();
                    let sink = self.archive_sink.clone();
                    let key_name = oldest.dir_name();
                    tokio::spawn(async move {
                        if let Err(e) = sink.archive(&dir) {
                            tracing::warn!("archive of partition {key_name} failed: {e}");
                        }
                    });
                }
            }
        }
        Ok(())
    }

    pub fn state_of(&self, key: &PartitionKey) -> Option<PartitionState> {
        self.partitions.get(key).map(|e| *e.state.read().unwrap())
    }

    pub fn active_partition_count(&self) -> usize {
        self.active_keys.lock().unwrap().len()
    }

    /// Fan out a compiled query to every partition whose bucket overlaps the
    /// query's time range (ACTIVE and SEALED; ARCHIVED partitions have been
    /// removed from disk by retention and are no longer present here), then
    /// merge-sort with a bounded top-K heap.
    pub fn search(&self, query: &CompiledQuery) -> Vec<LogEvent> {
        let overlapping: Vec<Arc<PartitionIndex>> = self
            .partitions
            .iter()
            .filter(|kv| {
                let (start, end) = kv.key().bucket_bounds();
                start < query.end_time && end > query.start_time
            })
            .map(|kv| kv.value().index.clone())
            .collect();

        let cap = if query.needs_full_materialization() {
            usize::MAX
        } else {
            query.limit
        };

        let mut heap: BinaryHeap<HeapEvent> = BinaryHeap::new();
        for index in overlapping {
            for event in index.search(&query.predicate, cap.min(usize::MAX / 2), &query.sort) {
                heap.push(HeapEvent(event));
                if heap.len() > cap && cap != usize::MAX {
                    heap.pop();
                }
            }
        }

        let mut merged: Vec<LogEvent> = heap.into_iter().map(|h| h.0).collect();
        crate::index::sort_events(&mut merged, &query.sort);
        merged.truncate(query.limit);
        merged
    }

    /// Delete events matching a predicate across every partition that could
    /// contain matches (used by the retention worker for partial overlaps).
    pub fn delete_by_predicate(&self, predicate: &Predicate) -> Result<usize, IndexError> {
        let mut total = 0;
        for kv in self.partitions.iter() {
            total += kv.value().index.delete_by_predicate(predicate)?;
            kv.value().index.commit()?;
        }
        Ok(total)
    }

    /// Remove a fully-expired partition from disk (called by the retention
    /// worker once the archive hand-off, if any, has completed).
    pub fn remove_partition(&self, key: &PartitionKey) -> Result<(), IndexError> {
        if let Some((_, entry)) = self.partitions.remove(key) {
            entry.index.close()?;
            std::fs::remove_dir_all(entry.index.directory()).map_err(|e| IndexError::Io(e.to_string()))?;
        }
        self.active_keys.lock().unwrap().retain(|k| k != key);
        Ok(())
    }

    pub fn all_keys(&self) -> Vec<PartitionKey> {
        self.partitions.iter().map(|kv| kv.key().clone()).collect()
    }

    /// Commits every partition's working set so recently-routed events become
    /// visible to search (§4.1's read-your-writes contract). Called by the
    /// write-behind buffer's flush sink after a batch has been routed.
    pub fn commit_all(&self) -> Result<(), IndexError> {
        for kv in self.partitions.iter() {
            kv.value().index.commit()?;
        }
        Ok(())
    }
}

/// Wraps a `LogEvent` for the merge heap; eviction order follows §4.1's
/// default (`recordTime` desc, tie-break by `id`) regardless of the query's
/// requested direction — the final `sort_events` pass below re-sorts the
/// surviving rows correctly, so this only affects which rows a very tight
/// `limit` keeps for a non-default ascending sort.
struct HeapEvent(LogEvent);

impl PartialEq for HeapEvent {
    fn eq(&self, other: &Self) -> bool {
        self.0.sort_key() == other.0.sort_key()
    }
}
impl Eq for HeapEvent {}
impl PartialOrd for HeapEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse so the heap's "greatest" (popped first when over capacity)
        // is the one with the smallest/oldest sort key.
        other.0.sort_key().cmp(&self.0.sort_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_root() -> PathBuf {
        std::env::temp_dir().join(format!("grepwise-pm-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn rollover_seals_oldest_when_active_cap_exceeded() {
        let root = scratch_root();
        let pm = PartitionManager::new(&root, PartitionBucketType::Daily, 2, false);

        for day_offset in 0..3i64 {
            let mut e = LogEvent::new("s", "x");
            e.record_time = Some(chrono::Utc::now() + chrono::Duration::days(day_offset));
            pm.route(e).unwrap();
        }

        assert_eq!(pm.active_partition_count(), 2);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn search_fans_out_across_overlapping_partitions() {
        let root = scratch_root();
        let pm = PartitionManager::new(&root, PartitionBucketType::Daily, 10, false);
        let mut e1 = LogEvent::new("s", "alpha");
        e1.record_time = Some(chrono::Utc::now());
        let mut e2 = LogEvent::new("s", "alpha");
        e2.record_time = Some(chrono::Utc::now() - chrono::Duration::days(1));
        pm.route(e1).unwrap();
        pm.route(e2).unwrap();
        for kv in pm.partitions.iter() {
            kv.value().index.commit().unwrap();
        }

        let q = CompiledQuery {
            predicate: Predicate::Leaf(crate::model::query::PredicateLeaf::Term {
                field: "message".into(),
                value: "alpha".into(),
            }),
            start_time: chrono::Utc::now() - chrono::Duration::days(2),
            end_time: chrono::Utc::now() + chrono::Duration::hours(1),
            pipeline: vec![],
            limit: 10,
            sort: SortSpec::default(),
        };
        let results = pm.search(&q);
        assert_eq!(results.len(), 2);
        std::fs::remove_dir_all(&root).ok();
    }
}
