//! C7 — the search executor: binds a `CompiledQuery` to a result set by
//! consulting the cache, fanning out across overlapping partitions, and
//! running the post-filter pipeline, all subject to a caller deadline.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::SearchCache;
use crate::error::GrepwiseError;
use crate::model::event::LogEvent;
use crate::model::query::CompiledQuery;
use crate::partition_manager::PartitionManager;
use crate::query_lang::pipeline::{run_pipeline, ResultRow};

pub struct SearchExecutor {
    partitions: Arc<PartitionManager>,
    cache: Arc<SearchCache>,
}

impl SearchExecutor {
    pub fn new(partitions: Arc<PartitionManager>, cache: Arc<SearchCache>) -> Self {
        Self { partitions, cache }
    }

    /// Executes `query` end to end: cache lookup (single-flight on miss),
    /// partition fan-out, and pipeline execution. `deadline` bounds the whole
    /// call; on expiry the cache's single-flight leader still completes and
    /// publishes its result for other waiters (§4.7 "cache leader is exempt
    /// from caller cancellation"), but this caller observes `DeadlineExceeded`.
    pub async fn search(&self, query: CompiledQuery, deadline: Duration) -> Result<Vec<ResultRow>, GrepwiseError> {
        let fingerprint = query.fingerprint();
        let partitions = self.partitions.clone();
        let pipeline = query.pipeline.clone();
        let query_for_compute = query.clone();

        let compute = move || -> Vec<LogEvent> { partitions.search(&query_for_compute) };

        let cache = self.cache.clone();
        let fp = fingerprint.clone();
        let fetch = tokio::task::spawn_blocking(move || cache.get_with(fp, compute));

        let events = match tokio::time::timeout(deadline, fetch).await {
            Ok(Ok(events)) => events,
            Ok(Err(_)) => return Err(GrepwiseError::FatalStorage("search task panicked".into())),
            Err(_) => return Err(GrepwiseError::DeadlineExceeded),
        };

        let rows = run_pipeline((*events).clone(), &pipeline);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::LogEvent;
    use crate::model::partition::PartitionBucketType;
    use crate::model::query::{Predicate, PredicateLeaf, SortSpec};
    use std::path::PathBuf;

    fn scratch_root() -> PathBuf {
        std::env::temp_dir().join(format!("grepwise-exec-test-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn search_returns_matching_rows_within_deadline() {
        let root = scratch_root();
        let pm = Arc::new(PartitionManager::new(&root, PartitionBucketType::Daily, 10, false));
        let mut e = LogEvent::new("s", "boom happened");
        e.record_time = Some(chrono::Utc::now());
        pm.route(e).unwrap();
        pm.commit_all().unwrap();

        let cache = Arc::new(SearchCache::new(100, Duration::from_secs(60)));
        let executor = SearchExecutor::new(pm, cache);

        let q = CompiledQuery {
            predicate: Predicate::Leaf(PredicateLeaf::Term { field: "message".into(), value: "boom".into() }),
            start_time: chrono::Utc::now() - chrono::Duration::hours(1),
            end_time: chrono::Utc::now() + chrono::Duration::hours(1),
            pipeline: vec![],
            limit: 10,
            sort: SortSpec::default(),
        };

        let rows = executor.search(q, Duration::from_secs(5)).await.unwrap();
        assert_eq!(rows.len(), 1);
        std::fs::remove_dir_all(&root).ok();
    }
}
