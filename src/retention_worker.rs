//! C11 — periodic retention sweep. Grounded on the teacher's
//! `retention_enforcer::spawn_retention_enforcer`/`enforce_retention` shape:
//! a single background task on a fixed tick, evaluating every enabled policy
//! and deleting what has aged out.

use std::sync::Arc;
use std::time::Duration;

use crate::config_store::ConfigStore;
use crate::index::IndexError;
use crate::model::query::{Predicate, PredicateLeaf};
use crate::model::retention::RetentionPolicy;
use crate::partition_manager::PartitionManager;

pub struct RetentionWorker {
    partitions: Arc<PartitionManager>,
    config: Arc<ConfigStore>,
    sweep_interval: Duration,
}

impl RetentionWorker {
    pub fn new(partitions: Arc<PartitionManager>, config: Arc<ConfigStore>, sweep_interval: Duration) -> Self {
        Self { partitions, config, sweep_interval }
    }

    pub fn spawn(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.sweep_interval);
            loop {
                interval.tick().await;
                if let Err(e) = self.sweep() {
                    tracing::error!("retention worker: sweep failed: {e}");
                }
            }
        });
    }

    fn sweep(&self) -> Result<(), IndexError> {
        let policies = self.config.retention_policies();
        let now = chrono::Utc::now();
        for policy in policies.iter().filter(|p| p.enabled) {
            self.enforce_policy(policy, now)?;
        }
        Ok(())
    }

    fn enforce_policy(&self, policy: &RetentionPolicy, now: chrono::DateTime<chrono::Utc>) -> Result<(), IndexError> {
        let threshold = policy.threshold(now);
        let mut fully_expired = 0usize;
        let mut partial = 0usize;

        for key in self.partitions.all_keys() {
            let source = key.source.as_deref().unwrap_or("");
            if !policy.matches_source(source) {
                continue;
            }
            let (start, end) = key.bucket_bounds();
            if end <= threshold {
                self.partitions.remove_partition(&key)?;
                fully_expired += 1;
            } else if start < threshold {
                partial += 1;
            }
        }

        if partial > 0 {
            let mut clauses = vec![Predicate::Leaf(PredicateLeaf::Range {
                field: "timestamp".to_string(),
                lo: None,
                hi: Some(threshold.to_rfc3339()),
            })];
            if let Some(filter) = policy.source_filter.as_deref().filter(|f| !f.is_empty()) {
                clauses.push(Predicate::Leaf(PredicateLeaf::Term { field: "source".to_string(), value: filter.to_string() }));
            }
            let predicate = if clauses.len() == 1 { clauses.remove(0) } else { Predicate::And(clauses) };
            let deleted = self.partitions.delete_by_predicate(&predicate)?;
            tracing::info!(
                "retention policy '{}': removed {fully_expired} expired partition(s), deleted {deleted} event(s) from {partial} partially-overlapping partition(s)",
                policy.name
            );
        } else if fully_expired > 0 {
            tracing::info!("retention policy '{}': removed {fully_expired} expired partition(s)", policy.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::LogEvent;
    use crate::model::partition::PartitionBucketType;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn scratch_root() -> PathBuf {
        std::env::temp_dir().join(format!("grepwise-retention-test-{}", Uuid::new_v4()))
    }

    fn scratch_config_path() -> String {
        std::env::temp_dir().join(format!("grepwise-retention-config-{}.sqlite", Uuid::new_v4())).to_string_lossy().to_string()
    }

    #[test]
    fn fully_expired_partition_is_removed() {
        let root = scratch_root();
        let pm = Arc::new(PartitionManager::new(&root, PartitionBucketType::Daily, 10, false));
        let mut e = LogEvent::new("s", "old event");
        e.record_time = Some(chrono::Utc::now() - chrono::Duration::days(30));
        pm.route(e).unwrap();
        pm.commit_all().unwrap();
        assert_eq!(pm.all_keys().len(), 1);

        let config_path = scratch_config_path();
        let config = Arc::new(ConfigStore::open(&config_path).unwrap());
        config
            .put_retention_policy(RetentionPolicy { name: "default".into(), max_age_days: 7, enabled: true, source_filter: None })
            .unwrap();

        let worker = RetentionWorker::new(pm.clone(), config, Duration::from_secs(60));
        worker.sweep().unwrap();

        assert_eq!(pm.all_keys().len(), 0);
        std::fs::remove_dir_all(&root).ok();
        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn fresh_partition_survives_sweep() {
        let root = scratch_root();
        let pm = Arc::new(PartitionManager::new(&root, PartitionBucketType::Daily, 10, false));
        let mut e = LogEvent::new("s", "recent event");
        e.record_time = Some(chrono::Utc::now());
        pm.route(e).unwrap();
        pm.commit_all().unwrap();

        let config_path = scratch_config_path();
        let config = Arc::new(ConfigStore::open(&config_path).unwrap());
        config
            .put_retention_policy(RetentionPolicy { name: "default".into(), max_age_days: 7, enabled: true, source_filter: None })
            .unwrap();

        let worker = RetentionWorker::new(pm.clone(), config, Duration::from_secs(60));
        worker.sweep().unwrap();

        assert_eq!(pm.all_keys().len(), 1);
        std::fs::remove_dir_all(&root).ok();
        std::fs::remove_file(&config_path).ok();
    }
}
