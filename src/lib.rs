pub mod alarm_scheduler;
pub mod buffer;
pub mod cache;
pub mod config;
pub mod config_store;
pub mod error;
pub mod event_bus;
pub mod executor;
pub mod field_extractor;
pub mod handlers;
pub mod index;
pub mod ingest;
pub mod model;
pub mod partition_manager;
pub mod query_lang;
pub mod retention_worker;

use std::collections::HashSet;
use std::sync::Arc;

use event_bus::Topic;
use model::alarm::AlarmEvent;
use model::event::LogEvent;

use buffer::WriteBehindBuffer;
use cache::SearchCache;
use config_store::ConfigStore;
use executor::SearchExecutor;
use field_extractor::FieldExtractor;
use partition_manager::PartitionManager;

/// Shared application state, extracted into every axum handler via
/// `State<AppState>` (teacher's `AppState` convention).
#[derive(Clone)]
pub struct AppState {
    pub partitions: Arc<PartitionManager>,
    pub buffer: Arc<WriteBehindBuffer>,
    pub executor: Arc<SearchExecutor>,
    pub cache: Arc<SearchCache>,
    pub config_store: Arc<ConfigStore>,
    pub field_extractor: Arc<FieldExtractor>,
    pub log_events: Arc<Topic<LogEvent>>,
    pub alarm_events: Arc<Topic<AlarmEvent>>,
    pub http_push_token: Option<String>,
}

impl AppState {
    /// Field names a query is permitted to reference: the built-ins plus
    /// every configured (not just enabled) field configuration's name.
    pub fn known_fields(&self) -> HashSet<String> {
        self.config_store
            .field_configurations()
            .entries
            .iter()
            .map(|(fc, _)| fc.name.clone())
            .collect()
    }
}
