use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use grepwise_core::alarm_scheduler::{AlarmScheduler, SmtpConfig};
use grepwise_core::buffer::WriteBehindBuffer;
use grepwise_core::cache::SearchCache;
use grepwise_core::config::GrepwiseConfig;
use grepwise_core::config_store::ConfigStore;
use grepwise_core::event_bus::Topic;
use grepwise_core::executor::SearchExecutor;
use grepwise_core::field_extractor::FieldExtractor;
use grepwise_core::partition_manager::PartitionManager;
use grepwise_core::retention_worker::RetentionWorker;
use grepwise_core::{handlers, ingest, model, AppState};

const CONFIG_EXIT_CODE: i32 = 2;
const STORAGE_EXIT_CODE: i32 = 3;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("grepwise_core=debug,grepwise=debug,tower_http=debug")))
        .init();

    let config_path = std::env::var("GREPWISE_CONFIG").unwrap_or_else(|_| "./grepwise.toml".to_string());
    let config = match GrepwiseConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load config from {config_path}: {e}");
            std::process::exit(CONFIG_EXIT_CODE);
        }
    };

    let storage_root = PathBuf::from(&config.storage.root);
    if let Err(e) = std::fs::create_dir_all(&storage_root) {
        tracing::error!("failed to create storage root {}: {e}", storage_root.display());
        std::process::exit(STORAGE_EXIT_CODE);
    }

    let partitions = Arc::new(PartitionManager::new(
        storage_root.join("partitions"),
        config.partition.bucket_type,
        config.partition.max_active,
        config.partition.auto_archive,
    ));

    let config_db_path = storage_root.join("grepwise_config.sqlite");
    let config_store = match ConfigStore::open(&config_db_path.to_string_lossy()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("failed to open config store at {}: {e}", config_db_path.display());
            std::process::exit(STORAGE_EXIT_CODE);
        }
    };

    let field_extractor = Arc::new(FieldExtractor::default());
    let cache = Arc::new(SearchCache::new(config.cache.max_size, std::time::Duration::from_millis(config.cache.ttl_ms)));
    let executor = Arc::new(SearchExecutor::new(partitions.clone(), cache.clone()));

    let buffer = Arc::new(WriteBehindBuffer::new(config.buffer_config()));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    {
        let buffer = buffer.clone();
        let partitions = partitions.clone();
        let field_extractor = field_extractor.clone();
        let config_store = config_store.clone();
        tokio::spawn(async move {
            buffer
                .run_flusher(
                    move |batch| {
                        let partitions = partitions.clone();
                        let field_extractor = field_extractor.clone();
                        let config_store = config_store.clone();
                        async move {
                            let fields = config_store.field_configurations();
                            for event in batch {
                                let extracted = field_extractor.extract(event, &fields);
                                if let Err(e) = partitions.route(extracted) {
                                    tracing::warn!("buffer flush: failed to route event: {e}");
                                }
                            }
                            if let Err(e) = partitions.commit_all() {
                                tracing::error!("buffer flush: commit failed: {e}");
                            }
                        }
                    },
                    shutdown_rx,
                )
                .await;
        });
    }

    let log_events: Arc<Topic<model::event::LogEvent>> = Arc::new(Topic::new());
    let alarm_events: Arc<Topic<model::alarm::AlarmEvent>> = Arc::new(Topic::new());

    let smtp_config = SmtpConfig {
        host: config.smtp.host.clone(),
        port: config.smtp.port,
        user: config.smtp.user.clone(),
        pass: config.smtp.pass.clone(),
        from: config.smtp.from.clone(),
    };
    let alarm_scheduler = Arc::new(AlarmScheduler::new(config_store.clone(), executor.clone(), alarm_events.clone(), smtp_config));
    alarm_scheduler.spawn();

    let retention_worker = Arc::new(RetentionWorker::new(
        partitions.clone(),
        config_store.clone(),
        std::time::Duration::from_millis(config.retention.sweep_interval_ms),
    ));
    retention_worker.spawn();

    spawn_ingest_sources(&config, &storage_root, buffer.clone());

    let http_push_token = config.ingest.http_push_bearer_token.clone();

    let state = AppState {
        partitions,
        buffer,
        executor,
        cache,
        config_store,
        field_extractor,
        log_events,
        alarm_events,
        http_push_token,
    };

    let app = Router::new()
        .route("/api/logs/search", get(handlers::logs::search))
        .route("/api/logs/histogram", get(handlers::logs::histogram))
        .route("/api/logs/time-aggregation", get(handlers::logs::time_aggregation))
        .route("/api/logs/http-push/{sourceId}", post(handlers::logs::http_push_ingest))
        .route("/api/alarms", get(handlers::alarms::list_alarms).post(handlers::alarms::create_alarm))
        .route(
            "/api/alarms/{id}",
            get(handlers::alarms::get_alarm).put(handlers::alarms::update_alarm).delete(handlers::alarms::delete_alarm),
        )
        .route("/api/realtime/logs", get(handlers::realtime::logs))
        .route("/api/realtime/widgets/{id}", get(handlers::realtime::widget))
        .route("/healthz", get(handlers::health::healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("grepwise listening on {addr}");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("failed to bind {addr}: {e}");
            std::process::exit(STORAGE_EXIT_CODE);
        }
    };

    let serve_result = tokio::select! {
        res = axum::serve(listener, app) => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(());
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    if let Err(e) = serve_result {
        tracing::error!("server error: {e}");
        std::process::exit(STORAGE_EXIT_CODE);
    }
}

fn spawn_ingest_sources(config: &GrepwiseConfig, storage_root: &std::path::Path, buffer: Arc<WriteBehindBuffer>) {
    if let Some(port) = config.ingest.syslog_udp_port {
        Arc::new(ingest::syslog::SyslogUdpSource::new(port, buffer.clone())).spawn();
    }
    if let Some(port) = config.ingest.syslog_tcp_port {
        Arc::new(ingest::syslog::SyslogTcpSource::new(port, buffer.clone())).spawn();
    }
    for file_tail in &config.ingest.file_tail {
        let source = Arc::new(ingest::file_tail::FileTailSource::new(
            file_tail.source_id.clone(),
            file_tail.file_pattern.clone(),
            std::time::Duration::from_secs(file_tail.scan_interval_secs),
            file_tail.format,
            buffer.clone(),
            storage_root,
        ));
        source.spawn();
    }
    for cloud_pull in &config.ingest.cloud_pull {
        let http_source = Box::new(ingest::cloud_pull::HttpCloudLogSource::new(cloud_pull.endpoint.clone()));
        let source = ingest::cloud_pull::CloudPullSource::new(
            cloud_pull.source_id.clone(),
            std::time::Duration::from_secs(cloud_pull.query_refresh_interval_secs),
            http_source,
            buffer.clone(),
        );
        tokio::spawn(source.run());
    }
}
