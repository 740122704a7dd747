//! Directory/glob-based file tailing source. Scans `filePattern` on
//! `scanIntervalSeconds`, reads only the bytes appended since the last scan,
//! and reassembles multi-line records (stack traces) via whitespace-prefix
//! continuation before parsing each record with the configured log format.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::config::LogFormat;
use crate::model::event::LogEvent;

use super::Sink;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct FileOffset {
    size: u64,
    last_modified: i64,
}

pub struct FileTailSource {
    source_id: String,
    pattern: String,
    scan_interval: Duration,
    format: LogFormat,
    sink: Sink,
    meta_path: PathBuf,
    offsets: Mutex<HashMap<String, FileOffset>>,
}

impl FileTailSource {
    pub fn new(source_id: String, pattern: String, scan_interval: Duration, format: LogFormat, sink: Sink, storage_root: &Path) -> Self {
        let meta_path = storage_root.join("index").join("log-index-meta.json");
        let offsets = load_offsets(&meta_path);
        Self {
            source_id,
            pattern,
            scan_interval,
            format,
            sink,
            meta_path,
            offsets: Mutex::new(offsets),
        }
    }

    pub fn spawn(self: std::sync::Arc<Self>) {
        tokio::spawn(async move {
            tracing::info!("file tail source '{}': watching {} every {:?}", self.source_id, self.pattern, self.scan_interval);
            let mut interval = tokio::time::interval(self.scan_interval);
            loop {
                interval.tick().await;
                if let Err(e) = self.scan_once().await {
                    tracing::warn!("file tail source '{}': scan failed: {e}", self.source_id);
                }
            }
        });
    }

    async fn scan_once(&self) -> anyhow::Result<()> {
        let paths: Vec<PathBuf> = glob::glob(&self.pattern)?.filter_map(Result::ok).collect();
        for path in paths {
            if let Err(e) = self.tail_one(&path).await {
                tracing::warn!("file tail source '{}': {} failed: {e}", self.source_id, path.display());
            }
        }
        self.persist_offsets();
        Ok(())
    }

    async fn tail_one(&self, path: &Path) -> anyhow::Result<()> {
        let metadata = std::fs::metadata(path)?;
        let current_size = metadata.len();
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let key = path.to_string_lossy().to_string();
        let previous_size = {
            let offsets = self.offsets.lock().unwrap();
            offsets.get(&key).map(|o| o.size).unwrap_or(0)
        };

        // File was truncated or rotated out from under us: start from scratch.
        let start = if current_size < previous_size { 0 } else { previous_size };
        if current_size == start {
            return Ok(());
        }

        let mut file = std::fs::File::open(path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;

        for record in join_continuation_lines(&buf) {
            let event = parse_record(&record, &self.source_id, self.format);
            self.sink.enqueue(event).await;
        }

        self.offsets.lock().unwrap().insert(key, FileOffset { size: current_size, last_modified });
        Ok(())
    }

    fn persist_offsets(&self) {
        if let Some(parent) = self.meta_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let offsets = self.offsets.lock().unwrap();
        if let Ok(contents) = serde_json::to_string_pretty(&*offsets) {
            let _ = std::fs::write(&self.meta_path, contents);
        }
    }
}

fn load_offsets(meta_path: &Path) -> HashMap<String, FileOffset> {
    std::fs::read_to_string(meta_path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

/// Groups raw lines into records: a line starting with whitespace continues
/// the previous record (stack trace / multi-line log entry convention).
fn join_continuation_lines(text: &str) -> Vec<String> {
    let mut records: Vec<String> = Vec::new();
    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = records.last_mut() {
                last.push('\n');
                last.push_str(line);
                continue;
            }
        }
        if !line.is_empty() {
            records.push(line.to_string());
        }
    }
    records
}

static NGINX_COMMON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?P<host>\S+) \S+ \S+ \[(?P<time>[^\]]+)\] "(?P<request>[^"]*)" (?P<status>\d{3}) (?P<bytes>\S+)"#).unwrap()
});

static NGINX_COMBINED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?P<host>\S+) \S+ \S+ \[(?P<time>[^\]]+)\] "(?P<request>[^"]*)" (?P<status>\d{3}) (?P<bytes>\S+) "(?P<referer>[^"]*)" "(?P<agent>[^"]*)""#,
    )
    .unwrap()
});

fn parse_record(record: &str, source_id: &str, format: LogFormat) -> LogEvent {
    match format {
        LogFormat::Plain => LogEvent::new(source_id, record),
        LogFormat::NginxCommon => parse_with(&NGINX_COMMON_RE, record, source_id),
        LogFormat::NginxCombined | LogFormat::Apache => parse_with(&NGINX_COMBINED_RE, record, source_id),
    }
}

fn parse_with(re: &Regex, record: &str, source_id: &str) -> LogEvent {
    let mut event = LogEvent::new(source_id, record);
    let Some(caps) = re.captures(record) else {
        return event;
    };
    if let Some(host) = caps.name("host") {
        event.metadata.insert("host".to_string(), host.as_str().to_string());
    }
    if let Some(status) = caps.name("status") {
        event.metadata.insert("status".to_string(), status.as_str().to_string());
        event.severity = if status.as_str().starts_with('5') {
            "ERROR".to_string()
        } else if status.as_str().starts_with('4') {
            "WARN".to_string()
        } else {
            "INFO".to_string()
        };
    }
    if let Some(request) = caps.name("request") {
        event.metadata.insert("request".to_string(), request.as_str().to_string());
        event.message = request.as_str().to_string();
    }
    if let Some(bytes) = caps.name("bytes") {
        event.metadata.insert("bytes".to_string(), bytes.as_str().to_string());
    }
    if let Some(referer) = caps.name("referer") {
        event.metadata.insert("referer".to_string(), referer.as_str().to_string());
    }
    if let Some(agent) = caps.name("agent") {
        event.metadata.insert("userAgent".to_string(), agent.as_str().to_string());
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuation_lines_join_into_one_record() {
        let text = "2026-01-01 ERROR boom\n  at foo()\n  at bar()\n2026-01-01 INFO next line";
        let records = join_continuation_lines(text);
        assert_eq!(records.len(), 2);
        assert!(records[0].contains("at foo()"));
        assert!(records[0].contains("at bar()"));
    }

    #[test]
    fn nginx_common_populates_status_and_request() {
        let record = r#"127.0.0.1 - - [10/Oct/2026:13:55:36 +0000] "GET /index.html HTTP/1.1" 404 1024"#;
        let event = parse_record(record, "web", LogFormat::NginxCommon);
        assert_eq!(event.metadata.get("status").map(String::as_str), Some("404"));
        assert_eq!(event.severity, "WARN");
        assert_eq!(event.message, "GET /index.html HTTP/1.1");
    }

    #[test]
    fn nginx_combined_captures_referer_and_agent() {
        let record = r#"127.0.0.1 - - [10/Oct/2026:13:55:36 +0000] "GET / HTTP/1.1" 200 512 "http://ref" "UA/1.0""#;
        let event = parse_record(record, "web", LogFormat::NginxCombined);
        assert_eq!(event.metadata.get("referer").map(String::as_str), Some("http://ref"));
        assert_eq!(event.metadata.get("userAgent").map(String::as_str), Some("UA/1.0"));
    }
}
