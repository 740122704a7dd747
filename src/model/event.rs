use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The atomic unit flowing through the pipeline: source → buffer → extractor → index.
///
/// Exclusively owned by the ingestion pipeline until handed to the index store;
/// once indexed it is immutable and owned solely by the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEvent {
    pub id: Uuid,
    /// Wall-clock time the event was accepted into the buffer.
    pub ingest_time: chrono::DateTime<chrono::Utc>,
    /// Timestamp parsed out of the payload, if the source could extract one.
    pub record_time: Option<chrono::DateTime<chrono::Utc>>,
    pub severity: String,
    pub source: String,
    pub message: String,
    pub raw_content: String,
    pub metadata: BTreeMap<String, String>,
}

impl LogEvent {
    pub fn new(source: impl Into<String>, raw_content: impl Into<String>) -> Self {
        let raw_content = raw_content.into();
        Self {
            id: Uuid::new_v4(),
            ingest_time: chrono::Utc::now(),
            record_time: None,
            severity: "INFO".to_string(),
            source: source.into(),
            message: raw_content.clone(),
            raw_content,
            metadata: BTreeMap::new(),
        }
    }

    /// `max(ingestTime, recordTime)` as used by retention threshold comparisons.
    pub fn effective_time(&self) -> chrono::DateTime<chrono::Utc> {
        match self.record_time {
            Some(rt) if rt > self.ingest_time => rt,
            _ => self.ingest_time,
        }
    }

    /// The timestamp used to bucket this event into a partition: `recordTime ?? ingestTime`.
    pub fn partition_time(&self) -> chrono::DateTime<chrono::Utc> {
        self.record_time.unwrap_or(self.ingest_time)
    }

    /// Sort key used by search results: `recordTime` desc, falling back to `ingestTime`,
    /// tie-broken by `id` lexicographically (see §4.1, §4.2).
    pub fn sort_key(&self) -> (chrono::DateTime<chrono::Utc>, String) {
        (self.partition_time(), self.id.to_string())
    }

    pub fn get_field(&self, name: &str) -> Option<&str> {
        match name {
            "id" => None,
            "message" => Some(self.message.as_str()),
            "rawContent" | "raw_content" => Some(self.raw_content.as_str()),
            "level" | "severity" => Some(self.severity.as_str()),
            "source" => Some(self.source.as_str()),
            other => self.metadata.get(other).map(|s| s.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_time_prefers_later_of_ingest_and_record() {
        let mut e = LogEvent::new("s", "x");
        e.ingest_time = chrono::Utc::now();
        e.record_time = Some(e.ingest_time - chrono::Duration::hours(1));
        assert_eq!(e.effective_time(), e.ingest_time);

        e.record_time = Some(e.ingest_time + chrono::Duration::hours(1));
        assert_eq!(e.effective_time(), e.record_time.unwrap());
    }

    #[test]
    fn partition_time_falls_back_to_ingest() {
        let e = LogEvent::new("s", "x");
        assert_eq!(e.partition_time(), e.ingest_time);
    }
}
