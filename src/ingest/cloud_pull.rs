//! Cloud log source: a CloudWatch-shaped HTTP-polling stub. No AWS SDK is
//! fabricated here — `CloudLogSource` is a small trait implemented against
//! plain `reqwest` JSON polling, matching spec's "CloudWatch-style" wording
//! loosely and the teacher's existing `reqwest`-based outbound calls.

use std::time::Duration;

use serde::Deserialize;

use crate::model::event::LogEvent;

use super::Sink;

#[derive(Debug, Deserialize)]
pub struct CloudLogRecord {
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub stream: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    records: Vec<CloudLogRecord>,
    next_cursor: Option<String>,
}

/// Distinguishes a rejected cursor token (the sender should reset to latest
/// and keep going) from every other failure (the sender backs off).
#[derive(Debug, thiserror::Error)]
pub enum CloudPullError {
    #[error("cursor token rejected by upstream")]
    InvalidCursor,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait::async_trait]
pub trait CloudLogSource: Send + Sync {
    /// Fetches records newer than `cursor`, returning the next cursor to
    /// resume from on the following poll.
    async fn poll(&self, cursor: Option<&str>) -> Result<(Vec<CloudLogRecord>, Option<String>), CloudPullError>;
}

/// Polls a single HTTP endpoint that returns `{records: [...], next_cursor}`,
/// the shape a thin CloudWatch Logs proxy would expose. A `400 Bad Request`
/// is treated as an expired/invalid cursor token per §4.5.
pub struct HttpCloudLogSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCloudLogSource {
    pub fn new(endpoint: String) -> Self {
        Self { client: reqwest::Client::new(), endpoint }
    }
}

#[async_trait::async_trait]
impl CloudLogSource for HttpCloudLogSource {
    async fn poll(&self, cursor: Option<&str>) -> Result<(Vec<CloudLogRecord>, Option<String>), CloudPullError> {
        let mut request = self.client.get(&self.endpoint);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        let response = request.send().await.map_err(anyhow::Error::from)?;
        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            return Err(CloudPullError::InvalidCursor);
        }
        let response = response.error_for_status().map_err(anyhow::Error::from)?;
        let parsed: PollResponse = response.json().await.map_err(anyhow::Error::from)?;
        Ok((parsed.records, parsed.next_cursor))
    }
}

pub struct CloudPullSource {
    source_id: String,
    poll_interval: Duration,
    source: Box<dyn CloudLogSource>,
    sink: Sink,
}

impl CloudPullSource {
    pub fn new(source_id: String, poll_interval: Duration, source: Box<dyn CloudLogSource>, sink: Sink) -> Self {
        Self { source_id, poll_interval, source, sink }
    }

    pub async fn run(mut self) {
        tracing::info!("cloud pull source '{}': starting, poll interval {:?}", self.source_id, self.poll_interval);
        let mut cursor: Option<String> = None;
        let mut backoff = self.poll_interval;
        const MAX_BACKOFF: Duration = Duration::from_secs(60);
        loop {
            tokio::time::sleep(backoff).await;
            match self.source.poll(cursor.as_deref()).await {
                Ok((records, next_cursor)) => {
                    for record in records {
                        let mut event = LogEvent::new(record.stream.unwrap_or_else(|| self.source_id.clone()), record.message.clone());
                        event.message = record.message;
                        event.record_time = Some(record.timestamp);
                        self.sink.enqueue(event).await;
                    }
                    if next_cursor.is_some() {
                        cursor = next_cursor;
                    }
                    backoff = self.poll_interval;
                }
                Err(CloudPullError::InvalidCursor) => {
                    tracing::warn!("cloud pull source '{}': cursor rejected, resetting to latest", self.source_id);
                    cursor = None;
                    backoff = self.poll_interval;
                }
                Err(e) => {
                    tracing::warn!("cloud pull source '{}': poll failed: {e}", self.source_id);
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeSource {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl CloudLogSource for FakeSource {
        async fn poll(&self, cursor: Option<&str>) -> Result<(Vec<CloudLogRecord>, Option<String>), CloudPullError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            assert!(cursor.is_none() || cursor == Some("c1"));
            Ok((
                vec![CloudLogRecord { message: "hi".into(), timestamp: chrono::Utc::now(), stream: None }],
                Some("c1".to_string()),
            ))
        }
    }

    #[tokio::test]
    async fn cursor_advances_between_polls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fake = FakeSource { calls: calls.clone() };
        let mut cursor: Option<String> = None;
        let (_, next) = fake.poll(cursor.as_deref()).await.unwrap();
        cursor = next;
        let (_, next2) = fake.poll(cursor.as_deref()).await.unwrap();
        assert_eq!(next2, Some("c1".to_string()));
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }
}
