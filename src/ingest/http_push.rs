//! HTTP push ingestion: `POST /api/logs/http-push/{sourceId}` accepts a JSON
//! array or newline-delimited JSON body, with an optional bearer token guard.

use serde::Deserialize;

use crate::model::event::LogEvent;

#[derive(Debug, Deserialize)]
pub struct PushedEvent {
    pub message: String,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl PushedEvent {
    pub fn into_log_event(self, default_source: &str) -> LogEvent {
        let mut event = LogEvent::new(self.source.unwrap_or_else(|| default_source.to_string()), self.message.clone());
        event.message = self.message;
        if let Some(level) = self.level {
            event.severity = level;
        }
        event.record_time = self.timestamp;
        event
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PushParseError {
    #[error("body is neither a JSON array nor newline-delimited JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("body is empty")]
    Empty,
}

/// Parses a push body as either a JSON array (`[{...}, {...}]`) or
/// newline-delimited JSON (one object per line).
pub fn parse_push_body(body: &str) -> Result<Vec<PushedEvent>, PushParseError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(PushParseError::Empty);
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    trimmed
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str::<PushedEvent>(l).map_err(PushParseError::from))
        .collect()
}

/// Constant-time-ish bearer check: this is an equality gate for a
/// single shared token, not a full auth scheme (auth itself is external,
/// §1/§9 Non-goals).
pub fn check_bearer(configured: Option<&str>, provided: Option<&str>) -> bool {
    match configured {
        None => true,
        Some(expected) => provided == Some(expected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_array_body() {
        let body = r#"[{"message":"a","level":"INFO"},{"message":"b"}]"#;
        let events = parse_push_body(body).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn parses_ndjson_body() {
        let body = "{\"message\":\"a\"}\n{\"message\":\"b\"}\n";
        let events = parse_push_body(body).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn empty_body_is_rejected() {
        assert!(matches!(parse_push_body("   "), Err(PushParseError::Empty)));
    }

    #[test]
    fn bearer_check_requires_match_when_configured() {
        assert!(check_bearer(None, None));
        assert!(check_bearer(Some("tok"), Some("tok")));
        assert!(!check_bearer(Some("tok"), Some("wrong")));
        assert!(!check_bearer(Some("tok"), None));
    }
}
