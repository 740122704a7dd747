//! C3 — pure field extraction: `(LogEvent, [enabled FieldConfiguration]) -> LogEvent`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::model::event::LogEvent;
use crate::model::field::{CompiledFieldConfigurations, FieldType};

/// Per-FC error counters, keyed by configuration name. Extraction errors are
/// non-fatal (§4.3): the event still flows, the counter just increments.
#[derive(Default)]
pub struct ExtractionErrorCounters {
    counters: dashmap::DashMap<String, AtomicU64>,
}

impl ExtractionErrorCounters {
    fn record(&self, fc_name: &str) {
        self.counters
            .entry(fc_name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, fc_name: &str) -> u64 {
        self.counters
            .get(fc_name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

pub struct FieldExtractor {
    pub errors: Arc<ExtractionErrorCounters>,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self {
            errors: Arc::new(ExtractionErrorCounters::default()),
        }
    }
}

impl FieldExtractor {
    pub fn extract(&self, mut event: LogEvent, configs: &CompiledFieldConfigurations) -> LogEvent {
        for (fc, pattern) in configs.enabled() {
            let source_text = match fc.source_field.as_str() {
                "message" => event.message.as_str(),
                other => event
                    .metadata
                    .get(other)
                    .map(|s| s.as_str())
                    .unwrap_or(event.message.as_str()),
            };

            let Some(captured) = pattern.captures(source_text) else {
                continue;
            };
            let raw_value = captured
                .get(1)
                .or_else(|| captured.get(0))
                .map(|m| m.as_str().to_string());
            let Some(raw_value) = raw_value else {
                continue;
            };

            match coerce(&raw_value, fc.field_type) {
                Ok(coerced) => {
                    event.metadata.insert(fc.name.clone(), coerced);
                }
                Err(_) => {
                    self.errors.record(&fc.name);
                }
            }
        }
        event
    }
}

fn coerce(raw: &str, field_type: FieldType) -> Result<String, ()> {
    match field_type {
        FieldType::String => Ok(raw.to_string()),
        FieldType::Number => raw.trim().parse::<f64>().map(|n| n.to_string()).map_err(|_| ()),
        FieldType::Boolean => match raw.trim().to_lowercase().as_str() {
            "true" => Ok("true".to_string()),
            "false" => Ok("false".to_string()),
            _ => Err(()),
        },
        FieldType::Date => parse_date_to_epoch_millis(raw).map(|ms| ms.to_string()),
    }
}

fn parse_date_to_epoch_millis(raw: &str) -> Result<i64, ()> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(ndt.and_utc().timestamp_millis());
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(n);
    }
    Err(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::field::FieldConfiguration;

    fn fc(name: &str, source: &str, pattern: &str, ty: FieldType) -> FieldConfiguration {
        FieldConfiguration {
            name: name.into(),
            field_type: ty,
            source_field: source.into(),
            extraction_pattern: pattern.into(),
            stored: true,
            indexed: true,
            tokenized: false,
            enabled: true,
        }
    }

    #[test]
    fn number_field_is_coerced() {
        let configs = CompiledFieldConfigurations::compile(vec![fc(
            "status", "message", r"status=(\d+)", FieldType::Number,
        )])
        .unwrap();
        let extractor = FieldExtractor::default();
        let event = LogEvent::new("s", "request failed status=503");
        let out = extractor.extract(event, &configs);
        assert_eq!(out.metadata.get("status").unwrap(), "503");
    }

    #[test]
    fn boolean_field_is_case_insensitive() {
        let configs = CompiledFieldConfigurations::compile(vec![fc(
            "cache_hit", "message", r"hit=(\w+)", FieldType::Boolean,
        )])
        .unwrap();
        let extractor = FieldExtractor::default();
        let event = LogEvent::new("s", "lookup hit=TRUE");
        let out = extractor.extract(event, &configs);
        assert_eq!(out.metadata.get("cache_hit").unwrap(), "true");
    }

    #[test]
    fn non_matching_pattern_leaves_event_untouched_and_is_non_fatal() {
        let configs = CompiledFieldConfigurations::compile(vec![fc(
            "status", "message", r"status=(\d+)", FieldType::Number,
        )])
        .unwrap();
        let extractor = FieldExtractor::default();
        let event = LogEvent::new("s", "no status here");
        let out = extractor.extract(event, &configs);
        assert!(!out.metadata.contains_key("status"));
    }

    #[test]
    fn bad_coercion_increments_error_counter_but_event_still_flows() {
        let configs = CompiledFieldConfigurations::compile(vec![fc(
            "status", "message", r"status=(\w+)", FieldType::Number,
        )])
        .unwrap();
        let extractor = FieldExtractor::default();
        let event = LogEvent::new("s", "status=oops");
        let out = extractor.extract(event, &configs);
        assert!(!out.metadata.contains_key("status"));
        assert_eq!(extractor.errors.get("status"), 1);
    }
}
