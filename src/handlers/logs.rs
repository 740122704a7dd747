use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::GrepwiseError;
use crate::ingest::http_push;
use crate::query_lang::compile;
use crate::AppState;

const MAX_SEARCH_RESULTS: usize = 10_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default)]
    pub time_range: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

/// Resolves the `timeRange ∈ {1h,3h,12h,24h,custom}` shorthand (§6) into an
/// absolute `[start, end]` pair.
fn resolve_time_range(params: &SearchParams) -> Result<(DateTime<Utc>, DateTime<Utc>), GrepwiseError> {
    let now = Utc::now();
    match params.time_range.as_deref() {
        Some("1h") => Ok((now - chrono::Duration::hours(1), now)),
        Some("3h") => Ok((now - chrono::Duration::hours(3), now)),
        Some("12h") => Ok((now - chrono::Duration::hours(12), now)),
        Some("24h") => Ok((now - chrono::Duration::hours(24), now)),
        Some("custom") | None => {
            let start = params.start_time.ok_or_else(|| GrepwiseError::Validation("startTime required for custom timeRange".into()))?;
            let end = params.end_time.unwrap_or(now);
            Ok((start, end))
        }
        Some(other) => Err(GrepwiseError::Validation(format!("unknown timeRange: {other}"))),
    }
}

/// Regex-mode queries are a bare pattern matched against the default fields;
/// wrapping it as a `/.../` literal reuses the query language's existing
/// regex-leaf compilation instead of a parallel code path.
fn query_string(params: &SearchParams) -> String {
    let text = params.query.clone().unwrap_or_default();
    if params.is_regex {
        format!("/{text}/")
    } else {
        text
    }
}

pub async fn search(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<impl IntoResponse, GrepwiseError> {
    let (start, end) = resolve_time_range(&params)?;
    let query_str = query_string(&params);
    let known = state.known_fields();
    let compiled = compile(&query_str, start, end, MAX_SEARCH_RESULTS, &known)?;
    let rows = state.executor.search(compiled, std::time::Duration::from_secs(20)).await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramParams {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub is_regex: bool,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[serde(default = "default_interval")]
    pub interval: String,
}

fn default_interval() -> String {
    "5m".to_string()
}

fn interval_duration(interval: &str) -> Result<chrono::Duration, GrepwiseError> {
    let d = match interval {
        "1m" => chrono::Duration::minutes(1),
        "5m" => chrono::Duration::minutes(5),
        "15m" => chrono::Duration::minutes(15),
        "30m" => chrono::Duration::minutes(30),
        "1h" => chrono::Duration::hours(1),
        "3h" => chrono::Duration::hours(3),
        "6h" => chrono::Duration::hours(6),
        "12h" => chrono::Duration::hours(12),
        "24h" => chrono::Duration::hours(24),
        other => return Err(GrepwiseError::Validation(format!("unknown histogram interval: {other}"))),
    };
    Ok(d)
}

pub async fn histogram(State(state): State<AppState>, Query(params): Query<HistogramParams>) -> Result<impl IntoResponse, GrepwiseError> {
    let bucket_width = interval_duration(&params.interval)?;
    let query_str = query_string(&SearchParams { query: params.query.clone(), is_regex: params.is_regex, time_range: None, start_time: None, end_time: None });
    let known = state.known_fields();
    let compiled = compile(&query_str, params.from, params.to, usize::MAX, &known)?;
    let events = state.partitions.search(&compiled);

    let mut buckets: BTreeMap<i64, u64> = BTreeMap::new();
    let width_ms = bucket_width.num_milliseconds().max(1);
    for event in &events {
        let ts = event.partition_time().timestamp_millis();
        let bucket = (ts / width_ms) * width_ms;
        *buckets.entry(bucket).or_insert(0) += 1;
    }

    let out: Vec<serde_json::Value> = buckets.into_iter().map(|(ts, count)| json!({ "timestamp": ts, "count": count })).collect();
    Ok(Json(out))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeAggregationParams {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub is_regex: bool,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub slots: u32,
}

pub async fn time_aggregation(State(state): State<AppState>, Query(params): Query<TimeAggregationParams>) -> Result<impl IntoResponse, GrepwiseError> {
    if params.slots == 0 {
        return Err(GrepwiseError::Validation("slots must be >= 1".into()));
    }
    let query_str = query_string(&SearchParams { query: params.query.clone(), is_regex: params.is_regex, time_range: None, start_time: None, end_time: None });
    let known = state.known_fields();
    let compiled = compile(&query_str, params.from, params.to, usize::MAX, &known)?;
    let events = state.partitions.search(&compiled);

    let span_ms = (params.to - params.from).num_milliseconds().max(1);
    let slot_ms = (span_ms / params.slots as i64).max(1);
    let from_ms = params.from.timestamp_millis();

    let mut buckets: BTreeMap<i64, u64> = BTreeMap::new();
    for event in &events {
        let ts = event.partition_time().timestamp_millis();
        let slot = from_ms + ((ts - from_ms) / slot_ms) * slot_ms;
        *buckets.entry(slot).or_insert(0) += 1;
    }

    let out: BTreeMap<String, u64> = buckets.into_iter().map(|(ts, count)| (ts.to_string(), count)).collect();
    Ok(Json(out))
}

pub async fn http_push_ingest(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, GrepwiseError> {
    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if !http_push::check_bearer(state.http_push_token.as_deref(), provided) {
        return Err(GrepwiseError::Unauthorized);
    }

    let pushed = http_push::parse_push_body(&body).map_err(|e| GrepwiseError::Validation(e.to_string()))?;
    let mut accepted = 0u64;
    for record in pushed {
        let event = record.into_log_event(&source_id);
        let outcome = state.buffer.enqueue(event).await;
        if matches!(outcome, crate::buffer::EnqueueOutcome::Accepted) {
            accepted += 1;
        }
    }
    Ok(Json(json!({ "accepted": accepted })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_mode_wraps_query_as_regex_literal() {
        let params = SearchParams { query: Some("boom".into()), is_regex: true, time_range: None, start_time: None, end_time: None };
        assert_eq!(query_string(&params), "/boom/");
    }

    #[test]
    fn plain_mode_passes_query_through() {
        let params = SearchParams { query: Some("level=ERROR".into()), is_regex: false, time_range: None, start_time: None, end_time: None };
        assert_eq!(query_string(&params), "level=ERROR");
    }
}
