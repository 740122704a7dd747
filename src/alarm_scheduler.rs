//! C9 — periodic alarm evaluation and notification dispatch. Grounded on the
//! teacher's `alert_engine::spawn_alert_engine`/`eval_alerts` shape: a single
//! background task on a fixed tick, evaluating all due rules and firing
//! notifications through the same channel-type dispatch.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config_store::ConfigStore;
use crate::event_bus::Topic;
use crate::executor::SearchExecutor;
use crate::model::alarm::{Alarm, AlarmEvent, NotificationChannel};
use crate::query_lang::pipeline::ResultRow;
use crate::query_lang::{compile, QueryCompileError};

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub from: String,
}

fn build_smtp_transport(cfg: &SmtpConfig) -> Option<AsyncSmtpTransport<Tokio1Executor>> {
    let host = cfg.host.as_deref()?;
    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host).ok()?;
    builder = builder.port(cfg.port);
    if let (Some(user), Some(pass)) = (&cfg.user, &cfg.pass) {
        builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
    }
    Some(builder.build())
}

struct ThrottleState {
    /// Timestamps of notifications sent within the current throttle window,
    /// keyed by the alarm's effective grouping key.
    sent_at: DashMap<String, VecDeque<DateTime<Utc>>>,
}

impl ThrottleState {
    fn new() -> Self {
        Self { sent_at: DashMap::new() }
    }

    /// Returns true if a notification may be sent now for `key`, recording it
    /// if so. Sliding-window throttle per §4.9.
    fn try_admit(&self, key: &str, window: Duration, max_per_window: u32, now: DateTime<Utc>) -> bool {
        let mut entry = self.sent_at.entry(key.to_string()).or_default();
        let cutoff = now - chrono::Duration::from_std(window).unwrap_or_default();
        entry.retain(|t| *t >= cutoff);
        if entry.len() as u32 >= max_per_window {
            return false;
        }
        entry.push_back(now);
        true
    }
}

pub struct AlarmScheduler {
    config: Arc<ConfigStore>,
    executor: Arc<SearchExecutor>,
    alarm_events: Arc<Topic<AlarmEvent>>,
    http_client: reqwest::Client,
    smtp_config: SmtpConfig,
    throttle: ThrottleState,
}

impl AlarmScheduler {
    pub fn new(config: Arc<ConfigStore>, executor: Arc<SearchExecutor>, alarm_events: Arc<Topic<AlarmEvent>>, smtp_config: SmtpConfig) -> Self {
        Self {
            config,
            executor,
            alarm_events,
            http_client: reqwest::Client::new(),
            smtp_config,
            throttle: ThrottleState::new(),
        }
    }

    pub fn spawn(self: Arc<Self>) {
        tokio::spawn(async move {
            let smtp_transport = build_smtp_transport(&self.smtp_config);
            if smtp_transport.is_some() {
                tracing::info!("alarm scheduler: SMTP configured for email notifications");
            }
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                self.evaluate_all(&smtp_transport).await;
            }
        });
    }

    async fn evaluate_all(&self, smtp_transport: &Option<AsyncSmtpTransport<Tokio1Executor>>) {
        let alarms = self.config.alarms();
        for alarm in alarms.values().filter(|a| a.enabled) {
            if let Err(e) = self.evaluate_one(alarm, smtp_transport).await {
                tracing::warn!("alarm {} ({}): evaluation failed: {e}", alarm.name, alarm.id);
            }
        }
    }

    async fn evaluate_one(&self, alarm: &Alarm, smtp_transport: &Option<AsyncSmtpTransport<Tokio1Executor>>) -> anyhow::Result<()> {
        let now = Utc::now();
        let window = chrono::Duration::minutes(alarm.time_window_minutes as i64);
        let known = std::collections::HashSet::new();
        let compiled = compile(&alarm.query, now - window, now, 10_000, &known)
            .map_err(|e: QueryCompileError| anyhow::anyhow!("query compile error: {e}"))?;

        let rows = self.executor.search(compiled, Duration::from_secs(30)).await.map_err(|e| anyhow::anyhow!("{e}"))?;
        let value = extract_count(&rows);

        let triggered = alarm.condition.evaluate(value, alarm.threshold);
        if !triggered {
            return Ok(());
        }

        let key = alarm.effective_grouping_key();
        let admitted = self.throttle.try_admit(
            &key,
            Duration::from_secs(alarm.throttle_window_minutes as u64 * 60),
            alarm.max_notifications_per_window,
            now,
        );
        if !admitted {
            tracing::debug!("alarm {} throttled (grouping key {key})", alarm.name);
            return Ok(());
        }

        let event = AlarmEvent::triggered(alarm.id, value as u64);
        self.alarm_events.publish(event).await;

        let message = format!("Alarm '{}' triggered: count={} {:?} threshold={}", alarm.name, value, alarm.condition, alarm.threshold);
        for channel in &alarm.notification_channels {
            self.dispatch(channel, &alarm.name, &message, smtp_transport).await;
        }
        tracing::info!("alarm '{}' triggered (count={value})", alarm.name);
        Ok(())
    }

    async fn dispatch(&self, channel: &NotificationChannel, alarm_name: &str, message: &str, smtp_transport: &Option<AsyncSmtpTransport<Tokio1Executor>>) {
        const MAX_ATTEMPTS: u32 = 3;
        for attempt in 1..=MAX_ATTEMPTS {
            let result = self.dispatch_once(channel, alarm_name, message, smtp_transport).await;
            match result {
                Ok(()) => return,
                Err(e) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!("alarm '{alarm_name}': notification attempt {attempt} failed: {e}, retrying");
                    tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt - 1))).await;
                }
                Err(e) => {
                    tracing::warn!("alarm '{alarm_name}': notification failed after {MAX_ATTEMPTS} attempts: {e}");
                }
            }
        }
    }

    async fn dispatch_once(&self, channel: &NotificationChannel, alarm_name: &str, message: &str, smtp_transport: &Option<AsyncSmtpTransport<Tokio1Executor>>) -> anyhow::Result<()> {
        match channel {
            NotificationChannel::Email { dest } => {
                let transport = smtp_transport.as_ref().ok_or_else(|| anyhow::anyhow!("SMTP not configured"))?;
                let email = Message::builder()
                    .from(self.smtp_config.from.parse()?)
                    .to(dest.parse()?)
                    .subject(format!("[GrepWise] {alarm_name} triggered"))
                    .header(ContentType::TEXT_PLAIN)
                    .body(message.to_string())?;
                transport.send(email).await?;
                Ok(())
            }
            NotificationChannel::Slack { webhook } => {
                self.http_client.post(webhook).json(&serde_json::json!({ "text": message })).send().await?.error_for_status()?;
                Ok(())
            }
            NotificationChannel::Webhook { url } => {
                self.http_client
                    .post(url)
                    .json(&serde_json::json!({ "alarm": alarm_name, "message": message }))
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(())
            }
            NotificationChannel::Pagerduty { routing_key } => {
                self.http_client
                    .post("https://events.pagerduty.com/v2/enqueue")
                    .json(&serde_json::json!({
                        "routing_key": routing_key,
                        "event_action": "trigger",
                        "payload": { "summary": message, "source": "grepwise", "severity": "critical" },
                    }))
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(())
            }
            NotificationChannel::Opsgenie { api_key } => {
                self.http_client
                    .post("https://api.opsgenie.com/v2/alerts")
                    .header("Authorization", format!("GenieKey {api_key}"))
                    .json(&serde_json::json!({ "message": alarm_name, "description": message }))
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(())
            }
        }
    }
}

/// Reads the `count` output column of a bare `stats count` alarm query,
/// falling back to the number of matched rows for a plain search expression
/// with no aggregation pipeline.
fn extract_count(rows: &[ResultRow]) -> i64 {
    if let Some(first) = rows.first() {
        if let Some(count) = first.get("count").and_then(|v| v.as_i64()) {
            return count;
        }
    }
    rows.len() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_count_prefers_stats_count_column() {
        let rows = vec![ResultRow::from_iter([("count".to_string(), json!(42))])];
        assert_eq!(extract_count(&rows), 42);
    }

    #[test]
    fn extract_count_falls_back_to_row_count() {
        let rows = vec![ResultRow::new(), ResultRow::new(), ResultRow::new()];
        assert_eq!(extract_count(&rows), 3);
    }

    #[test]
    fn throttle_admits_up_to_max_then_blocks() {
        let throttle = ThrottleState::new();
        let now = Utc::now();
        assert!(throttle.try_admit("k", Duration::from_secs(60), 2, now));
        assert!(throttle.try_admit("k", Duration::from_secs(60), 2, now));
        assert!(!throttle.try_admit("k", Duration::from_secs(60), 2, now));
    }
}
