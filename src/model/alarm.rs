use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "<")]
    Lt,
}

impl Condition {
    pub fn evaluate(&self, value: i64, threshold: i64) -> bool {
        match self {
            Condition::Gt => value > threshold,
            Condition::Gte => value >= threshold,
            Condition::Eq => value == threshold,
            Condition::Lte => value <= threshold,
            Condition::Lt => value < threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum NotificationChannel {
    Email { dest: String },
    Slack { webhook: String },
    Webhook { url: String },
    Pagerduty { routing_key: String },
    Opsgenie { api_key: String },
}

impl NotificationChannel {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationChannel::Email { .. } => "email",
            NotificationChannel::Slack { .. } => "slack",
            NotificationChannel::Webhook { .. } => "webhook",
            NotificationChannel::Pagerduty { .. } => "pagerduty",
            NotificationChannel::Opsgenie { .. } => "opsgenie",
        }
    }
}

/// A user-defined alerting rule (§3 Alarm).
///
/// Invariant: `throttle_window_minutes`, `grouping_window_minutes` and
/// `time_window_minutes` are all >= 1; enforced in `Alarm::validate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    pub id: Uuid,
    pub name: String,
    pub query: String,
    pub condition: Condition,
    pub threshold: i64,
    pub time_window_minutes: u32,
    #[serde(default = "super::default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub notification_channels: Vec<NotificationChannel>,
    pub throttle_window_minutes: u32,
    pub max_notifications_per_window: u32,
    #[serde(default)]
    pub grouping_key: Option<String>,
    pub grouping_window_minutes: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum AlarmValidationError {
    #[error("alarm {name:?}: {field} must be >= 1")]
    WindowTooSmall { name: String, field: &'static str },
}

impl Alarm {
    pub fn validate(&self) -> Result<(), AlarmValidationError> {
        if self.time_window_minutes < 1 {
            return Err(AlarmValidationError::WindowTooSmall {
                name: self.name.clone(),
                field: "timeWindowMinutes",
            });
        }
        if self.throttle_window_minutes < 1 {
            return Err(AlarmValidationError::WindowTooSmall {
                name: self.name.clone(),
                field: "throttleWindowMinutes",
            });
        }
        if self.grouping_window_minutes < 1 {
            return Err(AlarmValidationError::WindowTooSmall {
                name: self.name.clone(),
                field: "groupingWindowMinutes",
            });
        }
        Ok(())
    }

    pub fn effective_grouping_key(&self) -> String {
        self.grouping_key
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmEventStatus {
    Triggered,
    Acknowledged,
    Resolved,
}

impl AlarmEventStatus {
    /// Operator-driven transitions only (§4.9, §9 open question): the scheduler
    /// never auto-transitions a firing past TRIGGERED.
    pub fn can_transition_to(&self, next: AlarmEventStatus) -> bool {
        matches!(
            (self, next),
            (AlarmEventStatus::Triggered, AlarmEventStatus::Acknowledged)
                | (AlarmEventStatus::Triggered, AlarmEventStatus::Resolved)
                | (AlarmEventStatus::Acknowledged, AlarmEventStatus::Resolved)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub id: Uuid,
    pub alarm_id: Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub status: AlarmEventStatus,
    pub match_count: u64,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<chrono::DateTime<chrono::Utc>>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl AlarmEvent {
    pub fn triggered(alarm_id: Uuid, match_count: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            alarm_id,
            timestamp: chrono::Utc::now(),
            status: AlarmEventStatus::Triggered,
            match_count,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_by: None,
            resolved_at: None,
        }
    }

    pub fn transition(&mut self, next: AlarmEventStatus, actor: String) -> Result<(), &'static str> {
        if !self.status.can_transition_to(next) {
            return Err("illegal alarm event state transition");
        }
        match next {
            AlarmEventStatus::Acknowledged => {
                self.acknowledged_by = Some(actor);
                self.acknowledged_at = Some(chrono::Utc::now());
            }
            AlarmEventStatus::Resolved => {
                self.resolved_by = Some(actor);
                self.resolved_at = Some(chrono::Utc::now());
            }
            AlarmEventStatus::Triggered => {}
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_table() {
        assert!(Condition::Gt.evaluate(5, 4));
        assert!(!Condition::Gt.evaluate(4, 4));
        assert!(Condition::Gte.evaluate(4, 4));
        assert!(Condition::Eq.evaluate(4, 4));
        assert!(Condition::Lte.evaluate(4, 4));
        assert!(Condition::Lt.evaluate(3, 4));
    }

    #[test]
    fn state_machine_has_no_back_transitions() {
        assert!(AlarmEventStatus::Triggered.can_transition_to(AlarmEventStatus::Acknowledged));
        assert!(AlarmEventStatus::Acknowledged.can_transition_to(AlarmEventStatus::Resolved));
        assert!(!AlarmEventStatus::Resolved.can_transition_to(AlarmEventStatus::Triggered));
        assert!(!AlarmEventStatus::Acknowledged.can_transition_to(AlarmEventStatus::Triggered));
    }

    #[test]
    fn transition_rejects_illegal_moves() {
        let mut ev = AlarmEvent::triggered(Uuid::new_v4(), 3);
        ev.transition(AlarmEventStatus::Resolved, "alice".into()).unwrap();
        assert!(ev.transition(AlarmEventStatus::Triggered, "alice".into()).is_err());
    }

    #[test]
    fn validate_rejects_sub_minute_windows() {
        let mut a = sample_alarm();
        a.throttle_window_minutes = 0;
        assert!(a.validate().is_err());
    }

    fn sample_alarm() -> Alarm {
        Alarm {
            id: Uuid::new_v4(),
            name: "n".into(),
            query: "ERROR".into(),
            condition: Condition::Gt,
            threshold: 0,
            time_window_minutes: 1,
            enabled: true,
            notification_channels: vec![],
            throttle_window_minutes: 5,
            max_notifications_per_window: 1,
            grouping_key: None,
            grouping_window_minutes: 5,
        }
    }
}
