use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::GrepwiseError;
use crate::model::alarm::Alarm;
use crate::AppState;

pub async fn list_alarms(State(state): State<AppState>) -> Result<impl IntoResponse, GrepwiseError> {
    let alarms: Vec<Alarm> = state.config_store.alarms().values().cloned().collect();
    Ok(Json(alarms))
}

pub async fn get_alarm(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, GrepwiseError> {
    let alarm = state.config_store.get_alarm(id).ok_or_else(|| GrepwiseError::NotFound(id.to_string()))?;
    Ok(Json(alarm))
}

#[derive(Debug, Deserialize)]
pub struct CreateAlarmRequest {
    #[serde(flatten)]
    pub alarm: AlarmPayload,
}

/// Mirrors `Alarm`, minus `id`, so creation always mints a fresh one (the
/// teacher's `create_alert` does the same for `AlertRule`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmPayload {
    pub name: String,
    pub query: String,
    pub condition: crate::model::alarm::Condition,
    pub threshold: i64,
    pub time_window_minutes: u32,
    #[serde(default = "crate::model::default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub notification_channels: Vec<crate::model::alarm::NotificationChannel>,
    pub throttle_window_minutes: u32,
    pub max_notifications_per_window: u32,
    #[serde(default)]
    pub grouping_key: Option<String>,
    pub grouping_window_minutes: u32,
}

impl AlarmPayload {
    fn into_alarm(self, id: Uuid) -> Alarm {
        Alarm {
            id,
            name: self.name,
            query: self.query,
            condition: self.condition,
            threshold: self.threshold,
            time_window_minutes: self.time_window_minutes,
            enabled: self.enabled,
            notification_channels: self.notification_channels,
            throttle_window_minutes: self.throttle_window_minutes,
            max_notifications_per_window: self.max_notifications_per_window,
            grouping_key: self.grouping_key,
            grouping_window_minutes: self.grouping_window_minutes,
        }
    }
}

pub async fn create_alarm(State(state): State<AppState>, Json(req): Json<CreateAlarmRequest>) -> Result<impl IntoResponse, GrepwiseError> {
    let alarm = req.alarm.into_alarm(Uuid::new_v4());
    alarm.validate().map_err(|e| GrepwiseError::Validation(e.to_string()))?;
    let id = alarm.id;
    state.config_store.put_alarm(alarm).map_err(|e| GrepwiseError::FatalStorage(e.to_string()))?;
    let created = state.config_store.get_alarm(id).ok_or_else(|| GrepwiseError::FatalStorage("alarm vanished after insert".into()))?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_alarm(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateAlarmRequest>,
) -> Result<impl IntoResponse, GrepwiseError> {
    state.config_store.get_alarm(id).ok_or_else(|| GrepwiseError::NotFound(id.to_string()))?;
    let alarm = req.alarm.into_alarm(id);
    alarm.validate().map_err(|e| GrepwiseError::Validation(e.to_string()))?;
    state.config_store.put_alarm(alarm).map_err(|e| GrepwiseError::FatalStorage(e.to_string()))?;
    let updated = state.config_store.get_alarm(id).ok_or_else(|| GrepwiseError::FatalStorage("alarm vanished after update".into()))?;
    Ok(Json(updated))
}

pub async fn delete_alarm(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, GrepwiseError> {
    state
        .config_store
        .delete_alarm(id)
        .map_err(|e| GrepwiseError::NotFound(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}
