//! Durable storage for field configurations, retention policies, and alarms
//! (§5). Each collection is persisted in its own rusqlite table (following
//! the teacher's migration-on-open pattern) and mirrored into an
//! `ArcSwap` snapshot so handlers and background workers read an immutable,
//! lock-free view that only changes on a successful write.

use std::collections::HashMap;
use std::sync::Mutex;

use arc_swap::ArcSwap;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::model::alarm::Alarm;
use crate::model::field::{CompiledFieldConfigurations, FieldConfigError, FieldConfiguration};
use crate::model::retention::RetentionPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigStoreError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("field configuration invalid: {0}")]
    FieldConfig(#[from] FieldConfigError),
    #[error("not found: {0}")]
    NotFound(String),
}

pub struct ConfigStore {
    conn: Mutex<Connection>,
    fields: ArcSwap<CompiledFieldConfigurations>,
    retention: ArcSwap<Vec<RetentionPolicy>>,
    alarms: ArcSwap<HashMap<Uuid, Alarm>>,
}

impl ConfigStore {
    pub fn open(path: &str) -> Result<Self, ConfigStoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS field_configurations (
                name       TEXT PRIMARY KEY,
                data       TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );
            CREATE TABLE IF NOT EXISTS retention_policies (
                name       TEXT PRIMARY KEY,
                data       TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );
            CREATE TABLE IF NOT EXISTS alarms (
                id         TEXT PRIMARY KEY,
                data       TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );
            ",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            fields: ArcSwap::from_pointee(CompiledFieldConfigurations { entries: vec![] }),
            retention: ArcSwap::from_pointee(Vec::new()),
            alarms: ArcSwap::from_pointee(HashMap::new()),
        };
        store.reload_fields()?;
        store.reload_retention()?;
        store.reload_alarms()?;
        Ok(store)
    }

    // ── field configurations ──

    pub fn field_configurations(&self) -> std::sync::Arc<CompiledFieldConfigurations> {
        self.fields.load_full()
    }

    pub fn put_field_configuration(&self, cfg: FieldConfiguration) -> Result<(), ConfigStoreError> {
        let data = serde_json::to_string(&cfg).expect("FieldConfiguration serializes");
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO field_configurations (name, data) VALUES (?1, ?2) \
             ON CONFLICT(name) DO UPDATE SET data = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')",
            params![cfg.name, data],
        )?;
        drop(conn);
        self.reload_fields()
    }

    pub fn delete_field_configuration(&self, name: &str) -> Result<(), ConfigStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM field_configurations WHERE name = ?1", params![name])?;
        drop(conn);
        self.reload_fields()
    }

    fn reload_fields(&self) -> Result<(), ConfigStoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM field_configurations")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);
        let configs: Vec<FieldConfiguration> = rows
            .into_iter()
            .filter_map(|s| serde_json::from_str(&s).ok())
            .collect();
        let compiled = CompiledFieldConfigurations::compile(configs)?;
        self.fields.store(std::sync::Arc::new(compiled));
        Ok(())
    }

    // ── retention policies ──

    pub fn retention_policies(&self) -> std::sync::Arc<Vec<RetentionPolicy>> {
        self.retention.load_full()
    }

    pub fn put_retention_policy(&self, policy: RetentionPolicy) -> Result<(), ConfigStoreError> {
        let data = serde_json::to_string(&policy).expect("RetentionPolicy serializes");
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO retention_policies (name, data) VALUES (?1, ?2) \
             ON CONFLICT(name) DO UPDATE SET data = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')",
            params![policy.name, data],
        )?;
        drop(conn);
        self.reload_retention()
    }

    pub fn delete_retention_policy(&self, name: &str) -> Result<(), ConfigStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM retention_policies WHERE name = ?1", params![name])?;
        drop(conn);
        self.reload_retention()
    }

    fn reload_retention(&self) -> Result<(), ConfigStoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM retention_policies")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);
        let policies: Vec<RetentionPolicy> = rows.into_iter().filter_map(|s| serde_json::from_str(&s).ok()).collect();
        self.retention.store(std::sync::Arc::new(policies));
        Ok(())
    }

    // ── alarms ──

    pub fn alarms(&self) -> std::sync::Arc<HashMap<Uuid, Alarm>> {
        self.alarms.load_full()
    }

    pub fn get_alarm(&self, id: Uuid) -> Option<Alarm> {
        self.alarms.load().get(&id).cloned()
    }

    pub fn put_alarm(&self, alarm: Alarm) -> Result<(), ConfigStoreError> {
        let data = serde_json::to_string(&alarm).expect("Alarm serializes");
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO alarms (id, data) VALUES (?1, ?2) \
             ON CONFLICT(id) DO UPDATE SET data = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')",
            params![alarm.id.to_string(), data],
        )?;
        drop(conn);
        self.reload_alarms()
    }

    pub fn delete_alarm(&self, id: Uuid) -> Result<(), ConfigStoreError> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute("DELETE FROM alarms WHERE id = ?1", params![id.to_string()])?;
        drop(conn);
        if count == 0 {
            return Err(ConfigStoreError::NotFound(id.to_string()));
        }
        self.reload_alarms()
    }

    fn reload_alarms(&self) -> Result<(), ConfigStoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM alarms")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);
        let alarms: HashMap<Uuid, Alarm> = rows
            .into_iter()
            .filter_map(|s| serde_json::from_str::<Alarm>(&s).ok())
            .map(|a| (a.id, a))
            .collect();
        self.alarms.store(std::sync::Arc::new(alarms));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::field::FieldType;

    fn scratch_path() -> String {
        std::env::temp_dir().join(format!("grepwise-config-{}.sqlite", Uuid::new_v4())).to_string_lossy().to_string()
    }

    #[test]
    fn put_then_reload_makes_field_configuration_visible() {
        let path = scratch_path();
        let store = ConfigStore::open(&path).unwrap();
        store
            .put_field_configuration(FieldConfiguration {
                name: "statusCode".into(),
                field_type: FieldType::Number,
                source_field: "message".into(),
                extraction_pattern: r"status=(\d+)".into(),
                stored: true,
                indexed: true,
                tokenized: false,
                enabled: true,
            })
            .unwrap();
        assert_eq!(store.field_configurations().entries.len(), 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn alarm_round_trips_through_storage() {
        let path = scratch_path();
        let store = ConfigStore::open(&path).unwrap();
        let alarm = Alarm {
            id: Uuid::new_v4(),
            name: "high errors".into(),
            query: "level=ERROR".into(),
            condition: crate::model::alarm::Condition::Gt,
            threshold: 10,
            time_window_minutes: 5,
            enabled: true,
            notification_channels: vec![],
            throttle_window_minutes: 15,
            max_notifications_per_window: 1,
            grouping_key: None,
            grouping_window_minutes: 5,
        };
        let id = alarm.id;
        store.put_alarm(alarm).unwrap();
        assert!(store.get_alarm(id).is_some());
        store.delete_alarm(id).unwrap();
        assert!(store.get_alarm(id).is_none());
        std::fs::remove_file(&path).ok();
    }
}
