use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum PartitionBucketType {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PartitionState {
    Active,
    Sealed,
    Archived,
}

/// `partitionKey(bucket, source)` — the routing key a partition manager uses to
/// pick (or create) the partition for an event's `recordTime ?? ingestTime` and
/// `source`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub bucket_type: PartitionBucketType,
    /// Epoch-days (DAILY), epoch-weeks (WEEKLY, ISO week start), or epoch-months
    /// (MONTHLY) since the Unix epoch — a dense, orderable bucket id.
    pub bucket_index: i64,
    pub source: Option<String>,
}

impl PartitionKey {
    pub fn for_event(
        bucket_type: PartitionBucketType,
        ts: chrono::DateTime<chrono::Utc>,
        source: Option<String>,
    ) -> Self {
        let bucket_index = match bucket_type {
            PartitionBucketType::Daily => ts.timestamp().div_euclid(86_400),
            PartitionBucketType::Weekly => ts.timestamp().div_euclid(86_400 * 7),
            PartitionBucketType::Monthly => {
                let naive = ts.naive_utc().date();
                (naive.year() as i64) * 12 + naive.month() as i64 - 1
            }
        };
        Self {
            bucket_type,
            bucket_index,
            source,
        }
    }

    pub fn bucket_bounds(&self) -> (chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>) {
        use chrono::TimeZone;
        match self.bucket_type {
            PartitionBucketType::Daily => {
                let start = chrono::Utc.timestamp_opt(self.bucket_index * 86_400, 0).unwrap();
                (start, start + chrono::Duration::days(1))
            }
            PartitionBucketType::Weekly => {
                let start = chrono::Utc
                    .timestamp_opt(self.bucket_index * 86_400 * 7, 0)
                    .unwrap();
                (start, start + chrono::Duration::weeks(1))
            }
            PartitionBucketType::Monthly => {
                let year = self.bucket_index.div_euclid(12) as i32;
                let month = (self.bucket_index.rem_euclid(12) + 1) as u32;
                let start = chrono::Utc
                    .with_ymd_and_hms(year, month, 1, 0, 0, 0)
                    .unwrap();
                let (next_year, next_month) = if month == 12 {
                    (year + 1, 1)
                } else {
                    (year, month + 1)
                };
                let end = chrono::Utc
                    .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
                    .unwrap();
                (start, end)
            }
        }
    }

    /// On-disk directory name: `<bucket>[-<source>]`.
    pub fn dir_name(&self) -> String {
        match &self.source {
            Some(s) => format!("{}-{}", self.bucket_index, s),
            None => self.bucket_index.to_string(),
        }
    }
}

use chrono::Datelike;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionMeta {
    pub key: PartitionKey,
    pub start_ts: chrono::DateTime<chrono::Utc>,
    pub end_ts: chrono::DateTime<chrono::Utc>,
    pub state: PartitionState,
    pub directory: std::path::PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_bucket_is_stable_within_a_day() {
        use chrono::TimeZone;
        let a = chrono::Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 1).unwrap();
        let b = chrono::Utc.with_ymd_and_hms(2026, 7, 28, 23, 59, 59).unwrap();
        let ka = PartitionKey::for_event(PartitionBucketType::Daily, a, None);
        let kb = PartitionKey::for_event(PartitionBucketType::Daily, b, None);
        assert_eq!(ka, kb);
    }

    #[test]
    fn daily_bucket_differs_across_midnight() {
        use chrono::TimeZone;
        let a = chrono::Utc.with_ymd_and_hms(2026, 7, 28, 23, 59, 59).unwrap();
        let b = chrono::Utc.with_ymd_and_hms(2026, 7, 29, 0, 0, 1).unwrap();
        let ka = PartitionKey::for_event(PartitionBucketType::Daily, a, None);
        let kb = PartitionKey::for_event(PartitionBucketType::Daily, b, None);
        assert_ne!(ka, kb);
        assert_eq!(kb.bucket_index, ka.bucket_index + 1);
    }

    #[test]
    fn monthly_bucket_bounds_span_calendar_month() {
        use chrono::TimeZone;
        let ts = chrono::Utc.with_ymd_and_hms(2026, 2, 15, 0, 0, 0).unwrap();
        let key = PartitionKey::for_event(PartitionBucketType::Monthly, ts, None);
        let (start, end) = key.bucket_bounds();
        assert_eq!(start, chrono::Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(end, chrono::Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
    }
}
