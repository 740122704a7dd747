use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub name: String,
    pub max_age_days: u32,
    #[serde(default = "super::default_true")]
    pub enabled: bool,
    /// Empty = all sources.
    #[serde(default)]
    pub source_filter: Option<String>,
}

impl RetentionPolicy {
    pub fn threshold(&self, now: chrono::DateTime<chrono::Utc>) -> chrono::DateTime<chrono::Utc> {
        now - chrono::Duration::days(self.max_age_days as i64)
    }

    pub fn matches_source(&self, source: &str) -> bool {
        match &self.source_filter {
            None => true,
            Some(f) if f.is_empty() => true,
            Some(f) => f == source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_now_minus_max_age() {
        let p = RetentionPolicy {
            name: "p".into(),
            max_age_days: 7,
            enabled: true,
            source_filter: None,
        };
        let now = chrono::Utc::now();
        assert_eq!(p.threshold(now), now - chrono::Duration::days(7));
    }

    #[test]
    fn empty_source_filter_matches_everything() {
        let p = RetentionPolicy {
            name: "p".into(),
            max_age_days: 1,
            enabled: true,
            source_filter: Some(String::new()),
        };
        assert!(p.matches_source("anything"));
    }
}
