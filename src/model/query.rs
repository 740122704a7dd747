use serde::{Deserialize, Serialize};

/// A leaf of the compiled index predicate (§3 CompiledQuery).
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateLeaf {
    Term { field: String, value: String },
    Phrase { field: String, value: String },
    Range { field: String, lo: Option<String>, hi: Option<String> },
    Wildcard { field: String, pattern: String },
    Regex { field: String, pattern: String },
}

/// Boolean tree of predicate leaves, compiled from the search expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Leaf(PredicateLeaf),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// Always matches — an empty search expression.
    MatchAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub fields: Vec<(String, SortDirection)>,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            fields: vec![("recordTime".to_string(), SortDirection::Desc)],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    DistinctCount,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsAgg {
    pub func: StatsFn,
    pub field: Option<String>,
    pub output_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Stats { aggs: Vec<StatsAgg>, by: Vec<String> },
    Where { expr: String },
    Eval { field: String, expr: String },
    Sort { fields: Vec<(String, SortDirection)> },
    Head { n: usize },
    Rename { from: String, to: String },
}

/// Output of the query compiler (C6): an index predicate plus an absolute
/// time range plus an ordered pipeline of post-processing commands.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub predicate: Predicate,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: chrono::DateTime<chrono::Utc>,
    pub pipeline: Vec<Command>,
    pub limit: usize,
    pub sort: SortSpec,
}

impl CompiledQuery {
    /// Canonical fingerprint string used as the search-cache key (C7 step 1, C8).
    pub fn fingerprint(&self) -> String {
        format!(
            "{:?}|{}|{}|{:?}|{}|{:?}",
            self.predicate,
            self.start_time.timestamp_millis(),
            self.end_time.timestamp_millis(),
            self.pipeline,
            self.limit,
            self.sort
        )
    }

    /// Whether any command after the initial filter requires full
    /// materialization of all matching rows before it can run.
    pub fn needs_full_materialization(&self) -> bool {
        self.pipeline
            .iter()
            .any(|c| matches!(c, Command::Stats { .. } | Command::Sort { .. }))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub enum SyncStream {
    LogEvents,
    AlarmEvents,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_equal_queries() {
        let now = chrono::Utc::now();
        let q = CompiledQuery {
            predicate: Predicate::MatchAll,
            start_time: now,
            end_time: now,
            pipeline: vec![],
            limit: 100,
            sort: SortSpec::default(),
        };
        let q2 = q.clone();
        assert_eq!(q.fingerprint(), q2.fingerprint());
    }

    #[test]
    fn stats_or_sort_requires_full_materialization() {
        let now = chrono::Utc::now();
        let mut q = CompiledQuery {
            predicate: Predicate::MatchAll,
            start_time: now,
            end_time: now,
            pipeline: vec![Command::Head { n: 10 }],
            limit: 100,
            sort: SortSpec::default(),
        };
        assert!(!q.needs_full_materialization());
        q.pipeline.push(Command::Stats { aggs: vec![], by: vec![] });
        assert!(q.needs_full_materialization());
    }
}
