use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use uuid::Uuid;

use super::tokenize;
use crate::model::event::LogEvent;
use crate::model::query::{Predicate, PredicateLeaf, SortDirection, SortSpec};

/// An immutable, point-in-time view of a partition's documents. Cheap to
/// clone (it's behind an `Arc` in `PartitionIndex`) and safe to read from
/// many threads concurrently with no coordination.
pub struct IndexSnapshot {
    docs: BTreeMap<Uuid, LogEvent>,
    message_tokens: BTreeMap<Uuid, Vec<String>>,
}

impl IndexSnapshot {
    pub(crate) fn build(docs: &BTreeMap<Uuid, LogEvent>) -> Self {
        let message_tokens = docs
            .iter()
            .map(|(id, e)| (*id, tokenize(&e.message)))
            .collect();
        Self {
            docs: docs.clone(),
            message_tokens,
        }
    }

    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    pub fn get(&self, id: &Uuid) -> Option<&LogEvent> {
        self.docs.get(id)
    }

    fn field_value(&self, event: &LogEvent, field: &str) -> Option<String> {
        match field {
            "timestamp" => Some(event.ingest_time.to_rfc3339()),
            "recordTime" => event.record_time.map(|t| t.to_rfc3339()),
            other => event.get_field(other).map(|s| s.to_string()),
        }
    }

    /// Evaluate a compiled predicate over this snapshot, returning the
    /// matching document ids. Pure function of (predicate, snapshot) — for an
    /// unchanged snapshot, repeated calls are deterministic.
    pub fn evaluate(&self, predicate: &Predicate) -> HashSet<Uuid> {
        match predicate {
            Predicate::MatchAll => self.docs.keys().copied().collect(),
            Predicate::Leaf(leaf) => self.evaluate_leaf(leaf),
            Predicate::And(children) => {
                let mut iter = children.iter().map(|c| self.evaluate(c));
                let Some(first) = iter.next() else {
                    return self.docs.keys().copied().collect();
                };
                iter.fold(first, |acc, next| acc.intersection(&next).copied().collect())
            }
            Predicate::Or(children) => {
                let mut acc = HashSet::new();
                for c in children {
                    acc.extend(self.evaluate(c));
                }
                acc
            }
            Predicate::Not(inner) => {
                let matched = self.evaluate(inner);
                self.docs.keys().filter(|id| !matched.contains(id)).copied().collect()
            }
        }
    }

    fn evaluate_leaf(&self, leaf: &PredicateLeaf) -> HashSet<Uuid> {
        match leaf {
            PredicateLeaf::Term { field, value } => self.term_match(field, value),
            PredicateLeaf::Phrase { field, value } => self.phrase_match(field, value),
            PredicateLeaf::Range { field, lo, hi } => self.range_match(field, lo.as_deref(), hi.as_deref()),
            PredicateLeaf::Wildcard { field, pattern } => self.pattern_match(field, &glob_to_regex(pattern)),
            PredicateLeaf::Regex { field, pattern } => match Regex::new(pattern) {
                Ok(re) => self.pattern_match(field, &re),
                Err(e) => {
                    tracing::warn!("search: bad regex literal {pattern:?}: {e}");
                    HashSet::new()
                }
            },
        }
    }

    fn term_match(&self, field: &str, value: &str) -> HashSet<Uuid> {
        if field == "message" {
            let needle = value.to_lowercase();
            return self
                .message_tokens
                .iter()
                .filter(|(_, tokens)| tokens.iter().any(|t| t == &needle))
                .map(|(id, _)| *id)
                .collect();
        }
        let case_sensitive = matches!(field, "source" | "id");
        self.docs
            .iter()
            .filter(|(_, e)| match self.field_value(e, field) {
                Some(v) if case_sensitive => v == value,
                Some(v) => v.eq_ignore_ascii_case(value),
                None => false,
            })
            .map(|(id, _)| *id)
            .collect()
    }

    fn phrase_match(&self, field: &str, value: &str) -> HashSet<Uuid> {
        let needle = tokenize(value);
        if needle.is_empty() {
            return HashSet::new();
        }
        if field == "message" {
            return self
                .message_tokens
                .iter()
                .filter(|(_, tokens)| contains_subsequence(tokens, &needle))
                .map(|(id, _)| *id)
                .collect();
        }
        self.docs
            .iter()
            .filter(|(_, e)| match self.field_value(e, field) {
                Some(v) => contains_subsequence(&tokenize(&v), &needle),
                None => false,
            })
            .map(|(id, _)| *id)
            .collect()
    }

    fn pattern_match(&self, field: &str, re: &Regex) -> HashSet<Uuid> {
        if field == "message" {
            return self
                .message_tokens
                .iter()
                .filter(|(id, tokens)| {
                    tokens.iter().any(|t| re.is_match(t))
                        || self
                            .docs
                            .get(*id)
                            .map(|e| re.is_match(&e.message))
                            .unwrap_or(false)
                })
                .map(|(id, _)| *id)
                .collect();
        }
        self.docs
            .iter()
            .filter(|(_, e)| match self.field_value(e, field) {
                Some(v) => re.is_match(&v),
                None => false,
            })
            .map(|(id, _)| *id)
            .collect()
    }

    fn range_match(&self, field: &str, lo: Option<&str>, hi: Option<&str>) -> HashSet<Uuid> {
        if field == "timestamp" || field == "recordTime" {
            let lo_ts = lo.and_then(parse_time);
            let hi_ts = hi.and_then(parse_time);
            return self
                .docs
                .iter()
                .filter(|(_, e)| {
                    let ts = if field == "timestamp" {
                        e.ingest_time
                    } else {
                        e.record_time.unwrap_or(e.ingest_time)
                    };
                    lo_ts.map(|l| ts >= l).unwrap_or(true) && hi_ts.map(|h| ts <= h).unwrap_or(true)
                })
                .map(|(id, _)| *id)
                .collect();
        }
        let lo_n = lo.and_then(|s| s.parse::<f64>().ok());
        let hi_n = hi.and_then(|s| s.parse::<f64>().ok());
        self.docs
            .iter()
            .filter(|(_, e)| match self.field_value(e, field).and_then(|v| v.parse::<f64>().ok()) {
                Some(n) => lo_n.map(|l| n >= l).unwrap_or(true) && hi_n.map(|h| n <= h).unwrap_or(true),
                None => false,
            })
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn search(&self, predicate: &Predicate, limit: usize, sort: &SortSpec) -> Vec<LogEvent> {
        let matches = self.evaluate(predicate);
        let mut rows: Vec<&LogEvent> = matches.iter().filter_map(|id| self.docs.get(id)).collect();
        sort_rows(&mut rows, sort);
        rows.into_iter().take(limit).cloned().collect()
    }
}

pub(crate) fn sort_rows(rows: &mut [&LogEvent], sort: &SortSpec) {
    rows.sort_by(|a, b| {
        for (field, dir) in &sort.fields {
            let ordering = compare_field(a, b, field);
            let ordering = match dir {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        // Tie-break by id lexicographically (§4.1, §4.2).
        a.id.to_string().cmp(&b.id.to_string())
    });
}

fn compare_field(a: &LogEvent, b: &LogEvent, field: &str) -> std::cmp::Ordering {
    match field {
        "recordTime" => a.partition_time().cmp(&b.partition_time()),
        "timestamp" => a.ingest_time.cmp(&b.ingest_time),
        other => a.get_field(other).cmp(&b.get_field(other)),
    }
}

fn contains_subsequence(haystack: &[String], needle: &[String]) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return needle.is_empty();
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn parse_time(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&chrono::Utc));
    }
    s.parse::<i64>()
        .ok()
        .and_then(|ms| chrono::Utc.timestamp_millis_opt(ms).single())
}

use chrono::TimeZone;

const REGEX_META: &str = r".+^$(){}|[]\";

fn glob_to_regex(pattern: &str) -> Regex {
    let mut out = String::from("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c if REGEX_META.contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    Regex::new(&out).unwrap_or_else(|_| Regex::new("$^").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(source: &str, message: &str) -> LogEvent {
        LogEvent::new(source, message)
    }

    #[test]
    fn term_query_matches_tokenized_message() {
        let mut docs = BTreeMap::new();
        let e = doc("s", "connection reset by peer");
        docs.insert(e.id, e.clone());
        let snap = IndexSnapshot::build(&docs);
        let matched = snap.evaluate(&Predicate::Leaf(PredicateLeaf::Term {
            field: "message".into(),
            value: "reset".into(),
        }));
        assert!(matched.contains(&e.id));
    }

    #[test]
    fn phrase_query_requires_contiguous_tokens() {
        let mut docs = BTreeMap::new();
        let e = doc("s", "hello big wide world");
        docs.insert(e.id, e.clone());
        let snap = IndexSnapshot::build(&docs);
        let hit = snap.evaluate(&Predicate::Leaf(PredicateLeaf::Phrase {
            field: "message".into(),
            value: "big wide".into(),
        }));
        assert!(hit.contains(&e.id));
        let miss = snap.evaluate(&Predicate::Leaf(PredicateLeaf::Phrase {
            field: "message".into(),
            value: "hello world".into(),
        }));
        assert!(!miss.contains(&e.id));
    }

    #[test]
    fn wildcard_pattern_matches_source() {
        let mut docs = BTreeMap::new();
        let e = doc("web-01", "x");
        docs.insert(e.id, e.clone());
        let snap = IndexSnapshot::build(&docs);
        let hit = snap.evaluate(&Predicate::Leaf(PredicateLeaf::Wildcard {
            field: "source".into(),
            pattern: "web-*".into(),
        }));
        assert!(hit.contains(&e.id));
    }

    #[test]
    fn sort_is_deterministic_and_tie_broken_by_id() {
        let mut a = doc("s", "a");
        let mut b = doc("s", "b");
        a.record_time = Some(chrono::Utc::now());
        b.record_time = a.record_time;
        let mut rows = vec![&b, &a];
        sort_rows(&mut rows, &SortSpec::default());
        let expected_first = std::cmp::min(a.id.to_string(), b.id.to_string());
        assert_eq!(rows[0].id.to_string(), expected_first);
    }

    #[test]
    fn and_predicate_intersects() {
        let mut docs = BTreeMap::new();
        let e = doc("web-01", "error occurred");
        docs.insert(e.id, e.clone());
        let snap = IndexSnapshot::build(&docs);
        let matched = snap.evaluate(&Predicate::And(vec![
            Predicate::Leaf(PredicateLeaf::Term { field: "message".into(), value: "error".into() }),
            Predicate::Leaf(PredicateLeaf::Term { field: "source".into(), value: "web-01".into() }),
        ]));
        assert!(matched.contains(&e.id));
        let miss = snap.evaluate(&Predicate::And(vec![
            Predicate::Leaf(PredicateLeaf::Term { field: "message".into(), value: "error".into() }),
            Predicate::Leaf(PredicateLeaf::Term { field: "source".into(), value: "web-02".into() }),
        ]));
        assert!(!miss.contains(&e.id));
    }
}
