//! Executes the post-filter command pipeline (`stats`/`where`/`eval`/`sort`/
//! `head`/`rename`) over materialized result rows.

use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::model::event::LogEvent;
use crate::model::query::{Command, SortDirection, SortSpec, StatsAgg, StatsFn};

pub type ResultRow = BTreeMap<String, Json>;

pub fn event_to_row(event: &LogEvent) -> ResultRow {
    let mut row = ResultRow::new();
    row.insert("id".to_string(), Json::String(event.id.to_string()));
    row.insert("timestamp".to_string(), Json::String(event.ingest_time.to_rfc3339()));
    if let Some(rt) = event.record_time {
        row.insert("recordTime".to_string(), Json::String(rt.to_rfc3339()));
    }
    row.insert("level".to_string(), Json::String(event.severity.clone()));
    row.insert("source".to_string(), Json::String(event.source.clone()));
    row.insert("message".to_string(), Json::String(event.message.clone()));
    row.insert("rawContent".to_string(), Json::String(event.raw_content.clone()));
    for (k, v) in &event.metadata {
        row.insert(k.clone(), coerce_json(v));
    }
    row
}

fn coerce_json(raw: &str) -> Json {
    if let Ok(n) = raw.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(n) {
            return Json::Number(num);
        }
    }
    Json::String(raw.to_string())
}

pub fn run_pipeline(events: Vec<LogEvent>, pipeline: &[Command]) -> Vec<ResultRow> {
    let mut rows: Vec<ResultRow> = events.iter().map(event_to_row).collect();
    for cmd in pipeline {
        rows = match cmd {
            Command::Stats { aggs, by } => run_stats(rows, aggs, by),
            Command::Where { expr } => rows.into_iter().filter(|r| eval_bool_expr(expr, r)).collect(),
            Command::Eval { field, expr } => {
                for row in rows.iter_mut() {
                    let value = eval_arith_expr(expr, row);
                    row.insert(field.clone(), value);
                }
                rows
            }
            Command::Sort { fields } => {
                sort_rows(&mut rows, fields);
                rows
            }
            Command::Head { n } => {
                rows.truncate(*n);
                rows
            }
            Command::Rename { from, to } => {
                for row in rows.iter_mut() {
                    if let Some(v) = row.remove(from) {
                        row.insert(to.clone(), v);
                    }
                }
                rows
            }
        };
    }
    rows
}

fn run_stats(rows: Vec<ResultRow>, aggs: &[StatsAgg], by: &[String]) -> Vec<ResultRow> {
    let mut groups: BTreeMap<Vec<String>, Vec<ResultRow>> = BTreeMap::new();
    for row in rows {
        let key: Vec<String> = by.iter().map(|f| row.get(f).map(json_to_string).unwrap_or_default()).collect();
        groups.entry(key).or_default().push(row);
    }
    groups
        .into_iter()
        .map(|(key, group)| {
            let mut out = ResultRow::new();
            for (field, value) in by.iter().zip(key.iter()) {
                out.insert(field.clone(), Json::String(value.clone()));
            }
            for agg in aggs {
                out.insert(agg.output_name.clone(), compute_agg(agg, &group));
            }
            out
        })
        .collect()
}

fn compute_agg(agg: &StatsAgg, group: &[ResultRow]) -> Json {
    match agg.func {
        StatsFn::Count => Json::Number(group.len().into()),
        StatsFn::Sum | StatsFn::Avg | StatsFn::Min | StatsFn::Max => {
            let field = agg.field.as_deref().unwrap_or_default();
            let nums: Vec<f64> = group.iter().filter_map(|r| r.get(field)).filter_map(json_to_f64).collect();
            let result = match agg.func {
                StatsFn::Sum => nums.iter().sum(),
                StatsFn::Avg => {
                    if nums.is_empty() {
                        0.0
                    } else {
                        nums.iter().sum::<f64>() / nums.len() as f64
                    }
                }
                StatsFn::Min => nums.iter().cloned().fold(f64::INFINITY, f64::min),
                StatsFn::Max => nums.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                _ => unreachable!(),
            };
            serde_json::Number::from_f64(result).map(Json::Number).unwrap_or(Json::Null)
        }
        StatsFn::DistinctCount => {
            let field = agg.field.as_deref().unwrap_or_default();
            let distinct: std::collections::HashSet<String> = group.iter().filter_map(|r| r.get(field)).map(json_to_string).collect();
            Json::Number(distinct.len().into())
        }
    }
}

pub fn sort_rows(rows: &mut [ResultRow], fields: &[(String, SortDirection)]) {
    rows.sort_by(|a, b| {
        for (field, dir) in fields {
            let av = a.get(field);
            let bv = b.get(field);
            let ord = compare_json(av, bv);
            let ord = if *dir == SortDirection::Desc { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

pub fn default_sort(rows: &mut [ResultRow]) {
    sort_rows(rows, &SortSpec::default().fields);
}

fn compare_json(a: Option<&Json>, b: Option<&Json>) -> std::cmp::Ordering {
    match (a.and_then(json_to_f64), b.and_then(json_to_f64)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.map(json_to_string).unwrap_or_default().cmp(&b.map(json_to_string).unwrap_or_default()),
    }
}

fn json_to_string(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_to_f64(v: &Json) -> Option<f64> {
    match v {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => s.parse().ok(),
        _ => None,
    }
}

// --- `where`/`eval` mini-expression language ---------------------------------

#[derive(Debug, Clone, PartialEq)]
enum BoolExpr {
    And(Vec<BoolExpr>),
    Or(Vec<BoolExpr>),
    Cmp { field: String, op: String, value: String },
}

fn eval_bool_expr(expr: &str, row: &ResultRow) -> bool {
    match parse_bool_expr(expr) {
        Some(e) => eval_bool(&e, row),
        None => true, // malformed expression never filters anything out
    }
}

fn parse_bool_expr(expr: &str) -> Option<BoolExpr> {
    let or_parts: Vec<&str> = split_top_level(expr, "OR");
    if or_parts.len() > 1 {
        return Some(BoolExpr::Or(or_parts.into_iter().filter_map(parse_bool_expr).collect()));
    }
    let and_parts: Vec<&str> = split_top_level(expr, "AND");
    if and_parts.len() > 1 {
        return Some(BoolExpr::And(and_parts.into_iter().filter_map(parse_bool_expr).collect()));
    }
    parse_cmp(expr.trim())
}

fn split_top_level<'a>(expr: &'a str, keyword: &str) -> Vec<&'a str> {
    expr.split(&format!(" {keyword} ")).collect()
}

fn parse_cmp(expr: &str) -> Option<BoolExpr> {
    for op in ["!=", ">=", "<=", "=", ">", "<"] {
        if let Some(idx) = expr.find(op) {
            let field = expr[..idx].trim().to_string();
            let value = expr[idx + op.len()..].trim().trim_matches('"').to_string();
            return Some(BoolExpr::Cmp { field, op: op.to_string(), value });
        }
    }
    None
}

fn eval_bool(expr: &BoolExpr, row: &ResultRow) -> bool {
    match expr {
        BoolExpr::And(parts) => parts.iter().all(|p| eval_bool(p, row)),
        BoolExpr::Or(parts) => parts.iter().any(|p| eval_bool(p, row)),
        BoolExpr::Cmp { field, op, value } => {
            let Some(actual) = row.get(field) else { return false };
            match op.as_str() {
                "=" => json_to_string(actual) == *value,
                "!=" => json_to_string(actual) != *value,
                ">" | ">=" | "<" | "<=" => {
                    let (Some(a), Ok(v)) = (json_to_f64(actual), value.parse::<f64>()) else {
                        return false;
                    };
                    match op.as_str() {
                        ">" => a > v,
                        ">=" => a >= v,
                        "<" => a < v,
                        "<=" => a <= v,
                        _ => unreachable!(),
                    }
                }
                _ => false,
            }
        }
    }
}

/// Left-to-right arithmetic over `+ - * /` with standard precedence,
/// operands either numeric field references or numeric/string literals.
fn eval_arith_expr(expr: &str, row: &ResultRow) -> Json {
    let tokens: Vec<&str> = expr.split_whitespace().collect();
    if tokens.is_empty() {
        return Json::Null;
    }
    let resolve = |t: &str, row: &ResultRow| -> Option<f64> {
        if let Ok(n) = t.parse::<f64>() {
            return Some(n);
        }
        row.get(t).and_then(json_to_f64)
    };

    // First pass: fold `*` and `/`.
    let mut stack: Vec<f64> = Vec::new();
    let mut pending_op: Option<&str> = None;
    let mut add_sub: Vec<(String, f64)> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let t = tokens[i];
        if t == "+" || t == "-" {
            if let Some(v) = stack.pop() {
                add_sub.push((pending_op.unwrap_or("+").to_string(), v));
            }
            pending_op = Some(t);
            i += 1;
            continue;
        }
        if t == "*" || t == "/" {
            i += 1;
            let Some(rhs) = tokens.get(i).and_then(|t| resolve(t, row)) else {
                return Json::Null;
            };
            let Some(lhs) = stack.pop() else { return Json::Null };
            stack.push(if t == "*" { lhs * rhs } else { lhs / rhs });
            i += 1;
            continue;
        }
        let Some(v) = resolve(t, row) else { return Json::Null };
        stack.push(v);
        i += 1;
    }
    if let Some(v) = stack.pop() {
        add_sub.push((pending_op.unwrap_or("+").to_string(), v));
    }
    let total = add_sub.iter().fold(0.0, |acc, (op, v)| if op == "-" { acc - v } else { acc + v });
    serde_json::Number::from_f64(total).map(Json::Number).unwrap_or(Json::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::query::{StatsAgg, StatsFn};

    fn row(pairs: &[(&str, Json)]) -> ResultRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn stats_count_groups_by_field() {
        let rows = vec![
            row(&[("source", Json::String("web".into()))]),
            row(&[("source", Json::String("web".into()))]),
            row(&[("source", Json::String("db".into()))]),
        ];
        let out = run_stats(rows, &[StatsAgg { func: StatsFn::Count, field: None, output_name: "count".into() }], &["source".to_string()]);
        assert_eq!(out.len(), 2);
        let web = out.iter().find(|r| r.get("source") == Some(&Json::String("web".into()))).unwrap();
        assert_eq!(web.get("count"), Some(&Json::Number(2.into())));
    }

    #[test]
    fn where_filters_by_comparison() {
        let rows = vec![
            row(&[("status", Json::Number(200.into()))]),
            row(&[("status", Json::Number(500.into()))]),
        ];
        let filtered: Vec<_> = rows.into_iter().filter(|r| eval_bool_expr("status >= 400", r)).collect();
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn eval_computes_arithmetic_expression() {
        let r = row(&[("a", Json::Number(3.into())), ("b", Json::Number(4.into()))]);
        let v = eval_arith_expr("a + b * 2", &r);
        assert_eq!(v, Json::Number(serde_json::Number::from_f64(11.0).unwrap()));
    }

    #[test]
    fn rename_moves_value_to_new_key() {
        let mut rows = vec![row(&[("src", Json::String("x".into()))])];
        for r in rows.iter_mut() {
            if let Some(v) = r.remove("src") {
                r.insert("source".to_string(), v);
            }
        }
        assert!(rows[0].get("source").is_some());
        assert!(rows[0].get("src").is_none());
    }
}
