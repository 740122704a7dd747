#[derive(Debug, thiserror::Error, PartialEq)]
pub enum QueryCompileError {
    #[error("syntax error at position {position}: expected {expected}")]
    SyntaxError { position: usize, expected: String },
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("type mismatch on field {field}: expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Eq,
    Contains,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpr {
    Quoted(String),
    Bareword(String),
    Regex(String),
    Range(Box<ValueExpr>, Box<ValueExpr>),
}

impl ValueExpr {
    pub fn has_wildcard(&self) -> bool {
        matches!(self, ValueExpr::Bareword(s) if s.contains('*') || s.contains('?'))
    }

    pub fn text(&self) -> String {
        match self {
            ValueExpr::Quoted(s) | ValueExpr::Bareword(s) | ValueExpr::Regex(s) => s.clone(),
            ValueExpr::Range(..) => String::new(),
        }
    }
}

/// The search-expression AST (§4.6 grammar).
#[derive(Debug, Clone, PartialEq)]
pub enum SearchExpr {
    Or(Vec<SearchExpr>),
    And(Vec<SearchExpr>),
    Not(Box<SearchExpr>),
    FieldTerm { field: String, op: FieldOp, value: ValueExpr },
    /// A bare term/phrase/regex matching the `message` field.
    Term(ValueExpr),
    MatchAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatsFunc {
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
    DistinctCount(String),
}

impl StatsFunc {
    pub fn output_name(&self) -> String {
        match self {
            StatsFunc::Count => "count".to_string(),
            StatsFunc::Sum(f) => format!("sum({f})"),
            StatsFunc::Avg(f) => format!("avg({f})"),
            StatsFunc::Min(f) => format!("min({f})"),
            StatsFunc::Max(f) => format!("max({f})"),
            StatsFunc::DistinctCount(f) => format!("distinct_count({f})"),
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            StatsFunc::Count => None,
            StatsFunc::Sum(f) | StatsFunc::Avg(f) | StatsFunc::Min(f) | StatsFunc::Max(f) | StatsFunc::DistinctCount(f) => {
                Some(f)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineCommand {
    Stats { funcs: Vec<StatsFunc>, by: Vec<String> },
    Where { expr: String },
    Eval { field: String, expr: String },
    Sort { fields: Vec<(String, SortDir)> },
    Head { n: usize },
    Rename { from: String, to: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub search: SearchExpr,
    pub pipeline: Vec<PipelineCommand>,
}
