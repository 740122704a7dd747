//! Recursive-descent parser for the search-pipeline grammar (§4.6):
//!
//! ```text
//! query      := searchExpr ("|" command)*
//! searchExpr := orExpr
//! orExpr     := andExpr ("OR" andExpr)*
//! andExpr    := notExpr ("AND"? notExpr)*
//! notExpr    := "NOT"? atom
//! atom       := "(" searchExpr ")" | fieldTerm | term
//! fieldTerm  := ident ("=" | ":" | "!=" | ">" | ">=" | "<" | "<=") value
//! value      := quoted | bareword | "/" regex "/" | range
//! range      := "[" value "TO" value "]"
//! term       := quoted | bareword | "/" regex "/"
//! ```

use super::ast::{FieldOp, ParsedQuery, PipelineCommand, QueryCompileError, SearchExpr, SortDir, StatsFunc, ValueExpr};
use super::lexer::{PositionedToken, Token};

pub struct Parser {
    tokens: Vec<PositionedToken>,
    pos: usize,
}

type PResult<T> = Result<T, QueryCompileError>;

impl Parser {
    pub fn new(tokens: Vec<PositionedToken>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn position(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].position
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos.min(self.tokens.len() - 1)].token.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token, what: &str) -> PResult<()> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(QueryCompileError::SyntaxError {
                position: self.position(),
                expected: what.to_string(),
            })
        }
    }

    pub fn parse(&mut self) -> PResult<ParsedQuery> {
        let search = if matches!(self.peek(), Token::Pipe | Token::Eof) {
            SearchExpr::MatchAll
        } else {
            self.parse_or()?
        };
        let mut pipeline = Vec::new();
        while *self.peek() == Token::Pipe {
            self.advance();
            pipeline.push(self.parse_command()?);
        }
        self.expect(&Token::Eof, "end of query")?;
        Ok(ParsedQuery { search, pipeline })
    }

    fn parse_or(&mut self) -> PResult<SearchExpr> {
        let mut terms = vec![self.parse_and()?];
        while *self.peek() == Token::Or {
            self.advance();
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 { terms.remove(0) } else { SearchExpr::Or(terms) })
    }

    fn parse_and(&mut self) -> PResult<SearchExpr> {
        let mut terms = vec![self.parse_not()?];
        loop {
            match self.peek() {
                Token::And => {
                    self.advance();
                    terms.push(self.parse_not()?);
                }
                Token::Pipe | Token::Or | Token::RParen | Token::Eof => break,
                _ => terms.push(self.parse_not()?), // implicit AND
            }
        }
        Ok(if terms.len() == 1 { terms.remove(0) } else { SearchExpr::And(terms) })
    }

    fn parse_not(&mut self) -> PResult<SearchExpr> {
        if *self.peek() == Token::Not {
            self.advance();
            return Ok(SearchExpr::Not(Box::new(self.parse_atom()?)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> PResult<SearchExpr> {
        if *self.peek() == Token::LParen {
            self.advance();
            let inner = self.parse_or()?;
            self.expect(&Token::RParen, ")")?;
            return Ok(inner);
        }

        // field term: ident followed by a comparison operator
        if let Token::Bareword(name) = self.peek().clone() {
            let op_at = self.pos + 1;
            if let Some(op) = self.tokens.get(op_at).and_then(|t| field_op(&t.token)) {
                self.advance(); // ident
                self.advance(); // operator
                let value = self.parse_value()?;
                return Ok(SearchExpr::FieldTerm { field: name, op, value });
            }
        }

        let value = self.parse_term_value()?;
        Ok(SearchExpr::Term(value))
    }

    fn parse_value(&mut self) -> PResult<ValueExpr> {
        if *self.peek() == Token::LBracket {
            self.advance();
            let lo = self.parse_term_value()?;
            self.expect(&Token::To, "TO")?;
            let hi = self.parse_term_value()?;
            self.expect(&Token::RBracket, "]")?;
            return Ok(ValueExpr::Range(Box::new(lo), Box::new(hi)));
        }
        self.parse_term_value()
    }

    fn parse_term_value(&mut self) -> PResult<ValueExpr> {
        match self.advance() {
            Token::Quoted(s) => Ok(ValueExpr::Quoted(s)),
            Token::Bareword(s) => Ok(ValueExpr::Bareword(s)),
            Token::Regex(s) => Ok(ValueExpr::Regex(s)),
            // keywords can appear as barewords when used as plain values (e.g. field=AND is nonsensical but harmless)
            Token::And => Ok(ValueExpr::Bareword("AND".into())),
            Token::Or => Ok(ValueExpr::Bareword("OR".into())),
            Token::Not => Ok(ValueExpr::Bareword("NOT".into())),
            Token::To => Ok(ValueExpr::Bareword("TO".into())),
            _ => Err(QueryCompileError::SyntaxError {
                position: self.position(),
                expected: "a value".to_string(),
            }),
        }
    }

    fn parse_command(&mut self) -> PResult<PipelineCommand> {
        let name = match self.advance() {
            Token::Bareword(s) => s,
            _ => {
                return Err(QueryCompileError::SyntaxError {
                    position: self.position(),
                    expected: "command name".to_string(),
                })
            }
        };
        match name.as_str() {
            "stats" => self.parse_stats(),
            "where" => self.parse_where(),
            "eval" => self.parse_eval(),
            "sort" => self.parse_sort(),
            "head" => self.parse_head(),
            "rename" => self.parse_rename(),
            other => Err(QueryCompileError::SyntaxError {
                position: self.position(),
                expected: format!("a known command, got `{other}`"),
            }),
        }
    }

    fn parse_stats(&mut self) -> PResult<PipelineCommand> {
        let mut funcs = Vec::new();
        loop {
            let name = self.expect_bareword("aggregation function")?;
            let func = if name.eq_ignore_ascii_case("count") {
                StatsFunc::Count
            } else {
                self.expect(&Token::LParen, "(")?;
                let field = self.expect_bareword("field name")?;
                self.expect(&Token::RParen, ")")?;
                match name.as_str() {
                    "sum" => StatsFunc::Sum(field),
                    "avg" => StatsFunc::Avg(field),
                    "min" => StatsFunc::Min(field),
                    "max" => StatsFunc::Max(field),
                    "distinct_count" => StatsFunc::DistinctCount(field),
                    other => {
                        return Err(QueryCompileError::SyntaxError {
                            position: self.position(),
                            expected: format!("a known stats function, got `{other}`"),
                        })
                    }
                }
            };
            funcs.push(func);
            if *self.peek() == Token::Comma {
                self.advance();
                continue;
            }
            break;
        }
        let mut by = Vec::new();
        if let Token::Bareword(kw) = self.peek().clone() {
            if kw == "by" {
                self.advance();
                loop {
                    by.push(self.expect_bareword("field name")?);
                    if *self.peek() == Token::Comma {
                        self.advance();
                        continue;
                    }
                    break;
                }
            }
        }
        Ok(PipelineCommand::Stats { funcs, by })
    }

    fn parse_where(&mut self) -> PResult<PipelineCommand> {
        Ok(PipelineCommand::Where { expr: self.rest_of_command_as_text() })
    }

    fn parse_eval(&mut self) -> PResult<PipelineCommand> {
        let field = self.expect_bareword("field name")?;
        self.expect(&Token::Eq, "=")?;
        Ok(PipelineCommand::Eval { field, expr: self.rest_of_command_as_text() })
    }

    fn parse_sort(&mut self) -> PResult<PipelineCommand> {
        let mut fields = Vec::new();
        loop {
            let mut dir = SortDir::Asc;
            if let Token::Bareword(s) = self.peek().clone() {
                if let Some(stripped) = s.strip_prefix('-') {
                    self.advance();
                    fields.push((stripped.to_string(), SortDir::Desc));
                    if *self.peek() == Token::Comma {
                        self.advance();
                        continue;
                    }
                    break;
                }
            }
            let field = self.expect_bareword("field name")?;
            if let Token::Bareword(kw) = self.peek().clone() {
                if kw.eq_ignore_ascii_case("desc") {
                    self.advance();
                    dir = SortDir::Desc;
                } else if kw.eq_ignore_ascii_case("asc") {
                    self.advance();
                }
            }
            fields.push((field, dir));
            if *self.peek() == Token::Comma {
                self.advance();
                continue;
            }
            break;
        }
        Ok(PipelineCommand::Sort { fields })
    }

    fn parse_head(&mut self) -> PResult<PipelineCommand> {
        let n = self.expect_bareword("row count")?;
        let n: usize = n.parse().map_err(|_| QueryCompileError::SyntaxError {
            position: self.position(),
            expected: "an integer".to_string(),
        })?;
        Ok(PipelineCommand::Head { n })
    }

    fn parse_rename(&mut self) -> PResult<PipelineCommand> {
        let from = self.expect_bareword("field name")?;
        let as_kw = self.expect_bareword("AS")?;
        if !as_kw.eq_ignore_ascii_case("as") {
            return Err(QueryCompileError::SyntaxError {
                position: self.position(),
                expected: "AS".to_string(),
            });
        }
        let to = self.expect_bareword("field name")?;
        Ok(PipelineCommand::Rename { from, to })
    }

    fn expect_bareword(&mut self, what: &str) -> PResult<String> {
        match self.advance() {
            Token::Bareword(s) => Ok(s),
            _ => Err(QueryCompileError::SyntaxError {
                position: self.position(),
                expected: what.to_string(),
            }),
        }
    }

    /// Captures everything up to the next `|` or end of input as raw text,
    /// for the small boolean/arithmetic sub-languages `where`/`eval` accept.
    fn rest_of_command_as_text(&mut self) -> String {
        let mut parts = Vec::new();
        while !matches!(self.peek(), Token::Pipe | Token::Eof) {
            parts.push(token_text(&self.advance()));
        }
        parts.join(" ")
    }
}

fn field_op(token: &Token) -> Option<FieldOp> {
    match token {
        Token::Eq => Some(FieldOp::Eq),
        Token::Colon => Some(FieldOp::Contains),
        Token::Ne => Some(FieldOp::Ne),
        Token::Gt => Some(FieldOp::Gt),
        Token::Gte => Some(FieldOp::Gte),
        Token::Lt => Some(FieldOp::Lt),
        Token::Lte => Some(FieldOp::Lte),
        _ => None,
    }
}

fn token_text(token: &Token) -> String {
    match token {
        Token::Ident(s) | Token::Bareword(s) => s.clone(),
        Token::Quoted(s) => format!("\"{s}\""),
        Token::Regex(s) => format!("/{s}/"),
        Token::Pipe => "|".into(),
        Token::LParen => "(".into(),
        Token::RParen => ")".into(),
        Token::LBracket => "[".into(),
        Token::RBracket => "]".into(),
        Token::Eq => "=".into(),
        Token::Colon => ":".into(),
        Token::Ne => "!=".into(),
        Token::Gt => ">".into(),
        Token::Gte => ">=".into(),
        Token::Lt => "<".into(),
        Token::Lte => "<=".into(),
        Token::And => "AND".into(),
        Token::Or => "OR".into(),
        Token::Not => "NOT".into(),
        Token::To => "TO".into(),
        Token::Comma => ",".into(),
        Token::Eof => String::new(),
    }
}

pub fn parse(input: &str) -> PResult<ParsedQuery> {
    Parser::new(super::lexer::lex(input)).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_implicit_and_between_field_terms() {
        let q = parse(r#"level=ERROR source="web-01""#).unwrap();
        assert!(matches!(q.search, SearchExpr::And(terms) if terms.len() == 2));
    }

    #[test]
    fn parses_or_and_not_with_grouping() {
        let q = parse(r#"(level=ERROR OR level=WARN) AND NOT source=test"#).unwrap();
        match q.search {
            SearchExpr::And(terms) => {
                assert_eq!(terms.len(), 2);
                assert!(matches!(terms[0], SearchExpr::Or(_)));
                assert!(matches!(terms[1], SearchExpr::Not(_)));
            }
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn parses_range_field_term() {
        let q = parse("status=[500 TO 599]").unwrap();
        match q.search {
            SearchExpr::FieldTerm { field, op, value } => {
                assert_eq!(field, "status");
                assert_eq!(op, FieldOp::Eq);
                assert!(matches!(value, ValueExpr::Range(..)));
            }
            other => panic!("expected FieldTerm, got {other:?}"),
        }
    }

    #[test]
    fn parses_pipeline_with_stats_by_and_sort_and_head() {
        let q = parse("level=ERROR | stats count by source | sort -count | head 10").unwrap();
        assert_eq!(q.pipeline.len(), 3);
        match &q.pipeline[0] {
            PipelineCommand::Stats { funcs, by } => {
                assert_eq!(funcs, &vec![StatsFunc::Count]);
                assert_eq!(by, &vec!["source".to_string()]);
            }
            other => panic!("expected Stats, got {other:?}"),
        }
        assert!(matches!(&q.pipeline[1], PipelineCommand::Sort { fields } if fields == &vec![("count".to_string(), SortDir::Desc)]));
        assert!(matches!(&q.pipeline[2], PipelineCommand::Head { n: 10 }));
    }

    #[test]
    fn parses_rename_command() {
        let q = parse("* | rename src AS source").unwrap();
        assert!(matches!(q.search, SearchExpr::MatchAll | SearchExpr::Term(_)));
        assert!(matches!(&q.pipeline[0], PipelineCommand::Rename { from, to } if from == "src" && to == "source"));
    }
}
