//! Filter-path expression parser
//!
//! Parses JSONPath-style expressions into a small AST.
//!
//! # Syntax
//!
//! | Syntax | Meaning | Example |
//! |--------|---------|---------|
//! | `$` | Root (the whole directory) | `$` |
//! | `.key` | Member | `$.thing1.title` |
//! | `['key']` | Member, bracket notation | `$['thing1']['@type']` |
//! | `[n]` | Array index (negative from end) | `$.thing1.links[-1]` |
//! | `[a:b:c]` | Array slice | `$.thing1.links[0:2]` |
//! | `*` / `[*]` | All children | `$.*.title` |
//! | `..key` | Recursive descent | `$..title` |
//! | `[a,b]` | Union | `$['thing1','thing2']` |
//! | `[?(expr)]` | Filter over children | `$[?(@.type=="sensor")]` |
//!
//! Filter expressions support `@` (current node) and `$` paths, string, number,
//! `true`/`false`/`null` literals, `== != < <= > >=`, `&& || !` and parentheses.
//! A bare path inside a filter tests for existence.

use serde_json::{Number, Value};
use thiserror::Error;

/// Error type for filter-path parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Nothing to parse
    #[error("empty query expression")]
    Empty,
    /// Expression does not start at the root
    #[error("query must start with '$' (position {0})")]
    MissingRoot(usize),
    /// Unexpected character
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
    /// Input ended in the middle of an expression
    #[error("unexpected end of expression at position {0}")]
    UnexpectedEnd(usize),
    /// Unclosed bracket
    #[error("unclosed bracket starting at position {0}")]
    UnclosedBracket(usize),
    /// Unterminated string literal
    #[error("unterminated string starting at position {0}")]
    UnterminatedString(usize),
    /// Invalid number or index
    #[error("invalid number at position {0}: {1}")]
    InvalidNumber(usize, String),
    /// `.` not followed by a member name
    #[error("empty member name at position {0}")]
    EmptyName(usize),
    /// Parentheses, negations or nested filters exceed the nesting limit
    #[error("expression nested too deeply at position {0}")]
    TooDeep(usize),
}

/// A parsed filter-path query, rooted at `$`
#[derive(Debug, Clone, PartialEq)]
pub struct PathQuery {
    pub(crate) segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    /// `.sel` or `[sel]`
    Child(Selector),
    /// `..sel`
    Descendant(Selector),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Selector {
    Name(String),
    Index(i64),
    Wildcard,
    Slice {
        start: Option<i64>,
        end: Option<i64>,
        step: i64,
    },
    Union(Vec<Selector>),
    Filter(Box<Filter>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Filter {
    /// At least two terms
    Or(Vec<Filter>),
    /// At least two terms
    And(Vec<Filter>),
    Not(Box<Filter>),
    Exists(RelPath),
    Compare {
        left: Operand,
        op: CmpOp,
        right: Operand,
    },
}

/// A path inside a filter, starting at `$` or `@`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RelPath {
    pub origin: Origin,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Root,
    Current,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Literal(Value),
    Path(RelPath),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Deepest allowed nesting of filter terms
const MAX_NESTING: usize = 64;

/// Parse a filter-path expression
pub fn parse(expr: &str) -> Result<PathQuery, QueryError> {
    Parser::new(expr).parse_query()
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_pair(&mut self, a: char, b: char) -> bool {
        if self.peek() == Some(a) && self.peek_at(1) == Some(b) {
            self.pos += 2;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn text(&self, start: usize) -> String {
        self.chars[start..self.pos].iter().collect()
    }

    /// Error describing whatever sits at the current position
    fn unexpected(&self) -> QueryError {
        match self.peek() {
            Some(c) => QueryError::UnexpectedChar(c, self.pos),
            None => QueryError::UnexpectedEnd(self.pos),
        }
    }

    fn parse_query(&mut self) -> Result<PathQuery, QueryError> {
        self.skip_ws();
        if self.peek().is_none() {
            return Err(QueryError::Empty);
        }
        if !self.eat('$') {
            return Err(QueryError::MissingRoot(self.pos));
        }

        let segments = self.parse_segments()?;

        self.skip_ws();
        if self.peek().is_some() {
            return Err(self.unexpected());
        }
        Ok(PathQuery { segments })
    }

    fn parse_segments(&mut self) -> Result<Vec<Segment>, QueryError> {
        let mut segments = Vec::new();
        loop {
            match self.peek() {
                Some('.') if self.peek_at(1) == Some('.') => {
                    self.pos += 2;
                    let selector = if self.peek() == Some('[') {
                        self.parse_bracket()?
                    } else {
                        self.parse_member()?
                    };
                    segments.push(Segment::Descendant(selector));
                }
                Some('.') => {
                    self.pos += 1;
                    segments.push(Segment::Child(self.parse_member()?));
                }
                Some('[') => segments.push(Segment::Child(self.parse_bracket()?)),
                _ => return Ok(segments),
            }
        }
    }

    /// Member name or `*` after a dot
    fn parse_member(&mut self) -> Result<Selector, QueryError> {
        if self.eat('*') {
            return Ok(Selector::Wildcard);
        }
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_name_char(c)) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(match self.peek() {
                Some(_) => QueryError::EmptyName(start),
                None => QueryError::UnexpectedEnd(start),
            });
        }
        Ok(Selector::Name(self.text(start)))
    }

    fn parse_bracket(&mut self) -> Result<Selector, QueryError> {
        let open = self.pos;
        self.pos += 1;
        self.skip_ws();

        let selector = if self.eat('?') {
            Selector::Filter(Box::new(self.parse_or()?))
        } else {
            let mut items = vec![self.parse_bracket_item()?];
            loop {
                self.skip_ws();
                if !self.eat(',') {
                    break;
                }
                self.skip_ws();
                items.push(self.parse_bracket_item()?);
            }
            if items.len() == 1 {
                items.remove(0)
            } else {
                Selector::Union(items)
            }
        };

        self.skip_ws();
        if !self.eat(']') {
            return Err(match self.peek() {
                Some(c) => QueryError::UnexpectedChar(c, self.pos),
                None => QueryError::UnclosedBracket(open),
            });
        }
        Ok(selector)
    }

    fn parse_bracket_item(&mut self) -> Result<Selector, QueryError> {
        match self.peek() {
            Some('\'') | Some('"') => Ok(Selector::Name(self.parse_string()?)),
            Some('*') => {
                self.pos += 1;
                Ok(Selector::Wildcard)
            }
            Some(c) if c == '-' || c == ':' || c.is_ascii_digit() => self.parse_index_or_slice(),
            _ => Err(self.unexpected()),
        }
    }

    fn parse_index_or_slice(&mut self) -> Result<Selector, QueryError> {
        let start = self.parse_int()?;
        self.skip_ws();
        if !self.eat(':') {
            return match start {
                Some(index) => Ok(Selector::Index(index)),
                None => Err(self.unexpected()),
            };
        }

        self.skip_ws();
        let end = self.parse_int()?;
        self.skip_ws();
        let step = if self.eat(':') {
            self.skip_ws();
            self.parse_int()?.unwrap_or(1)
        } else {
            1
        };
        Ok(Selector::Slice { start, end, step })
    }

    fn parse_int(&mut self) -> Result<Option<i64>, QueryError> {
        let start = self.pos;
        self.eat('-');
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Ok(None);
        }
        let text = self.text(start);
        text.parse::<i64>()
            .map(Some)
            .map_err(|_| QueryError::InvalidNumber(start, text))
    }

    fn parse_string(&mut self) -> Result<String, QueryError> {
        let start = self.pos;
        let quote = self.bump().ok_or(QueryError::UnexpectedEnd(start))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(QueryError::UnterminatedString(start)),
                Some('\\') => match self.bump() {
                    None => return Err(QueryError::UnterminatedString(start)),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    // ==================== Filter expressions ====================

    fn parse_or(&mut self) -> Result<Filter, QueryError> {
        let mut terms = vec![self.parse_and()?];
        loop {
            self.skip_ws();
            if !self.eat_pair('|', '|') {
                break;
            }
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Filter::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Filter, QueryError> {
        let mut terms = vec![self.parse_unary()?];
        loop {
            self.skip_ws();
            if !self.eat_pair('&', '&') {
                break;
            }
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Filter::And(terms)
        })
    }

    /// Every recursive path through the grammar passes here
    fn parse_unary(&mut self) -> Result<Filter, QueryError> {
        if self.depth >= MAX_NESTING {
            return Err(QueryError::TooDeep(self.pos));
        }
        self.depth += 1;
        let term = self.parse_term();
        self.depth -= 1;
        term
    }

    fn parse_term(&mut self) -> Result<Filter, QueryError> {
        self.skip_ws();
        if self.peek() == Some('!') && self.peek_at(1) != Some('=') {
            self.pos += 1;
            return Ok(Filter::Not(Box::new(self.parse_unary()?)));
        }
        if self.eat('(') {
            let inner = self.parse_or()?;
            self.skip_ws();
            if !self.eat(')') {
                return Err(self.unexpected());
            }
            return Ok(inner);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Filter, QueryError> {
        let left = self.parse_operand()?;
        self.skip_ws();
        let Some(op) = self.parse_cmp_op() else {
            return match left {
                Operand::Path(path) => Ok(Filter::Exists(path)),
                Operand::Literal(_) => Err(self.unexpected()),
            };
        };
        self.skip_ws();
        let right = self.parse_operand()?;
        Ok(Filter::Compare { left, op, right })
    }

    fn parse_cmp_op(&mut self) -> Option<CmpOp> {
        let (op, width) = match (self.peek()?, self.peek_at(1)) {
            ('=', Some('=')) => (CmpOp::Eq, 2),
            ('!', Some('=')) => (CmpOp::Ne, 2),
            ('<', Some('=')) => (CmpOp::Le, 2),
            ('>', Some('=')) => (CmpOp::Ge, 2),
            ('<', _) => (CmpOp::Lt, 1),
            ('>', _) => (CmpOp::Gt, 1),
            _ => return None,
        };
        self.pos += width;
        Some(op)
    }

    fn parse_operand(&mut self) -> Result<Operand, QueryError> {
        match self.peek() {
            Some('@') => {
                self.pos += 1;
                Ok(Operand::Path(RelPath {
                    origin: Origin::Current,
                    segments: self.parse_segments()?,
                }))
            }
            Some('$') => {
                self.pos += 1;
                Ok(Operand::Path(RelPath {
                    origin: Origin::Root,
                    segments: self.parse_segments()?,
                }))
            }
            Some('\'') | Some('"') => Ok(Operand::Literal(Value::String(self.parse_string()?))),
            Some(c) if c == '-' || c.is_ascii_digit() => self.parse_number().map(Operand::Literal),
            Some(c) if c.is_ascii_alphabetic() => self.parse_keyword().map(Operand::Literal),
            _ => Err(self.unexpected()),
        }
    }

    fn parse_number(&mut self) -> Result<Value, QueryError> {
        let start = self.pos;
        self.eat('-');
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
        {
            self.pos += 1;
        }
        let text = self.text(start);
        if let Ok(int) = text.parse::<i64>() {
            return Ok(Value::from(int));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or(QueryError::InvalidNumber(start, text))
    }

    fn parse_keyword(&mut self) -> Result<Value, QueryError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        match self.text(start).as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            "null" => Ok(Value::Null),
            _ => {
                let c = self.chars[start];
                self.pos = start;
                Err(QueryError::UnexpectedChar(c, start))
            }
        }
    }
}

/// Characters allowed in a dot-notation member name
fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '@' | ':' | '#')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn child(name: &str) -> Segment {
        Segment::Child(Selector::Name(name.to_string()))
    }

    fn current(segments: Vec<Segment>) -> RelPath {
        RelPath {
            origin: Origin::Current,
            segments,
        }
    }

    #[test]
    fn test_parse_root_only() {
        assert_eq!(parse("$").unwrap().segments, vec![]);
        assert_eq!(parse("  $  ").unwrap().segments, vec![]);
    }

    #[test]
    fn test_parse_dot_and_bracket_members() {
        let query = parse("$.thing1['@type'][\"title\"]").unwrap();
        assert_eq!(
            query.segments,
            vec![child("thing1"), child("@type"), child("title")]
        );
    }

    #[test]
    fn test_parse_wildcard_descendant_index_slice() {
        let query = parse("$.*..links[-1][1:3][::2]").unwrap();
        assert_eq!(
            query.segments,
            vec![
                Segment::Child(Selector::Wildcard),
                Segment::Descendant(Selector::Name("links".to_string())),
                Segment::Child(Selector::Index(-1)),
                Segment::Child(Selector::Slice {
                    start: Some(1),
                    end: Some(3),
                    step: 1
                }),
                Segment::Child(Selector::Slice {
                    start: None,
                    end: None,
                    step: 2
                }),
            ]
        );
    }

    #[test]
    fn test_parse_union() {
        let query = parse("$['thing1', 'thing2']").unwrap();
        assert_eq!(
            query.segments,
            vec![Segment::Child(Selector::Union(vec![
                Selector::Name("thing1".to_string()),
                Selector::Name("thing2".to_string()),
            ]))]
        );
    }

    #[test]
    fn test_parse_filter_comparison() {
        let query = parse(r#"$[?(@.properties.title=="The sensor")]"#).unwrap();
        assert_eq!(
            query.segments,
            vec![Segment::Child(Selector::Filter(Box::new(Filter::Compare {
                left: Operand::Path(current(vec![child("properties"), child("title")])),
                op: CmpOp::Eq,
                right: Operand::Literal(json!("The sensor")),
            })))]
        );
    }

    #[test]
    fn test_parse_filter_without_parens() {
        let with = parse(r#"$[?(@.id=="thing1")]"#).unwrap();
        let without = parse(r#"$[? @.id == "thing1"]"#).unwrap();
        assert_eq!(with, without);
    }

    #[test]
    fn test_parse_filter_logic_and_literals() {
        let query = parse("$[?(@.a >= 1.5 && !(@.b == null) || @.c)]").unwrap();
        let Segment::Child(Selector::Filter(filter)) = &query.segments[0] else {
            panic!("expected filter");
        };
        let Filter::Or(terms) = filter.as_ref() else {
            panic!("expected or");
        };
        assert_eq!(terms.len(), 2);
        assert!(matches!(&terms[0], Filter::And(inner) if inner.len() == 2));
        assert_eq!(terms[1], Filter::Exists(current(vec![child("c")])));
    }

    #[test]
    fn test_parse_cmp_operators() {
        for (text, op) in [
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            ("<", CmpOp::Lt),
            ("<=", CmpOp::Le),
            (">", CmpOp::Gt),
            (">=", CmpOp::Ge),
        ] {
            let query = parse(&format!("$[?(@.n {} 3)]", text)).unwrap();
            let Segment::Child(Selector::Filter(filter)) = &query.segments[0] else {
                panic!("expected filter");
            };
            assert!(matches!(filter.as_ref(), Filter::Compare { op: o, .. } if *o == op));
        }
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse(""), Err(QueryError::Empty));
        assert_eq!(parse("type == sensor"), Err(QueryError::MissingRoot(0)));
        assert_eq!(parse("$.thing1["), Err(QueryError::UnexpectedEnd(9)));
        assert_eq!(parse("$['thing1'"), Err(QueryError::UnclosedBracket(1)));
        assert_eq!(parse("$['thing1]"), Err(QueryError::UnterminatedString(2)));
        assert_eq!(parse("$."), Err(QueryError::UnexpectedEnd(2)));
        assert_eq!(parse("$.]"), Err(QueryError::EmptyName(2)));
        assert!(matches!(
            parse("$[?(@.id==\"x\")"),
            Err(QueryError::UnclosedBracket(1))
        ));
        assert!(matches!(
            parse("$[?(@.id==)]"),
            Err(QueryError::UnexpectedChar(')', 10))
        ));
        assert!(matches!(
            parse("$[?(@.id == sensor)]"),
            Err(QueryError::UnexpectedChar('s', 12))
        ));
        assert!(matches!(parse("$.a b"), Err(QueryError::UnexpectedChar('b', 4))));
    }

    #[test]
    fn test_parse_long_chains_stay_flat() {
        let chain = vec!["@.a == 1"; 5000].join(" && ");
        let query = parse(&format!("$[?({})]", chain)).unwrap();
        let Segment::Child(Selector::Filter(filter)) = &query.segments[0] else {
            panic!("expected filter");
        };
        assert!(matches!(filter.as_ref(), Filter::And(terms) if terms.len() == 5000));
    }

    #[test]
    fn test_parse_nesting_limit() {
        let nested = |depth: usize| {
            format!(
                "$[?{}@.a{}]",
                "(".repeat(depth),
                ")".repeat(depth)
            )
        };
        // The filter itself takes one level
        assert!(parse(&nested(MAX_NESTING - 1)).is_ok());
        assert!(matches!(
            parse(&nested(MAX_NESTING)),
            Err(QueryError::TooDeep(_))
        ));
        assert!(matches!(
            parse(&nested(20_000)),
            Err(QueryError::TooDeep(_))
        ));

        let negations = format!("$[?({}@.a)]", "!".repeat(20_000));
        assert!(matches!(parse(&negations), Err(QueryError::TooDeep(_))));

        let filters = format!("$[?{}]", "@[?".repeat(20_000));
        assert!(matches!(parse(&filters), Err(QueryError::TooDeep(_))));
    }
}
