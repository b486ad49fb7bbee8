//! Filter-path queries over the directory
//!
//! The store evaluates queries through the [`QueryEngine`] trait so the
//! expression language can be swapped without touching storage. The default
//! engine is [`PathQueryEngine`], a JSONPath dialect with filter expressions.

mod eval;
mod parser;

use std::str::FromStr;

pub use eval::QueryMatch;
pub use parser::{parse, PathQuery, QueryError};

use crate::document::Collection;

/// Evaluates query expressions against a collection
pub trait QueryEngine: Send + Sync {
    /// Select all values matching `expr`, in document ID order
    fn select<'a>(
        &self,
        expr: &str,
        docs: &'a Collection,
    ) -> Result<Vec<QueryMatch<'a>>, QueryError>;
}

/// The built-in JSONPath engine
#[derive(Debug, Default, Clone, Copy)]
pub struct PathQueryEngine;

impl QueryEngine for PathQueryEngine {
    fn select<'a>(
        &self,
        expr: &str,
        docs: &'a Collection,
    ) -> Result<Vec<QueryMatch<'a>>, QueryError> {
        Ok(parse(expr)?.select(docs))
    }
}

impl FromStr for PathQuery {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_engine_selects_and_reports_syntax_errors() {
        let mut docs = Collection::new();
        docs.insert("a".into(), json!({"id": "a", "n": 1}));
        docs.insert("b".into(), json!({"id": "b", "n": 2}));

        let engine = PathQueryEngine;
        let found = engine.select("$[?(@.n > 1)]", &docs).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "b");

        assert_eq!(engine.select("", &docs), Err(QueryError::Empty));
        assert!(engine.select("$[?(@.n >", &docs).is_err());
    }

    #[test]
    fn test_from_str() {
        let query: PathQuery = "$.a.n".parse().unwrap();
        assert_eq!(query, parse("$.a.n").unwrap());
        assert!("n".parse::<PathQuery>().is_err());
    }
}
