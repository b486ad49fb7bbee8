//! Filter-path evaluation over the in-memory collection
//!
//! The root `$` is the whole directory: its children are the documents,
//! keyed by ID. Every match remembers the ID of the document it came from
//! so callers can apply per-document authorization to query results.

use std::cmp::Ordering;

use serde_json::Value;

use super::parser::{CmpOp, Filter, Operand, Origin, PathQuery, RelPath, Segment, Selector};
use crate::document::Collection;

/// A value selected by a query, with the ID of the document containing it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryMatch<'a> {
    pub id: &'a str,
    pub value: &'a Value,
}

#[derive(Debug, Clone, Copy)]
enum Node<'a> {
    Root,
    Item(QueryMatch<'a>),
}

fn item<'a>(id: &'a str, value: &'a Value) -> Node<'a> {
    Node::Item(QueryMatch { id, value })
}

impl PathQuery {
    /// Evaluate the query against a collection
    ///
    /// Results follow document ID order, then document order within each
    /// document. A bare `$` selects every document.
    pub fn select<'a>(&self, docs: &'a Collection) -> Vec<QueryMatch<'a>> {
        let evaluator = Evaluator { docs };
        evaluator
            .select_path(vec![Node::Root], &self.segments)
            .into_iter()
            .flat_map(|node| match node {
                Node::Root => evaluator.children(Node::Root),
                other => vec![other],
            })
            .filter_map(|node| match node {
                Node::Item(found) => Some(found),
                Node::Root => None,
            })
            .collect()
    }
}

struct Evaluator<'a> {
    docs: &'a Collection,
}

impl<'a> Evaluator<'a> {
    fn select_path(&self, start: Vec<Node<'a>>, segments: &[Segment]) -> Vec<Node<'a>> {
        segments.iter().fold(start, |nodes, segment| {
            let mut out = Vec::new();
            for node in nodes {
                match segment {
                    Segment::Child(selector) => self.select(node, selector, &mut out),
                    Segment::Descendant(selector) => {
                        let mut all = Vec::new();
                        self.descendants(node, &mut all);
                        for descendant in all {
                            self.select(descendant, selector, &mut out);
                        }
                    }
                }
            }
            out
        })
    }

    fn children(&self, node: Node<'a>) -> Vec<Node<'a>> {
        match node {
            Node::Root => self
                .docs
                .iter()
                .map(|(id, value)| item(id.as_str(), value))
                .collect(),
            Node::Item(current) => match current.value {
                Value::Object(map) => map.values().map(|v| item(current.id, v)).collect(),
                Value::Array(items) => items.iter().map(|v| item(current.id, v)).collect(),
                _ => Vec::new(),
            },
        }
    }

    /// The node itself followed by all of its descendants, depth first
    fn descendants(&self, node: Node<'a>, out: &mut Vec<Node<'a>>) {
        out.push(node);
        for child in self.children(node) {
            self.descendants(child, out);
        }
    }

    fn select(&self, node: Node<'a>, selector: &Selector, out: &mut Vec<Node<'a>>) {
        match selector {
            Selector::Name(name) => match node {
                Node::Root => {
                    if let Some((id, value)) = self.docs.get_key_value(name.as_str()) {
                        out.push(item(id.as_str(), value));
                    }
                }
                Node::Item(current) => {
                    if let Some(value) = current.value.as_object().and_then(|m| m.get(name)) {
                        out.push(item(current.id, value));
                    }
                }
            },
            Selector::Index(index) => {
                if let Node::Item(current) = node {
                    if let Value::Array(items) = current.value {
                        if let Some(i) = normalize_index(*index, items.len()) {
                            out.push(item(current.id, &items[i]));
                        }
                    }
                }
            }
            Selector::Slice { start, end, step } => {
                if let Node::Item(current) = node {
                    if let Value::Array(items) = current.value {
                        for i in slice_indices(*start, *end, *step, items.len()) {
                            out.push(item(current.id, &items[i]));
                        }
                    }
                }
            }
            Selector::Wildcard => out.extend(self.children(node)),
            Selector::Union(selectors) => {
                for selector in selectors {
                    self.select(node, selector, out);
                }
            }
            Selector::Filter(filter) => {
                for child in self.children(node) {
                    if let Node::Item(candidate) = child {
                        if self.test(filter, candidate) {
                            out.push(child);
                        }
                    }
                }
            }
        }
    }

    fn test(&self, filter: &Filter, current: QueryMatch<'a>) -> bool {
        match filter {
            Filter::Or(terms) => terms.iter().any(|term| self.test(term, current)),
            Filter::And(terms) => terms.iter().all(|term| self.test(term, current)),
            Filter::Not(inner) => !self.test(inner, current),
            Filter::Exists(path) => !self.resolve(path, current).is_empty(),
            Filter::Compare { left, op, right } => {
                let left = self.operand_values(left, current);
                let right = self.operand_values(right, current);
                compare(&left, *op, &right)
            }
        }
    }

    fn resolve(&self, path: &RelPath, current: QueryMatch<'a>) -> Vec<Node<'a>> {
        let start = match path.origin {
            Origin::Root => Node::Root,
            Origin::Current => Node::Item(current),
        };
        self.select_path(vec![start], &path.segments)
    }

    fn operand_values<'s>(&'s self, operand: &'s Operand, current: QueryMatch<'a>) -> Vec<&'s Value> {
        match operand {
            Operand::Literal(value) => vec![value],
            Operand::Path(path) => self
                .resolve(path, current)
                .into_iter()
                .filter_map(|node| match node {
                    Node::Item(found) => Some(found.value),
                    Node::Root => None,
                })
                .collect(),
        }
    }
}

/// Compare two node lists
///
/// `==` holds when any pair is equal, or when both sides select nothing.
/// `!=` is its negation. Ordering operators hold when any pair of numbers
/// or strings satisfies them.
fn compare(left: &[&Value], op: CmpOp, right: &[&Value]) -> bool {
    match op {
        CmpOp::Eq => any_equal(left, right),
        CmpOp::Ne => !any_equal(left, right),
        _ => left
            .iter()
            .any(|l| right.iter().any(|r| ordered(l, op, r))),
    }
}

fn any_equal(left: &[&Value], right: &[&Value]) -> bool {
    if left.is_empty() && right.is_empty() {
        return true;
    }
    left.iter()
        .any(|l| right.iter().any(|r| values_equal(l, r)))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn ordered(a: &Value, op: CmpOp, b: &Value) -> bool {
    let ordering = match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    };
    match (ordering, op) {
        (Some(o), CmpOp::Lt) => o == Ordering::Less,
        (Some(o), CmpOp::Le) => o != Ordering::Greater,
        (Some(o), CmpOp::Gt) => o == Ordering::Greater,
        (Some(o), CmpOp::Ge) => o != Ordering::Less,
        _ => false,
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { len + index } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

fn slice_indices(start: Option<i64>, end: Option<i64>, step: i64, len: usize) -> Vec<usize> {
    let len = len as i64;
    let normalize = |i: i64| if i >= 0 { i } else { len + i };

    if step > 0 {
        let lower = start.map(normalize).unwrap_or(0).clamp(0, len);
        let upper = end.map(normalize).unwrap_or(len).clamp(0, len);
        (lower..upper)
            .step_by(step as usize)
            .map(|i| i as usize)
            .collect()
    } else if step < 0 {
        let upper = start.map(normalize).unwrap_or(len - 1).clamp(-1, len - 1);
        let lower = end.map(normalize).unwrap_or(-1).clamp(-1, len - 1);
        let mut out = Vec::new();
        let mut i = upper;
        while i > lower {
            out.push(i as usize);
            i += step;
        }
        out
    } else {
        Vec::new()
    }
}
