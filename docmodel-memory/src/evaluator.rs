//! Filter evaluation for in-memory documents.
//!
//! Evaluates store-native filter documents (`{field: {"$gt": 1}}`, `$and`, `$or`, `$nor`)
//! against BSON documents. Dotted paths traverse embedded documents and arrays the way a
//! document database does: a path into an array of documents collects the value from every
//! element, and a comparison matches when any collected value (or any element of a
//! collected array) satisfies it.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use regex::RegexBuilder;

use docmodel_core::error::{DocumentStoreError, DocumentStoreResult};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to `f64` so that integers and floats compare with each
/// other. Values of different kinds are ordered by their kind, the way stores order mixed
/// values when sorting.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Number(f64),
    String(&'a str),
    Map(HashMap<&'a str, Comparable<'a>>),
    Array(Vec<Comparable<'a>>),
    Binary(&'a [u8]),
    ObjectId(ObjectId),
    Bool(bool),
    DateTime(DateTime),
    Timestamp(u32, u32),
}

impl Comparable<'_> {
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::Binary(_) => 5,
            Comparable::ObjectId(_) => 6,
            Comparable::Bool(_) => 7,
            Comparable::DateTime(_) => 8,
            Comparable::Timestamp(..) => 9,
        }
    }

    /// Total order used for sorting, `$min` and `$max`.
    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::Timestamp(value) => Comparable::Timestamp(value.time, value.increment),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Binary(value) => Comparable::Binary(&value.bytes),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Null,
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::Timestamp(a, x), Comparable::Timestamp(b, y)) => a == b && x == y,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Binary(a), Comparable::Binary(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::Timestamp(a, x), Comparable::Timestamp(b, y)) => (a, x).partial_cmp(&(b, y)),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            (Comparable::Binary(a), Comparable::Binary(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Orders two optional values the way a sort on a possibly missing field does.
pub(crate) fn sort_cmp(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left.map(Comparable::from).unwrap_or(Comparable::Null);
    let right = right.map(Comparable::from).unwrap_or(Comparable::Null);
    left.total_cmp(&right)
}

/// Returns the values found at a dotted path.
///
/// Numeric segments index into arrays; other segments applied to an array are applied to
/// each of its document elements.
pub(crate) fn values_at<'a>(doc: &'a Document, path: &str) -> Vec<&'a Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut found = Vec::new();

    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = doc.get(*head) {
            collect(value, rest, &mut found);
        }
    }

    found
}

fn collect<'a>(value: &'a Bson, segments: &[&str], found: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = segments.split_first() else {
        found.push(value);
        return;
    };

    match value {
        Bson::Document(doc) => {
            if let Some(inner) = doc.get(*head) {
                collect(inner, rest, found);
            }
        }
        Bson::Array(items) => match head.parse::<usize>() {
            Ok(idx) => {
                if let Some(item) = items.get(idx) {
                    collect(item, rest, found);
                }
            }
            Err(_) => {
                for item in items.iter().filter(|item| matches!(item, Bson::Document(_))) {
                    collect(item, segments, found);
                }
            }
        },
        _ => {}
    }
}

/// Evaluates filter documents against stored documents.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Whether the document satisfies every clause of `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidDocument`] for unknown operators, malformed
    /// operands and invalid regular expressions.
    pub fn evaluate(&self, filter: &Document) -> DocumentStoreResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => self.all_of(condition)?,
                "$or" => self.any_of(condition)?,
                "$nor" => !self.any_of(condition)?,
                op if op.starts_with('$') => {
                    return Err(DocumentStoreError::InvalidDocument(format!(
                        "unsupported top-level operator {}",
                        op
                    )));
                }
                path => condition_matches(&values_at(self.document, path), condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Returns the documents matching `filter`.
    pub fn filter_documents<'d>(
        documents: impl IntoIterator<Item = &'d Document>,
        filter: &Document,
    ) -> DocumentStoreResult<Vec<&'d Document>> {
        let mut matched = Vec::new();
        for document in documents {
            if DocumentEvaluator::new(document).evaluate(filter)? {
                matched.push(document);
            }
        }
        Ok(matched)
    }

    fn all_of(&self, clauses: &Bson) -> DocumentStoreResult<bool> {
        for clause in clause_list(clauses)? {
            if !self.evaluate(clause)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn any_of(&self, clauses: &Bson) -> DocumentStoreResult<bool> {
        for clause in clause_list(clauses)? {
            if self.evaluate(clause)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn clause_list(clauses: &Bson) -> DocumentStoreResult<Vec<&Document>> {
    let Bson::Array(items) = clauses else {
        return Err(DocumentStoreError::InvalidDocument(
            "$and, $or and $nor expect an array of filters".to_string(),
        ));
    };

    items
        .iter()
        .map(|item| {
            item.as_document().ok_or_else(|| {
                DocumentStoreError::InvalidDocument("logical operator clauses must be documents".to_string())
            })
        })
        .collect()
}

/// Whether an array element satisfies a `$pull` condition.
///
/// Operator documents are evaluated against the element itself, other documents are
/// evaluated as filters on document elements, and anything else is compared for equality.
pub(crate) fn element_matches(element: &Bson, condition: &Bson) -> DocumentStoreResult<bool> {
    match (element, condition) {
        (_, Bson::Document(ops)) if is_operator_document(ops) => operators_match(&[element], ops),
        (Bson::Document(doc), Bson::Document(filter)) => DocumentEvaluator::new(doc).evaluate(filter),
        _ => Ok(Comparable::from(element) == Comparable::from(condition)),
    }
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().is_some_and(|key| key.starts_with('$'))
}

fn condition_matches(values: &[&Bson], condition: &Bson) -> DocumentStoreResult<bool> {
    match condition {
        Bson::Document(ops) if is_operator_document(ops) => operators_match(values, ops),
        _ => Ok(equals_any(values, condition)),
    }
}

fn operators_match(values: &[&Bson], ops: &Document) -> DocumentStoreResult<bool> {
    for (op, operand) in ops {
        let matched = match op.as_str() {
            "$eq" => equals_any(values, operand),
            "$ne" => !equals_any(values, operand),
            "$gt" => compares(values, operand, |o| o == Ordering::Greater),
            "$gte" => compares(values, operand, |o| o != Ordering::Less),
            "$lt" => compares(values, operand, |o| o == Ordering::Less),
            "$lte" => compares(values, operand, |o| o != Ordering::Greater),
            "$in" => operand_list(op, operand)?.iter().any(|item| equals_any(values, item)),
            "$nin" => !operand_list(op, operand)?.iter().any(|item| equals_any(values, item)),
            "$all" => {
                let items = operand_list(op, operand)?;
                !items.is_empty() && items.iter().all(|item| equals_any(values, item))
            }
            "$exists" => !values.is_empty() == truthy(operand),
            "$size" => values.iter().any(|value| match (value, operand_size(operand)) {
                (Bson::Array(items), Some(size)) => items.len() == size,
                _ => false,
            }),
            "$regex" => regex_matches(values, operand, ops.get_str("$options").unwrap_or(""))?,
            "$options" => true,
            "$not" => match operand {
                Bson::Document(inner) => !operators_match(values, inner)?,
                _ => {
                    return Err(DocumentStoreError::InvalidDocument("$not expects an operator document".to_string()));
                }
            },
            "$elemMatch" => {
                if !matches!(operand, Bson::Document(_)) {
                    return Err(DocumentStoreError::InvalidDocument("$elemMatch expects a document".to_string()));
                }
                let mut any = false;
                for value in values {
                    if let Bson::Array(items) = value {
                        for item in items {
                            if element_matches(item, operand)? {
                                any = true;
                                break;
                            }
                        }
                    }
                }
                any
            }
            other => {
                return Err(DocumentStoreError::InvalidDocument(format!("unsupported filter operator {}", other)));
            }
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Candidate values a comparison runs against: each value and each element of array values.
fn candidates<'a>(values: &[&'a Bson]) -> Vec<&'a Bson> {
    let mut out = Vec::with_capacity(values.len());
    for &value in values {
        out.push(value);
        if let Bson::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

fn equals_any(values: &[&Bson], operand: &Bson) -> bool {
    if matches!(operand, Bson::Null) && values.is_empty() {
        return true;
    }

    let expected = Comparable::from(operand);
    candidates(values)
        .into_iter()
        .any(|value| Comparable::from(value) == expected)
}

fn compares(values: &[&Bson], operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let expected = Comparable::from(operand);
    candidates(values)
        .into_iter()
        .filter_map(|value| Comparable::from(value).partial_cmp(&expected))
        .any(accept)
}

fn operand_list<'a>(op: &str, operand: &'a Bson) -> DocumentStoreResult<&'a Vec<Bson>> {
    match operand {
        Bson::Array(items) => Ok(items),
        _ => Err(DocumentStoreError::InvalidDocument(format!("{} expects an array", op))),
    }
}

fn operand_size(operand: &Bson) -> Option<usize> {
    match operand {
        Bson::Int32(n) => usize::try_from(*n).ok(),
        Bson::Int64(n) => usize::try_from(*n).ok(),
        _ => None,
    }
}

fn truthy(operand: &Bson) -> bool {
    match operand {
        Bson::Boolean(value) => *value,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Null => false,
        _ => true,
    }
}

fn regex_matches(values: &[&Bson], pattern: &Bson, options: &str) -> DocumentStoreResult<bool> {
    let pattern = match pattern {
        Bson::String(pattern) => pattern.as_str(),
        Bson::RegularExpression(regex) => regex.pattern.as_str(),
        _ => return Err(DocumentStoreError::InvalidDocument("$regex expects a string".to_string())),
    };

    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .build()
        .map_err(|err| DocumentStoreError::InvalidDocument(format!("invalid $regex: {}", err)))?;

    Ok(candidates(values).into_iter().any(|value| match value {
        Bson::String(text) => regex.is_match(text),
        _ => false,
    }))
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    fn user() -> Document {
        doc! {
            "name": "Alice",
            "age": 30_i64,
            "tags": ["admin", "staff"],
            "address": { "city": "Lisbon" },
            "visits": [{ "page": "home", "seconds": 5_i64 }, { "page": "docs", "seconds": 40_i64 }],
        }
    }

    fn matches(filter: Document) -> bool {
        DocumentEvaluator::new(&user()).evaluate(&filter).unwrap()
    }

    #[test]
    fn test_comparisons() {
        assert!(matches(doc! { "age": { "$eq": 30_i64 } }));
        assert!(matches(doc! { "age": 30 }));
        assert!(matches(doc! { "age": { "$gt": 18.5, "$lte": 30_i64 } }));
        assert!(!matches(doc! { "age": { "$lt": 30_i64 } }));
        assert!(matches(doc! { "name": { "$ne": "Bob" } }));
        assert!(!matches(doc! { "name": { "$gt": 5 } }));
    }

    #[test]
    fn test_paths_and_arrays() {
        assert!(matches(doc! { "address.city": "Lisbon" }));
        assert!(matches(doc! { "tags": "admin" }));
        assert!(matches(doc! { "tags": { "$all": ["staff", "admin"] } }));
        assert!(!matches(doc! { "tags": { "$nin": ["admin"] } }));
        assert!(matches(doc! { "visits.page": "docs" }));
        assert!(matches(doc! { "visits.1.seconds": { "$gte": 40_i64 } }));
        assert!(matches(doc! { "tags": { "$size": 2 } }));
        assert!(matches(doc! { "visits": { "$elemMatch": { "page": "home", "seconds": { "$lt": 10_i64 } } } }));
    }

    #[test]
    fn test_logical_operators_and_existence() {
        assert!(matches(doc! { "$or": [{ "name": "Bob" }, { "age": 30_i64 }] }));
        assert!(!matches(doc! { "$and": [{ "name": "Alice" }, { "age": 31_i64 }] }));
        assert!(matches(doc! { "$nor": [{ "name": "Bob" }] }));
        assert!(matches(doc! { "email": { "$exists": false } }));
        assert!(matches(doc! { "email": Bson::Null }));
        assert!(matches(doc! { "name": { "$in": ["Alice", "Bob"] } }));
    }

    #[test]
    fn test_regex() {
        assert!(matches(doc! { "name": { "$regex": "^ali", "$options": "i" } }));
        assert!(!matches(doc! { "name": { "$regex": "^ali" } }));
        assert!(matches(doc! { "name": { "$not": { "$regex": "bob", "$options": "i" } } }));
        assert!(DocumentEvaluator::new(&user()).evaluate(&doc! { "name": { "$regex": "(" } }).is_err());
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        assert!(DocumentEvaluator::new(&user()).evaluate(&doc! { "age": { "$near": 1 } }).is_err());
        assert!(DocumentEvaluator::new(&user()).evaluate(&doc! { "$where": "1" }).is_err());
    }

    #[test]
    fn test_element_matches() {
        assert_eq!(element_matches(&Bson::Int64(3), &doc! { "$in": [1_i64, 3_i64] }.into()).ok(), Some(true));
        assert_eq!(element_matches(&Bson::Int64(3), &Bson::Int32(3)).ok(), Some(true));
        assert_eq!(
            element_matches(&doc! { "seconds": 5_i64 }.into(), &doc! { "seconds": { "$lt": 10_i64 } }.into()).ok(),
            Some(true)
        );
    }

    #[test]
    fn test_sort_order_across_kinds() {
        assert_eq!(sort_cmp(None, Some(&Bson::Int32(1))), Ordering::Less);
        assert_eq!(sort_cmp(Some(&Bson::Int64(2)), Some(&Bson::Double(1.5))), Ordering::Greater);
        assert_eq!(sort_cmp(Some(&Bson::String("a".into())), Some(&Bson::Int32(9))), Ordering::Greater);
    }
}
