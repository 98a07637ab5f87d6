//! Declarative update expressions and their translation into store-native update documents.
//!
//! An [`UpdateExpression`] maps update operators to `path -> value` entries. The
//! [`UpdateTranslator`] resolves every path against a [`Schema`], checks that the operator is
//! allowed on the targeted field, converts values through the field (custom steps
//! suppressed, since operator values are deltas and bounds rather than whole values) and
//! merges the results per operator.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::update::{UpdateExpression, UpdateTranslator};
//!
//! let update = UpdateExpression::new()
//!     .set("profile.age", 30)
//!     .inc("logins", 1)
//!     .push("tags", "new");
//!
//! let doc = UpdateTranslator::new(&schema).translate(&update)?;
//! // { "$set": { "profile": { "age": 30 } }, "$inc": { "logins": 1 }, "$push": { "tags": "new" } }
//! ```

use std::{fmt, str::FromStr};

use bson::{Bson, Document, doc};
use indexmap::IndexMap;
use tracing::trace;

use crate::{
    error::{FieldError, UpdateError, ValidationError},
    field::{Field, FieldKind},
    schema::{Schema, is_positional},
    value::{Value, ValueMap},
};

/// Array update modifiers accepted by `$push` and `$addToSet`.
const MODIFIERS: &[&str] = &["$each", "$slice", "$sort", "$position"];

/// A store update operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UpdateOperator {
    Set,
    Unset,
    SetOnInsert,
    Inc,
    Mul,
    Min,
    Max,
    Bit,
    CurrentDate,
    Push,
    AddToSet,
    Pop,
    Pull,
    PullAll,
}

impl UpdateOperator {
    pub const ALL: [UpdateOperator; 14] = [
        UpdateOperator::Set,
        UpdateOperator::Unset,
        UpdateOperator::SetOnInsert,
        UpdateOperator::Inc,
        UpdateOperator::Mul,
        UpdateOperator::Min,
        UpdateOperator::Max,
        UpdateOperator::Bit,
        UpdateOperator::CurrentDate,
        UpdateOperator::Push,
        UpdateOperator::AddToSet,
        UpdateOperator::Pop,
        UpdateOperator::Pull,
        UpdateOperator::PullAll,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOperator::Set => "$set",
            UpdateOperator::Unset => "$unset",
            UpdateOperator::SetOnInsert => "$setOnInsert",
            UpdateOperator::Inc => "$inc",
            UpdateOperator::Mul => "$mul",
            UpdateOperator::Min => "$min",
            UpdateOperator::Max => "$max",
            UpdateOperator::Bit => "$bit",
            UpdateOperator::CurrentDate => "$currentDate",
            UpdateOperator::Push => "$push",
            UpdateOperator::AddToSet => "$addToSet",
            UpdateOperator::Pop => "$pop",
            UpdateOperator::Pull => "$pull",
            UpdateOperator::PullAll => "$pullAll",
        }
    }
}

impl fmt::Display for UpdateOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateOperator {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UpdateOperator::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UpdateError::UnknownOperator(s.to_string()))
    }
}

/// An ordered `operator -> (path -> value)` update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateExpression {
    operations: IndexMap<UpdateOperator, ValueMap>,
}

impl UpdateExpression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `path -> value` under `op`. A repeated path under the same operator replaces the
    /// previous value.
    pub fn with(mut self, op: UpdateOperator, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.operations
            .entry(op)
            .or_default()
            .insert(path.into(), value.into());
        self
    }

    pub fn set(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(UpdateOperator::Set, path, value)
    }

    pub fn unset(self, path: impl Into<String>) -> Self {
        self.with(UpdateOperator::Unset, path, "")
    }

    pub fn set_on_insert(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(UpdateOperator::SetOnInsert, path, value)
    }

    pub fn inc(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(UpdateOperator::Inc, path, value)
    }

    pub fn mul(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(UpdateOperator::Mul, path, value)
    }

    pub fn min(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(UpdateOperator::Min, path, value)
    }

    pub fn max(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(UpdateOperator::Max, path, value)
    }

    pub fn current_date(self, path: impl Into<String>) -> Self {
        self.with(UpdateOperator::CurrentDate, path, true)
    }

    pub fn push(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(UpdateOperator::Push, path, value)
    }

    pub fn add_to_set(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(UpdateOperator::AddToSet, path, value)
    }

    /// Removes the last (`1`) or first (`-1`) element of a list.
    pub fn pop(self, path: impl Into<String>, end: i64) -> Self {
        self.with(UpdateOperator::Pop, path, end)
    }

    pub fn pull(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(UpdateOperator::Pull, path, value)
    }

    pub fn pull_all(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(UpdateOperator::PullAll, path, value)
    }

    pub fn is_empty(&self) -> bool {
        self.operations.values().all(ValueMap::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (UpdateOperator, &ValueMap)> {
        self.operations.iter().map(|(op, entries)| (*op, entries))
    }

    /// Reads an update written in store syntax, e.g. `{"$set": {"name": "x"}}`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::UnknownOperator`] for an unrecognized operator key and
    /// [`UpdateError::Malformed`] when an operator's entries are not a mapping.
    pub fn from_value(value: Value) -> Result<Self, UpdateError> {
        let Value::Map(map) = value else {
            return Err(UpdateError::Malformed(format!(
                "expected a mapping of operators, got {}",
                value.type_name()
            )));
        };

        let mut operations: IndexMap<UpdateOperator, ValueMap> = IndexMap::new();
        for (key, entries) in map {
            let op: UpdateOperator = key.parse()?;
            let Value::Map(entries) = entries else {
                return Err(UpdateError::Malformed(format!("{} expects a mapping of paths", op)));
            };
            operations.entry(op).or_default().extend(entries);
        }

        Ok(Self { operations })
    }

    pub fn from_document(doc: &Document) -> Result<Self, UpdateError> {
        Self::from_value(Value::from(Bson::Document(doc.clone())))
    }
}

/// Validates and translates [`UpdateExpression`]s against one schema.
#[derive(Debug, Clone, Copy)]
pub struct UpdateTranslator<'a> {
    schema: &'a Schema,
}

impl<'a> UpdateTranslator<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Produces the store-native update document.
    ///
    /// # Errors
    ///
    /// - [`UpdateError::Field`] when a path does not resolve in the schema
    /// - [`UpdateError::Validation`] when an operator is not allowed on the targeted field,
    ///   a required field is unset, or a value is rejected by its field
    pub fn translate(&self, update: &UpdateExpression) -> Result<Document, UpdateError> {
        let mut translated = Document::new();

        for (op, entries) in update.iter() {
            let mut converted = Document::new();
            let mut elements = Vec::new();
            for (path, value) in entries {
                if replaces_element(op, path) {
                    elements.push((path.clone(), self.translate_element(op, path, value.clone())?));
                    continue;
                }
                let (name, value) = expand_path(path, value.clone());
                let wire = translate_key(self.schema, op, &name, value)?;
                merge_entry(&mut converted, name, wire);
            }

            // Nested documents mean replacement only under $set and $setOnInsert.
            let expand_embedded = !matches!(op, UpdateOperator::Set | UpdateOperator::SetOnInsert);
            let mut flattened = Document::new();
            for (name, wire) in converted {
                let field = self.schema.require(&name)?;
                flatten_paths(&mut flattened, field, name, wire, expand_embedded);
            }
            for (path, wire) in elements {
                flattened.insert(path, wire);
            }

            trace!(schema = %self.schema.name(), operator = %op, paths = entries.len(), "Translated update operator");

            if !flattened.is_empty() {
                translated.insert(op.as_str(), flattened);
            }
        }

        Ok(translated)
    }

    /// Converts a whole list element addressed by a path ending in a positional segment.
    fn translate_element(&self, op: UpdateOperator, path: &str, value: Value) -> Result<Bson, UpdateError> {
        let element = self.schema.resolve_path(path)?;
        check_allowed(element, op).map_err(|err| under(err, path))?;
        element
            .to_wire_operand(value)
            .map_err(|err| under(err.into(), path))
    }
}

/// `$set`/`$setOnInsert` on `list.<positional>` replace the element instead of merging into it.
fn replaces_element(op: UpdateOperator, path: &str) -> bool {
    matches!(op, UpdateOperator::Set | UpdateOperator::SetOnInsert)
        && path.rsplit_once('.').is_some_and(|(_, last)| is_positional(last))
}

/// Splits `a.b.c` into `a` and the nested value `{b: {c: value}}`.
fn expand_path(path: &str, value: Value) -> (String, Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let head = segments.remove(0).to_string();

    let nested = segments
        .into_iter()
        .rev()
        .fold(value, |inner, segment| Value::map([(segment, inner)]));

    (head, nested)
}

/// Deep-merges `value` into `doc[name]` when both sides are documents.
fn merge_entry(doc: &mut Document, name: String, value: Bson) {
    match value {
        Bson::Document(incoming) if matches!(doc.get(&name), Some(Bson::Document(_))) => {
            if let Some(Bson::Document(existing)) = doc.get_mut(&name) {
                for (key, inner) in incoming {
                    merge_entry(existing, key, inner);
                }
            }
        }
        value => {
            doc.insert(name, value);
        }
    }
}

/// Whether `wire` holds a positional segment somewhere below `field`.
fn contains_positional(field: &Field, wire: &Bson) -> bool {
    match (field.kind(), wire) {
        (FieldKind::List(_) | FieldKind::Set(_), Bson::Document(doc)) => doc.keys().any(|key| is_positional(key)),
        (FieldKind::Embedded(schema), Bson::Document(doc)) => embedded_contains_positional(schema, doc),
        _ => false,
    }
}

fn embedded_contains_positional(schema: &Schema, doc: &Document) -> bool {
    doc.iter()
        .any(|(key, inner)| schema.field(key).is_some_and(|nested| contains_positional(nested, inner)))
}

/// Rewrites translated values into dotted store paths where nesting would change meaning.
///
/// Positional segments always become part of the path: `{scores: {"$": 2}}` turns into
/// `{"scores.$": 2}`. Embedded values are expanded into dotted leaf paths when
/// `expand_embedded` is set or when they sit below a positional segment.
fn flatten_paths(out: &mut Document, field: &Field, path: String, wire: Bson, expand_embedded: bool) {
    match (field.kind(), wire) {
        (FieldKind::List(element) | FieldKind::Set(element), Bson::Document(doc))
            if doc.keys().any(|key| is_positional(key)) =>
        {
            for (key, inner) in doc {
                let nested = format!("{}.{}", path, key);
                if is_positional(&key) {
                    flatten_paths(out, element, nested, inner, true);
                } else {
                    out.insert(nested, inner);
                }
            }
        }
        (FieldKind::Embedded(schema), Bson::Document(doc))
            if !doc.is_empty() && (expand_embedded || embedded_contains_positional(schema, &doc)) =>
        {
            for (key, inner) in doc {
                let nested = format!("{}.{}", path, key);
                match schema.field(&key) {
                    Some(child) => flatten_paths(out, child, nested, inner, expand_embedded),
                    None => {
                        out.insert(nested, inner);
                    }
                }
            }
        }
        (_, wire) => {
            out.insert(path, wire);
        }
    }
}

/// Re-scopes an error raised below `parent`.
fn under(err: UpdateError, parent: &str) -> UpdateError {
    if parent.is_empty() {
        return err;
    }
    match err {
        UpdateError::Field(err) => UpdateError::Field(FieldError::new(format!("{}.{}", parent, err.name), err.schema)),
        UpdateError::Validation(err) => UpdateError::Validation(err.nested_under(parent)),
        other => other,
    }
}

fn invalid(field: &Field, message: impl Into<String>) -> UpdateError {
    UpdateError::Validation(ValidationError::new(field.label(), field.kind().type_name(), message))
}

fn check_allowed(field: &Field, op: UpdateOperator) -> Result<(), UpdateError> {
    if op == UpdateOperator::Unset && field.is_required() {
        return Err(invalid(field, "required field cannot be unset"));
    }
    if !field.allows(op) {
        return Err(invalid(field, format!("operator {} is not allowed", op)));
    }
    Ok(())
}

fn translate_key(schema: &Schema, op: UpdateOperator, name: &str, value: Value) -> Result<Bson, UpdateError> {
    let field = schema.require(name)?;
    translate_field(field, op, value)
}

fn translate_field(field: &Field, op: UpdateOperator, value: Value) -> Result<Bson, UpdateError> {
    match (field.kind(), value) {
        (FieldKind::Embedded(schema), Value::Map(map)) if !map.is_empty() => {
            let mut doc = Document::new();
            for (key, nested) in map {
                let (name, nested) = expand_path(&key, nested);
                let wire = translate_key(schema, op, &name, nested).map_err(|err| under(err, field.label()))?;
                merge_entry(&mut doc, name, wire);
            }
            Ok(Bson::Document(doc))
        }
        (FieldKind::List(element) | FieldKind::Set(element), value) => {
            translate_sequence(field, element, op, value)
        }
        (_, value) => translate_leaf(field, op, value),
    }
}

/// Whole-value operations on a single field.
fn translate_leaf(field: &Field, op: UpdateOperator, value: Value) -> Result<Bson, UpdateError> {
    check_allowed(field, op)?;

    match op {
        UpdateOperator::Unset => Ok(Bson::String(String::new())),
        // A BSON timestamp would not read back as a date, so only dates are written.
        UpdateOperator::CurrentDate => match value {
            Value::Bool(true) => Ok(Bson::Boolean(true)),
            Value::Map(map) if map.len() == 1 && map.get("$type").and_then(Value::as_str) == Some("date") => {
                Ok(Bson::Document(doc! { "$type": "date" }))
            }
            _ => Err(invalid(field, "$currentDate expects true or {\"$type\": \"date\"}")),
        },
        UpdateOperator::Bit => {
            let Value::Map(map) = value else {
                return Err(invalid(field, "$bit expects a mapping of and/or/xor"));
            };
            if map.is_empty() {
                return Err(invalid(field, "$bit expects a mapping of and/or/xor"));
            }
            let mut bits = Document::new();
            for (key, operand) in map {
                if !matches!(key.as_str(), "and" | "or" | "xor") {
                    return Err(invalid(field, format!("'{}' is not a bitwise operation", key)));
                }
                bits.insert(key, field.to_wire_operand(operand)?);
            }
            Ok(Bson::Document(bits))
        }
        _ => Ok(field.to_wire_operand(value)?),
    }
}

fn translate_sequence(field: &Field, element: &Field, op: UpdateOperator, value: Value) -> Result<Bson, UpdateError> {
    if let Value::Map(map) = &value {
        if map.keys().any(|key| key.starts_with('$') || is_positional(key)) {
            return translate_directives(field, element, op, map.clone());
        }
        if op == UpdateOperator::Pull && element.kind().schema().is_some() {
            check_allowed(field, op)?;
            return translate_element_conditions(field, element, map.clone());
        }
    }

    match op {
        UpdateOperator::Pop => {
            check_allowed(field, op)?;
            match value {
                Value::Int(end @ (1 | -1)) => Ok(Bson::Int64(end)),
                _ => Err(invalid(field, "$pop accepts only 1 or -1")),
            }
        }
        UpdateOperator::PullAll => {
            check_allowed(field, op)?;
            match value {
                Value::List(items) | Value::Set(items) => convert_elements(field, element, items),
                other => Err(invalid(field, format!("$pullAll expects a list, got {}", other.type_name()))),
            }
        }
        UpdateOperator::Push | UpdateOperator::AddToSet | UpdateOperator::Pull => {
            check_allowed(field, op)?;
            match value {
                Value::List(items) | Value::Set(items) => convert_elements(field, element, items),
                other => element
                    .to_wire_operand(other)
                    .map_err(|err| under(err.into(), field.label())),
            }
        }
        _ => translate_leaf(field, op, value),
    }
}

fn convert_elements(field: &Field, element: &Field, items: Vec<Value>) -> Result<Bson, UpdateError> {
    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            element
                .to_wire_operand(item)
                .map_err(|err| under(under(err.into(), &idx.to_string()), field.label()))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Bson::Array)
}

/// Maps keyed by positional markers, array modifiers or `$pull` condition operators.
fn translate_directives(field: &Field, element: &Field, op: UpdateOperator, map: ValueMap) -> Result<Bson, UpdateError> {
    let mut doc = Document::new();

    for (key, value) in map {
        let wire = if is_positional(&key) {
            translate_field(element, op, value).map_err(|err| under(under(err, &key), field.label()))?
        } else if MODIFIERS.contains(&key.as_str()) {
            if !matches!(op, UpdateOperator::Push | UpdateOperator::AddToSet) {
                return Err(invalid(field, format!("{} is only valid with $push and $addToSet", key)));
            }
            check_allowed(field, op)?;
            translate_modifier(field, element, &key, value)?
        } else if key.starts_with('$') {
            if op != UpdateOperator::Pull {
                return Err(invalid(field, format!("{} is only valid with $pull", key)));
            }
            check_allowed(field, op)?;
            translate_condition(element, &key, value).map_err(|err| under(err, field.label()))?
        } else {
            return Err(invalid(
                field,
                format!("'{}' cannot be combined with positional or operator keys", key),
            ));
        };

        doc.insert(key, wire);
    }

    Ok(Bson::Document(doc))
}

fn translate_modifier(field: &Field, element: &Field, key: &str, value: Value) -> Result<Bson, UpdateError> {
    match (key, value) {
        ("$each", Value::List(items) | Value::Set(items)) => convert_elements(field, element, items),
        ("$each", _) => Err(invalid(field, "$each expects a list")),
        ("$slice" | "$position", Value::Int(n)) => Ok(Bson::Int64(n)),
        ("$slice" | "$position", _) => Err(invalid(field, format!("{} expects an integer", key))),
        ("$sort", Value::Int(direction @ (1 | -1))) => Ok(Bson::Int64(direction)),
        ("$sort", Value::Map(directions)) => {
            let mut sort = Document::new();
            for (path, direction) in directions {
                if let Some(schema) = element.kind().schema() {
                    schema
                        .resolve_path(&path)
                        .map_err(|err| under(err.into(), field.label()))?;
                }
                match direction {
                    Value::Int(direction @ (1 | -1)) => sort.insert(path, direction),
                    _ => return Err(invalid(field, "$sort directions must be 1 or -1")),
                };
            }
            Ok(Bson::Document(sort))
        }
        _ => Err(invalid(field, "$sort expects 1, -1 or a mapping of directions")),
    }
}

/// A query-operator condition (`$in`, `$gte`, ...) on values of `target`.
fn translate_condition(target: &Field, key: &str, operand: Value) -> Result<Bson, UpdateError> {
    match (key, operand) {
        ("$exists", Value::Bool(exists)) => Ok(Bson::Boolean(exists)),
        ("$in" | "$nin" | "$all", Value::List(items) | Value::Set(items)) => items
            .into_iter()
            .map(|item| target.to_wire_operand(item).map_err(UpdateError::from))
            .collect::<Result<Vec<_>, _>>()
            .map(Bson::Array),
        (_, operand) => Ok(target.to_wire_operand(operand)?),
    }
}

/// `$pull` conditions on fields of embedded-document elements.
fn translate_element_conditions(field: &Field, element: &Field, conditions: ValueMap) -> Result<Bson, UpdateError> {
    let Some(schema) = element.kind().schema() else {
        return Err(invalid(field, "conditions require embedded-document elements"));
    };

    let mut doc = Document::new();
    for (path, condition) in conditions {
        let target = schema
            .resolve_path(&path)
            .map_err(|err| under(err.into(), field.label()))?;

        let wire = match condition {
            Value::Map(operators) if !operators.is_empty() && operators.keys().all(|k| k.starts_with('$')) => {
                let mut ops = Document::new();
                for (key, operand) in operators {
                    ops.insert(key.clone(), translate_condition(target, &key, operand).map_err(|err| under(err, field.label()))?);
                }
                Bson::Document(ops)
            }
            other => target
                .to_wire_operand(other)
                .map_err(|err| under(err.into(), field.label()))?,
        };
        doc.insert(path, wire);
    }

    Ok(Bson::Document(doc))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bson::doc;

    use super::*;
    use crate::{field::FieldBuilder, pipeline::Step};

    fn schema() -> Schema {
        let profile = Arc::new(
            Schema::builder("Profile")
                .field("age", Field::integer())
                .field("city", Field::text().required(false))
                .build()
                .unwrap(),
        );
        let visit = Arc::new(
            Schema::builder("Visit")
                .field("page", Field::text())
                .field("seconds", Field::integer().required(false))
                .build()
                .unwrap(),
        );
        let positive = Step::constructor(|value| match value {
            Value::Int(n) if n < 0 => Err("must be positive".into()),
            other => Ok(other),
        });

        Schema::builder("User")
            .field("name", Field::text())
            .field("nickname", Field::text().required(false))
            .field("count", Field::integer().default(0).to_wire_step(positive))
            .field("ratio", Field::float().required(false))
            .field("profile", Field::embedded(profile).required(false))
            .field("tags", Field::list(Field::text().build().unwrap()).required(false))
            .field("scores", Field::list(Field::integer().build().unwrap()).required(false))
            .field("visits", Field::list(Field::embedded(visit).build().unwrap()).required(false))
            .field("seen", Field::datetime().required(false))
            .build()
            .unwrap()
    }

    fn translate(update: UpdateExpression) -> Result<Document, UpdateError> {
        UpdateTranslator::new(&schema()).translate(&update)
    }

    #[test]
    fn test_operator_round_trip() {
        for op in UpdateOperator::ALL {
            assert_eq!(op.as_str().parse::<UpdateOperator>(), Ok(op));
        }
        assert_eq!(
            "$rename".parse::<UpdateOperator>(),
            Err(UpdateError::UnknownOperator("$rename".into()))
        );
    }

    #[test]
    fn test_inc_skips_custom_steps() {
        assert_eq!(
            translate(UpdateExpression::new().inc("count", -3)),
            Ok(doc! { "$inc": { "count": -3_i64 } })
        );
    }

    #[test]
    fn test_dotted_path_equivalence() {
        let dotted = translate(UpdateExpression::new().set("profile.age", 30));
        let nested = translate(UpdateExpression::new().set("profile", Value::map([("age", 30)])));

        assert_eq!(dotted, Ok(doc! { "$set": { "profile": { "age": 30_i64 } } }));
        assert_eq!(dotted, nested);
    }

    #[test]
    fn test_embedded_paths_are_dotted_outside_set() {
        assert_eq!(
            translate(UpdateExpression::new().inc("profile.age", 1)),
            Ok(doc! { "$inc": { "profile.age": 1_i64 } })
        );
        assert_eq!(
            translate(UpdateExpression::new().unset("profile.city").set("profile.age", 3)),
            Ok(doc! { "$unset": { "profile.city": "" }, "$set": { "profile": { "age": 3_i64 } } })
        );
    }

    #[test]
    fn test_shared_prefix_merges() {
        let update = UpdateExpression::new()
            .set("profile.age", "41")
            .set("profile.city", "Lisbon")
            .set("name", "Ana");

        assert_eq!(
            translate(update),
            Ok(doc! { "$set": { "profile": { "age": 41_i64, "city": "Lisbon" }, "name": "Ana" } })
        );
    }

    #[test]
    fn test_unknown_path() {
        assert_eq!(
            translate(UpdateExpression::new().set("profile.zip", "1000")),
            Err(UpdateError::Field(FieldError::new("profile.zip", "Profile")))
        );
        assert!(matches!(
            translate(UpdateExpression::new().set("nope", 1)),
            Err(UpdateError::Field(_))
        ));
    }

    #[test]
    fn test_operator_whitelist() {
        let err = translate(UpdateExpression::new().inc("name", 1)).unwrap_err();
        assert!(matches!(err, UpdateError::Validation(ref e) if e.field == "name" && e.kind == "TextField"));

        assert!(translate(UpdateExpression::new().mul("ratio", 2.5)).is_ok());
        assert!(translate(UpdateExpression::new().with(UpdateOperator::Bit, "ratio", Value::map([("and", 1)]))).is_err());
        assert!(translate(UpdateExpression::new().push("name", "x")).is_err());
    }

    #[test]
    fn test_whitelist_covers_every_variant() {
        use UpdateOperator::*;

        const BASE: &[UpdateOperator] = &[Set, Unset, SetOnInsert];
        const INTEGER: &[UpdateOperator] = &[Set, Unset, SetOnInsert, Inc, Mul, Min, Max, Bit];
        const FLOAT: &[UpdateOperator] = &[Set, Unset, SetOnInsert, Inc, Mul, Min, Max];
        const TEMPORAL: &[UpdateOperator] = &[Set, SetOnInsert, Min, Max, CurrentDate];
        const TIMESTAMP: &[UpdateOperator] = &[Set, Unset, SetOnInsert, Inc, Min, Max];
        const SEQUENCE: &[UpdateOperator] = &[Set, Unset, SetOnInsert, Push, AddToSet, Pop, Pull, PullAll];

        let nested = Arc::new(Schema::builder("Nested").field("x", Field::integer()).build().unwrap());
        let text = || Field::text().build().unwrap();
        let table: Vec<(&str, FieldBuilder, &[UpdateOperator])> = vec![
            ("text", Field::text(), BASE),
            ("email", Field::email(), BASE),
            ("url", Field::url(), BASE),
            ("boolean", Field::boolean(), BASE),
            ("integer", Field::integer(), INTEGER),
            ("float", Field::float(), FLOAT),
            ("list", Field::list(text()), SEQUENCE),
            ("set", Field::set(text()), SEQUENCE),
            ("datetime", Field::datetime(), TEMPORAL),
            ("date", Field::date(), TEMPORAL),
            ("timestamp", Field::timestamp(), TIMESTAMP),
            ("uuid", Field::uuid(), BASE),
            ("object_id", Field::object_id(), BASE),
            ("embedded", Field::embedded(nested), BASE),
            ("file", Field::file(), BASE),
            ("json", Field::json(), BASE),
            ("dict", Field::dict(), BASE),
        ];

        let mut builder = Schema::builder("Everything");
        for (name, field, _) in &table {
            builder = builder.field(*name, field.clone().required(false));
        }
        let schema = builder.build().unwrap();
        let translator = UpdateTranslator::new(&schema);

        for (name, _, allowed) in &table {
            for op in UpdateOperator::ALL {
                let result = translator.translate(&UpdateExpression::new().with(op, *name, 1));
                let rejected = matches!(
                    result,
                    Err(UpdateError::Validation(ref e)) if e.message.contains("is not allowed")
                );
                assert_eq!(rejected, !allowed.contains(&op), "{} on {}: {:?}", op, name, result);
            }
        }
    }

    #[test]
    fn test_unset() {
        assert_eq!(
            translate(UpdateExpression::new().unset("nickname")),
            Ok(doc! { "$unset": { "nickname": "" } })
        );

        let err = translate(UpdateExpression::new().unset("name")).unwrap_err();
        assert!(matches!(err, UpdateError::Validation(ref e) if e.message.contains("cannot be unset")));

        let err = translate(UpdateExpression::new().unset("profile.age")).unwrap_err();
        assert!(matches!(err, UpdateError::Validation(ref e) if e.field == "profile.age"));
    }

    #[test]
    fn test_value_errors_are_field_scoped() {
        let err = translate(UpdateExpression::new().set("profile.age", "old")).unwrap_err();
        assert!(matches!(err, UpdateError::Validation(ref e) if e.field == "profile.age" && e.kind == "IntegerField"));
    }

    #[test]
    fn test_current_date_and_bit() {
        assert_eq!(
            translate(UpdateExpression::new().current_date("seen")),
            Ok(doc! { "$currentDate": { "seen": true } })
        );
        assert_eq!(
            translate(UpdateExpression::new().with(
                UpdateOperator::CurrentDate,
                "seen",
                Value::map([("$type", "date")])
            )),
            Ok(doc! { "$currentDate": { "seen": { "$type": "date" } } })
        );

        let err = translate(UpdateExpression::new().with(
            UpdateOperator::CurrentDate,
            "seen",
            Value::map([("$type", "timestamp")]),
        ))
        .unwrap_err();
        assert!(matches!(err, UpdateError::Validation(ref e) if e.field == "seen" && e.kind == "DateTimeField"));
        assert_eq!(
            translate(UpdateExpression::new().with(UpdateOperator::Bit, "count", Value::map([("or", "5")]))),
            Ok(doc! { "$bit": { "count": { "or": 5_i64 } } })
        );
        assert!(translate(UpdateExpression::new().with(UpdateOperator::Bit, "count", Value::map([("nand", 1)]))).is_err());
    }

    #[test]
    fn test_list_elements_and_modifiers() {
        assert_eq!(
            translate(UpdateExpression::new().push("scores", "7")),
            Ok(doc! { "$push": { "scores": 7_i64 } })
        );
        assert_eq!(
            translate(UpdateExpression::new().add_to_set(
                "scores",
                Value::map([
                    ("$each", Value::list(["1", "2"])),
                    ("$slice", Value::from(-5)),
                    ("$sort", Value::from(1)),
                ])
            )),
            Ok(doc! { "$addToSet": { "scores": { "$each": [1_i64, 2_i64], "$slice": -5_i64, "$sort": 1_i64 } } })
        );

        let err = translate(UpdateExpression::new().push("scores", Value::list(["1", "x"]))).unwrap_err();
        assert!(matches!(err, UpdateError::Validation(ref e) if e.field == "scores.1"));

        assert!(translate(UpdateExpression::new().push("scores", Value::map([("$slice", "many")]))).is_err());
        assert!(translate(UpdateExpression::new().pull("scores", Value::map([("$each", Value::list([1]))]))).is_err());
    }

    #[test]
    fn test_pop_and_pull_all() {
        assert_eq!(
            translate(UpdateExpression::new().pop("tags", -1)),
            Ok(doc! { "$pop": { "tags": -1_i64 } })
        );
        assert!(translate(UpdateExpression::new().pop("tags", 2)).is_err());
        assert_eq!(
            translate(UpdateExpression::new().pull_all("scores", Value::list(["1", "2"]))),
            Ok(doc! { "$pullAll": { "scores": [1_i64, 2_i64] } })
        );
    }

    #[test]
    fn test_positional_paths() {
        assert_eq!(
            translate(UpdateExpression::new().inc("scores.$", 2)),
            Ok(doc! { "$inc": { "scores.$": 2_i64 } })
        );
        assert_eq!(
            translate(UpdateExpression::new().set("visits.$[].seconds", "30")),
            Ok(doc! { "$set": { "visits.$[].seconds": 30_i64 } })
        );
        assert_eq!(
            translate(UpdateExpression::new().set("visits.$", Value::map([("page", "home"), ("seconds", "5")]))),
            Ok(doc! { "$set": { "visits.$": { "page": "home", "seconds": 5_i64 } } })
        );
        assert_eq!(
            translate(UpdateExpression::new().set("scores.1", "4").set("name", "Ana")),
            Ok(doc! { "$set": { "name": "Ana", "scores.1": 4_i64 } })
        );

        let err = translate(UpdateExpression::new().inc("tags.0", 1)).unwrap_err();
        assert!(matches!(err, UpdateError::Validation(ref e) if e.field == "tags.0"));
    }

    #[test]
    fn test_positional_set_replaces_whole_element() {
        let err = translate(UpdateExpression::new().set("visits.0", Value::map([("seconds", 5)]))).unwrap_err();
        assert!(matches!(err, UpdateError::Validation(ref e) if e.field == "visits.0.page" && e.message == "value required"));

        let err = translate(UpdateExpression::new().set_on_insert("scores.$", "many")).unwrap_err();
        assert!(matches!(err, UpdateError::Validation(ref e) if e.field == "scores.$" && e.kind == "IntegerField"));

        assert_eq!(
            translate(UpdateExpression::new().set("visits.0.seconds", 5)),
            Ok(doc! { "$set": { "visits.0.seconds": 5_i64 } })
        );
        assert!(matches!(
            translate(UpdateExpression::new().set("visits.0", Value::map([("page", "home"), ("referrer", "x")]))),
            Err(UpdateError::Validation(_) | UpdateError::Field(_))
        ));
    }

    #[test]
    fn test_pull_conditions_on_embedded_elements() {
        assert_eq!(
            translate(UpdateExpression::new().pull(
                "visits",
                Value::map([("seconds", Value::map([("$lt", "10")]))])
            )),
            Ok(doc! { "$pull": { "visits": { "seconds": { "$lt": 10_i64 } } } })
        );
        assert_eq!(
            translate(UpdateExpression::new().pull("scores", Value::map([("$in", Value::list(["1", "2"]))]))),
            Ok(doc! { "$pull": { "scores": { "$in": [1_i64, 2_i64] } } })
        );
        assert!(matches!(
            translate(UpdateExpression::new().pull("visits", Value::map([("referrer", "x")]))),
            Err(UpdateError::Field(_))
        ));
    }

    #[test]
    fn test_from_document() {
        let update = UpdateExpression::from_document(&doc! { "$set": { "name": "x" }, "$inc": { "count": 1 } }).unwrap();
        assert_eq!(update, UpdateExpression::new().set("name", "x").inc("count", 1_i64));

        assert_eq!(
            UpdateExpression::from_document(&doc! { "$rename": { "a": "b" } }),
            Err(UpdateError::UnknownOperator("$rename".into()))
        );
        assert!(matches!(
            UpdateExpression::from_document(&doc! { "$set": 1 }),
            Err(UpdateError::Malformed(_))
        ));
    }
}
