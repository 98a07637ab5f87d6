//! List, set and embedded document fields.
//!
//! Elements of a list or set run through the element field's complete pipeline, and errors
//! are reported as `field.index`. Embedded documents are checked against their nested schema
//! and errors are reported as `field.nested_field`.

use bson::Bson;

use super::{Field, FieldKind};
use crate::{
    error::{StepError, StepResult},
    pipeline::Step,
    value::{Value, ValueMap, document_into_map, map_into_document},
};

pub(super) fn sequence_wire_steps() -> Vec<Step> {
    vec![Step::contextual(sequence_to_wire)]
}

pub(super) fn sequence_logical_steps() -> Vec<Step> {
    vec![Step::contextual(sequence_to_logical)]
}

pub(super) fn embedded_wire_steps() -> Vec<Step> {
    vec![Step::contextual(embedded_to_wire)]
}

pub(super) fn embedded_logical_steps() -> Vec<Step> {
    vec![Step::contextual(embedded_to_logical)]
}

fn element_of(field: &Field) -> StepResult<&Field> {
    field
        .kind()
        .element()
        .ok_or_else(|| StepError::invalid("sequence step used on a non-sequence field"))
}

fn items(value: Value) -> StepResult<Vec<Value>> {
    match value {
        Value::List(items) | Value::Set(items) => Ok(items),
        other => Err(format!("expected a list, got {}", other.type_name()).into()),
    }
}

fn sequence_to_wire(value: Value, field: &Field) -> StepResult<Value> {
    let element = element_of(field)?;
    let mut wire: Vec<Bson> = Vec::new();

    for (idx, item) in items(value)?.into_iter().enumerate() {
        let converted = element
            .to_wire(item)
            .map_err(|err| err.nested_under(&idx.to_string()).nested_under(field.label()))?;

        if matches!(field.kind(), FieldKind::Set(_)) && wire.contains(&converted) {
            continue;
        }
        wire.push(converted);
    }

    Ok(Value::List(wire.into_iter().map(Value::from).collect()))
}

fn sequence_to_logical(value: Value, field: &Field) -> StepResult<Value> {
    let element = element_of(field)?;
    let mut logical = Vec::new();

    for (idx, item) in items(value)?.into_iter().enumerate() {
        let converted = element
            .to_logical(item.into_bson())
            .map_err(|err| err.nested_under(&idx.to_string()).nested_under(field.label()))?;
        logical.push(converted);
    }

    match field.kind() {
        FieldKind::Set(_) => {
            let mut unique: Vec<Value> = Vec::with_capacity(logical.len());
            for item in logical {
                if !unique.contains(&item) {
                    unique.push(item);
                }
            }
            Ok(Value::Set(unique))
        }
        _ => Ok(Value::List(logical)),
    }
}

fn embedded_map(value: Value) -> StepResult<ValueMap> {
    match value {
        Value::Map(map) => Ok(map),
        other => Err(format!("expected a mapping, got {}", other.type_name()).into()),
    }
}

fn embedded_to_wire(value: Value, field: &Field) -> StepResult<Value> {
    let schema = field
        .kind()
        .schema()
        .ok_or_else(|| StepError::invalid("embedded step used on a non-embedded field"))?;
    let map = embedded_map(value)?;

    // An empty mapping is stored as is, defaults are not filled in.
    if map.is_empty() {
        return Ok(Value::Map(map));
    }

    schema
        .to_wire(&map)
        .map(|doc| Value::Map(document_into_map(doc)))
        .map_err(|err| err.nested_under(field.label()).into())
}

fn embedded_to_logical(value: Value, field: &Field) -> StepResult<Value> {
    let schema = field
        .kind()
        .schema()
        .ok_or_else(|| StepError::invalid("embedded step used on a non-embedded field"))?;
    let doc = map_into_document(embedded_map(value)?);

    schema
        .to_logical(&doc, None)
        .map(Value::Map)
        .map_err(|err| err.nested_under(field.label()).into())
}
