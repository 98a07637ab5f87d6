//! File fields store a `{content_type, filename, body}` sub-document with a binary body.

use crate::{
    error::StepResult,
    pipeline::Step,
    value::{FilePayload, Value},
};

pub(super) fn file_wire_steps() -> Vec<Step> {
    vec![Step::constructor(load_file)]
}

pub(super) fn file_logical_steps() -> Vec<Step> {
    vec![Step::constructor(load_file)]
}

fn load_file(value: Value) -> StepResult<Value> {
    match value {
        Value::File(_) => Ok(value),
        Value::Binary(body) => Ok(Value::File(FilePayload::new("", "", body))),
        Value::Map(map) => FilePayload::from_map(&map)
            .map(Value::File)
            .map_err(Into::into),
        other => Err(format!("expected a file, got {}", other.type_name()).into()),
    }
}
