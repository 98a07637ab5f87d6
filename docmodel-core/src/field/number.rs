//! Boolean and numeric fields. The same steps serve both directions.

use crate::{
    error::{StepError, StepResult},
    pipeline::Step,
    value::Value,
};

const TRUTHY: &[&str] = &["on", "true", "yes", "y", "t", "1"];
const FALSY: &[&str] = &["off", "false", "no", "n", "f", "0", ""];

pub(super) fn boolean_steps() -> Vec<Step> {
    vec![Step::constructor(coerce_bool)]
}

pub(super) fn integer_steps() -> Vec<Step> {
    vec![Step::constructor(coerce_int)]
}

pub(super) fn float_steps() -> Vec<Step> {
    vec![Step::constructor(coerce_float)]
}

fn coerce_bool(value: Value) -> StepResult<Value> {
    match value {
        Value::Bool(value) => Ok(Value::Bool(value)),
        Value::Int(value) => Ok(Value::Bool(value != 0)),
        Value::Float(value) => Ok(Value::Bool(value != 0.0)),
        Value::Text(text) => {
            let normalized = text.trim().to_lowercase();
            if TRUTHY.contains(&normalized.as_str()) {
                Ok(Value::Bool(true))
            } else if FALSY.contains(&normalized.as_str()) {
                Ok(Value::Bool(false))
            } else {
                Err(format!("'{}' is not a boolean", text).into())
            }
        }
        other => Err(format!("expected a boolean, got {}", other.type_name()).into()),
    }
}

fn coerce_int(value: Value) -> StepResult<Value> {
    match value {
        Value::Int(value) => Ok(Value::Int(value)),
        Value::Bool(value) => Ok(Value::Int(value as i64)),
        Value::Float(value) => truncate(value),
        Value::Text(text) => {
            let trimmed = text.trim();
            match trimmed.parse::<i64>() {
                Ok(value) => Ok(Value::Int(value)),
                Err(_) => trimmed
                    .parse::<f64>()
                    .map_err(|_| StepError::invalid(format!("'{}' is not a number", text)))
                    .and_then(truncate),
            }
        }
        other => Err(format!("expected an integer, got {}", other.type_name()).into()),
    }
}

fn truncate(value: f64) -> StepResult<Value> {
    if value.is_finite() && value >= i64::MIN as f64 && value < i64::MAX as f64 {
        Ok(Value::Int(value.trunc() as i64))
    } else {
        Err(format!("{} is out of integer range", value).into())
    }
}

fn coerce_float(value: Value) -> StepResult<Value> {
    match value {
        Value::Float(value) => Ok(Value::Float(value)),
        Value::Int(value) => Ok(Value::Float(value as f64)),
        Value::Bool(value) => Ok(Value::Float(if value { 1.0 } else { 0.0 })),
        Value::Text(text) => text
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| format!("'{}' is not a number", text).into()),
        other => Err(format!("expected a number, got {}", other.type_name()).into()),
    }
}

#[cfg(test)]
mod tests {
    use bson::Bson;

    use crate::field::Field;

    use super::*;

    #[test]
    fn test_boolean_words() {
        let field = Field::boolean().build().unwrap();
        for word in ["on", "TRUE", "yes", "1"] {
            assert_eq!(field.to_wire(word), Ok(Bson::Boolean(true)), "{}", word);
        }
        for word in ["off", "False", "no", "0"] {
            assert_eq!(field.to_wire(word), Ok(Bson::Boolean(false)), "{}", word);
        }
        assert!(field.to_wire("maybe").is_err());
    }

    #[test]
    fn test_optional_boolean_null_writes_false() {
        let field = Field::boolean().required(false).build().unwrap();
        assert_eq!(field.to_wire(Value::Null), Ok(Bson::Boolean(false)));
    }

    #[test]
    fn test_integer_coercion() {
        let field = Field::integer().build().unwrap();
        assert_eq!(field.to_wire("42"), Ok(Bson::Int64(42)));
        assert_eq!(field.to_wire("42.9"), Ok(Bson::Int64(42)));
        assert_eq!(field.to_wire(7.5), Ok(Bson::Int64(7)));
        assert_eq!(field.to_logical(Bson::Int32(3)), Ok(Value::Int(3)));
        assert!(field.to_wire("forty").is_err());
        assert!(field.to_wire(f64::INFINITY).is_err());
    }

    #[test]
    fn test_float_coercion() {
        let field = Field::float().build().unwrap();
        assert_eq!(field.to_wire("42."), Ok(Bson::Double(42.0)));
        assert_eq!(field.to_wire(3), Ok(Bson::Double(3.0)));
        assert!(field.to_wire("").is_err());
    }

    #[test]
    fn test_boolean_and_float_round_trip() {
        let boolean = Field::boolean().build().unwrap();
        for value in [Value::Bool(true), Value::Bool(false)] {
            let wire = boolean.to_wire(value.clone()).unwrap();
            assert_eq!(boolean.to_logical(wire), Ok(value));
        }

        let float = Field::float().build().unwrap();
        for value in [Value::Float(2.5), Value::Float(-0.125), Value::Float(1e12)] {
            let wire = float.to_wire(value.clone()).unwrap();
            assert_eq!(float.to_logical(wire), Ok(value));
        }
    }
}
