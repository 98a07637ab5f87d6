//! Text-like fields: plain text, email, URL, JSON blobs and free-form maps.

use std::sync::LazyLock;

use base64::{Engine, engine::general_purpose::STANDARD};
use regex::Regex;
use serde_json::{Map as JsonMap, Number, Value as JsonValue};

use super::{Field, FieldKind};
use crate::{
    error::StepResult,
    pipeline::Step,
    value::{Value, ValueMap, iso_naive_datetime},
};

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(http|https)://(.*)?((\.\w{2})|(\.\w{3}))$").expect("URL pattern is valid")
});

pub(super) fn text_steps() -> Vec<Step> {
    vec![Step::constructor(coerce_text), Step::contextual(reject_empty)]
}

pub(super) fn email_steps() -> Vec<Step> {
    vec![Step::constructor(validate_email)]
}

pub(super) fn url_steps() -> Vec<Step> {
    vec![Step::contextual(add_scheme), Step::constructor(validate_url)]
}

pub(super) fn json_wire_steps() -> Vec<Step> {
    vec![Step::constructor(encode_json)]
}

pub(super) fn json_logical_steps() -> Vec<Step> {
    vec![Step::constructor(decode_json)]
}

pub(super) fn dict_steps() -> Vec<Step> {
    vec![Step::constructor(|value| match value {
        Value::Map(map) => Ok(Value::Map(map)),
        other => Err(format!("expected a mapping, got {}", other.type_name()).into()),
    })]
}

fn coerce_text(value: Value) -> StepResult<Value> {
    let text = match value {
        Value::Text(text) => text,
        Value::Bool(value) => value.to_string(),
        Value::Int(value) => value.to_string(),
        Value::Float(value) => value.to_string(),
        Value::Uuid(value) => value.hyphenated().to_string(),
        Value::ObjectId(value) => value.to_hex(),
        Value::Date(value) => value.format("%Y-%m-%d").to_string(),
        Value::NaiveDateTime(value) => iso_naive_datetime(&value),
        Value::DateTime(value) => value.to_rfc3339(),
        other => return Err(format!("expected text, got {}", other.type_name()).into()),
    };

    Ok(Value::Text(text))
}

fn reject_empty(value: Value, field: &Field) -> StepResult<Value> {
    match value {
        Value::Text(text) if text.trim().is_empty() => {
            if field.is_required() {
                Err("value can't be empty".into())
            } else {
                Ok(Value::Null)
            }
        }
        other => Ok(other),
    }
}

fn validate_email(value: Value) -> StepResult<Value> {
    let text = value.as_str().unwrap_or_default();
    let at = text.find('@');
    let dot = text.rfind('.');

    match (at, dot) {
        (Some(at), Some(dot)) if at > 0 && dot > at + 2 && dot + 2 < text.len() => Ok(value),
        _ => Err(format!("{} is not a valid email address", text).into()),
    }
}

fn add_scheme(value: Value, field: &Field) -> StepResult<Value> {
    let https = matches!(field.kind(), FieldKind::Url { https: true });

    match value {
        Value::Text(text) if !text.contains("://") => {
            let scheme = if https { "https" } else { "http" };
            Ok(Value::Text(format!("{}://{}", scheme, text)))
        }
        other => Ok(other),
    }
}

fn validate_url(value: Value) -> StepResult<Value> {
    let text = value.as_str().unwrap_or_default();
    if URL_PATTERN.is_match(text) {
        Ok(value)
    } else {
        Err(format!("{} is not a valid URL", text).into())
    }
}

fn encode_json(value: Value) -> StepResult<Value> {
    let json = to_json(value)?;
    serde_json::to_string(&json)
        .map(Value::Text)
        .map_err(|e| format!("cannot encode as JSON: {}", e).into())
}

fn decode_json(value: Value) -> StepResult<Value> {
    match value {
        Value::Text(text) => serde_json::from_str::<JsonValue>(&text)
            .map(from_json)
            .map_err(|e| format!("stored value is not valid JSON: {}", e).into()),
        // Documents written by other tools may hold the structure itself.
        other => Ok(other),
    }
}

fn to_json(value: Value) -> Result<JsonValue, String> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Bool(value) => JsonValue::Bool(value),
        Value::Int(value) => JsonValue::Number(value.into()),
        Value::Float(value) => Number::from_f64(value)
            .map(JsonValue::Number)
            .ok_or_else(|| format!("{} cannot be represented in JSON", value))?,
        Value::Text(value) => JsonValue::String(value),
        Value::DateTime(value) => JsonValue::String(value.to_rfc3339()),
        Value::NaiveDateTime(value) => JsonValue::String(iso_naive_datetime(&value)),
        Value::Date(value) => JsonValue::String(value.format("%Y-%m-%d").to_string()),
        Value::Uuid(value) => JsonValue::String(value.hyphenated().to_string()),
        Value::ObjectId(value) => JsonValue::String(value.to_hex()),
        Value::Binary(bytes) => JsonValue::String(STANDARD.encode(bytes)),
        Value::File(file) => {
            let mut object = JsonMap::new();
            object.insert("content_type".into(), JsonValue::String(file.content_type));
            object.insert("filename".into(), JsonValue::String(file.filename));
            object.insert("body".into(), JsonValue::String(STANDARD.encode(file.body)));
            JsonValue::Object(object)
        }
        Value::List(items) | Value::Set(items) => {
            JsonValue::Array(items.into_iter().map(to_json).collect::<Result<_, _>>()?)
        }
        Value::Map(map) => JsonValue::Object(
            map.into_iter()
                .map(|(k, v)| to_json(v).map(|json| (k, json)))
                .collect::<Result<_, String>>()?,
        ),
    })
}

fn from_json(json: JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(value) => Value::Bool(value),
        JsonValue::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .unwrap_or_else(|| Value::Float(n.as_f64().unwrap_or(f64::NAN))),
        JsonValue::String(value) => Value::Text(value),
        JsonValue::Array(items) => Value::List(items.into_iter().map(from_json).collect()),
        JsonValue::Object(object) => Value::Map(
            object
                .into_iter()
                .map(|(k, v)| (k, from_json(v)))
                .collect::<ValueMap>(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use bson::Bson;

    use super::*;

    #[test]
    fn test_text_coerces_scalars() {
        let field = Field::text().build().unwrap();
        assert_eq!(field.to_wire(5), Ok(Bson::String("5".into())));
        assert_eq!(field.to_wire("hello"), Ok(Bson::String("hello".into())));
        assert!(field.to_wire(Value::list([1, 2])).is_err());
    }

    #[test]
    fn test_empty_text() {
        let required = Field::text().build().unwrap();
        assert_eq!(required.to_wire("  ").unwrap_err().message, "value can't be empty");

        let optional = Field::text().required(false).build().unwrap();
        assert_eq!(optional.to_wire(""), Ok(Bson::Null));
    }

    #[test]
    fn test_email_rules() {
        let field = Field::email().build().unwrap();
        assert!(field.to_wire("foo@bar.com").is_ok());
        assert!(field.to_wire("f@ba.co").is_ok());

        for invalid in ["foo", "foo@bar", "@bar.com", "foo@b.com", "foo@bar.c"] {
            let err = field.to_wire(invalid).unwrap_err();
            assert_eq!(err.kind, "EmailField", "{} should be rejected", invalid);
        }
    }

    #[test]
    fn test_url_scheme_and_pattern() {
        let field = Field::url().build().unwrap();
        assert_eq!(field.to_wire("example.com"), Ok(Bson::String("http://example.com".into())));
        assert_eq!(field.to_wire("https://example.io"), Ok(Bson::String("https://example.io".into())));
        assert!(field.to_wire("ftp://example.com").is_err());
        assert!(field.to_wire("localhost").is_err());

        let secure = Field::url().https(true).build().unwrap();
        assert_eq!(secure.to_wire("example.com"), Ok(Bson::String("https://example.com".into())));
    }

    #[test]
    fn test_json_round_trip() {
        let field = Field::json().build().unwrap();
        let value = Value::map([("a", Value::from(1)), ("b", Value::list(["x"]))]);

        let wire = field.to_wire(value.clone()).unwrap();
        assert_eq!(wire, Bson::String(r#"{"a":1,"b":["x"]}"#.into()));
        assert_eq!(field.to_logical(wire), Ok(value));
    }

    #[test]
    fn test_dict_requires_mapping() {
        let field = Field::dict().build().unwrap();
        assert!(field.to_wire(Value::map([("k", "v")])).is_ok());
        assert!(field.to_wire("text").is_err());
    }

    #[test]
    fn test_email_and_url_round_trip() {
        let email = Field::email().build().unwrap();
        let value = Value::from("ana@example.com");
        let wire = email.to_wire(value.clone()).unwrap();
        assert_eq!(email.to_logical(wire), Ok(value));

        let url = Field::url().build().unwrap();
        let value = Value::from("https://example.io");
        let wire = url.to_wire(value.clone()).unwrap();
        assert_eq!(url.to_logical(wire), Ok(value));
    }
}
