//! UUID and ObjectId fields.

use std::{fmt, str::FromStr};

use bson::oid::ObjectId;
use uuid::Uuid;

use super::{Field, FieldKind};
use crate::{
    error::{ConfigurationError, StepResult},
    pipeline::Step,
    value::Value,
};

/// Wire representation of a UUID field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UuidFormat {
    /// 32 lowercase hex digits.
    #[default]
    Hex,
    /// The 128-bit value as decimal text.
    Int,
    /// `urn:uuid:` prefixed hyphenated form.
    Urn,
    /// Hyphenated form.
    Str,
}

impl FromStr for UuidFormat {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hex" => Ok(UuidFormat::Hex),
            "int" => Ok(UuidFormat::Int),
            "urn" => Ok(UuidFormat::Urn),
            "str" => Ok(UuidFormat::Str),
            other => Err(ConfigurationError::InvalidUuidFormat(other.to_string())),
        }
    }
}

impl fmt::Display for UuidFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UuidFormat::Hex => "hex",
            UuidFormat::Int => "int",
            UuidFormat::Urn => "urn",
            UuidFormat::Str => "str",
        })
    }
}

impl UuidFormat {
    fn render(&self, uuid: &Uuid) -> String {
        match self {
            UuidFormat::Hex => uuid.simple().to_string(),
            UuidFormat::Int => uuid.as_u128().to_string(),
            UuidFormat::Urn => uuid.urn().to_string(),
            UuidFormat::Str => uuid.hyphenated().to_string(),
        }
    }
}

pub(super) fn uuid_wire_steps() -> Vec<Step> {
    vec![
        Step::contextual(load_uuid),
        Step::contextual(|value, field: &Field| {
            let format = match field.kind() {
                FieldKind::Uuid { format } => *format,
                _ => UuidFormat::default(),
            };
            match value {
                Value::Uuid(uuid) => Ok(Value::Text(format.render(&uuid))),
                other => Ok(other),
            }
        }),
    ]
}

pub(super) fn uuid_logical_steps() -> Vec<Step> {
    vec![Step::contextual(load_uuid)]
}

pub(super) fn object_id_steps() -> Vec<Step> {
    vec![Step::constructor(|value| match value {
        Value::ObjectId(_) => Ok(value),
        Value::Text(text) => ObjectId::parse_str(text.trim())
            .map(Value::ObjectId)
            .map_err(|_| format!("'{}' is not a valid ObjectId", text).into()),
        other => Err(format!("expected an ObjectId, got {}", other.type_name()).into()),
    })]
}

/// Accepts every representation any UUID format writes. Digit-only text is decimal for
/// `int` fields and hex otherwise.
fn load_uuid(value: Value, field: &Field) -> StepResult<Value> {
    let decimal_first = matches!(field.kind(), FieldKind::Uuid { format: UuidFormat::Int });

    match value {
        Value::Uuid(_) => Ok(value),
        Value::Int(n) if n >= 0 => Ok(Value::Uuid(Uuid::from_u128(n as u128))),
        Value::Text(text) => {
            let trimmed = text.trim();
            let decimal = || trimmed.parse::<u128>().ok().map(Uuid::from_u128);
            let parsed = if decimal_first && trimmed.bytes().all(|b| b.is_ascii_digit()) {
                decimal()
            } else {
                Uuid::parse_str(trimmed).ok().or_else(decimal)
            };
            parsed
                .map(Value::Uuid)
                .ok_or_else(|| format!("'{}' is not a valid UUID", text).into())
        }
        other => Err(format!("expected a UUID, got {}", other.type_name()).into()),
    }
}

#[cfg(test)]
mod tests {
    use bson::Bson;

    use super::*;

    const ID: &str = "6f1a5e3c-2b8d-4c1a-9e7f-0a1b2c3d4e5f";

    #[test]
    fn test_uuid_formats() {
        let uuid = Uuid::parse_str(ID).unwrap();
        let cases = [
            ("hex", uuid.simple().to_string()),
            ("int", uuid.as_u128().to_string()),
            ("urn", format!("urn:uuid:{}", ID)),
            ("str", ID.to_string()),
        ];

        for (format, expected) in cases {
            let field = Field::uuid().format(format).build().unwrap();
            let wire = field.to_wire(uuid).unwrap();
            assert_eq!(wire, Bson::String(expected), "{}", format);
            assert_eq!(field.to_logical(wire), Ok(Value::Uuid(uuid)), "{}", format);
        }
    }

    #[test]
    fn test_uuid_from_text() {
        let field = Field::uuid().build().unwrap();
        assert_eq!(
            field.to_wire(ID),
            Ok(Bson::String(ID.replace('-', "")))
        );
        assert!(field.to_wire("not-a-uuid").is_err());
    }

    #[test]
    fn test_object_id() {
        let field = Field::object_id().build().unwrap();
        let oid = ObjectId::new();

        assert_eq!(field.to_wire(oid.to_hex()), Ok(Bson::ObjectId(oid)));
        assert_eq!(field.to_logical(Bson::ObjectId(oid)), Ok(Value::ObjectId(oid)));
        assert_eq!(field.to_wire("zzz").unwrap_err().kind, "ObjectIdField");
    }
}
