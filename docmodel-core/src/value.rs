//! Logical values handled by fields.
//!
//! A [`Value`] is what application code hands to a field and what a field hands back after
//! decoding a stored document. The wire representation is always [`bson::Bson`]. This module
//! also holds the two total, rule-free conversions used at the edges of every pipeline:
//! [`Value::into_bson`] and `Value::from(Bson)`.

use base64::{Engine, engine::general_purpose::STANDARD};
use bson::{Binary, Bson, Document, oid::ObjectId, spec::BinarySubtype};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Timelike, Utc};
use indexmap::IndexMap;
use uuid::Uuid;

/// Ordered mapping of names to logical values.
pub type ValueMap = IndexMap<String, Value>;

/// A file attached to a document: content type, original file name and raw body.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePayload {
    pub content_type: String,
    pub filename: String,
    pub body: Vec<u8>,
}

impl FilePayload {
    pub fn new(content_type: impl Into<String>, filename: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into(),
            filename: filename.into(),
            body: body.into(),
        }
    }
}

/// A logical (application-side) value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Timezone-aware date/time.
    DateTime(DateTime<FixedOffset>),
    /// Date/time without a timezone.
    NaiveDateTime(NaiveDateTime),
    Date(NaiveDate),
    Uuid(Uuid),
    ObjectId(ObjectId),
    Binary(Vec<u8>),
    File(FilePayload),
    List(Vec<Value>),
    /// Element-unique collection; insertion order is kept.
    Set(Vec<Value>),
    Map(ValueMap),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::DateTime(_) => "datetime",
            Value::NaiveDateTime(_) => "naive datetime",
            Value::Date(_) => "date",
            Value::Uuid(_) => "uuid",
            Value::ObjectId(_) => "object id",
            Value::Binary(_) => "binary",
            Value::File(_) => "file",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Builds a map value from `(key, value)` pairs.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Value
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Builds a list value.
    pub fn list<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Value {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// Converts to the wire representation without applying any field rule.
    pub fn into_bson(self) -> Bson {
        match self {
            Value::Null => Bson::Null,
            Value::Bool(value) => Bson::Boolean(value),
            Value::Int(value) => Bson::Int64(value),
            Value::Float(value) => Bson::Double(value),
            Value::Text(value) => Bson::String(value),
            Value::DateTime(value) => Bson::DateTime(bson::DateTime::from_chrono(value)),
            Value::NaiveDateTime(value) => Bson::String(iso_naive_datetime(&value)),
            Value::Date(value) => Bson::String(value.format("%Y-%m-%d").to_string()),
            Value::Uuid(value) => Bson::String(value.hyphenated().to_string()),
            Value::ObjectId(value) => Bson::ObjectId(value),
            Value::Binary(bytes) => Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes,
            }),
            Value::File(file) => Bson::Document(file.into_document()),
            Value::List(items) | Value::Set(items) => {
                Bson::Array(items.into_iter().map(Value::into_bson).collect())
            }
            Value::Map(map) => Bson::Document(map_into_document(map)),
        }
    }
}

impl FilePayload {
    pub(crate) fn into_document(self) -> Document {
        let mut doc = Document::new();
        doc.insert("content_type", self.content_type);
        doc.insert("filename", self.filename);
        doc.insert(
            "body",
            Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes: self.body,
            }),
        );
        doc
    }

    /// Reads a payload back from a map with `content_type`, `filename` and `body` keys.
    ///
    /// Text bodies are base64 and are decoded.
    pub(crate) fn from_map(map: &ValueMap) -> Result<Self, String> {
        let text = |key: &str| match map.get(key) {
            Some(Value::Text(text)) => Ok(text.clone()),
            Some(Value::Null) | None => Ok(String::new()),
            Some(other) => Err(format!("'{}' must be text, got {}", key, other.type_name())),
        };
        let body = match map.get("body") {
            Some(Value::Binary(bytes)) => bytes.clone(),
            Some(Value::Text(encoded)) => STANDARD
                .decode(encoded.trim())
                .map_err(|e| format!("body is not valid base64: {}", e))?,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => return Err(format!("'body' must be bytes or base64 text, got {}", other.type_name())),
        };

        if let Some(key) = map
            .keys()
            .find(|k| !["content_type", "filename", "body"].contains(&k.as_str()))
        {
            return Err(format!("unexpected file attribute '{}'", key));
        }

        Ok(Self {
            content_type: text("content_type")?,
            filename: text("filename")?,
            body,
        })
    }
}

pub(crate) fn map_into_document(map: ValueMap) -> Document {
    map.into_iter()
        .map(|(k, v)| (k, v.into_bson()))
        .collect()
}

pub(crate) fn document_into_map(doc: Document) -> ValueMap {
    doc.into_iter()
        .map(|(k, v)| (k, Value::from(v)))
        .collect()
}

/// ISO-8601 rendering of a naive date/time; fractional seconds only when present.
pub(crate) fn iso_naive_datetime(value: &NaiveDateTime) -> String {
    if value.nanosecond() == 0 {
        value.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        value.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

impl From<Bson> for Value {
    fn from(bson: Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Value::Null,
            Bson::Boolean(value) => Value::Bool(value),
            Bson::Int32(value) => Value::Int(value as i64),
            Bson::Int64(value) => Value::Int(value),
            Bson::Double(value) => Value::Float(value),
            Bson::String(value) => Value::Text(value),
            Bson::DateTime(value) => Value::DateTime(value.to_chrono().fixed_offset()),
            Bson::ObjectId(value) => Value::ObjectId(value),
            Bson::Binary(binary) => Value::Binary(binary.bytes),
            Bson::Timestamp(ts) => Value::Int(ts.time as i64),
            Bson::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Bson::Document(doc) => Value::Map(document_into_map(doc)),
            other => Value::Text(other.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Value::DateTime(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value.fixed_offset())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::NaiveDateTime(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl From<ObjectId> for Value {
    fn from(value: ObjectId) -> Self {
        Value::ObjectId(value)
    }
}

impl From<FilePayload> for Value {
    fn from(value: FilePayload) -> Self {
        Value::File(value)
    }
}

impl From<ValueMap> for Value {
    fn from(value: ValueMap) -> Self {
        Value::Map(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}
