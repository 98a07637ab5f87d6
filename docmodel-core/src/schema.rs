//! Document schemas: ordered, named collections of fields.
//!
//! A [`Schema`] is assembled once by a [`SchemaBuilder`] and is immutable afterwards. Schemas
//! can extend other schemas; inherited fields keep their position and can be overridden.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::{field::Field, schema::Schema};
//!
//! let base = Schema::builder("Base")
//!     .field("_id", Field::object_id().auto(true))
//!     .build()?;
//!
//! let user = Schema::builder("User")
//!     .extends(&base)
//!     .field("name", Field::text())
//!     .field("email", Field::email().required(false))
//!     .build()?;
//! ```

use std::{collections::BTreeSet, sync::Arc};

use bson::{Bson, Document};
use indexmap::IndexMap;
use tracing::debug;

use crate::{
    error::{ConfigResult, ConfigurationError, FieldError, ValidationError, ValidationResult},
    field::{Field, FieldBuilder, FieldKind},
    value::ValueMap,
};

/// Type name used for errors that belong to a document rather than one of its fields.
const DOCUMENT_KIND: &str = "Document";

/// Something that can be declared as a schema field.
pub trait IntoField {
    fn into_field(self) -> ConfigResult<Field>;
}

impl IntoField for Field {
    fn into_field(self) -> ConfigResult<Field> {
        Ok(self)
    }
}

impl IntoField for FieldBuilder {
    fn into_field(self) -> ConfigResult<Field> {
        self.build()
    }
}

/// An ordered mapping of field names to fields.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    fields: IndexMap<String, Arc<Field>>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(&self, name: &str) -> Option<&Arc<Field>> {
        self.fields.get(name)
    }

    /// Looks up a top-level field, failing with a [`FieldError`] when it is not declared.
    pub fn require(&self, name: &str) -> Result<&Arc<Field>, FieldError> {
        self.fields
            .get(name)
            .ok_or_else(|| FieldError::new(name, &self.name))
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Arc<Field>)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolves a dotted path to the field it designates.
    ///
    /// Embedded documents are entered by field name. List and set fields are entered through
    /// their element field, either explicitly with a positional segment (`$`, `$[]`,
    /// `$[ident]`, a numeric index) or implicitly when the next segment names a field of an
    /// embedded element.
    ///
    /// # Errors
    ///
    /// Returns a [`FieldError`] carrying the full path when any segment cannot be resolved.
    pub fn resolve_path(&self, path: &str) -> Result<&Field, FieldError> {
        let unknown = || FieldError::new(path, &self.name);
        let mut segments = path.split('.');

        let first = segments.next().ok_or_else(unknown)?;
        let mut current: &Field = self.fields.get(first).ok_or_else(unknown)?;

        for segment in segments {
            current = match current.kind() {
                FieldKind::List(element) | FieldKind::Set(element) => {
                    if is_positional(segment) {
                        element
                    } else {
                        element
                            .kind()
                            .schema()
                            .and_then(|schema| schema.field(segment))
                            .map(AsRef::as_ref)
                            .ok_or_else(unknown)?
                    }
                }
                FieldKind::Embedded(schema) => schema
                    .field(segment)
                    .map(AsRef::as_ref)
                    .ok_or_else(unknown)?,
                _ => return Err(unknown()),
            };
        }

        Ok(current)
    }

    /// Converts a complete set of logical values into a wire document.
    ///
    /// Fields are visited in schema order; a missing value falls back to the field's
    /// default. `null` results are left out unless the field is nullable.
    ///
    /// # Errors
    ///
    /// Fails on the first value rejected by its field, or when `values` holds a name the
    /// schema does not declare.
    pub fn to_wire(&self, values: &ValueMap) -> ValidationResult<Document> {
        self.reject_unknown(values)?;

        let mut doc = Document::new();
        for (name, field) in &self.fields {
            let value = values
                .get(name)
                .cloned()
                .or_else(|| field.default_value())
                .unwrap_or_default();

            push_wire(&mut doc, name, field, field.to_wire(value)?);
        }

        Ok(doc)
    }

    /// Converts only the values present in `values`, without defaults.
    pub fn to_wire_partial(&self, values: &ValueMap) -> ValidationResult<Document> {
        self.reject_unknown(values)?;

        let mut doc = Document::new();
        for (name, field) in &self.fields {
            if let Some(value) = values.get(name) {
                push_wire(&mut doc, name, field, field.to_wire(value.clone())?);
            }
        }

        Ok(doc)
    }

    /// Decodes a stored document, restricted to `projection` when one is given. `_id` is
    /// always decoded.
    ///
    /// Absent fields take their default when they declare one; stored keys the schema does
    /// not know about are skipped.
    pub fn to_logical(&self, doc: &Document, projection: Option<&BTreeSet<String>>) -> ValidationResult<ValueMap> {
        let mut values = ValueMap::new();

        for (name, field) in &self.fields {
            if name != "_id" && projection.is_some_and(|p| !p.contains(name)) {
                continue;
            }

            match doc.get(name) {
                Some(raw) => {
                    values.insert(name.clone(), field.to_logical(raw.clone())?);
                }
                None => {
                    if let Some(default) = field.default_value() {
                        values.insert(name.clone(), default);
                    }
                }
            }
        }

        for key in doc.keys().filter(|key| !self.fields.contains_key(*key)) {
            debug!(schema = %self.name, key = %key, "Ignoring stored key unknown to schema");
        }

        Ok(values)
    }

    fn reject_unknown(&self, values: &ValueMap) -> ValidationResult<()> {
        match values.keys().find(|key| !self.fields.contains_key(*key)) {
            Some(key) => Err(ValidationError::new(
                key.as_str(),
                DOCUMENT_KIND,
                format!("unknown field in schema {}", self.name),
            )),
            None => Ok(()),
        }
    }
}

fn push_wire(doc: &mut Document, name: &str, field: &Field, wire: Bson) {
    if matches!(wire, Bson::Null) && !field.is_nullable() {
        return;
    }
    doc.insert(name, wire);
}

/// Positional array segments: `$`, `$[]`, `$[ident]` and numeric indexes.
pub(crate) fn is_positional(segment: &str) -> bool {
    segment == "$"
        || (segment.starts_with("$[") && segment.ends_with(']'))
        || (!segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
}

/// Assembles a [`Schema`].
///
/// Fields from `extends(..)` ancestors are collected first in call order, then the
/// builder's own fields are added. A later definition of a name replaces the earlier one
/// but keeps its position.
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    inherited: IndexMap<String, Arc<Field>>,
    own: Vec<(String, ConfigResult<Field>)>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inherited: IndexMap::new(),
            own: Vec::new(),
        }
    }

    pub fn extends(mut self, parent: &Schema) -> Self {
        for (name, field) in &parent.fields {
            self.inherited.insert(name.clone(), Arc::clone(field));
        }
        self
    }

    pub fn field(mut self, name: impl Into<String>, field: impl IntoField) -> Self {
        self.own.push((name.into(), field.into_field()));
        self
    }

    /// Validates names, resolves overrides and binds every field's name.
    pub fn build(self) -> ConfigResult<Schema> {
        let mut fields = self.inherited;
        let mut declared: BTreeSet<String> = BTreeSet::new();

        for (name, field) in self.own {
            validate_name(&name)?;
            if !declared.insert(name.clone()) {
                return Err(ConfigurationError::DuplicateField {
                    field: name,
                    schema: self.name,
                });
            }
            fields.insert(name, Arc::new(field?));
        }

        for (name, field) in &fields {
            field.bind_name(name)?;
        }

        debug!(schema = %self.name, fields = fields.len(), "Assembled schema");

        Ok(Schema {
            name: self.name,
            fields,
        })
    }
}

fn validate_name(name: &str) -> ConfigResult<()> {
    if name.is_empty() || name.contains('.') || name.starts_with('$') {
        return Err(ConfigurationError::InvalidFieldName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use crate::value::Value;

    use super::*;

    fn base() -> Schema {
        Schema::builder("Base")
            .field("_id", Field::object_id().auto(true))
            .field("created", Field::text().required(false))
            .build()
            .unwrap()
    }

    #[test]
    fn test_inheritance_keeps_position_on_override() {
        let schema = Schema::builder("User")
            .extends(&base())
            .field("name", Field::text())
            .field("created", Field::integer().required(false))
            .build()
            .unwrap();

        let names: Vec<&str> = schema.fields().map(|(name, _)| name).collect();
        assert_eq!(names, ["_id", "created", "name"]);
        assert_eq!(schema.field("created").unwrap().kind().type_name(), "IntegerField");
        assert_eq!(schema.field("name").unwrap().name(), Some("name"));
    }

    #[test]
    fn test_invalid_declarations() {
        assert_eq!(
            Schema::builder("X").field("a", Field::text()).field("a", Field::text()).build().unwrap_err(),
            ConfigurationError::DuplicateField { field: "a".into(), schema: "X".into() },
        );
        for bad in ["", "a.b", "$set"] {
            assert_eq!(
                Schema::builder("X").field(bad, Field::text()).build().unwrap_err(),
                ConfigurationError::InvalidFieldName(bad.to_string()),
            );
        }
        assert!(matches!(
            Schema::builder("X").field("when", Field::datetime().timezone("Nowhere")).build(),
            Err(ConfigurationError::InvalidTimezone(_)),
        ));
    }

    #[test]
    fn test_to_wire_defaults_and_null_dropping() {
        let schema = Schema::builder("Post")
            .field("title", Field::text())
            .field("views", Field::integer().default(0))
            .field("subtitle", Field::text().required(false))
            .field("deleted_at", Field::datetime().required(false).nullable(true))
            .build()
            .unwrap();

        let values = ValueMap::from([("title".to_string(), Value::from("Hello"))]);
        assert_eq!(
            schema.to_wire(&values),
            Ok(doc! { "title": "Hello", "views": 0_i64, "deleted_at": Bson::Null })
        );

        assert_eq!(schema.to_wire(&ValueMap::new()).unwrap_err().field, "title");
    }

    #[test]
    fn test_to_wire_partial_skips_missing() {
        let schema = Schema::builder("Post")
            .field("title", Field::text())
            .field("views", Field::integer())
            .build()
            .unwrap();

        let values = ValueMap::from([("views".to_string(), Value::from("3"))]);
        assert_eq!(schema.to_wire_partial(&values), Ok(doc! { "views": 3_i64 }));
    }

    #[test]
    fn test_to_logical_with_projection() {
        let schema = Schema::builder("Post")
            .field("title", Field::text())
            .field("views", Field::integer().default(0))
            .build()
            .unwrap();

        let doc = doc! { "title": "Hello", "legacy": true };
        let all = schema.to_logical(&doc, None).unwrap();
        assert_eq!(all.get("views"), Some(&Value::Int(0)));

        let projection = BTreeSet::from(["title".to_string()]);
        let projected = schema.to_logical(&doc, Some(&projection)).unwrap();
        assert_eq!(projected.len(), 1);
    }

    #[test]
    fn test_resolve_path() {
        let address = Arc::new(
            Schema::builder("Address")
                .field("city", Field::text())
                .build()
                .unwrap(),
        );
        let schema = Schema::builder("User")
            .field("address", Field::embedded(Arc::clone(&address)))
            .field("history", Field::list(Field::embedded(address).build().unwrap()))
            .field("tags", Field::list(Field::text().build().unwrap()))
            .build()
            .unwrap();

        assert_eq!(schema.resolve_path("address.city").unwrap().kind().type_name(), "TextField");
        assert_eq!(schema.resolve_path("history.$.city").unwrap().name(), Some("city"));
        assert_eq!(schema.resolve_path("history.city").unwrap().name(), Some("city"));
        assert_eq!(schema.resolve_path("tags.0").unwrap().kind().type_name(), "TextField");
        assert_eq!(
            schema.resolve_path("address.zip").unwrap_err(),
            FieldError::new("address.zip", "User")
        );
        assert!(schema.resolve_path("tags.0.x").is_err());
    }
}
