//! Typed schema units and their bidirectional conversion.
//!
//! A [`Field`] describes one named attribute of a document: whether it is required or
//! store-generated, its default, the custom steps supplied by the caller, the update
//! operators it accepts and, through its [`FieldKind`], the variant-specific built-in steps.
//!
//! Fields are declared with a [`FieldBuilder`]; variant configuration (timezones, numeric
//! formats, ...) is checked eagerly by [`FieldBuilder::build`].
//!
//! # Example
//!
//! ```ignore
//! use docmodel::field::Field;
//!
//! let email = Field::email().build()?;
//! assert_eq!(email.to_wire("foo@bar.com")?, bson::Bson::String("foo@bar.com".into()));
//!
//! let created = Field::datetime().timezone("Europe/Madrid").required(false).build()?;
//! ```

mod container;
mod file;
mod identifier;
mod number;
mod temporal;
mod text;

use std::{
    collections::BTreeSet,
    fmt,
    sync::{Arc, OnceLock},
};

use bson::Bson;
use chrono_tz::Tz;

use crate::{
    error::{ConfigResult, ConfigurationError, ValidationError, ValidationResult},
    pipeline::{self, CustomSteps, Step},
    schema::Schema,
    update::UpdateOperator,
    value::Value,
};

pub use identifier::UuidFormat;
pub use temporal::TimestampFormat;

/// Variant of a field together with its variant-specific configuration.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Text,
    Email,
    Url { https: bool },
    Boolean,
    Integer,
    Float,
    List(Box<Field>),
    Set(Box<Field>),
    DateTime { timezone: Option<Tz> },
    Date,
    Timestamp { format: TimestampFormat },
    Uuid { format: UuidFormat },
    ObjectId,
    Embedded(Arc<Schema>),
    File,
    Json,
    Dict,
}

impl FieldKind {
    /// Type name reported in validation errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Text => "TextField",
            FieldKind::Email => "EmailField",
            FieldKind::Url { .. } => "URLField",
            FieldKind::Boolean => "BooleanField",
            FieldKind::Integer => "IntegerField",
            FieldKind::Float => "FloatField",
            FieldKind::List(_) => "ListField",
            FieldKind::Set(_) => "SetField",
            FieldKind::DateTime { .. } => "DateTimeField",
            FieldKind::Date => "DateField",
            FieldKind::Timestamp { .. } => "TimestampField",
            FieldKind::Uuid { .. } => "UUIDField",
            FieldKind::ObjectId => "ObjectIdField",
            FieldKind::Embedded(_) => "EmbeddedDocumentField",
            FieldKind::File => "FileField",
            FieldKind::Json => "JSONField",
            FieldKind::Dict => "DictField",
        }
    }

    /// Element field of a list or set.
    pub fn element(&self) -> Option<&Field> {
        match self {
            FieldKind::List(element) | FieldKind::Set(element) => Some(element),
            _ => None,
        }
    }

    /// Nested schema of an embedded document.
    pub fn schema(&self) -> Option<&Arc<Schema>> {
        match self {
            FieldKind::Embedded(schema) => Some(schema),
            _ => None,
        }
    }

    /// Operators a freshly declared field of this kind accepts.
    pub fn default_operators(&self) -> BTreeSet<UpdateOperator> {
        use UpdateOperator::*;

        let base = [Set, Unset, SetOnInsert];
        let ops: &[UpdateOperator] = match self {
            FieldKind::Integer => &[Inc, Mul, Min, Max, Bit, Set, Unset, SetOnInsert],
            FieldKind::Float => &[Inc, Mul, Min, Max, Set, Unset, SetOnInsert],
            FieldKind::DateTime { .. } | FieldKind::Date => &[Set, Min, Max, SetOnInsert, CurrentDate],
            FieldKind::Timestamp { .. } => &[Set, Unset, SetOnInsert, Inc, Min, Max],
            FieldKind::List(_) | FieldKind::Set(_) => {
                &[Set, Unset, SetOnInsert, Push, AddToSet, Pop, Pull, PullAll]
            }
            _ => &base,
        };

        ops.iter().copied().collect()
    }

    /// Wire value produced for an absent value on a field that may be absent.
    fn null_wire(&self) -> Bson {
        match self {
            FieldKind::Boolean => Bson::Boolean(false),
            _ => Bson::Null,
        }
    }

    fn wire_steps(&self) -> Vec<Step> {
        match self {
            FieldKind::Text => text::text_steps(),
            FieldKind::Email => [text::text_steps(), text::email_steps()].concat(),
            FieldKind::Url { .. } => [text::text_steps(), text::url_steps()].concat(),
            FieldKind::Json => text::json_wire_steps(),
            FieldKind::Dict => text::dict_steps(),
            FieldKind::Boolean => number::boolean_steps(),
            FieldKind::Integer => number::integer_steps(),
            FieldKind::Float => number::float_steps(),
            FieldKind::DateTime { .. } => temporal::datetime_wire_steps(),
            FieldKind::Date => temporal::date_wire_steps(),
            FieldKind::Timestamp { .. } => temporal::timestamp_wire_steps(),
            FieldKind::Uuid { .. } => identifier::uuid_wire_steps(),
            FieldKind::ObjectId => identifier::object_id_steps(),
            FieldKind::List(_) | FieldKind::Set(_) => container::sequence_wire_steps(),
            FieldKind::Embedded(_) => container::embedded_wire_steps(),
            FieldKind::File => file::file_wire_steps(),
        }
    }

    fn logical_steps(&self) -> Vec<Step> {
        match self {
            FieldKind::Text | FieldKind::Email | FieldKind::Url { .. } => Vec::new(),
            FieldKind::Json => text::json_logical_steps(),
            FieldKind::Dict => text::dict_steps(),
            FieldKind::Boolean => number::boolean_steps(),
            FieldKind::Integer => number::integer_steps(),
            FieldKind::Float => number::float_steps(),
            FieldKind::DateTime { .. } => temporal::datetime_logical_steps(),
            FieldKind::Date => temporal::date_logical_steps(),
            FieldKind::Timestamp { .. } => temporal::timestamp_logical_steps(),
            FieldKind::Uuid { .. } => identifier::uuid_logical_steps(),
            FieldKind::ObjectId => identifier::object_id_steps(),
            FieldKind::List(_) | FieldKind::Set(_) => container::sequence_logical_steps(),
            FieldKind::Embedded(_) => container::embedded_logical_steps(),
            FieldKind::File => file::file_logical_steps(),
        }
    }
}

/// Default value of a field: a fixed value or a factory evaluated per instance.
#[derive(Clone)]
pub enum DefaultValue {
    Static(Value),
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    pub fn resolve(&self) -> Value {
        match self {
            DefaultValue::Static(value) => value.clone(),
            DefaultValue::Factory(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Static(value) => f.debug_tuple("Static").field(value).finish(),
            DefaultValue::Factory(_) => f.write_str("Factory"),
        }
    }
}

/// A typed, validated attribute of a document schema.
#[derive(Debug, Clone)]
pub struct Field {
    name: OnceLock<String>,
    kind: FieldKind,
    required: bool,
    auto: bool,
    unique: bool,
    nullable: bool,
    default: Option<DefaultValue>,
    custom_to_wire: Vec<Step>,
    custom_to_logical: Vec<Step>,
    operators: BTreeSet<UpdateOperator>,
    wire_steps: Vec<Step>,
    logical_steps: Vec<Step>,
}

impl Field {
    pub fn text() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Text)
    }

    pub fn email() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Email)
    }

    pub fn url() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Url { https: false })
    }

    pub fn boolean() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Boolean)
    }

    pub fn integer() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Integer)
    }

    pub fn float() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Float)
    }

    pub fn list(element: Field) -> FieldBuilder {
        FieldBuilder::new(FieldKind::List(Box::new(element)))
    }

    pub fn set(element: Field) -> FieldBuilder {
        FieldBuilder::new(FieldKind::Set(Box::new(element)))
    }

    pub fn datetime() -> FieldBuilder {
        FieldBuilder::new(FieldKind::DateTime { timezone: None })
    }

    pub fn date() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Date)
    }

    pub fn timestamp() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Timestamp { format: TimestampFormat::Int })
    }

    /// UUID field; unique by default.
    pub fn uuid() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Uuid { format: UuidFormat::Hex }).unique(true)
    }

    pub fn object_id() -> FieldBuilder {
        FieldBuilder::new(FieldKind::ObjectId)
    }

    pub fn embedded(schema: Arc<Schema>) -> FieldBuilder {
        FieldBuilder::new(FieldKind::Embedded(schema))
    }

    pub fn file() -> FieldBuilder {
        FieldBuilder::new(FieldKind::File)
    }

    pub fn json() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Json)
    }

    pub fn dict() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Dict)
    }

    /// Name assigned at schema assembly, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.get().map(String::as_str)
    }

    /// Name used in error messages; empty for unbound fields.
    pub fn label(&self) -> &str {
        self.name().unwrap_or_default()
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_auto(&self) -> bool {
        self.auto
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// The declared default, evaluated (factories run on every call).
    pub fn default_value(&self) -> Option<Value> {
        self.default.as_ref().map(DefaultValue::resolve)
    }

    pub fn allowed_update_operators(&self) -> &BTreeSet<UpdateOperator> {
        &self.operators
    }

    pub fn allows(&self, op: UpdateOperator) -> bool {
        self.operators.contains(&op)
    }

    /// Converts a logical value to its wire form, custom steps included.
    pub fn to_wire(&self, value: impl Into<Value>) -> ValidationResult<Bson> {
        self.to_wire_with(value.into(), CustomSteps::Apply)
    }

    /// Converts an operator value (update delta, filter operand) without custom steps.
    pub fn to_wire_operand(&self, value: impl Into<Value>) -> ValidationResult<Bson> {
        self.to_wire_with(value.into(), CustomSteps::Suppress)
    }

    pub fn to_wire_with(&self, value: Value, custom: CustomSteps) -> ValidationResult<Bson> {
        if value.is_null() {
            return if self.required && !self.auto {
                Err(ValidationError::new(self.label(), self.kind.type_name(), "value required"))
            } else {
                Ok(self.kind.null_wire())
            };
        }

        let custom_steps: &[Step] = match custom {
            CustomSteps::Apply => &self.custom_to_wire,
            CustomSteps::Suppress => &[],
        };

        Ok(pipeline::run(self, value, self.wire_steps.iter().chain(custom_steps))?.into_bson())
    }

    /// Converts a stored wire value back to its logical form, custom steps included.
    pub fn to_logical(&self, value: Bson) -> ValidationResult<Value> {
        self.to_logical_with(value, CustomSteps::Apply)
    }

    pub fn to_logical_with(&self, value: Bson, custom: CustomSteps) -> ValidationResult<Value> {
        if let Bson::Null = value {
            return Ok(Value::Null);
        }

        let custom_steps: &[Step] = match custom {
            CustomSteps::Apply => &self.custom_to_logical,
            CustomSteps::Suppress => &[],
        };

        pipeline::run(self, Value::from(value), self.logical_steps.iter().chain(custom_steps))
    }

    /// Binds the schema-assigned name. A field keeps its first name for life.
    pub(crate) fn bind_name(&self, name: &str) -> ConfigResult<()> {
        if self.name.set(name.to_string()).is_ok() {
            return Ok(());
        }

        match self.name() {
            Some(existing) if existing != name => Err(ConfigurationError::FieldAlreadyBound {
                existing: existing.to_string(),
                requested: name.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Declares a [`Field`].
///
/// Fields are required and not store-generated unless configured otherwise.
#[derive(Debug, Clone)]
pub struct FieldBuilder {
    kind: FieldKind,
    required: bool,
    auto: bool,
    unique: bool,
    nullable: bool,
    default: Option<DefaultValue>,
    custom_to_wire: Vec<Step>,
    custom_to_logical: Vec<Step>,
    operators: Option<BTreeSet<UpdateOperator>>,
    allow: Vec<UpdateOperator>,
    deny: Vec<UpdateOperator>,
    timezone: Option<String>,
    format: Option<String>,
    https: Option<bool>,
}

impl FieldBuilder {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            required: true,
            auto: false,
            unique: false,
            nullable: false,
            default: None,
            custom_to_wire: Vec::new(),
            custom_to_logical: Vec::new(),
            operators: None,
            allow: Vec::new(),
            deny: Vec::new(),
            timezone: None,
            format: None,
            https: None,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Marks the value as generated by the store (e.g. identifiers).
    pub fn auto(mut self, auto: bool) -> Self {
        self.auto = auto;
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Keeps `null` in written documents instead of dropping the key.
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Static(value.into()));
        self
    }

    pub fn default_with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Factory(Arc::new(factory)));
        self
    }

    /// Appends a caller-supplied step to the wire direction.
    pub fn to_wire_step(mut self, step: Step) -> Self {
        self.custom_to_wire.push(step);
        self
    }

    /// Appends a caller-supplied step to the logical direction.
    pub fn to_logical_step(mut self, step: Step) -> Self {
        self.custom_to_logical.push(step);
        self
    }

    /// Replaces the kind's default operator whitelist.
    pub fn operators(mut self, ops: impl IntoIterator<Item = UpdateOperator>) -> Self {
        self.operators = Some(ops.into_iter().collect());
        self
    }

    pub fn allow(mut self, op: UpdateOperator) -> Self {
        self.allow.push(op);
        self
    }

    pub fn deny(mut self, op: UpdateOperator) -> Self {
        self.deny.push(op);
        self
    }

    /// IANA timezone for date/time fields, e.g. `Europe/Madrid`.
    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Numeric format for timestamp fields (`int`, `float`) or representation for UUID
    /// fields (`hex`, `int`, `urn`, `str`).
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Scheme prepended by URL fields when a value has none.
    pub fn https(mut self, https: bool) -> Self {
        self.https = Some(https);
        self
    }

    /// Validates the declaration and produces the field.
    pub fn build(self) -> ConfigResult<Field> {
        let mut kind = self.kind;
        let type_name = kind.type_name();

        if let Some(timezone) = self.timezone {
            match &mut kind {
                FieldKind::DateTime { timezone: slot } => {
                    *slot = Some(
                        timezone
                            .parse::<Tz>()
                            .map_err(|_| ConfigurationError::InvalidTimezone(timezone.clone()))?,
                    );
                }
                _ => return Err(ConfigurationError::UnsupportedOption { option: "timezone", kind: type_name }),
            }
        }

        if let Some(format) = self.format {
            match &mut kind {
                FieldKind::Timestamp { format: slot } => *slot = format.parse()?,
                FieldKind::Uuid { format: slot } => *slot = format.parse()?,
                _ => return Err(ConfigurationError::UnsupportedOption { option: "format", kind: type_name }),
            }
        }

        if let Some(https) = self.https {
            match &mut kind {
                FieldKind::Url { https: slot } => *slot = https,
                _ => return Err(ConfigurationError::UnsupportedOption { option: "https", kind: type_name }),
            }
        }

        if let Some(element) = kind.element() {
            if element.is_auto() {
                return Err(ConfigurationError::GeneratedElement(type_name));
            }
        }

        let mut operators = self
            .operators
            .unwrap_or_else(|| kind.default_operators());
        operators.extend(self.allow);
        for op in self.deny {
            operators.remove(&op);
        }

        Ok(Field {
            name: OnceLock::new(),
            wire_steps: kind.wire_steps(),
            logical_steps: kind.logical_steps(),
            kind,
            required: self.required,
            auto: self.auto,
            unique: self.unique,
            nullable: self.nullable,
            default: self.default,
            custom_to_wire: self.custom_to_wire,
            custom_to_logical: self.custom_to_logical,
            operators,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_rejects_null() {
        let field = Field::integer().build().unwrap();
        let err = field.to_wire(Value::Null).unwrap_err();
        assert_eq!(err.message, "value required");
        assert_eq!(err.kind, "IntegerField");
    }

    #[test]
    fn test_optional_and_auto_accept_null() {
        let optional = Field::integer().required(false).build().unwrap();
        assert_eq!(optional.to_wire(Value::Null), Ok(Bson::Null));

        let generated = Field::object_id().auto(true).build().unwrap();
        assert_eq!(generated.to_wire(Value::Null), Ok(Bson::Null));
    }

    #[test]
    fn test_to_logical_passes_null_through() {
        let field = Field::integer().build().unwrap();
        assert_eq!(field.to_logical(Bson::Null), Ok(Value::Null));
    }

    #[test]
    fn test_custom_steps_can_be_suppressed() {
        let positive = Step::constructor(|value| match value {
            Value::Int(n) if n < 0 => Err("must be positive".into()),
            other => Ok(other),
        });
        let field = Field::integer().to_wire_step(positive).build().unwrap();

        assert!(field.to_wire(-3).is_err());
        assert_eq!(field.to_wire_operand(-3), Ok(Bson::Int64(-3)));
    }

    #[test]
    fn test_custom_steps_run_after_builtins() {
        let seen = Step::constructor(|value| match value {
            Value::Int(n) => Ok(Value::Int(n * 10)),
            other => Err(format!("expected an int, got {}", other.type_name()).into()),
        });
        let field = Field::integer().to_wire_step(seen).build().unwrap();

        assert_eq!(field.to_wire("4"), Ok(Bson::Int64(40)));
    }

    #[test]
    fn test_configuration_errors_are_eager() {
        assert_eq!(
            Field::datetime().timezone("Mars/Olympus").build().unwrap_err(),
            ConfigurationError::InvalidTimezone("Mars/Olympus".to_string()),
        );
        assert!(matches!(
            Field::timestamp().format("decimal").build(),
            Err(ConfigurationError::InvalidTimestampFormat(_)),
        ));
        assert!(matches!(
            Field::uuid().format("base64").build(),
            Err(ConfigurationError::InvalidUuidFormat(_)),
        ));
        assert!(matches!(
            Field::integer().timezone("UTC").build(),
            Err(ConfigurationError::UnsupportedOption { option: "timezone", .. }),
        ));
    }

    #[test]
    fn test_generated_list_element_is_rejected() {
        let element = Field::object_id().auto(true).build().unwrap();
        assert_eq!(
            Field::list(element).build().unwrap_err(),
            ConfigurationError::GeneratedElement("ListField"),
        );
    }

    #[test]
    fn test_operator_whitelist_adjustments() {
        let field = Field::text()
            .allow(UpdateOperator::Push)
            .deny(UpdateOperator::Unset)
            .build()
            .unwrap();

        assert!(field.allows(UpdateOperator::Push));
        assert!(field.allows(UpdateOperator::Set));
        assert!(!field.allows(UpdateOperator::Unset));
    }

    #[test]
    fn test_name_binds_once() {
        let field = Field::text().build().unwrap();
        assert_eq!(field.name(), None);

        field.bind_name("title").unwrap();
        field.bind_name("title").unwrap();
        assert!(matches!(
            field.bind_name("subtitle"),
            Err(ConfigurationError::FieldAlreadyBound { .. }),
        ));
        assert_eq!(field.name(), Some("title"));
    }

    #[test]
    fn test_default_factory_runs_per_call() {
        let field = Field::uuid()
            .default_with(|| Value::Uuid(uuid::Uuid::new_v4()))
            .build()
            .unwrap();

        assert_ne!(field.default_value(), field.default_value());
        assert!(field.is_unique());
    }
}
