//! Error types and result types for schema declaration, value conversion and store operations.
//!
//! Errors are split by who has to act on them:
//!
//! - [`ConfigurationError`] - a field or schema was declared incorrectly (programmer mistake)
//! - [`ValidationError`] - a value failed a field's conversion rules (recoverable, field-scoped)
//! - [`FieldError`] - a query, projection, update or instance access named an unknown field
//! - [`DocumentStoreError`] - umbrella error returned by collections and backends
//!
//! Use [`DocumentStoreResult<T>`] as the return type for store-facing operations.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// A value failed one of a field's conversion or validation steps.
///
/// Always scoped to a field: `field` holds the field name (a dotted path for values nested
/// in embedded documents) and `kind` the field variant's type name, e.g. `TextField`.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{field} ({kind}): {message}")]
pub struct ValidationError {
    /// Name or dotted path of the offending field.
    pub field: String,
    /// Type name of the field variant that rejected the value.
    pub kind: &'static str,
    /// Human readable reason.
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind,
            message: message.into(),
        }
    }

    /// Re-scopes this error under an enclosing field, turning `age` into `profile.age`.
    pub fn nested_under(mut self, parent: &str) -> Self {
        if parent.is_empty() {
            return self;
        }
        self.field = if self.field.is_empty() {
            parent.to_string()
        } else {
            format!("{}.{}", parent, self.field)
        };
        self
    }
}

/// A name that does not exist in the schema it was resolved against.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Unknown field '{name}' in schema {schema}")]
pub struct FieldError {
    /// The unresolved name or path.
    pub name: String,
    /// The schema the lookup ran against.
    pub schema: String,
}

impl FieldError {
    pub fn new(name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
        }
    }
}

/// An invalid field, schema or pool declaration.
///
/// Raised while declaring, never while converting values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("{0} is not a valid timezone")]
    InvalidTimezone(String),
    #[error("Timestamp format {0} not valid, expected 'int' or 'float'")]
    InvalidTimestampFormat(String),
    #[error("UUID format {0} not valid, expected one of 'hex', 'int', 'urn', 'str'")]
    InvalidUuidFormat(String),
    #[error("Option '{option}' is not supported by {kind}")]
    UnsupportedOption { option: &'static str, kind: &'static str },
    #[error("{0} elements cannot be store-generated")]
    GeneratedElement(&'static str),
    #[error("Field '{field}' declared twice in schema {schema}")]
    DuplicateField { field: String, schema: String },
    #[error("'{0}' is not a valid field name")]
    InvalidFieldName(String),
    #[error("Field already bound as '{existing}', cannot rebind as '{requested}'")]
    FieldAlreadyBound { existing: String, requested: String },
    #[error("No store registered under '{0}'")]
    UnknownStore(String),
}

/// Failure reported by a single pipeline step.
///
/// `Invalid` is wrapped by the pipeline into a [`ValidationError`] scoped to the running
/// field, `Validation` is passed through untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl StepError {
    pub fn invalid(message: impl Into<String>) -> Self {
        StepError::Invalid(message.into())
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        StepError::Invalid(message)
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        StepError::Invalid(message.to_string())
    }
}

/// Failure while translating an update expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpdateError {
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Unknown update operator {0}")]
    UnknownOperator(String),
    #[error("Malformed update: {0}")]
    Malformed(String),
}

/// Represents all possible errors that can occur when interacting with a document store.
///
/// Covers serialization problems, document lifecycle issues, backend failures and the
/// schema-level errors above, so collection methods can use a single result type.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The requested document was not found in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The document or filter has an invalid structure for the backend.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("Unknown update operator {0}")]
    UnknownOperator(String),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

/// Result of converting a value through a field.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Result of a declaration step.
pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// Result of a single pipeline step.
pub type StepResult<T> = Result<T, StepError>;

impl From<UpdateError> for DocumentStoreError {
    fn from(err: UpdateError) -> Self {
        match err {
            UpdateError::Field(err) => DocumentStoreError::Field(err),
            UpdateError::Validation(err) => DocumentStoreError::Validation(err),
            UpdateError::UnknownOperator(op) => DocumentStoreError::UnknownOperator(op),
            UpdateError::Malformed(reason) => DocumentStoreError::InvalidDocument(reason),
        }
    }
}

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_validation_error_path() {
        let err = ValidationError::new("age", "IntegerField", "not a number")
            .nested_under("profile");

        assert_eq!(err.field, "profile.age");
        assert_eq!(err.to_string(), "profile.age (IntegerField): not a number");
    }

    #[test]
    fn test_update_error_into_store_error() {
        let err: DocumentStoreError = UpdateError::Field(FieldError::new("nope", "User")).into();
        assert!(matches!(err, DocumentStoreError::Field(_)));
    }
}
