//! Convenient re-exports of commonly used types from docmodel.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docmodel::prelude::*;
//! ```
//!
//! This provides access to:
//! - Fields, schemas and the logical value model
//! - Models, instances and collections
//! - Query and update construction
//! - Store backends, builders and the connection pool
//! - Error and result types

pub use docmodel_core::{
    backend::{FindOptions, ReplaceOptions, StoreBackend, StoreBackendBuilder, UpdateOptions, UpdateOutcome},
    collection::{CollectionHandle, ModelCollection},
    error::{
        ConfigResult, ConfigurationError, DocumentStoreError, DocumentStoreResult, FieldError, UpdateError,
        ValidationError, ValidationResult,
    },
    field::{Field, FieldBuilder, FieldKind, TimestampFormat, UuidFormat},
    model::{Instance, Model, ModelExt},
    pipeline::{CustomSteps, Step},
    pool::{ConnectionPool, ConnectionPoolBuilder},
    query::{Expr, FieldOp, Filter, Query, QueryBuilder, Sort, SortDirection},
    schema::{Schema, SchemaBuilder},
    update::{UpdateExpression, UpdateOperator, UpdateTranslator},
    value::{FilePayload, Value, ValueMap},
};
