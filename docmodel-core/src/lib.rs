//! Typed field schemas, coercion pipelines and validated update translation for document stores.
//!
//! This crate is the core of the docmodel project and provides:
//!
//! - **Values** ([`value`]) - The logical value model handed to and returned by fields
//! - **Fields** ([`field`]) - Typed schema units converting values between logical and wire form
//! - **Pipelines** ([`pipeline`]) - Ordered conversion steps with field-scoped error reporting
//! - **Schemas** ([`schema`]) - Ordered, inheritable collections of named fields
//! - **Updates** ([`update`]) - Update expressions and their validating translator
//! - **Queries** ([`query`]) - Filter expressions compiled against a schema
//! - **Models** ([`model`]) - Model types and their instances
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Collections** ([`collection`]) - Untyped and model-typed collection handles
//! - **Connection pool** ([`pool`]) - Named stores, lazy connections and cached collections
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docmodel_core::{field::Field, schema::Schema, update::{UpdateExpression, UpdateTranslator}};
//!
//! let schema = Schema::builder("User")
//!     .field("name", Field::text())
//!     .field("age", Field::integer())
//!     .build()?;
//!
//! assert_eq!(schema.field("age").unwrap().to_wire("42")?, bson::Bson::Int64(42));
//!
//! let update = UpdateTranslator::new(&schema).translate(&UpdateExpression::new().inc("age", 1))?;
//! assert_eq!(update, bson::doc! { "$inc": { "age": 1_i64 } });
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_core;

pub mod backend;
pub mod collection;
pub mod error;
pub mod field;
pub mod model;
pub mod pipeline;
pub mod pool;
pub mod query;
pub mod schema;
pub mod update;
pub mod value;
