//! Main docmodel crate: typed document models on top of pluggable document stores.
//!
//! This crate is the primary entry point. It re-exports the core types from
//! `docmodel-core` and provides access to the storage backends.
//!
//! # Features
//!
//! - **Typed fields** - Every value passes through its field's conversion pipeline on the way
//!   to and from the store
//! - **Validated updates** - Update expressions are checked against each field's operator
//!   whitelist and their operands converted before they reach the store
//! - **Schema-checked queries** - Filters, sorts and projections are resolved against the
//!   model's schema
//! - **Multiple backends** - In-memory and MongoDB stores behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::{Arc, OnceLock};
//!
//! use docmodel::{memory::InMemoryStoreBuilder, prelude::*};
//!
//! struct User;
//!
//! impl Model for User {
//!     fn collection_name() -> &'static str { "users" }
//!
//!     fn declare() -> ConfigResult<Schema> {
//!         Schema::builder("User")
//!             .field("_id", Field::object_id().auto(true))
//!             .field("name", Field::text())
//!             .field("age", Field::integer().default(0))
//!             .build()
//!     }
//!
//!     fn schema_cell() -> &'static OnceLock<Arc<Schema>> {
//!         static CELL: OnceLock<Arc<Schema>> = OnceLock::new();
//!         &CELL
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = ConnectionPool::builder()
//!         .default_store(InMemoryStoreBuilder::default())
//!         .build();
//!
//!     let users = pool.collection::<User>().await?;
//!
//!     let mut alice = Instance::<User>::from_values([("name", "Alice"), ("age", "30")])?;
//!     users.insert(&mut alice).await?;
//!
//!     users
//!         .update_one(
//!             Some(Filter::eq("name", "Alice")),
//!             &UpdateExpression::new().inc("age", 1),
//!             UpdateOptions::default(),
//!         )
//!         .await?;
//!
//!     let adults = users
//!         .find(Query::builder().filter(Filter::gte("age", 18)).sort("age", SortDirection::Desc).build())
//!         .await?;
//!     println!("Adults: {:?}", adults);
//!
//!     pool.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - `mongodb` - Persistent MongoDB backend (requires the `mongodb` feature)

pub mod prelude;

pub use docmodel_core::{backend, collection, error, field, model, pipeline, pool, query, schema, update, value};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmodel_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmodel_mongodb::{MongoDbSettings, MongoDbStore, MongoDbStoreBuilder};
}
