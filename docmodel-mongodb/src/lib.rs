//! MongoDB backend implementation for docmodel.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. The
//! filters, projections, sorts and update documents produced by the core crate are already
//! in MongoDB's operator syntax and are passed to the official driver unchanged.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docmodel = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Connection
//!
//! Stores are registered on a connection pool with a [`MongoDbStoreBuilder`], created from a
//! connection string or from deserialised [`MongoDbSettings`]. The client connects when the
//! pool first uses the store.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::{mongodb::{MongoDbSettings, MongoDbStoreBuilder}, pool::ConnectionPool};
//!
//! let settings: MongoDbSettings = serde_json::from_str(&config)?;
//!
//! let pool = ConnectionPool::builder()
//!     .default_store(MongoDbStoreBuilder::from(settings))
//!     .store("analytics", MongoDbStoreBuilder::new("mongodb://localhost:27017", "analytics"))
//!     .build();
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_mongodb;

pub mod store;

pub use store::{MongoDbSettings, MongoDbStore, MongoDbStoreBuilder};
