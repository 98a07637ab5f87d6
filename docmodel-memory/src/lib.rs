//! In-memory document storage backend for docmodel.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Store-native filters** - Evaluates the filter documents produced by the core crate
//! - **Update operators** - Applies translated update documents, including upserts
//! - **Sorting and projection** - Multi-key sorts, skip/limit and top-level projections
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{memory::InMemoryStoreBuilder, pool::ConnectionPool, prelude::*};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = ConnectionPool::builder()
//!         .default_store(InMemoryStoreBuilder::default())
//!         .build();
//!
//!     let users = pool.collection::<User>().await?;
//!     let mut alice = Instance::<User>::from_values([("name", "Alice")])?;
//!     users.insert(&mut alice).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_memory;

mod evaluator;
pub mod store;
mod updater;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
