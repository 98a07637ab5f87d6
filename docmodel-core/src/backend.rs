//! Storage backend abstraction.
//!
//! A [`StoreBackend`] executes store-native operations on wire documents: filters, updates
//! and documents arriving here have already been compiled, translated and converted by the
//! model layer, so backends never see logical values.
//!
//! # Traits
//!
//! - [`StoreBackend`]: the async interface every backend implements
//! - [`StoreBackendBuilder`]: async factory used by the connection pool to connect lazily
//! - [`DynStoreBackendBuilder`]: object-safe form of the builder, implemented for every builder
//!
//! # Examples
//!
//! ```ignore
//! use bson::doc;
//! use docmodel::backend::{FindOptions, StoreBackend};
//!
//! let id = backend.insert_one("users", doc! { "name": "Alice" }).await?;
//! let found = backend
//!     .find_one("users", doc! { "_id": id }, FindOptions::default())
//!     .await?;
//! ```

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::error::DocumentStoreResult;

/// Projection, ordering and paging of a read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Store projection document (`{field: 1, ...}`).
    pub projection: Option<Document>,
    /// Store sort document (`{field: 1 | -1, ...}`).
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a document built from the filter and update when nothing matches.
    pub upsert: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceOptions {
    pub upsert: bool,
}

/// Result of an update operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Documents matched by the filter.
    pub matched: u64,
    /// Documents actually changed.
    pub modified: u64,
    /// Identifier of the inserted document when the update upserted.
    pub upserted_id: Option<Bson>,
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// Implementations are shared between tasks behind an `Arc` and must support concurrent
/// access. The concurrency model is implementation-specific.
///
/// # Error Handling
///
/// Operations return [`DocumentStoreResult<T>`](crate::error::DocumentStoreResult).
/// Driver failures are reported as [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts one document and returns its `_id`, generating one when the document has none.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentAlreadyExists`](crate::error::DocumentStoreError::DocumentAlreadyExists)
    /// when a document with the same `_id` is already stored.
    async fn insert_one(&self, collection: &str, document: Document) -> DocumentStoreResult<Bson>;

    /// Inserts documents in order and returns their `_id`s.
    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>>;

    /// Returns the first document matching `filter` after sorting and skipping.
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Option<Document>>;

    /// Returns every document matching `filter`.
    ///
    /// # Arguments
    ///
    /// * `collection` - Collection name; a missing collection yields no documents
    /// * `filter` - Store filter document, `{}` matches everything
    /// * `options` - Projection, sort, skip and limit
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Applies `update` to the first document matching `filter`.
    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Applies `update` to every document matching `filter`.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Deletes the first matching document and returns the number deleted.
    async fn delete_one(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64>;

    async fn delete_many(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64>;

    /// Replaces the first matching document and returns the stored replacement.
    ///
    /// Returns `None` when nothing matched and `options.upsert` is off.
    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
        options: ReplaceOptions,
    ) -> DocumentStoreResult<Option<Document>>;

    /// Releases connections and other resources held by the backend.
    async fn shutdown(&self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for Arc<B>
where
    B: StoreBackend + ?Sized,
{
    async fn insert_one(&self, collection: &str, document: Document) -> DocumentStoreResult<Bson> {
        (**self).insert_one(collection, document).await
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        (**self).insert_many(collection, documents).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        (**self).find_one(collection, filter, options).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        (**self).find(collection, filter, options).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        (**self).update_one(collection, filter, update, options).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        (**self).update_many(collection, filter, update, options).await
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        (**self).delete_one(collection, filter).await
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        (**self).delete_many(collection, filter).await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
        options: ReplaceOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        (**self).replace_one(collection, filter, replacement, options).await
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        (**self).shutdown().await
    }
}

/// Factory for a backend. Building may open connections, so it is async and fallible.
#[async_trait]
pub trait StoreBackendBuilder: Send + Sync + Debug {
    type Backend: StoreBackend + 'static;

    async fn build(&self) -> DocumentStoreResult<Self::Backend>;
}

/// Object-safe form of [`StoreBackendBuilder`] used where builders of different backends
/// are kept side by side.
#[async_trait]
pub trait DynStoreBackendBuilder: Send + Sync + Debug {
    async fn build_dyn(&self) -> DocumentStoreResult<Arc<dyn StoreBackend>>;
}

#[async_trait]
impl<B> DynStoreBackendBuilder for B
where
    B: StoreBackendBuilder,
{
    async fn build_dyn(&self) -> DocumentStoreResult<Arc<dyn StoreBackend>> {
        let backend = self.build().await?;
        Ok(Arc::new(backend))
    }
}
