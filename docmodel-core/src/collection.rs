//! Collection handles.
//!
//! - [`CollectionHandle`] - untyped collection working on wire documents
//! - [`ModelCollection`] - collection of a [`Model`], where every document passes through the
//!   schema's conversion pipelines, every filter through the [`FilterCompiler`] and every
//!   update through the [`UpdateTranslator`]
//!
//! Handles are obtained from a [`ConnectionPool`](crate::pool::ConnectionPool).
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let users = pool.collection::<User>().await?;
//!
//! let mut alice = Instance::<User>::from_values([("name", "Alice"), ("age", "30")])?;
//! users.insert(&mut alice).await?;
//!
//! let adults = users
//!     .find(Query::filtered(Filter::gte("age", 18)))
//!     .await?;
//!
//! users
//!     .update_one(Some(Filter::eq("name", "Alice")), &UpdateExpression::new().inc("age", 1), UpdateOptions::default())
//!     .await?;
//! ```

use std::{collections::BTreeSet, marker::PhantomData, sync::Arc};

use bson::{Bson, Document, doc};
use tracing::{debug, trace};

use crate::{
    backend::{FindOptions, ReplaceOptions, StoreBackend, UpdateOptions, UpdateOutcome},
    error::{DocumentStoreError, DocumentStoreResult, ValidationError},
    model::{ID_FIELD, Instance, Model},
    query::{Expr, FilterCompiler, Query},
    schema::Schema,
    update::{UpdateExpression, UpdateTranslator},
};

/// An untyped collection bound to a connected backend.
///
/// Documents, filters and updates are passed to the backend as they are.
#[derive(Debug, Clone)]
pub struct CollectionHandle {
    store: String,
    name: String,
    backend: Arc<dyn StoreBackend>,
}

impl CollectionHandle {
    pub(crate) fn new(store: impl Into<String>, name: impl Into<String>, backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            store: store.into(),
            name: name.into(),
            backend,
        }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the store the collection belongs to.
    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// Inserts a document and returns its `_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentStoreError`](crate::error::DocumentStoreError) if the operation fails.
    pub async fn insert_one(&self, document: Document) -> DocumentStoreResult<Bson> {
        self.backend.insert_one(&self.name, document).await
    }

    pub async fn insert_many(&self, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        self.backend.insert_many(&self.name, documents).await
    }

    pub async fn find_one(&self, filter: Document, options: FindOptions) -> DocumentStoreResult<Option<Document>> {
        self.backend.find_one(&self.name, filter, options).await
    }

    /// Returns every document matching `filter`.
    ///
    /// # Arguments
    ///
    /// * `filter` - Store filter document
    /// * `options` - Projection, sort, skip and limit
    pub async fn find(&self, filter: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>> {
        self.backend.find(&self.name, filter, options).await
    }

    pub async fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.backend.update_one(&self.name, filter, update, options).await
    }

    pub async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.backend.update_many(&self.name, filter, update, options).await
    }

    pub async fn delete_one(&self, filter: Document) -> DocumentStoreResult<u64> {
        self.backend.delete_one(&self.name, filter).await
    }

    pub async fn delete_many(&self, filter: Document) -> DocumentStoreResult<u64> {
        self.backend.delete_many(&self.name, filter).await
    }

    /// Replaces the first document matching `filter` and returns the stored replacement.
    pub async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        options: ReplaceOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        self.backend.replace_one(&self.name, filter, replacement, options).await
    }
}

/// The collection of model `M`.
///
/// Reads decode stored documents into [`Instance`]s, writes encode instances through the
/// schema, filters are compiled against the schema and updates are validated by the
/// translator before anything reaches the backend.
pub struct ModelCollection<M: Model> {
    handle: CollectionHandle,
    schema: Arc<Schema>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> ModelCollection<M> {
    pub(crate) fn new(handle: CollectionHandle, schema: Arc<Schema>) -> Self {
        Self {
            handle,
            schema,
            _model: PhantomData,
        }
    }

    pub fn handle(&self) -> &CollectionHandle {
        &self.handle
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Inserts an instance and records the identifier the store assigned.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Validation`] when a value is rejected by its field,
    /// and whatever the backend reports otherwise.
    pub async fn insert(&self, instance: &mut Instance<M>) -> DocumentStoreResult<Bson> {
        let document = instance.to_wire()?;
        let id = self.handle.insert_one(document).await?;

        instance.assign_id(id.clone())?;
        instance.mark_saved();
        debug!(collection = %self.handle.name(), id = %id, "Inserted document");

        Ok(id)
    }

    /// Inserts instances in order. Nothing is written when any instance fails validation.
    pub async fn insert_many(&self, instances: &mut [Instance<M>]) -> DocumentStoreResult<Vec<Bson>> {
        let documents = instances
            .iter()
            .map(Instance::to_wire)
            .collect::<Result<Vec<_>, _>>()?;

        let ids = self.handle.insert_many(documents).await?;
        for (instance, id) in instances.iter_mut().zip(&ids) {
            instance.assign_id(id.clone())?;
            instance.mark_saved();
        }
        debug!(collection = %self.handle.name(), count = ids.len(), "Inserted documents");

        Ok(ids)
    }

    /// Returns the first instance matching the query.
    pub async fn find_one(&self, query: Query) -> DocumentStoreResult<Option<Instance<M>>> {
        let (filter, options) = self.compile_query(&query)?;
        let found = self.handle.find_one(filter, options).await?;

        found
            .map(|doc| Instance::from_wire(&doc, query.projection))
            .transpose()
    }

    /// Returns every instance matching the query.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Field`] when the query names an unknown field and
    /// [`DocumentStoreError::Validation`] when a filter value or a stored value cannot be
    /// converted.
    pub async fn find(&self, query: Query) -> DocumentStoreResult<Vec<Instance<M>>> {
        let (filter, options) = self.compile_query(&query)?;
        let found = self.handle.find(filter, options).await?;
        trace!(collection = %self.handle.name(), count = found.len(), "Decoding documents");

        found
            .iter()
            .map(|doc| Instance::from_wire(doc, query.projection.clone()))
            .collect()
    }

    /// Applies a validated update to the first instance matching `filter`.
    pub async fn update_one(
        &self,
        filter: Option<Expr>,
        update: &UpdateExpression,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let filter = self.compile_filter(filter.as_ref())?;
        let update = self.translate(update)?;

        self.handle.update_one(filter, update, options).await
    }

    /// Applies a validated update to every instance matching `filter`.
    pub async fn update_many(
        &self,
        filter: Option<Expr>,
        update: &UpdateExpression,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let filter = self.compile_filter(filter.as_ref())?;
        let update = self.translate(update)?;

        self.handle.update_many(filter, update, options).await
    }

    pub async fn delete_one(&self, filter: Option<Expr>) -> DocumentStoreResult<u64> {
        let filter = self.compile_filter(filter.as_ref())?;
        self.handle.delete_one(filter).await
    }

    pub async fn delete_many(&self, filter: Option<Expr>) -> DocumentStoreResult<u64> {
        let filter = self.compile_filter(filter.as_ref())?;
        self.handle.delete_many(filter).await
    }

    /// Replaces the first instance matching `filter` with `replacement`.
    ///
    /// Returns the stored replacement, or `None` when nothing matched and no upsert was
    /// requested.
    pub async fn replace_one(
        &self,
        filter: Option<Expr>,
        replacement: &Instance<M>,
        options: ReplaceOptions,
    ) -> DocumentStoreResult<Option<Instance<M>>> {
        let filter = self.compile_filter(filter.as_ref())?;
        let document = replacement.to_wire()?;

        self.handle
            .replace_one(filter, document, options)
            .await?
            .map(|doc| Instance::from_wire(&doc, None))
            .transpose()
    }

    /// Writes an instance back to the store.
    ///
    /// Unchanged instances are skipped. An instance without an identifier is inserted; a
    /// projected instance only writes its projected fields, removing the ones it no longer
    /// holds; any other instance replaces the stored document, inserting it when it is gone.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::Validation`] when a value is rejected, or a required projected
    ///   field was unset
    /// - [`DocumentStoreError::DocumentNotFound`] when a projected instance's document is gone
    pub async fn save(&self, instance: &mut Instance<M>) -> DocumentStoreResult<()> {
        if !instance.is_changed() {
            trace!(collection = %self.handle.name(), "Skipping save of unchanged instance");
            return Ok(());
        }

        let mut document = instance.to_wire()?;
        let Some(id) = document.get(ID_FIELD).cloned() else {
            self.insert(instance).await?;
            return Ok(());
        };

        let filter = doc! { "_id": id.clone() };
        if let Some(projection) = instance.projection() {
            document.remove(ID_FIELD);
            let update = self.projected_update(projection, document)?;
            if !update.is_empty() {
                let outcome = self.handle.update_one(filter, update, UpdateOptions::default()).await?;
                if outcome.matched == 0 {
                    return Err(DocumentStoreError::DocumentNotFound(
                        id.to_string(),
                        self.handle.name().to_string(),
                    ));
                }
            }
        } else {
            self.handle
                .replace_one(filter, document, ReplaceOptions { upsert: true })
                .await?;
        }

        instance.mark_saved();
        debug!(collection = %self.handle.name(), id = %id, "Saved document");

        Ok(())
    }

    /// Builds the update for a projected instance. Projected fields that no longer hold a
    /// value are removed from the store, or set to `null` when the field is nullable.
    fn projected_update(&self, projection: &BTreeSet<String>, mut set: Document) -> DocumentStoreResult<Document> {
        let cleared: Vec<&String> = projection
            .iter()
            .filter(|name| name.as_str() != ID_FIELD && !set.contains_key(name.as_str()))
            .collect();

        let mut unset = Document::new();
        for name in cleared {
            let Some(field) = self.schema.field(name) else {
                continue;
            };
            if field.is_required() && !field.is_auto() {
                return Err(ValidationError::new(name.as_str(), field.kind().type_name(), "value required").into());
            }
            if field.is_nullable() {
                set.insert(name.as_str(), Bson::Null);
            } else {
                unset.insert(name.as_str(), "");
            }
        }

        let mut update = Document::new();
        if !set.is_empty() {
            update.insert("$set", set);
        }
        if !unset.is_empty() {
            update.insert("$unset", unset);
        }
        Ok(update)
    }

    fn compile_filter(&self, filter: Option<&Expr>) -> DocumentStoreResult<Document> {
        FilterCompiler::new(&self.schema).compile(filter)
    }

    fn compile_query(&self, query: &Query) -> DocumentStoreResult<(Document, FindOptions)> {
        let mut compiler = FilterCompiler::new(&self.schema);
        let filter = compiler.compile(query.filter.as_ref())?;

        let options = FindOptions {
            projection: compiler.compile_projection(query.projection.as_ref())?,
            sort: compiler.compile_sort(&query.sort)?,
            skip: query.offset.map(|n| n as u64),
            limit: query.limit.map(|n| n as u64),
        };

        Ok((filter, options))
    }

    fn translate(&self, update: &UpdateExpression) -> DocumentStoreResult<Document> {
        if update.is_empty() {
            return Err(DocumentStoreError::InvalidDocument("update expression is empty".to_string()));
        }

        let translated = UpdateTranslator::new(&self.schema).translate(update)?;
        trace!(collection = %self.handle.name(), update = %translated, "Translated update");

        Ok(translated)
    }
}

impl<M: Model> Clone for ModelCollection<M> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            schema: Arc::clone(&self.schema),
            _model: PhantomData,
        }
    }
}

impl<M: Model> std::fmt::Debug for ModelCollection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCollection")
            .field("handle", &self.handle)
            .field("schema", &self.schema.name())
            .finish()
    }
}
