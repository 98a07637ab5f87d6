//! In-memory storage implementation for document stores.
//!
//! Collections are vectors of BSON documents kept in insertion order behind an async-safe
//! read-write lock. Filters, sorts, projections and update documents use the same operator
//! syntax as the translated documents produced by the core crate.

use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use mea::rwlock::RwLock;
use tracing::{debug, trace};

use docmodel_core::{
    backend::{FindOptions, ReplaceOptions, StoreBackend, StoreBackendBuilder, UpdateOptions, UpdateOutcome},
    error::{DocumentStoreError, DocumentStoreResult},
};

use crate::{
    evaluator::{DocumentEvaluator, sort_cmp, values_at},
    updater::apply_update,
};

type StoreMap = HashMap<String, Vec<Document>>;

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Performance
///
/// Queries scan all documents in a collection (no indexing). For small to medium
/// datasets this is typically acceptable. For larger datasets use the MongoDB backend.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel_core::backend::{FindOptions, StoreBackend};
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// let id = store.insert_one("users", doc! { "name": "Alice", "age": 30 }).await?;
///
/// let found = store.find("users", doc! { "age": { "$gte": 18 } }, FindOptions::default()).await?;
/// assert_eq!(found.len(), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> documents in insertion order
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for registering the store on a connection pool.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Names of the collections holding at least one write.
    pub async fn collection_names(&self) -> Vec<String> {
        self.store.read().await.keys().cloned().collect()
    }

    async fn matching(&self, collection: &str, filter: &Document, options: &FindOptions) -> DocumentStoreResult<Vec<Document>> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched = DocumentEvaluator::filter_documents(documents, filter)?;
        if let Some(sort) = &options.sort {
            sort_documents(&mut matched, sort);
        }

        let skip = options.skip.map_or(0, |n| usize::try_from(n).unwrap_or(usize::MAX));
        let limit = options.limit.map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));

        Ok(matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| project(doc, options.projection.as_ref()))
            .collect())
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        multi: bool,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let mut store = self.store.write().await;
        let documents = store.entry(collection.to_string()).or_default();

        let mut outcome = UpdateOutcome::default();
        for document in documents.iter_mut() {
            if !DocumentEvaluator::new(document).evaluate(&filter)? {
                continue;
            }

            let mut updated = document.clone();
            apply_update(&mut updated, &update, false)?;
            if updated.get("_id") != document.get("_id") {
                return Err(DocumentStoreError::InvalidDocument("_id is immutable".to_string()));
            }

            outcome.matched += 1;
            if updated != *document {
                outcome.modified += 1;
                *document = updated;
            }

            if !multi {
                break;
            }
        }

        if outcome.matched == 0 && options.upsert {
            let mut inserted = seed_from_filter(&filter)?;
            apply_update(&mut inserted, &update, true)?;
            let id = ensure_id(&mut inserted);

            if contains_id(documents, &id) {
                return Err(DocumentStoreError::DocumentAlreadyExists(id.to_string(), collection.to_string()));
            }
            documents.push(inserted);
            outcome.upserted_id = Some(id);
        }

        trace!(
            collection = %collection,
            matched = outcome.matched,
            modified = outcome.modified,
            upserted = outcome.upserted_id.is_some(),
            "Applied update"
        );

        Ok(outcome)
    }

    async fn delete(&self, collection: &str, filter: Document, multi: bool) -> DocumentStoreResult<u64> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };

        let mut matched = Vec::new();
        for (idx, document) in documents.iter().enumerate() {
            if DocumentEvaluator::new(document).evaluate(&filter)? {
                matched.push(idx);
                if !multi {
                    break;
                }
            }
        }

        for idx in matched.iter().rev() {
            documents.remove(*idx);
        }

        let deleted = matched.len() as u64;
        trace!(collection = %collection, deleted, "Deleted documents");
        Ok(deleted)
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_one(&self, collection: &str, mut document: Document) -> DocumentStoreResult<Bson> {
        let mut store = self.store.write().await;
        let documents = store.entry(collection.to_string()).or_default();

        let id = ensure_id(&mut document);
        if contains_id(documents, &id) {
            return Err(DocumentStoreError::DocumentAlreadyExists(id.to_string(), collection.to_string()));
        }
        documents.push(document);

        trace!(collection = %collection, id = %id, "Inserted document");
        Ok(id)
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        let mut store = self.store.write().await;
        let stored = store.entry(collection.to_string()).or_default();

        let mut prepared = Vec::with_capacity(documents.len());
        let mut ids = Vec::with_capacity(documents.len());
        for mut document in documents {
            let id = ensure_id(&mut document);
            if contains_id(stored, &id) || ids.contains(&id) {
                return Err(DocumentStoreError::DocumentAlreadyExists(id.to_string(), collection.to_string()));
            }
            ids.push(id);
            prepared.push(document);
        }
        stored.extend(prepared);

        debug!(collection = %collection, count = ids.len(), "Inserted documents");
        Ok(ids)
    }

    async fn find_one(&self, collection: &str, filter: Document, options: FindOptions) -> DocumentStoreResult<Option<Document>> {
        let options = FindOptions {
            limit: Some(1),
            ..options
        };
        Ok(self.matching(collection, &filter, &options).await?.into_iter().next())
    }

    async fn find(&self, collection: &str, filter: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>> {
        self.matching(collection, &filter, &options).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.update(collection, filter, update, options, false).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.update(collection, filter, update, options, true).await
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        self.delete(collection, filter, false).await
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        self.delete(collection, filter, true).await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        mut replacement: Document,
        options: ReplaceOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        if replacement.keys().any(|key| key.starts_with('$')) {
            return Err(DocumentStoreError::InvalidDocument(
                "replacement documents cannot contain update operators".to_string(),
            ));
        }

        let mut store = self.store.write().await;
        let documents = store.entry(collection.to_string()).or_default();

        let mut position = None;
        for (idx, document) in documents.iter().enumerate() {
            if DocumentEvaluator::new(document).evaluate(&filter)? {
                position = Some(idx);
                break;
            }
        }

        match position {
            Some(idx) => {
                let existing = documents[idx].get("_id").cloned().unwrap_or(Bson::Null);
                match replacement.get("_id") {
                    Some(id) if *id != existing => {
                        return Err(DocumentStoreError::InvalidDocument("_id is immutable".to_string()));
                    }
                    Some(_) => {}
                    None => {
                        replacement.insert("_id", existing);
                    }
                }
                documents[idx] = replacement.clone();
                trace!(collection = %collection, "Replaced document");
                Ok(Some(replacement))
            }
            None if options.upsert => {
                if !replacement.contains_key("_id") {
                    if let Some(id) = seed_from_filter(&filter)?.remove("_id") {
                        replacement.insert("_id", id);
                    }
                }
                let id = ensure_id(&mut replacement);
                if contains_id(documents, &id) {
                    return Err(DocumentStoreError::DocumentAlreadyExists(id.to_string(), collection.to_string()));
                }
                documents.push(replacement.clone());
                trace!(collection = %collection, id = %id, "Upserted replacement");
                Ok(Some(replacement))
            }
            None => Ok(None),
        }
    }
}

/// Returns the `_id` of `document`, generating an `ObjectId` when it has none.
fn ensure_id(document: &mut Document) -> Bson {
    match document.get("_id") {
        Some(id) => id.clone(),
        None => {
            let id = Bson::ObjectId(ObjectId::new());
            let mut with_id = Document::new();
            with_id.insert("_id", id.clone());
            for (key, value) in std::mem::take(document) {
                with_id.insert(key, value);
            }
            *document = with_id;
            id
        }
    }
}

fn contains_id(documents: &[Document], id: &Bson) -> bool {
    documents.iter().any(|doc| doc.get("_id") == Some(id))
}

/// Builds the starting document of an upsert from the equality conditions of `filter`.
fn seed_from_filter(filter: &Document) -> DocumentStoreResult<Document> {
    let mut fields = Document::new();
    for (key, condition) in filter {
        if key.starts_with('$') {
            if key == "$and" {
                if let Bson::Array(clauses) = condition {
                    for clause in clauses.iter().filter_map(Bson::as_document) {
                        for (path, value) in equality_fields(clause) {
                            fields.insert(path, value);
                        }
                    }
                }
            }
            continue;
        }
        if let Some(value) = equality_value(condition) {
            fields.insert(key.clone(), value);
        }
    }

    let mut seed = Document::new();
    if let Some(id) = fields.remove("_id") {
        seed.insert("_id", id);
    }
    if !fields.is_empty() {
        apply_update(&mut seed, &doc! { "$set": fields }, true)?;
    }
    Ok(seed)
}

fn equality_fields(clause: &Document) -> Vec<(String, Bson)> {
    clause
        .iter()
        .filter(|(key, _)| !key.starts_with('$'))
        .filter_map(|(key, condition)| equality_value(condition).map(|value| (key.clone(), value)))
        .collect()
}

fn equality_value(condition: &Bson) -> Option<Bson> {
    match condition {
        Bson::Document(ops) if ops.keys().any(|op| op.starts_with('$')) => ops.get("$eq").cloned(),
        value => Some(value.clone()),
    }
}

fn sort_documents(documents: &mut [&Document], sort: &Document) {
    let keys: Vec<(&str, bool)> = sort
        .iter()
        .map(|(key, direction)| (key.as_str(), is_descending(direction)))
        .collect();

    documents.sort_by(|a, b| {
        for (key, descending) in &keys {
            let left = values_at(a, key).into_iter().next();
            let right = values_at(b, key).into_iter().next();
            let ordering = sort_cmp(left, right);
            let ordering = if *descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn is_descending(direction: &Bson) -> bool {
    match direction {
        Bson::Int32(n) => *n < 0,
        Bson::Int64(n) => *n < 0,
        Bson::Double(n) => *n < 0.0,
        _ => false,
    }
}

fn is_included(flag: &Bson) -> bool {
    match flag {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        _ => true,
    }
}

/// Applies a top-level projection. `_id` is kept unless it is excluded explicitly.
fn project(document: &Document, projection: Option<&Document>) -> Document {
    let Some(projection) = projection else {
        return document.clone();
    };

    let inclusive = projection
        .iter()
        .any(|(key, flag)| key != "_id" && is_included(flag));

    document
        .iter()
        .filter(|(key, _)| match projection.get(key.as_str()) {
            Some(flag) => is_included(flag),
            None => !inclusive || key.as_str() == "_id",
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// Each build creates an empty store, so a pool that is shut down and reconnected starts
/// from scratch. Use [`InMemoryStoreBuilder::shared`] to keep the data across reconnects.
///
/// # Example
///
/// ```ignore
/// use docmodel::{memory::InMemoryStoreBuilder, pool::ConnectionPool};
///
/// let pool = ConnectionPool::builder()
///     .default_store(InMemoryStoreBuilder::default())
///     .build();
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryStoreBuilder {
    shared: Option<InMemoryStore>,
}

impl InMemoryStoreBuilder {
    /// Hands out clones of `store` instead of creating new stores.
    pub fn shared(store: InMemoryStore) -> Self {
        Self { shared: Some(store) }
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(&self) -> DocumentStoreResult<Self::Backend> {
        Ok(self.shared.clone().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .insert_many(
                "users",
                vec![
                    doc! { "_id": 1, "name": "Alice", "age": 30_i64, "tags": ["admin"] },
                    doc! { "_id": 2, "name": "Bob", "age": 25_i64, "tags": [] },
                    doc! { "_id": 3, "name": "Carol", "age": 35_i64, "profile": { "city": "Porto" } },
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_insert_assigns_object_id() {
        let store = InMemoryStore::new();
        let id = store.insert_one("users", doc! { "name": "Alice" }).await.unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));

        let found = store.find_one("users", doc! {}, FindOptions::default()).await.unwrap().unwrap();
        assert_eq!(found.get("_id"), Some(&id));
        assert_eq!(found.keys().next().map(String::as_str), Some("_id"));
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_id() {
        let store = seeded().await;
        let err = store.insert_one("users", doc! { "_id": 1 }).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::DocumentAlreadyExists(..)));

        let err = store
            .insert_many("users", vec![doc! { "_id": 9 }, doc! { "_id": 9 }])
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::DocumentAlreadyExists(..)));
        assert_eq!(store.find("users", doc! {}, FindOptions::default()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_find_sort_skip_limit_projection() {
        let store = seeded().await;
        let options = FindOptions {
            projection: Some(doc! { "name": 1 }),
            sort: Some(doc! { "age": -1 }),
            skip: Some(1),
            limit: Some(1),
        };

        let found = store.find("users", doc! { "age": { "$gte": 25_i64 } }, options).await.unwrap();
        assert_eq!(found, vec![doc! { "_id": 1, "name": "Alice" }]);

        let found = store
            .find("users", doc! { "profile.city": "Porto" }, FindOptions::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let missing = store.find("other", doc! {}, FindOptions::default()).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_update_one_and_many() {
        let store = seeded().await;

        let outcome = store
            .update_one("users", doc! { "name": "Bob" }, doc! { "$inc": { "age": 1_i64 } }, UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!((outcome.matched, outcome.modified), (1, 1));

        let outcome = store
            .update_many(
                "users",
                doc! { "age": { "$gt": 20_i64 } },
                doc! { "$set": { "active": true } },
                UpdateOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!((outcome.matched, outcome.modified), (3, 3));

        let outcome = store
            .update_many("users", doc! {}, doc! { "$set": { "active": true } }, UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!((outcome.matched, outcome.modified), (3, 0));

        let bob = store
            .find_one("users", doc! { "_id": 2 }, FindOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bob.get("age"), Some(&Bson::Int64(26)));
    }

    #[tokio::test]
    async fn test_upsert_seeds_from_filter() {
        let store = InMemoryStore::new();
        let outcome = store
            .update_one(
                "counters",
                doc! { "name": "visits" },
                doc! { "$inc": { "count": 1_i64 }, "$setOnInsert": { "created": true } },
                UpdateOptions { upsert: true },
            )
            .await
            .unwrap();
        assert_eq!(outcome.matched, 0);
        assert!(outcome.upserted_id.is_some());

        let stored = store
            .find_one("counters", doc! {}, FindOptions { projection: Some(doc! { "_id": 0 }), ..Default::default() })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, doc! { "name": "visits", "count": 1_i64, "created": true });
    }

    #[tokio::test]
    async fn test_update_cannot_change_id() {
        let store = seeded().await;
        let err = store
            .update_one("users", doc! { "_id": 1 }, doc! { "$set": { "_id": 5 } }, UpdateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn test_replace_one() {
        let store = seeded().await;
        let replaced = store
            .replace_one("users", doc! { "_id": 2 }, doc! { "name": "Robert" }, ReplaceOptions::default())
            .await
            .unwrap();
        assert_eq!(replaced, Some(doc! { "name": "Robert", "_id": 2 }));

        let none = store
            .replace_one("users", doc! { "_id": 42 }, doc! { "name": "Nobody" }, ReplaceOptions::default())
            .await
            .unwrap();
        assert!(none.is_none());

        let upserted = store
            .replace_one("users", doc! { "_id": 42 }, doc! { "name": "Dana" }, ReplaceOptions { upsert: true })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(upserted.get("_id"), Some(&Bson::Int32(42)));

        let err = store
            .replace_one("users", doc! { "_id": 1 }, doc! { "$set": { "name": "x" } }, ReplaceOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn test_delete_one_and_many() {
        let store = seeded().await;
        assert_eq!(store.delete_one("users", doc! { "age": { "$gt": 0_i64 } }).await.unwrap(), 1);
        assert_eq!(store.delete_many("users", doc! { "age": { "$gt": 0_i64 } }).await.unwrap(), 2);
        assert_eq!(store.delete_many("missing", doc! {}).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shared_builder_keeps_data() {
        let store = InMemoryStore::new();
        store.insert_one("users", doc! { "_id": 1 }).await.unwrap();

        let rebuilt = InMemoryStoreBuilder::shared(store).build().await.unwrap();
        assert_eq!(rebuilt.collection_names().await, vec!["users".to_string()]);

        let fresh = InMemoryStoreBuilder::default().build().await.unwrap();
        assert!(fresh.collection_names().await.is_empty());
    }
}
