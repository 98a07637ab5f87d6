//! Connection pool: named stores, lazily connected backends and cached model collections.
//!
//! The pool is an explicit object owned by the host application. Stores are registered by
//! name with a [`StoreBackendBuilder`]; a store connects on first use and stays connected
//! until [`ConnectionPool::shutdown`].
//!
//! # Example
//!
//! ```ignore
//! use docmodel::{memory::InMemoryStoreBuilder, pool::ConnectionPool};
//!
//! let pool = ConnectionPool::builder()
//!     .store("default", InMemoryStoreBuilder::default())
//!     .build();
//!
//! let users = pool.collection::<User>().await?;
//! let events = pool.get_collection("default", "events").await?;
//!
//! pool.shutdown().await?;
//! ```

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use mea::rwlock::RwLock;
use tracing::{debug, info, warn};

use crate::{
    backend::{DynStoreBackendBuilder, StoreBackend, StoreBackendBuilder},
    collection::{CollectionHandle, ModelCollection},
    error::{ConfigurationError, DocumentStoreError, DocumentStoreResult},
    model::{Model, ModelExt},
};

type BackendMap = HashMap<String, Arc<dyn StoreBackend>>;
type CollectionCache = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Registry of named stores with lazily connected backends.
///
/// Connected backends and per-model collections are cached behind async read-write locks.
/// Initialisation is check-then-set: a read lookup, construction outside the lock, then an
/// insert under the write lock that keeps whichever value got there first.
pub struct ConnectionPool {
    builders: HashMap<String, Arc<dyn DynStoreBackendBuilder>>,
    backends: RwLock<BackendMap>,
    collections: RwLock<CollectionCache>,
}

impl ConnectionPool {
    pub fn builder() -> ConnectionPoolBuilder {
        ConnectionPoolBuilder::default()
    }

    /// Names of the registered stores.
    pub fn store_names(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }

    /// Returns the backend of a store, connecting it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownStore`] when no store is registered under
    /// `store_name`, and the builder's error when connecting fails.
    pub async fn backend(&self, store_name: &str) -> DocumentStoreResult<Arc<dyn StoreBackend>> {
        if let Some(backend) = self.backends.read().await.get(store_name) {
            return Ok(Arc::clone(backend));
        }

        let builder = self
            .builders
            .get(store_name)
            .ok_or_else(|| ConfigurationError::UnknownStore(store_name.to_string()))?;

        debug!(store = %store_name, "Connecting store");
        let connected = builder.build_dyn().await?;

        let mut backends = self.backends.write().await;
        let backend = backends
            .entry(store_name.to_string())
            .or_insert_with(|| {
                info!(store = %store_name, "Store connected");
                Arc::clone(&connected)
            });

        if !Arc::ptr_eq(backend, &connected) {
            debug!(store = %store_name, "Store connected concurrently, dropping duplicate backend");
        }

        Ok(Arc::clone(backend))
    }

    /// Returns an untyped handle on a collection of a store.
    pub async fn get_collection(&self, store_name: &str, collection_name: &str) -> DocumentStoreResult<CollectionHandle> {
        let backend = self.backend(store_name).await?;
        Ok(CollectionHandle::new(store_name, collection_name, backend))
    }

    /// Returns the collection of model `M`, created once and cached per model type.
    ///
    /// # Errors
    ///
    /// Fails when the model's schema cannot be declared or its store cannot be connected.
    pub async fn collection<M: Model>(&self) -> DocumentStoreResult<Arc<ModelCollection<M>>> {
        let key = TypeId::of::<M>();

        if let Some(cached) = self.collections.read().await.get(&key) {
            return Self::downcast(Arc::clone(cached));
        }

        let schema = M::schema()?;
        let handle = self.get_collection(M::store_name(), M::collection_name()).await?;
        let created: Arc<dyn Any + Send + Sync> = Arc::new(ModelCollection::<M>::new(handle, schema));

        let cached = {
            let mut collections = self.collections.write().await;
            Arc::clone(collections.entry(key).or_insert(created))
        };
        debug!(collection = M::collection_name(), store = M::store_name(), "Model collection ready");

        Self::downcast(cached)
    }

    /// Shuts down every connected backend and clears the caches.
    ///
    /// The pool stays usable: the next access connects again. Every backend is shut down
    /// even when one fails; the first failure is returned.
    pub async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.collections.write().await.clear();
        let backends: Vec<(String, Arc<dyn StoreBackend>)> = self.backends.write().await.drain().collect();

        let mut first_error = None;
        for (name, backend) in backends {
            match backend.shutdown().await {
                Ok(()) => info!(store = %name, "Store shut down"),
                Err(err) => {
                    warn!(store = %name, error = %err, "Store shutdown failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn downcast<M: Model>(cached: Arc<dyn Any + Send + Sync>) -> DocumentStoreResult<Arc<ModelCollection<M>>> {
        cached.downcast::<ModelCollection<M>>().map_err(|_| {
            DocumentStoreError::Unknown(format!(
                "cached collection for {} has an unexpected type",
                M::collection_name()
            ))
        })
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("stores", &self.builders.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Registers stores on a [`ConnectionPool`].
#[derive(Default)]
pub struct ConnectionPoolBuilder {
    builders: HashMap<String, Arc<dyn DynStoreBackendBuilder>>,
}

impl ConnectionPoolBuilder {
    /// Registers a store under `name`, replacing any earlier registration of that name.
    pub fn store<B>(mut self, name: impl Into<String>, builder: B) -> Self
    where
        B: StoreBackendBuilder + 'static,
    {
        self.builders.insert(name.into(), Arc::new(builder));
        self
    }

    /// Registers the store used by models that do not name one.
    pub fn default_store<B>(self, builder: B) -> Self
    where
        B: StoreBackendBuilder + 'static,
    {
        self.store(crate::model::DEFAULT_STORE, builder)
    }

    pub fn build(self) -> ConnectionPool {
        ConnectionPool {
            builders: self.builders,
            backends: RwLock::new(BackendMap::new()),
            collections: RwLock::new(CollectionCache::new()),
        }
    }
}

impl fmt::Debug for ConnectionPoolBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPoolBuilder")
            .field("stores", &self.builders.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        OnceLock,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use bson::{Bson, Document};

    use super::*;
    use crate::{
        backend::{FindOptions, ReplaceOptions, UpdateOptions, UpdateOutcome},
        error::ConfigResult,
        field::Field,
        schema::Schema,
    };

    #[derive(Debug, Default)]
    struct NullStore {
        shutdowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StoreBackend for NullStore {
        async fn insert_one(&self, _: &str, _: Document) -> DocumentStoreResult<Bson> {
            Ok(Bson::Null)
        }

        async fn insert_many(&self, _: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
            Ok(vec![Bson::Null; documents.len()])
        }

        async fn find_one(&self, _: &str, _: Document, _: FindOptions) -> DocumentStoreResult<Option<Document>> {
            Ok(None)
        }

        async fn find(&self, _: &str, _: Document, _: FindOptions) -> DocumentStoreResult<Vec<Document>> {
            Ok(Vec::new())
        }

        async fn update_one(&self, _: &str, _: Document, _: Document, _: UpdateOptions) -> DocumentStoreResult<UpdateOutcome> {
            Ok(UpdateOutcome::default())
        }

        async fn update_many(&self, _: &str, _: Document, _: Document, _: UpdateOptions) -> DocumentStoreResult<UpdateOutcome> {
            Ok(UpdateOutcome::default())
        }

        async fn delete_one(&self, _: &str, _: Document) -> DocumentStoreResult<u64> {
            Ok(0)
        }

        async fn delete_many(&self, _: &str, _: Document) -> DocumentStoreResult<u64> {
            Ok(0)
        }

        async fn replace_one(
            &self,
            _: &str,
            _: Document,
            _: Document,
            _: ReplaceOptions,
        ) -> DocumentStoreResult<Option<Document>> {
            Ok(None)
        }

        async fn shutdown(&self) -> DocumentStoreResult<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct CountingBuilder {
        builds: Arc<AtomicUsize>,
        shutdowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StoreBackendBuilder for CountingBuilder {
        type Backend = NullStore;

        async fn build(&self) -> DocumentStoreResult<NullStore> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(NullStore {
                shutdowns: Arc::clone(&self.shutdowns),
            })
        }
    }

    struct Note;

    impl Model for Note {
        fn collection_name() -> &'static str {
            "notes"
        }

        fn declare() -> ConfigResult<Schema> {
            Schema::builder("Note").field("body", Field::text()).build()
        }

        fn schema_cell() -> &'static OnceLock<Arc<Schema>> {
            static CELL: OnceLock<Arc<Schema>> = OnceLock::new();
            &CELL
        }
    }

    #[tokio::test]
    async fn test_connects_lazily_and_once() {
        let builder = CountingBuilder::default();
        let builds = Arc::clone(&builder.builds);
        let pool = ConnectionPool::builder().default_store(builder).build();

        assert_eq!(builds.load(Ordering::SeqCst), 0);

        let first = pool.get_collection("default", "notes").await.unwrap();
        let second = pool.get_collection("default", "other").await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(first.backend(), second.backend()));
        assert_eq!(second.name(), "other");
    }

    #[tokio::test]
    async fn test_unknown_store() {
        let pool = ConnectionPool::builder().build();
        let err = pool.get_collection("missing", "notes").await.unwrap_err();
        assert!(matches!(
            err,
            DocumentStoreError::Configuration(ConfigurationError::UnknownStore(name)) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn test_model_collection_is_cached() {
        let pool = ConnectionPool::builder()
            .default_store(CountingBuilder::default())
            .build();

        let first = pool.collection::<Note>().await.unwrap();
        let second = pool.collection::<Note>().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.handle().name(), "notes");
    }

    #[tokio::test]
    async fn test_shutdown_releases_backends() {
        let builder = CountingBuilder::default();
        let builds = Arc::clone(&builder.builds);
        let shutdowns = Arc::clone(&builder.shutdowns);
        let pool = ConnectionPool::builder().default_store(builder).build();

        pool.collection::<Note>().await.unwrap();
        pool.shutdown().await.unwrap();
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);

        pool.collection::<Note>().await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }
}
