use async_trait::async_trait;
use bson::{Bson, Document};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, FindOneOptions, FindOptions as MongoFindOptions, ReturnDocument},
};
use serde::Deserialize;
use tracing::{debug, info, trace};

use docmodel_core::{
    backend::{FindOptions, ReplaceOptions, StoreBackend, StoreBackendBuilder, UpdateOptions, UpdateOutcome},
    error::{DocumentStoreError, DocumentStoreResult},
};

const DUPLICATE_KEY: i32 = 11000;

/// A [`StoreBackend`] on a MongoDB database.
///
/// Filters, updates and documents are handed to the driver as they are; they already are in
/// MongoDB's operator syntax.
#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: impl Into<String>) -> Self {
        Self {
            client,
            database: database.into(),
        }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client.database(&self.database).collection(collection_name)
    }
}

fn backend_error(collection: &str) -> impl Fn(MongoError) -> DocumentStoreError + '_ {
    move |err| match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY => {
            DocumentStoreError::DocumentAlreadyExists(write.message.clone(), collection.to_string())
        }
        _ => DocumentStoreError::Backend(err.to_string()),
    }
}

fn find_options(options: FindOptions) -> MongoFindOptions {
    let mut converted = MongoFindOptions::default();
    converted.projection = options.projection;
    converted.sort = options.sort;
    converted.skip = options.skip;
    converted.limit = options.limit.map(|n| i64::try_from(n).unwrap_or(i64::MAX));
    converted
}

fn find_one_options(options: FindOptions) -> FindOneOptions {
    let mut converted = FindOneOptions::default();
    converted.projection = options.projection;
    converted.sort = options.sort;
    converted.skip = options.skip;
    converted
}

fn update_outcome(result: mongodb::results::UpdateResult) -> UpdateOutcome {
    UpdateOutcome {
        matched: result.matched_count,
        modified: result.modified_count,
        upserted_id: result.upserted_id,
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn insert_one(&self, collection: &str, document: Document) -> DocumentStoreResult<Bson> {
        let result = self
            .get_collection(collection)
            .insert_one(document)
            .await
            .map_err(backend_error(collection))?;

        trace!(collection = %collection, id = %result.inserted_id, "Inserted document");
        Ok(result.inserted_id)
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let count = documents.len();
        let mut result = self
            .get_collection(collection)
            .insert_many(documents)
            .await
            .map_err(backend_error(collection))?;

        (0..count)
            .map(|idx| {
                result.inserted_ids.remove(&idx).ok_or_else(|| {
                    DocumentStoreError::Backend(format!("no identifier reported for document {}", idx))
                })
            })
            .collect()
    }

    async fn find_one(&self, collection: &str, filter: Document, options: FindOptions) -> DocumentStoreResult<Option<Document>> {
        self.get_collection(collection)
            .find_one(filter)
            .with_options(find_one_options(options))
            .await
            .map_err(backend_error(collection))
    }

    async fn find(&self, collection: &str, filter: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>> {
        self.get_collection(collection)
            .find(filter)
            .with_options(find_options(options))
            .await
            .map_err(backend_error(collection))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error(collection))
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.get_collection(collection)
            .update_one(filter, update)
            .upsert(options.upsert)
            .await
            .map(update_outcome)
            .map_err(backend_error(collection))
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.get_collection(collection)
            .update_many(filter, update)
            .upsert(options.upsert)
            .await
            .map(update_outcome)
            .map_err(backend_error(collection))
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        self.get_collection(collection)
            .delete_one(filter)
            .await
            .map(|result| result.deleted_count)
            .map_err(backend_error(collection))
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        self.get_collection(collection)
            .delete_many(filter)
            .await
            .map(|result| result.deleted_count)
            .map_err(backend_error(collection))
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
        options: ReplaceOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        self.get_collection(collection)
            .find_one_and_replace(filter, replacement)
            .upsert(options.upsert)
            .return_document(ReturnDocument::After)
            .await
            .map_err(backend_error(collection))
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.client.clone().shutdown().await;
        info!(database = %self.database, "MongoDB client shut down");

        Ok(())
    }
}

/// Connection settings of a MongoDB store, deserialisable from host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MongoDbSettings {
    /// Connection string, e.g. `mongodb://localhost:27017`.
    pub dsn: String,
    /// Database holding the collections.
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

impl From<MongoDbSettings> for MongoDbStoreBuilder {
    fn from(settings: MongoDbSettings) -> Self {
        Self {
            dsn: settings.dsn,
            database: settings.database,
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(&self) -> DocumentStoreResult<Self::Backend> {
        debug!(database = %self.database, "Connecting to MongoDB");

        let options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;
        let client = Client::with_options(options).map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        Ok(MongoDbStore::new(client, self.database.clone()))
    }
}
