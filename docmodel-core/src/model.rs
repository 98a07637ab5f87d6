//! Models and their instances.
//!
//! A [`Model`] ties a Rust type to a collection and a [`Schema`]. The schema is declared by
//! the model and assembled once per type; every [`Instance`] of the model shares it.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::{Arc, OnceLock};
//! use docmodel::prelude::*;
//!
//! pub struct User;
//!
//! impl Model for User {
//!     fn collection_name() -> &'static str {
//!         "users"
//!     }
//!
//!     fn declare() -> ConfigResult<Schema> {
//!         Schema::builder("User")
//!             .field("_id", Field::object_id().auto(true))
//!             .field("name", Field::text())
//!             .build()
//!     }
//!
//!     fn schema_cell() -> &'static OnceLock<Arc<Schema>> {
//!         static CELL: OnceLock<Arc<Schema>> = OnceLock::new();
//!         &CELL
//!     }
//! }
//!
//! let mut user = Instance::<User>::new()?;
//! user.set("name", "Alice")?;
//! ```

use std::{
    collections::BTreeSet,
    fmt,
    marker::PhantomData,
    sync::{Arc, OnceLock},
};

use bson::{Bson, Document};
use tracing::debug;

use crate::{
    error::{ConfigResult, DocumentStoreResult, FieldError, ValidationResult},
    schema::Schema,
    value::{Value, ValueMap},
};

/// Name of the store a model lives in unless it says otherwise.
pub const DEFAULT_STORE: &str = "default";

/// Name of the identifier field.
pub const ID_FIELD: &str = "_id";

/// A document type stored in a collection.
///
/// Implementors are usually unit structs; the data itself lives in [`Instance`].
pub trait Model: Send + Sync + 'static {
    /// Name of the collection holding this model's documents.
    fn collection_name() -> &'static str;

    /// Name of the store, as registered on the connection pool.
    fn store_name() -> &'static str {
        DEFAULT_STORE
    }

    /// Declares the model's schema. Called at most a handful of times, see [`ModelExt::schema`].
    fn declare() -> ConfigResult<Schema>;

    /// Per-type cell caching the assembled schema.
    fn schema_cell() -> &'static OnceLock<Arc<Schema>>;
}

pub trait ModelExt: Model {
    /// The model's assembled schema.
    ///
    /// Assembly runs on first use. Concurrent first calls may each declare the schema; the
    /// first one stored wins and the others are dropped.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigurationError`](crate::error::ConfigurationError) raised by
    /// [`Model::declare`]. Nothing is cached in that case.
    fn schema() -> ConfigResult<Arc<Schema>>;
}

impl<M: Model> ModelExt for M {
    fn schema() -> ConfigResult<Arc<Schema>> {
        let cell = M::schema_cell();
        if let Some(schema) = cell.get() {
            return Ok(Arc::clone(schema));
        }

        let declared = Arc::new(M::declare()?);
        debug!(model = M::collection_name(), "Declared model schema");

        Ok(Arc::clone(cell.get_or_init(|| declared)))
    }
}

/// One document of model `M`, holding logical values.
///
/// Values are kept in schema order and are validated against the schema's fields when the
/// instance is converted for the store. Writing through [`Instance::set`] or
/// [`Instance::unset`] marks the instance as changed; a successful write through a
/// collection clears the flag.
pub struct Instance<M: Model> {
    schema: Arc<Schema>,
    data: ValueMap,
    changed: bool,
    projection: Option<BTreeSet<String>>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Instance<M> {
    /// Creates an instance holding only the fields' defaults.
    pub fn new() -> ConfigResult<Self> {
        let schema = M::schema()?;
        let data = schema
            .fields()
            .filter_map(|(name, field)| field.default_value().map(|value| (name.to_string(), value)))
            .collect();

        Ok(Self {
            schema,
            data,
            changed: false,
            projection: None,
            _model: PhantomData,
        })
    }

    /// Creates an instance from logical values, on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Field`](crate::error::DocumentStoreError::Field) when a
    /// name is not declared by the schema.
    pub fn from_values<K, V>(values: impl IntoIterator<Item = (K, V)>) -> DocumentStoreResult<Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut instance = Self::new()?;
        for (name, value) in values {
            instance.set(name, value)?;
        }
        instance.changed = true;
        Ok(instance)
    }

    /// Decodes a stored document.
    ///
    /// With a projection only the projected fields are decoded and only they can be set
    /// afterwards.
    pub fn from_wire(doc: &Document, projection: Option<BTreeSet<String>>) -> DocumentStoreResult<Self> {
        let schema = M::schema()?;
        let data = schema.to_logical(doc, projection.as_ref())?;

        Ok(Self {
            schema,
            data,
            changed: false,
            projection,
            _model: PhantomData,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the value of a declared field, `None` when it holds nothing.
    pub fn get(&self, name: &str) -> Result<Option<&Value>, FieldError> {
        self.schema.require(name)?;
        Ok(self.data.get(name))
    }

    /// Stores a logical value. Conversion and validation happen when the instance is written.
    ///
    /// # Errors
    ///
    /// Fails with a [`FieldError`] for undeclared names and for names outside the
    /// instance's projection.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<(), FieldError> {
        let name = name.into();
        self.check_writable(&name)?;

        self.data.insert(name, value.into());
        self.changed = true;
        Ok(())
    }

    /// Removes a field's value and returns it.
    pub fn unset(&mut self, name: &str) -> Result<Option<Value>, FieldError> {
        self.check_writable(name)?;

        let previous = self.data.shift_remove(name);
        self.changed = true;
        Ok(previous)
    }

    /// Value of the `_id` field, once known.
    pub fn id(&self) -> Option<&Value> {
        self.data.get(ID_FIELD)
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn projection(&self) -> Option<&BTreeSet<String>> {
        self.projection.as_ref()
    }

    pub fn values(&self) -> &ValueMap {
        &self.data
    }

    /// Converts the instance into its wire document.
    ///
    /// A projected instance converts only the values it holds; a complete one runs the full
    /// schema conversion, defaults and required checks included.
    pub fn to_wire(&self) -> ValidationResult<Document> {
        match self.projection {
            Some(_) => self.schema.to_wire_partial(&self.data),
            None => self.schema.to_wire(&self.data),
        }
    }

    /// Records the identifier assigned by the store on insert.
    pub(crate) fn assign_id(&mut self, id: Bson) -> ValidationResult<()> {
        if let Some(field) = self.schema.field(ID_FIELD) {
            let logical = field.to_logical(id)?;
            self.data.insert(ID_FIELD.to_string(), logical);
        }
        Ok(())
    }

    pub(crate) fn mark_saved(&mut self) {
        self.changed = false;
    }

    fn check_writable(&self, name: &str) -> Result<(), FieldError> {
        self.schema.require(name)?;
        match &self.projection {
            Some(projection) if !projection.contains(name) => Err(FieldError::new(name, self.schema.name())),
            _ => Ok(()),
        }
    }
}

impl<M: Model> Clone for Instance<M> {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            data: self.data.clone(),
            changed: self.changed,
            projection: self.projection.clone(),
            _model: PhantomData,
        }
    }
}

impl<M: Model> fmt::Debug for Instance<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("schema", &self.schema.name())
            .field("data", &self.data)
            .field("changed", &self.changed)
            .field("projection", &self.projection)
            .finish()
    }
}

impl<M: Model> PartialEq for Instance<M> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data && self.projection == other.projection
    }
}

#[cfg(test)]
mod tests {
    use bson::{doc, oid::ObjectId};

    use super::*;
    use crate::{error::DocumentStoreError, field::Field};

    struct Article;

    impl Model for Article {
        fn collection_name() -> &'static str {
            "articles"
        }

        fn declare() -> ConfigResult<Schema> {
            Schema::builder("Article")
                .field("_id", Field::object_id().auto(true))
                .field("title", Field::text())
                .field("views", Field::integer().default(0))
                .field("summary", Field::text().required(false))
                .build()
        }

        fn schema_cell() -> &'static OnceLock<Arc<Schema>> {
            static CELL: OnceLock<Arc<Schema>> = OnceLock::new();
            &CELL
        }
    }

    #[test]
    fn test_schema_is_assembled_once() {
        let first = Article::schema().unwrap();
        let second = Article::schema().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(Article::store_name(), DEFAULT_STORE);
    }

    #[test]
    fn test_new_instance_holds_defaults() {
        let article = Instance::<Article>::new().unwrap();
        assert_eq!(article.get("views"), Ok(Some(&Value::Int(0))));
        assert_eq!(article.get("title"), Ok(None));
        assert!(!article.is_changed());
        assert!(article.id().is_none());
    }

    #[test]
    fn test_from_values_and_to_wire() {
        let article = Instance::<Article>::from_values([("title", "Hello"), ("views", "3")]).unwrap();
        assert!(article.is_changed());
        assert_eq!(article.to_wire(), Ok(doc! { "title": "Hello", "views": 3_i64 }));
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        assert!(matches!(
            Instance::<Article>::from_values([("nope", 1)]),
            Err(DocumentStoreError::Field(_))
        ));

        let mut article = Instance::<Article>::new().unwrap();
        assert_eq!(article.get("nope"), Err(FieldError::new("nope", "Article")));
        assert!(article.set("nope", 1).is_err());
        assert!(article.unset("nope").is_err());
    }

    #[test]
    fn test_to_wire_reports_invalid_values() {
        let mut article = Instance::<Article>::new().unwrap();
        article.set("title", "Hello").unwrap();
        article.set("views", "many").unwrap();

        let err = article.to_wire().unwrap_err();
        assert_eq!(err.field, "views");
    }

    #[test]
    fn test_from_wire_with_projection() {
        let id = ObjectId::new();
        let stored = doc! { "_id": id, "title": "Hello" };
        let projection = BTreeSet::from(["title".to_string()]);

        let mut article = Instance::<Article>::from_wire(&stored, Some(projection)).unwrap();
        assert!(!article.is_changed());
        assert_eq!(article.id(), Some(&Value::ObjectId(id)));
        assert_eq!(article.get("views"), Ok(None));

        assert_eq!(article.set("views", 10), Err(FieldError::new("views", "Article")));
        article.set("title", "Updated").unwrap();
        assert!(article.is_changed());
        assert_eq!(article.to_wire(), Ok(doc! { "_id": id, "title": "Updated" }));
    }

    #[test]
    fn test_unset_and_mark_saved() {
        let mut article = Instance::<Article>::from_values([("title", "Hello"), ("summary", "Short")]).unwrap();
        article.mark_saved();
        assert!(!article.is_changed());

        assert_eq!(article.unset("summary"), Ok(Some(Value::from("Short"))));
        assert!(article.is_changed());
        assert_eq!(article.to_wire(), Ok(doc! { "title": "Hello", "views": 0_i64 }));
    }

    #[test]
    fn test_assign_id_decodes_through_field() {
        let mut article = Instance::<Article>::new().unwrap();
        let id = ObjectId::new();
        article.assign_id(Bson::ObjectId(id)).unwrap();
        assert_eq!(article.id(), Some(&Value::ObjectId(id)));
    }
}
