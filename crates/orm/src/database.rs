//! Database facade
//!
//! [`Database`] ties a model registry, its initialized relationship graph, a
//! storage engine and the runtime configuration together. Declaration and
//! initialization take `&mut self`; every read and write afterwards takes
//! `&self`, so an initialized database can be shared across tasks.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::backends::{DatabaseValue, StorageEngine};
use crate::config::OrmConfig;
use crate::error::{ModelError, ModelResult, SchemaResult};
use crate::migrations::SchemaDefinition;
use crate::model::core_trait::Model;
use crate::model::crud_operations::CrudOperations;
use crate::model::descriptor::ModelDescriptor;
use crate::model::record::Record;
use crate::relationships::hydration::{FindOptions, Hydrator, Page};
use crate::relationships::registry::{ModelRegistry, RelationshipGraph};

/// Models, their relationship graph and the storage they live in
pub struct Database<S> {
    registry: ModelRegistry,
    graph: Option<Arc<RelationshipGraph>>,
    storage: Arc<S>,
    config: OrmConfig,
}

impl<S: StorageEngine> Database<S> {
    pub fn new(storage: S, config: OrmConfig) -> Self {
        Self::with_storage(Arc::new(storage), config)
    }

    /// Use a storage engine shared with other owners
    pub fn with_storage(storage: Arc<S>, config: OrmConfig) -> Self {
        Self {
            registry: ModelRegistry::new(),
            graph: None,
            storage,
            config,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &OrmConfig {
        &self.config
    }

    /// Declare a model
    pub fn table(&mut self, descriptor: ModelDescriptor) -> SchemaResult<()> {
        self.registry.table(descriptor)
    }

    /// Declare a typed model
    pub fn register<T: Model>(&mut self) -> SchemaResult<()> {
        self.registry.register::<T>()
    }

    /// Build (or reuse) the relationship graph for everything declared so far
    pub fn init(&mut self) -> SchemaResult<Arc<RelationshipGraph>> {
        let graph = self.registry.init()?;
        self.graph = Some(Arc::clone(&graph));
        Ok(graph)
    }

    pub fn graph(&self) -> ModelResult<&RelationshipGraph> {
        self.graph.as_deref().ok_or(ModelError::NotInitialized)
    }

    pub fn schema(&self) -> ModelResult<SchemaDefinition> {
        Ok(self.graph()?.schema())
    }

    fn hydrator(&self) -> ModelResult<Hydrator<'_>> {
        Ok(Hydrator::new(self.graph()?, self.storage.as_ref(), &self.config))
    }

    fn writer(&self) -> ModelResult<CrudOperations<'_>> {
        Ok(CrudOperations::new(self.graph()?, self.storage.as_ref()))
    }

    pub async fn insert(&self, record: Record) -> ModelResult<Record> {
        self.writer()?.insert(record).await
    }

    pub async fn update(&self, record: Record) -> ModelResult<Record> {
        self.writer()?.update(record).await
    }

    /// Insert when the record has no key, otherwise update or insert under that key
    pub async fn upsert(&self, record: Record) -> ModelResult<Record> {
        self.writer()?.upsert(record).await
    }

    pub async fn delete(&self, model: &str, key: impl Into<DatabaseValue>) -> ModelResult<bool> {
        self.writer()?.delete(model, &key.into()).await
    }

    /// Load one record hydrated to `depth`
    pub async fn find_one(
        &self,
        model: &str,
        key: impl Into<DatabaseValue>,
        depth: u32,
    ) -> ModelResult<Option<Record>> {
        self.hydrator()?.find_one(model, &key.into(), depth).await
    }

    pub async fn find_many(&self, model: &str, options: &FindOptions) -> ModelResult<Page<Record>> {
        self.hydrator()?.find_many(model, options).await
    }

    /// Typed access to one model
    pub fn crud<T: Model>(&self) -> Crud<'_, T, S> {
        Crud {
            database: self,
            _model: PhantomData,
        }
    }
}

/// Typed CRUD handle for model `T`
pub struct Crud<'d, T, S> {
    database: &'d Database<S>,
    _model: PhantomData<fn() -> T>,
}

impl<'d, T: Model, S: StorageEngine> Crud<'d, T, S> {
    pub async fn insert(&self, model: &T) -> ModelResult<T> {
        let record = model.to_record(self.database.graph()?)?;
        let inserted = self.database.insert(record).await?;
        T::from_record(&inserted)
    }

    pub async fn update(&self, model: &T) -> ModelResult<T> {
        let record = model.to_record(self.database.graph()?)?;
        let updated = self.database.update(record).await?;
        T::from_record(&updated)
    }

    pub async fn upsert(&self, model: &T) -> ModelResult<T> {
        let record = model.to_record(self.database.graph()?)?;
        let saved = self.database.upsert(record).await?;
        T::from_record(&saved)
    }

    pub async fn delete(&self, key: impl Into<DatabaseValue>) -> ModelResult<bool> {
        self.database.delete(T::model_name(), key).await
    }

    /// Load by key at the configured default depth
    pub async fn find(&self, key: impl Into<DatabaseValue>) -> ModelResult<Option<T>> {
        self.find_one(key, self.database.config.default_depth).await
    }

    pub async fn find_one(&self, key: impl Into<DatabaseValue>, depth: u32) -> ModelResult<Option<T>> {
        match self.database.find_one(T::model_name(), key, depth).await? {
            Some(record) => T::from_record(&record).map(Some),
            None => Ok(None),
        }
    }

    pub async fn find_many(&self, options: &FindOptions) -> ModelResult<Page<T>> {
        self.database
            .find_many(T::model_name(), options)
            .await?
            .try_map(|record| T::from_record(&record))
    }
}
