//! [`IndexedStoreEngine`] and its builder.
//!
//! Collection names live in the `collections` store of the `{name}-meta`
//! database. The `{name}` database holds one object store per collection and its
//! version always equals the number of known collections, so registering a
//! collection means reopening it one version higher.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use async_trait::async_trait;
use tracing::{debug, info};

use docengine_core::{
    attribute::{Attributes, Documents},
    attributes,
    engine::{Engine, EngineBuilder},
    error::{EngineError, EngineResult},
    filter::Filters,
    helper::EngineHelper,
};

use crate::{
    host::{DatabaseConnection, DatabaseFactory, SchemaEditor, StoreTransaction, TransactionMode},
    memory::MemoryDatabaseFactory,
};

/// Object store of the metadata database listing every known collection.
pub const METADATA_STORE: &str = "collections";
/// Suffix appended to the database name to form the metadata database name.
pub const METADATA_SUFFIX: &str = "-meta";
/// Database name used when none is configured.
pub const DEFAULT_DATABASE: &str = "docengine";

const METADATA_VERSION: u32 = 1;

type CachedConnection = Mutex<Option<Arc<dyn DatabaseConnection>>>;


/// Engine keeping one object store per collection in a versioned database host.
///
/// Object stores can only be created by a schema upgrade, so the engine keeps
/// the list of collections in a separate metadata database (`"{name}-meta"`)
/// and opens the document database (`"{name}"`) at a version equal to the
/// number of known collections. Registering a new collection therefore bumps
/// the version and creates its store during the upgrade.
///
/// Both connections are opened lazily and cached until
/// [`IndexedStoreEngine::close_connections`]. An upgrade or a purge cannot run
/// while another engine holds a connection to the same database; it fails with
/// [`EngineError::ConnectionBlocked`] rather than waiting.
#[derive(Debug)]
pub struct IndexedStoreEngine {
    database: String,
    factory: Arc<dyn DatabaseFactory>,
    helper: EngineHelper,
    metadata_connection: CachedConnection,
    documents_connection: CachedConnection,
}

impl IndexedStoreEngine {
    pub fn new(database: impl Into<String>, factory: impl DatabaseFactory + 'static) -> Self {
        Self::with_shared_factory(database, Arc::new(factory))
    }

    pub fn with_shared_factory(database: impl Into<String>, factory: Arc<dyn DatabaseFactory>) -> Self {
        Self {
            database: database.into(),
            factory,
            helper: EngineHelper::new(),
            metadata_connection: Mutex::new(None),
            documents_connection: Mutex::new(None),
        }
    }

    pub fn builder() -> IndexedStoreEngineBuilder {
        IndexedStoreEngineBuilder::default()
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    pub fn metadata_database_name(&self) -> String {
        format!("{}{}", self.database, METADATA_SUFFIX)
    }

    /// Closes the cached connections without touching any data.
    ///
    /// Other engines can upgrade or delete the databases afterwards. The next
    /// operation on this engine reopens what it needs.
    pub fn close_connections(&self) {
        let metadata = lock(&self.metadata_connection).take();
        let documents = lock(&self.documents_connection).take();

        for connection in metadata.into_iter().chain(documents) {
            connection.close();
        }
        debug!(database = %self.database, "closed cached connections");
    }

    /// Deletes the metadata database and the document database.
    ///
    /// Fails with [`EngineError::ConnectionBlocked`] if any other engine still
    /// holds a connection to either of them.
    pub async fn purge_database(&self) -> EngineResult<()> {
        self.close_connections();

        self.factory.delete_database(&self.metadata_database_name()).await?;
        self.factory.delete_database(&self.database).await?;
        info!(database = %self.database, "purged databases");

        Ok(())
    }

    /// Names of every collection registered in the metadata database, sorted.
    pub async fn collections(&self) -> EngineResult<Vec<String>> {
        let metadata = self.metadata_connection().await?;
        let mut transaction = metadata.transaction(METADATA_STORE, TransactionMode::ReadOnly)?;
        let names = transaction.keys().await?;
        transaction.commit().await?;

        Ok(names)
    }

    async fn metadata_connection(&self) -> EngineResult<Arc<dyn DatabaseConnection>> {
        if let Some(connection) = cached(&self.metadata_connection) {
            return Ok(connection);
        }

        let connection: Arc<dyn DatabaseConnection> = Arc::from(
            self.factory
                .open(&self.metadata_database_name(), METADATA_VERSION, &create_metadata_store)
                .await?,
        );
        *lock(&self.metadata_connection) = Some(connection.clone());

        Ok(connection)
    }

    /// Returns a connection to the document database at `collections.len()`,
    /// upgrading it to hold a store for each of `collections`.
    async fn documents_connection(&self, collections: &[String]) -> EngineResult<Arc<dyn DatabaseConnection>> {
        let version = u32::try_from(collections.len())
            .map_err(|_| EngineError::Backend(format!("too many collections in database {}", self.database)))?;

        if let Some(connection) = cached(&self.documents_connection) {
            if connection.version() == version {
                return Ok(connection);
            }

            debug!(
                database = %self.database,
                cached = connection.version(),
                expected = version,
                "reopening outdated document connection"
            );
            self.drop_documents_connection();
        }

        let upgrade = |schema: &mut dyn SchemaEditor| -> EngineResult<()> {
            for collection in collections {
                if !schema.contains(collection) {
                    schema.create_object_store(collection)?;
                }
            }
            Ok(())
        };

        let connection: Arc<dyn DatabaseConnection> =
            Arc::from(self.factory.open(&self.database, version, &upgrade).await?);
        *lock(&self.documents_connection) = Some(connection.clone());

        Ok(connection)
    }

    fn drop_documents_connection(&self) {
        let connection = lock(&self.documents_connection).take();

        if let Some(connection) = connection {
            connection.close();
        }
    }

    /// Starts a transaction on the store of `collection`.
    ///
    /// Returns `None` when the collection is not registered, unless `register`
    /// is set, in which case it is recorded in the metadata database first.
    async fn transaction(
        &self,
        collection: &str,
        mode: TransactionMode,
        register: bool,
    ) -> EngineResult<Option<Box<dyn StoreTransaction>>> {
        let metadata = self.metadata_connection().await?;
        let metadata_mode = if register { TransactionMode::ReadWrite } else { TransactionMode::ReadOnly };
        let mut known = metadata.transaction(METADATA_STORE, metadata_mode)?;
        let mut collections = known.keys().await?;

        if collections.iter().any(|name| name == collection) {
            known.commit().await?;
        } else if register {
            known.put(collection, attributes! { "name" => collection }).await?;
            known.commit().await?;
            collections.push(collection.to_string());
            info!(database = %self.database, collection, "registered collection");

            self.drop_documents_connection();
        } else {
            known.commit().await?;
            return Ok(None);
        }

        let documents = self.documents_connection(&collections).await?;

        Ok(Some(documents.transaction(collection, mode)?))
    }
}

impl Drop for IndexedStoreEngine {
    fn drop(&mut self) {
        self.close_connections();
    }
}

fn lock(slot: &CachedConnection) -> MutexGuard<'_, Option<Arc<dyn DatabaseConnection>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The cached connection, unless it has been closed.
fn cached(slot: &CachedConnection) -> Option<Arc<dyn DatabaseConnection>> {
    lock(slot)
        .as_ref()
        .filter(|connection| !connection.is_closed())
        .cloned()
}

fn create_metadata_store(schema: &mut dyn SchemaEditor) -> EngineResult<()> {
    if !schema.contains(METADATA_STORE) {
        schema.create_object_store(METADATA_STORE)?;
    }

    Ok(())
}


#[async_trait]
impl Engine for IndexedStoreEngine {
    async fn create(
        &self,
        collection: &str,
        attributes: Attributes,
        id: Option<String>,
    ) -> EngineResult<String> {
        let id = self.helper.obtain_document_id(id);
        let mut transaction = self
            .transaction(collection, TransactionMode::ReadWrite, true)
            .await?
            .ok_or_else(|| EngineError::Backend(format!("collection {collection} could not be registered")))?;

        if transaction.get(&id).await?.is_some() {
            return Err(EngineError::already_exists(&id, collection));
        }

        transaction.add(&id, attributes).await?;
        transaction.commit().await?;
        debug!(database = %self.database, collection, id = %id, "created document in indexed store");

        Ok(id)
    }

    async fn read_one(&self, collection: &str, id: &str) -> EngineResult<Attributes> {
        let Some(mut transaction) = self.transaction(collection, TransactionMode::ReadOnly, false).await? else {
            return Err(EngineError::not_found(id, collection));
        };

        let attributes = transaction.get(id).await?;
        transaction.commit().await?;

        attributes.ok_or_else(|| EngineError::not_found(id, collection))
    }

    async fn read_many(
        &self,
        collection: &str,
        filters: Option<&Filters>,
    ) -> EngineResult<Documents> {
        let Some(mut transaction) = self.transaction(collection, TransactionMode::ReadOnly, false).await? else {
            return Ok(Documents::new());
        };

        let documents: Documents = transaction.entries().await?.into_iter().collect();
        transaction.commit().await?;

        Ok(self.helper.filter_documents(documents, filters))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        updated_attributes: Attributes,
        removed_attributes: Vec<String>,
    ) -> EngineResult<()> {
        let Some(mut transaction) = self.transaction(collection, TransactionMode::ReadWrite, false).await? else {
            return Err(EngineError::not_found(id, collection));
        };

        let mut attributes = transaction
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found(id, collection))?;

        self.helper
            .apply_update(&mut attributes, updated_attributes, &removed_attributes);
        transaction.put(id, attributes).await?;
        transaction.commit().await?;
        debug!(database = %self.database, collection, id, "updated document in indexed store");

        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> EngineResult<()> {
        let Some(mut transaction) = self.transaction(collection, TransactionMode::ReadWrite, false).await? else {
            return Err(EngineError::not_found(id, collection));
        };

        if transaction.get(id).await?.is_none() {
            return Err(EngineError::not_found(id, collection));
        }

        transaction.delete(id).await?;
        transaction.commit().await?;
        debug!(database = %self.database, collection, id, "deleted document from indexed store");

        Ok(())
    }
}


/// Builder for [`IndexedStoreEngine`].
///
/// Defaults to the database name `"docengine"` on a fresh
/// [`MemoryDatabaseFactory`].
#[derive(Debug)]
pub struct IndexedStoreEngineBuilder {
    database: String,
    factory: Option<Arc<dyn DatabaseFactory>>,
}

impl Default for IndexedStoreEngineBuilder {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            factory: None,
        }
    }
}

impl IndexedStoreEngineBuilder {
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn factory(self, factory: impl DatabaseFactory + 'static) -> Self {
        self.shared_factory(Arc::new(factory))
    }

    pub fn shared_factory(mut self, factory: Arc<dyn DatabaseFactory>) -> Self {
        self.factory = Some(factory);
        self
    }
}

#[async_trait]
impl EngineBuilder for IndexedStoreEngineBuilder {
    type Engine = IndexedStoreEngine;

    async fn build(self) -> EngineResult<Self::Engine> {
        if self.database.is_empty() {
            return Err(EngineError::Initialization("database name must not be empty".into()));
        }

        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(MemoryDatabaseFactory::new()));

        Ok(IndexedStoreEngine::with_shared_factory(self.database, factory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docengine_core::attribute::AttributeValue;

    fn engine_on(factory: &MemoryDatabaseFactory) -> IndexedStoreEngine {
        IndexedStoreEngine::new("app", factory.clone())
    }

    #[tokio::test]
    async fn test_create_registers_collection_and_upgrades() {
        let factory = MemoryDatabaseFactory::new();
        let engine = engine_on(&factory);

        engine.create("users", attributes! { "name" => "Alice" }, None).await.unwrap();
        engine.create("posts", attributes! { "title" => "Hello" }, None).await.unwrap();
        engine.create("users", attributes! { "name" => "Bob" }, None).await.unwrap();

        assert_eq!(engine.collections().await.unwrap(), vec!["posts".to_string(), "users".to_string()]);
        assert_eq!(factory.version("app").await, Some(2));
        assert_eq!(factory.version("app-meta").await, Some(1));
        assert_eq!(
            factory.object_store_names("app").await,
            vec!["posts".to_string(), "users".to_string()]
        );
    }

    #[tokio::test]
    async fn test_read_many_returns_ascending_ids() {
        let engine = engine_on(&MemoryDatabaseFactory::new());

        for id in ["b", "c", "a"] {
            engine.create("letters", attributes! { "letter" => id }, Some(id.into())).await.unwrap();
        }

        let documents = engine.read_many("letters", None).await.unwrap();
        assert_eq!(documents.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_unknown_collection_is_absent_without_registering() {
        let factory = MemoryDatabaseFactory::new();
        let engine = engine_on(&factory);

        assert!(engine.read_many("ghosts", None).await.unwrap().is_empty());
        assert!(engine.read_one("ghosts", "1").await.unwrap_err().is_not_found());
        assert!(engine.update("ghosts", "1", attributes! {}, vec![]).await.unwrap_err().is_not_found());
        assert!(engine.delete("ghosts", "1").await.unwrap_err().is_not_found());

        assert!(engine.collections().await.unwrap().is_empty());
        assert_eq!(factory.version("app").await, None);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let engine = engine_on(&MemoryDatabaseFactory::new());
        let id = engine
            .create("users", attributes! { "name" => "Alice", "age" => 30 }, None)
            .await
            .unwrap();

        engine
            .update("users", &id, attributes! { "age" => 31 }, vec!["name".into()])
            .await
            .unwrap();
        assert_eq!(engine.read_one("users", &id).await.unwrap(), attributes! { "age" => 31 });

        engine.delete("users", &id).await.unwrap();
        assert!(engine.delete("users", &id).await.unwrap_err().is_not_found());
        assert!(engine.read_many("users", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_instances_sharing_a_host_see_each_other() {
        let factory = MemoryDatabaseFactory::new();
        let first = engine_on(&factory);
        let second = engine_on(&factory);

        let id = first.create("users", attributes! { "name" => "Alice" }, None).await.unwrap();

        assert_eq!(
            second.read_one("users", &id).await.unwrap()["name"],
            AttributeValue::from("Alice")
        );
    }

    #[tokio::test]
    async fn test_new_collection_is_blocked_by_other_instance() {
        let factory = MemoryDatabaseFactory::new();
        let first = engine_on(&factory);
        let second = engine_on(&factory);

        first.create("users", attributes! {}, Some("u1".into())).await.unwrap();

        let error = second.create("posts", attributes! {}, Some("p1".into())).await.unwrap_err();
        assert!(error.is_blocked());

        // The registration was committed before the upgrade was attempted.
        assert!(first.collections().await.unwrap().contains(&"posts".to_string()));

        first.close_connections();
        second.create("posts", attributes! {}, Some("p1".into())).await.unwrap();

        assert!(first.read_one("users", "u1").await.is_ok());
        assert!(first.read_one("posts", "p1").await.is_ok());
    }

    #[tokio::test]
    async fn test_outdated_cached_connection_is_reopened() {
        let factory = MemoryDatabaseFactory::new();
        let first = engine_on(&factory);
        let second = engine_on(&factory);

        first.create("users", attributes! {}, Some("u1".into())).await.unwrap();
        assert!(second.create("posts", attributes! {}, None).await.unwrap_err().is_blocked());

        // The metadata now lists two collections while `first` caches version 1.
        assert!(first.read_one("users", "u1").await.is_ok());
        assert_eq!(factory.version("app").await, Some(2));

        // Same version as the connection `first` holds, so nothing blocks.
        second.create("posts", attributes! {}, Some("p1".into())).await.unwrap();
        assert!(first.read_one("posts", "p1").await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_requires_other_connections_closed() {
        let factory = MemoryDatabaseFactory::new();
        let first = engine_on(&factory);
        let second = engine_on(&factory);

        first.create("users", attributes! {}, None).await.unwrap();

        assert!(second.purge_database().await.unwrap_err().is_blocked());

        first.close_connections();
        second.purge_database().await.unwrap();

        assert!(factory.databases().await.is_empty());
        assert!(first.read_many("users", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropping_engine_releases_connections() {
        let factory = MemoryDatabaseFactory::new();

        {
            let engine = engine_on(&factory);
            engine.create("users", attributes! {}, None).await.unwrap();
        }

        engine_on(&factory).purge_database().await.unwrap();
        assert!(factory.databases().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_creates_in_new_collection() {
        let engine = engine_on(&MemoryDatabaseFactory::new());

        let (first, second) = futures::join!(
            engine.create("users", attributes! { "n" => 1 }, None),
            engine.create("users", attributes! { "n" => 2 }, None),
        );

        let documents = engine.read_many("users", None).await.unwrap();
        assert_eq!(documents.len(), 2);
        assert!(documents.contains_key(&first.unwrap()));
        assert!(documents.contains_key(&second.unwrap()));
    }

    #[tokio::test]
    async fn test_builder_defaults_and_validation() {
        let engine = IndexedStoreEngine::builder().build().await.unwrap();
        assert_eq!(engine.database_name(), DEFAULT_DATABASE);
        assert_eq!(engine.metadata_database_name(), "docengine-meta");

        let error = IndexedStoreEngine::builder().database("").build().await.unwrap_err();
        assert!(matches!(error, EngineError::Initialization(_)));
    }
}
