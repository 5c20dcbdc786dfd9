//! In-process database host.
//!
//! [`MemoryDatabaseFactory`] keeps every database in shared memory. Clones of a
//! factory share the same host, so several engines built over clones behave like
//! several tabs of the same origin: they see each other's data and block each
//! other's schema upgrades while their connections are open.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use async_trait::async_trait;
use mea::rwlock::RwLock;
use tracing::{info, trace, warn};

use docengine_core::{
    attribute::Attributes,
    error::{EngineError, EngineResult},
};

use crate::{
    host::{
        DatabaseConnection,
        DatabaseFactory,
        StoreTransaction,
        TransactionMode,
        UpgradeCallback,
    },
    pending::{
        ConnectionHandle,
        ObjectStore,
        PendingWrite,
        SchemaDraft,
        WriteBuffer,
        ensure_writable,
        plan_upgrade,
        prune_closed,
    },
};


#[derive(Debug)]
struct DatabaseState {
    /// Distinguishes a database from a later one recreated under the same name.
    generation: u64,
    version: u32,
    stores: BTreeMap<String, ObjectStore>,
    connections: Vec<Arc<ConnectionHandle>>,
}

impl DatabaseState {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            version: 0,
            stores: BTreeMap::new(),
            connections: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct HostState {
    databases: HashMap<String, DatabaseState>,
    generations: u64,
}


/// Shared in-process [`DatabaseFactory`].
#[derive(Debug, Default, Clone)]
pub struct MemoryDatabaseFactory {
    state: Arc<RwLock<HostState>>,
}

impl MemoryDatabaseFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the databases currently held, sorted.
    pub async fn databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().await.databases.keys().cloned().collect();
        names.sort();
        names
    }

    /// Current version of `name`, or `None` if it does not exist.
    pub async fn version(&self, name: &str) -> Option<u32> {
        self.state
            .read()
            .await
            .databases
            .get(name)
            .map(|database| database.version)
    }

    /// Object stores of `name`, sorted. Empty if the database does not exist.
    pub async fn object_store_names(&self, name: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .databases
            .get(name)
            .map(|database| database.stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Connection handles `name` still tracks, closed or not.
    #[cfg(test)]
    async fn tracked_connections(&self, name: &str) -> usize {
        self.state
            .read()
            .await
            .databases
            .get(name)
            .map(|database| database.connections.len())
            .unwrap_or_default()
    }

    /// Runs `upgrade` on a draft of the schema and installs it if it succeeds.
    fn upgrade(
        name: &str,
        database: &mut DatabaseState,
        version: u32,
        upgrade: &UpgradeCallback<'_>,
    ) -> EngineResult<()> {
        let open_connections = prune_closed(&mut database.connections);
        if !plan_upgrade(name, database.version, version, open_connections)? {
            return Ok(());
        }

        let mut draft = SchemaDraft::new(database.stores.keys().cloned());
        upgrade(&mut draft)?;

        for store in draft.into_stores() {
            database.stores.entry(store).or_default();
        }

        info!(database = name, from = database.version, to = version, "upgraded database");
        database.version = version;

        Ok(())
    }
}

#[async_trait]
impl DatabaseFactory for MemoryDatabaseFactory {
    async fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: &UpgradeCallback<'_>,
    ) -> EngineResult<Box<dyn DatabaseConnection>> {
        plan_upgrade(name, 0, version, 0)?;

        let mut host = self.state.write().await;
        let HostState { databases, generations } = &mut *host;

        let created = !databases.contains_key(name);
        if created {
            *generations += 1;
            databases.insert(name.to_string(), DatabaseState::new(*generations));
        }

        let upgraded = match databases.get_mut(name) {
            Some(database) => Self::upgrade(name, database, version, upgrade),
            None => Err(EngineError::Backend(format!("database {name} disappeared while opening"))),
        };

        if let Err(error) = upgraded {
            if created {
                databases.remove(name);
            }
            return Err(error);
        }

        let database = databases
            .get_mut(name)
            .ok_or_else(|| EngineError::Backend(format!("database {name} disappeared while opening")))?;

        let handle = Arc::new(ConnectionHandle::default());
        prune_closed(&mut database.connections);
        database.connections.push(handle.clone());
        trace!(database = name, version, "opened database connection");

        Ok(Box::new(MemoryConnection {
            name: name.to_string(),
            version,
            generation: database.generation,
            store_names: database.stores.keys().cloned().collect(),
            handle,
            state: self.state.clone(),
        }))
    }

    async fn delete_database(&self, name: &str) -> EngineResult<()> {
        let mut host = self.state.write().await;

        let Some(database) = host.databases.get_mut(name) else {
            return Ok(());
        };

        if prune_closed(&mut database.connections) > 0 {
            warn!(database = name, "delete blocked by an open connection");
            return Err(EngineError::ConnectionBlocked(name.to_string()));
        }

        host.databases.remove(name);
        info!(database = name, "deleted database");

        Ok(())
    }
}


/// Connection handed out by [`MemoryDatabaseFactory`].
#[derive(Debug)]
pub struct MemoryConnection {
    name: String,
    version: u32,
    generation: u64,
    store_names: Vec<String>,
    handle: Arc<ConnectionHandle>,
    state: Arc<RwLock<HostState>>,
}

impl DatabaseConnection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn object_store_names(&self) -> Vec<String> {
        self.store_names.clone()
    }

    fn transaction(&self, store: &str, mode: TransactionMode) -> EngineResult<Box<dyn StoreTransaction>> {
        if self.is_closed() {
            return Err(EngineError::Backend(format!("connection to database {} is closed", self.name)));
        }

        if !self.store_names.iter().any(|name| name == store) {
            return Err(EngineError::Backend(format!(
                "object store {store} does not exist in database {}",
                self.name
            )));
        }

        Ok(Box::new(MemoryTransaction {
            database: self.name.clone(),
            generation: self.generation,
            store: store.to_string(),
            mode,
            writes: WriteBuffer::default(),
            state: self.state.clone(),
        }))
    }

    fn close(&self) {
        if self.handle.close() {
            trace!(database = %self.name, version = self.version, "closed database connection");
        }
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}


struct MemoryTransaction {
    database: String,
    generation: u64,
    store: String,
    mode: TransactionMode,
    writes: WriteBuffer,
    state: Arc<RwLock<HostState>>,
}

impl MemoryTransaction {
    fn missing_store(&self) -> EngineError {
        EngineError::Backend(format!(
            "object store {} of database {} no longer exists",
            self.store, self.database
        ))
    }

    /// Committed records merged with this transaction's pending writes.
    async fn visible_records(&self) -> EngineResult<ObjectStore> {
        let mut records = {
            let host = self.state.read().await;

            host.databases
                .get(&self.database)
                .filter(|database| database.generation == self.generation)
                .and_then(|database| database.stores.get(&self.store))
                .cloned()
                .ok_or_else(|| self.missing_store())?
        };

        self.writes.overlay(&mut records);

        Ok(records)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    async fn get(&mut self, key: &str) -> EngineResult<Option<Attributes>> {
        if let Some(buffered) = self.writes.lookup(key) {
            return Ok(buffered.cloned());
        }

        let host = self.state.read().await;

        host.databases
            .get(&self.database)
            .filter(|database| database.generation == self.generation)
            .and_then(|database| database.stores.get(&self.store))
            .map(|records| records.get(key).cloned())
            .ok_or_else(|| self.missing_store())
    }

    async fn add(&mut self, key: &str, value: Attributes) -> EngineResult<()> {
        ensure_writable(self.mode, &self.store)?;

        if self.get(key).await?.is_some() {
            return Err(EngineError::already_exists(key, &self.store));
        }

        self.writes.push(key, PendingWrite::Add(value));

        Ok(())
    }

    async fn put(&mut self, key: &str, value: Attributes) -> EngineResult<()> {
        ensure_writable(self.mode, &self.store)?;
        self.writes.push(key, PendingWrite::Put(value));

        Ok(())
    }

    async fn delete(&mut self, key: &str) -> EngineResult<()> {
        ensure_writable(self.mode, &self.store)?;
        self.writes.push(key, PendingWrite::Delete);

        Ok(())
    }

    async fn keys(&mut self) -> EngineResult<Vec<String>> {
        Ok(self.visible_records().await?.into_keys().collect())
    }

    async fn entries(&mut self) -> EngineResult<Vec<(String, Attributes)>> {
        Ok(self.visible_records().await?.into_iter().collect())
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        let this = *self;

        if this.writes.is_empty() {
            return Ok(());
        }

        let mut host = this.state.write().await;
        let records = host
            .databases
            .get_mut(&this.database)
            .filter(|database| database.generation == this.generation)
            .and_then(|database| database.stores.get_mut(&this.store))
            .ok_or_else(|| this.missing_store())?;

        // Validate against the latest committed state before touching anything.
        let mut staged = records.clone();
        for (key, write) in this.writes.iter() {
            match write {
                PendingWrite::Add(_) if staged.contains_key(key) => {
                    return Err(EngineError::already_exists(key, &this.store));
                },
                PendingWrite::Add(value) | PendingWrite::Put(value) => {
                    staged.insert(key.to_string(), value.clone());
                },
                PendingWrite::Delete => {
                    staged.remove(key);
                },
            }
        }

        *records = staged;
        trace!(database = %this.database, store = %this.store, writes = this.writes.len(), "committed transaction");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docengine_core::attributes;
    use crate::host::SchemaEditor;

    fn create_stores(names: &'static [&'static str]) -> impl Fn(&mut dyn SchemaEditor) -> EngineResult<()> + Send + Sync {
        move |schema: &mut dyn SchemaEditor| {
            for name in names {
                if !schema.contains(name) {
                    schema.create_object_store(name)?;
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_open_creates_database_and_runs_upgrade() {
        let factory = MemoryDatabaseFactory::new();

        let connection = factory.open("app", 1, &create_stores(&["users"])).await.unwrap();

        assert_eq!(connection.version(), 1);
        assert_eq!(connection.object_store_names(), vec!["users".to_string()]);
        assert_eq!(factory.databases().await, vec!["app".to_string()]);
        assert_eq!(factory.version("app").await, Some(1));
    }

    #[tokio::test]
    async fn test_upgrade_is_blocked_by_open_connection() {
        let factory = MemoryDatabaseFactory::new();
        let first = factory.open("app", 1, &create_stores(&["users"])).await.unwrap();

        let error = factory
            .open("app", 2, &create_stores(&["users", "posts"]))
            .await
            .unwrap_err();
        assert!(error.is_blocked());

        // Same version needs no upgrade and is not blocked.
        let same = factory.open("app", 1, &create_stores(&["users"])).await.unwrap();
        first.close();
        drop(same);

        let upgraded = factory
            .open("app", 2, &create_stores(&["users", "posts"]))
            .await
            .unwrap();
        assert_eq!(upgraded.object_store_names(), vec!["posts".to_string(), "users".to_string()]);
    }

    #[tokio::test]
    async fn test_lower_version_is_rejected() {
        let factory = MemoryDatabaseFactory::new();
        drop(factory.open("app", 2, &create_stores(&["a", "b"])).await.unwrap());

        let error = factory.open("app", 1, &create_stores(&["a"])).await.unwrap_err();

        assert!(matches!(error, EngineError::Backend(_)));
    }

    #[tokio::test]
    async fn test_failed_upgrade_leaves_schema_intact() {
        let factory = MemoryDatabaseFactory::new();
        drop(factory.open("app", 1, &create_stores(&["users"])).await.unwrap());

        let failing = |schema: &mut dyn SchemaEditor| -> EngineResult<()> {
            schema.create_object_store("posts")?;
            schema.create_object_store("users")
        };
        assert!(factory.open("app", 2, &failing).await.is_err());

        assert_eq!(factory.version("app").await, Some(1));
        assert_eq!(factory.object_store_names("app").await, vec!["users".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_database_waits_for_connections_to_close() {
        let factory = MemoryDatabaseFactory::new();
        let connection = factory.open("app", 1, &create_stores(&["users"])).await.unwrap();

        assert!(factory.delete_database("app").await.unwrap_err().is_blocked());

        drop(connection);
        factory.delete_database("app").await.unwrap();
        factory.delete_database("never-existed").await.unwrap();

        assert!(factory.databases().await.is_empty());
    }

    #[tokio::test]
    async fn test_writes_are_visible_after_commit_only() {
        let factory = MemoryDatabaseFactory::new();
        let connection = factory.open("app", 1, &create_stores(&["users"])).await.unwrap();

        let mut writer = connection.transaction("users", TransactionMode::ReadWrite).unwrap();
        writer.put("b", attributes! { "name" => "Bob" }).await.unwrap();
        writer.add("a", attributes! { "name" => "Alice" }).await.unwrap();
        assert_eq!(writer.keys().await.unwrap(), vec!["a".to_string(), "b".to_string()]);

        let mut reader = connection.transaction("users", TransactionMode::ReadOnly).unwrap();
        assert!(reader.get("a").await.unwrap().is_none());

        writer.commit().await.unwrap();

        let mut reader = connection.transaction("users", TransactionMode::ReadOnly).unwrap();
        let entries = reader.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "a");
        assert_eq!(entries[1].1, attributes! { "name" => "Bob" });
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let factory = MemoryDatabaseFactory::new();
        let connection = factory.open("app", 1, &create_stores(&["users"])).await.unwrap();

        let mut aborted = connection.transaction("users", TransactionMode::ReadWrite).unwrap();
        aborted.put("a", attributes! {}).await.unwrap();
        drop(aborted);

        let mut reader = connection.transaction("users", TransactionMode::ReadOnly).unwrap();
        assert!(reader.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transaction_constraints() {
        let factory = MemoryDatabaseFactory::new();
        let connection = factory.open("app", 1, &create_stores(&["users"])).await.unwrap();

        assert!(connection.transaction("posts", TransactionMode::ReadOnly).is_err());

        let mut reader = connection.transaction("users", TransactionMode::ReadOnly).unwrap();
        assert!(reader.put("a", attributes! {}).await.is_err());

        let mut first = connection.transaction("users", TransactionMode::ReadWrite).unwrap();
        let mut second = connection.transaction("users", TransactionMode::ReadWrite).unwrap();
        first.add("a", attributes! { "n" => 1 }).await.unwrap();
        second.add("a", attributes! { "n" => 2 }).await.unwrap();
        first.commit().await.unwrap();

        assert!(second.commit().await.unwrap_err().is_already_exists());

        let mut third = connection.transaction("users", TransactionMode::ReadWrite).unwrap();
        assert!(third.add("a", attributes! {}).await.unwrap_err().is_already_exists());
    }

    #[tokio::test]
    async fn test_closed_connection_refuses_transactions() {
        let factory = MemoryDatabaseFactory::new();
        let connection = factory.open("app", 1, &create_stores(&["users"])).await.unwrap();

        connection.close();

        assert!(connection.is_closed());
        assert!(connection.transaction("users", TransactionMode::ReadOnly).is_err());
    }

    #[tokio::test]
    async fn test_reopening_at_same_version_forgets_closed_connections() {
        let factory = MemoryDatabaseFactory::new();
        let kept = factory.open("app", 1, &create_stores(&["users"])).await.unwrap();

        for _ in 0..64 {
            let connection = factory.open("app", 1, &create_stores(&["users"])).await.unwrap();
            drop(connection);
        }

        // The kept connection plus the one opened last before pruning.
        assert!(factory.tracked_connections("app").await <= 2);

        drop(kept);
        drop(factory.open("app", 1, &create_stores(&["users"])).await.unwrap());
        assert_eq!(factory.tracked_connections("app").await, 1);
    }
}
