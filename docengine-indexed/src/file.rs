//! Durable database host backed by a single redb file.
//!
//! Every database of a host lives in the same file. The `docengine.databases`
//! table maps each database name to its version and object store names, and
//! each object store is a table of its own holding BSON-encoded records.
//!
//! A redb file can only be opened once per process, so factories opened on the
//! same path share one host, and with it the connection bookkeeping that makes
//! upgrades block. The file is released when the last factory and connection
//! sharing it are dropped.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak},
};
use async_trait::async_trait;
use bson::{Bson, Document};
use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use docengine_core::{
    attribute::{AttributeValue, Attributes},
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

/// Convert any `Display` error into an `EngineError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| EngineError::$variant(e.to_string())
    };
}

/// Database records keyed by database name, JSON-encoded.
const DATABASES: TableDefinition<&str, &[u8]> = TableDefinition::new("docengine.databases");

type Records<'a> = TableDefinition<'a, &'static str, &'static [u8]>;


#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatabaseRecord {
    version: u32,
    stores: BTreeSet<String>,
    /// Prefix of this database's store tables. A database recreated under the
    /// same name gets a fresh one.
    incarnation: String,
}

impl DatabaseRecord {
    fn new() -> Self {
        Self {
            version: 0,
            stores: BTreeSet::new(),
            incarnation: Uuid::new_v4().simple().to_string(),
        }
    }
}

fn store_table(incarnation: &str, store: &str) -> String {
    format!("{incarnation}/{store}")
}

fn encode_record(attributes: &Attributes) -> EngineResult<Vec<u8>> {
    let document: Document = attributes
        .iter()
        .map(|(name, value)| (name.clone(), Bson::from(value.clone())))
        .collect();

    Ok(document.to_vec()?)
}

fn decode_record(bytes: &[u8]) -> EngineResult<Attributes> {
    Document::from_reader(bytes)?
        .into_iter()
        .map(|(name, value)| Ok((name, AttributeValue::try_from(value)?)))
        .collect()
}


/// Hosts currently open in this process, by absolute file path.
fn hosts() -> &'static Mutex<HashMap<PathBuf, Weak<FileHost>>> {
    static HOSTS: OnceLock<Mutex<HashMap<PathBuf, Weak<FileHost>>>> = OnceLock::new();
    HOSTS.get_or_init(Default::default)
}

struct FileHost {
    path: PathBuf,
    database: Database,
    connections: Mutex<HashMap<String, Vec<Arc<ConnectionHandle>>>>,
}

impl fmt::Debug for FileHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHost")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileHost {
    /// Returns the host already open on `path` in this process, or opens it.
    fn shared(path: PathBuf) -> EngineResult<Arc<Self>> {
        let mut hosts = lock(hosts());

        if let Some(host) = hosts.get(&path).and_then(Weak::upgrade) {
            return Ok(host);
        }

        let database = Database::create(&path).map_err(map_err!(Storage))?;
        let host = Arc::new(Self {
            path: path.clone(),
            database,
            connections: Mutex::default(),
        });
        host.write(|txn| {
            txn.open_table(DATABASES).map_err(map_err!(Storage))?;
            Ok(())
        })?;

        hosts.retain(|_, host| host.strong_count() > 0);
        hosts.insert(path.clone(), Arc::downgrade(&host));
        debug!(?path, "opened database file");

        Ok(host)
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<String, Vec<Arc<ConnectionHandle>>>> {
        lock(&self.connections)
    }

    /// Runs `f` in a write transaction, committing if it succeeds and aborting otherwise.
    fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> EngineResult<T>) -> EngineResult<T> {
        let txn = self.database.begin_write().map_err(map_err!(Storage))?;

        match f(&txn) {
            Ok(value) => {
                txn.commit().map_err(map_err!(Storage))?;
                Ok(value)
            },
            Err(error) => {
                txn.abort().map_err(map_err!(Storage))?;
                Err(error)
            },
        }
    }

    fn read<T>(&self, f: impl FnOnce(&ReadTransaction) -> EngineResult<T>) -> EngineResult<T> {
        let txn = self.database.begin_read().map_err(map_err!(Storage))?;
        f(&txn)
    }

    fn record(table: &impl ReadableTable<&'static str, &'static [u8]>, name: &str) -> EngineResult<Option<DatabaseRecord>> {
        match table.get(name).map_err(map_err!(Storage))? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    fn read_record(&self, name: &str) -> EngineResult<Option<DatabaseRecord>> {
        self.read(|txn| {
            let databases = txn.open_table(DATABASES).map_err(map_err!(Storage))?;
            Self::record(&databases, name)
        })
    }
}


/// [`DatabaseFactory`] persisting its databases in a redb file.
///
/// Clones share the same host.
#[derive(Debug, Clone)]
pub struct FileDatabaseFactory {
    host: Arc<FileHost>,
}

impl FileDatabaseFactory {
    /// Opens the host file at `path`, creating it and its parent directories if needed.
    pub async fn create(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = std::path::absolute(path.as_ref())?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        Ok(Self {
            host: FileHost::shared(path)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.host.path
    }

    /// Names of the databases in the file, sorted.
    pub fn databases(&self) -> EngineResult<Vec<String>> {
        self.host.read(|txn| {
            let databases = txn.open_table(DATABASES).map_err(map_err!(Storage))?;
            let mut names = Vec::new();
            for entry in databases.iter().map_err(map_err!(Storage))? {
                let (name, _) = entry.map_err(map_err!(Storage))?;
                names.push(name.value().to_string());
            }
            Ok(names)
        })
    }

    /// Current version of `name`, or `None` if it does not exist.
    pub fn version(&self, name: &str) -> EngineResult<Option<u32>> {
        Ok(self.host.read_record(name)?.map(|record| record.version))
    }

    /// Object stores of `name`, sorted. Empty if the database does not exist.
    pub fn object_store_names(&self, name: &str) -> EngineResult<Vec<String>> {
        Ok(self
            .host
            .read_record(name)?
            .map(|record| record.stores.into_iter().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl DatabaseFactory for FileDatabaseFactory {
    async fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: &UpgradeCallback<'_>,
    ) -> EngineResult<Box<dyn DatabaseConnection>> {
        plan_upgrade(name, 0, version, 0)?;

        let mut connections = self.host.connections();
        let handles = connections.entry(name.to_string()).or_default();
        let open_connections = prune_closed(handles);

        let current = self.host.read_record(name)?;
        let current_version = current.as_ref().map_or(0, |record| record.version);

        let upgrading = plan_upgrade(name, current_version, version, open_connections)?;

        let record = match current {
            Some(record) if !upgrading => record,
            current => {
                self.host.write(|txn| {
                    let mut databases = txn.open_table(DATABASES).map_err(map_err!(Storage))?;
                    let mut record = current.unwrap_or_else(DatabaseRecord::new);

                    let mut draft = SchemaDraft::new(record.stores.iter().cloned());
                    upgrade(&mut draft)?;

                    let stores = draft.into_stores();
                    for store in stores.difference(&record.stores) {
                        let table = store_table(&record.incarnation, store);
                        txn.open_table(Records::new(&table)).map_err(map_err!(Storage))?;
                    }

                    info!(database = name, from = record.version, to = version, "upgraded database");
                    record.stores = stores;
                    record.version = version;

                    let encoded = serde_json::to_vec(&record)?;
                    databases
                        .insert(name, encoded.as_slice())
                        .map_err(map_err!(Storage))?;

                    Ok(record)
                })?
            },
        };

        let handle = Arc::new(ConnectionHandle::default());
        handles.push(handle.clone());
        trace!(database = name, version, "opened database connection");

        Ok(Box::new(FileConnection {
            name: name.to_string(),
            version,
            incarnation: record.incarnation,
            store_names: record.stores.into_iter().collect(),
            handle,
            host: self.host.clone(),
        }))
    }

    async fn delete_database(&self, name: &str) -> EngineResult<()> {
        let mut connections = self.host.connections();

        if let Some(handles) = connections.get_mut(name)
            && prune_closed(handles) > 0
        {
            warn!(database = name, "delete blocked by an open connection");
            return Err(EngineError::ConnectionBlocked(name.to_string()));
        }

        let deleted = self.host.write(|txn| {
            let mut databases = txn.open_table(DATABASES).map_err(map_err!(Storage))?;
            let Some(record) = FileHost::record(&databases, name)? else {
                return Ok(false);
            };

            for store in &record.stores {
                let table = store_table(&record.incarnation, store);
                txn.delete_table(Records::new(&table)).map_err(map_err!(Storage))?;
            }
            databases.remove(name).map_err(map_err!(Storage))?;

            Ok(true)
        })?;

        connections.remove(name);
        if deleted {
            info!(database = name, "deleted database");
        }

        Ok(())
    }
}


/// Connection handed out by [`FileDatabaseFactory`].
#[derive(Debug)]
pub struct FileConnection {
    name: String,
    version: u32,
    incarnation: String,
    store_names: Vec<String>,
    handle: Arc<ConnectionHandle>,
    host: Arc<FileHost>,
}

impl DatabaseConnection for FileConnection {
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

        Ok(Box::new(FileTransaction {
            database: self.name.clone(),
            incarnation: self.incarnation.clone(),
            store: store.to_string(),
            table: store_table(&self.incarnation, store),
            mode,
            writes: WriteBuffer::default(),
            host: self.host.clone(),
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

impl Drop for FileConnection {
    fn drop(&mut self) {
        self.close();
    }
}


struct FileTransaction {
    database: String,
    incarnation: String,
    store: String,
    table: String,
    mode: TransactionMode,
    writes: WriteBuffer,
    host: Arc<FileHost>,
}

impl FileTransaction {
    fn missing_store(&self) -> EngineError {
        EngineError::Backend(format!(
            "object store {} of database {} no longer exists",
            self.store, self.database
        ))
    }

    /// Fails unless the database this transaction was started on still holds its store.
    fn ensure_present(&self, databases: &impl ReadableTable<&'static str, &'static [u8]>) -> EngineResult<()> {
        match FileHost::record(databases, &self.database)? {
            Some(record) if record.incarnation == self.incarnation && record.stores.contains(&self.store) => Ok(()),
            _ => Err(self.missing_store()),
        }
    }

    fn committed(&self) -> EngineResult<ObjectStore> {
        self.host.read(|txn| {
            let databases = txn.open_table(DATABASES).map_err(map_err!(Storage))?;
            self.ensure_present(&databases)?;

            let table = txn.open_table(Records::new(&self.table)).map_err(map_err!(Storage))?;
            let mut records = ObjectStore::new();
            for entry in table.iter().map_err(map_err!(Storage))? {
                let (key, value) = entry.map_err(map_err!(Storage))?;
                records.insert(key.value().to_string(), decode_record(value.value())?);
            }

            Ok(records)
        })
    }

    fn visible_records(&self) -> EngineResult<ObjectStore> {
        let mut records = self.committed()?;
        self.writes.overlay(&mut records);

        Ok(records)
    }
}

#[async_trait]
impl StoreTransaction for FileTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    async fn get(&mut self, key: &str) -> EngineResult<Option<Attributes>> {
        if let Some(buffered) = self.writes.lookup(key) {
            return Ok(buffered.cloned());
        }

        self.host.read(|txn| {
            let databases = txn.open_table(DATABASES).map_err(map_err!(Storage))?;
            self.ensure_present(&databases)?;

            let table = txn.open_table(Records::new(&self.table)).map_err(map_err!(Storage))?;
            match table.get(key).map_err(map_err!(Storage))? {
                Some(guard) => Ok(Some(decode_record(guard.value())?)),
                None => Ok(None),
            }
        })
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
        Ok(self.visible_records()?.into_keys().collect())
    }

    async fn entries(&mut self) -> EngineResult<Vec<(String, Attributes)>> {
        Ok(self.visible_records()?.into_iter().collect())
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        let this = *self;

        if this.writes.is_empty() {
            return Ok(());
        }

        // Constraints are checked against the latest committed state; any
        // failure aborts the redb transaction and nothing is applied.
        this.host.write(|txn| {
            let databases = txn.open_table(DATABASES).map_err(map_err!(Storage))?;
            this.ensure_present(&databases)?;

            let mut table = txn.open_table(Records::new(&this.table)).map_err(map_err!(Storage))?;
            for (key, write) in this.writes.iter() {
                match write {
                    PendingWrite::Add(value) => {
                        if table.get(key).map_err(map_err!(Storage))?.is_some() {
                            return Err(EngineError::already_exists(key, &this.store));
                        }
                        let encoded = encode_record(value)?;
                        table.insert(key, encoded.as_slice()).map_err(map_err!(Storage))?;
                    },
                    PendingWrite::Put(value) => {
                        let encoded = encode_record(value)?;
                        table.insert(key, encoded.as_slice()).map_err(map_err!(Storage))?;
                    },
                    PendingWrite::Delete => {
                        table.remove(key).map_err(map_err!(Storage))?;
                    },
                }
            }

            Ok(())
        })?;

        trace!(database = %this.database, store = %this.store, writes = this.writes.len(), "committed transaction");

        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::DateTime;
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
    async fn test_records_survive_reopening_the_file() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("nested").join("host.redb");
        let record = attributes! {
            "name" => "Alice",
            "age" => 9_007_199_254_740_993_i64,
            "score" => 1.5,
            "joined" => DateTime::from_millis(1_700_000_000_123),
            "tags" => vec!["a", "b"],
            "address" => attributes! { "city" => "Lisbon" },
        };

        {
            let factory = FileDatabaseFactory::create(&path).await.unwrap();
            let connection = factory.open("app", 1, &create_stores(&["users"])).await.unwrap();

            let mut writer = connection.transaction("users", TransactionMode::ReadWrite).unwrap();
            writer.add("alice", record.clone()).await.unwrap();
            writer.commit().await.unwrap();
        }

        let factory = FileDatabaseFactory::create(&path).await.unwrap();
        assert_eq!(factory.version("app").unwrap(), Some(1));
        assert_eq!(factory.object_store_names("app").unwrap(), vec!["users".to_string()]);

        let connection = factory.open("app", 1, &create_stores(&["users"])).await.unwrap();
        let mut reader = connection.transaction("users", TransactionMode::ReadOnly).unwrap();
        assert_eq!(reader.get("alice").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_factories_on_one_path_share_a_host() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("host.redb");

        let first = FileDatabaseFactory::create(&path).await.unwrap();
        let second = FileDatabaseFactory::create(&path).await.unwrap();
        let connection = first.open("app", 1, &create_stores(&["users"])).await.unwrap();

        let error = second
            .open("app", 2, &create_stores(&["users", "posts"]))
            .await
            .unwrap_err();
        assert!(error.is_blocked());
        assert!(second.delete_database("app").await.unwrap_err().is_blocked());

        drop(connection);
        let upgraded = second
            .open("app", 2, &create_stores(&["users", "posts"]))
            .await
            .unwrap();
        assert_eq!(upgraded.object_store_names(), vec!["posts".to_string(), "users".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_upgrade_leaves_file_untouched() {
        let directory = tempfile::tempdir().unwrap();
        let factory = FileDatabaseFactory::create(directory.path().join("host.redb")).await.unwrap();
        drop(factory.open("app", 1, &create_stores(&["users"])).await.unwrap());

        let failing = |schema: &mut dyn SchemaEditor| -> EngineResult<()> {
            schema.create_object_store("posts")?;
            schema.create_object_store("users")
        };
        assert!(factory.open("app", 2, &failing).await.is_err());

        assert_eq!(factory.version("app").unwrap(), Some(1));
        assert_eq!(factory.object_store_names("app").unwrap(), vec!["users".to_string()]);
        assert!(matches!(
            factory.open("app", 0, &create_stores(&[])).await.unwrap_err(),
            EngineError::Backend(_)
        ));
    }

    #[tokio::test]
    async fn test_commit_is_atomic_and_checks_latest_state() {
        let directory = tempfile::tempdir().unwrap();
        let factory = FileDatabaseFactory::create(directory.path().join("host.redb")).await.unwrap();
        let connection = factory.open("app", 1, &create_stores(&["users"])).await.unwrap();

        let mut first = connection.transaction("users", TransactionMode::ReadWrite).unwrap();
        let mut second = connection.transaction("users", TransactionMode::ReadWrite).unwrap();
        first.add("a", attributes! { "n" => 1 }).await.unwrap();
        second.put("b", attributes! { "n" => 2 }).await.unwrap();
        second.add("a", attributes! { "n" => 3 }).await.unwrap();
        first.commit().await.unwrap();

        assert!(second.commit().await.unwrap_err().is_already_exists());

        let mut reader = connection.transaction("users", TransactionMode::ReadOnly).unwrap();
        assert_eq!(reader.keys().await.unwrap(), vec!["a".to_string()]);
        assert!(reader.put("c", attributes! {}).await.is_err());

        let mut remover = connection.transaction("users", TransactionMode::ReadWrite).unwrap();
        remover.delete("a").await.unwrap();
        assert!(remover.entries().await.unwrap().is_empty());
        remover.commit().await.unwrap();

        let mut reader = connection.transaction("users", TransactionMode::ReadOnly).unwrap();
        assert!(reader.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleted_database_is_recreated_empty() {
        let directory = tempfile::tempdir().unwrap();
        let factory = FileDatabaseFactory::create(directory.path().join("host.redb")).await.unwrap();

        let connection = factory.open("app", 1, &create_stores(&["users"])).await.unwrap();
        let mut writer = connection.transaction("users", TransactionMode::ReadWrite).unwrap();
        writer.put("a", attributes! {}).await.unwrap();
        writer.commit().await.unwrap();

        let mut stale = connection.transaction("users", TransactionMode::ReadWrite).unwrap();
        stale.put("b", attributes! {}).await.unwrap();
        drop(connection);
        factory.delete_database("app").await.unwrap();
        factory.delete_database("never-existed").await.unwrap();
        assert!(factory.databases().unwrap().is_empty());
        assert!(matches!(stale.commit().await.unwrap_err(), EngineError::Backend(_)));

        let connection = factory.open("app", 1, &create_stores(&["users"])).await.unwrap();
        let mut reader = connection.transaction("users", TransactionMode::ReadOnly).unwrap();
        assert!(reader.keys().await.unwrap().is_empty());
        assert_eq!(factory.databases().unwrap(), vec!["app".to_string()]);
    }
}
