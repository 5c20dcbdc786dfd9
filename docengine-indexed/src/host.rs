//! Boundary to a versioned object-store database host.
//!
//! The host manages named databases. Each database has a version number and a
//! set of object stores (key -> attributes, iterated in ascending key order).
//! Object stores can only be created inside the upgrade callback passed to
//! [`DatabaseFactory::open`], which runs when a database is opened at a version
//! higher than its current one. An upgrade cannot proceed while another
//! connection to the same database is open; hosts report that as
//! [`EngineError::ConnectionBlocked`](docengine_core::error::EngineError::ConnectionBlocked)
//! instead of waiting.

use std::fmt::Debug;
use async_trait::async_trait;

use docengine_core::{attribute::Attributes, error::EngineResult};


/// Access mode of a [`StoreTransaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// Schema operations available to an upgrade callback.
pub trait SchemaEditor {
    fn object_store_names(&self) -> Vec<String>;

    fn contains(&self, name: &str) -> bool;

    /// Creates an empty object store. Fails if it already exists.
    fn create_object_store(&mut self, name: &str) -> EngineResult<()>;
}

/// Schema upgrade run by [`DatabaseFactory::open`].
///
/// `'u` bounds what the callback borrows, so it may capture local state such
/// as the list of stores to create.
pub type UpgradeCallback<'u> = dyn for<'a> Fn(&'a mut dyn SchemaEditor) -> EngineResult<()> + Send + Sync + 'u;

/// Opens and deletes databases.
#[async_trait]
pub trait DatabaseFactory: Send + Sync + Debug {
    /// Opens `name` at `version`, creating the database if it does not exist.
    ///
    /// When `version` is higher than the current version, `upgrade` runs before
    /// the connection is returned; an error from it aborts the upgrade and
    /// leaves the schema unchanged. Opening at a lower version fails.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionBlocked` if an upgrade is needed while another
    /// connection to the database is open.
    async fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: &UpgradeCallback<'_>,
    ) -> EngineResult<Box<dyn DatabaseConnection>>;

    /// Deletes a database and everything in it. Deleting an unknown database succeeds.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionBlocked` if a connection to the database is still open.
    async fn delete_database(&self, name: &str) -> EngineResult<()>;
}

/// An open connection to one database at one version.
///
/// Dropping a connection closes it.
pub trait DatabaseConnection: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn version(&self) -> u32;

    /// Object stores present when the connection was opened.
    fn object_store_names(&self) -> Vec<String>;

    /// Starts a transaction scoped to a single object store.
    fn transaction(&self, store: &str, mode: TransactionMode) -> EngineResult<Box<dyn StoreTransaction>>;

    /// Releases the connection. Transactions already started may still commit.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A transaction on a single object store.
///
/// Writes are only visible to other transactions after [`StoreTransaction::commit`];
/// dropping an uncommitted transaction discards them.
#[async_trait]
pub trait StoreTransaction: Send {
    fn mode(&self) -> TransactionMode;

    async fn get(&mut self, key: &str) -> EngineResult<Option<Attributes>>;

    /// Inserts a record, failing with `DocumentAlreadyExists` if the key is taken.
    async fn add(&mut self, key: &str, value: Attributes) -> EngineResult<()>;

    /// Inserts or replaces a record.
    async fn put(&mut self, key: &str, value: Attributes) -> EngineResult<()>;

    async fn delete(&mut self, key: &str) -> EngineResult<()>;

    /// Every key, in ascending order.
    async fn keys(&mut self) -> EngineResult<Vec<String>>;

    /// Every record, in ascending key order.
    async fn entries(&mut self) -> EngineResult<Vec<(String, Attributes)>>;

    /// Applies the buffered writes atomically.
    async fn commit(self: Box<Self>) -> EngineResult<()>;
}
