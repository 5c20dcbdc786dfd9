//! Indexed object-store engine for docengine.
//!
//! Collections map to object stores of a versioned database host, the way
//! browser IndexedDB is used. Object stores can only be created during a schema
//! upgrade, so the engine tracks collection names in a metadata database and
//! bumps the document database version whenever a collection is added.
//!
//! The host sits behind the traits in [`host`]. [`MemoryDatabaseFactory`] is an
//! in-process host whose clones share the same databases, and
//! [`FileDatabaseFactory`] persists them in a redb file.
//!
//! # Blocked connections
//!
//! Upgrades and purges cannot run while another connection to the database is
//! open. Instead of waiting, they fail with
//! [`EngineError::ConnectionBlocked`](docengine_core::error::EngineError::ConnectionBlocked).
//! Call [`IndexedStoreEngine::close_connections`] on every other engine sharing
//! the database before adding collections from a new instance or purging.
//!
//! # Example
//!
//! ```ignore
//! use docengine::{attributes, engine::{Engine, EngineBuilder}, indexed::{IndexedStoreEngine, MemoryDatabaseFactory}};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = MemoryDatabaseFactory::new();
//!     let engine = IndexedStoreEngine::builder()
//!         .database("app")
//!         .factory(host.clone())
//!         .build()
//!         .await?;
//!
//!     engine.create("users", attributes! { "name" => "Alice" }, None).await?;
//!     engine.close_connections();
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docengine_indexed;

pub mod engine;
pub mod file;
pub mod host;
pub mod memory;
mod pending;

pub use engine::{DEFAULT_DATABASE, IndexedStoreEngine, IndexedStoreEngineBuilder, METADATA_STORE, METADATA_SUFFIX};
pub use file::{FileConnection, FileDatabaseFactory};
pub use host::{DatabaseConnection, DatabaseFactory, SchemaEditor, StoreTransaction, TransactionMode, UpgradeCallback};
pub use memory::{MemoryConnection, MemoryDatabaseFactory};
