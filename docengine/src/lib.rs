//! Main docengine crate providing one document CRUD contract over interchangeable
//! storage engines.
//!
//! This crate is the entry point for users of docengine. It re-exports the core
//! types from `docengine-core` and the engines from the backend crates.
//!
//! # Features
//!
//! - **Uniform contract** - Every engine implements the same async [`engine::Engine`] trait
//! - **Schemaless documents** - Attribute maps over a closed value universe, date-times included
//! - **Filtering** - Literal equality, `$contains` and `$in` filters applied after reads
//! - **Runtime selection** - Build a `Box<dyn DynEngine>` from an [`EngineConfig`]
//!
//! # Quick Start
//!
//! ```ignore
//! use docengine::{prelude::*, attributes, memory::InMemoryEngine};
//!
//! #[tokio::main]
//! async fn main() -> EngineResult<()> {
//!     let store = DocumentStore::new(InMemoryEngine::builder().build().await?);
//!     let users = store.collection("users");
//!
//!     let id = users
//!         .create(attributes! { "name" => "Alice", "roles" => vec!["admin"] })
//!         .await?;
//!     users.update(&id, attributes! { "name" => "Alicia" }, vec![]).await?;
//!
//!     let admins = users
//!         .read_many(Some(&Filters::new().contains("roles", vec!["admin"])))
//!         .await?;
//!     println!("admins: {admins:?}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Dynamic Dispatch
//!
//! When the engine is chosen at runtime, build it from an [`EngineConfig`] and
//! wrap it in a [`store::DynDocumentStore`]:
//!
//! ```ignore
//! use docengine::{prelude::*, EngineConfig};
//!
//! let config = EngineConfig::from_json(r#"{"engine": "flat", "prefix": "app:"}"#)?;
//! let store = DynDocumentStore::new(config.build().await?);
//!
//! store.collection("users").read_many(None).await?;
//! ```
//!
//! # Engines
//!
//! - [`memory`] - Process-local maps, the reference engine
//! - [`flat`] - One JSON blob per collection in a flat key-value storage (requires `flat` feature)
//! - [`indexed`] - One object store per collection in a versioned database host (requires `indexed` feature)

pub mod config;
pub mod prelude;

pub use config::EngineConfig;
pub use docengine_core::{attribute, attributes, collection, engine, error, filter, helper, store};

// Re-export BSON types for convenience
pub use bson;

/// In-memory engine.
pub mod memory {
    pub use docengine_memory::{InMemoryDatabase, InMemoryEngine, InMemoryEngineBuilder};
}

/// Flat key-value engine and its storages.
///
/// This module is only available when the `flat` feature is enabled.
#[cfg(feature = "flat")]
pub mod flat {
    pub use docengine_flat::{
        DATE_TIME_TAG,
        FileStorage,
        FlatStoreEngine,
        FlatStoreEngineBuilder,
        KeyValueStorage,
        MemoryStorage,
    };
}

/// Indexed object-store engine and its database hosts.
///
/// This module is only available when the `indexed` feature is enabled.
#[cfg(feature = "indexed")]
pub mod indexed {
    pub use docengine_indexed::{
        DatabaseConnection,
        DatabaseFactory,
        FileDatabaseFactory,
        IndexedStoreEngine,
        IndexedStoreEngineBuilder,
        MemoryDatabaseFactory,
        SchemaEditor,
        StoreTransaction,
        TransactionMode,
        UpgradeCallback,
    };
}
