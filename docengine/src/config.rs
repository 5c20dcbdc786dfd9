//! Runtime engine selection.
//!
//! An [`EngineConfig`] names an engine and its settings and can be read from
//! JSON:
//!
//! ```json
//! { "engine": "memory" }
//! { "engine": "flat", "prefix": "app:", "directory": "./data" }
//! { "engine": "indexed", "database": "app" }
//! { "engine": "indexed", "database": "app", "path": "./data/app.redb" }
//! ```
//!
//! [`EngineConfig::build`] turns it into a `Box<dyn DynEngine>`.

use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use docengine_core::{
    engine::{DynEngine, EngineBuilder},
    error::{EngineError, EngineResult},
};
use docengine_memory::InMemoryEngine;

#[cfg(feature = "flat")]
use docengine_flat::{FileStorage, FlatStoreEngine};
#[cfg(feature = "indexed")]
use docengine_indexed::{DEFAULT_DATABASE, FileDatabaseFactory, IndexedStoreEngine};


/// Engine-specific configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "lowercase")]
pub enum EngineConfig {
    /// [`InMemoryEngine`] with empty storage.
    #[default]
    Memory,
    /// [`FlatStoreEngine`], over files in `directory` when set and over fresh
    /// in-process storage otherwise.
    #[cfg(feature = "flat")]
    Flat {
        #[serde(default)]
        prefix: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        directory: Option<PathBuf>,
    },
    /// [`IndexedStoreEngine`] over the redb file at `path` when set and over a
    /// fresh in-process database host otherwise.
    #[cfg(feature = "indexed")]
    Indexed {
        #[serde(default = "default_database")]
        database: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
}

#[cfg(feature = "indexed")]
fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

impl EngineConfig {
    pub fn from_json(text: &str) -> EngineResult<Self> {
        serde_json::from_str(text)
            .map_err(|err| EngineError::Initialization(format!("invalid engine configuration: {err}")))
    }

    pub fn from_value(value: Value) -> EngineResult<Self> {
        serde_json::from_value(value)
            .map_err(|err| EngineError::Initialization(format!("invalid engine configuration: {err}")))
    }

    /// Name of the selected engine, as written in the `engine` field.
    pub fn engine_name(&self) -> &'static str {
        match self {
            EngineConfig::Memory => "memory",
            #[cfg(feature = "flat")]
            EngineConfig::Flat { .. } => "flat",
            #[cfg(feature = "indexed")]
            EngineConfig::Indexed { .. } => "indexed",
        }
    }

    /// Builds the configured engine.
    ///
    /// # Errors
    ///
    /// Fails if the engine cannot be initialized, for example when the flat
    /// storage directory or the indexed host file cannot be created.
    pub async fn build(&self) -> EngineResult<Box<dyn DynEngine>> {
        let engine: Box<dyn DynEngine> = match self {
            EngineConfig::Memory => Box::new(InMemoryEngine::builder().build().await?),
            #[cfg(feature = "flat")]
            EngineConfig::Flat { prefix, directory: Some(directory) } => Box::new(
                FlatStoreEngine::builder()
                    .prefix(prefix.clone())
                    .storage(FileStorage::open(directory.clone()).await?)
                    .build()
                    .await?,
            ),
            #[cfg(feature = "flat")]
            EngineConfig::Flat { prefix, directory: None } => Box::new(
                FlatStoreEngine::builder()
                    .prefix(prefix.clone())
                    .build()
                    .await?,
            ),
            #[cfg(feature = "indexed")]
            EngineConfig::Indexed { database, path: Some(path) } => Box::new(
                IndexedStoreEngine::builder()
                    .database(database.clone())
                    .factory(FileDatabaseFactory::create(path).await?)
                    .build()
                    .await?,
            ),
            #[cfg(feature = "indexed")]
            EngineConfig::Indexed { database, path: None } => Box::new(
                IndexedStoreEngine::builder()
                    .database(database.clone())
                    .build()
                    .await?,
            ),
        };
        debug!(engine = self.engine_name(), "built engine from configuration");

        Ok(engine)
    }
}
