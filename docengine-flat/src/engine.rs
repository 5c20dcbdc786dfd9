//! [`FlatStoreEngine`] and its builder.
//!
//! Each operation loads the whole collection blob, applies the change in memory
//! and writes the blob back under `prefix + collection`.

use async_trait::async_trait;
use tracing::debug;

use docengine_core::{
    attribute::{Attributes, Documents},
    engine::{Engine, EngineBuilder},
    error::{EngineError, EngineResult},
    filter::Filters,
    helper::EngineHelper,
};

use crate::{
    codec::AttributeCodec,
    storage::{KeyValueStorage, MemoryStorage},
};


/// Engine persisting each collection as one JSON blob in a flat key-value storage.
///
/// The blob of collection `c` lives under the key `prefix + c`. Every write reads
/// the whole blob, changes it and writes it back. There is no locking: concurrent
/// writers to the same collection see last-writer-wins on the whole collection.
#[derive(Debug, Clone)]
pub struct FlatStoreEngine<S: KeyValueStorage = MemoryStorage> {
    storage: S,
    prefix: String,
    helper: EngineHelper,
}

impl FlatStoreEngine {
    /// Creates an engine over fresh in-process storage with an empty prefix.
    pub fn new() -> Self {
        Self::with_storage(MemoryStorage::new(), "")
    }

    pub fn builder() -> FlatStoreEngineBuilder {
        FlatStoreEngineBuilder::default()
    }
}

impl Default for FlatStoreEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: KeyValueStorage> FlatStoreEngine<S> {
    pub fn with_storage(storage: S, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
            helper: EngineHelper::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Removes every collection written by this engine, i.e. every key that
    /// starts with the prefix.
    pub async fn clear(&self) -> EngineResult<()> {
        for key in self.storage.keys().await? {
            if key.starts_with(&self.prefix) {
                self.storage.remove_item(&key).await?;
            }
        }
        debug!(prefix = %self.prefix, "cleared flat store");

        Ok(())
    }

    fn item_key(&self, collection: &str) -> String {
        format!("{}{}", self.prefix, collection)
    }

    /// Reads and decodes a collection. A missing key is an empty collection.
    async fn read_collection(&self, collection: &str) -> EngineResult<Documents> {
        match self.storage.get_item(&self.item_key(collection)).await? {
            Some(blob) => AttributeCodec::decode_collection(&blob),
            None => Ok(Documents::new()),
        }
    }

    async fn write_collection(&self, collection: &str, documents: &Documents) -> EngineResult<()> {
        self.storage
            .set_item(
                &self.item_key(collection),
                AttributeCodec::encode_collection(documents)?,
            )
            .await
    }
}

#[async_trait]
impl<S: KeyValueStorage> Engine for FlatStoreEngine<S> {
    async fn create(
        &self,
        collection: &str,
        attributes: Attributes,
        id: Option<String>,
    ) -> EngineResult<String> {
        let mut documents = self.read_collection(collection).await?;
        let id = self.helper.obtain_document_id(id);

        if documents.contains_key(&id) {
            return Err(EngineError::already_exists(&id, collection));
        }

        documents.insert(id.clone(), attributes);
        self.write_collection(collection, &documents).await?;
        debug!(collection, id = %id, "created document in flat store");

        Ok(id)
    }

    async fn read_one(&self, collection: &str, id: &str) -> EngineResult<Attributes> {
        self.read_collection(collection)
            .await?
            .shift_remove(id)
            .ok_or_else(|| EngineError::not_found(id, collection))
    }

    async fn read_many(
        &self,
        collection: &str,
        filters: Option<&Filters>,
    ) -> EngineResult<Documents> {
        let documents = self.read_collection(collection).await?;

        Ok(self.helper.filter_documents(documents, filters))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        updated_attributes: Attributes,
        removed_attributes: Vec<String>,
    ) -> EngineResult<()> {
        let mut documents = self.read_collection(collection).await?;
        let attributes = documents
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found(id, collection))?;

        self.helper
            .apply_update(attributes, updated_attributes, &removed_attributes);
        self.write_collection(collection, &documents).await?;
        debug!(collection, id, "updated document in flat store");

        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> EngineResult<()> {
        let mut documents = self.read_collection(collection).await?;

        if documents.shift_remove(id).is_none() {
            return Err(EngineError::not_found(id, collection));
        }

        self.write_collection(collection, &documents).await?;
        debug!(collection, id, "deleted document from flat store");

        Ok(())
    }
}


/// Builder for [`FlatStoreEngine`].
///
/// # Example
///
/// ```ignore
/// use docengine_flat::{FlatStoreEngine, FileStorage};
/// use docengine::engine::EngineBuilder;
///
/// let engine = FlatStoreEngine::builder()
///     .prefix("app:")
///     .storage(FileStorage::open("./data").await?)
///     .build()
///     .await?;
/// ```
#[derive(Debug)]
pub struct FlatStoreEngineBuilder<S: KeyValueStorage = MemoryStorage> {
    storage: S,
    prefix: String,
}

impl Default for FlatStoreEngineBuilder {
    fn default() -> Self {
        Self {
            storage: MemoryStorage::new(),
            prefix: String::new(),
        }
    }
}

impl<S: KeyValueStorage> FlatStoreEngineBuilder<S> {
    /// Sets the prefix prepended to every collection key.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Replaces the storage the engine writes to.
    pub fn storage<T: KeyValueStorage>(self, storage: T) -> FlatStoreEngineBuilder<T> {
        FlatStoreEngineBuilder {
            storage,
            prefix: self.prefix,
        }
    }
}

#[async_trait]
impl<S: KeyValueStorage> EngineBuilder for FlatStoreEngineBuilder<S> {
    type Engine = FlatStoreEngine<S>;

    async fn build(self) -> EngineResult<Self::Engine> {
        Ok(FlatStoreEngine::with_storage(self.storage, self.prefix))
    }
}
