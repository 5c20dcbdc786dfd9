//! In-memory engine implementation.
//!
//! Documents are held in insertion-ordered maps behind an async-aware
//! read-write lock. Nothing is serialized; this is the reference engine the
//! other backends are checked against.

use std::sync::Arc;
use async_trait::async_trait;
use indexmap::IndexMap;
use mea::rwlock::RwLock;
use tracing::debug;

use docengine_core::{
    attribute::{Attributes, Documents},
    engine::{Engine, EngineBuilder},
    error::{EngineError, EngineResult},
    filter::Filters,
    helper::EngineHelper,
};

/// The whole database: collection name -> (document id -> attributes).
pub type InMemoryDatabase = IndexMap<String, Documents>;


/// Thread-safe in-memory engine.
///
/// # Thread Safety
///
/// `InMemoryEngine` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Example
///
/// ```ignore
/// use docengine_memory::InMemoryEngine;
/// use docengine::{attributes, engine::Engine};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = InMemoryEngine::new();
///
///     let id = engine.create("users", attributes! { "name" => "Alice" }, None).await?;
///     let alice = engine.read_one("users", &id).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryEngine {
    database: Arc<RwLock<InMemoryDatabase>>,
    helper: EngineHelper,
}

impl InMemoryEngine {
    /// Creates a new empty in-memory engine.
    pub fn new() -> Self {
        Self {
            database: Arc::new(RwLock::new(InMemoryDatabase::new())),
            helper: EngineHelper::new(),
        }
    }

    /// Creates a builder for constructing an `InMemoryEngine`.
    pub fn builder() -> InMemoryEngineBuilder {
        InMemoryEngineBuilder::default()
    }

    /// Returns a copy of every collection and document currently held.
    pub async fn snapshot(&self) -> InMemoryDatabase {
        self.database.read().await.clone()
    }
}


#[async_trait]
impl Engine for InMemoryEngine {
    async fn create(
        &self,
        collection: &str,
        attributes: Attributes,
        id: Option<String>,
    ) -> EngineResult<String> {
        let id = self.helper.obtain_document_id(id);
        let mut database = self.database.write().await;
        let documents = database
            .entry(collection.to_string())
            .or_default();

        if documents.contains_key(&id) {
            return Err(EngineError::already_exists(&id, collection));
        }

        documents.insert(id.clone(), attributes);
        debug!(collection, id = %id, "created document in memory");

        Ok(id)
    }

    async fn read_one(&self, collection: &str, id: &str) -> EngineResult<Attributes> {
        self.database
            .read()
            .await
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned()
            .ok_or_else(|| EngineError::not_found(id, collection))
    }

    async fn read_many(
        &self,
        collection: &str,
        filters: Option<&Filters>,
    ) -> EngineResult<Documents> {
        let documents = match self.database.read().await.get(collection) {
            Some(documents) => documents.clone(),
            None => return Ok(Documents::new()),
        };

        Ok(self.helper.filter_documents(documents, filters))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        updated_attributes: Attributes,
        removed_attributes: Vec<String>,
    ) -> EngineResult<()> {
        let mut database = self.database.write().await;
        let attributes = database
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
            .ok_or_else(|| EngineError::not_found(id, collection))?;

        self.helper
            .apply_update(attributes, updated_attributes, &removed_attributes);
        debug!(collection, id, "updated document in memory");

        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> EngineResult<()> {
        let mut database = self.database.write().await;
        let documents = database
            .get_mut(collection)
            .ok_or_else(|| EngineError::not_found(id, collection))?;

        // Keep the remaining documents in insertion order.
        if documents.shift_remove(id).is_none() {
            return Err(EngineError::not_found(id, collection));
        }
        debug!(collection, id, "deleted document from memory");

        Ok(())
    }
}


/// Builder for constructing [`InMemoryEngine`] instances.
#[derive(Default)]
pub struct InMemoryEngineBuilder;

#[async_trait]
impl EngineBuilder for InMemoryEngineBuilder {
    type Engine = InMemoryEngine;

    /// Builds and returns a new [`InMemoryEngine`] instance.
    ///
    /// This always succeeds and returns a freshly initialized engine.
    async fn build(self) -> EngineResult<Self::Engine> {
        Ok(InMemoryEngine::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docengine_core::{attribute::AttributeValue, attributes};

    #[tokio::test]
    async fn test_create_stores_document_under_collection() {
        let engine = InMemoryEngine::new();

        let id = engine
            .create("users", attributes! { "name" => "Alice" }, None)
            .await
            .unwrap();

        let database = engine.snapshot().await;
        assert_eq!(database.len(), 1);
        assert_eq!(database["users"].len(), 1);
        assert_eq!(database["users"][&id], attributes! { "name" => "Alice" });
    }

    #[tokio::test]
    async fn test_create_with_existing_id_leaves_document_untouched() {
        let engine = InMemoryEngine::new();
        engine
            .create("users", attributes! { "name" => "Alice" }, Some("1".into()))
            .await
            .unwrap();

        let error = engine
            .create("users", attributes! { "name" => "Bob" }, Some("1".into()))
            .await
            .unwrap_err();

        assert!(error.is_already_exists());
        assert_eq!(
            engine.read_one("users", "1").await.unwrap()["name"],
            AttributeValue::from("Alice")
        );
    }

    #[tokio::test]
    async fn test_read_many_preserves_insertion_order() {
        let engine = InMemoryEngine::new();

        for id in ["c", "a", "b"] {
            engine
                .create("letters", attributes! { "letter" => id }, Some(id.into()))
                .await
                .unwrap();
        }
        engine.delete("letters", "a").await.unwrap();

        let documents = engine.read_many("letters", None).await.unwrap();
        assert_eq!(documents.keys().collect::<Vec<_>>(), vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_read_many_on_missing_collection_is_empty() {
        let engine = InMemoryEngine::new();

        assert!(engine.read_many("missing", None).await.unwrap().is_empty());
        assert!(engine.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_targets_are_not_found() {
        let engine = InMemoryEngine::new();
        engine
            .create("users", attributes! { "name" => "Alice" }, None)
            .await
            .unwrap();

        assert!(engine.read_one("users", "missing").await.unwrap_err().is_not_found());
        assert!(engine.update("users", "missing", attributes! {}, vec![]).await.unwrap_err().is_not_found());
        assert!(engine.delete("posts", "missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_clones_share_data() {
        let engine = InMemoryEngine::builder().build().await.unwrap();
        let clone = engine.clone();

        let id = clone
            .create("users", attributes! { "name" => "Alice" }, None)
            .await
            .unwrap();

        assert!(engine.read_one("users", &id).await.is_ok());
    }
}
