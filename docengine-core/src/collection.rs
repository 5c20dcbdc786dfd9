//! Collection handles bound to an engine.
//!
//! A [`Collection`] pairs an engine reference with a collection name so callers
//! do not have to repeat the name on every operation.
//!
//! # Example
//!
//! ```ignore
//! use docengine::{attributes, store::DocumentStore, memory::InMemoryEngine};
//!
//! let store = DocumentStore::new(InMemoryEngine::new());
//! let users = store.collection("users");
//!
//! let id = users.create(attributes! { "name" => "Alice" }).await?;
//! let alice = users.read_one(&id).await?;
//! ```

use crate::{
    attribute::{Attributes, Documents},
    engine::Engine,
    error::EngineResult,
    filter::Filters,
};

/// A named collection with a reference to an engine.
///
/// # Type Parameters
///
/// * `'a` - Lifetime of the engine reference
/// * `E` - The engine type
#[derive(Debug)]
pub struct Collection<'a, E: Engine + ?Sized> {
    name: String,
    engine: &'a E,
}

impl<'a, E: Engine + ?Sized> Collection<'a, E> {
    pub(crate) fn new(name: String, engine: &'a E) -> Self {
        Self { name, engine }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates a document with a generated id and returns that id.
    pub async fn create(&self, attributes: Attributes) -> EngineResult<String> {
        self.engine
            .create(&self.name, attributes, None)
            .await
    }

    /// Creates a document under a caller-chosen id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DocumentAlreadyExists`](crate::error::EngineError::DocumentAlreadyExists)
    /// if the id is already taken.
    pub async fn create_with_id(&self, id: impl Into<String>, attributes: Attributes) -> EngineResult<String> {
        self.engine
            .create(&self.name, attributes, Some(id.into()))
            .await
    }

    pub async fn read_one(&self, id: &str) -> EngineResult<Attributes> {
        self.engine.read_one(&self.name, id).await
    }

    pub async fn read_many(&self, filters: Option<&Filters>) -> EngineResult<Documents> {
        self.engine
            .read_many(&self.name, filters)
            .await
    }

    pub async fn update(
        &self,
        id: &str,
        updated_attributes: Attributes,
        removed_attributes: Vec<String>,
    ) -> EngineResult<()> {
        self.engine
            .update(&self.name, id, updated_attributes, removed_attributes)
            .await
    }

    pub async fn delete(&self, id: &str) -> EngineResult<()> {
        self.engine.delete(&self.name, id).await
    }
}
