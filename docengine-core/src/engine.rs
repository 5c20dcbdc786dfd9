//! The engine contract every storage backend implements.
//!
//! # Overview
//!
//! The [`Engine`] trait is a uniform async CRUD interface over a storage
//! substrate. Callers address documents by collection name and document id;
//! collections are never declared and come into existence on the first
//! `create`.
//!
//! # Traits
//!
//! - [`Engine`]: The core trait for storage engines
//! - [`DynEngine`]: Object-safe extension for runtime engine selection and downcasting
//! - [`EngineBuilder`]: Factory trait for creating engine instances
//!
//! # Examples
//!
//! ```ignore
//! use docengine::{attributes, engine::Engine};
//!
//! let engine = MyEngineImpl::new();
//!
//! let id = engine.create("users", attributes! { "name" => "Alice" }, None).await?;
//! let user = engine.read_one("users", &id).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use std::{any::Any, fmt::Debug, sync::Arc};

use crate::{
    attribute::{Attributes, Documents},
    error::EngineResult,
    filter::Filters,
};

/// Abstract interface for document storage engines.
///
/// # Error Handling
///
/// - [`EngineError::DocumentNotFound`](crate::error::EngineError::DocumentNotFound)
///   is returned by `read_one`, `update` and `delete` when either the collection
///   or the document is missing.
/// - [`EngineError::DocumentAlreadyExists`](crate::error::EngineError::DocumentAlreadyExists)
///   is returned by `create` when an explicit id is already taken; the stored
///   document is left untouched.
///
/// `read_many` never fails because a collection is missing, it returns an empty
/// mapping instead.
#[async_trait]
pub trait Engine: Send + Sync + Debug {
    /// Creates a document and returns its id.
    ///
    /// When `id` is `None` a random id is generated. The collection is created if
    /// it does not exist yet.
    async fn create(
        &self,
        collection: &str,
        attributes: Attributes,
        id: Option<String>,
    ) -> EngineResult<String>;

    /// Reads a single document.
    async fn read_one(&self, collection: &str, id: &str) -> EngineResult<Attributes>;

    /// Reads every document of a collection, narrowed by `filters`.
    ///
    /// Documents are returned in the engine's storage order.
    async fn read_many(
        &self,
        collection: &str,
        filters: Option<&Filters>,
    ) -> EngineResult<Documents>;

    /// Shallow-merges `updated_attributes` into a document, then removes
    /// `removed_attributes` from it.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        updated_attributes: Attributes,
        removed_attributes: Vec<String>,
    ) -> EngineResult<()>;

    /// Deletes a single document.
    async fn delete(&self, collection: &str, id: &str) -> EngineResult<()>;
}

macro_rules! forward_engine {
    ($($wrapper:ty),+ $(,)?) => {
        $(
            #[async_trait]
            impl<E> Engine for $wrapper
            where
                E: Engine + ?Sized,
            {
                async fn create(
                    &self,
                    collection: &str,
                    attributes: Attributes,
                    id: Option<String>,
                ) -> EngineResult<String> {
                    (**self)
                        .create(collection, attributes, id)
                        .await
                }

                async fn read_one(&self, collection: &str, id: &str) -> EngineResult<Attributes> {
                    (**self).read_one(collection, id).await
                }

                async fn read_many(
                    &self,
                    collection: &str,
                    filters: Option<&Filters>,
                ) -> EngineResult<Documents> {
                    (**self)
                        .read_many(collection, filters)
                        .await
                }

                async fn update(
                    &self,
                    collection: &str,
                    id: &str,
                    updated_attributes: Attributes,
                    removed_attributes: Vec<String>,
                ) -> EngineResult<()> {
                    (**self)
                        .update(collection, id, updated_attributes, removed_attributes)
                        .await
                }

                async fn delete(&self, collection: &str, id: &str) -> EngineResult<()> {
                    (**self).delete(collection, id).await
                }
            }
        )+
    };
}

forward_engine!(&E, Box<E>, Arc<E>);

/// Object-safe engine that can be recovered as its concrete type.
///
/// Every `'static` [`Engine`] implements it, so any engine can be boxed as
/// `Box<dyn DynEngine>` when the backend is chosen at runtime.
pub trait DynEngine: Engine {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<E: Engine + 'static> DynEngine for E {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl dyn DynEngine {
    /// Attempts to downcast a reference to a specific engine type.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let engine: Box<dyn DynEngine> = config.build().await?;
    /// if let Some(indexed) = engine.downcast_ref::<IndexedStoreEngine>() {
    ///     indexed.close_connections();
    /// }
    /// ```
    pub fn downcast_ref<E: Engine + 'static>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    /// Attempts to recover the owned concrete engine.
    pub fn downcast<E: Engine + 'static>(self: Box<Self>) -> Option<Box<E>> {
        self.into_any().downcast::<E>().ok()
    }
}

#[async_trait]
pub trait EngineBuilder {
    type Engine: Engine;

    async fn build(self) -> EngineResult<Self::Engine>;
}
