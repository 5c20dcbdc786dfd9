//! Owning wrapper around an engine.
//!
//! - [`DocumentStore<E>`] - statically dispatched over a concrete engine
//! - [`DynDocumentStore`] - the same store over a `Box<dyn DynEngine>`, for engines
//!   selected at runtime
//!
//! # Example
//!
//! ```ignore
//! use docengine::store::DocumentStore;
//!
//! let store = DocumentStore::new(engine);
//! let posts = store.collection("posts");
//! ```

use crate::{
    collection::Collection,
    engine::{DynEngine, Engine},
};

/// A document store bound to an engine.
#[derive(Debug)]
pub struct DocumentStore<E: Engine> {
    engine: E,
}

/// A document store over a runtime-selected engine.
pub type DynDocumentStore = DocumentStore<Box<dyn DynEngine>>;

impl<E: Engine> DocumentStore<E> {
    /// Creates a new document store with the given engine.
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    /// Gets a handle on the collection with the given name.
    ///
    /// The collection does not need to exist; it is created by the first
    /// document written through the handle.
    pub fn collection<'a>(&'a self, name: &str) -> Collection<'a, E> {
        Collection::new(name.to_string(), &self.engine)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }
}

impl<E: Engine + 'static> DocumentStore<E> {
    /// Erases the engine type.
    pub fn into_dyn(self) -> DynDocumentStore {
        DocumentStore::new(Box::new(self.engine))
    }
}

impl DynDocumentStore {
    /// Gets a reference to the engine as its concrete type, if it is an `E`.
    pub fn engine_as<E: Engine + 'static>(&self) -> Option<&E> {
        self.engine.downcast_ref::<E>()
    }
}
