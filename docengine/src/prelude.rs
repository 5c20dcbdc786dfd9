//! Convenient re-exports of commonly used types from docengine.
//!
//! ```ignore
//! use docengine::prelude::*;
//! ```

pub use docengine_core::{
    attribute::{AttributeValue, Attributes, Documents},
    collection::Collection,
    engine::{DynEngine, Engine, EngineBuilder},
    error::{EngineError, EngineResult},
    filter::{FieldFilter, Filters},
    store::{DocumentStore, DynDocumentStore},
};

pub use crate::config::EngineConfig;
