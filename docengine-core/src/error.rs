//! Error types and result types for engine operations.
//!
//! Every engine operation returns an [`EngineResult<T>`]. The two document
//! lifecycle variants ([`EngineError::DocumentNotFound`] and
//! [`EngineError::DocumentAlreadyExists`]) are expected conditions a caller can
//! recover from; [`EngineError::ConnectionBlocked`] signals a usage bug and is
//! never retried.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with an engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The requested document was not found, either because the collection does not
    /// exist or because the id is absent within it.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// Opening or deleting a database was blocked by another open connection.
    #[error(
        "An attempt to open or delete database {0} has been blocked by another open connection, \
        remember to call close_connections on every engine using it before changing its schema"
    )]
    ConnectionBlocked(String),
    /// Serialization/deserialization error when converting between formats (JSON, BSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A filter could not be parsed from its wire representation.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
    /// A value falls outside the attribute value universe.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    /// An I/O error occurred in the underlying storage substrate.
    #[error("Storage error: {0}")]
    Storage(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// Error during engine construction or configuration.
    #[error("Initialization error: {0}")]
    Initialization(String),
}

impl EngineError {
    /// Returns `true` for [`EngineError::DocumentNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::DocumentNotFound(..))
    }

    /// Returns `true` for [`EngineError::DocumentAlreadyExists`].
    pub fn is_already_exists(&self) -> bool {
        matches!(self, EngineError::DocumentAlreadyExists(..))
    }

    /// Returns `true` for [`EngineError::ConnectionBlocked`].
    pub fn is_blocked(&self) -> bool {
        matches!(self, EngineError::ConnectionBlocked(_))
    }

    /// Builds a [`EngineError::DocumentNotFound`] for `id` in `collection`.
    pub fn not_found(id: &str, collection: &str) -> Self {
        EngineError::DocumentNotFound(id.to_string(), collection.to_string())
    }

    /// Builds a [`EngineError::DocumentAlreadyExists`] for `id` in `collection`.
    pub fn already_exists(id: &str, collection: &str) -> Self {
        EngineError::DocumentAlreadyExists(id.to_string(), collection.to_string())
    }
}

/// A specialized `Result` type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<BsonError> for EngineError {
    fn from(err: BsonError) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for EngineError {
    fn from(err: SerdeJsonError) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}
