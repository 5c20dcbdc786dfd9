//! Flat key-value engine for docengine.
//!
//! This crate stores every collection as a single JSON blob in a flat key-value
//! text storage, the way browser local storage is typically used. Date-time
//! attributes survive the trip through JSON as `{"__dateTime": <epoch millis>}`
//! wrappers.
//!
//! # Storage
//!
//! - [`MemoryStorage`] - shared in-process map, the default
//! - [`FileStorage`] - one file per collection inside a directory
//!
//! Any other substrate can be plugged in by implementing [`KeyValueStorage`].
//!
//! # Consistency
//!
//! Writes read, modify and rewrite the whole collection blob without locking.
//! Two concurrent writers to the same collection race and the last one to
//! write wins, possibly discarding the other's change.
//!
//! # Example
//!
//! ```ignore
//! use docengine::{attributes, engine::{Engine, EngineBuilder}, flat::{FileStorage, FlatStoreEngine}};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = FlatStoreEngine::builder()
//!         .prefix("app:")
//!         .storage(FileStorage::open("./data").await?)
//!         .build()
//!         .await?;
//!
//!     engine.create("users", attributes! { "name" => "Alice" }, None).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docengine_flat;

pub mod codec;
pub mod engine;
pub mod storage;

pub use codec::DATE_TIME_TAG;
pub use engine::{FlatStoreEngine, FlatStoreEngineBuilder};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
