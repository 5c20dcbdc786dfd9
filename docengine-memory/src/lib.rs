//! In-memory engine for docengine.
//!
//! This crate provides a thread-safe, in-memory implementation of the `Engine` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and as the reference behaviour other engines are checked against.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **No serialization** - Attributes are stored exactly as given
//! - **Insertion order** - `read_many` returns documents in the order they were created
//!
//! # Quick Start
//!
//! ```ignore
//! use docengine::{attributes, engine::Engine, memory::InMemoryEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = InMemoryEngine::builder().build().await?;
//!
//!     let id = engine.create("users", attributes! { "name" => "Alice" }, None).await?;
//!     engine.update("users", &id, attributes! { "name" => "Alicia" }, vec![]).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docengine_memory;

pub mod engine;

pub use engine::{InMemoryDatabase, InMemoryEngine, InMemoryEngineBuilder};
