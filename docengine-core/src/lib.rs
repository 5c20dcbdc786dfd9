//! Core of the docengine project: a uniform document CRUD contract implemented by
//! interchangeable storage engines.
//!
//! This crate provides:
//!
//! - **Attribute values** ([`attribute`]) - The closed value universe stored in documents
//! - **Engine contract** ([`engine`]) - The async trait every backend implements
//! - **Filters** ([`filter`]) - Post-read predicates for `read_many`
//! - **Engine helper** ([`helper`]) - Id generation, update patching and filtering shared by engines
//! - **Collections and stores** ([`collection`], [`store`]) - Handles binding an engine to collection names
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use docengine::{attributes, engine::Engine, filter::Filters};
//!
//! let id = engine.create("users", attributes! { "name" => "Alice" }, None).await?;
//! let admins = engine
//!     .read_many("users", Some(&Filters::new().contains("roles", vec!["admin"])))
//!     .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docengine_core;

pub mod attribute;
pub mod collection;
pub mod engine;
pub mod error;
pub mod filter;
pub mod helper;
pub mod store;
