//! # query-catalog
//!
//! A fixed catalogue of named MongoDB filter and aggregation queries over the
//! `users`, `authors` and `books` collections, executed through a
//! [`DocumentStore`](store::DocumentStore).
//!
//! Two stores are provided: [`MongoStore`](store::MongoStore) on the official
//! driver, and [`MemoryStore`](store::MemoryStore), which evaluates the same
//! queries in-process for offline runs against JSON fixtures.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod runner;
pub mod store;

pub use catalog::{Catalog, Category, QueryDefinition, QueryKind};
pub use error::{Error, Result, StoreError, StoreErrorKind};
pub use runner::{QueryOutput, QueryReport, QueryRunner, RunSummary};
pub use store::{DocumentStore, MemoryStore, MongoStore};
