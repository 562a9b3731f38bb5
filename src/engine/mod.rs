//! In-process query engine
//!
//! Evaluates MongoDB filter documents and aggregation pipelines over BSON
//! documents held in memory. Backs [`MemoryStore`](crate::store::MemoryStore)
//! and follows the server's semantics for the operators the catalogue uses.

pub mod compare;
pub mod expr;
pub mod filter;
pub mod path;
pub mod pipeline;

use mongodb::bson::Document;
use std::collections::HashMap;

/// Collection name to documents
pub type Collections = HashMap<String, Vec<Document>>;

pub use filter::matches;
pub use pipeline::execute;
