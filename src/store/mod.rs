//! Document Store Abstraction
//!
//! The runner talks to a `DocumentStore`; the official driver backs
//! [`MongoStore`], and [`MemoryStore`] evaluates the same filters and
//! pipelines in-process.

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::{MongoConfig, MongoConnectionOptions, MongoStore};

use crate::error::StoreError;
use async_trait::async_trait;
use mongodb::bson::Document;
use std::future::Future;
use std::sync::Arc;

/// Read-only query executor over named collections
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend label for logs and reports
    fn backend(&self) -> &'static str;

    /// Returns every document of `collection` matching `filter`
    async fn find(&self, collection: &str, filter: Document) -> Result<Vec<Document>, StoreError>;

    /// Runs an aggregation pipeline over `collection`
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, StoreError>;

    /// Checks that the store is reachable
    async fn ping(&self) -> Result<(), StoreError>;

    /// Releases the underlying connection resources
    async fn close(&self) -> Result<(), StoreError>;
}

/// Runs `f` with the store, then always closes it.
///
/// A failure to close is logged; the closure's output is returned either way.
pub async fn with_store<F, Fut, T>(store: Arc<dyn DocumentStore>, f: F) -> T
where
    F: FnOnce(Arc<dyn DocumentStore>) -> Fut,
    Fut: Future<Output = T>,
{
    let output = f(Arc::clone(&store)).await;
    if let Err(e) = store.close().await {
        tracing::warn!(backend = store.backend(), error = %e, "failed to close document store");
    } else {
        tracing::debug!(backend = store.backend(), "document store closed");
    }
    output
}
