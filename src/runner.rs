//! Query Runner
//!
//! Executes catalogue definitions against an injected [`DocumentStore`].
//! Failures are logged at the boundary and returned as typed errors;
//! an empty result is a separate, successful outcome.

use crate::catalog::{Catalog, QueryDefinition, QueryKind};
use crate::error::{Error, Result, StoreError};
use crate::store::DocumentStore;
use futures::future::join_all;
use mongodb::bson::{Bson, Document};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Successful result of one query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// At least one document came back
    Documents(Vec<Document>),
    /// The query ran and produced nothing
    Empty,
}

impl QueryOutput {
    pub fn from_documents(documents: Vec<Document>) -> Self {
        if documents.is_empty() {
            QueryOutput::Empty
        } else {
            QueryOutput::Documents(documents)
        }
    }

    pub fn documents(&self) -> &[Document] {
        match self {
            QueryOutput::Documents(docs) => docs,
            QueryOutput::Empty => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.documents().len()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, QueryOutput::Empty)
    }
}

/// Outcome of running one definition
#[derive(Debug, Clone)]
pub struct QueryReport {
    pub name: String,
    pub category: crate::catalog::Category,
    pub collection: crate::models::Collection,
    pub elapsed_ms: u64,
    pub outcome: std::result::Result<QueryOutput, StoreError>,
}

impl QueryReport {
    pub fn is_failure(&self) -> bool {
        self.outcome.is_err()
    }

    /// JSON rendering with documents in relaxed Extended JSON
    pub fn to_json(&self) -> Value {
        let mut report = json!({
            "name": self.name,
            "category": self.category,
            "collection": self.collection,
            "elapsed_ms": self.elapsed_ms,
        });
        match &self.outcome {
            Ok(QueryOutput::Documents(docs)) => {
                report["status"] = json!("ok");
                report["documents"] = Value::Array(
                    docs.iter()
                        .map(|d| Bson::Document(d.clone()).into_relaxed_extjson())
                        .collect(),
                );
            }
            Ok(QueryOutput::Empty) => {
                report["status"] = json!("empty");
                report["documents"] = json!([]);
            }
            Err(e) => {
                report["status"] = json!("error");
                report["error"] = json!({ "kind": e.kind(), "message": e.to_string() });
            }
        }
        report
    }
}

/// Counts over a batch of reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub with_results: usize,
    pub empty: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn from_reports(reports: &[QueryReport]) -> Self {
        reports.iter().fold(Self::default(), |mut summary, report| {
            summary.total += 1;
            match &report.outcome {
                Ok(QueryOutput::Documents(_)) => summary.with_results += 1,
                Ok(QueryOutput::Empty) => summary.empty += 1,
                Err(_) => summary.failed += 1,
            }
            summary
        })
    }
}

pub struct QueryRunner {
    store: Arc<dyn DocumentStore>,
}

impl QueryRunner {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Runs one definition. Never panics on store failure.
    pub async fn run(&self, query: &QueryDefinition) -> QueryReport {
        let collection = query.collection.name();
        debug!(
            query = %query.name,
            backend = self.store.backend(),
            "running {} on {}",
            query.operation(),
            collection
        );

        let started = Instant::now();
        let result = match &query.kind {
            QueryKind::Find { filter } => self.store.find(collection, filter.clone()).await,
            QueryKind::Aggregate { pipeline } => {
                self.store.aggregate(collection, pipeline.clone()).await
            }
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = match result {
            Ok(documents) => {
                let output = QueryOutput::from_documents(documents);
                info!(
                    query = %query.name,
                    documents = output.len(),
                    elapsed_ms,
                    "query completed"
                );
                Ok(output)
            }
            Err(e) => {
                error!(
                    query = %query.name,
                    kind = %e.kind(),
                    elapsed_ms,
                    "query failed: {}",
                    e
                );
                Err(e)
            }
        };

        QueryReport {
            name: query.name.clone(),
            category: query.category,
            collection: query.collection,
            elapsed_ms,
            outcome,
        }
    }

    /// Looks `name` up in `catalog` and runs it
    pub async fn run_named(&self, catalog: &Catalog, name: &str) -> Result<QueryReport> {
        let query = catalog
            .get(name)
            .ok_or_else(|| Error::UnknownQuery(name.to_string()))?;
        Ok(self.run(query).await)
    }

    /// Runs every definition concurrently; reports keep the input order.
    pub async fn run_all(&self, queries: &[QueryDefinition]) -> Vec<QueryReport> {
        let reports = join_all(queries.iter().map(|q| self.run(q))).await;
        let summary = RunSummary::from_reports(&reports);
        info!(
            total = summary.total,
            with_results = summary.with_results,
            empty = summary.empty,
            failed = summary.failed,
            "catalogue run finished"
        );
        reports
    }
}
