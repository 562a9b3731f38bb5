//! In-memory document store
//!
//! Holds collections in process and answers `find` / `aggregate` through the
//! [`engine`](crate::engine). Used for offline runs against JSON fixtures
//! and for exercising the catalogue without a server.

use super::DocumentStore;
use crate::engine::{self, Collections};
use crate::error::{Error, Result, StoreError};
use crate::models::{Author, Book, Collection, User};
use async_trait::async_trait;
use mongodb::bson::{oid::ObjectId, Document};
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::sync::RwLock;
use validator::Validate;

/// In-memory document store
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
    offline: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every call fails as an unreachable server would
    pub fn offline() -> Self {
        Self {
            collections: RwLock::new(Collections::new()),
            offline: true,
        }
    }

    /// Inserts documents, assigning an ObjectId `_id` where one is missing.
    pub async fn insert_many<I>(&self, collection: &str, documents: I) -> usize
    where
        I: IntoIterator<Item = Document>,
    {
        let mut collections = self.collections.write().await;
        let target = collections.entry(collection.to_string()).or_default();
        let before = target.len();
        for mut doc in documents {
            if !doc.contains_key("_id") {
                let mut with_id = Document::new();
                with_id.insert("_id", ObjectId::new());
                with_id.extend(doc);
                doc = with_id;
            }
            target.push(doc);
        }
        target.len() - before
    }

    /// Number of documents currently held in `collection`
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Loads `users.json`, `authors.json` and `books.json` from `dir`.
    ///
    /// A missing file leaves its collection empty. Every record is validated
    /// and the first invalid one fails the whole load.
    pub async fn from_fixtures(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::Fixture(format!(
                "fixture directory not found: {}",
                dir.display()
            )));
        }

        let store = Self::new();
        for collection in Collection::ALL {
            let file = dir.join(collection.fixture_file());
            if !file.exists() {
                tracing::debug!(file = %file.display(), "fixture file absent, collection left empty");
                continue;
            }
            let documents = match collection {
                Collection::Users => load_records::<User>(&file, User::to_document).await?,
                Collection::Authors => load_records::<Author>(&file, Author::to_document).await?,
                Collection::Books => load_records::<Book>(&file, Book::to_document).await?,
            };
            let inserted = store.insert_many(collection.name(), documents).await;
            tracing::info!(collection = %collection, documents = inserted, "fixtures loaded");
        }
        Ok(store)
    }

    fn check_online(&self) -> std::result::Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Connection(
                "in-memory store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

async fn load_records<T>(path: &Path, to_document: fn(&T) -> Document) -> Result<Vec<Document>>
where
    T: DeserializeOwned + Validate,
{
    let raw = tokio::fs::read_to_string(path).await?;
    let records: Vec<T> = serde_json::from_str(&raw)
        .map_err(|e| Error::Fixture(format!("{}: {}", path.display(), e)))?;

    records
        .iter()
        .enumerate()
        .map(|(position, record)| {
            record.validate().map_err(|e| {
                Error::Validation(format!("{}[{}]: {}", path.display(), position, e))
            })?;
            Ok(to_document(record))
        })
        .collect()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
    ) -> std::result::Result<Vec<Document>, StoreError> {
        self.check_online()?;
        let collections = self.collections.read().await;
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut found = Vec::new();
        for doc in documents {
            if engine::matches(doc, &filter)? {
                found.push(doc.clone());
            }
        }
        Ok(found)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> std::result::Result<Vec<Document>, StoreError> {
        self.check_online()?;
        let collections = self.collections.read().await;
        let input = collections.get(collection).cloned().unwrap_or_default();
        engine::execute(input, &pipeline, &collections)
    }

    async fn ping(&self) -> std::result::Result<(), StoreError> {
        self.check_online()
    }

    async fn close(&self) -> std::result::Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, Bson};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_insert_assigns_object_id() {
        let store = MemoryStore::new();
        let inserted = store
            .insert_many("users", vec![doc! { "name": "a" }, doc! { "_id": 7, "name": "b" }])
            .await;
        assert_eq!(inserted, 2);

        let all = store.find("users", doc! {}).await.unwrap();
        assert!(matches!(all[0].get("_id"), Some(Bson::ObjectId(_))));
        assert_eq!(all[0].keys().next().map(String::as_str), Some("_id"));
        assert_eq!(all[1].get_i32("_id").unwrap(), 7);
    }

    #[tokio::test]
    async fn test_find_on_unknown_collection_is_empty() {
        let store = MemoryStore::new();
        assert!(store.find("nothing", doc! {}).await.unwrap().is_empty());
        assert!(store.aggregate("nothing", vec![]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_store_fails_every_call() {
        let store = MemoryStore::offline();
        assert!(matches!(store.ping().await, Err(StoreError::Connection(_))));
        assert!(matches!(
            store.find("users", doc! {}).await,
            Err(StoreError::Connection(_))
        ));
        assert!(matches!(
            store.aggregate("users", vec![]).await,
            Err(StoreError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_from_fixtures_loads_and_validates() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("authors.json"),
            r#"[{"_id": 1, "name": "Leo Tolstoy", "birth_year": 1828}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("books.json"),
            r#"[{"_id": 10, "title": "War and Peace", "author_id": 1, "genre": "Historical"}]"#,
        )
        .unwrap();

        let store = MemoryStore::from_fixtures(dir.path()).await.unwrap();
        assert_eq!(store.count("authors").await, 1);
        assert_eq!(store.count("books").await, 1);
        assert_eq!(store.count("users").await, 0);
    }

    #[tokio::test]
    async fn test_from_fixtures_rejects_invalid_record() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("books.json"),
            r#"[{"_id": 10, "title": "", "author_id": 1, "genre": "Historical"}]"#,
        )
        .unwrap();

        let err = MemoryStore::from_fixtures(dir.path()).await.err().unwrap();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_from_fixtures_rejects_malformed_json() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("authors.json"), r#"[{"_id": 1, "name": "#).unwrap();

        let err = MemoryStore::from_fixtures(dir.path()).await.err().unwrap();
        assert!(matches!(err, Error::Fixture(ref msg) if msg.contains("authors.json")));
    }

    #[tokio::test]
    async fn test_from_fixtures_missing_directory() {
        let err = MemoryStore::from_fixtures("/definitely/not/here")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Fixture(_)));
    }
}
