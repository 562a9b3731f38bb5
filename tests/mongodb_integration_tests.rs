//! MongoDB Integration Tests
//!
//! Runs the catalogue against a live server and cross-checks it with the
//! in-memory store. Skipped unless `MONGODB_TEST_URL` is set, e.g.
//! `MONGODB_TEST_URL=mongodb://localhost:27017 cargo test --test mongodb_integration_tests`.

use mongodb::bson::{doc, Bson, Document};
use query_catalog::store::{DocumentStore, MongoConfig, MongoStore};
use query_catalog::{Catalog, MemoryStore, QueryOutput, QueryRunner};
use std::sync::Arc;
use std::time::Duration;

fn test_url() -> Option<String> {
    match std::env::var("MONGODB_TEST_URL") {
        Ok(url) if !url.is_empty() => Some(url),
        _ => {
            println!("MONGODB_TEST_URL not set, skipping MongoDB integration test");
            None
        }
    }
}

fn test_config(url: String, suffix: &str) -> MongoConfig {
    let mut config = MongoConfig::new(url, format!("query_catalog_test_{suffix}_{}", std::process::id()));
    config.pool_options.server_selection_timeout = Duration::from_secs(5);
    config
}

fn users() -> Vec<Document> {
    vec![
        doc! { "_id": 1, "index": 1, "name": "Jane Roe", "isActive": true, "age": 21, "gender": "female",
               "favoriteFruit": "banana", "tags": ["enim", "ad", "id"],
               "company": { "title": "YURTURE", "phone": "+1 (940) 501-3963", "location": { "country": "USA" } } },
        doc! { "_id": 2, "index": 40, "name": "john doe", "isActive": false, "age": 30, "gender": "male",
               "favoriteFruit": "apple", "tags": ["velit", "ad"],
               "company": { "title": "GEEKOSIS", "phone": "+1 (845) 555-0101", "location": { "country": "USA" } } },
        doc! { "_id": 3, "index": 2, "name": "Ann Lee", "isActive": true, "age": 17, "gender": "other",
               "favoriteFruit": "banana", "tags": [],
               "company": { "title": "STROZEN", "phone": "+1 (940) 555-0102", "location": { "country": "France" } } },
        doc! { "_id": 4, "index": 30, "name": "Bo Kim", "age": 22, "gender": "female",
               "favoriteFruit": "strawberry",
               "company": { "title": "ENDIPIN", "phone": "+1 (996) 555-0103", "location": { "country": "Italy" } } },
    ]
}

fn authors() -> Vec<Document> {
    vec![
        doc! { "_id": 100, "name": "Leo Tolstoy", "birth_year": 1828 },
        doc! { "_id": 101, "name": "George Orwell", "birth_year": 1903 },
    ]
}

fn books() -> Vec<Document> {
    vec![
        doc! { "_id": 1, "title": "War and Peace", "author_id": 100, "genre": "Historical Fiction" },
        doc! { "_id": 2, "title": "Animal Farm", "author_id": 101, "genre": "Satire" },
        doc! { "_id": 3, "title": "Orphan", "author_id": 999, "genre": "Mystery" },
    ]
}

async fn seed(store: &MongoStore) {
    let db = store.database();
    db.drop().await.unwrap();
    for (name, docs) in [("users", users()), ("authors", authors()), ("books", books())] {
        db.collection::<Document>(name).insert_many(docs).await.unwrap();
    }
}

fn sorted_by_id(output: &QueryOutput) -> Vec<Document> {
    let mut docs = output.documents().to_vec();
    docs.sort_by_key(|d| d.get_i32("_id").unwrap_or_default());
    docs
}

#[tokio::test]
async fn test_catalogue_matches_in_memory_store() {
    let Some(url) = test_url() else { return };

    let store = MongoStore::connect(test_config(url, "catalogue")).await.unwrap();
    store.ping().await.unwrap();
    seed(&store).await;
    let database = store.database().clone();
    let mongo = QueryRunner::new(Arc::new(store));

    let memory_store = MemoryStore::new();
    memory_store.insert_many("users", users()).await;
    memory_store.insert_many("authors", authors()).await;
    memory_store.insert_many("books", books()).await;
    let memory = QueryRunner::new(Arc::new(memory_store));

    let catalog = Catalog::standard();
    let exact = [
        "active-user-count",
        "enim-tag-user-count",
        "second-tag-ad-count",
        "phone-prefix-940-count",
        "avg-age-overall",
        "avg-tags-unwind",
        "avg-tags-size",
        "top-country-by-users",
    ];
    for name in exact {
        let server = mongo.run_named(&catalog, name).await.unwrap().outcome.unwrap();
        let local = memory.run_named(&catalog, name).await.unwrap().outcome.unwrap();
        assert_eq!(server, local, "{name}");
    }

    // Server order is unspecified without a sort stage
    for query in catalog.queries() {
        if exact.contains(&query.name.as_str()) || query.collection.name() != "users" {
            continue;
        }
        if query.operation() != "find" {
            continue;
        }
        let server = mongo.run(query).await.outcome.unwrap();
        let local = memory.run(query).await.outcome.unwrap();
        assert_eq!(sorted_by_id(&server), sorted_by_id(&local), "{}", query.name);
    }

    let elem_at = mongo.run_named(&catalog, "books-with-author-elem-at").await.unwrap();
    let first = mongo.run_named(&catalog, "books-with-author-first").await.unwrap();
    assert_eq!(
        sorted_by_id(&elem_at.outcome.unwrap()),
        sorted_by_id(&first.outcome.unwrap())
    );

    let avg = mongo.run_named(&catalog, "avg-tags-size").await.unwrap();
    assert_eq!(
        avg.outcome.unwrap(),
        QueryOutput::Documents(vec![doc! { "_id": Bson::Null, "avgTags": 1.25 }])
    );

    database.drop().await.unwrap();
    mongo.store().close().await.unwrap();
}

#[tokio::test]
async fn test_empty_count_is_empty_on_server() {
    let Some(url) = test_url() else { return };

    MongoStore::with_connection(test_config(url, "empty"), |store| async move {
        let runner = QueryRunner::new(store);
        let report = runner
            .run_named(&Catalog::standard(), "enim-tag-user-count")
            .await
            .unwrap();
        assert_eq!(report.outcome, Ok(QueryOutput::Empty));
    })
    .await
    .unwrap();
}
