//! Document shapes of the `users`, `authors` and `books` collections
//!
//! These records are only materialized when loading fixtures into the
//! in-memory store; queries themselves work on raw BSON documents.

use chrono::{DateTime, Utc};
use mongodb::bson::{self, doc, Document};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Collections the catalogue reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Users,
    Authors,
    Books,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Users, Collection::Authors, Collection::Books];

    /// Collection name as stored on the server
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Authors => "authors",
            Collection::Books => "books",
        }
    }

    /// Fixture file holding this collection's documents
    pub fn fixture_file(&self) -> &'static str {
        match self {
            Collection::Users => "users.json",
            Collection::Authors => "authors.json",
            Collection::Books => "books.json",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Location {
    #[validate(length(min = 1))]
    pub country: String,
    #[validate(length(min = 1))]
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Company {
    #[validate(length(min = 1))]
    pub title: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub phone: String,
    #[validate(nested)]
    pub location: Location,
}

/// User record
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub index: i32,
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
    pub registered: DateTime<Utc>,
    #[validate(range(min = 0, max = 150))]
    pub age: i32,
    pub gender: Gender,
    #[validate(length(min = 1))]
    pub eye_color: String,
    #[validate(length(min = 1))]
    pub favorite_fruit: String,
    #[validate(nested)]
    pub company: Company,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl User {
    pub fn to_document(&self) -> Document {
        doc! {
            "index": self.index,
            "name": self.name.as_str(),
            "isActive": self.is_active,
            "registered": bson::DateTime::from_millis(self.registered.timestamp_millis()),
            "age": self.age,
            "gender": self.gender.as_str(),
            "eyeColor": self.eye_color.as_str(),
            "favoriteFruit": self.favorite_fruit.as_str(),
            "company": {
                "title": self.company.title.as_str(),
                "email": self.company.email.as_str(),
                "phone": self.company.phone.as_str(),
                "location": {
                    "country": self.company.location.country.as_str(),
                    "address": self.company.location.address.as_str(),
                },
            },
            "tags": self.tags.clone(),
        }
    }
}

/// Author record; `_id` is a plain integer
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Author {
    #[serde(rename = "_id")]
    pub id: i32,
    #[validate(length(min = 1))]
    pub name: String,
    pub birth_year: i32,
}

impl Author {
    pub fn to_document(&self) -> Document {
        doc! {
            "_id": self.id,
            "name": self.name.as_str(),
            "birth_year": self.birth_year,
        }
    }
}

/// Book record; `author_id` refers to `authors._id` without enforcement
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Book {
    #[serde(rename = "_id")]
    pub id: i32,
    #[validate(length(min = 1))]
    pub title: String,
    pub author_id: i32,
    #[validate(length(min = 1))]
    pub genre: String,
}

impl Book {
    pub fn to_document(&self) -> Document {
        doc! {
            "_id": self.id,
            "title": self.title.as_str(),
            "author_id": self.author_id,
            "genre": self.genre.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::Bson;

    fn user_json() -> serde_json::Value {
        serde_json::json!({
            "index": 0,
            "name": "Aurelia Gonzales",
            "registered": "2015-02-11T04:22:39Z",
            "age": 20,
            "gender": "female",
            "eyeColor": "green",
            "favoriteFruit": "banana",
            "company": {
                "title": "YURTURE",
                "email": "aureliagonzales@yurture.com",
                "phone": "+1 (940) 501-3963",
                "location": { "country": "USA", "address": "694 Hewes Street" }
            },
            "tags": ["enim", "id"]
        })
    }

    #[test]
    fn test_user_defaults_and_document_shape() {
        let user: User = serde_json::from_value(user_json()).unwrap();
        assert!(user.validate().is_ok());
        assert!(!user.is_active);

        let doc = user.to_document();
        assert_eq!(doc.get_bool("isActive").unwrap(), false);
        assert!(matches!(doc.get("registered"), Some(Bson::DateTime(_))));
        assert!(matches!(doc.get("age"), Some(Bson::Int32(20))));
        assert_eq!(
            doc.get_document("company")
                .unwrap()
                .get_document("location")
                .unwrap()
                .get_str("country")
                .unwrap(),
            "USA"
        );
    }

    #[test]
    fn test_user_missing_tags_defaults_to_empty() {
        let mut json = user_json();
        json.as_object_mut().unwrap().remove("tags");
        let user: User = serde_json::from_value(json).unwrap();
        assert!(user.tags.is_empty());
    }

    #[test]
    fn test_user_invalid_email_fails_validation() {
        let mut json = user_json();
        json["company"]["email"] = serde_json::json!("not-an-email");
        let user: User = serde_json::from_value(json).unwrap();
        assert!(user.validate().is_err());
    }

    #[test]
    fn test_user_unknown_gender_is_rejected() {
        let mut json = user_json();
        json["gender"] = serde_json::json!("unknown");
        assert!(serde_json::from_value::<User>(json).is_err());
    }

    #[test]
    fn test_book_and_author_documents() {
        let author: Author =
            serde_json::from_value(serde_json::json!({"_id": 100, "name": "Leo Tolstoy", "birth_year": 1828}))
                .unwrap();
        let book: Book = serde_json::from_value(
            serde_json::json!({"_id": 1, "title": "War and Peace", "author_id": 100, "genre": "Historical Fiction"}),
        )
        .unwrap();
        assert_eq!(author.to_document().get_i32("_id").unwrap(), 100);
        assert_eq!(book.to_document().get_i32("author_id").unwrap(), 100);
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(Collection::Users.name(), "users");
        assert_eq!(Collection::Books.fixture_file(), "books.json");
        assert_eq!(Collection::ALL.len(), 3);
    }
}
