//! Query catalogue
//!
//! The fixed table of named filter and pipeline queries. Every entry is
//! data; [`QueryRunner`](crate::runner::QueryRunner) executes them all the
//! same way.

use crate::models::Collection;
use mongodb::bson::{doc, Bson, Document, Regex};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation class a query belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Filter,
    Grouping,
    Arrays,
    Sort,
    Lookup,
    Comparison,
    Logical,
    Evaluation,
    Element,
    Array,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Filter => "filter",
            Category::Grouping => "grouping",
            Category::Arrays => "arrays",
            Category::Sort => "sort",
            Category::Lookup => "lookup",
            Category::Comparison => "comparison",
            Category::Logical => "logical",
            Category::Evaluation => "evaluation",
            Category::Element => "element",
            Category::Array => "array",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// What gets sent to the store
#[derive(Debug, Clone, PartialEq)]
pub enum QueryKind {
    Find { filter: Document },
    Aggregate { pipeline: Vec<Document> },
}

/// One named, parameterless query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDefinition {
    pub name: String,
    pub category: Category,
    pub description: String,
    pub collection: Collection,
    pub kind: QueryKind,
}

impl QueryDefinition {
    pub fn find(
        name: impl Into<String>,
        category: Category,
        description: impl Into<String>,
        collection: Collection,
        filter: Document,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            description: description.into(),
            collection,
            kind: QueryKind::Find { filter },
        }
    }

    pub fn aggregate(
        name: impl Into<String>,
        category: Category,
        description: impl Into<String>,
        collection: Collection,
        pipeline: Vec<Document>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            description: description.into(),
            collection,
            kind: QueryKind::Aggregate { pipeline },
        }
    }

    /// "find" or "aggregate"
    pub fn operation(&self) -> &'static str {
        match self.kind {
            QueryKind::Find { .. } => "find",
            QueryKind::Aggregate { .. } => "aggregate",
        }
    }
}

/// Ordered set of query definitions with unique names
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    queries: Vec<QueryDefinition>,
}

impl Catalog {
    pub fn new(queries: Vec<QueryDefinition>) -> Self {
        Self { queries }
    }

    /// The full built-in catalogue
    pub fn standard() -> Self {
        let mut queries = Vec::new();
        queries.extend(filter_queries());
        queries.extend(grouping_queries());
        queries.extend(array_metric_queries());
        queries.extend(sort_queries());
        queries.extend(lookup_queries());
        queries.extend(comparison_queries());
        queries.extend(logical_queries());
        queries.extend(predicate_queries());
        Self { queries }
    }

    pub fn get(&self, name: &str) -> Option<&QueryDefinition> {
        self.queries.iter().find(|q| q.name == name)
    }

    pub fn by_category(&self, category: Category) -> Vec<QueryDefinition> {
        self.queries
            .iter()
            .filter(|q| q.category == category)
            .cloned()
            .collect()
    }

    pub fn queries(&self) -> &[QueryDefinition] {
        &self.queries
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

fn users_pipeline(
    name: &str,
    category: Category,
    description: &str,
    pipeline: Vec<Document>,
) -> QueryDefinition {
    QueryDefinition::aggregate(name, category, description, Collection::Users, pipeline)
}

fn users_find(name: &str, category: Category, description: &str, filter: Document) -> QueryDefinition {
    QueryDefinition::find(name, category, description, Collection::Users, filter)
}

fn filter_queries() -> Vec<QueryDefinition> {
    vec![
        users_pipeline(
            "active-user-count",
            Category::Filter,
            "Number of active users",
            vec![doc! { "$match": { "isActive": true } }, doc! { "$count": "activeUsers" }],
        ),
        users_pipeline(
            "enim-tag-user-count",
            Category::Filter,
            "Number of users tagged 'enim'",
            vec![
                doc! { "$match": { "tags": "enim" } },
                doc! { "$count": "noOfUsersWithEnimTag" },
            ],
        ),
        users_pipeline(
            "inactive-velit-users",
            Category::Filter,
            "Name and age of inactive users tagged 'velit'",
            vec![
                doc! { "$match": { "isActive": false, "tags": "velit" } },
                doc! { "$project": { "name": 1, "age": 1 } },
            ],
        ),
        users_pipeline(
            "second-tag-ad-count",
            Category::Filter,
            "Number of users whose second tag is 'ad'",
            vec![
                doc! { "$match": { "tags.1": "ad" } },
                doc! { "$count": "secondTagHasAD" },
            ],
        ),
        users_pipeline(
            "users-tagged-enim-and-id",
            Category::Filter,
            "Users tagged with both 'enim' and 'id'",
            vec![doc! { "$match": { "tags": { "$all": ["enim", "id"] } } }],
        ),
    ]
}

fn grouping_queries() -> Vec<QueryDefinition> {
    let phone_prefix = Bson::RegularExpression(Regex {
        pattern: r"^\+1 \(940\)".to_string(),
        options: String::new(),
    });

    vec![
        users_pipeline(
            "avg-age-by-gender",
            Category::Grouping,
            "Average age per gender",
            vec![doc! { "$group": { "_id": "$gender", "avgAge": { "$avg": "$age" } } }],
        ),
        users_pipeline(
            "avg-age-overall",
            Category::Grouping,
            "Average age of all users",
            vec![doc! { "$group": { "_id": Bson::Null, "avgAge": { "$avg": "$age" } } }],
        ),
        users_pipeline(
            "top-five-favorite-fruits",
            Category::Grouping,
            "Five most common favourite fruits",
            vec![
                doc! { "$group": { "_id": "$favoriteFruit", "count": { "$sum": 1 } } },
                doc! { "$sort": { "count": -1 } },
                doc! { "$limit": 5 },
            ],
        ),
        users_pipeline(
            "user-count-by-gender",
            Category::Grouping,
            "Number of users per gender",
            vec![doc! { "$group": { "_id": "$gender", "totalUsers": { "$sum": 1 } } }],
        ),
        users_pipeline(
            "phone-prefix-940-count",
            Category::Grouping,
            "Number of users whose company phone starts with +1 (940)",
            vec![
                doc! { "$match": { "company.phone": phone_prefix } },
                doc! { "$count": "matchedPhoneNumber" },
            ],
        ),
        users_pipeline(
            "top-country-by-users",
            Category::Grouping,
            "Country with the most users",
            vec![
                doc! { "$group": { "_id": "$company.location.country", "noOfUsers": { "$sum": 1 } } },
                doc! { "$sort": { "noOfUsers": -1 } },
                doc! { "$limit": 1 },
            ],
        ),
        users_pipeline(
            "usa-company-headcount",
            Category::Grouping,
            "Users per company among companies located in the USA",
            vec![
                doc! { "$match": { "company.location.country": "USA" } },
                doc! { "$group": { "_id": "$company.title", "userCount": { "$sum": 1 } } },
            ],
        ),
    ]
}

fn array_metric_queries() -> Vec<QueryDefinition> {
    vec![
        // Empty and absent arrays survive the unwind and count as zero.
        users_pipeline(
            "avg-tags-unwind",
            Category::Arrays,
            "Average number of tags per user, counted by unwinding",
            vec![
                doc! { "$unwind": { "path": "$tags", "preserveNullAndEmptyArrays": true } },
                doc! {
                    "$group": {
                        "_id": "$_id",
                        "numberOfTags": {
                            "$sum": { "$cond": [{ "$ifNull": ["$tags", false] }, 1, 0] }
                        },
                    }
                },
                doc! { "$group": { "_id": Bson::Null, "avgTags": { "$avg": "$numberOfTags" } } },
            ],
        ),
        users_pipeline(
            "avg-tags-size",
            Category::Arrays,
            "Average number of tags per user, measured with $size",
            vec![
                doc! {
                    "$addFields": {
                        "numberOfTags": { "$size": { "$ifNull": ["$tags", []] } }
                    }
                },
                doc! { "$group": { "_id": Bson::Null, "avgTags": { "$avg": "$numberOfTags" } } },
            ],
        ),
    ]
}

fn sort_queries() -> Vec<QueryDefinition> {
    vec![
        users_pipeline(
            "latest-registered-users",
            Category::Sort,
            "Five most recently registered users",
            vec![
                doc! { "$sort": { "registered": -1 } },
                doc! { "$limit": 5 },
                doc! { "$project": { "name": 1, "age": 1, "registered": 1 } },
            ],
        ),
        users_pipeline(
            "users-by-favorite-fruit",
            Category::Sort,
            "User names grouped by favourite fruit, sorted alphabetically",
            vec![
                doc! { "$group": { "_id": "$favoriteFruit", "users": { "$push": "$name" } } },
                doc! {
                    "$project": {
                        "_id": 1,
                        "users": { "$sortArray": { "input": "$users", "sortBy": 1 } },
                    }
                },
            ],
        ),
    ]
}

fn author_lookup() -> Document {
    doc! {
        "$lookup": {
            "from": "authors",
            "localField": "author_id",
            "foreignField": "_id",
            "as": "author_details",
        }
    }
}

fn lookup_queries() -> Vec<QueryDefinition> {
    vec![
        QueryDefinition::aggregate(
            "books-with-author-elem-at",
            Category::Lookup,
            "Books with their author, collapsed with $arrayElemAt",
            Collection::Books,
            vec![
                author_lookup(),
                doc! {
                    "$addFields": {
                        "author_details": { "$arrayElemAt": ["$author_details", 0] }
                    }
                },
            ],
        ),
        QueryDefinition::aggregate(
            "books-with-author-first",
            Category::Lookup,
            "Books with their author, collapsed with $first",
            Collection::Books,
            vec![
                author_lookup(),
                doc! { "$addFields": { "author_details": { "$first": "$author_details" } } },
            ],
        ),
    ]
}

fn comparison_queries() -> Vec<QueryDefinition> {
    let c = Category::Comparison;
    vec![
        users_find("age-eq-21", c, "Users aged exactly 21", doc! { "age": { "$eq": 21 } }),
        users_find("age-ne-18", c, "Users not aged 18", doc! { "age": { "$ne": 18 } }),
        users_find("age-gt-30", c, "Users older than 30", doc! { "age": { "$gt": 30 } }),
        users_find("age-gte-40", c, "Users aged 40 or more", doc! { "age": { "$gte": 40 } }),
        users_find("age-lt-21", c, "Users younger than 21", doc! { "age": { "$lt": 21 } }),
        users_find("age-lte-20", c, "Users aged 20 or less", doc! { "age": { "$lte": 20 } }),
        users_find(
            "age-in-20-22",
            c,
            "Users aged 20, 21 or 22",
            doc! { "age": { "$in": [20, 21, 22] } },
        ),
        users_find(
            "age-nin-20-22",
            c,
            "Users not aged 20, 21 or 22",
            doc! { "age": { "$nin": [20, 21, 22] } },
        ),
    ]
}

fn logical_queries() -> Vec<QueryDefinition> {
    let c = Category::Logical;
    vec![
        users_find(
            "older-than-20-and-female",
            c,
            "Female users older than 20",
            doc! { "$and": [{ "age": { "$gt": 20 } }, { "gender": "female" }] },
        ),
        users_find(
            "younger-than-21-or-female",
            c,
            "Users younger than 21 or female",
            doc! { "$or": [{ "age": { "$lt": 21 } }, { "gender": "female" }] },
        ),
        users_find(
            "not-older-than-22",
            c,
            "Users whose age is not greater than 22",
            doc! { "age": { "$not": { "$gt": 22 } } },
        ),
        users_find(
            "neither-under-18-nor-female",
            c,
            "Users that are neither under 18 nor female",
            doc! { "$nor": [{ "age": { "$lt": 18 } }, { "gender": "female" }] },
        ),
    ]
}

fn predicate_queries() -> Vec<QueryDefinition> {
    vec![
        users_find(
            "name-starts-with-j",
            Category::Evaluation,
            "Users whose name starts with J, ignoring case",
            doc! { "name": { "$regex": "^J", "$options": "i" } },
        ),
        users_find(
            "index-greater-than-age",
            Category::Evaluation,
            "Users whose index is greater than their age",
            doc! { "$expr": { "$gt": ["$index", "$age"] } },
        ),
        users_find(
            "even-age",
            Category::Evaluation,
            "Users with an even age",
            doc! { "age": { "$mod": [2, 0] } },
        ),
        users_find(
            "has-company",
            Category::Element,
            "Users with a company field",
            doc! { "company": { "$exists": true } },
        ),
        users_find(
            "age-is-int",
            Category::Element,
            "Users whose age is stored as a 32-bit integer",
            doc! { "age": { "$type": "int" } },
        ),
        users_find(
            "tags-all-in-adipisicing",
            Category::Array,
            "Users tagged with both 'in' and 'adipisicing'",
            doc! { "tags": { "$all": ["in", "adipisicing"] } },
        ),
    ]
}
