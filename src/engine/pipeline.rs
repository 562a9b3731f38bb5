//! Aggregation pipeline execution

use super::{compare, expr, filter, path, Collections};
use crate::error::StoreError;
use mongodb::bson::{doc, Bson, Document};
use std::cmp::Ordering;

/// Runs `pipeline` over `input`, stage by stage.
///
/// `collections` is consulted by `$lookup`; a collection that does not
/// exist behaves as an empty one.
pub fn execute(
    input: Vec<Document>,
    pipeline: &[Document],
    collections: &Collections,
) -> Result<Vec<Document>, StoreError> {
    let mut docs = input;
    for stage in pipeline {
        docs = apply_stage(docs, stage, collections)?;
    }
    Ok(docs)
}

fn apply_stage(
    docs: Vec<Document>,
    stage: &Document,
    collections: &Collections,
) -> Result<Vec<Document>, StoreError> {
    let mut entries = stage.iter();
    let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
        return Err(StoreError::invalid(
            "a pipeline stage specification object must contain exactly one field",
        ));
    };

    match name.as_str() {
        "$match" => {
            let query = document_spec(name, spec)?;
            let mut out = Vec::with_capacity(docs.len());
            for doc in docs {
                if filter::matches(&doc, query)? {
                    out.push(doc);
                }
            }
            Ok(out)
        }
        "$group" => group(docs, document_spec(name, spec)?),
        "$sort" => {
            let keys = expr::sort_keys(document_spec(name, spec)?)?;
            let mut docs = docs;
            docs.sort_by(|a, b| expr::compare_by_keys(a, b, &keys));
            Ok(docs)
        }
        "$limit" => {
            let limit = positive(name, spec)?;
            let mut docs = docs;
            docs.truncate(limit);
            Ok(docs)
        }
        "$skip" => {
            let skip = match compare::as_i64(spec) {
                Some(n) if n >= 0 => n as usize,
                _ => return Err(StoreError::invalid("$skip must be a non-negative integer")),
            };
            Ok(docs.into_iter().skip(skip).collect())
        }
        "$project" => project(docs, document_spec(name, spec)?),
        "$addFields" | "$set" => add_fields(docs, document_spec(name, spec)?),
        "$unwind" => unwind(docs, spec),
        "$lookup" => lookup(docs, document_spec(name, spec)?, collections),
        "$count" => count(docs, spec),
        other => Err(StoreError::Unsupported(format!(
            "pipeline stage {other} is not implemented by the in-memory store"
        ))),
    }
}

fn document_spec<'a>(stage: &str, spec: &'a Bson) -> Result<&'a Document, StoreError> {
    match spec {
        Bson::Document(d) => Ok(d),
        _ => Err(StoreError::invalid(format!(
            "the {stage} stage specification must be an object"
        ))),
    }
}

fn positive(stage: &str, spec: &Bson) -> Result<usize, StoreError> {
    match compare::as_i64(spec) {
        Some(n) if n > 0 => Ok(n as usize),
        _ => Err(StoreError::invalid(format!(
            "the {stage} must be positive"
        ))),
    }
}

/// Running state of one `$group` accumulator
enum Accumulator {
    Sum { int: i64, float: f64, is_float: bool },
    Avg { total: f64, count: u64 },
    Push(Vec<Bson>),
    First(Option<Bson>),
    Last(Option<Bson>),
    Min(Option<Bson>),
    Max(Option<Bson>),
}

impl Accumulator {
    fn new(op: &str) -> Result<Self, StoreError> {
        Ok(match op {
            "$sum" => Accumulator::Sum {
                int: 0,
                float: 0.0,
                is_float: false,
            },
            "$avg" => Accumulator::Avg {
                total: 0.0,
                count: 0,
            },
            "$push" => Accumulator::Push(Vec::new()),
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(None),
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            other => {
                return Err(StoreError::Unsupported(format!(
                    "accumulator {other} is not implemented by the in-memory store"
                )))
            }
        })
    }

    fn add(&mut self, value: Bson) {
        match self {
            Accumulator::Sum {
                int,
                float,
                is_float,
            } => match value {
                Bson::Int32(n) => add_int(int, float, is_float, i64::from(n)),
                Bson::Int64(n) => add_int(int, float, is_float, n),
                Bson::Double(n) => {
                    if !*is_float {
                        *float = *int as f64;
                        *is_float = true;
                    }
                    *float += n;
                }
                _ => {}
            },
            Accumulator::Avg { total, count } => {
                if let Some(n) = compare::as_f64(&value) {
                    *total += n;
                    *count += 1;
                }
            }
            Accumulator::Push(values) => {
                if !expr::is_missing(&value) {
                    values.push(value);
                }
            }
            Accumulator::First(slot) => {
                if slot.is_none() {
                    *slot = Some(value);
                }
            }
            Accumulator::Last(slot) => *slot = Some(value),
            Accumulator::Min(slot) => keep_extreme(slot, value, Ordering::Less),
            Accumulator::Max(slot) => keep_extreme(slot, value, Ordering::Greater),
        }
    }

    fn finish(self) -> Bson {
        match self {
            Accumulator::Sum {
                int,
                float,
                is_float,
            } => {
                if is_float {
                    Bson::Double(float)
                } else if let Ok(small) = i32::try_from(int) {
                    Bson::Int32(small)
                } else {
                    Bson::Int64(int)
                }
            }
            Accumulator::Avg { total, count } => {
                if count == 0 {
                    Bson::Null
                } else {
                    Bson::Double(total / count as f64)
                }
            }
            Accumulator::Push(values) => Bson::Array(values),
            Accumulator::First(slot)
            | Accumulator::Last(slot)
            | Accumulator::Min(slot)
            | Accumulator::Max(slot) => match slot {
                Some(v) if !expr::is_missing(&v) => v,
                _ => Bson::Null,
            },
        }
    }
}

/// `$min` / `$max` ignore null and missing values.
fn keep_extreme(slot: &mut Option<Bson>, value: Bson, want: Ordering) {
    if matches!(value, Bson::Null | Bson::Undefined) {
        return;
    }
    let replace = slot
        .as_ref()
        .map_or(true, |current| compare::total_cmp(&value, current) == want);
    if replace {
        *slot = Some(value);
    }
}

fn add_int(int: &mut i64, float: &mut f64, is_float: &mut bool, n: i64) {
    if *is_float {
        *float += n as f64;
        return;
    }
    match int.checked_add(n) {
        Some(sum) => *int = sum,
        None => {
            *float = *int as f64 + n as f64;
            *is_float = true;
        }
    }
}

struct Group {
    key: Bson,
    accumulators: Vec<Accumulator>,
}

fn group(docs: Vec<Document>, spec: &Document) -> Result<Vec<Document>, StoreError> {
    let Some(key_expr) = spec.get("_id") else {
        return Err(StoreError::invalid(
            "a group specification must include an _id",
        ));
    };

    let mut fields = Vec::new();
    for (field, accumulator) in spec.iter().filter(|(k, _)| k.as_str() != "_id") {
        let Bson::Document(acc) = accumulator else {
            return Err(StoreError::invalid(format!(
                "the field '{field}' must be an accumulator object"
            )));
        };
        let mut entries = acc.iter();
        let (Some((op, operand)), None) = (entries.next(), entries.next()) else {
            return Err(StoreError::invalid(format!(
                "the field '{field}' must specify one accumulator"
            )));
        };
        // validate the operator up front so an empty input still reports it
        Accumulator::new(op)?;
        fields.push((field.clone(), op.clone(), operand.clone()));
    }

    let mut groups: Vec<Group> = Vec::new();
    for doc in &docs {
        let mut key = expr::evaluate(key_expr, doc)?;
        if expr::is_missing(&key) {
            key = Bson::Null;
        }
        let position = match groups
            .iter()
            .position(|g| compare::values_equal(&g.key, &key))
        {
            Some(index) => index,
            None => {
                let accumulators = fields
                    .iter()
                    .map(|(_, op, _)| Accumulator::new(op))
                    .collect::<Result<Vec<_>, _>>()?;
                groups.push(Group { key, accumulators });
                groups.len() - 1
            }
        };
        let group = &mut groups[position];
        for ((_, _, operand), accumulator) in fields.iter().zip(group.accumulators.iter_mut()) {
            accumulator.add(expr::evaluate(operand, doc)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|g| {
            let mut out = doc! { "_id": g.key };
            for ((field, _, _), accumulator) in fields.iter().zip(g.accumulators) {
                out.insert(field.clone(), accumulator.finish());
            }
            out
        })
        .collect())
}

/// Boolean-or-number inclusion flag; `None` means a computed field.
fn projection_flag(value: &Bson) -> Option<bool> {
    match value {
        Bson::Boolean(b) => Some(*b),
        other => compare::as_f64(other).map(|n| n != 0.0),
    }
}

fn project(docs: Vec<Document>, spec: &Document) -> Result<Vec<Document>, StoreError> {
    if spec.is_empty() {
        return Err(StoreError::invalid(
            "$project requires at least one output field",
        ));
    }

    let mut include_id = true;
    let mut computed_id = None;
    let mut inclusions = Vec::new();
    let mut exclusions = Vec::new();
    let mut computed = Vec::new();
    for (field, value) in spec {
        match (field.as_str(), projection_flag(value)) {
            ("_id", Some(flag)) => include_id = flag,
            ("_id", None) => computed_id = Some(value),
            (_, Some(true)) => inclusions.push(field.as_str()),
            (_, Some(false)) => exclusions.push(field.as_str()),
            (_, None) => computed.push((field.as_str(), value)),
        }
    }

    let inclusion_mode = !inclusions.is_empty() || !computed.is_empty() || computed_id.is_some();
    if inclusion_mode && !exclusions.is_empty() {
        return Err(StoreError::invalid(
            "cannot do exclusion on a field in inclusion projection",
        ));
    }

    docs.into_iter()
        .map(|doc| {
            if !inclusion_mode {
                let mut out = doc;
                for field in &exclusions {
                    path::remove(&mut out, field);
                }
                if !include_id {
                    out.remove("_id");
                }
                return Ok(out);
            }

            let mut out = Document::new();
            if let Some(id_expr) = computed_id {
                let value = expr::evaluate(id_expr, &doc)?;
                if !expr::is_missing(&value) {
                    out.insert("_id", value);
                }
            } else if include_id {
                if let Some(id) = doc.get("_id") {
                    out.insert("_id", id.clone());
                }
            }
            for field in &inclusions {
                if let Some(value) = path::lookup(&doc, field) {
                    path::set(&mut out, field, value);
                }
            }
            for (field, value_expr) in &computed {
                let value = expr::evaluate(value_expr, &doc)?;
                if !expr::is_missing(&value) {
                    path::set(&mut out, field, value);
                }
            }
            Ok(out)
        })
        .collect()
}

fn add_fields(docs: Vec<Document>, spec: &Document) -> Result<Vec<Document>, StoreError> {
    docs.into_iter()
        .map(|doc| {
            // every expression sees the input document, not earlier additions
            let mut values = Vec::with_capacity(spec.len());
            for (field, value_expr) in spec {
                values.push((field, expr::evaluate(value_expr, &doc)?));
            }
            let mut out = doc;
            for (field, value) in values {
                if expr::is_missing(&value) {
                    path::remove(&mut out, field);
                } else {
                    path::set(&mut out, field, value);
                }
            }
            Ok(out)
        })
        .collect()
}

fn unwind(docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>, StoreError> {
    let (field_path, preserve, index_field) = match spec {
        Bson::String(p) => (p.as_str(), false, None),
        Bson::Document(options) => {
            let Some(Bson::String(p)) = options.get("path") else {
                return Err(StoreError::invalid("no path specified to $unwind stage"));
            };
            let preserve = options
                .get("preserveNullAndEmptyArrays")
                .map(expr::truthy)
                .unwrap_or(false);
            let index_field = match options.get("includeArrayIndex") {
                Some(Bson::String(name)) => Some(name.as_str()),
                Some(_) => {
                    return Err(StoreError::invalid(
                        "includeArrayIndex must be a string",
                    ))
                }
                None => None,
            };
            (p.as_str(), preserve, index_field)
        }
        _ => {
            return Err(StoreError::invalid(
                "expected either a string or an object as specification for $unwind stage",
            ))
        }
    };
    let Some(field) = field_path.strip_prefix('$') else {
        return Err(StoreError::invalid(
            "path option to $unwind stage should be prefixed with a '$'",
        ));
    };

    let mut out = Vec::new();
    for doc in docs {
        match path::lookup(&doc, field) {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for (index, item) in items.into_iter().enumerate() {
                    let mut copy = doc.clone();
                    path::set(&mut copy, field, item);
                    if let Some(name) = index_field {
                        path::set(&mut copy, name, Bson::Int64(index as i64));
                    }
                    out.push(copy);
                }
            }
            Some(Bson::Array(_)) => {
                if preserve {
                    let mut copy = doc;
                    path::remove(&mut copy, field);
                    if let Some(name) = index_field {
                        path::set(&mut copy, name, Bson::Null);
                    }
                    out.push(copy);
                }
            }
            None | Some(Bson::Null) => {
                if preserve {
                    let mut copy = doc;
                    if let Some(name) = index_field {
                        path::set(&mut copy, name, Bson::Null);
                    }
                    out.push(copy);
                }
            }
            Some(_) => {
                let mut copy = doc;
                if let Some(name) = index_field {
                    path::set(&mut copy, name, Bson::Null);
                }
                out.push(copy);
            }
        }
    }
    Ok(out)
}

fn lookup(
    docs: Vec<Document>,
    spec: &Document,
    collections: &Collections,
) -> Result<Vec<Document>, StoreError> {
    if spec.contains_key("pipeline") {
        return Err(StoreError::Unsupported(
            "$lookup with a sub-pipeline is not implemented by the in-memory store".to_string(),
        ));
    }
    let field = |name: &str| -> Result<&str, StoreError> {
        match spec.get(name) {
            Some(Bson::String(value)) => Ok(value.as_str()),
            _ => Err(StoreError::invalid(format!(
                "$lookup requires a string '{name}'"
            ))),
        }
    };
    let from = field("from")?;
    let local_field = field("localField")?;
    let foreign_field = field("foreignField")?;
    let as_field = field("as")?;

    let foreign = collections.get(from).map(Vec::as_slice).unwrap_or(&[]);

    Ok(docs
        .into_iter()
        .map(|mut doc| {
            let keys = match path::lookup(&doc, local_field) {
                Some(Bson::Array(items)) => items,
                Some(value) => vec![value],
                None => vec![Bson::Null],
            };
            let joined: Vec<Bson> = foreign
                .iter()
                .filter(|candidate| {
                    let value = path::lookup(candidate, foreign_field);
                    keys.iter().any(|key| filter::equals(value.as_ref(), key))
                })
                .map(|candidate| Bson::Document(candidate.clone()))
                .collect();
            path::set(&mut doc, as_field, Bson::Array(joined));
            doc
        })
        .collect())
}

fn count(docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>, StoreError> {
    let Bson::String(name) = spec else {
        return Err(StoreError::invalid("the count field must be a non-empty string"));
    };
    if name.is_empty() || name.starts_with('$') || name.contains('.') {
        return Err(StoreError::invalid(format!(
            "invalid $count field name: '{name}'"
        )));
    }
    // the server emits nothing at all for an empty input
    if docs.is_empty() {
        return Ok(Vec::new());
    }
    let total = i32::try_from(docs.len()).unwrap_or(i32::MAX);
    let mut out = Document::new();
    out.insert(name.clone(), total);
    Ok(vec![out])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn users() -> Vec<Document> {
        vec![
            doc! { "_id": 1, "name": "Ann", "gender": "female", "age": 30, "fruit": "apple", "tags": ["a", "b"] },
            doc! { "_id": 2, "name": "Bob", "gender": "male", "age": 20, "fruit": "banana", "tags": [] },
            doc! { "_id": 3, "name": "Cid", "gender": "male", "age": 40, "fruit": "apple" },
            doc! { "_id": 4, "name": "Dee", "gender": "female", "age": 22, "fruit": "apple", "tags": ["c"] },
        ]
    }

    fn run(pipeline: Vec<Document>) -> Vec<Document> {
        execute(users(), &pipeline, &HashMap::new()).unwrap()
    }

    #[test]
    fn test_match_and_count() {
        let out = run(vec![doc! { "$match": { "gender": "male" } }, doc! { "$count": "men" }]);
        assert_eq!(out, vec![doc! { "men": 2 }]);
    }

    #[test]
    fn test_count_of_nothing_emits_nothing() {
        let out = run(vec![doc! { "$match": { "gender": "other" } }, doc! { "$count": "n" }]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_group_average_and_sum() {
        let out = run(vec![doc! {
            "$group": { "_id": "$gender", "avgAge": { "$avg": "$age" }, "total": { "$sum": 1 } }
        }]);
        assert_eq!(
            out,
            vec![
                doc! { "_id": "female", "avgAge": 26.0, "total": 2 },
                doc! { "_id": "male", "avgAge": 30.0, "total": 2 },
            ]
        );
    }

    #[test]
    fn test_group_null_key_is_global() {
        let out = run(vec![doc! { "$group": { "_id": null, "avgAge": { "$avg": "$age" } } }]);
        assert_eq!(out, vec![doc! { "_id": null, "avgAge": 28.0 }]);
    }

    #[test]
    fn test_group_push_min_max() {
        let out = run(vec![doc! {
            "$group": {
                "_id": "$fruit",
                "names": { "$push": "$name" },
                "youngest": { "$min": "$age" },
                "oldest": { "$max": "$age" },
            }
        }]);
        assert_eq!(out[0].get_array("names").unwrap().len(), 3);
        assert_eq!(out[0].get_i32("youngest").unwrap(), 22);
        assert_eq!(out[0].get_i32("oldest").unwrap(), 40);
    }

    #[test]
    fn test_sort_limit_project() {
        let out = run(vec![
            doc! { "$sort": { "age": -1 } },
            doc! { "$limit": 2 },
            doc! { "$project": { "name": 1, "age": 1 } },
        ]);
        assert_eq!(
            out,
            vec![
                doc! { "_id": 3, "name": "Cid", "age": 40 },
                doc! { "_id": 1, "name": "Ann", "age": 30 },
            ]
        );
    }

    #[test]
    fn test_sort_is_stable() {
        let out = run(vec![doc! { "$sort": { "fruit": 1 } }]);
        let ids: Vec<i32> = out.iter().map(|d| d.get_i32("_id").unwrap()).collect();
        assert_eq!(ids, vec![1, 3, 4, 2]);
    }

    #[test]
    fn test_project_exclusion_and_mixing() {
        let out = run(vec![doc! { "$project": { "tags": 0, "_id": 0 } }]);
        assert!(out.iter().all(|d| !d.contains_key("tags") && !d.contains_key("_id")));

        let err = execute(
            users(),
            &[doc! { "$project": { "tags": 0, "name": 1 } }],
            &HashMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }

    #[test]
    fn test_unwind_drops_or_preserves_empty() {
        let dropped = run(vec![doc! { "$unwind": "$tags" }]);
        assert_eq!(dropped.len(), 3);

        let preserved = run(vec![doc! {
            "$unwind": { "path": "$tags", "preserveNullAndEmptyArrays": true }
        }]);
        assert_eq!(preserved.len(), 5);
        assert!(!preserved[2].contains_key("tags"));
    }

    #[test]
    fn test_add_fields_uses_input_document() {
        let out = run(vec![doc! {
            "$addFields": { "age": 0, "copy": "$age" }
        }]);
        assert_eq!(out[0].get_i32("age").unwrap(), 0);
        assert_eq!(out[0].get_i32("copy").unwrap(), 30);
    }

    #[test]
    fn test_lookup_joins_foreign_collection() {
        let mut collections = HashMap::new();
        collections.insert(
            "authors".to_string(),
            vec![doc! { "_id": 100, "name": "Tolstoy" }, doc! { "_id": 101, "name": "Austen" }],
        );
        let books = vec![
            doc! { "_id": 1, "title": "War and Peace", "author_id": 100 },
            doc! { "_id": 2, "title": "Orphan", "author_id": 999 },
        ];
        let out = execute(
            books,
            &[doc! {
                "$lookup": { "from": "authors", "localField": "author_id", "foreignField": "_id", "as": "author" }
            }],
            &collections,
        )
        .unwrap();
        assert_eq!(out[0].get_array("author").unwrap().len(), 1);
        assert!(out[1].get_array("author").unwrap().is_empty());
    }

    #[test]
    fn test_stage_with_two_fields_is_invalid() {
        let err = execute(
            users(),
            &[doc! { "$limit": 1, "$skip": 1 }],
            &HashMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }

    #[test]
    fn test_unknown_stage_is_unsupported() {
        let err = execute(users(), &[doc! { "$facet": {} }], &HashMap::new()).unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
    }
}
