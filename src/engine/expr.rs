//! Aggregation expression evaluation
//!
//! A path that resolves to nothing evaluates to [`MISSING`] (`Bson::Undefined`),
//! which stages drop instead of writing, so that "absent" stays distinct
//! from an explicit null.

use super::{compare, path};
use crate::error::StoreError;
use mongodb::bson::{Bson, Document};
use std::cmp::Ordering;

/// Value of an expression that resolved to nothing
pub const MISSING: Bson = Bson::Undefined;

pub fn is_missing(value: &Bson) -> bool {
    matches!(value, Bson::Undefined)
}

fn is_nullish(value: &Bson) -> bool {
    matches!(value, Bson::Undefined | Bson::Null)
}

/// Truthiness: false, null, missing and numeric zero are false
pub fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => compare::as_f64(other).map_or(true, |n| n != 0.0),
    }
}

/// Evaluates an expression against `doc`.
pub fn evaluate(expr: &Bson, doc: &Document) -> Result<Bson, StoreError> {
    match expr {
        Bson::String(s) if s.starts_with("$$") => variable(s, doc),
        Bson::String(s) if s.starts_with('$') => {
            Ok(path::lookup(doc, &s[1..]).unwrap_or(MISSING))
        }
        Bson::Document(spec) => {
            let mut keys = spec.keys();
            match keys.next() {
                Some(op) if op.starts_with('$') => {
                    if spec.len() != 1 {
                        return Err(StoreError::invalid(format!(
                            "an expression specification must contain exactly one field, found {}",
                            spec.len()
                        )));
                    }
                    let args = spec.get(op).unwrap_or(&Bson::Null);
                    operator(op, args, doc)
                }
                _ => {
                    let mut out = Document::new();
                    for (field, value) in spec {
                        let evaluated = evaluate(value, doc)?;
                        if !is_missing(&evaluated) {
                            out.insert(field.clone(), evaluated);
                        }
                    }
                    Ok(Bson::Document(out))
                }
            }
        }
        Bson::Array(items) => Ok(Bson::Array(
            items
                .iter()
                .map(|item| evaluate(item, doc))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        literal => Ok(literal.clone()),
    }
}

fn variable(name: &str, doc: &Document) -> Result<Bson, StoreError> {
    let (var, rest) = match name[2..].split_once('.') {
        Some((var, rest)) => (var, Some(rest)),
        None => (&name[2..], None),
    };
    match var {
        "ROOT" | "CURRENT" => Ok(match rest {
            Some(p) => path::lookup(doc, p).unwrap_or(MISSING),
            None => Bson::Document(doc.clone()),
        }),
        "REMOVE" => Ok(MISSING),
        _ => Err(StoreError::invalid(format!("use of undefined variable: {var}"))),
    }
}

fn arguments<'a>(args: &'a Bson) -> Vec<&'a Bson> {
    match args {
        Bson::Array(items) => items.iter().collect(),
        single => vec![single],
    }
}

fn exactly<'a>(op: &str, args: &'a Bson, n: usize) -> Result<Vec<&'a Bson>, StoreError> {
    let list = arguments(args);
    if list.len() != n {
        return Err(StoreError::invalid(format!(
            "expression {op} takes exactly {n} arguments, {} were passed in",
            list.len()
        )));
    }
    Ok(list)
}

fn single<'a>(op: &str, args: &'a Bson) -> Result<&'a Bson, StoreError> {
    Ok(exactly(op, args, 1)?[0])
}

fn type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Undefined => "missing",
        Bson::Null => "null",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) => "date",
        Bson::ObjectId(_) => "objectId",
        _ => "other",
    }
}

fn operator(op: &str, args: &Bson, doc: &Document) -> Result<Bson, StoreError> {
    match op {
        "$literal" => Ok(args.clone()),
        "$size" => {
            let arg = single(op, args)?;
            match evaluate(arg, doc)? {
                Bson::Array(items) => Ok(Bson::Int32(items.len() as i32)),
                other => Err(StoreError::invalid(format!(
                    "the argument to $size must be an array, but was of type: {}",
                    type_name(&other)
                ))),
            }
        }
        "$ifNull" => {
            let list = arguments(args);
            let (Some((last, candidates)), true) = (list.split_last(), list.len() >= 2) else {
                return Err(StoreError::invalid("$ifNull needs at least two arguments"));
            };
            for candidate in candidates {
                let value = evaluate(candidate, doc)?;
                if !is_nullish(&value) {
                    return Ok(value);
                }
            }
            evaluate(last, doc)
        }
        "$arrayElemAt" => {
            let list = exactly(op, args, 2)?;
            let array = evaluate(list[0], doc)?;
            let index = evaluate(list[1], doc)?;
            if is_nullish(&array) || is_nullish(&index) {
                return Ok(Bson::Null);
            }
            let Bson::Array(items) = array else {
                return Err(StoreError::invalid(format!(
                    "$arrayElemAt's first argument must be an array, but is {}",
                    type_name(&array)
                )));
            };
            let Some(index) = compare::as_i64(&index) else {
                return Err(StoreError::invalid(
                    "$arrayElemAt's second argument must be a numeric value representable as a 32-bit integral value",
                ));
            };
            let position = if index < 0 {
                items.len() as i64 + index
            } else {
                index
            };
            if position < 0 {
                return Ok(MISSING);
            }
            Ok(items.get(position as usize).cloned().unwrap_or(MISSING))
        }
        "$first" | "$last" => {
            let arg = single(op, args)?;
            match evaluate(arg, doc)? {
                Bson::Array(items) => {
                    let picked = if op == "$first" {
                        items.first()
                    } else {
                        items.last()
                    };
                    Ok(picked.cloned().unwrap_or(MISSING))
                }
                value if is_nullish(&value) => Ok(Bson::Null),
                other => Err(StoreError::invalid(format!(
                    "{op}'s argument must be an array, but is {}",
                    type_name(&other)
                ))),
            }
        }
        "$cond" => {
            let (condition, then, otherwise) = match args {
                Bson::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
                Bson::Document(spec) => match (spec.get("if"), spec.get("then"), spec.get("else")) {
                    (Some(c), Some(t), Some(e)) => (c, t, e),
                    _ => return Err(StoreError::invalid("missing 'if', 'then' or 'else' in $cond")),
                },
                _ => return Err(StoreError::invalid("$cond takes exactly 3 arguments")),
            };
            if truthy(&evaluate(condition, doc)?) {
                evaluate(then, doc)
            } else {
                evaluate(otherwise, doc)
            }
        }
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" | "$cmp" => {
            let list = exactly(op, args, 2)?;
            let left = evaluate(list[0], doc)?;
            let right = evaluate(list[1], doc)?;
            let ordering = compare::total_cmp(&left, &right);
            Ok(match op {
                "$eq" => Bson::Boolean(ordering == Ordering::Equal),
                "$ne" => Bson::Boolean(ordering != Ordering::Equal),
                "$gt" => Bson::Boolean(ordering == Ordering::Greater),
                "$gte" => Bson::Boolean(ordering != Ordering::Less),
                "$lt" => Bson::Boolean(ordering == Ordering::Less),
                "$lte" => Bson::Boolean(ordering != Ordering::Greater),
                _ => Bson::Int32(match ordering {
                    Ordering::Less => -1,
                    Ordering::Equal => 0,
                    Ordering::Greater => 1,
                }),
            })
        }
        "$and" => {
            for arg in arguments(args) {
                if !truthy(&evaluate(arg, doc)?) {
                    return Ok(Bson::Boolean(false));
                }
            }
            Ok(Bson::Boolean(true))
        }
        "$or" => {
            for arg in arguments(args) {
                if truthy(&evaluate(arg, doc)?) {
                    return Ok(Bson::Boolean(true));
                }
            }
            Ok(Bson::Boolean(false))
        }
        "$not" => {
            let arg = single(op, args)?;
            Ok(Bson::Boolean(!truthy(&evaluate(arg, doc)?)))
        }
        "$sortArray" => sort_array(args, doc),
        _ => Err(StoreError::Unsupported(format!(
            "expression operator {op} is not implemented by the in-memory store"
        ))),
    }
}

fn sort_array(args: &Bson, doc: &Document) -> Result<Bson, StoreError> {
    let Bson::Document(spec) = args else {
        return Err(StoreError::invalid("$sortArray requires an object as an argument"));
    };
    let (Some(input), Some(sort_by)) = (spec.get("input"), spec.get("sortBy")) else {
        return Err(StoreError::invalid("$sortArray requires 'input' and 'sortBy'"));
    };

    let mut items = match evaluate(input, doc)? {
        Bson::Array(items) => items,
        value if is_nullish(&value) => return Ok(Bson::Null),
        other => {
            return Err(StoreError::invalid(format!(
                "the 'input' argument to $sortArray must be an array, but was of type: {}",
                type_name(&other)
            )))
        }
    };

    match sort_by {
        Bson::Document(keys) => {
            let keys = sort_keys(keys)?;
            items.sort_by(|a, b| {
                let (Bson::Document(a), Bson::Document(b)) = (a, b) else {
                    return compare::total_cmp(a, b);
                };
                compare_by_keys(a, b, &keys)
            });
        }
        direction => {
            let descending = direction_of(direction)?;
            items.sort_by(|a, b| {
                let ord = compare::total_cmp(a, b);
                if descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
    }
    Ok(Bson::Array(items))
}

/// Parses a `1` / `-1` sort direction; `true` means descending.
pub(crate) fn direction_of(value: &Bson) -> Result<bool, StoreError> {
    match compare::as_i64(value) {
        Some(1) => Ok(false),
        Some(-1) => Ok(true),
        _ => Err(StoreError::invalid(format!(
            "sort direction must be 1 or -1, got {value}"
        ))),
    }
}

pub(crate) fn sort_keys(spec: &Document) -> Result<Vec<(String, bool)>, StoreError> {
    if spec.is_empty() {
        return Err(StoreError::invalid("sort specification must not be empty"));
    }
    spec.iter()
        .map(|(field, dir)| Ok((field.clone(), direction_of(dir)?)))
        .collect()
}

pub(crate) fn compare_by_keys(a: &Document, b: &Document, keys: &[(String, bool)]) -> Ordering {
    for (field, descending) in keys {
        let left = path::lookup(a, field).unwrap_or(Bson::Null);
        let right = path::lookup(b, field).unwrap_or(Bson::Null);
        let ord = compare::total_cmp(&left, &right);
        if ord != Ordering::Equal {
            return if *descending { ord.reverse() } else { ord };
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    fn eval(expr: Bson, doc: &Document) -> Bson {
        evaluate(&expr, doc).unwrap()
    }

    #[test]
    fn test_field_path_and_missing() {
        let doc = doc! { "a": { "b": 5 } };
        assert_eq!(eval(Bson::String("$a.b".into()), &doc), Bson::Int32(5));
        assert!(is_missing(&eval(Bson::String("$a.c".into()), &doc)));
        assert_eq!(eval(Bson::Int32(9), &doc), Bson::Int32(9));
    }

    #[test]
    fn test_size_with_if_null() {
        let with_tags = doc! { "tags": ["a", "b"] };
        let without = doc! { "name": "x" };
        let null_tags = doc! { "tags": null };
        let expr = Bson::Document(doc! { "$size": { "$ifNull": ["$tags", []] } });
        assert_eq!(eval(expr.clone(), &with_tags), Bson::Int32(2));
        assert_eq!(eval(expr.clone(), &without), Bson::Int32(0));
        assert_eq!(eval(expr, &null_tags), Bson::Int32(0));
    }

    #[test]
    fn test_size_of_non_array_is_invalid() {
        let doc = doc! { "name": "x" };
        let err = evaluate(&Bson::Document(doc! { "$size": "$name" }), &doc).unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }

    #[test]
    fn test_array_elem_at_and_first_agree() {
        let doc = doc! { "items": [{ "id": 1 }, { "id": 2 }], "none": [] };
        let elem = eval(Bson::Document(doc! { "$arrayElemAt": ["$items", 0] }), &doc);
        let first = eval(Bson::Document(doc! { "$first": "$items" }), &doc);
        assert_eq!(elem, first);
        assert_eq!(
            eval(Bson::Document(doc! { "$arrayElemAt": ["$items", -1] }), &doc),
            Bson::Document(doc! { "id": 2 })
        );
        assert!(is_missing(&eval(
            Bson::Document(doc! { "$arrayElemAt": ["$none", 0] }),
            &doc
        )));
        assert!(is_missing(&eval(Bson::Document(doc! { "$first": "$none" }), &doc)));
    }

    #[test]
    fn test_comparison_and_logic() {
        let doc = doc! { "index": 40, "age": 30 };
        assert_eq!(
            eval(Bson::Document(doc! { "$gt": ["$index", "$age"] }), &doc),
            Bson::Boolean(true)
        );
        assert_eq!(
            eval(
                Bson::Document(doc! { "$and": [{ "$gt": ["$index", 1] }, { "$lt": ["$age", 10] }] }),
                &doc
            ),
            Bson::Boolean(false)
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$cond": [{ "$ifNull": ["$tags", false] }, 1, 0] }), &doc),
            Bson::Int32(0)
        );
    }

    #[test]
    fn test_sort_array() {
        let doc = doc! { "users": ["Mia", "Ann", "Zoe"] };
        let sorted = eval(
            Bson::Document(doc! { "$sortArray": { "input": "$users", "sortBy": 1 } }),
            &doc,
        );
        assert_eq!(sorted, Bson::Array(vec!["Ann".into(), "Mia".into(), "Zoe".into()]));
        let reversed = eval(
            Bson::Document(doc! { "$sortArray": { "input": "$users", "sortBy": -1 } }),
            &doc,
        );
        assert_eq!(reversed, Bson::Array(vec!["Zoe".into(), "Mia".into(), "Ann".into()]));
    }

    #[test]
    fn test_object_expression_skips_missing() {
        let doc = doc! { "a": 1 };
        let out = eval(Bson::Document(doc! { "x": "$a", "y": "$b" }), &doc);
        assert_eq!(out, Bson::Document(doc! { "x": 1 }));
    }

    #[test]
    fn test_unknown_expression_operator() {
        let err = evaluate(&Bson::Document(doc! { "$zip": [] }), &doc! {}).unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
    }
}
