//! Query predicate evaluation
//!
//! Evaluates a filter document (the argument of `find` or `$match`) against
//! a single document.

use super::{compare, expr, path};
use crate::error::StoreError;
use mongodb::bson::{Bson, Document};
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;

/// Returns whether `doc` satisfies every clause of `filter`.
pub fn matches(doc: &Document, filter: &Document) -> Result<bool, StoreError> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => any_clause(doc, key, condition)?,
            "$nor" => !any_clause(doc, key, condition)?,
            "$expr" => expr::truthy(&expr::evaluate(condition, doc)?),
            "$comment" => true,
            "$text" | "$where" => {
                return Err(StoreError::Unsupported(format!(
                    "{key} is not available in the in-memory store"
                )))
            }
            op if op.starts_with('$') => {
                return Err(StoreError::invalid(format!(
                    "unknown top level operator: {op}"
                )))
            }
            field => matches_field(path::lookup(doc, field).as_ref(), condition)?,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(operator: &str, condition: &'a Bson) -> Result<Vec<&'a Document>, StoreError> {
    let Bson::Array(items) = condition else {
        return Err(StoreError::invalid(format!("{operator} must be an array")));
    };
    if items.is_empty() {
        return Err(StoreError::invalid(format!(
            "{operator} must be a nonempty array"
        )));
    }
    items
        .iter()
        .map(|item| match item {
            Bson::Document(clause) => Ok(clause),
            _ => Err(StoreError::invalid(format!(
                "{operator} entries must be documents"
            ))),
        })
        .collect()
}

fn any_clause(doc: &Document, operator: &str, condition: &Bson) -> Result<bool, StoreError> {
    for clause in clauses(operator, condition)? {
        if matches(doc, clause)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().is_some_and(|k| k.starts_with('$'))
}

/// Evaluates the condition attached to one field path.
fn matches_field(value: Option<&Bson>, condition: &Bson) -> Result<bool, StoreError> {
    match condition {
        Bson::Document(ops) if is_operator_document(ops) => {
            if ops.contains_key("$options") && !ops.contains_key("$regex") {
                return Err(StoreError::invalid("$options needs a $regex"));
            }
            for (op, operand) in ops {
                if op == "$options" {
                    continue;
                }
                if !apply_operator(value, op, operand, ops)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Bson::RegularExpression(re) => {
            let compiled = compile_regex(&re.pattern, &re.options)?;
            Ok(matches_regex(value, &compiled))
        }
        _ => Ok(equals(value, condition)),
    }
}

/// Implicit equality: a missing field equals null, an array field matches
/// when the whole array or any element equals `target`.
pub(crate) fn equals(value: Option<&Bson>, target: &Bson) -> bool {
    match value {
        None => matches!(target, Bson::Null),
        Some(Bson::Array(items)) => {
            compare::values_equal(&Bson::Array(items.clone()), target)
                || items.iter().any(|item| compare::values_equal(item, target))
        }
        Some(v) => compare::values_equal(v, target),
    }
}

/// Scalars stand for themselves; arrays are matched element-wise.
fn candidates(value: Option<&Bson>) -> Vec<&Bson> {
    match value {
        None => Vec::new(),
        Some(Bson::Array(items)) => items.iter().collect(),
        Some(v) => vec![v],
    }
}

fn apply_operator(
    value: Option<&Bson>,
    op: &str,
    operand: &Bson,
    siblings: &Document,
) -> Result<bool, StoreError> {
    match op {
        "$eq" => Ok(equals(value, operand)),
        "$ne" => Ok(!equals(value, operand)),
        "$gt" => Ok(range(value, operand, |o| o == Ordering::Greater)),
        "$gte" => Ok(range(value, operand, |o| o != Ordering::Less)),
        "$lt" => Ok(range(value, operand, |o| o == Ordering::Less)),
        "$lte" => Ok(range(value, operand, |o| o != Ordering::Greater)),
        "$in" => member_of(value, operand, op),
        "$nin" => Ok(!member_of(value, operand, op)?),
        "$not" => match operand {
            Bson::Document(inner) if is_operator_document(inner) => {
                Ok(!matches_field(value, operand)?)
            }
            Bson::RegularExpression(_) => Ok(!matches_field(value, operand)?),
            _ => Err(StoreError::invalid("$not needs a regex or a document")),
        },
        "$regex" => {
            let (pattern, inline_options) = match operand {
                Bson::String(p) => (p.as_str(), ""),
                Bson::RegularExpression(re) => (re.pattern.as_str(), re.options.as_str()),
                _ => return Err(StoreError::invalid("$regex has to be a string")),
            };
            let options = match siblings.get("$options") {
                Some(Bson::String(o)) => o.as_str(),
                Some(_) => return Err(StoreError::invalid("$options has to be a string")),
                None => inline_options,
            };
            let compiled = compile_regex(pattern, options)?;
            Ok(matches_regex(value, &compiled))
        }
        "$mod" => modulo(value, operand),
        "$exists" => Ok(expr::truthy(operand) == value.is_some()),
        "$type" => {
            let Some(v) = value else {
                return Ok(false);
            };
            let aliases: Vec<&Bson> = match operand {
                Bson::Array(items) => items.iter().collect(),
                single => vec![single],
            };
            for alias in aliases {
                if type_matches(v, alias)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        "$all" => {
            let Bson::Array(required) = operand else {
                return Err(StoreError::invalid("$all needs an array"));
            };
            if required.is_empty() {
                return Ok(false);
            }
            for item in required {
                let found = match item {
                    Bson::RegularExpression(re) => {
                        matches_regex(value, &compile_regex(&re.pattern, &re.options)?)
                    }
                    _ => equals(value, item),
                };
                if !found {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        "$elemMatch" | "$size" => Err(StoreError::Unsupported(format!(
            "{op} is not implemented by the in-memory store"
        ))),
        _ => Err(StoreError::invalid(format!("unknown operator: {op}"))),
    }
}

fn range(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    candidates(value)
        .into_iter()
        .any(|v| compare::bracket_cmp(v, operand).is_some_and(&accept))
}

fn member_of(value: Option<&Bson>, operand: &Bson, op: &str) -> Result<bool, StoreError> {
    let Bson::Array(set) = operand else {
        return Err(StoreError::invalid(format!("{op} needs an array")));
    };
    for item in set {
        let hit = match item {
            Bson::RegularExpression(re) => {
                matches_regex(value, &compile_regex(&re.pattern, &re.options)?)
            }
            _ => equals(value, item),
        };
        if hit {
            return Ok(true);
        }
    }
    Ok(false)
}

fn modulo(value: Option<&Bson>, operand: &Bson) -> Result<bool, StoreError> {
    let args = match operand {
        Bson::Array(args) if args.len() == 2 => args,
        _ => {
            return Err(StoreError::invalid(
                "malformed mod, needs to be an array of [divisor, remainder]",
            ))
        }
    };
    let (Some(divisor), Some(remainder)) = (compare::as_f64(&args[0]), compare::as_f64(&args[1]))
    else {
        return Err(StoreError::invalid("malformed mod, arguments must be numbers"));
    };
    let divisor = divisor.trunc() as i64;
    let remainder = remainder.trunc() as i64;
    if divisor == 0 {
        return Err(StoreError::invalid("divisor cannot be 0"));
    }
    Ok(candidates(value).into_iter().any(|v| {
        compare::as_f64(v).is_some_and(|n| {
            // i64::MIN % -1 overflows; its remainder is 0
            n.is_finite() && (n.trunc() as i64).checked_rem(divisor).unwrap_or(0) == remainder
        })
    }))
}

pub(crate) fn compile_regex(pattern: &str, options: &str) -> Result<Regex, StoreError> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| StoreError::invalid(format!("invalid regular expression: {e}")))
}

fn matches_regex(value: Option<&Bson>, re: &Regex) -> bool {
    candidates(value).into_iter().any(|v| match v {
        Bson::String(s) | Bson::Symbol(s) => re.is_match(s),
        _ => false,
    })
}

fn type_matches(value: &Bson, alias: &Bson) -> Result<bool, StoreError> {
    let name = match alias {
        Bson::String(s) => s.as_str(),
        number => match compare::as_i64(number) {
            Some(1) => "double",
            Some(2) => "string",
            Some(3) => "object",
            Some(4) => "array",
            Some(5) => "binData",
            Some(7) => "objectId",
            Some(8) => "bool",
            Some(9) => "date",
            Some(10) => "null",
            Some(11) => "regex",
            Some(16) => "int",
            Some(17) => "timestamp",
            Some(18) => "long",
            Some(19) => "decimal",
            _ => return Err(StoreError::invalid(format!("invalid $type code: {number}"))),
        },
    };

    if name == "array" {
        return Ok(matches!(value, Bson::Array(_)));
    }

    let single = |v: &Bson| -> Result<bool, StoreError> {
        Ok(match name {
            "double" => matches!(v, Bson::Double(_)),
            "string" => matches!(v, Bson::String(_)),
            "object" => matches!(v, Bson::Document(_)),
            "binData" => matches!(v, Bson::Binary(_)),
            "objectId" => matches!(v, Bson::ObjectId(_)),
            "bool" => matches!(v, Bson::Boolean(_)),
            "date" => matches!(v, Bson::DateTime(_)),
            "null" => matches!(v, Bson::Null),
            "regex" => matches!(v, Bson::RegularExpression(_)),
            "int" => matches!(v, Bson::Int32(_)),
            "timestamp" => matches!(v, Bson::Timestamp(_)),
            "long" => matches!(v, Bson::Int64(_)),
            "decimal" => matches!(v, Bson::Decimal128(_)),
            "number" => matches!(
                v,
                Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)
            ),
            other => {
                return Err(StoreError::invalid(format!(
                    "unknown type name alias: {other}"
                )))
            }
        })
    };

    match value {
        Bson::Array(items) => {
            for item in items {
                if single(item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        v => single(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, Regex as BsonRegex};

    fn user() -> Document {
        doc! {
            "index": 3,
            "name": "Joanna Whitaker",
            "isActive": false,
            "age": 24,
            "gender": "female",
            "tags": ["enim", "ad", "velit"],
            "company": {
                "phone": "+1 (940) 501-3963",
                "location": { "country": "USA" },
            },
        }
    }

    fn check(filter: Document) -> bool {
        matches(&user(), &filter).unwrap()
    }

    #[test]
    fn test_implicit_equality_and_array_contains() {
        assert!(check(doc! { "isActive": false }));
        assert!(check(doc! { "tags": "velit" }));
        assert!(!check(doc! { "tags": "lorem" }));
        assert!(check(doc! { "tags": ["enim", "ad", "velit"] }));
        assert!(check(doc! { "tags.1": "ad" }));
        assert!(check(doc! { "company.location.country": "USA" }));
        assert!(check(doc! { "missing": null }));
        assert!(check(doc! { "isActive": false, "tags": "velit" }));
    }

    #[test]
    fn test_comparison_operators() {
        assert!(check(doc! { "age": { "$eq": 24 } }));
        assert!(check(doc! { "age": { "$ne": 18 } }));
        assert!(check(doc! { "age": { "$gt": 20, "$lt": 30 } }));
        assert!(check(doc! { "age": { "$gte": 24, "$lte": 24 } }));
        assert!(!check(doc! { "age": { "$gt": 24 } }));
        assert!(check(doc! { "age": { "$in": [20, 24, 30] } }));
        assert!(check(doc! { "age": { "$nin": [20, 21, 22] } }));
        assert!(!check(doc! { "age": { "$gt": "10" } }));
    }

    #[test]
    fn test_logical_operators() {
        assert!(check(doc! { "$and": [{ "age": { "$gt": 20 } }, { "gender": "female" }] }));
        assert!(check(doc! { "$or": [{ "age": { "$lt": 21 } }, { "gender": "female" }] }));
        assert!(!check(doc! { "$nor": [{ "age": { "$lt": 18 } }, { "gender": "female" }] }));
        assert!(check(doc! { "age": { "$not": { "$gt": 30 } } }));
        assert!(check(doc! { "missing": { "$not": { "$gt": 30 } } }));
    }

    #[test]
    fn test_empty_logical_array_is_invalid() {
        let err = matches(&user(), &doc! { "$or": [] }).unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }

    #[test]
    fn test_regex_variants() {
        assert!(check(doc! { "name": { "$regex": "^j", "$options": "i" } }));
        assert!(!check(doc! { "name": { "$regex": "^j" } }));
        let phone = BsonRegex {
            pattern: r"^\+1 \(940\)".to_string(),
            options: String::new(),
        };
        assert!(check(doc! { "company.phone": phone }));
        let err = matches(&user(), &doc! { "name": { "$options": "i" } }).unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }

    #[test]
    fn test_expr_compares_two_fields() {
        assert!(!check(doc! { "$expr": { "$gt": ["$index", "$age"] } }));
        assert!(check(doc! { "$expr": { "$lt": ["$index", "$age"] } }));
    }

    #[test]
    fn test_mod_operator() {
        assert!(check(doc! { "age": { "$mod": [2, 0] } }));
        assert!(!check(doc! { "age": { "$mod": [5, 0] } }));
        let err = matches(&user(), &doc! { "age": { "$mod": [0, 0] } }).unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }

    #[test]
    fn test_mod_at_integer_minimum() {
        let doc = doc! { "age": i64::MIN };
        assert!(matches(&doc, &doc! { "age": { "$mod": [-1, 0] } }).unwrap());
        assert!(!matches(&doc, &doc! { "age": { "$mod": [-1, 1] } }).unwrap());
    }

    #[test]
    fn test_element_operators() {
        assert!(check(doc! { "company": { "$exists": true } }));
        assert!(check(doc! { "registered": { "$exists": false } }));
        assert!(check(doc! { "age": { "$type": "int" } }));
        assert!(check(doc! { "age": { "$type": "number" } }));
        assert!(!check(doc! { "age": { "$type": "string" } }));
        assert!(check(doc! { "tags": { "$type": "array" } }));
        assert!(check(doc! { "tags": { "$type": 2 } }));
    }

    #[test]
    fn test_all_operator() {
        assert!(check(doc! { "tags": { "$all": ["enim", "velit"] } }));
        assert!(!check(doc! { "tags": { "$all": ["enim", "id"] } }));
        assert!(!check(doc! { "tags": { "$all": [] } }));
    }

    #[test]
    fn test_unimplemented_array_operators_are_rejected() {
        let err = matches(&user(), &doc! { "tags": { "$size": 3 } }).unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
        let err = matches(&user(), &doc! { "tags": { "$elemMatch": { "$eq": "ad" } } })
            .unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
    }

    #[test]
    fn test_unknown_operator_is_invalid() {
        let err = matches(&user(), &doc! { "age": { "$between": [1, 2] } }).unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }
}
