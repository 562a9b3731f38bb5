//! Dotted field paths over BSON documents

use mongodb::bson::{Bson, Document};

/// Resolves a dotted path such as `company.location.country` or `tags.1`.
///
/// Numeric segments index into arrays. Any other segment applied to an
/// array fans out over the array's embedded documents and yields an array
/// of the values found, or nothing when no element has the field.
pub fn lookup(doc: &Document, path: &str) -> Option<Bson> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?.clone();
    for segment in segments {
        current = step(&current, segment)?;
    }
    Some(current)
}

fn step(value: &Bson, segment: &str) -> Option<Bson> {
    match value {
        Bson::Document(inner) => inner.get(segment).cloned(),
        Bson::Array(items) => {
            if let Ok(index) = segment.parse::<usize>() {
                return items.get(index).cloned();
            }
            let found: Vec<Bson> = items
                .iter()
                .filter_map(|item| match item {
                    Bson::Document(inner) => inner.get(segment).cloned(),
                    _ => None,
                })
                .collect();
            if found.is_empty() {
                None
            } else {
                Some(Bson::Array(found))
            }
        }
        _ => None,
    }
}

/// Sets `value` at a dotted path, creating intermediate documents.
/// A non-document value sitting on the path is replaced.
pub fn set(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head, Document::new());
            }
            if let Some(Bson::Document(child)) = doc.get_mut(head) {
                set(child, rest, value);
            }
        }
    }
}

/// Removes the field at a dotted path, if present.
pub fn remove(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(child)) = doc.get_mut(head) {
                remove(child, rest);
            }
        }
    }
}
