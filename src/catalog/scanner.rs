//! Schema discovery over arbitrary supplier documents.

use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_SCAN_DEPTH: usize = 3;

/// Objects with more keys than this, mostly holding objects, are treated as
/// keyed collections.
const KEYED_COLLECTION_MIN_KEYS: usize = 5;
const KEYED_COLLECTION_OBJECT_SHARE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Array,
    Object,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListCandidate {
    /// Dotted path from the document root; empty for the root itself.
    pub path: String,
    pub element_count: usize,
    pub kind: CollectionKind,
}

/// Dotted-path lookup. `""` and `"."` address the value itself; numeric
/// segments index into arrays. Missing segments yield `None`.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() || path == "." {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    })
}

/// Lists every non-empty array and keyed collection reachable within
/// `max_depth` levels, largest first.
pub fn scan_for_arrays(document: &Value, max_depth: usize) -> Vec<ListCandidate> {
    let mut found = Vec::new();
    walk(document, String::new(), 0, max_depth, &mut found);
    found.sort_by(|a, b| b.element_count.cmp(&a.element_count));
    found
}

fn walk(
    value: &Value,
    path: String,
    depth: usize,
    max_depth: usize,
    found: &mut Vec<ListCandidate>,
) {
    match value {
        Value::Array(items) if !items.is_empty() => {
            found.push(ListCandidate {
                path: path.clone(),
                element_count: items.len(),
                kind: CollectionKind::Array,
            });
            // Elements share a shape, so the first one stands for the rest.
            if depth < max_depth && (items[0].is_object() || items[0].is_array()) {
                walk(&items[0], join(&path, "0"), depth + 1, max_depth, found);
            }
        }
        Value::Object(map) => {
            if is_keyed_collection(map) {
                found.push(ListCandidate {
                    path: path.clone(),
                    element_count: map.len(),
                    kind: CollectionKind::Object,
                });
            }
            if depth >= max_depth {
                return;
            }
            for (key, child) in map {
                if child.is_object() || child.is_array() {
                    walk(child, join(&path, key), depth + 1, max_depth, found);
                }
            }
        }
        _ => {}
    }
}

fn is_keyed_collection(map: &serde_json::Map<String, Value>) -> bool {
    if map.len() <= KEYED_COLLECTION_MIN_KEYS {
        return false;
    }
    let objects = map.values().filter(|value| value.is_object()).count();
    objects as f64 / map.len() as f64 >= KEYED_COLLECTION_OBJECT_SHARE
}

/// Records held at `path`: array elements, or the values of a keyed
/// collection. `None` when the path does not resolve to a collection.
pub fn records_at<'a>(document: &'a Value, path: &str) -> Option<Vec<&'a Value>> {
    match resolve_path(document, path)? {
        Value::Array(items) => Some(items.iter().collect()),
        Value::Object(map) => Some(map.values().collect()),
        _ => None,
    }
}

/// Every key path of one sample record, parents before children. Arrays are
/// leaves: per-warehouse lists are normalized as a whole.
pub fn flatten_keys(record: &Value, max_depth: usize) -> Vec<String> {
    let mut keys = Vec::new();
    collect_keys(record, "", 1, max_depth, &mut keys);
    keys
}

fn collect_keys(value: &Value, prefix: &str, depth: usize, max_depth: usize, keys: &mut Vec<String>) {
    let Value::Object(map) = value else {
        return;
    };
    for (key, child) in map {
        let path = join(prefix, key);
        keys.push(path.clone());
        if child.is_object() && depth < max_depth {
            collect_keys(child, &path, depth + 1, max_depth, keys);
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}
