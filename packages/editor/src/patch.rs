//! # Structural Patches
//!
//! JSON patches (`add`, `remove`, `replace`) addressed by JSON Pointer paths.
//!
//! ## Design
//!
//! - Tree state is a `serde_json::Value`. Objects are key-sorted maps, so two
//!   diffs of the same pair of snapshots always produce the same patches.
//! - `diff` emits forward and inverse patches pairwise: inverse `i` undoes
//!   forward `i`. Undo applies the inverse list back to front.
//! - Applying a list is all-or-nothing: patches are applied to a scratch copy
//!   that only replaces the target once every patch succeeded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Patch operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

/// One atomic structural mutation
///
/// A `null` value is omitted when serialized, matching how absent
/// ("undefined") values are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonPatch {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
}

impl JsonPatch {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self { op: PatchOp::Add, path: path.into(), value }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self { op: PatchOp::Remove, path: path.into(), value: Value::Null }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self { op: PatchOp::Replace, path: path.into(), value }
    }

    /// Unescaped pointer segments of this patch's path
    pub fn segments(&self) -> Result<Vec<String>, PatchError> {
        parse_pointer(&self.path)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatchError {
    #[error("Invalid pointer: {0}")]
    InvalidPointer(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Index {index} out of bounds at {path}")]
    IndexOutOfBounds { path: String, index: usize },

    #[error("Cannot descend into scalar at {0}")]
    NotAContainer(String),
}

/// Forward patches and their pairwise inverses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    pub patches: Vec<JsonPatch>,
    pub inverse_patches: Vec<JsonPatch>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    fn push(&mut self, patch: JsonPatch, inverse: JsonPatch) {
        self.patches.push(patch);
        self.inverse_patches.push(inverse);
    }
}

/// Compute the patches turning `before` into `after`
pub fn diff(before: &Value, after: &Value) -> Diff {
    let mut out = Diff::default();
    diff_at("", before, after, &mut out);
    out
}

fn diff_at(path: &str, before: &Value, after: &Value, out: &mut Diff) {
    if before == after {
        return;
    }

    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            // Both maps iterate in key order; merge them.
            let mut keys: Vec<&String> = old.keys().chain(new.keys()).collect();
            keys.sort();
            keys.dedup();

            for key in keys {
                let child = join_pointer(path, key);
                match (old.get(key), new.get(key)) {
                    (Some(o), Some(n)) => diff_at(&child, o, n, out),
                    (Some(o), None) => {
                        out.push(JsonPatch::remove(&child), JsonPatch::add(&child, o.clone()))
                    }
                    (None, Some(n)) => {
                        out.push(JsonPatch::add(&child, n.clone()), JsonPatch::remove(&child))
                    }
                    (None, None) => {}
                }
            }
        }

        (Value::Array(old), Value::Array(new)) => {
            let common = old.len().min(new.len());
            for index in 0..common {
                diff_at(&join_pointer(path, &index.to_string()), &old[index], &new[index], out);
            }

            // Growth appends in ascending order, shrinking removes from the tail.
            for (index, value) in new.iter().enumerate().skip(common) {
                let child = join_pointer(path, &index.to_string());
                out.push(JsonPatch::add(&child, value.clone()), JsonPatch::remove(&child));
            }
            for index in (common..old.len()).rev() {
                let child = join_pointer(path, &index.to_string());
                out.push(JsonPatch::remove(&child), JsonPatch::add(&child, old[index].clone()));
            }
        }

        _ => out.push(
            JsonPatch::replace(path, after.clone()),
            JsonPatch::replace(path, before.clone()),
        ),
    }
}

/// Apply patches in order, leaving `target` untouched if any of them fails
pub fn apply_patches(target: &mut Value, patches: &[JsonPatch]) -> Result<(), PatchError> {
    let mut scratch = target.clone();
    for patch in patches {
        apply_patch(&mut scratch, patch)?;
    }
    *target = scratch;
    Ok(())
}

/// Apply a single patch in place
pub fn apply_patch(target: &mut Value, patch: &JsonPatch) -> Result<(), PatchError> {
    let segments = patch.segments()?;

    let Some((last, parents)) = segments.split_last() else {
        // Root pointer
        *target = match patch.op {
            PatchOp::Remove => Value::Null,
            PatchOp::Add | PatchOp::Replace => patch.value.clone(),
        };
        return Ok(());
    };

    let mut current = target;
    for segment in parents {
        current = match current {
            Value::Object(map) => map
                .get_mut(segment)
                .ok_or_else(|| PatchError::PathNotFound(patch.path.clone()))?,
            Value::Array(items) => {
                let index = parse_index(segment, &patch.path)?;
                items.get_mut(index).ok_or_else(|| PatchError::IndexOutOfBounds {
                    path: patch.path.clone(),
                    index,
                })?
            }
            _ => return Err(PatchError::NotAContainer(patch.path.clone())),
        };
    }

    match current {
        Value::Object(map) => match patch.op {
            // Optional fields may be absent from a baseline snapshot, so a
            // replace on a missing key inserts it.
            PatchOp::Add | PatchOp::Replace => {
                map.insert(last.clone(), patch.value.clone());
                Ok(())
            }
            PatchOp::Remove => map
                .remove(last)
                .map(|_| ())
                .ok_or_else(|| PatchError::PathNotFound(patch.path.clone())),
        },

        Value::Array(items) => {
            if patch.op == PatchOp::Add && last == "-" {
                items.push(patch.value.clone());
                return Ok(());
            }

            let index = parse_index(last, &patch.path)?;
            let out_of_bounds = || PatchError::IndexOutOfBounds {
                path: patch.path.clone(),
                index,
            };

            match patch.op {
                PatchOp::Add => {
                    if index > items.len() {
                        return Err(out_of_bounds());
                    }
                    items.insert(index, patch.value.clone());
                }
                PatchOp::Remove => {
                    if index >= items.len() {
                        return Err(out_of_bounds());
                    }
                    items.remove(index);
                }
                PatchOp::Replace => {
                    let slot = items.get_mut(index).ok_or_else(out_of_bounds)?;
                    *slot = patch.value.clone();
                }
            }
            Ok(())
        }

        _ => Err(PatchError::NotAContainer(patch.path.clone())),
    }
}

/// Append an escaped segment to a pointer
pub fn join_pointer(base: &str, segment: &str) -> String {
    let escaped = segment.replace('~', "~0").replace('/', "~1");
    format!("{}/{}", base, escaped)
}

/// Split a pointer into unescaped segments (`""` is the root)
pub fn parse_pointer(pointer: &str) -> Result<Vec<String>, PatchError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Err(PatchError::InvalidPointer(pointer.to_string()));
    };
    Ok(rest
        .split('/')
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn parse_index(segment: &str, path: &str) -> Result<usize, PatchError> {
    // Leading zeros are not valid array indices.
    if segment.len() > 1 && segment.starts_with('0') {
        return Err(PatchError::InvalidPointer(path.to_string()));
    }
    segment
        .parse::<usize>()
        .map_err(|_| PatchError::InvalidPointer(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_equal_values_is_empty() {
        let value = json!({ "a": 1, "b": [1, 2] });
        assert!(diff(&value, &value).is_empty());
    }

    #[test]
    fn test_diff_replaces_scalar_with_inverse() {
        let before = json!({ "tileMap": { "t1": { "content": { "text": null } } } });
        let after = json!({ "tileMap": { "t1": { "content": { "text": "hi" } } } });

        let d = diff(&before, &after);
        assert_eq!(d.patches, vec![JsonPatch::replace("/tileMap/t1/content/text", json!("hi"))]);
        assert_eq!(d.inverse_patches, vec![JsonPatch::replace("/tileMap/t1/content/text", Value::Null)]);
    }

    #[test]
    fn test_diff_object_keys_in_sorted_order() {
        let before = json!({});
        let after = json!({ "zeta": 1, "alpha": 2 });

        let d = diff(&before, &after);
        let paths: Vec<&str> = d.patches.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["/alpha", "/zeta"]);
        assert!(d.patches.iter().all(|p| p.op == PatchOp::Add));
        assert!(d.inverse_patches.iter().all(|p| p.op == PatchOp::Remove));
    }

    #[test]
    fn test_inverse_applied_in_reverse_restores_array() {
        let before = json!({ "items": [1, 2, 3, 4] });
        let after = json!({ "items": [1, 5] });

        let d = diff(&before, &after);

        let mut forward = before.clone();
        apply_patches(&mut forward, &d.patches).unwrap();
        assert_eq!(forward, after);

        let reversed: Vec<JsonPatch> = d.inverse_patches.iter().rev().cloned().collect();
        let mut backward = after.clone();
        apply_patches(&mut backward, &reversed).unwrap();
        assert_eq!(backward, before);
    }

    #[test]
    fn test_growing_array_round_trip() {
        let before = json!({ "tiles": [] });
        let after = json!({ "tiles": ["t1", "t2"] });

        let d = diff(&before, &after);
        assert_eq!(
            d.patches,
            vec![
                JsonPatch::add("/tiles/0", json!("t1")),
                JsonPatch::add("/tiles/1", json!("t2")),
            ]
        );

        let reversed: Vec<JsonPatch> = d.inverse_patches.iter().rev().cloned().collect();
        let mut value = after.clone();
        apply_patches(&mut value, &reversed).unwrap();
        assert_eq!(value, before);
    }

    #[test]
    fn test_pointer_escaping() {
        let pointer = join_pointer("/map", "a/b~c");
        assert_eq!(pointer, "/map/a~1b~0c");
        assert_eq!(parse_pointer(&pointer).unwrap(), vec!["map", "a/b~c"]);

        let mut value = json!({ "map": {} });
        apply_patch(&mut value, &JsonPatch::add(&pointer, json!(true))).unwrap();
        assert_eq!(value, json!({ "map": { "a/b~c": true } }));
    }

    #[test]
    fn test_failed_patch_list_leaves_target_untouched() {
        let mut value = json!({ "a": 1 });
        let patches = vec![
            JsonPatch::replace("/a", json!(2)),
            JsonPatch::remove("/missing"),
        ];

        let err = apply_patches(&mut value, &patches).unwrap_err();
        assert_eq!(err, PatchError::PathNotFound("/missing".to_string()));
        assert_eq!(value, json!({ "a": 1 }));
    }

    #[test]
    fn test_replace_on_missing_key_inserts() {
        let mut value = json!({ "content": {} });
        apply_patch(&mut value, &JsonPatch::replace("/content/text", json!("x"))).unwrap();
        assert_eq!(value, json!({ "content": { "text": "x" } }));
    }

    #[test]
    fn test_array_errors() {
        let mut value = json!({ "items": [1] });
        assert!(matches!(
            apply_patch(&mut value, &JsonPatch::remove("/items/3")),
            Err(PatchError::IndexOutOfBounds { index: 3, .. })
        ));
        assert!(matches!(
            apply_patch(&mut value, &JsonPatch::replace("/items/01", json!(2))),
            Err(PatchError::InvalidPointer(_))
        ));
        assert!(matches!(
            apply_patch(&mut value, &JsonPatch::add("/items/0/deep", json!(2))),
            Err(PatchError::NotAContainer(_))
        ));

        apply_patch(&mut value, &JsonPatch::add("/items/-", json!(2))).unwrap();
        assert_eq!(value, json!({ "items": [1, 2] }));
    }

    #[test]
    fn test_null_value_is_omitted_when_serialized() {
        let patch = JsonPatch::replace("/value", Value::Null);
        let json = serde_json::to_string(&patch).unwrap();
        assert_eq!(json, r#"{"op":"replace","path":"/value"}"#);

        let back: JsonPatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back, patch);
    }
}
