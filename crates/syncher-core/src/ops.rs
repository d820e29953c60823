//! Mutation operators.
//!
//! An [`Operation`] is validated against the current data before anything is
//! touched, then applied to produce a [`Diff`]. Instances apply operations
//! optimistically; the sequencer applies the same operation to the
//! authoritative copy and broadcasts the resulting diff.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::merge::{element_id, merge_into, merge_value, Shape};
use crate::record::{Data, Diff, RESERVED_KEYS};

/// A mutation of record data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Shallow replace per top-level key; `null` deletes.
    Update { patch: Data },
    /// Recursive structural merge.
    Merge { patch: Data },
    /// Append values to the array at `key`.
    Push { key: String, values: Vec<Value> },
    /// Remove every element equal to one of `values`.
    Pull { key: String, values: Vec<Value> },
    /// Remove every mapping element whose `id` is one of `ids`.
    PullById { key: String, ids: Vec<Value> },
    /// Merge `patch` into the element whose `id` equals `patch.id`.
    MergeById { key: String, patch: Data },
}

/// Discriminant of an [`Operation`], used in broadcasts and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Update,
    Merge,
    Push,
    Pull,
    PullById,
    MergeById,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Update => "update",
            OpKind::Merge => "merge",
            OpKind::Push => "push",
            OpKind::Pull => "pull",
            OpKind::PullById => "pullById",
            OpKind::MergeById => "mergeById",
        };
        f.write_str(name)
    }
}

impl Operation {
    /// Build an update from a JSON object.
    pub fn update(patch: Value) -> Result<Self> {
        Ok(Operation::Update {
            patch: into_object(patch)?,
        })
    }

    /// Build a merge from a JSON object.
    pub fn merge(patch: Value) -> Result<Self> {
        Ok(Operation::Merge {
            patch: into_object(patch)?,
        })
    }

    /// Build a merge-by-id from a JSON object carrying an `id`.
    pub fn merge_by_id(key: impl Into<String>, patch: Value) -> Result<Self> {
        Ok(Operation::MergeById {
            key: key.into(),
            patch: into_object(patch)?,
        })
    }

    /// One push per field of a JSON object. An array value pushes each of
    /// its elements; any other value is pushed as is.
    pub fn pushes(patch: Value) -> Result<Vec<Self>> {
        per_field(patch, |key, values| Operation::Push { key, values })
    }

    /// One pull per field of a JSON object, read like [`Operation::pushes`].
    pub fn pulls(patch: Value) -> Result<Vec<Self>> {
        per_field(patch, |key, values| Operation::Pull { key, values })
    }

    /// One pull-by-id per field of a JSON object mapping fields to ids.
    pub fn pulls_by_id(patch: Value) -> Result<Vec<Self>> {
        per_field(patch, |key, ids| Operation::PullById { key, ids })
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Update { .. } => OpKind::Update,
            Operation::Merge { .. } => OpKind::Merge,
            Operation::Push { .. } => OpKind::Push,
            Operation::Pull { .. } => OpKind::Pull,
            Operation::PullById { .. } => OpKind::PullById,
            Operation::MergeById { .. } => OpKind::MergeById,
        }
    }

    /// Check the operation against the current data without modifying it.
    pub fn validate(&self, data: &Data) -> Result<()> {
        match self {
            Operation::Update { patch } | Operation::Merge { patch } => {
                patch.keys().try_for_each(|key| check_key(key))
            }
            Operation::Push { key, .. }
            | Operation::Pull { key, .. }
            | Operation::PullById { key, .. } => {
                check_key(key)?;
                check_array(data, key)
            }
            Operation::MergeById { key, patch } => {
                check_key(key)?;
                if element_id(&Value::Object(patch.clone())).is_none() {
                    return Err(CoreError::MissingElementId(key.clone()));
                }
                check_array(data, key)
            }
        }
    }

    /// Validate, then apply the operation and return the resulting diff.
    ///
    /// Nothing is modified when validation fails.
    pub fn apply(&self, data: &mut Data) -> Result<Diff> {
        self.validate(data)?;

        let diff = match self {
            Operation::Update { patch } => {
                apply_diff(data, patch);
                patch.clone()
            }
            Operation::Merge { patch } => merge_into(data, patch),
            Operation::Push { key, values } => {
                let mut items = match data.remove(key) {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                items.extend(values.iter().cloned());
                let diff = field_diff(key, &items);
                data.insert(key.clone(), Value::Array(items));
                diff
            }
            Operation::Pull { key, values } => match array_mut(data, key) {
                Some(items) => {
                    items.retain(|item| !values.contains(item));
                    field_diff(key, items)
                }
                None => Diff::new(),
            },
            Operation::PullById { key, ids } => match array_mut(data, key) {
                Some(items) => {
                    items.retain(|item| element_id(item).map_or(true, |id| !ids.contains(id)));
                    field_diff(key, items)
                }
                None => Diff::new(),
            },
            Operation::MergeById { key, patch } => {
                let target_id = patch.get("id").cloned().unwrap_or(Value::Null);
                let fields: Data = patch
                    .iter()
                    .filter(|(name, _)| name.as_str() != "id")
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();

                let Some(items) = array_mut(data, key) else {
                    return Ok(Diff::new());
                };
                match items
                    .iter()
                    .position(|item| element_id(item) == Some(&target_id))
                {
                    Some(index) => {
                        merge_value(&mut items[index], &Value::Object(fields));
                        field_diff(key, items)
                    }
                    None => Diff::new(),
                }
            }
        };

        Ok(diff)
    }
}

/// Apply a diff as a shallow update: `null` removes the field.
///
/// Applying the same diff twice yields the same data.
pub fn apply_diff(data: &mut Data, diff: &Diff) {
    for (key, value) in diff {
        if value.is_null() {
            data.remove(key);
        } else {
            data.insert(key.clone(), value.clone());
        }
    }
}

fn into_object(value: Value) -> Result<Data> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(CoreError::NotAnObject),
    }
}

fn per_field(patch: Value, build: impl Fn(String, Vec<Value>) -> Operation) -> Result<Vec<Operation>> {
    let patch = into_object(patch)?;
    patch.keys().try_for_each(|key| check_key(key))?;
    Ok(patch
        .into_iter()
        .map(|(key, value)| {
            let values = match value {
                Value::Array(items) => items,
                other => vec![other],
            };
            build(key, values)
        })
        .collect())
}

fn check_key(key: &str) -> Result<()> {
    if RESERVED_KEYS.contains(&key) {
        Err(CoreError::ReservedKey(key.to_string()))
    } else {
        Ok(())
    }
}

fn check_array(data: &Data, key: &str) -> Result<()> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(()),
        Some(value) if Shape::of(value).is_array() => Ok(()),
        Some(_) => Err(CoreError::NotAnArray(key.to_string())),
    }
}

fn array_mut<'a>(data: &'a mut Data, key: &str) -> Option<&'a mut Vec<Value>> {
    data.get_mut(key).and_then(Value::as_array_mut)
}

fn field_diff(key: &str, items: &[Value]) -> Diff {
    let mut diff = Diff::new();
    diff.insert(key.to_string(), Value::Array(items.to_vec()));
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> Data {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn id_list() -> Data {
        data(json!({
            "foo": [
                { "id": "id1", "a": 1 },
                { "id": "id2", "a": 2 },
                { "id": "id3", "a": 3 },
                { "id": "id4", "a": 4 },
                { "id": "id5", "a": 5 }
            ]
        }))
    }

    #[test]
    fn test_update_is_shallow_and_null_deletes() {
        let mut d = data(json!({ "foo": { "a": 1 }, "bar": "bar" }));
        let op = Operation::update(json!({ "foo": { "b": 2 }, "bar": null })).unwrap();
        let diff = op.apply(&mut d).unwrap();

        assert_eq!(Value::Object(d), json!({ "foo": { "b": 2 } }));
        assert_eq!(Value::Object(diff), json!({ "foo": { "b": 2 }, "bar": null }));
    }

    #[test]
    fn test_push_preserves_order_and_creates_array() {
        let mut d = data(json!({ "foo": ["foo1"] }));
        let diff = Operation::Push {
            key: "foo".into(),
            values: vec![json!(1), json!(2), json!(3)],
        }
        .apply(&mut d)
        .unwrap();
        assert_eq!(d["foo"], json!(["foo1", 1, 2, 3]));
        assert_eq!(diff["foo"], json!(["foo1", 1, 2, 3]));

        Operation::Push {
            key: "fresh".into(),
            values: vec![json!("x")],
        }
        .apply(&mut d)
        .unwrap();
        assert_eq!(d["fresh"], json!(["x"]));
    }

    #[test]
    fn test_push_onto_scalar_is_rejected_untouched() {
        let mut d = data(json!({ "foo": "scalar" }));
        let err = Operation::Push {
            key: "foo".into(),
            values: vec![json!(1)],
        }
        .apply(&mut d)
        .unwrap_err();
        assert_eq!(err, CoreError::NotAnArray("foo".into()));
        assert_eq!(d["foo"], "scalar");
    }

    #[test]
    fn test_pull_removes_all_occurrences() {
        let mut d = data(json!({ "foo": [1, 2, 3, 2, 4, 5] }));
        let diff = Operation::Pull {
            key: "foo".into(),
            values: vec![json!(2), json!(5)],
        }
        .apply(&mut d)
        .unwrap();
        assert_eq!(d["foo"], json!([1, 3, 4]));
        assert_eq!(diff["foo"], json!([1, 3, 4]));
    }

    #[test]
    fn test_pull_on_missing_field_is_noop() {
        let mut d = Data::new();
        let diff = Operation::Pull {
            key: "foo".into(),
            values: vec![json!(1)],
        }
        .apply(&mut d)
        .unwrap();
        assert!(diff.is_empty());
        assert!(d.is_empty());
    }

    #[test]
    fn test_pull_by_id_ignores_other_fields() {
        let mut d = id_list();
        Operation::PullById {
            key: "foo".into(),
            ids: vec![json!("id3"), json!("id1")],
        }
        .apply(&mut d)
        .unwrap();
        assert_eq!(
            d["foo"],
            json!([{ "id": "id2", "a": 2 }, { "id": "id4", "a": 4 }, { "id": "id5", "a": 5 }])
        );
    }

    #[test]
    fn test_merge_by_id_merges_matching_element() {
        let mut d = id_list();
        let diff = Operation::merge_by_id("foo", json!({ "id": "id1", "a": 11, "b": 22 }))
            .unwrap()
            .apply(&mut d)
            .unwrap();
        assert_eq!(d["foo"][0], json!({ "id": "id1", "a": 11, "b": 22 }));
        assert_eq!(d["foo"][1], json!({ "id": "id2", "a": 2 }));
        assert_eq!(diff["foo"], d["foo"]);
    }

    #[test]
    fn test_merge_by_id_without_match_is_noop() {
        let mut d = id_list();
        let before = d.clone();
        let diff = Operation::merge_by_id("foo", json!({ "id": "nope", "a": 0 }))
            .unwrap()
            .apply(&mut d)
            .unwrap();
        assert!(diff.is_empty());
        assert_eq!(d, before);
    }

    #[test]
    fn test_merge_by_id_requires_id() {
        let mut d = id_list();
        let err = Operation::merge_by_id("foo", json!({ "a": 0 }))
            .unwrap()
            .apply(&mut d)
            .unwrap_err();
        assert_eq!(err, CoreError::MissingElementId("foo".into()));
    }

    #[test]
    fn test_reserved_keys_rejected() {
        let mut d = Data::new();
        let err = Operation::update(json!({ "secret": "x" }))
            .unwrap()
            .apply(&mut d)
            .unwrap_err();
        assert_eq!(err, CoreError::ReservedKey("secret".into()));
    }

    #[test]
    fn test_non_object_patch_rejected() {
        assert_eq!(Operation::merge(json!([1])).unwrap_err(), CoreError::NotAnObject);
    }

    #[test]
    fn test_per_field_array_ops() {
        let ops = Operation::pushes(json!({ "foo": "foo2", "bar": [1, 2] })).unwrap();
        assert_eq!(
            ops,
            vec![
                Operation::Push { key: "bar".into(), values: vec![json!(1), json!(2)] },
                Operation::Push { key: "foo".into(), values: vec![json!("foo2")] },
            ]
        );

        let ops = Operation::pulls_by_id(json!({ "foo": "id3" })).unwrap();
        assert_eq!(ops, vec![Operation::PullById { key: "foo".into(), ids: vec![json!("id3")] }]);

        assert_eq!(
            Operation::pulls(json!({ "foo": 3, "id": 1 })).unwrap_err(),
            CoreError::ReservedKey("id".into())
        );
        assert_eq!(Operation::pushes(json!("foo")).unwrap_err(), CoreError::NotAnObject);
    }

    #[test]
    fn test_apply_diff_is_idempotent() {
        let mut d = data(json!({ "a": 1, "b": 2 }));
        let diff = data(json!({ "a": 5, "b": null }));
        apply_diff(&mut d, &diff);
        let once = d.clone();
        apply_diff(&mut d, &diff);
        assert_eq!(d, once);
        assert_eq!(Value::Object(d), json!({ "a": 5 }));
    }

    #[test]
    fn test_op_kind_display() {
        assert_eq!(OpKind::PullById.to_string(), "pullById");
        assert_eq!(
            Operation::merge_by_id("k", json!({ "id": 1 })).unwrap().kind(),
            OpKind::MergeById
        );
    }
}
