//! Recursive structural merge.
//!
//! Mappings merge key by key; anything else (scalars, arrays, type
//! mismatches) is replaced wholesale by the patch value. Arrays are opaque
//! here and only change through the dedicated array operators.

use serde_json::Value;

use crate::record::{Data, Diff};

/// Merge `patch` into `target` in place.
pub fn merge_value(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(current), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match current.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_value(existing, value)
                    }
                    _ => {
                        current.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Merge a top-level patch into record data and return the effective diff.
///
/// A top-level `null` deletes the field, matching diff semantics. The diff
/// holds the complete post-merge value of every field that changed.
pub fn merge_into(data: &mut Data, patch: &Data) -> Diff {
    let mut diff = Diff::new();

    for (key, value) in patch {
        if value.is_null() {
            if data.remove(key).is_some() {
                diff.insert(key.clone(), Value::Null);
            }
            continue;
        }

        let changed = match data.get_mut(key) {
            Some(existing) => {
                let before = existing.clone();
                merge_value(existing, value);
                *existing != before
            }
            None => {
                data.insert(key.clone(), value.clone());
                true
            }
        };

        if changed {
            if let Some(after) = data.get(key) {
                diff.insert(key.clone(), after.clone());
            }
        }
    }

    diff
}

/// The shape of a value as seen at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Mapping,
    /// Array whose elements are all scalars.
    ScalarArray,
    /// Array whose elements are all mappings carrying an `id`.
    IdArray,
    /// Any other array (empty arrays count as scalar arrays).
    MixedArray,
}

impl Shape {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Object(_) => Shape::Mapping,
            Value::Array(items) => {
                if items.iter().all(|v| !v.is_object() && !v.is_array()) {
                    Shape::ScalarArray
                } else if items.iter().all(|v| element_id(v).is_some()) {
                    Shape::IdArray
                } else {
                    Shape::MixedArray
                }
            }
            _ => Shape::Scalar,
        }
    }

    pub fn is_array(self) -> bool {
        matches!(self, Shape::ScalarArray | Shape::IdArray | Shape::MixedArray)
    }
}

/// The `id` of an array element, if it is a mapping with a non-null id.
pub fn element_id(value: &Value) -> Option<&Value> {
    value.as_object()?.get("id").filter(|id| !id.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn data(value: Value) -> Data {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_merge_keeps_nonconflicting_keys() {
        let mut d = data(json!({ "hello": { "baz": "bat" } }));
        merge_into(&mut d, &data(json!({ "hello": { "bof": "bin" } })));
        assert_eq!(Value::Object(d), json!({ "hello": { "baz": "bat", "bof": "bin" } }));
    }

    #[test]
    fn test_merge_type_mismatch_replaces() {
        let mut d = data(json!({ "bar": "bar" }));
        let diff = merge_into(&mut d, &data(json!({ "bar": { "baz": "bat" } })));
        assert_eq!(diff.get("bar"), Some(&json!({ "baz": "bat" })));

        merge_into(&mut d, &data(json!({ "bar": { "bof": "bin" } })));
        assert_eq!(d["bar"], json!({ "baz": "bat", "bof": "bin" }));
    }

    #[test]
    fn test_merge_deep_objects() {
        let mut d = data(json!({
            "a": { "b": { "c": 1, "d": 2 }, "e": 3 },
            "f": { "g": { "h": 4 } }
        }));
        merge_into(
            &mut d,
            &data(json!({
                "a": { "b": { "i": 5 } },
                "f": { "g": { "h": 6, "k": 8 }, "j": 7 }
            })),
        );
        assert_eq!(d["a"], json!({ "b": { "c": 1, "d": 2, "i": 5 }, "e": 3 }));
        assert_eq!(d["f"], json!({ "g": { "h": 6, "k": 8 }, "j": 7 }));
    }

    #[test]
    fn test_merge_arrays_are_opaque() {
        let mut d = data(json!({ "list": [1, 2, 3] }));
        merge_into(&mut d, &data(json!({ "list": [9] })));
        assert_eq!(d["list"], json!([9]));
    }

    #[test]
    fn test_effective_diff_omits_unchanged() {
        let mut d = data(json!({ "a": 1, "b": { "c": 2 } }));
        let diff = merge_into(&mut d, &data(json!({ "a": 1, "b": { "c": 3 } })));
        assert!(!diff.contains_key("a"));
        assert_eq!(diff.get("b"), Some(&json!({ "c": 3 })));
    }

    #[test]
    fn test_top_level_null_deletes() {
        let mut d = data(json!({ "a": 1 }));
        let diff = merge_into(&mut d, &data(json!({ "a": null, "missing": null })));
        assert!(!d.contains_key("a"));
        assert_eq!(diff.get("a"), Some(&Value::Null));
        assert!(!diff.contains_key("missing"));
    }

    #[test]
    fn test_shape() {
        assert_eq!(Shape::of(&json!(1)), Shape::Scalar);
        assert_eq!(Shape::of(&json!({})), Shape::Mapping);
        assert_eq!(Shape::of(&json!([1, "a"])), Shape::ScalarArray);
        assert_eq!(Shape::of(&json!([{ "id": 1 }])), Shape::IdArray);
        assert_eq!(Shape::of(&json!([{ "x": 1 }])), Shape::MixedArray);
        assert!(Shape::of(&json!([])).is_array());
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            "[a-z]{0,6}".prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
        ]
    }

    fn tree() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(3, 24, 4, |inner| {
            prop::collection::btree_map("[a-d]", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect()))
        })
    }

    proptest! {
        #[test]
        fn prop_merge_is_idempotent(base in tree(), patch in tree()) {
            let mut once = base.clone();
            merge_value(&mut once, &patch);
            let mut twice = once.clone();
            merge_value(&mut twice, &patch);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_merge_with_self_is_identity(base in tree()) {
            let mut merged = base.clone();
            merge_value(&mut merged, &base);
            prop_assert_eq!(merged, base);
        }

        #[test]
        fn prop_disjoint_subtrees_commute(x in leaf(), y in leaf()) {
            let first = json!({ "a": { "b": x } });
            let second = json!({ "a": { "c": y } });

            let mut ab = json!({});
            merge_value(&mut ab, &first);
            merge_value(&mut ab, &second);

            let mut ba = json!({});
            merge_value(&mut ba, &second);
            merge_value(&mut ba, &first);

            prop_assert_eq!(ab, ba);
        }
    }
}
