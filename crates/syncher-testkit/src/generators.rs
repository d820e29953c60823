//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::{Map, Value};

use syncher_core::{Data, Operation};

/// Field names used by generated data; never reserved.
pub fn field_name() -> impl Strategy<Value = String> {
    "[a-e]"
}

/// A JSON scalar.
pub fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(Value::from),
        "[a-z]{0,5}".prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
    ]
}

/// Nested mappings of scalars.
pub fn mapping() -> impl Strategy<Value = Value> {
    scalar().prop_recursive(3, 16, 3, |inner| {
        prop::collection::btree_map(field_name(), inner, 0..3)
            .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>()))
    })
}

/// An array of mapping elements with distinct small integer ids.
pub fn id_array() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(0u8..8, mapping(), 0..4).prop_map(|elements| {
        Value::Array(
            elements
                .into_iter()
                .map(|(id, body)| {
                    let mut element = match body {
                        Value::Object(map) => map,
                        other => {
                            let mut map = Map::new();
                            map.insert("v".into(), other);
                            map
                        }
                    };
                    element.insert("id".into(), Value::from(id));
                    Value::Object(element)
                })
                .collect(),
        )
    })
}

/// Record data: a few scalar/mapping fields plus `list` (scalars) and
/// `items` (id elements).
pub fn data() -> impl Strategy<Value = Data> {
    (
        prop::collection::btree_map(field_name(), mapping(), 0..4),
        prop::collection::vec(scalar(), 0..4),
        id_array(),
    )
        .prop_map(|(fields, list, items)| {
            let mut data: Data = fields.into_iter().collect();
            data.insert("list".into(), Value::Array(list));
            data.insert("items".into(), items);
            data
        })
}

/// A non-empty top-level patch.
pub fn patch() -> impl Strategy<Value = Data> {
    prop::collection::btree_map(field_name(), mapping(), 1..3)
        .prop_map(|m| m.into_iter().collect::<Data>())
}

/// An operation that is valid against any value of [`data`].
pub fn operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        patch().prop_map(|patch| Operation::Update { patch }),
        patch().prop_map(|patch| Operation::Merge { patch }),
        prop::collection::vec(scalar(), 1..3).prop_map(|values| Operation::Push {
            key: "list".into(),
            values,
        }),
        prop::collection::vec(scalar(), 1..3).prop_map(|values| Operation::Pull {
            key: "list".into(),
            values,
        }),
        prop::collection::vec(0u8..8, 1..3).prop_map(|ids| Operation::PullById {
            key: "items".into(),
            ids: ids.into_iter().map(Value::from).collect(),
        }),
        (0u8..8, mapping()).prop_map(|(id, body)| {
            let mut patch = Data::new();
            patch.insert("id".into(), Value::from(id));
            patch.insert("x".into(), body);
            Operation::MergeById {
                key: "items".into(),
                patch,
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncher_core::apply_diff;

    proptest! {
        #[test]
        fn prop_update_and_merge_share_patch_shape(patch in patch()) {
            prop_assert!(!patch.is_empty());
            let update = Operation::Update { patch: patch.clone() };
            let merge = Operation::Merge { patch };
            prop_assert!(update.validate(&Data::new()).is_ok());
            prop_assert!(merge.validate(&Data::new()).is_ok());
        }

        #[test]
        fn prop_generated_operations_are_valid(base in data(), op in operation()) {
            prop_assert!(op.validate(&base).is_ok());
        }

        #[test]
        fn prop_diff_reproduces_the_operation(base in data(), op in operation()) {
            let mut applied = base.clone();
            let diff = op.apply(&mut applied).unwrap();

            let mut replayed = base;
            apply_diff(&mut replayed, &diff);
            prop_assert_eq!(&replayed, &applied);

            apply_diff(&mut replayed, &diff);
            prop_assert_eq!(replayed, applied);
        }
    }
}
