//! Property-based tests for the merge engine.
//!
//! These tests use proptest to generate random mappings and verify the
//! precedence and ordering rules hold for all of them.

#[cfg(test)]
mod proptest_tests {
    use crate::merge::yaml::{merge_mappings, merge_yaml_values};
    use proptest::prelude::*;
    use serde_yaml::{Mapping, Value};

    fn flat_mapping() -> impl Strategy<Value = Mapping> {
        prop::collection::vec(("[a-f]", "[a-z0-9]{0,4}"), 0..8).prop_map(|entries| {
            let mut map = Mapping::new();
            for (k, v) in entries {
                map.insert(Value::from(k), Value::from(v));
            }
            map
        })
    }

    fn nested_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            "[a-z]{0,3}".prop_map(Value::from),
            prop::collection::vec("[a-z]{1,2}".prop_map(Value::from), 0..3)
                .prop_map(Value::Sequence),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop::collection::vec(("[a-d]", inner), 0..4).prop_map(|entries| {
                let mut map = Mapping::new();
                for (k, v) in entries {
                    map.insert(Value::from(k), v);
                }
                Value::Mapping(map)
            })
        })
    }

    fn merged(a: &Mapping, b: &Mapping) -> Mapping {
        let mut target = a.clone();
        merge_mappings(&mut target, b, "", "b.yml");
        target
    }

    proptest! {
        /// Property: a key set in the later mapping always carries its value
        #[test]
        fn later_scalar_wins(a in flat_mapping(), b in flat_mapping()) {
            let result = merged(&a, &b);
            for (key, value) in &b {
                prop_assert_eq!(result.get(key), Some(value));
            }
            for (key, value) in &a {
                if !b.contains_key(key) {
                    prop_assert_eq!(result.get(key), Some(value));
                }
            }
        }

        /// Property: earlier keys keep their order, new keys follow in source order
        #[test]
        fn key_order_is_earlier_then_appended(a in flat_mapping(), b in flat_mapping()) {
            let result = merged(&a, &b);
            let mut expected: Vec<&Value> = a.keys().collect();
            expected.extend(b.keys().filter(|k| !a.contains_key(*k)));
            let actual: Vec<&Value> = result.keys().collect();
            prop_assert_eq!(actual, expected);
        }

        /// Property: merging is deterministic, down to serialised bytes
        #[test]
        fn merge_is_deterministic(a in nested_value(), b in nested_value()) {
            let mut first = a.clone();
            merge_yaml_values(&mut first, &b, "", "b.yml");
            let mut second = a.clone();
            merge_yaml_values(&mut second, &b, "", "b.yml");
            prop_assert_eq!(
                serde_yaml::to_string(&first).unwrap(),
                serde_yaml::to_string(&second).unwrap()
            );
        }

        /// Property: an empty later document changes nothing
        #[test]
        fn empty_source_is_identity(a in flat_mapping()) {
            prop_assert_eq!(merged(&a, &Mapping::new()), a);
        }

        /// Property: merging a value into itself is a no-op
        #[test]
        fn self_merge_is_idempotent(a in nested_value()) {
            let mut target = a.clone();
            merge_yaml_values(&mut target, &a, "", "a.yml");
            prop_assert_eq!(target, a);
        }

        /// Property: sequences are replaced, never concatenated
        #[test]
        fn sequences_are_replaced(
            first in prop::collection::vec("[a-z]{1,3}", 0..5),
            second in prop::collection::vec("[a-z]{1,3}", 0..5),
        ) {
            let mut a = Mapping::new();
            a.insert(Value::from("target"), Value::from(first));
            let mut b = Mapping::new();
            b.insert(Value::from("target"), Value::from(second.clone()));
            let result = merged(&a, &b);
            prop_assert_eq!(result.get("target"), Some(&Value::from(second)));
        }
    }
}
