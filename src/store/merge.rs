//! Deep-merge for JSON documents.
//!
//! Merge rules, expressed as a tagged [`Patch`] so each case is independently
//! testable:
//!
//! - object-valued fields merge recursively ([`Patch::Merge`])
//! - array-valued and scalar fields are replaced wholesale ([`Patch::Replace`])
//! - an explicit `null` overwrites the field to `null` ([`Patch::Clear`])
//! - an absent key leaves the existing value untouched (not represented)

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// One field of a document patch.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// Recursively merge into the existing object (creating one if the
    /// target is not an object).
    Merge(BTreeMap<String, Patch>),
    /// Replace the field wholesale. Arrays land here — they are never
    /// concatenated or element-merged.
    Replace(Value),
    /// Explicitly set the field to `null`.
    Clear,
}

impl Patch {
    /// Interpret a plain JSON value as a patch: objects merge, `null`
    /// clears, everything else replaces.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Patch::Clear,
            Value::Object(map) => Patch::Merge(
                map.into_iter()
                    .map(|(k, v)| (k, Patch::from_value(v)))
                    .collect(),
            ),
            other => Patch::Replace(other),
        }
    }

    /// Apply the patch to `target` in place. Pure in the sense that the
    /// outcome depends only on `self` and the prior value of `target`.
    pub fn apply(self, target: &mut Value) {
        match self {
            Patch::Clear => *target = Value::Null,
            Patch::Replace(value) => *target = value,
            Patch::Merge(fields) => {
                if !target.is_object() {
                    *target = Value::Object(Map::new());
                }
                if let Some(obj) = target.as_object_mut() {
                    for (key, patch) in fields {
                        patch.apply(obj.entry(key).or_insert(Value::Null));
                    }
                }
            }
        }
    }
}

/// Merge `patch` into `target` using the document merge rules.
pub fn deep_merge(target: &mut Value, patch: Value) {
    Patch::from_value(patch).apply(target);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objects_merge_recursively() {
        let mut doc = json!({"a": 1, "b": {"c": 2}});
        deep_merge(&mut doc, json!({"b": {"d": 3}}));
        assert_eq!(doc, json!({"a": 1, "b": {"c": 2, "d": 3}}));
    }

    #[test]
    fn arrays_replace_wholesale() {
        let mut doc = json!({"arr": [1, 2, 3]});
        deep_merge(&mut doc, json!({"arr": [1]}));
        assert_eq!(doc, json!({"arr": [1]}));
    }

    #[test]
    fn null_overwrites() {
        let mut doc = json!({"a": 1, "b": 2});
        deep_merge(&mut doc, json!({"b": null}));
        assert_eq!(doc, json!({"a": 1, "b": null}));
    }

    #[test]
    fn absent_key_left_untouched() {
        let mut doc = json!({"a": 1, "b": {"c": 2}});
        deep_merge(&mut doc, json!({"b": {}}));
        assert_eq!(doc, json!({"a": 1, "b": {"c": 2}}));
    }

    #[test]
    fn scalar_patch_replaces_object() {
        let mut doc = json!({"a": {"nested": true}});
        deep_merge(&mut doc, json!({"a": 5}));
        assert_eq!(doc, json!({"a": 5}));
    }

    #[test]
    fn merge_into_non_object_creates_object() {
        let mut doc = json!({"a": 5});
        deep_merge(&mut doc, json!({"a": {"b": 1}}));
        assert_eq!(doc, json!({"a": {"b": 1}}));
    }

    proptest::proptest! {
        /// For flat string→integer maps: every patched key carries the patch
        /// value afterwards, every unpatched key keeps its original value.
        #[test]
        fn flat_merge_overrides_and_preserves(
            base in proptest::collection::btree_map("[a-e]", -100i64..100, 0..6),
            patch in proptest::collection::btree_map("[a-e]", -100i64..100, 0..6),
        ) {
            let mut doc = json!(base);
            deep_merge(&mut doc, json!(patch));

            for (k, v) in &patch {
                proptest::prop_assert_eq!(doc.get(k), Some(&json!(v)));
            }
            for (k, v) in &base {
                if !patch.contains_key(k) {
                    proptest::prop_assert_eq!(doc.get(k), Some(&json!(v)));
                }
            }
        }
    }
}
