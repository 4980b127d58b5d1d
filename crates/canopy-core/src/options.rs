//! Layered option merging
//!
//! Options are plain JSON objects. A node's effective options are built from
//! three layers, later layers winning:
//!
//! 1. defaults declared by the component type
//! 2. options declared in the parent's children definition
//! 3. extended options pushed down by an ancestor
//!
//! Nested objects merge key by key; every other value (including arrays)
//! replaces the earlier layer's value whole.

use serde_json::{Map, Value};

/// Configuration record of a node.
pub type Options = Map<String, Value>;

/// Merge `source` into `target`, recursing into nested objects.
pub fn deep_merge(target: &mut Options, source: &Options) {
    for (key, incoming) in source {
        match (target.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) => deep_merge(existing, nested),
            _ => {
                target.insert(key.clone(), incoming.clone());
            }
        }
    }
}

/// Merge `source` into a JSON value, replacing it unless both sides are objects.
pub fn deep_merge_value(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(existing), Value::Object(nested)) => deep_merge(existing, nested),
        (slot, _) => *slot = source.clone(),
    }
}

/// Build effective options from defaults, declared options and extended options.
#[must_use]
pub fn merge_layers(defaults: &Options, declared: &Options, extended: Option<&Options>) -> Options {
    let mut merged = defaults.clone();
    deep_merge(&mut merged, declared);
    if let Some(extended) = extended {
        deep_merge(&mut merged, extended);
    }
    merged
}

/// Read a boolean option, falling back to `default` when absent or mistyped.
#[must_use]
pub fn flag(options: &Options, name: &str, default: bool) -> bool {
    options.get(name).and_then(Value::as_bool).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn obj(value: Value) -> Options {
        match value {
            Value::Object(map) => map,
            _ => Options::new(),
        }
    }

    #[test]
    fn test_nested_objects_merge() {
        let mut target = obj(json!({"style": {"color": "red", "size": 1}, "label": "a"}));
        deep_merge(&mut target, &obj(json!({"style": {"size": 2}})));
        assert_eq!(
            Value::Object(target),
            json!({"style": {"color": "red", "size": 2}, "label": "a"})
        );
    }

    #[test]
    fn test_arrays_replace() {
        let mut target = obj(json!({"items": [1, 2, 3]}));
        deep_merge(&mut target, &obj(json!({"items": [4]})));
        assert_eq!(target["items"], json!([4]));
    }

    #[test]
    fn test_extended_wins_over_declared() {
        let defaults = obj(json!({"visible": true, "readOnly": false}));
        let declared = obj(json!({"readOnly": true, "label": "Name"}));
        let extended = obj(json!({"label": "Full name"}));
        let merged = merge_layers(&defaults, &declared, Some(&extended));
        assert_eq!(
            Value::Object(merged),
            json!({"visible": true, "readOnly": true, "label": "Full name"})
        );
    }

    #[test]
    fn test_flag_defaults_on_mistyped() {
        let options = obj(json!({"visible": "yes"}));
        assert!(flag(&options, "visible", true));
        assert!(!flag(&options, "missing", false));
    }

    proptest! {
        #[test]
        fn prop_later_layers_win(
            defaults in proptest::collection::btree_map("[a-d]", 0i64..100, 0..4),
            declared in proptest::collection::btree_map("[a-d]", 100i64..200, 0..4),
            extended in proptest::collection::btree_map("[a-d]", 200i64..300, 0..4),
        ) {
            let to_options = |m: &std::collections::BTreeMap<String, i64>| -> Options {
                m.iter().map(|(k, v)| (k.clone(), json!(v))).collect()
            };
            let merged = merge_layers(&to_options(&defaults), &to_options(&declared), Some(&to_options(&extended)));
            for key in ["a", "b", "c", "d"] {
                let expected = extended.get(key).or_else(|| declared.get(key)).or_else(|| defaults.get(key));
                prop_assert_eq!(merged.get(key).and_then(Value::as_i64), expected.copied());
            }
        }
    }
}
