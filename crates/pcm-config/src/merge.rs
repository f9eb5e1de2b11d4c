//! Layer merging on untyped config trees.

use serde_yaml::{Mapping, Value};

/// Merge `overlay` into `base`.
///
/// Mappings merge key by key, recursively. Any other value in the overlay
/// (scalar, sequence, null) replaces the base value outright; sequences are
/// never concatenated.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                let nested = matches!(
                    (base_map.get(&key), &value),
                    (Some(Value::Mapping(_)), Value::Mapping(_))
                );
                if nested {
                    if let Some(existing) = base_map.get_mut(&key) {
                        deep_merge(existing, value);
                    }
                } else {
                    base_map.insert(key, value);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Build a single-leaf tree `{a: {b: value}}` for the key path `[a, b]`.
pub fn nested_value(path: &[&str], value: Value) -> Value {
    path.iter().rev().fold(value, |inner, key| {
        let mut map = Mapping::new();
        map.insert(Value::from(*key), inner);
        Value::Mapping(map)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_nested_maps_merge() {
        let mut base = yaml("logging: {level: INFO, backup_count: 5}\nglobal_timeout: 600");
        deep_merge(&mut base, yaml("logging: {level: DEBUG}"));
        assert_eq!(
            base,
            yaml("logging: {level: DEBUG, backup_count: 5}\nglobal_timeout: 600")
        );
    }

    #[test]
    fn test_lists_replace() {
        let mut base = yaml("tools: {a: {default_args: [x, y]}}");
        deep_merge(&mut base, yaml("tools: {a: {default_args: [z]}}"));
        assert_eq!(base, yaml("tools: {a: {default_args: [z]}}"));
    }

    #[test]
    fn test_scalar_replaces_map() {
        let mut base = yaml("profiles: {fast: {global_timeout: 5}}");
        deep_merge(&mut base, yaml("profiles: null"));
        assert_eq!(base, yaml("profiles: null"));
    }

    #[test]
    fn test_merge_into_null_root() {
        let mut base = Value::Null;
        deep_merge(&mut base, yaml("global_timeout: 30"));
        assert_eq!(base, yaml("global_timeout: 30"));
    }

    #[test]
    fn test_nested_value() {
        let tree = nested_value(&["logging", "level"], Value::from("WARN"));
        assert_eq!(tree, yaml("logging: {level: WARN}"));
    }

    proptest! {
        #[test]
        fn prop_overlay_scalar_always_wins(
            base_val in any::<i64>(),
            overlay_val in any::<i64>(),
            key in "[a-z]{1,8}",
        ) {
            let mut base = nested_value(&["outer", key.as_str()], Value::from(base_val));
            deep_merge(&mut base, nested_value(&["outer", key.as_str()], Value::from(overlay_val)));
            prop_assert_eq!(base, nested_value(&["outer", key.as_str()], Value::from(overlay_val)));
        }

        #[test]
        fn prop_disjoint_keys_are_kept(
            a in "[a-m]{1,6}",
            b in "[n-z]{1,6}",
        ) {
            let mut base = nested_value(&["tools", a.as_str()], Value::from(1));
            deep_merge(&mut base, nested_value(&["tools", b.as_str()], Value::from(2)));
            let tools = base.get("tools").and_then(Value::as_mapping).unwrap();
            prop_assert_eq!(tools.len(), 2);
        }
    }
}
