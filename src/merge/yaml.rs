//! Recursive merge of configuration values
//!
//! Two mappings merge key by key: keys already present keep their position,
//! new keys are appended in source order, and a key whose old and new values
//! are both mappings is merged recursively. Any other combination (scalars,
//! sequences, mismatched types) is a plain replacement by the later value.
//! Sequences are never concatenated.

use log::trace;
use serde_yaml::{Mapping, Value as YamlValue};

/// Recursively merge `source` into `target`.
///
/// # Arguments
///
/// * `target` - The earlier value, modified in place
/// * `source` - The later value, which wins on conflicts
/// * `path` - Dotted location of `target`, for tracing
/// * `src_file` - Document `source` came from, for tracing
pub fn merge_yaml_values(target: &mut YamlValue, source: &YamlValue, path: &str, src_file: &str) {
    match (target, source) {
        (YamlValue::Mapping(target_map), YamlValue::Mapping(source_map)) => {
            merge_mappings(target_map, source_map, path, src_file);
        }
        (target, source) => {
            if !matches!(target, YamlValue::Null) && target != source {
                trace!(
                    "{}: replacing {} at '{}' with {}",
                    src_file,
                    get_yaml_type_name(target),
                    path,
                    get_yaml_type_name(source)
                );
            }
            *target = source.clone();
        }
    }
}

/// Merge `source` into `target` key by key.
pub fn merge_mappings(target: &mut Mapping, source: &Mapping, path: &str, src_file: &str) {
    for (key, value) in source {
        let key_str = match key {
            YamlValue::String(s) => s.clone(),
            _ => format!("{:?}", key),
        };
        let new_path = if path.is_empty() {
            key_str
        } else {
            format!("{}.{}", path, key_str)
        };

        match target.get_mut(key) {
            Some(existing) => merge_yaml_values(existing, value, &new_path, src_file),
            None => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Get a human-readable type name for a YAML value
pub fn get_yaml_type_name(value: &YamlValue) -> &'static str {
    match value {
        YamlValue::Null => "Null",
        YamlValue::Bool(_) => "Bool",
        YamlValue::Number(_) => "Number",
        YamlValue::String(_) => "String",
        YamlValue::Sequence(_) => "Sequence",
        YamlValue::Mapping(_) => "Mapping",
        YamlValue::Tagged(_) => "Tagged",
    }
}
