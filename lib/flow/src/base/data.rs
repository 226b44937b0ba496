use serde_json::Value;
use smartstring::{LazyCompact, SmartString};
use std::collections::BTreeMap;

use super::PortName;

/// A task's input or output, keyed by port name.
///
/// Values are plain JSON. Cloning is not free, but port maps are
/// small; big payloads should be carried by streams instead.
pub type PortMap = BTreeMap<PortName, Value>;

/// A task's static configuration, keyed by parameter name.
pub type ConfigMap = BTreeMap<SmartString<LazyCompact>, Value>;

/// Collect a port map into a JSON object.
pub fn port_map_to_value(map: &PortMap) -> Value {
	Value::Object(
		map.iter()
			.map(|(k, v)| (k.id().to_string(), v.clone()))
			.collect(),
	)
}

/// Split a JSON object into a port map.
/// Anything that isn't an object produces an empty map.
pub fn value_to_port_map(value: &Value) -> PortMap {
	match value {
		Value::Object(entries) => entries
			.iter()
			.map(|(k, v)| (PortName::new(k), v.clone()))
			.collect(),
		_ => PortMap::new(),
	}
}

/// Is this JSON value an empty object, empty string, or null?
pub fn is_empty_value(value: &Value) -> bool {
	match value {
		Value::Null => true,
		Value::Object(entries) => entries.is_empty(),
		Value::String(s) => s.is_empty(),
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn object_round_trip() {
		let map = value_to_port_map(&json!({"x": 1, "y": "two"}));
		assert_eq!(map.len(), 2);
		assert_eq!(map.get(&PortName::new("x")), Some(&json!(1)));
		assert_eq!(port_map_to_value(&map), json!({"x": 1, "y": "two"}));
	}

	#[test]
	fn non_object_is_empty() {
		assert!(value_to_port_map(&json!(42)).is_empty());
		assert!(value_to_port_map(&json!(null)).is_empty());
	}

	#[test]
	fn emptiness() {
		assert!(is_empty_value(&json!(null)));
		assert!(is_empty_value(&json!({})));
		assert!(is_empty_value(&json!("")));
		assert!(!is_empty_value(&json!({"a": 1})));
		assert!(!is_empty_value(&json!(0)));
	}
}
