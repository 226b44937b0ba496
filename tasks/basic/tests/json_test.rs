mod common;

use serde_json::json;

use common::{dispatcher, init_logging, make_task, ports};
use gantry_flow::{
	base::{PortName, TaskId},
	graph::TaskGraph,
	json::{GraphJson, GraphLoadError},
};

fn sample_graph() -> TaskGraph {
	let dispatcher = dispatcher();
	let mut graph = TaskGraph::new();

	graph
		.add_task(make_task(&dispatcher, "Constant", "a", json!({"value": {"x": 1}})))
		.unwrap();

	let mut add = make_task(&dispatcher, "Math", "b", json!({"op": "add"}));
	add.set_input(ports(json!({"b": 2})));
	graph.add_task(add).unwrap();

	graph
		.add_edge(
			TaskId::new("a"),
			PortName::new("x"),
			TaskId::new("b"),
			PortName::new("a"),
		)
		.unwrap();

	return graph;
}

#[test]
fn round_trip_is_the_identity() {
	init_logging();
	let graph = sample_graph();
	let json = graph.to_json();

	let loaded = TaskGraph::from_json(&json, &dispatcher()).unwrap();
	assert_eq!(loaded.to_json(), json);

	// Also identical through serde itself
	let serialized = serde_json::to_value(&json).unwrap();
	let parsed: GraphJson = serde_json::from_value(serialized.clone()).unwrap();
	assert_eq!(serde_json::to_value(&parsed).unwrap(), serialized);
}

#[test]
fn serialized_shape_is_stable() {
	let json = serde_json::to_value(sample_graph().to_json()).unwrap();

	assert_eq!(
		json,
		json!({
			"tasks": [
				{"id": "a", "type": "Constant", "config": {"value": {"x": 1}}},
				{"id": "b", "type": "Math", "config": {"op": "add"}, "input": {"b": 2}},
			],
			"dataflows": [
				{
					"sourceTaskId": "a",
					"sourceTaskPortId": "x",
					"targetTaskId": "b",
					"targetTaskPortId": "a",
				},
			],
		})
	);
}

#[test]
fn dependency_form_keys_by_target() {
	let graph = sample_graph();
	let deps = graph.to_dependency_json();

	assert_eq!(deps.tasks.len(), 2);
	let into_b = deps.dependencies.get(&TaskId::new("b")).unwrap();
	assert_eq!(into_b.len(), 1);
	assert_eq!(into_b[0].source_task_id, TaskId::new("a"));
	assert_eq!(into_b[0].source_task_port_id, PortName::new("x"));
	assert_eq!(into_b[0].target_task_port_id, PortName::new("a"));
}

#[test]
fn unknown_task_type_is_rejected() {
	let json: GraphJson = serde_json::from_value(json!({
		"tasks": [{"id": "x", "type": "NoSuchTask"}],
		"dataflows": [],
	}))
	.unwrap();

	let err = TaskGraph::from_json(&json, &dispatcher()).unwrap_err();
	assert!(matches!(err, GraphLoadError::BadTaskType { .. }));
}

#[test]
fn serialized_cycles_are_rejected() {
	let json: GraphJson = serde_json::from_value(json!({
		"tasks": [
			{"id": "a", "type": "Sum"},
			{"id": "b", "type": "Sum"},
		],
		"dataflows": [
			{"sourceTaskId": "a", "sourceTaskPortId": "result", "targetTaskId": "b", "targetTaskPortId": "values"},
			{"sourceTaskId": "b", "sourceTaskPortId": "result", "targetTaskId": "a", "targetTaskPortId": "values"},
		],
	}))
	.unwrap();

	let err = TaskGraph::from_json(&json, &dispatcher()).unwrap_err();
	assert!(matches!(err, GraphLoadError::Graph(_)));
}
