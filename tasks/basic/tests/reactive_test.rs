mod common;

use serde_json::json;

use common::{dispatcher, init_logging, make_task, ports};
use gantry_flow::{
	base::{PortMap, PortName, TaskId},
	graph::TaskGraph,
	registry::ServiceRegistry,
	runner::{GraphRunner, RunConfig},
};

fn chain() -> TaskGraph {
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

#[tokio::test]
async fn reactive_replay_refreshes_derived_values() {
	init_logging();
	let mut graph = chain();
	let mut runner = GraphRunner::with_registry(ServiceRegistry::new());

	let leaves = runner
		.run(&mut graph, PortMap::new(), RunConfig::default())
		.await
		.unwrap();
	assert_eq!(leaves[0].data, ports(json!({"y": 3})));

	// Change a static input, then replay without re-running `a`
	graph
		.get_task_mut(&TaskId::new("b"))
		.unwrap()
		.set_input(ports(json!({"b": 10})));

	let leaves = runner.run_reactive(&mut graph, PortMap::new()).await.unwrap();
	assert_eq!(leaves.len(), 1);
	assert_eq!(leaves[0].id, TaskId::new("b"));
	assert_eq!(leaves[0].data, ports(json!({"y": 11})));
}

#[tokio::test]
async fn reactive_replay_keeps_buffers_without_overrides() {
	init_logging();
	let mut graph = chain();
	let mut runner = GraphRunner::with_registry(ServiceRegistry::new());

	runner
		.run(&mut graph, PortMap::new(), RunConfig::default())
		.await
		.unwrap();

	// No changes: the replay derives the same leaves
	let leaves = runner.run_reactive(&mut graph, PortMap::new()).await.unwrap();
	assert_eq!(leaves[0].data, ports(json!({"y": 3})));
}
