mod common;

use async_trait::async_trait;
use serde_json::json;
use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc,
};

use common::{init_logging, ports};
use gantry_flow::{
	base::{ExecContext, PortMap, RunTaskError, Task, TaskExecutor, TaskId, TaskSpec},
	cache::{CacheChoice, MemoryCache},
	graph::TaskGraph,
	registry::ServiceRegistry,
	runner::{GraphRunner, RunConfig},
};

/// A cacheable constant that counts how often `execute` actually ran
struct Counted {
	spec: TaskSpec,
	calls: Arc<AtomicUsize>,
}

impl Counted {
	fn new(calls: Arc<AtomicUsize>) -> Arc<Self> {
		let mut spec = TaskSpec::new("Counted");
		spec.cacheable = true;
		Arc::new(Self { spec, calls })
	}
}

#[async_trait]
impl TaskExecutor for Counted {
	fn spec(&self) -> &TaskSpec {
		&self.spec
	}

	async fn execute(&self, _input: &PortMap, _ctx: &ExecContext) -> Result<PortMap, RunTaskError> {
		self.calls.fetch_add(1, Ordering::Relaxed);
		Ok(ports(json!({"n": 42})))
	}
}

fn counted_graph(calls: &Arc<AtomicUsize>) -> TaskGraph {
	let mut graph = TaskGraph::new();
	graph
		.add_task(Task::new(TaskId::new("c"), Counted::new(calls.clone())))
		.unwrap();
	return graph;
}

#[tokio::test]
async fn second_run_is_served_from_the_cache() {
	init_logging();
	let calls = Arc::new(AtomicUsize::new(0));
	let mut graph = counted_graph(&calls);

	let cache = Arc::new(MemoryCache::new());
	let mut runner = GraphRunner::with_registry(ServiceRegistry::new());

	let mut leaves = Vec::new();
	for _ in 0..2 {
		let run = runner
			.run(
				&mut graph,
				PortMap::new(),
				RunConfig {
					cache: CacheChoice::Instance(cache.clone()),
					..Default::default()
				},
			)
			.await
			.unwrap();
		leaves.push(run);
	}

	// `execute` ran once; the second run hit the cache but produced
	// identical leaves
	assert_eq!(calls.load(Ordering::Relaxed), 1);
	assert_eq!(leaves[0], leaves[1]);
	assert_eq!(leaves[0][0].data, ports(json!({"n": 42})));
	assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn run_config_can_disable_caching() {
	init_logging();
	let calls = Arc::new(AtomicUsize::new(0));
	let mut graph = counted_graph(&calls);

	let cache = Arc::new(MemoryCache::new());
	let mut runner = GraphRunner::with_registry(ServiceRegistry::new());

	for _ in 0..2 {
		runner
			.run(
				&mut graph,
				PortMap::new(),
				RunConfig {
					cacheable: Some(false),
					cache: CacheChoice::Instance(cache.clone()),
					..Default::default()
				},
			)
			.await
			.unwrap();
	}

	assert_eq!(calls.load(Ordering::Relaxed), 2);
	assert_eq!(cache.len().await, 0);
}

#[tokio::test]
async fn default_cache_comes_from_the_registry() {
	init_logging();
	let calls = Arc::new(AtomicUsize::new(0));
	let mut graph = counted_graph(&calls);

	let registry = ServiceRegistry::new();
	registry.set_default_cache(Arc::new(MemoryCache::new()));

	let mut runner = GraphRunner::with_registry(registry);
	for _ in 0..2 {
		runner
			.run(&mut graph, PortMap::new(), RunConfig::default())
			.await
			.unwrap();
	}

	assert_eq!(calls.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn without_a_cache_every_run_executes() {
	init_logging();
	let calls = Arc::new(AtomicUsize::new(0));
	let mut graph = counted_graph(&calls);

	let mut runner = GraphRunner::with_registry(ServiceRegistry::new());
	for _ in 0..2 {
		runner
			.run(
				&mut graph,
				PortMap::new(),
				RunConfig {
					cache: CacheChoice::Disabled,
					..Default::default()
				},
			)
			.await
			.unwrap();
	}

	assert_eq!(calls.load(Ordering::Relaxed), 2);
}
