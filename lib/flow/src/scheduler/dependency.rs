use std::collections::HashSet;
use tracing::trace;

use super::{NextTask, Scheduler};
use crate::{
	base::{StreamMode, TaskId},
	graph::TaskGraph,
};

/// The default scheduler: a task becomes ready as soon as every
/// dependency has completed. Streamable consumers additionally accept
/// sources that are still streaming, so pipelines overlap.
///
/// Tasks disabled by branch pruning are dropped from `pending` on
/// every callback. Ties among ready tasks follow topological order.
pub struct DependencyScheduler {
	/// Not yet handed out, in topological order
	pending: Vec<TaskId>,

	completed: HashSet<TaskId>,
	streaming: HashSet<TaskId>,
}

impl DependencyScheduler {
	pub fn new() -> Self {
		Self {
			pending: Vec::new(),
			completed: HashSet::new(),
			streaming: HashSet::new(),
		}
	}

	/// Drop pending tasks that were disabled by branch pruning
	fn prune_disabled(&mut self, graph: &TaskGraph) {
		self.pending.retain(|task_id| {
			graph
				.get_task(task_id)
				.map(|t| !t.status().is_disabled())
				.unwrap_or(false)
		});
	}

	fn is_ready(&self, graph: &TaskGraph, task_id: &TaskId) -> bool {
		let Some(task) = graph.get_task(task_id) else {
			return false;
		};

		if task.status().is_disabled() {
			return false;
		}

		let in_edges = graph.edges_into(task_id);

		// A task whose every input was pruned is itself about to be
		// pruned; never hand it out.
		if !in_edges.is_empty()
			&& in_edges.iter().all(|edge_id| {
				graph
					.get_edge(edge_id)
					.map(|e| e.status().is_disabled())
					.unwrap_or(true)
			}) {
			return false;
		}

		let accepts_streams = task.streamable() && task.stream_mode() != StreamMode::None;

		for edge_id in in_edges {
			let Some(edge) = graph.get_edge(edge_id) else {
				continue;
			};
			if edge.status().is_disabled() {
				continue;
			}

			let source = edge.source_task();
			if self.completed.contains(source) {
				continue;
			}
			if accepts_streams && self.streaming.contains(source) {
				continue;
			}
			return false;
		}

		return true;
	}
}

impl Scheduler for DependencyScheduler {
	fn reset(&mut self, graph: &TaskGraph) {
		self.pending = graph.topologically_sorted();
		self.completed.clear();
		self.streaming.clear();
	}

	fn next(&mut self, graph: &TaskGraph) -> NextTask {
		self.prune_disabled(graph);

		if self.pending.is_empty() {
			return NextTask::Finished;
		}

		let ready = self
			.pending
			.iter()
			.position(|task_id| self.is_ready(graph, task_id));

		match ready {
			Some(i) => {
				let task_id = self.pending.remove(i);
				trace!(message = "Scheduling task", task_id = %task_id);
				NextTask::Run(task_id)
			}
			None => NextTask::Wait,
		}
	}

	fn on_task_completed(&mut self, graph: &TaskGraph, task_id: &TaskId) {
		self.streaming.remove(task_id);
		self.completed.insert(task_id.clone());
		self.prune_disabled(graph);
	}

	fn on_task_streaming(&mut self, graph: &TaskGraph, task_id: &TaskId) {
		self.streaming.insert(task_id.clone());
		self.prune_disabled(graph);
	}
}

#[cfg(test)]
mod tests {
	use async_trait::async_trait;
	use std::sync::Arc;

	use super::*;
	use crate::{
		base::{
			ExecContext, PortMap, PortName, RunTaskError, Task, TaskExecutor, TaskSpec, TaskStatus,
		},
		graph::TaskGraph,
	};

	struct Stub {
		spec: TaskSpec,
	}

	impl Stub {
		fn new(streamable: bool) -> Arc<Self> {
			let mut spec = TaskSpec::new("Stub");
			spec.streamable = streamable;
			Arc::new(Self { spec })
		}
	}

	#[async_trait]
	impl TaskExecutor for Stub {
		fn spec(&self) -> &TaskSpec {
			&self.spec
		}

		async fn execute(
			&self,
			_input: &PortMap,
			_ctx: &ExecContext,
		) -> Result<PortMap, RunTaskError> {
			Ok(PortMap::new())
		}
	}

	fn chain() -> TaskGraph {
		let mut graph = TaskGraph::new();
		for id in ["a", "b"] {
			graph
				.add_task(Task::new(TaskId::new(id), Stub::new(false)))
				.unwrap();
		}
		graph
			.add_edge(
				TaskId::new("a"),
				PortName::new("out"),
				TaskId::new("b"),
				PortName::new("in"),
			)
			.unwrap();
		return graph;
	}

	#[test]
	fn dependents_wait_for_completion() {
		let graph = chain();
		let mut scheduler = DependencyScheduler::new();
		scheduler.reset(&graph);

		assert_eq!(scheduler.next(&graph), NextTask::Run(TaskId::new("a")));
		assert_eq!(scheduler.next(&graph), NextTask::Wait);

		scheduler.on_task_completed(&graph, &TaskId::new("a"));
		assert_eq!(scheduler.next(&graph), NextTask::Run(TaskId::new("b")));
		assert_eq!(scheduler.next(&graph), NextTask::Finished);
	}

	#[test]
	fn streaming_unlocks_streamable_consumers_only() {
		let mut graph = TaskGraph::new();
		graph
			.add_task(Task::new(TaskId::new("src"), Stub::new(true)))
			.unwrap();

		let mut sink = Task::new(TaskId::new("sink"), Stub::new(true));
		sink.set_stream_mode(crate::base::StreamMode::Append);
		graph.add_task(sink).unwrap();

		// Streamable, but its instance opted out of streaming
		graph
			.add_task(Task::new(TaskId::new("batch"), Stub::new(true)))
			.unwrap();

		for target in ["sink", "batch"] {
			graph
				.add_edge(
					TaskId::new("src"),
					PortName::new("out"),
					TaskId::new(target),
					PortName::new("in"),
				)
				.unwrap();
		}

		let mut scheduler = DependencyScheduler::new();
		scheduler.reset(&graph);

		assert_eq!(scheduler.next(&graph), NextTask::Run(TaskId::new("src")));
		assert_eq!(scheduler.next(&graph), NextTask::Wait);

		scheduler.on_task_streaming(&graph, &TaskId::new("src"));
		assert_eq!(scheduler.next(&graph), NextTask::Run(TaskId::new("sink")));
		assert_eq!(scheduler.next(&graph), NextTask::Wait);

		scheduler.on_task_completed(&graph, &TaskId::new("src"));
		assert_eq!(scheduler.next(&graph), NextTask::Run(TaskId::new("batch")));
	}

	#[test]
	fn disabled_tasks_are_pruned() {
		let mut graph = chain();
		graph
			.get_task_mut(&TaskId::new("b"))
			.unwrap()
			.set_status(TaskStatus::Disabled);

		let mut scheduler = DependencyScheduler::new();
		scheduler.reset(&graph);

		assert_eq!(scheduler.next(&graph), NextTask::Run(TaskId::new("a")));
		scheduler.on_task_completed(&graph, &TaskId::new("a"));
		assert_eq!(scheduler.next(&graph), NextTask::Finished);
	}
}
