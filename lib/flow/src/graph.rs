//! The DAG container: tasks and dataflows keyed by id.
//!
//! The graph exclusively owns its tasks and edges; everything else
//! addresses them by id. Insertion order is retained and breaks ties
//! in topological order.

use petgraph::{algo::toposort, graphmap::GraphMap, Directed};
use std::{
	collections::HashMap,
	sync::Arc,
};
use tracing::trace;

use crate::{
	base::{EdgeId, GraphError, PortName, Task, TaskId, TaskStatus},
	edge::Dataflow,
	events::{Emitter, GraphEvent, Subscription},
};

/// A directed acyclic multi-graph of tasks and dataflows.
pub struct TaskGraph {
	tasks: HashMap<TaskId, Task>,
	task_order: Vec<TaskId>,

	edges: HashMap<EdgeId, Dataflow>,
	edge_order: Vec<EdgeId>,

	/// Edge ids ending at each task, in insertion order
	edges_in: HashMap<TaskId, Vec<EdgeId>>,

	/// Edge ids starting at each task, in insertion order
	edges_out: HashMap<TaskId, Vec<EdgeId>>,

	events: Arc<Emitter<GraphEvent>>,
}

impl TaskGraph {
	/// Create an empty graph
	pub fn new() -> Self {
		Self {
			tasks: HashMap::new(),
			task_order: Vec::new(),
			edges: HashMap::new(),
			edge_order: Vec::new(),
			edges_in: HashMap::new(),
			edges_out: HashMap::new(),
			events: Arc::new(Emitter::new()),
		}
	}

	pub fn events(&self) -> &Arc<Emitter<GraphEvent>> {
		&self.events
	}

	//
	// MARK: Tasks
	//

	/// Add a task to this graph.
	pub fn add_task(&mut self, task: Task) -> Result<(), GraphError> {
		let task_id = task.id().clone();
		if self.tasks.contains_key(&task_id) {
			return Err(GraphError::DuplicateTask { task_id });
		}

		self.forward_task_events(&task);

		self.task_order.push(task_id.clone());
		self.edges_in.entry(task_id.clone()).or_default();
		self.edges_out.entry(task_id.clone()).or_default();
		self.tasks.insert(task_id.clone(), task);

		self.events.emit(GraphEvent::TaskAdded { task_id });
		return Ok(());
	}

	/// Remove a task and every edge attached to it.
	pub fn remove_task(&mut self, task_id: &TaskId) -> Result<Task, GraphError> {
		if !self.tasks.contains_key(task_id) {
			return Err(GraphError::UnknownTask {
				task_id: task_id.clone(),
			});
		}

		let incident: Vec<EdgeId> = self
			.edges_in
			.get(task_id)
			.into_iter()
			.flatten()
			.chain(self.edges_out.get(task_id).into_iter().flatten())
			.cloned()
			.collect();
		for edge_id in incident {
			self.remove_edge(&edge_id).unwrap();
		}

		self.task_order.retain(|id| id != task_id);
		self.edges_in.remove(task_id);
		self.edges_out.remove(task_id);
		let task = self.tasks.remove(task_id).unwrap();

		self.events.emit(GraphEvent::TaskRemoved {
			task_id: task_id.clone(),
		});
		return Ok(task);
	}

	/// Swap a task in place, keeping its edges.
	/// The new task must carry the id of an existing task.
	pub fn replace_task(&mut self, task: Task) -> Result<Task, GraphError> {
		let task_id = task.id().clone();
		if !self.tasks.contains_key(&task_id) {
			return Err(GraphError::UnknownTask { task_id });
		}

		self.forward_task_events(&task);
		let old = self.tasks.insert(task_id.clone(), task).unwrap();

		self.events.emit(GraphEvent::TaskReplaced { task_id });
		return Ok(old);
	}

	pub fn get_task(&self, task_id: &TaskId) -> Option<&Task> {
		self.tasks.get(task_id)
	}

	pub fn get_task_mut(&mut self, task_id: &TaskId) -> Option<&mut Task> {
		self.tasks.get_mut(task_id)
	}

	/// The number of tasks in this graph
	pub fn len_tasks(&self) -> usize {
		self.tasks.len()
	}

	/// Iterate over all tasks, in insertion order
	pub fn iter_tasks(&self) -> impl Iterator<Item = &Task> {
		self.task_order.iter().map(|id| &self.tasks[id])
	}

	/// Task ids in insertion order
	pub fn task_ids(&self) -> &[TaskId] {
		&self.task_order
	}

	//
	// MARK: Edges
	//

	/// Add a dataflow between two existing tasks.
	///
	/// Fails with [`GraphError::UnknownTask`] when an endpoint is
	/// missing, [`GraphError::DuplicateEdge`] when the edge identity
	/// already exists, and [`GraphError::CycleDetected`] when the new
	/// edge would close a directed cycle. The graph is unchanged on
	/// every error.
	pub fn add_edge(
		&mut self,
		source_task: TaskId,
		source_port: PortName,
		target_task: TaskId,
		target_port: PortName,
	) -> Result<EdgeId, GraphError> {
		for endpoint in [&source_task, &target_task] {
			if !self.tasks.contains_key(endpoint) {
				return Err(GraphError::UnknownTask {
					task_id: endpoint.clone(),
				});
			}
		}

		let edge_id = EdgeId::derive(&source_task, &source_port, &target_task, &target_port);
		if self.edges.contains_key(&edge_id) {
			return Err(GraphError::DuplicateEdge { edge_id });
		}

		if self.would_create_cycle(&source_task, &target_task) {
			return Err(GraphError::CycleDetected { edge_id });
		}

		trace!(message = "Adding dataflow", edge_id = %edge_id);

		let edge = Dataflow::new(source_task.clone(), source_port, target_task.clone(), target_port);
		self.forward_edge_events(&edge);

		self.edge_order.push(edge_id.clone());
		self.edges_out.entry(source_task).or_default().push(edge_id.clone());
		self.edges_in.entry(target_task).or_default().push(edge_id.clone());
		self.edges.insert(edge_id.clone(), edge);

		self.events.emit(GraphEvent::DataflowAdded {
			edge_id: edge_id.clone(),
		});
		return Ok(edge_id);
	}

	/// Remove a dataflow.
	pub fn remove_edge(&mut self, edge_id: &EdgeId) -> Result<Dataflow, GraphError> {
		let Some(edge) = self.edges.remove(edge_id) else {
			return Err(GraphError::UnknownEdge {
				edge_id: edge_id.clone(),
			});
		};

		self.edge_order.retain(|id| id != edge_id);
		if let Some(out) = self.edges_out.get_mut(edge.source_task()) {
			out.retain(|id| id != edge_id);
		}
		if let Some(into) = self.edges_in.get_mut(edge.target_task()) {
			into.retain(|id| id != edge_id);
		}

		self.events.emit(GraphEvent::DataflowRemoved {
			edge_id: edge_id.clone(),
		});
		return Ok(edge);
	}

	/// Swap a dataflow in place.
	/// The new edge must carry the identity of an existing edge.
	pub fn replace_edge(&mut self, edge: Dataflow) -> Result<Dataflow, GraphError> {
		let edge_id = edge.id().clone();
		if !self.edges.contains_key(&edge_id) {
			return Err(GraphError::UnknownEdge { edge_id });
		}

		self.forward_edge_events(&edge);
		let old = self.edges.insert(edge_id.clone(), edge).unwrap();

		self.events.emit(GraphEvent::DataflowReplaced { edge_id });
		return Ok(old);
	}

	pub fn get_edge(&self, edge_id: &EdgeId) -> Option<&Dataflow> {
		self.edges.get(edge_id)
	}

	pub fn get_edge_mut(&mut self, edge_id: &EdgeId) -> Option<&mut Dataflow> {
		self.edges.get_mut(edge_id)
	}

	/// The number of edges in this graph
	pub fn len_edges(&self) -> usize {
		self.edges.len()
	}

	/// Iterate over all edges, in insertion order
	pub fn iter_edges(&self) -> impl Iterator<Item = &Dataflow> {
		self.edge_order.iter().map(|id| &self.edges[id])
	}

	/// Edge ids in insertion order
	pub fn edge_ids(&self) -> &[EdgeId] {
		&self.edge_order
	}

	/// All edges ending at the given task, in insertion order
	pub fn edges_into(&self, task_id: &TaskId) -> &[EdgeId] {
		self.edges_in.get(task_id).map(Vec::as_slice).unwrap_or(&[])
	}

	/// All edges starting at the given task, in insertion order
	pub fn edges_out_of(&self, task_id: &TaskId) -> &[EdgeId] {
		self.edges_out.get(task_id).map(Vec::as_slice).unwrap_or(&[])
	}

	//
	// MARK: Order
	//

	/// Would an edge from `source` to `target` close a cycle?
	fn would_create_cycle(&self, source: &TaskId, target: &TaskId) -> bool {
		if source == target {
			return true;
		}

		let index_of: HashMap<&TaskId, usize> = self
			.task_order
			.iter()
			.enumerate()
			.map(|(i, id)| (id, i))
			.collect();

		let mut fake_graph = GraphMap::<usize, (), Directed>::new();
		for edge in self.iter_edges() {
			fake_graph.add_edge(index_of[edge.source_task()], index_of[edge.target_task()], ());
		}
		fake_graph.add_edge(index_of[source], index_of[target], ());

		toposort(&fake_graph, None).is_err()
	}

	/// Task ids such that every edge goes forward.
	/// Ties are broken by insertion order.
	pub fn topologically_sorted(&self) -> Vec<TaskId> {
		let mut in_degree: HashMap<&TaskId, usize> = self
			.task_order
			.iter()
			.map(|id| (id, self.edges_into(id).len()))
			.collect();

		let mut sorted = Vec::with_capacity(self.task_order.len());
		let mut emitted: Vec<bool> = vec![false; self.task_order.len()];

		while sorted.len() < self.task_order.len() {
			let next = self
				.task_order
				.iter()
				.enumerate()
				.find(|(i, id)| !emitted[*i] && in_degree[id] == 0);

			// The graph is cycle-checked on every mutation
			let (i, task_id) = next.unwrap();
			emitted[i] = true;
			sorted.push(task_id.clone());

			for edge_id in self.edges_out_of(task_id) {
				let target = self.edges[edge_id].target_task();
				*in_degree.get_mut(target).unwrap() -= 1;
			}
		}

		return sorted;
	}

	//
	// MARK: Event forwarding
	//

	fn forward_task_events(&self, task: &Task) {
		let graph_events = self.events.clone();
		let task_id = task.id().clone();
		task.events().on(move |event| {
			graph_events.emit(GraphEvent::Task {
				task_id: task_id.clone(),
				event: event.clone(),
			});
		});
	}

	fn forward_edge_events(&self, edge: &Dataflow) {
		let graph_events = self.events.clone();
		let edge_id = edge.id().clone();
		edge.events().on(move |event| {
			graph_events.emit(GraphEvent::Dataflow {
				edge_id: edge_id.clone(),
				event: event.clone(),
			});
		});
	}

	/// Observe every task's status changes, including tasks added later
	pub fn subscribe_to_task_status(
		&self,
		callback: impl Fn(&TaskId, TaskStatus) + Send + Sync + 'static,
	) -> Subscription {
		self.events.on(move |event| {
			if let GraphEvent::Task {
				task_id,
				event: crate::events::TaskEvent::Status { status },
			} = event
			{
				callback(task_id, *status);
			}
		})
	}

	/// Observe every task's progress, including tasks added later
	pub fn subscribe_to_task_progress(
		&self,
		callback: impl Fn(&TaskId, f32) + Send + Sync + 'static,
	) -> Subscription {
		self.events.on(move |event| {
			if let GraphEvent::Task {
				task_id,
				event: crate::events::TaskEvent::Progress { progress },
			} = event
			{
				callback(task_id, *progress);
			}
		})
	}

	/// Observe every dataflow's status changes, including dataflows
	/// added later
	pub fn subscribe_to_dataflow_status(
		&self,
		callback: impl Fn(&EdgeId, TaskStatus) + Send + Sync + 'static,
	) -> Subscription {
		self.events.on(move |event| {
			if let GraphEvent::Dataflow {
				edge_id,
				event: crate::events::EdgeEvent::Status { status },
			} = event
			{
				callback(edge_id, *status);
			}
		})
	}
}

impl std::fmt::Debug for TaskGraph {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TaskGraph")
			.field("tasks", &self.task_order)
			.field("edges", &self.edge_order)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use async_trait::async_trait;
	use std::sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	};

	use super::*;
	use crate::base::{ExecContext, PortMap, RunTaskError, TaskExecutor, TaskSpec};

	struct Noop {
		spec: TaskSpec,
	}

	impl Noop {
		fn new() -> Arc<Self> {
			Arc::new(Self {
				spec: TaskSpec::new("Noop"),
			})
		}
	}

	#[async_trait]
	impl TaskExecutor for Noop {
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

	fn graph_with(ids: &[&str]) -> TaskGraph {
		let mut graph = TaskGraph::new();
		for id in ids {
			graph.add_task(Task::new(TaskId::new(id), Noop::new())).unwrap();
		}
		return graph;
	}

	fn connect(graph: &mut TaskGraph, source: &str, target: &str) -> Result<EdgeId, GraphError> {
		graph.add_edge(
			TaskId::new(source),
			PortName::new("out"),
			TaskId::new(target),
			PortName::new("in"),
		)
	}

	#[test]
	fn cycle_rejected_and_graph_unchanged() {
		let mut graph = graph_with(&["a", "b"]);
		connect(&mut graph, "a", "b").unwrap();

		let err = connect(&mut graph, "b", "a").unwrap_err();
		assert!(matches!(err, GraphError::CycleDetected { .. }));
		assert_eq!(graph.len_edges(), 1);

		// Self-loops are cycles too
		let err = connect(&mut graph, "a", "a").unwrap_err();
		assert!(matches!(err, GraphError::CycleDetected { .. }));
	}

	#[test]
	fn unknown_endpoint_rejected() {
		let mut graph = graph_with(&["a"]);
		let err = connect(&mut graph, "a", "ghost").unwrap_err();
		assert!(matches!(err, GraphError::UnknownTask { .. }));
		assert_eq!(graph.len_edges(), 0);
	}

	#[test]
	fn duplicate_edge_rejected() {
		let mut graph = graph_with(&["a", "b"]);
		connect(&mut graph, "a", "b").unwrap();

		let err = connect(&mut graph, "a", "b").unwrap_err();
		assert!(matches!(err, GraphError::DuplicateEdge { .. }));

		// A different port pair is a different identity
		graph
			.add_edge(
				TaskId::new("a"),
				PortName::new("other"),
				TaskId::new("b"),
				PortName::new("in"),
			)
			.unwrap();
		assert_eq!(graph.len_edges(), 2);
	}

	#[test]
	fn topological_order_breaks_ties_by_insertion() {
		let mut graph = graph_with(&["c", "a", "b", "sink"]);
		connect(&mut graph, "c", "sink").unwrap();
		connect(&mut graph, "a", "sink").unwrap();
		connect(&mut graph, "b", "sink").unwrap();

		let order = graph.topologically_sorted();
		let names: Vec<&str> = order.iter().map(|id| id.id().as_str()).collect();
		assert_eq!(names, vec!["c", "a", "b", "sink"]);
	}

	#[test]
	fn removing_a_task_removes_its_edges() {
		let mut graph = graph_with(&["a", "b", "c"]);
		connect(&mut graph, "a", "b").unwrap();
		connect(&mut graph, "b", "c").unwrap();

		graph.remove_task(&TaskId::new("b")).unwrap();
		assert_eq!(graph.len_tasks(), 2);
		assert_eq!(graph.len_edges(), 0);
		assert!(graph.edges_out_of(&TaskId::new("a")).is_empty());
	}

	#[test]
	fn status_subscription_covers_future_tasks() {
		let graph = Arc::new(std::sync::Mutex::new(graph_with(&[])));
		let seen = Arc::new(AtomicUsize::new(0));

		{
			let graph = graph.lock().unwrap();
			let seen = seen.clone();
			graph.subscribe_to_task_status(move |_, _| {
				seen.fetch_add(1, Ordering::Relaxed);
			});
		}

		let mut g = graph.lock().unwrap();
		g.add_task(Task::new(TaskId::new("late"), Noop::new())).unwrap();
		g.get_task_mut(&TaskId::new("late"))
			.unwrap()
			.set_status(TaskStatus::Processing);

		assert_eq!(seen.load(Ordering::Relaxed), 1);
	}
}
