//! The graph's serialized form.
//!
//! Edge identities are derived from their four endpoint fields and
//! never appear in the JSON. Loading needs a [`TaskDispatcher`] to
//! construct executors by type tag.

use serde::{Deserialize, Serialize};
use smartstring::{LazyCompact, SmartString};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::{
	base::{ConfigMap, GraphError, PortMap, PortName, RunTaskError, TaskDispatcher, TaskId},
	graph::TaskGraph,
};

/// A task graph, directly serialized to/from JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GraphJson {
	/// Tasks in this graph
	pub tasks: Vec<TaskJson>,

	/// Dataflows in this graph
	pub dataflows: Vec<DataflowJson>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TaskJson {
	pub id: TaskId,

	/// What kind of task is this?
	#[serde(rename = "type")]
	pub task_type: SmartString<LazyCompact>,

	/// Static configuration for this task
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub config: ConfigMap,

	/// Static input defaults for this task
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub input: PortMap,

	/// Composite tasks carry their sub-graph
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub subgraph: Option<GraphJson>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DataflowJson {
	pub source_task_id: TaskId,
	pub source_task_port_id: PortName,
	pub target_task_id: TaskId,
	pub target_task_port_id: PortName,
}

/// The dependency-oriented form: dataflows rewritten as per-target
/// dependency lists. Equivalent in information to [`GraphJson`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DependencyGraphJson {
	pub tasks: Vec<TaskJson>,

	/// Keyed by target task id
	pub dependencies: BTreeMap<TaskId, Vec<DependencyJson>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DependencyJson {
	pub source_task_id: TaskId,
	pub source_task_port_id: PortName,
	pub target_task_port_id: PortName,
}

/// An error we encounter when a serialized graph is invalid
#[derive(Debug, Error)]
pub enum GraphLoadError {
	/// We found a task with a type the dispatcher doesn't know
	#[error("invalid task type `{bad_type}`")]
	BadTaskType { bad_type: SmartString<LazyCompact> },

	/// A task factory rejected its configuration
	#[error("error while instantiating task `{task_id}`")]
	InitTask {
		task_id: TaskId,

		#[source]
		error: RunTaskError,
	},

	/// The serialized graph violates a graph invariant
	/// (cycle, unknown endpoint, duplicate dataflow)
	#[error(transparent)]
	Graph(#[from] GraphError),
}

impl TaskGraph {
	/// Serialize this graph
	pub fn to_json(&self) -> GraphJson {
		GraphJson {
			tasks: self
				.iter_tasks()
				.map(|task| TaskJson {
					id: task.id().clone(),
					task_type: task.task_type().clone(),
					config: task.config().clone(),
					input: task.input_defaults().clone(),
					subgraph: task.sub_graph().map(TaskGraph::to_json),
				})
				.collect(),
			dataflows: self
				.iter_edges()
				.map(|edge| DataflowJson {
					source_task_id: edge.source_task().clone(),
					source_task_port_id: edge.source_port().clone(),
					target_task_id: edge.target_task().clone(),
					target_task_port_id: edge.target_port().clone(),
				})
				.collect(),
		}
	}

	/// Serialize this graph in dependency form
	pub fn to_dependency_json(&self) -> DependencyGraphJson {
		let json = self.to_json();

		let mut dependencies: BTreeMap<TaskId, Vec<DependencyJson>> = BTreeMap::new();
		for dataflow in json.dataflows {
			dependencies
				.entry(dataflow.target_task_id)
				.or_default()
				.push(DependencyJson {
					source_task_id: dataflow.source_task_id,
					source_task_port_id: dataflow.source_task_port_id,
					target_task_port_id: dataflow.target_task_port_id,
				});
		}

		DependencyGraphJson {
			tasks: json.tasks,
			dependencies,
		}
	}

	/// Build a graph from its deserialized form
	pub fn from_json(
		json: &GraphJson,
		dispatcher: &TaskDispatcher,
	) -> Result<TaskGraph, GraphLoadError> {
		let mut graph = TaskGraph::new();

		for task_json in &json.tasks {
			let mut task = dispatcher
				.init_task(
					&task_json.task_type,
					task_json.id.clone(),
					task_json.config.clone(),
				)
				.ok_or_else(|| GraphLoadError::BadTaskType {
					bad_type: task_json.task_type.clone(),
				})?
				.map_err(|error| GraphLoadError::InitTask {
					task_id: task_json.id.clone(),
					error,
				})?;

			task.set_input(task_json.input.clone());

			if let Some(subgraph) = &task_json.subgraph {
				task.set_sub_graph(Self::from_json(subgraph, dispatcher)?);
			}

			graph.add_task(task)?;
		}

		for dataflow in &json.dataflows {
			graph.add_edge(
				dataflow.source_task_id.clone(),
				dataflow.source_task_port_id.clone(),
				dataflow.target_task_id.clone(),
				dataflow.target_task_port_id.clone(),
			)?;
		}

		return Ok(graph);
	}
}
