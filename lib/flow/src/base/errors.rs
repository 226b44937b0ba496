use smartstring::{LazyCompact, SmartString};
use std::{error::Error, sync::Arc};
use thiserror::Error;
use tokio::task::JoinError;

use super::{EdgeId, PortName, TaskId};

/// An error we encounter while mutating a task graph.
///
/// These are synchronous and leave the graph unchanged;
/// they never affect an ongoing run.
#[derive(Debug, Error)]
pub enum GraphError {
	/// Adding this edge would create a directed cycle
	#[error("adding dataflow `{edge_id}` would create a cycle")]
	CycleDetected { edge_id: EdgeId },

	/// An edge endpoint references a task that doesn't exist
	#[error("unknown task `{task_id}`")]
	UnknownTask { task_id: TaskId },

	/// A dataflow with this identity already exists
	#[error("duplicate dataflow `{edge_id}`")]
	DuplicateEdge { edge_id: EdgeId },

	/// A dataflow id references an edge that doesn't exist
	#[error("unknown dataflow `{edge_id}`")]
	UnknownEdge { edge_id: EdgeId },

	/// A task with this id already exists
	#[error("duplicate task `{task_id}`")]
	DuplicateTask { task_id: TaskId },
}

/// An error we encounter while running a task.
///
/// This type is `Clone`: the same error is stored on the failing task,
/// pushed onto its outgoing edges, and may be broadcast inside a stream
/// event. Sources that aren't `Clone` are wrapped in an [`Arc`].
#[derive(Debug, Clone, Error)]
pub enum RunTaskError {
	//
	// MARK: Errors in task configuration
	//
	//
	//
	/// We expected a parameter, but it wasn't there
	#[error("missing parameter `{parameter}`")]
	MissingParameter { parameter: SmartString<LazyCompact> },

	/// A parameter had an unexpected type
	#[error("bad type for parameter `{parameter}`")]
	BadParameterType { parameter: SmartString<LazyCompact> },

	/// We received a parameter we don't recognize
	#[error("unexpected parameter `{parameter}`")]
	UnexpectedParameter { parameter: SmartString<LazyCompact> },

	/// We did not receive a required input
	#[error("we did not receive input on port `{port}`")]
	MissingInput { port: PortName },

	/// We received data with an invalid type on the given port
	#[error("received bad data type on port `{port}`")]
	BadInputType { port: PortName },

	/// We received input on a port we don't recognize
	#[error("received input on unrecognized port `{port}`")]
	UnrecognizedInput { port: PortName },

	/// The run input failed the task's own validation
	#[error("input failed validation: {message}")]
	InvalidInput { message: String },

	/// This task does not implement `execute_stream`
	#[error("this task does not support streaming")]
	UnsupportedStream,

	/// Generic task configuration error
	#[error("bad task configuration: {message}")]
	Configuration { message: String },

	//
	// MARK: Task runtime errors
	//
	//
	//
	/// The run was aborted
	#[error("task was aborted")]
	Aborted,

	/// A stream produced an error event, or the stream
	/// channel itself misbehaved
	#[error("stream error: {message}")]
	Stream { message: String },

	/// A generic I/O error
	#[error("i/o error")]
	IoError(#[from] Arc<std::io::Error>),

	/// The task's `execute` rejected with an arbitrary error
	#[error("task execution failed")]
	ExecutionFailed(#[from] Arc<dyn Error + Sync + Send + 'static>),

	/// A task execution threw a JoinError
	#[error("error while joining task")]
	Join(#[from] Arc<JoinError>),

	/// We could not serialize or deserialize task data
	#[error("serialization error")]
	Serialization(#[from] Arc<serde_json::Error>),
}

impl From<std::io::Error> for RunTaskError {
	fn from(value: std::io::Error) -> Self {
		Self::IoError(Arc::new(value))
	}
}

impl From<JoinError> for RunTaskError {
	fn from(value: JoinError) -> Self {
		Self::Join(Arc::new(value))
	}
}

impl From<serde_json::Error> for RunTaskError {
	fn from(value: serde_json::Error) -> Self {
		Self::Serialization(Arc::new(value))
	}
}

impl RunTaskError {
	/// Wrap an arbitrary execution error
	pub fn execution_failed(error: impl Error + Sync + Send + 'static) -> Self {
		Self::ExecutionFailed(Arc::new(error))
	}
}

/// An error we encounter while running a whole graph
#[derive(Debug, Error)]
pub enum RunGraphError {
	/// `run` was called while another run is active on this runner
	#[error("this runner is already executing a graph")]
	AlreadyRunning,

	/// A task failed. The first recorded task error becomes
	/// the run's error; later failures are collected silently.
	#[error("error in task `{task_id}`")]
	Task {
		task_id: TaskId,

		#[source]
		error: RunTaskError,
	},

	/// The run was aborted, either by `abort()` or by a parent
	/// cancellation cascading down
	#[error("graph run was aborted")]
	Aborted,

	/// The graph itself is malformed
	#[error(transparent)]
	Graph(#[from] GraphError),
}
