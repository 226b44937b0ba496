use serde::{Deserialize, Serialize};

/// The lifecycle state of a task or a dataflow edge.
///
/// Tasks and their outgoing edges move through the same state set;
/// at rest they are equal, except right after a branch-pruning
/// decision sets inactive edges to [`TaskStatus::Disabled`] while
/// the task itself is [`TaskStatus::Completed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
	/// Not started yet
	Pending,

	/// `execute` is running
	Processing,

	/// `execute_stream` is producing events
	Streaming,

	/// Finished successfully
	Completed,

	/// Asked to stop, waiting for the task to honor the signal
	Aborting,

	/// Finished with an error
	Failed,

	/// Pruned by a conditional branch decision; will never run
	Disabled,
}

impl TaskStatus {
	/// Is this [`TaskStatus::Pending`]?
	pub fn is_pending(&self) -> bool {
		matches!(self, Self::Pending)
	}

	/// Is this task currently executing (processing or streaming)?
	pub fn is_running(&self) -> bool {
		matches!(self, Self::Processing | Self::Streaming)
	}

	/// Is this [`TaskStatus::Completed`]?
	pub fn is_completed(&self) -> bool {
		matches!(self, Self::Completed)
	}

	/// Is this [`TaskStatus::Disabled`]?
	pub fn is_disabled(&self) -> bool {
		matches!(self, Self::Disabled)
	}

	/// Has this task reached a state it will never leave
	/// during the current run?
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Completed | Self::Failed | Self::Disabled)
	}
}

/// How a streaming task's chunks are materialized into a final value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
	/// Do not stream, even if the task supports it
	None,

	/// Chunks are deltas; concatenate them
	Append,

	/// Every chunk is a full snapshot; the last one wins
	Replace,
}

impl Default for StreamMode {
	fn default() -> Self {
		return Self::None;
	}
}
