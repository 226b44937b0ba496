//! The graph runner: resets the graph, drives a scheduler, dispatches
//! task executions concurrently, propagates outputs along edges, and
//! finalizes the run.

mod runner;
pub use runner::*;

use smartstring::{LazyCompact, SmartString};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{base::{PortMap, TaskId}, cache::CacheChoice, registry::ServiceRegistry};

/// Runner-wide tuning knobs.
pub struct RunnerOptions {
	/// The message capacity of task stream channels.
	///
	/// Smaller values increase the probability of runs failing due to
	/// an overflowing channel, larger values use more memory.
	pub stream_channel_capacity: usize,
}

impl Default for RunnerOptions {
	fn default() -> Self {
		Self {
			stream_channel_capacity: 256,
		}
	}
}

/// Per-run configuration.
pub struct RunConfig {
	/// Override every task's own `cacheable` flag for this run
	pub cacheable: Option<bool>,

	/// How to resolve the output cache
	pub cache: CacheChoice,

	/// Cancelling this token aborts the run
	pub parent_token: Option<CancellationToken>,

	/// The registry the run's child scope inherits from.
	/// Defaults to the runner's own registry.
	pub registry: Option<Arc<ServiceRegistry>>,
}

impl Default for RunConfig {
	fn default() -> Self {
		Self {
			cacheable: None,
			cache: CacheChoice::Default,
			parent_token: None,
			registry: None,
		}
	}
}

/// The output of one graph leaf (a task with no outgoing edges).
#[derive(Debug, Clone, PartialEq)]
pub struct LeafResult {
	pub id: TaskId,
	pub task_type: SmartString<LazyCompact>,
	pub data: PortMap,
}
