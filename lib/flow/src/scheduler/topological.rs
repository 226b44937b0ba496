use std::collections::VecDeque;

use super::{NextTask, Scheduler};
use crate::{base::TaskId, graph::TaskGraph};

/// Hands out tasks in a precomputed topological order, one after
/// another, ignoring completion callbacks.
///
/// Only useful when the caller serializes executions itself (the
/// reactive replay does); with a concurrent runner this scheduler
/// gives no dependency guarantees.
pub struct TopologicalScheduler {
	order: VecDeque<TaskId>,
}

impl TopologicalScheduler {
	pub fn new() -> Self {
		Self {
			order: VecDeque::new(),
		}
	}
}

impl Scheduler for TopologicalScheduler {
	fn reset(&mut self, graph: &TaskGraph) {
		self.order = graph.topologically_sorted().into();
	}

	fn next(&mut self, graph: &TaskGraph) -> NextTask {
		while let Some(task_id) = self.order.pop_front() {
			let disabled = graph
				.get_task(&task_id)
				.map(|t| t.status().is_disabled())
				.unwrap_or(true);

			if !disabled {
				return NextTask::Run(task_id);
			}
		}
		return NextTask::Finished;
	}

	fn on_task_completed(&mut self, _graph: &TaskGraph, _task_id: &TaskId) {}
}
