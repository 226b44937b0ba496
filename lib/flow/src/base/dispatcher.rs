use smartstring::{LazyCompact, SmartString};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;

use super::{ConfigMap, RunTaskError, Task, TaskExecutor, TaskId};

// This type must be Send + Sync, since we use it inside tokio's async runtime.
type TaskInitFn =
	Box<dyn Fn(&TaskId, &ConfigMap) -> Result<Arc<dyn TaskExecutor>, RunTaskError> + Send + Sync>;

/// An error we encounter when trying to register a task type
#[derive(Debug, Error)]
pub enum RegisterTaskError {
	/// We tried to register a task type with a name that is already used
	#[error("a task type with this name already exists")]
	AlreadyExists,
}

/// A task type we've registered inside a [`TaskDispatcher`]
struct RegisteredTask {
	/// Constructs a new executor of this type with the provided config
	init: TaskInitFn,
}

/// A factory struct that constructs tasks by type tag
pub struct TaskDispatcher {
	tasks: BTreeMap<SmartString<LazyCompact>, RegisteredTask>,
}

impl TaskDispatcher {
	/// Create a new [`TaskDispatcher`]
	pub fn new() -> Self {
		return Self {
			tasks: BTreeMap::new(),
		};
	}

	/// Register a new task type.
	///
	/// - `type_name` must be a new task type, we'll return an error if it already exists.
	/// - `init` constructs a new executor of the given type with the provided config.
	pub fn register_task(
		&mut self,
		type_name: &str,
		init: impl Fn(&TaskId, &ConfigMap) -> Result<Arc<dyn TaskExecutor>, RunTaskError>
			+ Send
			+ Sync
			+ 'static,
	) -> Result<(), RegisterTaskError> {
		if self.tasks.contains_key(type_name) {
			return Err(RegisterTaskError::AlreadyExists);
		}

		self.tasks.insert(
			type_name.into(),
			RegisteredTask {
				init: Box::new(init),
			},
		);

		return Ok(());
	}

	pub fn has_task(&self, type_name: &str) -> bool {
		return self.tasks.contains_key(type_name);
	}

	/// Build a task of the given type.
	/// Returns `None` if the type is unknown.
	pub fn init_task(
		&self,
		type_name: &str,
		id: TaskId,
		config: ConfigMap,
	) -> Option<Result<Task, RunTaskError>> {
		let registered = self.tasks.get(type_name)?;

		Some(match (registered.init)(&id, &config) {
			Ok(executor) => Ok(Task::with_config(id, executor, config)),
			Err(error) => Err(error),
		})
	}
}
