use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use gantry_flow::base::{
	ConfigMap, ExecContext, PortMap, PortName, RunTaskError, TaskExecutor, TaskSpec,
};

/// Waits for its configured number of milliseconds, honoring the
/// run's cancellation token.
pub struct Sleep {
	spec: TaskSpec,
	duration: Duration,
}

impl Sleep {
	pub fn new(config: &ConfigMap) -> Result<Self, RunTaskError> {
		let ms = match config.get("ms") {
			Some(value) => value.as_u64().ok_or(RunTaskError::BadParameterType {
				parameter: "ms".into(),
			})?,
			None => {
				return Err(RunTaskError::MissingParameter {
					parameter: "ms".into(),
				})
			}
		};

		return Ok(Self {
			spec: TaskSpec::new("Sleep"),
			duration: Duration::from_millis(ms),
		});
	}
}

#[async_trait]
impl TaskExecutor for Sleep {
	fn spec(&self) -> &TaskSpec {
		&self.spec
	}

	async fn execute(&self, input: &PortMap, ctx: &ExecContext) -> Result<PortMap, RunTaskError> {
		tracing::trace!(
			message = "Sleeping",
			task_id = %ctx.task.id,
			ms = self.duration.as_millis() as u64,
		);

		tokio::select! {
			_ = ctx.token.cancelled() => {
				return Err(RunTaskError::Aborted);
			}
			_ = tokio::time::sleep(self.duration) => {}
		}

		let mut out = PortMap::new();
		out.insert(
			PortName::new("done"),
			input
				.get(&PortName::new("value"))
				.cloned()
				.unwrap_or(Value::Bool(true)),
		);
		out.insert(PortName::new("ms"), json!(self.duration.as_millis() as u64));
		return Ok(out);
	}
}
