use async_trait::async_trait;
use serde_json::Value;

use gantry_flow::base::{
	value_to_port_map, ConfigMap, ExecContext, PortMap, RunTaskError, TaskExecutor, TaskSpec,
};

/// Emits its configured `value` object, one output port per key.
pub struct Constant {
	spec: TaskSpec,
	value: Value,
}

impl Constant {
	pub fn new(config: &ConfigMap) -> Result<Self, RunTaskError> {
		//
		// Extract parameters
		//
		let value = match config.get("value") {
			Some(value) if value.is_object() => value.clone(),
			Some(_) => {
				return Err(RunTaskError::BadParameterType {
					parameter: "value".into(),
				})
			}
			None => {
				return Err(RunTaskError::MissingParameter {
					parameter: "value".into(),
				})
			}
		};

		let mut spec = TaskSpec::new("Constant");
		spec.cacheable = true;

		return Ok(Self { spec, value });
	}
}

#[async_trait]
impl TaskExecutor for Constant {
	fn spec(&self) -> &TaskSpec {
		&self.spec
	}

	async fn execute(&self, _input: &PortMap, _ctx: &ExecContext) -> Result<PortMap, RunTaskError> {
		return Ok(value_to_port_map(&self.value));
	}
}
