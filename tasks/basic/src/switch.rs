use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;

use gantry_flow::base::{
	Branch, BranchId, ConfigMap, ExecContext, PortMap, PortName, RunTaskError, TaskExecutor,
	TaskSpec,
};

/// A conditional task.
///
/// Config `branches` lists `{id, port}` pairs. Input `select` names
/// the branch id (or an array of ids) to keep active; input `value`
/// is forwarded to every branch port. The runner disables the
/// dataflows hanging off inactive branch ports after completion.
pub struct Switch {
	spec: TaskSpec,
	branches: Vec<Branch>,
}

impl Switch {
	pub fn new(config: &ConfigMap) -> Result<Self, RunTaskError> {
		//
		// Extract parameters
		//
		let branch_specs = match config.get("branches") {
			Some(Value::Array(entries)) => entries,
			Some(_) => {
				return Err(RunTaskError::BadParameterType {
					parameter: "branches".into(),
				})
			}
			None => {
				return Err(RunTaskError::MissingParameter {
					parameter: "branches".into(),
				})
			}
		};

		let mut branches = Vec::new();
		for entry in branch_specs {
			let id = entry.get("id").and_then(Value::as_str);
			let port = entry.get("port").and_then(Value::as_str);
			match (id, port) {
				(Some(id), Some(port)) => branches.push(Branch {
					id: BranchId::new(id),
					output_port: PortName::new(port),
				}),
				_ => {
					return Err(RunTaskError::BadParameterType {
						parameter: "branches".into(),
					})
				}
			}
		}

		return Ok(Self {
			spec: TaskSpec::new("Switch"),
			branches,
		});
	}
}

#[async_trait]
impl TaskExecutor for Switch {
	fn spec(&self) -> &TaskSpec {
		&self.spec
	}

	fn branches(&self) -> Option<Vec<Branch>> {
		Some(self.branches.clone())
	}

	fn active_branches(&self, output: &PortMap) -> Option<BTreeSet<BranchId>> {
		let selected = output.get(&PortName::new("selected"))?;
		let ids = match selected {
			Value::String(id) => vec![id.clone()],
			Value::Array(ids) => ids
				.iter()
				.filter_map(Value::as_str)
				.map(str::to_owned)
				.collect(),
			_ => return None,
		};
		Some(ids.iter().map(|id| BranchId::new(id)).collect())
	}

	async fn execute(&self, input: &PortMap, _ctx: &ExecContext) -> Result<PortMap, RunTaskError> {
		//
		// Extract input
		//
		let selected = match input.get(&PortName::new("select")) {
			Some(value @ (Value::String(_) | Value::Array(_))) => value.clone(),
			Some(_) => {
				return Err(RunTaskError::BadInputType {
					port: PortName::new("select"),
				})
			}
			None => {
				return Err(RunTaskError::MissingInput {
					port: PortName::new("select"),
				})
			}
		};

		let value = input
			.get(&PortName::new("value"))
			.cloned()
			.unwrap_or(Value::Null);

		// Every branch port carries the payload; only edges on active
		// branches survive pruning.
		let mut out = PortMap::new();
		for branch in &self.branches {
			out.insert(branch.output_port.clone(), value.clone());
		}
		out.insert(PortName::new("selected"), selected);
		return Ok(out);
	}
}
