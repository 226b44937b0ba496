use async_trait::async_trait;
use serde_json::{json, Value};

use gantry_flow::base::{
	ConfigMap, ExecContext, PortMap, PortName, RunTaskError, TaskExecutor, TaskSpec,
};

#[derive(Debug, Clone, Copy)]
enum MathOp {
	Add,
	Mul,
}

/// Integer-preserving binary arithmetic: keeps i64 when both
/// operands are integers, falls back to f64 otherwise.
fn apply(op: MathOp, a: &Value, b: &Value) -> Option<Value> {
	if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
		return Some(match op {
			MathOp::Add => json!(a + b),
			MathOp::Mul => json!(a * b),
		});
	}

	let (a, b) = (a.as_f64()?, b.as_f64()?);
	Some(match op {
		MathOp::Add => json!(a + b),
		MathOp::Mul => json!(a * b),
	})
}

/// Combines input ports `a` and `b` into output port `y`.
pub struct Math {
	spec: TaskSpec,
	op: MathOp,
}

impl Math {
	pub fn new(config: &ConfigMap) -> Result<Self, RunTaskError> {
		//
		// Extract parameters
		//
		let op = match config.get("op").and_then(Value::as_str) {
			Some("add") | None => MathOp::Add,
			Some("mul") => MathOp::Mul,
			Some(_) => {
				return Err(RunTaskError::BadParameterType {
					parameter: "op".into(),
				})
			}
		};

		let mut spec = TaskSpec::new("Math");
		spec.cacheable = true;

		return Ok(Self { spec, op });
	}

	fn operand(input: &PortMap, port: &str) -> Result<Value, RunTaskError> {
		match input.get(&PortName::new(port)) {
			Some(value) if value.is_number() => Ok(value.clone()),
			Some(_) => Err(RunTaskError::BadInputType {
				port: PortName::new(port),
			}),
			None => Err(RunTaskError::MissingInput {
				port: PortName::new(port),
			}),
		}
	}
}

#[async_trait]
impl TaskExecutor for Math {
	fn spec(&self) -> &TaskSpec {
		&self.spec
	}

	async fn execute(&self, input: &PortMap, _ctx: &ExecContext) -> Result<PortMap, RunTaskError> {
		//
		// Extract input
		//
		let a = Self::operand(input, "a")?;
		let b = Self::operand(input, "b")?;

		let y = apply(self.op, &a, &b).ok_or(RunTaskError::BadInputType {
			port: PortName::new("a"),
		})?;

		let mut out = PortMap::new();
		out.insert(PortName::new("y"), y);
		return Ok(out);
	}

	async fn execute_reactive(
		&self,
		input: &PortMap,
		output: &PortMap,
	) -> Result<PortMap, RunTaskError> {
		// Recompute from buffers when both operands are present;
		// otherwise keep the previous output.
		match (Self::operand(input, "a"), Self::operand(input, "b")) {
			(Ok(a), Ok(b)) => {
				let y = apply(self.op, &a, &b).ok_or(RunTaskError::BadInputType {
					port: PortName::new("a"),
				})?;
				let mut out = PortMap::new();
				out.insert(PortName::new("y"), y);
				Ok(out)
			}
			_ => Ok(output.clone()),
		}
	}
}

/// Sums the numbers arriving on input port `values` into
/// output port `result`. Fan-in edges collect into an array.
pub struct Sum {
	spec: TaskSpec,
}

impl Sum {
	pub fn new() -> Self {
		let mut spec = TaskSpec::new("Sum");
		spec.cacheable = true;
		Self { spec }
	}
}

#[async_trait]
impl TaskExecutor for Sum {
	fn spec(&self) -> &TaskSpec {
		&self.spec
	}

	async fn execute(&self, input: &PortMap, _ctx: &ExecContext) -> Result<PortMap, RunTaskError> {
		let values = match input.get(&PortName::new("values")) {
			Some(Value::Array(values)) => values.clone(),
			Some(value) if value.is_number() => vec![value.clone()],
			Some(_) => {
				return Err(RunTaskError::BadInputType {
					port: PortName::new("values"),
				})
			}
			None => {
				return Err(RunTaskError::MissingInput {
					port: PortName::new("values"),
				})
			}
		};

		let mut total = json!(0);
		for value in &values {
			total = apply(MathOp::Add, &total, value).ok_or(RunTaskError::BadInputType {
				port: PortName::new("values"),
			})?;
		}

		let mut out = PortMap::new();
		out.insert(PortName::new("result"), total);
		return Ok(out);
	}
}
