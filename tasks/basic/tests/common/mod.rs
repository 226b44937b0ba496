use gantry_flow::base::{ConfigMap, PortMap, Task, TaskDispatcher, TaskId};
use gantry_util::logging::LoggingPreset;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

pub fn init_logging() {
	let filter: EnvFilter = LoggingPreset::Develop.get_config().into();
	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_test_writer()
		.try_init();
}

pub fn dispatcher() -> TaskDispatcher {
	let mut dispatcher = TaskDispatcher::new();
	tasks_basic::register(&mut dispatcher).unwrap();
	return dispatcher;
}

pub fn config(value: Value) -> ConfigMap {
	value
		.as_object()
		.unwrap()
		.iter()
		.map(|(k, v)| (k.as_str().into(), v.clone()))
		.collect()
}

pub fn ports(value: Value) -> PortMap {
	gantry_flow::base::value_to_port_map(&value)
}

pub fn make_task(
	dispatcher: &TaskDispatcher,
	task_type: &str,
	id: &str,
	task_config: Value,
) -> Task {
	dispatcher
		.init_task(task_type, TaskId::new(id), config(task_config))
		.unwrap()
		.unwrap()
}
