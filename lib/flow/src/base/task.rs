use async_trait::async_trait;
use serde_json::Value;
use smartstring::{LazyCompact, SmartString};
use std::{
	collections::{BTreeMap, BTreeSet},
	sync::Arc,
};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use super::{
	is_empty_value, port_map_to_value, value_to_port_map, BranchId, ConfigMap, PortMap, PortName,
	RunTaskError, StreamEvent, StreamMode, StreamReceiver, TaskId, TaskStatus, TaskStream,
};
use crate::{
	cache::{input_cache_key, OutputCache},
	events::{Emitter, TaskEvent},
	graph::TaskGraph,
	registry::ServiceRegistry,
};

//
// MARK: Executor contract
//

/// A task type's static descriptors.
///
/// Schemas are opaque JSON-Schema documents; the engine only reads
/// `properties.<port>.format` during input resolution and hands whole
/// schemas to the registered compatibility callback.
#[derive(Debug, Clone)]
pub struct TaskSpec {
	pub task_type: SmartString<LazyCompact>,
	pub category: SmartString<LazyCompact>,
	pub title: String,
	pub description: String,

	/// May this task's output be served from the output cache?
	pub cacheable: bool,

	/// Does this task implement `execute_stream`?
	pub streamable: bool,

	/// Do instance schemas differ from the static ones?
	pub has_dynamic_schemas: bool,

	pub input_schema: Value,
	pub output_schema: Value,
	pub config_schema: Value,
}

impl TaskSpec {
	pub fn new(task_type: &str) -> Self {
		Self {
			task_type: task_type.into(),
			category: "general".into(),
			title: String::new(),
			description: String::new(),
			cacheable: false,
			streamable: false,
			has_dynamic_schemas: false,
			input_schema: Value::Object(Default::default()),
			output_schema: Value::Object(Default::default()),
			config_schema: Value::Object(Default::default()),
		}
	}
}

/// One output branch of a conditional task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
	pub id: BranchId,

	/// The output port this branch feeds
	pub output_port: PortName,
}

/// Information about the task an execution belongs to
#[derive(Debug, Clone)]
pub struct ThisTaskInfo {
	pub id: TaskId,
	pub task_type: SmartString<LazyCompact>,
}

/// Reports execution progress back to whoever is driving the task.
///
/// `partial` may carry the output assembled so far; the runner pushes
/// it onto outgoing edges alongside the status update.
#[derive(Clone)]
pub struct ProgressReporter {
	callback: Option<Arc<dyn Fn(f32, Option<PortMap>) + Send + Sync>>,
}

impl ProgressReporter {
	/// A reporter that discards every update
	pub fn null() -> Self {
		Self { callback: None }
	}

	pub fn new(callback: impl Fn(f32, Option<PortMap>) + Send + Sync + 'static) -> Self {
		Self {
			callback: Some(Arc::new(callback)),
		}
	}

	/// Report progress in percent, with an optional partial output
	pub fn report(&self, progress: f32, partial: Option<PortMap>) {
		if let Some(callback) = &self.callback {
			callback(progress.clamp(0.0, 100.0), partial);
		}
	}
}

/// Everything a task execution may touch besides its input.
pub struct ExecContext {
	pub task: ThisTaskInfo,

	/// The run-scoped service registry
	pub registry: Arc<ServiceRegistry>,

	/// Cancelled when the run is aborted. Executions are expected
	/// to honor it at their own suspension points.
	pub token: CancellationToken,

	pub progress: ProgressReporter,

	/// Live inbound streams, for streaming consumers. Keyed by this
	/// task's input port. Each receiver must be consumed exactly once.
	pub input_streams: BTreeMap<PortName, StreamReceiver>,
}

impl ExecContext {
	/// A minimal context for driving a task outside a graph run
	pub fn standalone(task: ThisTaskInfo, registry: Arc<ServiceRegistry>) -> Self {
		Self {
			task,
			registry,
			token: CancellationToken::new(),
			progress: ProgressReporter::null(),
			input_streams: BTreeMap::new(),
		}
	}
}

/// The behavior of one task instance.
///
/// Implementations are constructed per task by a registered factory,
/// so they may close over the task's configuration. Capability flags
/// live in [`TaskSpec`]; there is no inheritance hierarchy.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
	fn spec(&self) -> &TaskSpec;

	/// Run this task to completion
	async fn execute(&self, input: &PortMap, ctx: &ExecContext) -> Result<PortMap, RunTaskError>;

	/// Re-derive output from already-present input and output buffers.
	/// Must not do real work; used by reactive graph replays.
	async fn execute_reactive(
		&self,
		_input: &PortMap,
		output: &PortMap,
	) -> Result<PortMap, RunTaskError> {
		Ok(output.clone())
	}

	/// Produce a lazy stream of output events.
	/// Only called when the spec declares `streamable` and the task
	/// instance's stream mode is not [`StreamMode::None`].
	fn execute_stream(
		&self,
		_input: PortMap,
		_ctx: ExecContext,
	) -> Result<TaskStream, RunTaskError> {
		Err(RunTaskError::UnsupportedStream)
	}

	/// The output branches of a conditional task
	fn branches(&self) -> Option<Vec<Branch>> {
		None
	}

	/// Which branches stay active, given the task's output.
	/// `None` means every branch stays active.
	fn active_branches(&self, _output: &PortMap) -> Option<BTreeSet<BranchId>> {
		None
	}

	fn validate_input(&self, _input: &PortMap) -> bool {
		true
	}

	/// Narrow a value block for this task when the schema layer said
	/// the connection is only runtime-compatible
	fn narrow_input(&self, input: PortMap, _registry: &ServiceRegistry) -> PortMap {
		input
	}

	/// Rebuild a composite task's sub-graph after its input changed
	fn regenerate_graph(&self, _sub_graph: &mut TaskGraph, _input: &PortMap) {}
}

//
// MARK: Run pipeline
//

/// What one task execution produced.
pub(crate) enum ExecOutcome {
	/// The task ran (or hit the cache) and produced its output
	Finished(PortMap),

	/// The task started streaming. The caller owns pumping the stream
	/// to consumers and materializing the final output; `cache` names
	/// where to store it afterwards.
	Streaming {
		stream: TaskStream,
		cache: Option<(Arc<dyn OutputCache>, String)>,
	},
}

/// The immutable slice of a task that an execution needs.
/// Snapshotted so executions can run far from the graph.
pub(crate) struct RunPayload {
	pub executor: Arc<dyn TaskExecutor>,
	pub input: PortMap,
	pub stream_mode: StreamMode,
	pub cacheable_override: Option<bool>,
	pub cache: Option<Arc<dyn OutputCache>>,
}

/// Accumulates stream events into a final output block.
///
/// Priority when materializing: the last snapshot wins (replace mode);
/// otherwise non-empty finish data; otherwise the concatenated text
/// deltas as `{text}` (legacy append mode).
#[derive(Default)]
pub(crate) struct StreamAccumulator {
	text: String,
	snapshot: Option<Value>,
	finish: Option<Value>,
}

impl StreamAccumulator {
	pub fn observe(&mut self, event: &StreamEvent) {
		match event {
			StreamEvent::TextDelta { text_delta } => self.text.push_str(text_delta),
			StreamEvent::Snapshot { data } => self.snapshot = Some(data.clone()),
			StreamEvent::Finish { data } => {
				if !is_empty_value(data) {
					self.finish = Some(data.clone());
				}
			}
			StreamEvent::ObjectDelta { .. } | StreamEvent::Error { .. } => {}
		}
	}

	/// The output block assembled so far
	pub fn output(&self) -> PortMap {
		if let Some(snapshot) = &self.snapshot {
			return value_to_port_map(snapshot);
		}
		if let Some(finish) = &self.finish {
			return value_to_port_map(finish);
		}

		let mut out = PortMap::new();
		if !self.text.is_empty() {
			out.insert(PortName::new("text"), Value::String(self.text.clone()));
		}
		return out;
	}

	/// Enrich a bare finish event with the assembled output, so
	/// downstream consumers never have to re-accumulate.
	pub fn enrich_finish(&self, event: StreamEvent) -> StreamEvent {
		match event {
			StreamEvent::Finish { data } if is_empty_value(&data) => StreamEvent::Finish {
				data: port_map_to_value(&self.output()),
			},
			other => other,
		}
	}
}

/// Resolve input values whose schema carries a registered
/// JSON-Schema `format`.
fn resolve_input_formats(
	schema: &Value,
	input: &mut PortMap,
	registry: &ServiceRegistry,
) -> Result<(), RunTaskError> {
	let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
		return Ok(());
	};

	for (port, value) in input.iter_mut() {
		let format = properties
			.get(port.id().as_str())
			.and_then(|p| p.get("format"))
			.and_then(Value::as_str);

		if let Some(format) = format {
			if let Some(factory) = registry.format_factory(format) {
				*value = factory(value)?;
			}
		}
	}

	return Ok(());
}

/// The single entry point for executing a task: input resolution,
/// validation, cache lookup, execute or stream start, cache store.
pub(crate) async fn run_pipeline(
	payload: RunPayload,
	ctx: ExecContext,
) -> Result<ExecOutcome, RunTaskError> {
	let RunPayload {
		executor,
		mut input,
		stream_mode,
		cacheable_override,
		cache,
	} = payload;

	let spec = executor.spec();

	resolve_input_formats(&spec.input_schema, &mut input, &ctx.registry)?;

	if !executor.validate_input(&input) {
		return Err(RunTaskError::InvalidInput {
			message: format!("task `{}` rejected its input", ctx.task.id),
		});
	}

	if ctx.token.is_cancelled() {
		return Err(RunTaskError::Aborted);
	}

	let cacheable = cacheable_override.unwrap_or(spec.cacheable);
	let cache = if cacheable { cache } else { None };
	let cache_key = cache.as_ref().map(|_| input_cache_key(&input));

	if let (Some(cache), Some(key)) = (&cache, &cache_key) {
		if let Some(hit) = cache.get(&spec.task_type, key).await {
			tracing::debug!(
				message = "Output cache hit",
				task_id = ?ctx.task.id,
				task_type = ?spec.task_type,
			);
			return Ok(ExecOutcome::Finished(hit));
		}
	}

	if spec.streamable && stream_mode != StreamMode::None {
		let stream = executor.execute_stream(input, ctx)?;
		return Ok(ExecOutcome::Streaming {
			stream,
			cache: match (cache, cache_key) {
				(Some(cache), Some(key)) => Some((cache, key)),
				_ => None,
			},
		});
	}

	let output = executor.execute(&input, &ctx).await?;

	if let (Some(cache), Some(key)) = (&cache, &cache_key) {
		cache.put(&spec.task_type, key, &output).await;
	}

	return Ok(ExecOutcome::Finished(output));
}

//
// MARK: Task
//

/// A task inside a graph: stable identity, lifecycle state, input and
/// output buffers, and an executor providing the behavior.
pub struct Task {
	id: TaskId,
	executor: Arc<dyn TaskExecutor>,
	config: ConfigMap,

	status: TaskStatus,
	progress: f32,
	error: Option<RunTaskError>,

	created_at: OffsetDateTime,
	started_at: Option<OffsetDateTime>,
	completed_at: Option<OffsetDateTime>,

	/// Static input defaults; `reset_input_data` restores these
	input_defaults: PortMap,
	run_input: PortMap,
	run_output: PortMap,

	stream_mode: StreamMode,

	/// The id of the runner currently driving this task
	runner_id: Option<SmartString<LazyCompact>>,

	/// Composite tasks own a sub-graph
	sub_graph: Option<Box<TaskGraph>>,

	events: Arc<Emitter<TaskEvent>>,
}

impl Task {
	pub fn new(id: TaskId, executor: Arc<dyn TaskExecutor>) -> Self {
		Self::with_config(id, executor, ConfigMap::new())
	}

	pub fn with_config(id: TaskId, executor: Arc<dyn TaskExecutor>, config: ConfigMap) -> Self {
		Self {
			id,
			executor,
			config,
			status: TaskStatus::Pending,
			progress: 0.0,
			error: None,
			created_at: OffsetDateTime::now_utc(),
			started_at: None,
			completed_at: None,
			input_defaults: PortMap::new(),
			run_input: PortMap::new(),
			run_output: PortMap::new(),
			stream_mode: StreamMode::None,
			runner_id: None,
			sub_graph: None,
			events: Arc::new(Emitter::new()),
		}
	}

	//
	// MARK: Accessors
	//

	pub fn id(&self) -> &TaskId {
		&self.id
	}

	pub fn task_type(&self) -> &SmartString<LazyCompact> {
		&self.executor.spec().task_type
	}

	pub fn spec(&self) -> &TaskSpec {
		self.executor.spec()
	}

	pub fn executor(&self) -> &Arc<dyn TaskExecutor> {
		&self.executor
	}

	pub fn config(&self) -> &ConfigMap {
		&self.config
	}

	pub fn cacheable(&self) -> bool {
		self.executor.spec().cacheable
	}

	pub fn streamable(&self) -> bool {
		self.executor.spec().streamable
	}

	pub fn input_schema(&self) -> &Value {
		&self.executor.spec().input_schema
	}

	pub fn output_schema(&self) -> &Value {
		&self.executor.spec().output_schema
	}

	pub fn stream_mode(&self) -> StreamMode {
		self.stream_mode
	}

	pub fn set_stream_mode(&mut self, mode: StreamMode) {
		self.stream_mode = mode;
	}

	pub fn status(&self) -> TaskStatus {
		self.status
	}

	pub fn progress(&self) -> f32 {
		self.progress
	}

	pub fn error(&self) -> Option<&RunTaskError> {
		self.error.as_ref()
	}

	pub fn created_at(&self) -> OffsetDateTime {
		self.created_at
	}

	pub fn started_at(&self) -> Option<OffsetDateTime> {
		self.started_at
	}

	pub fn completed_at(&self) -> Option<OffsetDateTime> {
		self.completed_at
	}

	pub fn runner_id(&self) -> Option<&SmartString<LazyCompact>> {
		self.runner_id.as_ref()
	}

	pub fn events(&self) -> &Arc<Emitter<TaskEvent>> {
		&self.events
	}

	pub fn branches(&self) -> Option<Vec<Branch>> {
		self.executor.branches()
	}

	//
	// MARK: Input & output buffers
	//

	pub fn input_defaults(&self) -> &PortMap {
		&self.input_defaults
	}

	/// Replace the static input defaults and reset the run input to them
	pub fn set_input(&mut self, input: PortMap) {
		self.input_defaults = input;
		self.reset_input_data();
	}

	/// Restore the run input to the static defaults
	pub fn reset_input_data(&mut self) {
		self.run_input = self.input_defaults.clone();
	}

	/// Merge a partial input into the run input.
	/// Returns whether anything actually changed; the runner uses that
	/// signal to regenerate composite sub-graphs.
	pub fn add_input(&mut self, partial: PortMap) -> bool {
		let mut changed = false;
		for (port, value) in partial {
			match self.run_input.get(&port) {
				Some(existing) if *existing == value => {}
				_ => {
					self.run_input.insert(port, value);
					changed = true;
				}
			}
		}
		return changed;
	}

	pub fn run_input(&self) -> &PortMap {
		&self.run_input
	}

	pub fn run_output(&self) -> &PortMap {
		&self.run_output
	}

	pub fn set_run_output(&mut self, output: PortMap) {
		self.run_output = output;
	}

	pub fn set_error(&mut self, error: RunTaskError) {
		self.error = Some(error);
	}

	//
	// MARK: Lifecycle
	//

	/// Change this task's status, emitting the matching lifecycle event
	/// followed by a status event. Idempotent.
	pub fn set_status(&mut self, status: TaskStatus) {
		if self.status == status {
			return;
		}
		self.status = status;

		match status {
			TaskStatus::Pending => self.events.emit(TaskEvent::Reset),
			TaskStatus::Processing => {
				self.started_at = Some(OffsetDateTime::now_utc());
				self.events.emit(TaskEvent::Start);
			}
			TaskStatus::Streaming => self.events.emit(TaskEvent::Streaming),
			TaskStatus::Completed => {
				self.completed_at = Some(OffsetDateTime::now_utc());
				self.events.emit(TaskEvent::Complete);
			}
			TaskStatus::Aborting => self.events.emit(TaskEvent::Abort),
			TaskStatus::Failed => {
				self.completed_at = Some(OffsetDateTime::now_utc());
				if let Some(error) = &self.error {
					self.events.emit(TaskEvent::Error {
						error: error.clone(),
					});
				}
			}
			TaskStatus::Disabled => {
				self.progress = 100.0;
				self.events.emit(TaskEvent::Disabled);
			}
		}

		self.events.emit(TaskEvent::Status { status });
	}

	pub fn set_progress(&mut self, progress: f32) {
		let progress = progress.clamp(0.0, 100.0);
		if (self.progress - progress).abs() < f32::EPSILON {
			return;
		}
		self.progress = progress;
		self.events.emit(TaskEvent::Progress { progress });
	}

	/// Re-initialize this task for a fresh run
	pub fn reset(&mut self, runner_id: &str) {
		self.progress = 0.0;
		self.error = None;
		self.started_at = None;
		self.completed_at = None;
		self.run_output = PortMap::new();
		self.reset_input_data();
		self.runner_id = Some(runner_id.into());
		self.set_status(TaskStatus::Pending);
	}

	/// Ask a running task to stop
	pub fn abort(&mut self) {
		if self.status.is_running() {
			self.set_status(TaskStatus::Aborting);
		}
	}

	/// Prune this task: it will never run
	pub fn disable(&mut self) {
		self.set_progress(100.0);
		self.set_status(TaskStatus::Disabled);
	}

	//
	// MARK: Composite tasks
	//

	pub fn has_children(&self) -> bool {
		self.sub_graph.is_some()
	}

	pub fn sub_graph(&self) -> Option<&TaskGraph> {
		self.sub_graph.as_deref()
	}

	pub fn sub_graph_mut(&mut self) -> Option<&mut TaskGraph> {
		self.sub_graph.as_deref_mut()
	}

	pub fn set_sub_graph(&mut self, sub_graph: TaskGraph) {
		self.sub_graph = Some(Box::new(sub_graph));
	}

	/// Rebuild the sub-graph from the current input
	pub fn regenerate_graph(&mut self) {
		let executor = self.executor.clone();
		if let Some(sub_graph) = self.sub_graph.as_deref_mut() {
			executor.regenerate_graph(sub_graph, &self.run_input);
		}
	}

	pub fn validate_input(&self, input: &PortMap) -> bool {
		self.executor.validate_input(input)
	}

	pub fn narrow_input(&self, input: PortMap, registry: &ServiceRegistry) -> PortMap {
		self.executor.narrow_input(input, registry)
	}

	//
	// MARK: Standalone execution
	//

	/// Run this task to completion outside a graph.
	///
	/// Inside a graph the runner snapshots the task into a payload
	/// instead, so executions can proceed concurrently.
	pub async fn run(
		&mut self,
		overrides: Option<PortMap>,
		ctx: ExecContext,
		cache: Option<Arc<dyn OutputCache>>,
	) -> Result<PortMap, RunTaskError> {
		if let Some(overrides) = overrides {
			self.add_input(overrides);
		}

		self.set_status(TaskStatus::Processing);

		let payload = RunPayload {
			executor: self.executor.clone(),
			input: self.run_input.clone(),
			stream_mode: self.stream_mode,
			cacheable_override: None,
			cache,
		};

		let outcome = match run_pipeline(payload, ctx).await {
			Ok(outcome) => outcome,
			Err(error) => {
				self.set_error(error.clone());
				self.set_status(TaskStatus::Failed);
				return Err(error);
			}
		};

		let output = match outcome {
			ExecOutcome::Finished(output) => output,
			ExecOutcome::Streaming { mut stream, cache } => {
				// Nobody else is consuming; accumulate inline.
				use futures::StreamExt;

				self.set_status(TaskStatus::Streaming);

				let mut acc = StreamAccumulator::default();
				let mut failure = None;
				while let Some(event) = stream.next().await {
					if let StreamEvent::Error { error } = &event {
						failure = Some(error.clone());
						break;
					}
					acc.observe(&event);
					if event.is_terminal() {
						break;
					}
				}

				if let Some(error) = failure {
					self.set_error(error.clone());
					self.set_status(TaskStatus::Failed);
					return Err(error);
				}

				let output = acc.output();
				if let Some((cache, key)) = cache {
					cache.put(&self.executor.spec().task_type, &key, &output).await;
				}
				output
			}
		};

		self.run_output = output.clone();
		self.set_progress(100.0);
		self.set_status(TaskStatus::Completed);
		return Ok(output);
	}

	/// Re-derive this task's output from its current buffers
	pub async fn run_reactive(
		&mut self,
		overrides: Option<PortMap>,
	) -> Result<PortMap, RunTaskError> {
		if let Some(overrides) = overrides {
			self.add_input(overrides);
		}

		let output = self
			.executor
			.execute_reactive(&self.run_input, &self.run_output)
			.await?;
		self.run_output = output.clone();
		return Ok(output);
	}
}

impl std::fmt::Debug for Task {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Task")
			.field("id", &self.id)
			.field("task_type", self.task_type())
			.field("status", &self.status)
			.field("progress", &self.progress)
			.finish()
	}
}
