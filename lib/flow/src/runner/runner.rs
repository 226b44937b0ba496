use futures::StreamExt;
use smartstring::{LazyCompact, SmartString};
use std::{
	collections::{BTreeMap, BTreeSet, HashMap, HashSet},
	sync::{Arc, Mutex},
};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{LeafResult, RunConfig, RunnerOptions};
use crate::{
	base::{
		port_map_to_value, value_to_port_map, BranchId, ExecContext, ExecOutcome, PortMap,
		ProgressReporter, RunGraphError, RunPayload, RunTaskError, StreamAccumulator, StreamEvent,
		StreamMode, StreamSender, TaskId, TaskStatus, TaskStream, ThisTaskInfo,
	},
	cache::{CacheChoice, OutputCache},
	events::GraphEvent,
	graph::TaskGraph,
	registry::{Compatibility, ServiceRegistry},
	scheduler::{DependencyScheduler, NextTask, Scheduler},
};

/// What one settled task execution hands back to the main loop
type TaskSettled = (TaskId, Result<ExecOutcome, RunTaskError>);

/// Signals in-flight executions send to the main loop
enum RunnerSignal {
	Progress {
		task_id: TaskId,
		progress: f32,
		partial: Option<PortMap>,
	},

	StreamChunk {
		task_id: TaskId,
		event: StreamEvent,
	},
}

/// Per-run bookkeeping shared by the runner's helper methods
struct RunState {
	registry: Arc<ServiceRegistry>,
	cache: Option<Arc<dyn OutputCache>>,
	cacheable_override: Option<bool>,
	token: CancellationToken,
	graph_input: PortMap,
	sig_tx: mpsc::UnboundedSender<RunnerSignal>,

	/// Every task failure this run, in settlement order.
	/// The first entry becomes the run's error.
	failed: Vec<(TaskId, RunTaskError)>,

	leaves: Vec<LeafResult>,

	/// Tasks that streamed; they get a stream-end event on completion
	streamed: HashSet<TaskId>,
}

//
// MARK: Stream pump
//

/// Drive a task's event stream: tee every event to the broadcast
/// channel, accumulate the final output, enrich a bare finish event
/// with it, and store the result in the cache when asked to.
async fn pump_stream(
	mut stream: TaskStream,
	sender: StreamSender,
	token: CancellationToken,
	sig_tx: mpsc::UnboundedSender<RunnerSignal>,
	task_id: TaskId,
	task_type: SmartString<LazyCompact>,
	cache: Option<(Arc<dyn OutputCache>, String)>,
) -> Result<PortMap, RunTaskError> {
	let mut acc = StreamAccumulator::default();

	loop {
		let event = tokio::select! {
			_ = token.cancelled() => return Err(RunTaskError::Aborted),
			event = stream.next() => match event {
				Some(event) => event,
				None => break,
			},
		};

		if let StreamEvent::Error { error } = &event {
			let error = error.clone();
			let _ = sender.try_broadcast(event.clone());
			let _ = sig_tx.send(RunnerSignal::StreamChunk {
				task_id: task_id.clone(),
				event,
			});
			return Err(error);
		}

		acc.observe(&event);
		let event = acc.enrich_finish(event);
		let terminal = event.is_terminal();

		match sender.try_broadcast(event.clone()) {
			Ok(_) => {}
			Err(async_broadcast::TrySendError::Full(_)) => {
				return Err(RunTaskError::Stream {
					message: "stream channel overflow".into(),
				});
			}
			// No consumers left; keep accumulating
			Err(_) => {}
		}

		let _ = sig_tx.send(RunnerSignal::StreamChunk {
			task_id: task_id.clone(),
			event,
		});

		if terminal {
			break;
		}
	}

	let output = acc.output();
	if let Some((cache, key)) = cache {
		cache.put(&task_type, &key, &output).await;
	}
	return Ok(output);
}

//
// MARK: Runner
//

/// Drives one task graph to completion.
///
/// All graph mutation happens on the caller's task; executions run
/// concurrently on the runtime and report back over channels, so the
/// runner behaves as a pool whose bound is "currently ready tasks".
pub struct GraphRunner {
	options: RunnerOptions,
	registry: Arc<ServiceRegistry>,
	scheduler: Box<dyn Scheduler>,

	/// The active run's cancellation token, so `abort` works from
	/// another handle while `run` holds `&mut self`
	current_token: Mutex<Option<CancellationToken>>,

	running: bool,
}

impl GraphRunner {
	pub fn new() -> Self {
		Self::with_registry(ServiceRegistry::global().clone())
	}

	pub fn with_registry(registry: Arc<ServiceRegistry>) -> Self {
		Self {
			options: RunnerOptions::default(),
			registry,
			scheduler: Box::new(DependencyScheduler::new()),
			current_token: Mutex::new(None),
			running: false,
		}
	}

	pub fn with_options(mut self, options: RunnerOptions) -> Self {
		self.options = options;
		self
	}

	pub fn with_scheduler(mut self, scheduler: Box<dyn Scheduler>) -> Self {
		self.scheduler = scheduler;
		self
	}

	/// Abort the active run, if any
	pub fn abort(&self) {
		if let Some(token) = self.current_token.lock().unwrap().as_ref() {
			token.cancel();
		}
	}

	/// Disable every still-pending task and its outgoing edges.
	/// Does not touch in-flight work; that is [`GraphRunner::abort`].
	pub fn disable(&self, graph: &mut TaskGraph) {
		for task_id in graph.task_ids().to_vec() {
			let task = graph.get_task_mut(&task_id).unwrap();
			if !task.status().is_pending() {
				continue;
			}
			task.disable();
			for edge_id in graph.edges_out_of(&task_id).to_vec() {
				graph
					.get_edge_mut(&edge_id)
					.unwrap()
					.set_status(TaskStatus::Disabled);
			}
		}
		graph.events().emit(GraphEvent::Disabled);
	}

	/// Re-initialize every task and edge for a fresh run
	pub fn reset_graph(&self, graph: &mut TaskGraph, runner_id: &str) {
		for task_id in graph.task_ids().to_vec() {
			graph.get_task_mut(&task_id).unwrap().reset(runner_id);
		}
		for edge_id in graph.edge_ids().to_vec() {
			graph.get_edge_mut(&edge_id).unwrap().reset();
		}
	}

	//
	// MARK: Run
	//

	/// Execute the graph to completion.
	/// Returns one [`LeafResult`] per task without outgoing edges.
	pub async fn run(
		&mut self,
		graph: &mut TaskGraph,
		graph_input: PortMap,
		config: RunConfig,
	) -> Result<Vec<LeafResult>, RunGraphError> {
		if self.running {
			return Err(RunGraphError::AlreadyRunning);
		}
		self.running = true;

		let result = self.run_inner(graph, graph_input, config).await;

		self.running = false;
		*self.current_token.lock().unwrap() = None;
		return result;
	}

	async fn run_inner(
		&mut self,
		graph: &mut TaskGraph,
		graph_input: PortMap,
		config: RunConfig,
	) -> Result<Vec<LeafResult>, RunGraphError> {
		let registry = config.registry.as_ref().unwrap_or(&self.registry).child();

		let cache = match &config.cache {
			CacheChoice::Default => registry.default_cache(),
			CacheChoice::Disabled => None,
			CacheChoice::Instance(cache) => Some(cache.clone()),
		};

		let token = match &config.parent_token {
			Some(parent) => parent.child_token(),
			None => CancellationToken::new(),
		};
		*self.current_token.lock().unwrap() = Some(token.clone());

		// A parent that is already aborted skips the loop entirely
		if token.is_cancelled() {
			graph.events().emit(GraphEvent::Abort);
			return Err(RunGraphError::Aborted);
		}

		let runner_id = format!("{:016x}", rand::random::<u64>());
		debug!(message = "Starting graph run", runner_id = %runner_id, tasks = graph.len_tasks());

		self.reset_graph(graph, &runner_id);
		self.scheduler.reset(graph);

		let (sig_tx, mut sig_rx) = mpsc::unbounded_channel();
		let mut tasks: JoinSet<TaskSettled> = JoinSet::new();
		let mut in_progress: HashMap<tokio::task::Id, TaskId> = HashMap::new();

		let mut state = RunState {
			registry,
			cache,
			cacheable_override: config.cacheable,
			token: token.clone(),
			graph_input,
			sig_tx,
			failed: Vec::new(),
			leaves: Vec::new(),
			streamed: HashSet::new(),
		};

		graph.events().emit(GraphEvent::Start);

		let mut aborting_marked = false;
		loop {
			if token.is_cancelled() || !state.failed.is_empty() {
				break;
			}

			// Dispatch everything that is ready
			loop {
				match self.scheduler.next(graph) {
					NextTask::Run(task_id) => {
						self.dispatch_one(graph, &mut state, &mut tasks, &mut in_progress, task_id)
							.await;
					}
					NextTask::Wait | NextTask::Finished => break,
				}
				if token.is_cancelled() || !state.failed.is_empty() {
					break;
				}
			}

			if tasks.is_empty() {
				// Nothing in flight: either every task was handed out
				// and settled, or the graph cannot make progress.
				break;
			}

			tokio::select! {
				settled = tasks.join_next_with_id() => match settled {
					Some(Ok((join_id, (task_id, result)))) => {
						in_progress.remove(&join_id);
						self.settle(graph, &mut state, &mut tasks, &mut in_progress, task_id, result);
					}
					Some(Err(join_error)) => {
						let task_id = in_progress.remove(&join_error.id());
						if let Some(task_id) = task_id {
							self.fail_task(graph, &mut state, &task_id, join_error.into());
						}
					}
					None => {}
				},
				Some(signal) = sig_rx.recv() => {
					self.handle_signal(graph, signal);
				}
				_ = token.cancelled(), if !aborting_marked => {
					aborting_marked = true;
					Self::mark_aborting(graph);
				}
			}
		}

		// Let every in-flight execution settle, collecting all
		// outcomes, not just the first
		if token.is_cancelled() && !aborting_marked {
			Self::mark_aborting(graph);
		}
		while let Some(settled) = tasks.join_next_with_id().await {
			match settled {
				Ok((join_id, (task_id, result))) => {
					in_progress.remove(&join_id);
					self.settle(graph, &mut state, &mut tasks, &mut in_progress, task_id, result);
				}
				Err(join_error) => {
					let task_id = in_progress.remove(&join_error.id());
					if let Some(task_id) = task_id {
						self.fail_task(graph, &mut state, &task_id, join_error.into());
					}
				}
			}
		}

		// Apply any progress that raced the shutdown
		while let Ok(signal) = sig_rx.try_recv() {
			self.handle_signal(graph, signal);
		}

		if let Some((task_id, error)) = state.failed.first() {
			graph.events().emit(GraphEvent::Error {
				error: error.clone(),
			});
			return Err(RunGraphError::Task {
				task_id: task_id.clone(),
				error: error.clone(),
			});
		}

		if token.is_cancelled() {
			graph.events().emit(GraphEvent::Abort);
			return Err(RunGraphError::Aborted);
		}

		debug!(message = "Graph run complete", runner_id = %runner_id, leaves = state.leaves.len());
		graph.events().emit(GraphEvent::Complete);
		return Ok(state.leaves);
	}

	//
	// MARK: Dispatch
	//

	/// The part of the graph input this task receives directly:
	/// roots get all of it, everything else only the keys no
	/// incoming dataflow claims.
	fn filtered_graph_input(graph: &TaskGraph, state: &RunState, task_id: &TaskId) -> PortMap {
		let in_edges = graph.edges_into(task_id);
		if in_edges.is_empty() {
			return state.graph_input.clone();
		}

		let mut connected = BTreeSet::new();
		for edge_id in in_edges {
			let edge = graph.get_edge(edge_id).unwrap();
			if edge.target_port().is_all_ports() {
				// Everything is considered connected
				return PortMap::new();
			}
			connected.insert(edge.target_port().clone());
		}

		state
			.graph_input
			.iter()
			.filter(|(port, _)| !connected.contains(port))
			.map(|(port, value)| (port.clone(), value.clone()))
			.collect()
	}

	async fn dispatch_one(
		&mut self,
		graph: &mut TaskGraph,
		state: &mut RunState,
		tasks: &mut JoinSet<TaskSettled>,
		in_progress: &mut HashMap<tokio::task::Id, TaskId>,
		task_id: TaskId,
	) {
		let extra_input = Self::filtered_graph_input(graph, state, &task_id);

		let accepts_streams = {
			let task = graph.get_task(&task_id).unwrap();
			task.streamable() && task.stream_mode() != StreamMode::None
		};

		// Copy inputs from incoming edges. Several edges targeting the
		// same port collect their values into an array, in edge
		// insertion order.
		let mut input_streams = BTreeMap::new();
		let mut port_values: BTreeMap<_, Vec<_>> = BTreeMap::new();
		for edge_id in graph.edges_into(&task_id).to_vec() {
			let stream_error = {
				let edge = graph.get_edge_mut(&edge_id).unwrap();
				if edge.status().is_disabled() {
					continue;
				}

				if edge.has_stream() && accepts_streams {
					let stream = edge.take_stream().unwrap();
					input_streams.insert(edge.target_port().clone(), stream);
					continue;
				}

				// A non-streaming consumer materializes first
				edge.await_stream_value().await.err()
			};

			if let Some(error) = stream_error {
				self.fail_task(graph, state, &task_id, error);
				return;
			}

			let edge = graph.get_edge(&edge_id).unwrap();
			for (port, value) in edge.get_port_data() {
				port_values.entry(port).or_default().push(value);
			}
		}

		let mut edge_input = PortMap::new();
		for (port, mut values) in port_values {
			let value = if values.len() == 1 {
				values.pop().unwrap()
			} else {
				serde_json::Value::Array(values)
			};
			edge_input.insert(port, value);
		}

		let task = graph.get_task_mut(&task_id).unwrap();
		let mut changed = task.add_input(extra_input);
		changed |= task.add_input(edge_input);
		if changed && task.has_children() {
			task.regenerate_graph();
		}

		task.set_status(TaskStatus::Processing);

		let payload = RunPayload {
			executor: task.executor().clone(),
			input: task.run_input().clone(),
			stream_mode: task.stream_mode(),
			cacheable_override: state.cacheable_override,
			cache: state.cache.clone(),
		};

		let ctx = ExecContext {
			task: ThisTaskInfo {
				id: task_id.clone(),
				task_type: task.task_type().clone(),
			},
			registry: state.registry.clone(),
			token: state.token.clone(),
			progress: {
				let sig_tx = state.sig_tx.clone();
				let task_id = task_id.clone();
				ProgressReporter::new(move |progress, partial| {
					let _ = sig_tx.send(RunnerSignal::Progress {
						task_id: task_id.clone(),
						progress,
						partial,
					});
				})
			},
			input_streams,
		};

		for edge_id in graph.edges_out_of(&task_id).to_vec() {
			graph
				.get_edge_mut(&edge_id)
				.unwrap()
				.set_status(TaskStatus::Processing);
		}

		trace!(message = "Dispatching task", task_id = %task_id);
		let spawn_id = task_id.clone();
		let handle = tasks.spawn(async move {
			let result = crate::base::run_pipeline(payload, ctx).await;
			(spawn_id, result)
		});
		in_progress.insert(handle.id(), task_id);
	}

	//
	// MARK: Settle
	//

	fn settle(
		&mut self,
		graph: &mut TaskGraph,
		state: &mut RunState,
		tasks: &mut JoinSet<TaskSettled>,
		in_progress: &mut HashMap<tokio::task::Id, TaskId>,
		task_id: TaskId,
		result: Result<ExecOutcome, RunTaskError>,
	) {
		match result {
			Ok(ExecOutcome::Finished(output)) => {
				self.settle_finished(graph, state, task_id, output);
			}
			Ok(ExecOutcome::Streaming { stream, cache }) => {
				self.settle_streaming(graph, state, tasks, in_progress, task_id, stream, cache);
			}
			Err(RunTaskError::Aborted) => {
				// Not a failure; the run is winding down
				graph
					.get_task_mut(&task_id)
					.unwrap()
					.set_status(TaskStatus::Aborting);
			}
			Err(error) => {
				self.fail_task(graph, state, &task_id, error);
			}
		}
	}

	fn settle_finished(
		&mut self,
		graph: &mut TaskGraph,
		state: &mut RunState,
		task_id: TaskId,
		output: PortMap,
	) {
		trace!(message = "Task finished", task_id = %task_id);

		if state.streamed.contains(&task_id) {
			graph.events().emit(GraphEvent::TaskStreamEnd {
				task_id: task_id.clone(),
			});
		}

		let task = graph.get_task_mut(&task_id).unwrap();
		task.set_run_output(output.clone());
		task.set_progress(100.0);
		task.set_status(TaskStatus::Completed);

		// Push the output block across outgoing edges, gated by the
		// schema layer's verdict
		let block = port_map_to_value(&output);
		let source_schema = graph.get_task(&task_id).unwrap().output_schema().clone();

		let decisions: Vec<_> = graph
			.edges_out_of(&task_id)
			.iter()
			.map(|edge_id| {
				let edge = graph.get_edge(edge_id).unwrap();
				match graph.get_task(edge.target_task()) {
					Some(target) => (
						edge_id.clone(),
						edge.semantically_compatible(
							&source_schema,
							target.input_schema(),
							&state.registry,
						),
						Some(target.executor().clone()),
					),
					None => (edge_id.clone(), Compatibility::Static, None),
				}
			})
			.collect();

		for (edge_id, compatibility, target_executor) in &decisions {
			let narrowed;
			let pushed = match compatibility {
				Compatibility::Static => Some(&block),
				Compatibility::Runtime => {
					let map = match target_executor {
						Some(executor) => {
							executor.narrow_input(value_to_port_map(&block), &state.registry)
						}
						None => value_to_port_map(&block),
					};
					narrowed = port_map_to_value(&map);
					Some(&narrowed)
				}
				// Dropped silently; the edge carries no value
				Compatibility::Incompatible => None,
			};

			if let Some(block) = pushed {
				graph.get_edge_mut(edge_id).unwrap().set_port_data(block);
			}
		}

		// Settle edge statuses. Conditional tasks complete only their
		// active branches and disable the rest.
		let task = graph.get_task(&task_id).unwrap();
		let branches = task.branches();
		let active: Option<BTreeSet<BranchId>> = task.executor().active_branches(&output);

		match branches {
			Some(branches) => {
				let active =
					active.unwrap_or_else(|| branches.iter().map(|b| b.id.clone()).collect());

				for (edge_id, compatibility, _) in &decisions {
					if *compatibility == Compatibility::Incompatible {
						continue;
					}
					let edge = graph.get_edge_mut(edge_id).unwrap();
					let branch = branches
						.iter()
						.find(|b| b.output_port == *edge.source_port());

					match branch {
						Some(branch) if !active.contains(&branch.id) => {
							edge.set_status(TaskStatus::Disabled)
						}
						_ => edge.set_status(TaskStatus::Completed),
					}
				}

				Self::propagate_disabled(graph);
			}
			None => {
				for (edge_id, compatibility, _) in &decisions {
					if *compatibility == Compatibility::Incompatible {
						continue;
					}
					graph
						.get_edge_mut(edge_id)
						.unwrap()
						.set_status(TaskStatus::Completed);
				}
			}
		}

		if graph.edges_out_of(&task_id).is_empty() {
			let task = graph.get_task(&task_id).unwrap();
			state.leaves.push(LeafResult {
				id: task_id.clone(),
				task_type: task.task_type().clone(),
				data: output,
			});
		}

		self.scheduler.on_task_completed(graph, &task_id);
	}

	#[allow(clippy::too_many_arguments)]
	fn settle_streaming(
		&mut self,
		graph: &mut TaskGraph,
		state: &mut RunState,
		tasks: &mut JoinSet<TaskSettled>,
		in_progress: &mut HashMap<tokio::task::Id, TaskId>,
		task_id: TaskId,
		stream: TaskStream,
		cache: Option<(Arc<dyn OutputCache>, String)>,
	) {
		trace!(message = "Task began streaming", task_id = %task_id);

		let (sender, receiver) = crate::base::stream_channel(self.options.stream_channel_capacity);

		// The runner owns the tee: every outgoing edge gets its own
		// receiver before the first event is broadcast.
		for edge_id in graph.edges_out_of(&task_id).to_vec() {
			let edge = graph.get_edge_mut(&edge_id).unwrap();
			edge.set_stream(receiver.clone());
			edge.set_status(TaskStatus::Streaming);
		}
		drop(receiver);

		let task = graph.get_task_mut(&task_id).unwrap();
		let task_type = task.task_type().clone();
		task.set_status(TaskStatus::Streaming);

		graph.events().emit(GraphEvent::TaskStreamStart {
			task_id: task_id.clone(),
		});
		state.streamed.insert(task_id.clone());
		self.scheduler.on_task_streaming(graph, &task_id);

		let token = state.token.clone();
		let sig_tx = state.sig_tx.clone();
		let spawn_id = task_id.clone();
		let handle = tasks.spawn(async move {
			let result = pump_stream(
				stream,
				sender,
				token,
				sig_tx,
				spawn_id.clone(),
				task_type,
				cache,
			)
			.await;
			(spawn_id, result.map(ExecOutcome::Finished))
		});
		in_progress.insert(handle.id(), task_id);
	}

	/// Record a task failure: status and error flow to the task and its
	/// outgoing edges before the scheduler hears about the completion.
	fn fail_task(
		&mut self,
		graph: &mut TaskGraph,
		state: &mut RunState,
		task_id: &TaskId,
		error: RunTaskError,
	) {
		debug!(message = "Task failed", task_id = %task_id, error = %error);

		let task = graph.get_task_mut(task_id).unwrap();
		task.set_error(error.clone());
		task.set_status(TaskStatus::Failed);

		for edge_id in graph.edges_out_of(task_id).to_vec() {
			let edge = graph.get_edge_mut(&edge_id).unwrap();
			edge.set_error(error.clone());
			edge.set_status(TaskStatus::Failed);
		}

		state.failed.push((task_id.clone(), error));
		self.scheduler.on_task_completed(graph, task_id);

		// A fatal error converges on the same controller as `abort`,
		// so in-flight work is asked to wind down
		state.token.cancel();
	}

	/// Disable every pending task whose inputs were all pruned, to a
	/// fixed point. Runs synchronously within the completion that
	/// triggered it, so the scheduler sees a quiesced graph.
	fn propagate_disabled(graph: &mut TaskGraph) {
		loop {
			let mut changed = false;

			for task_id in graph.task_ids().to_vec() {
				let task = graph.get_task(&task_id).unwrap();
				if !task.status().is_pending() {
					continue;
				}

				let in_edges = graph.edges_into(&task_id);
				if in_edges.is_empty() {
					continue;
				}

				let all_disabled = in_edges.iter().all(|edge_id| {
					graph.get_edge(edge_id).unwrap().status().is_disabled()
				});
				if !all_disabled {
					continue;
				}

				trace!(message = "Disabling pruned task", task_id = %task_id);
				graph.get_task_mut(&task_id).unwrap().disable();
				for edge_id in graph.edges_out_of(&task_id).to_vec() {
					graph
						.get_edge_mut(&edge_id)
						.unwrap()
						.set_status(TaskStatus::Disabled);
				}
				changed = true;
			}

			if !changed {
				break;
			}
		}
	}

	fn mark_aborting(graph: &mut TaskGraph) {
		for task_id in graph.task_ids().to_vec() {
			let task = graph.get_task_mut(&task_id).unwrap();
			if task.status().is_running() {
				task.abort();
				for edge_id in graph.edges_out_of(&task_id).to_vec() {
					graph
						.get_edge_mut(&edge_id)
						.unwrap()
						.set_status(TaskStatus::Aborting);
				}
			}
		}
	}

	fn handle_signal(&mut self, graph: &mut TaskGraph, signal: RunnerSignal) {
		match signal {
			RunnerSignal::Progress {
				task_id,
				progress,
				partial,
			} => {
				let Some(task) = graph.get_task_mut(&task_id) else {
					return;
				};

				// A report that raced the task's settlement is stale;
				// it still refreshes the aggregate below.
				if !task.status().is_terminal() {
					task.set_progress(progress);
					let status = task.status();

					// Push status and the partial output to outgoing edges
					if let Some(partial) = partial {
						task.set_run_output(partial.clone());
						let block = port_map_to_value(&partial);
						for edge_id in graph.edges_out_of(&task_id).to_vec() {
							let edge = graph.get_edge_mut(&edge_id).unwrap();
							edge.set_port_data(&block);
							edge.set_status(status);
						}
					}
				}

				let len_tasks = graph.len_tasks();
				let aggregate = if len_tasks > 1 {
					let sum: f32 = graph.iter_tasks().map(|t| t.progress()).sum();
					(sum / len_tasks as f32).round()
				} else {
					progress
				};
				graph
					.events()
					.emit(GraphEvent::GraphProgress { progress: aggregate });
			}

			RunnerSignal::StreamChunk { task_id, event } => {
				graph
					.events()
					.emit(GraphEvent::TaskStreamChunk { task_id, event });
			}
		}
	}

	//
	// MARK: Reactive
	//

	/// Replay the graph serially in topological order, deriving
	/// outputs from buffers already in place. No cache, no streams,
	/// no concurrency; used to refresh derived values after a
	/// configuration change.
	pub async fn run_reactive(
		&mut self,
		graph: &mut TaskGraph,
		graph_input: PortMap,
	) -> Result<Vec<LeafResult>, RunGraphError> {
		if self.running {
			return Err(RunGraphError::AlreadyRunning);
		}
		self.running = true;
		let result = self.run_reactive_inner(graph, graph_input).await;
		self.running = false;
		return result;
	}

	async fn run_reactive_inner(
		&mut self,
		graph: &mut TaskGraph,
		graph_input: PortMap,
	) -> Result<Vec<LeafResult>, RunGraphError> {
		let mut leaves = Vec::new();

		for task_id in graph.topologically_sorted() {
			if graph.get_task(&task_id).unwrap().status().is_disabled() {
				continue;
			}

			// Same graph-input filtering as a live run
			let extra_input = {
				let in_edges = graph.edges_into(&task_id);
				if in_edges.is_empty() {
					graph_input.clone()
				} else {
					let mut connected = BTreeSet::new();
					let mut all = false;
					for edge_id in in_edges {
						let edge = graph.get_edge(edge_id).unwrap();
						if edge.target_port().is_all_ports() {
							all = true;
							break;
						}
						connected.insert(edge.target_port().clone());
					}
					if all {
						PortMap::new()
					} else {
						graph_input
							.iter()
							.filter(|(port, _)| !connected.contains(port))
							.map(|(port, value)| (port.clone(), value.clone()))
							.collect()
					}
				}
			};

			let mut port_values: BTreeMap<_, Vec<_>> = BTreeMap::new();
			for edge_id in graph.edges_into(&task_id).to_vec() {
				let edge = graph.get_edge(&edge_id).unwrap();
				if edge.status().is_disabled() {
					continue;
				}
				for (port, value) in edge.get_port_data() {
					port_values.entry(port).or_default().push(value);
				}
			}

			let mut edge_input = PortMap::new();
			for (port, mut values) in port_values {
				let value = if values.len() == 1 {
					values.pop().unwrap()
				} else {
					serde_json::Value::Array(values)
				};
				edge_input.insert(port, value);
			}

			let task = graph.get_task_mut(&task_id).unwrap();
			task.add_input(extra_input);
			task.add_input(edge_input);

			let output = task
				.run_reactive(None)
				.await
				.map_err(|error| RunGraphError::Task {
					task_id: task_id.clone(),
					error,
				})?;

			let block = port_map_to_value(&output);
			for edge_id in graph.edges_out_of(&task_id).to_vec() {
				graph.get_edge_mut(&edge_id).unwrap().set_port_data(&block);
			}

			if graph.edges_out_of(&task_id).is_empty() {
				let task = graph.get_task(&task_id).unwrap();
				leaves.push(LeafResult {
					id: task_id.clone(),
					task_type: task.task_type().clone(),
					data: output,
				});
			}
		}

		return Ok(leaves);
	}
}
