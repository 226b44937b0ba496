//! The dataflow edge: a directed, labelled connection from one task's
//! output port to another task's input port.
//!
//! Besides its endpoints, an edge carries runtime state: the value that
//! flowed across it, a status mirroring its source task, an optional
//! error, and an optional live stream.

use serde_json::Value;
use std::sync::Arc;

use crate::{
	base::{
		value_to_port_map, EdgeId, PortMap, PortName, RunTaskError, StreamEvent, StreamReceiver,
		TaskId, TaskStatus,
	},
	events::{EdgeEvent, Emitter},
	registry::{Compatibility, ServiceRegistry},
};

/// A directed edge between two task ports.
pub struct Dataflow {
	id: EdgeId,

	source_task: TaskId,
	source_port: PortName,
	target_task: TaskId,
	target_port: PortName,

	status: TaskStatus,
	value: Option<Value>,
	error: Option<RunTaskError>,
	stream: Option<StreamReceiver>,

	events: Arc<Emitter<EdgeEvent>>,
}

impl Dataflow {
	pub fn new(
		source_task: TaskId,
		source_port: PortName,
		target_task: TaskId,
		target_port: PortName,
	) -> Self {
		Self {
			id: EdgeId::derive(&source_task, &source_port, &target_task, &target_port),
			source_task,
			source_port,
			target_task,
			target_port,
			status: TaskStatus::Pending,
			value: None,
			error: None,
			stream: None,
			events: Arc::new(Emitter::new()),
		}
	}

	//
	// MARK: Accessors
	//

	pub fn id(&self) -> &EdgeId {
		&self.id
	}

	pub fn source_task(&self) -> &TaskId {
		&self.source_task
	}

	pub fn source_port(&self) -> &PortName {
		&self.source_port
	}

	pub fn target_task(&self) -> &TaskId {
		&self.target_task
	}

	pub fn target_port(&self) -> &PortName {
		&self.target_port
	}

	pub fn status(&self) -> TaskStatus {
		self.status
	}

	pub fn value(&self) -> Option<&Value> {
		self.value.as_ref()
	}

	pub fn error(&self) -> Option<&RunTaskError> {
		self.error.as_ref()
	}

	pub fn events(&self) -> &Arc<Emitter<EdgeEvent>> {
		&self.events
	}

	//
	// MARK: Streams
	//

	/// Attach a live stream. The receiver must be this edge's private
	/// tee; it is consumed exactly once, either by the target task or
	/// by [`Dataflow::await_stream_value`].
	pub fn set_stream(&mut self, stream: StreamReceiver) {
		self.stream = Some(stream);
	}

	pub fn has_stream(&self) -> bool {
		self.stream.is_some()
	}

	/// Detach and return the stream, handing consumption to the caller
	pub fn take_stream(&mut self) -> Option<StreamReceiver> {
		self.stream.take()
	}

	//
	// MARK: Port-level data
	//

	/// Store a piece of a source task's output block on this edge,
	/// interpreted according to the source port:
	/// the whole block under `*`, the error payload under `[error]`,
	/// and `block[port]` otherwise.
	pub fn set_port_data(&mut self, block: &Value) {
		if self.source_port.is_all_ports() {
			self.value = Some(block.clone());
		} else if self.source_port.is_error_port() {
			self.error = Some(RunTaskError::Stream {
				message: block.to_string(),
			});
		} else {
			self.value = block.get(self.source_port.id().as_str()).cloned();
		}
	}

	/// Record a source task's failure on this edge
	pub fn set_error(&mut self, error: RunTaskError) {
		self.error = Some(error);
	}

	/// Read this edge's contribution to the target task's input,
	/// keyed according to the target port: every entry of the value
	/// under `*`, the error payload under `[error]`, and a one-entry
	/// map otherwise.
	pub fn get_port_data(&self) -> PortMap {
		if self.target_port.is_all_ports() {
			return match &self.value {
				Some(value) => value_to_port_map(value),
				None => PortMap::new(),
			};
		}

		if self.target_port.is_error_port() {
			let mut map = PortMap::new();
			if let Some(error) = &self.error {
				map.insert(
					PortName::error_port(),
					Value::String(error.to_string()),
				);
			}
			return map;
		}

		let mut map = PortMap::new();
		if let Some(value) = &self.value {
			map.insert(self.target_port.clone(), value.clone());
		}
		return map;
	}

	/// Consume the attached stream and materialize a final value.
	///
	/// The last snapshot wins; otherwise non-empty finish data;
	/// otherwise concatenated text deltas (stored as `{text: ...}`
	/// when the source port is `*`, as a plain string otherwise).
	/// An error event marks this edge failed and is surfaced.
	///
	/// No-op when no stream is attached. The stream is cleared
	/// afterwards either way.
	pub async fn await_stream_value(&mut self) -> Result<(), RunTaskError> {
		let Some(mut stream) = self.stream.take() else {
			return Ok(());
		};

		let mut text = String::new();
		let mut snapshot: Option<Value> = None;
		let mut finish: Option<Value> = None;

		loop {
			match stream.recv().await {
				Ok(StreamEvent::TextDelta { text_delta }) => text.push_str(&text_delta),
				Ok(StreamEvent::ObjectDelta { .. }) => {}
				Ok(StreamEvent::Snapshot { data }) => snapshot = Some(data),
				Ok(StreamEvent::Finish { data }) => {
					if !crate::base::is_empty_value(&data) {
						finish = Some(data);
					}
					break;
				}
				Ok(StreamEvent::Error { error }) => {
					self.error = Some(error.clone());
					self.set_status(TaskStatus::Failed);
					return Err(error);
				}
				Err(async_broadcast::RecvError::Overflowed(n)) => {
					let error = RunTaskError::Stream {
						message: format!("missed {n} stream events"),
					};
					self.error = Some(error.clone());
					self.set_status(TaskStatus::Failed);
					return Err(error);
				}
				Err(async_broadcast::RecvError::Closed) => break,
			}
		}

		if let Some(block) = snapshot.or(finish) {
			self.set_port_data(&block);
		} else if !text.is_empty() {
			if self.source_port.is_all_ports() {
				self.value = Some(serde_json::json!({ "text": text }));
			} else {
				self.value = Some(Value::String(text));
			}
		}

		return Ok(());
	}

	//
	// MARK: Lifecycle
	//

	/// Change this edge's status, emitting the matching lifecycle event
	/// followed by a status event. Idempotent.
	pub fn set_status(&mut self, status: TaskStatus) {
		if self.status == status {
			return;
		}
		self.status = status;

		match status {
			TaskStatus::Pending => self.events.emit(EdgeEvent::Reset),
			TaskStatus::Processing => self.events.emit(EdgeEvent::Start),
			TaskStatus::Streaming => self.events.emit(EdgeEvent::Streaming),
			TaskStatus::Completed => self.events.emit(EdgeEvent::Complete),
			TaskStatus::Aborting => self.events.emit(EdgeEvent::Abort),
			TaskStatus::Failed => {
				if let Some(error) = &self.error {
					self.events.emit(EdgeEvent::Error {
						error: error.clone(),
					});
				}
			}
			TaskStatus::Disabled => self.events.emit(EdgeEvent::Disabled),
		}

		self.events.emit(EdgeEvent::Status { status });
	}

	/// Re-initialize this edge for a fresh run
	pub fn reset(&mut self) {
		self.value = None;
		self.error = None;
		self.stream = None;
		self.set_status(TaskStatus::Pending);
	}

	/// Evaluate this edge's schema compatibility, given the source
	/// task's output schema and the target task's input schema.
	pub fn semantically_compatible(
		&self,
		source_schema: &Value,
		target_schema: &Value,
		registry: &ServiceRegistry,
	) -> Compatibility {
		registry.compatibility(
			source_schema,
			&self.source_port,
			target_schema,
			&self.target_port,
		)
	}
}

impl std::fmt::Debug for Dataflow {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Dataflow")
			.field("id", &self.id)
			.field("status", &self.status)
			.field("value", &self.value)
			.finish()
	}
}
