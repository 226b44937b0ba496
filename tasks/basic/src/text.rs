use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use gantry_flow::base::{
	ConfigMap, ExecContext, PortMap, PortName, RunTaskError, StreamEvent, StreamReceiver,
	TaskExecutor, TaskSpec, TaskStream,
};

/// Streams its configured `text` as append-mode deltas.
///
/// Chunk boundaries fall every `chunk_size` characters. The finish
/// event is left bare; the runner enriches it with the accumulated
/// output for downstream consumers.
pub struct TextSource {
	spec: TaskSpec,
	text: String,
	chunk_size: usize,
}

impl TextSource {
	pub fn new(config: &ConfigMap) -> Result<Self, RunTaskError> {
		//
		// Extract parameters
		//
		let text = match config.get("text") {
			Some(Value::String(text)) => text.clone(),
			Some(_) => {
				return Err(RunTaskError::BadParameterType {
					parameter: "text".into(),
				})
			}
			None => {
				return Err(RunTaskError::MissingParameter {
					parameter: "text".into(),
				})
			}
		};

		let chunk_size = match config.get("chunk_size") {
			Some(value) => value.as_u64().ok_or(RunTaskError::BadParameterType {
				parameter: "chunk_size".into(),
			})? as usize,
			None => 4,
		};
		if chunk_size == 0 {
			return Err(RunTaskError::BadParameterType {
				parameter: "chunk_size".into(),
			});
		}

		let mut spec = TaskSpec::new("TextSource");
		spec.streamable = true;

		return Ok(Self {
			spec,
			text,
			chunk_size,
		});
	}

	fn chunks(&self) -> Vec<String> {
		let chars: Vec<char> = self.text.chars().collect();
		chars
			.chunks(self.chunk_size)
			.map(|chunk| chunk.iter().collect())
			.collect()
	}
}

#[async_trait]
impl TaskExecutor for TextSource {
	fn spec(&self) -> &TaskSpec {
		&self.spec
	}

	async fn execute(&self, _input: &PortMap, _ctx: &ExecContext) -> Result<PortMap, RunTaskError> {
		// Non-streaming path: the whole text at once
		let mut out = PortMap::new();
		out.insert(PortName::new("text"), json!(self.text));
		return Ok(out);
	}

	fn execute_stream(
		&self,
		_input: PortMap,
		_ctx: ExecContext,
	) -> Result<TaskStream, RunTaskError> {
		let events: Vec<StreamEvent> = self
			.chunks()
			.into_iter()
			.map(|text_delta| StreamEvent::TextDelta { text_delta })
			.chain([StreamEvent::Finish { data: json!({}) }])
			.collect();

		return Ok(futures::stream::iter(events).boxed());
	}
}

/// Pipes an inbound text stream through: every delta is re-emitted
/// as it arrives, followed by this task's own finish event carrying
/// the accumulated text.
pub struct TextPipe {
	spec: TaskSpec,
}

impl TextPipe {
	pub fn new() -> Self {
		let mut spec = TaskSpec::new("TextPipe");
		spec.streamable = true;
		Self { spec }
	}
}

enum PipeState {
	Forwarding { stream: StreamReceiver, acc: String },
	Done,
}

#[async_trait]
impl TaskExecutor for TextPipe {
	fn spec(&self) -> &TaskSpec {
		&self.spec
	}

	async fn execute(&self, input: &PortMap, _ctx: &ExecContext) -> Result<PortMap, RunTaskError> {
		// Non-streaming path: pass the materialized text through
		let text = input
			.get(&PortName::new("text"))
			.and_then(Value::as_str)
			.unwrap_or_default();

		let mut out = PortMap::new();
		out.insert(PortName::new("text"), json!(text));
		return Ok(out);
	}

	fn execute_stream(
		&self,
		input: PortMap,
		mut ctx: ExecContext,
	) -> Result<TaskStream, RunTaskError> {
		let Some(stream) = ctx.input_streams.remove(&PortName::new("text")) else {
			// No live stream arrived; emit the materialized input
			// in a single chunk.
			let text = input
				.get(&PortName::new("text"))
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_owned();

			let events = vec![
				StreamEvent::TextDelta {
					text_delta: text.clone(),
				},
				StreamEvent::Finish {
					data: json!({ "text": text }),
				},
			];
			return Ok(futures::stream::iter(events).boxed());
		};

		let stream = futures::stream::unfold(
			PipeState::Forwarding {
				stream,
				acc: String::new(),
			},
			|state| async move {
				let PipeState::Forwarding {
					mut stream,
					mut acc,
				} = state
				else {
					return None;
				};

				loop {
					match stream.recv().await {
						Ok(StreamEvent::TextDelta { text_delta }) => {
							acc.push_str(&text_delta);
							return Some((
								StreamEvent::TextDelta { text_delta },
								PipeState::Forwarding { stream, acc },
							));
						}
						Ok(StreamEvent::Snapshot { data }) => {
							return Some((
								StreamEvent::Snapshot { data },
								PipeState::Forwarding { stream, acc },
							));
						}
						Ok(StreamEvent::ObjectDelta { object_delta }) => {
							return Some((
								StreamEvent::ObjectDelta { object_delta },
								PipeState::Forwarding { stream, acc },
							));
						}
						// The upstream finish is replaced by our own
						Ok(StreamEvent::Finish { .. })
						| Err(async_broadcast::RecvError::Closed) => {
							return Some((
								StreamEvent::Finish {
									data: json!({ "text": acc }),
								},
								PipeState::Done,
							));
						}
						Ok(StreamEvent::Error { error }) => {
							return Some((StreamEvent::Error { error }, PipeState::Done));
						}
						Err(async_broadcast::RecvError::Overflowed(_)) => continue,
					}
				}
			},
		);

		return Ok(stream.boxed());
	}
}
