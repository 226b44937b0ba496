use futures::stream::BoxStream;
use serde_json::Value;

use super::RunTaskError;

/// One event in a task's output stream.
///
/// `execute_stream` produces a lazy sequence of these. The runner pumps
/// the sequence into a broadcast channel so every outgoing edge can
/// observe an identical copy; edges hold [`StreamReceiver`]s.
#[derive(Debug, Clone)]
pub enum StreamEvent {
	/// An append-mode text delta
	TextDelta { text_delta: String },

	/// A structured delta. Reserved; consumers may ignore it.
	ObjectDelta { object_delta: Value },

	/// A replace-mode full snapshot of the output so far
	Snapshot { data: Value },

	/// Terminal. `data` may be empty, or carry the fully
	/// assembled output object.
	Finish { data: Value },

	/// Terminal failure
	Error { error: RunTaskError },
}

impl StreamEvent {
	/// Is this the last event a stream will produce?
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Finish { .. } | Self::Error { .. })
	}
}

/// The lazy event sequence returned by `execute_stream`.
pub type TaskStream = BoxStream<'static, StreamEvent>;

/// The consuming end of a task's broadcast stream.
///
/// Cloning a receiver tees the stream: each clone observes its own copy
/// of every event broadcast after the clone was made. The runner clones
/// receivers before the first event is sent, so all edges see identical
/// sequences. Each receiver must be consumed exactly once.
pub type StreamReceiver = async_broadcast::Receiver<StreamEvent>;

/// The producing end of a task's broadcast stream.
pub type StreamSender = async_broadcast::Sender<StreamEvent>;

/// Make a stream channel with the given capacity.
///
/// Capacity bounds how many events may be buffered for a consumer that
/// has not started reading yet. A pump that overflows this capacity
/// fails the task with a stream error, so capacity should comfortably
/// exceed the longest expected event sequence.
pub fn stream_channel(capacity: usize) -> (StreamSender, StreamReceiver) {
	let (sender, receiver) = async_broadcast::broadcast(capacity);
	return (sender, receiver);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn terminal_events() {
		assert!(StreamEvent::Finish {
			data: Value::Null
		}
		.is_terminal());
		assert!(StreamEvent::Error {
			error: RunTaskError::Aborted
		}
		.is_terminal());
		assert!(!StreamEvent::TextDelta {
			text_delta: "x".into()
		}
		.is_terminal());
	}

	#[tokio::test]
	async fn receivers_tee() {
		let (sender, receiver) = stream_channel(8);
		let mut a = receiver.clone();
		let mut b = receiver;

		sender
			.broadcast(StreamEvent::TextDelta {
				text_delta: "hi".into(),
			})
			.await
			.unwrap();
		drop(sender);

		for rx in [&mut a, &mut b] {
			match rx.recv().await.unwrap() {
				StreamEvent::TextDelta { text_delta } => assert_eq!(text_delta, "hi"),
				_ => panic!("wrong event"),
			}
		}
	}
}
