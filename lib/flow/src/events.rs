//! Per-task, per-edge, and per-graph event subscription.
//!
//! Subscriptions are cheap and synchronous; listeners run in emission
//! order per emitter, but no ordering is guaranteed across emitters.

use std::sync::{
	atomic::{AtomicU64, Ordering},
	Arc, Mutex,
};

use crate::base::{EdgeId, RunTaskError, StreamEvent, TaskId, TaskStatus};

/// A handle to a registered listener.
/// Pass it to [`Emitter::off`] to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

struct Listener<E> {
	id: u64,
	once: bool,
	callback: Arc<dyn Fn(&E) + Send + Sync>,
}

/// A small synchronous event bus.
///
/// `emit` invokes every listener inline. An `async_broadcast` channel
/// backs [`Emitter::wait_on`], so any number of async waiters can park
/// on a predicate without registering callbacks.
pub struct Emitter<E: Clone> {
	listeners: Mutex<Vec<Listener<E>>>,
	id_counter: AtomicU64,

	waiter_tx: async_broadcast::Sender<E>,

	// Keeps the waiter channel open while nobody is waiting
	_waiter_rx: async_broadcast::InactiveReceiver<E>,
}

impl<E: Clone + Send + Sync + 'static> Emitter<E> {
	pub fn new() -> Self {
		let (mut waiter_tx, waiter_rx) = async_broadcast::broadcast(64);
		waiter_tx.set_overflow(true);

		Self {
			listeners: Mutex::new(Vec::new()),
			id_counter: AtomicU64::new(0),
			waiter_tx,
			_waiter_rx: waiter_rx.deactivate(),
		}
	}

	fn register(&self, once: bool, callback: Arc<dyn Fn(&E) + Send + Sync>) -> Subscription {
		let id = self.id_counter.fetch_add(1, Ordering::Relaxed);
		self.listeners
			.lock()
			.unwrap()
			.push(Listener { id, once, callback });
		return Subscription(id);
	}

	/// Call `callback` on every event until unsubscribed.
	pub fn on(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
		self.register(false, Arc::new(callback))
	}

	/// Call `callback` on the next event only.
	pub fn once(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
		self.register(true, Arc::new(callback))
	}

	/// Remove a listener. Unknown subscriptions are ignored.
	pub fn off(&self, subscription: Subscription) {
		self.listeners
			.lock()
			.unwrap()
			.retain(|l| l.id != subscription.0);
	}

	/// Emit an event to every listener and waiter.
	pub fn emit(&self, event: E) {
		// Snapshot under the lock, invoke outside it. Listeners may
		// subscribe or unsubscribe from inside a callback.
		let callbacks: Vec<Arc<dyn Fn(&E) + Send + Sync>> = {
			let mut listeners = self.listeners.lock().unwrap();
			let snapshot = listeners.iter().map(|l| l.callback.clone()).collect();
			listeners.retain(|l| !l.once);
			snapshot
		};

		for callback in callbacks {
			callback(&event);
		}

		// Nobody waiting is fine; so is an overflowed waiter.
		let _ = self.waiter_tx.try_broadcast(event);
	}

	/// Wait for the next event matching `predicate` and return it.
	pub async fn wait_on(&self, predicate: impl Fn(&E) -> bool) -> E {
		let mut receiver = self.waiter_tx.new_receiver();
		loop {
			match receiver.recv().await {
				Ok(event) if predicate(&event) => return event,
				Ok(_) => {}
				// Slow waiters skip events they missed
				Err(async_broadcast::RecvError::Overflowed(_)) => {}
				Err(async_broadcast::RecvError::Closed) => {
					// The emitter outlives this borrow, so the channel
					// cannot close while we wait.
					unreachable!()
				}
			}
		}
	}

	/// How many listeners are currently registered?
	pub fn len_listeners(&self) -> usize {
		self.listeners.lock().unwrap().len()
	}
}

//
// MARK: Event types
//

/// Events emitted by a single task
#[derive(Debug, Clone)]
pub enum TaskEvent {
	/// The status changed to the given value.
	/// Always accompanies the specific lifecycle event.
	Status { status: TaskStatus },

	/// Execution started
	Start,

	/// The task began streaming
	Streaming,

	/// The task finished successfully
	Complete,

	/// The task was asked to abort
	Abort,

	/// The task failed
	Error { error: RunTaskError },

	/// The task was reset to pending
	Reset,

	/// The task was disabled by branch pruning
	Disabled,

	/// Progress changed, in percent
	Progress { progress: f32 },
}

/// Events emitted by a single dataflow edge
#[derive(Debug, Clone)]
pub enum EdgeEvent {
	/// The status changed to the given value.
	/// Always accompanies the specific lifecycle event.
	Status { status: TaskStatus },

	/// The source task started
	Start,

	/// A live stream was attached
	Streaming,

	/// The source task finished and this edge carries its value
	Complete,

	/// The source task was asked to abort
	Abort,

	/// The source task failed
	Error { error: RunTaskError },

	/// The edge was reset to pending
	Reset,

	/// This edge was disabled by branch pruning
	Disabled,
}

/// Events emitted by the graph as a whole
#[derive(Debug, Clone)]
pub enum GraphEvent {
	/// A run started
	Start,

	/// A run finished successfully
	Complete,

	/// A run failed; carries the first recorded task error
	Error { error: RunTaskError },

	/// A run was aborted
	Abort,

	/// The remaining pending tasks were disabled
	Disabled,

	/// Aggregate progress over all tasks, in percent
	GraphProgress { progress: f32 },

	/// A task was added to the graph
	TaskAdded { task_id: TaskId },

	/// A task was removed from the graph
	TaskRemoved { task_id: TaskId },

	/// A task was replaced in place
	TaskReplaced { task_id: TaskId },

	/// A dataflow was added to the graph
	DataflowAdded { edge_id: EdgeId },

	/// A dataflow was removed from the graph
	DataflowRemoved { edge_id: EdgeId },

	/// A dataflow was replaced in place
	DataflowReplaced { edge_id: EdgeId },

	/// A task began streaming
	TaskStreamStart { task_id: TaskId },

	/// A streaming task produced an event
	TaskStreamChunk {
		task_id: TaskId,
		event: StreamEvent,
	},

	/// A task's stream ended
	TaskStreamEnd { task_id: TaskId },

	/// An event forwarded from a task in this graph.
	/// Tasks added later are forwarded too.
	Task {
		task_id: TaskId,
		event: TaskEvent,
	},

	/// An event forwarded from a dataflow in this graph.
	/// Dataflows added later are forwarded too.
	Dataflow {
		edge_id: EdgeId,
		event: EdgeEvent,
	},
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use super::*;

	#[test]
	fn on_off_once() {
		let emitter: Emitter<u32> = Emitter::new();
		let count = Arc::new(AtomicUsize::new(0));

		let c = count.clone();
		let sub = emitter.on(move |_| {
			c.fetch_add(1, Ordering::Relaxed);
		});

		let c = count.clone();
		emitter.once(move |_| {
			c.fetch_add(10, Ordering::Relaxed);
		});

		emitter.emit(1);
		emitter.emit(2);
		assert_eq!(count.load(Ordering::Relaxed), 12);

		emitter.off(sub);
		emitter.emit(3);
		assert_eq!(count.load(Ordering::Relaxed), 12);
		assert_eq!(emitter.len_listeners(), 0);
	}

	#[tokio::test]
	async fn wait_on_matches() {
		let emitter: Arc<Emitter<u32>> = Arc::new(Emitter::new());

		let waiter = {
			let emitter = emitter.clone();
			tokio::spawn(async move { emitter.wait_on(|e| *e == 7).await })
		};

		// Give the waiter a chance to subscribe
		tokio::task::yield_now().await;
		for i in 0..10 {
			emitter.emit(i);
		}

		assert_eq!(waiter.await.unwrap(), 7);
	}

	#[test]
	fn listener_may_subscribe_during_emit() {
		let emitter: Arc<Emitter<u32>> = Arc::new(Emitter::new());
		let inner = emitter.clone();
		emitter.once(move |_| {
			inner.on(|_| {});
		});
		emitter.emit(0);
		assert_eq!(emitter.len_listeners(), 1);
	}
}
