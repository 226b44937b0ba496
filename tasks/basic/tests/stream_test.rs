mod common;

use serde_json::json;
use std::sync::{Arc, Mutex};

use common::{dispatcher, init_logging, make_task, ports};
use gantry_flow::{
	base::{PortMap, PortName, StreamEvent, StreamMode, TaskId, TaskStatus},
	events::GraphEvent,
	graph::TaskGraph,
	registry::ServiceRegistry,
	runner::{GraphRunner, RunConfig},
};

fn runner() -> GraphRunner {
	GraphRunner::with_registry(ServiceRegistry::new())
}

fn streaming_pair(text: &str) -> TaskGraph {
	let dispatcher = dispatcher();
	let mut graph = TaskGraph::new();

	let mut source = make_task(
		&dispatcher,
		"TextSource",
		"source",
		json!({"text": text, "chunk_size": 4}),
	);
	source.set_stream_mode(StreamMode::Append);
	graph.add_task(source).unwrap();

	let mut sink = make_task(&dispatcher, "TextPipe", "sink", json!({}));
	sink.set_stream_mode(StreamMode::Append);
	graph.add_task(sink).unwrap();

	graph
		.add_edge(
			TaskId::new("source"),
			PortName::new("text"),
			TaskId::new("sink"),
			PortName::new("text"),
		)
		.unwrap();

	return graph;
}

#[tokio::test]
async fn pipe_through_preserves_the_event_sequence() {
	init_logging();
	let mut graph = streaming_pair("hello world!");

	// Record the status timeline and every stream chunk
	let timeline = Arc::new(Mutex::new(Vec::new()));
	{
		let timeline = timeline.clone();
		graph.subscribe_to_task_status(move |task_id, status| {
			timeline.lock().unwrap().push((task_id.clone(), status));
		});
	}

	let chunks: Arc<Mutex<Vec<(TaskId, StreamEvent)>>> = Arc::new(Mutex::new(Vec::new()));
	{
		let chunks = chunks.clone();
		graph.events().on(move |event| {
			if let GraphEvent::TaskStreamChunk { task_id, event } = event {
				chunks.lock().unwrap().push((task_id.clone(), event.clone()));
			}
		});
	}

	let leaves = runner()
		.run(&mut graph, PortMap::new(), RunConfig::default())
		.await
		.unwrap();

	assert_eq!(leaves.len(), 1);
	assert_eq!(leaves[0].id, TaskId::new("sink"));
	assert_eq!(leaves[0].data, ports(json!({"text": "hello world!"})));

	// The sink started while the source was still streaming
	let timeline = timeline.lock().unwrap();
	let sink_started = timeline
		.iter()
		.position(|(id, status)| *id == TaskId::new("sink") && *status == TaskStatus::Processing)
		.unwrap();
	let source_completed = timeline
		.iter()
		.position(|(id, status)| *id == TaskId::new("source") && *status == TaskStatus::Completed)
		.unwrap();
	assert!(sink_started < source_completed);

	// The sink re-emitted the source's deltas, in order
	let chunks = chunks.lock().unwrap();
	let deltas = |task: &str| -> Vec<String> {
		chunks
			.iter()
			.filter(|(id, _)| *id == TaskId::new(task))
			.filter_map(|(_, event)| match event {
				StreamEvent::TextDelta { text_delta } => Some(text_delta.clone()),
				_ => None,
			})
			.collect()
	};
	let source_deltas = deltas("source");
	let sink_deltas = deltas("sink");
	assert_eq!(source_deltas, vec!["hell", "o wo", "rld!"]);
	assert_eq!(source_deltas, sink_deltas);

	// Both finished with their own finish event
	let finishes = chunks
		.iter()
		.filter(|(_, event)| matches!(event, StreamEvent::Finish { .. }))
		.count();
	assert_eq!(finishes, 2);
}

#[tokio::test]
async fn source_output_materializes_from_the_stream() {
	init_logging();
	let mut graph = streaming_pair("abcdefgh");

	runner()
		.run(&mut graph, PortMap::new(), RunConfig::default())
		.await
		.unwrap();

	let source = graph.get_task(&TaskId::new("source")).unwrap();
	assert_eq!(source.status(), TaskStatus::Completed);
	assert_eq!(source.run_output(), &ports(json!({"text": "abcdefgh"})));
}

#[tokio::test]
async fn non_streaming_consumer_materializes_first() {
	init_logging();
	let dispatcher = dispatcher();
	let mut graph = TaskGraph::new();

	let mut source = make_task(
		&dispatcher,
		"TextSource",
		"source",
		json!({"text": "stream me", "chunk_size": 3}),
	);
	source.set_stream_mode(StreamMode::Append);
	graph.add_task(source).unwrap();

	// Streamable type, but this instance opted out: it only sees
	// the materialized value
	graph
		.add_task(make_task(&dispatcher, "TextPipe", "batch", json!({})))
		.unwrap();

	graph
		.add_edge(
			TaskId::new("source"),
			PortName::new("text"),
			TaskId::new("batch"),
			PortName::new("text"),
		)
		.unwrap();

	let leaves = runner()
		.run(&mut graph, PortMap::new(), RunConfig::default())
		.await
		.unwrap();

	assert_eq!(leaves.len(), 1);
	assert_eq!(leaves[0].data, ports(json!({"text": "stream me"})));
}

#[tokio::test]
async fn streaming_fans_out_to_several_consumers() {
	init_logging();
	let dispatcher = dispatcher();
	let mut graph = TaskGraph::new();

	let mut source = make_task(
		&dispatcher,
		"TextSource",
		"source",
		json!({"text": "tee this", "chunk_size": 2}),
	);
	source.set_stream_mode(StreamMode::Append);
	graph.add_task(source).unwrap();

	for id in ["sink1", "sink2"] {
		let mut sink = make_task(&dispatcher, "TextPipe", id, json!({}));
		sink.set_stream_mode(StreamMode::Append);
		graph.add_task(sink).unwrap();
		graph
			.add_edge(
				TaskId::new("source"),
				PortName::new("text"),
				TaskId::new(id),
				PortName::new("text"),
			)
			.unwrap();
	}

	let leaves = runner()
		.run(&mut graph, PortMap::new(), RunConfig::default())
		.await
		.unwrap();

	// Each sink consumed its own tee of the same stream
	assert_eq!(leaves.len(), 2);
	for leaf in leaves {
		assert_eq!(leaf.data, ports(json!({"text": "tee this"})));
	}
}
