//! Output caching keyed by task type and canonical input.
//!
//! Only tasks that declare themselves cacheable consult the cache.
//! A hit short-circuits `execute` entirely; the retrieved output still
//! flows through the normal output-propagation path, so edges observe
//! the hit like any other completion.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use smartstring::{LazyCompact, SmartString};
use std::{collections::HashMap, fmt::Write, sync::Arc};
use tokio::sync::Mutex;

use crate::base::PortMap;

/// A keyed store of previously produced task outputs.
///
/// Shared by every task in a run; implementations provide their own
/// concurrency control.
#[async_trait]
pub trait OutputCache: Send + Sync {
	/// Look up the output a task of `task_type` produced for this input
	async fn get(&self, task_type: &str, input_key: &str) -> Option<PortMap>;

	/// Store a task's output
	async fn put(&self, task_type: &str, input_key: &str, output: &PortMap);
}

/// Digest a run input into a fixed-size cache key.
///
/// Port maps serialize with sorted keys, so equal inputs always
/// produce equal keys.
pub fn input_cache_key(input: &PortMap) -> String {
	let canonical = serde_json::to_string(input).unwrap();

	let mut hasher = Sha256::new();
	hasher.update(canonical.as_bytes());

	let mut key = String::new();
	for byte in hasher.finalize() {
		write!(key, "{byte:02x}").unwrap();
	}
	return key;
}

/// How a graph run resolves its output cache.
#[derive(Clone)]
pub enum CacheChoice {
	/// Use the cache registered in the service registry, if any
	Default,

	/// Run without a cache
	Disabled,

	/// Use this cache instance as-is
	Instance(Arc<dyn OutputCache>),
}

impl Default for CacheChoice {
	fn default() -> Self {
		return Self::Default;
	}
}

/// An in-memory [`OutputCache`].
pub struct MemoryCache {
	entries: Mutex<HashMap<(SmartString<LazyCompact>, String), PortMap>>,
}

impl MemoryCache {
	pub fn new() -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
		}
	}

	/// The number of cached outputs
	pub async fn len(&self) -> usize {
		self.entries.lock().await.len()
	}

	/// Drop every cached output
	pub async fn clear(&self) {
		self.entries.lock().await.clear();
	}
}

#[async_trait]
impl OutputCache for MemoryCache {
	async fn get(&self, task_type: &str, input_key: &str) -> Option<PortMap> {
		self.entries
			.lock()
			.await
			.get(&(task_type.into(), input_key.into()))
			.cloned()
	}

	async fn put(&self, task_type: &str, input_key: &str, output: &PortMap) {
		self.entries
			.lock()
			.await
			.insert((task_type.into(), input_key.into()), output.clone());
	}
}
