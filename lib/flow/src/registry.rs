//! A hierarchical registry of shared services.
//!
//! The registry is the only shared mutable resource handed to tasks.
//! It is read-mostly: every graph run gets a copy-on-write child scope,
//! so tests and callers can override factories without racing the
//! global scope.

use serde_json::Value;
use smartstring::{LazyCompact, SmartString};
use std::{
	any::Any,
	collections::HashMap,
	sync::{Arc, OnceLock, RwLock},
};

use crate::{
	base::{PortName, RunTaskError},
	cache::OutputCache,
};

/// The verdict of the schema-compatibility callback for one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
	/// The ports are statically compatible; values pass unchanged
	Static,

	/// Compatible after narrowing the value at runtime
	Runtime,

	/// Not compatible; values are dropped silently
	Incompatible,
}

/// Decides whether a source port's schema may feed a target port.
///
/// Arguments: source output schema, source port, target input schema,
/// target port. The engine treats the verdict as authoritative and
/// never inspects schemas itself.
pub type CompatibilityFn =
	dyn Fn(&Value, &PortName, &Value, &PortName) -> Compatibility + Send + Sync;

/// Resolves an input value whose schema carries a JSON-Schema `format`
/// this factory was registered for.
pub type FormatFactory = dyn Fn(&Value) -> Result<Value, RunTaskError> + Send + Sync;

/// A hierarchical service container.
///
/// Lookups walk up the parent chain; writes always land in the local
/// scope, shadowing the parent.
pub struct ServiceRegistry {
	parent: Option<Arc<ServiceRegistry>>,

	services: RwLock<HashMap<SmartString<LazyCompact>, Arc<dyn Any + Send + Sync>>>,
	format_factories: RwLock<HashMap<SmartString<LazyCompact>, Arc<FormatFactory>>>,
	compatibility: RwLock<Option<Arc<CompatibilityFn>>>,
	default_cache: RwLock<Option<Arc<dyn OutputCache>>>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<ServiceRegistry>> = OnceLock::new();

impl ServiceRegistry {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			parent: None,
			services: RwLock::new(HashMap::new()),
			format_factories: RwLock::new(HashMap::new()),
			compatibility: RwLock::new(None),
			default_cache: RwLock::new(None),
		})
	}

	/// The process-wide root registry
	pub fn global() -> &'static Arc<ServiceRegistry> {
		GLOBAL_REGISTRY.get_or_init(Self::new)
	}

	/// Make a child scope of this registry
	pub fn child(self: &Arc<Self>) -> Arc<ServiceRegistry> {
		Arc::new(Self {
			parent: Some(self.clone()),
			services: RwLock::new(HashMap::new()),
			format_factories: RwLock::new(HashMap::new()),
			compatibility: RwLock::new(None),
			default_cache: RwLock::new(None),
		})
	}

	//
	// MARK: Services
	//

	/// Register a service in this scope, shadowing any parent entry
	pub fn register<T: Send + Sync + 'static>(&self, name: &str, service: Arc<T>) {
		self.services.write().unwrap().insert(name.into(), service);
	}

	/// Look up a service by name, walking up the parent chain.
	/// Returns `None` if the name is unknown or the type doesn't match.
	pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
		if let Some(service) = self.services.read().unwrap().get(name) {
			return service.clone().downcast::<T>().ok();
		}

		match &self.parent {
			Some(parent) => parent.get(name),
			None => None,
		}
	}

	//
	// MARK: Format factories
	//

	/// Register a resolver for a JSON-Schema `format` annotation
	pub fn register_format(&self, format: &str, factory: Arc<FormatFactory>) {
		self.format_factories
			.write()
			.unwrap()
			.insert(format.into(), factory);
	}

	/// Look up a format resolver, walking up the parent chain
	pub fn format_factory(&self, format: &str) -> Option<Arc<FormatFactory>> {
		if let Some(factory) = self.format_factories.read().unwrap().get(format) {
			return Some(factory.clone());
		}

		match &self.parent {
			Some(parent) => parent.format_factory(format),
			None => None,
		}
	}

	//
	// MARK: Schema compatibility
	//

	/// Install the schema-compatibility callback for this scope
	pub fn set_compatibility_fn(&self, callback: Arc<CompatibilityFn>) {
		*self.compatibility.write().unwrap() = Some(callback);
	}

	/// Evaluate schema compatibility for one edge.
	/// Without a registered callback everything is statically compatible.
	pub fn compatibility(
		&self,
		source_schema: &Value,
		source_port: &PortName,
		target_schema: &Value,
		target_port: &PortName,
	) -> Compatibility {
		if let Some(callback) = self.compatibility.read().unwrap().as_ref() {
			return callback(source_schema, source_port, target_schema, target_port);
		}

		match &self.parent {
			Some(parent) => {
				parent.compatibility(source_schema, source_port, target_schema, target_port)
			}
			None => Compatibility::Static,
		}
	}

	//
	// MARK: Default cache
	//

	/// Install the default output cache for this scope
	pub fn set_default_cache(&self, cache: Arc<dyn OutputCache>) {
		*self.default_cache.write().unwrap() = Some(cache);
	}

	/// The default output cache, walking up the parent chain
	pub fn default_cache(&self) -> Option<Arc<dyn OutputCache>> {
		if let Some(cache) = self.default_cache.read().unwrap().as_ref() {
			return Some(cache.clone());
		}

		match &self.parent {
			Some(parent) => parent.default_cache(),
			None => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn child_scope_shadows_parent() {
		let root = ServiceRegistry::new();
		root.register("limit", Arc::new(10_u32));

		let child = root.child();
		assert_eq!(child.get::<u32>("limit").as_deref(), Some(&10));

		child.register("limit", Arc::new(20_u32));
		assert_eq!(child.get::<u32>("limit").as_deref(), Some(&20));

		// The parent is untouched
		assert_eq!(root.get::<u32>("limit").as_deref(), Some(&10));
	}

	#[test]
	fn wrong_type_is_none() {
		let root = ServiceRegistry::new();
		root.register("limit", Arc::new(10_u32));
		assert!(root.get::<String>("limit").is_none());
	}

	#[test]
	fn default_compatibility_is_static() {
		let root = ServiceRegistry::new();
		let verdict = root.compatibility(
			&Value::Null,
			&PortName::new("a"),
			&Value::Null,
			&PortName::new("b"),
		);
		assert_eq!(verdict, Compatibility::Static);
	}

	#[test]
	fn compatibility_fn_resolves_through_children() {
		let root = ServiceRegistry::new();
		root.set_compatibility_fn(Arc::new(|_, _, _, _| Compatibility::Incompatible));

		let child = root.child();
		let verdict = child.compatibility(
			&Value::Null,
			&PortName::new("a"),
			&Value::Null,
			&PortName::new("b"),
		);
		assert_eq!(verdict, Compatibility::Incompatible);
	}
}
