//! Helpful types

use serde::{Deserialize, Serialize};
use smartstring::{LazyCompact, SmartString};
use std::fmt::Display;

/// The reserved port name that refers to a task's whole
/// input or output object.
pub const ALL_PORTS: &str = "*";

/// The reserved port name that carries a task's error payload.
pub const ERROR_PORT: &str = "[error]";

/// A task's id
#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TaskId(SmartString<LazyCompact>);

impl TaskId {
	/// Make a new task id
	pub fn new(id: &str) -> Self {
		Self(id.into())
	}

	/// get the id
	pub fn id(&self) -> &SmartString<LazyCompact> {
		&self.0
	}
}

impl Display for TaskId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

impl From<String> for TaskId {
	fn from(value: String) -> Self {
		Self::new(&value)
	}
}

impl From<&str> for TaskId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

/// A task's port's name
#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PortName(SmartString<LazyCompact>);

impl PortName {
	/// Make a new port name
	pub fn new(id: &str) -> Self {
		Self(id.into())
	}

	/// The port name that addresses the whole input/output object
	pub fn all_ports() -> Self {
		Self(ALL_PORTS.into())
	}

	/// The port name that addresses the error payload
	pub fn error_port() -> Self {
		Self(ERROR_PORT.into())
	}

	/// get the name
	pub fn id(&self) -> &SmartString<LazyCompact> {
		&self.0
	}

	/// Does this port address the whole input/output object?
	pub fn is_all_ports(&self) -> bool {
		self.0 == ALL_PORTS
	}

	/// Does this port address the error payload?
	pub fn is_error_port(&self) -> bool {
		self.0 == ERROR_PORT
	}
}

impl Display for PortName {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

impl From<String> for PortName {
	fn from(value: String) -> Self {
		Self::new(&value)
	}
}

impl From<&str> for PortName {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

/// A conditional task's branch id
#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct BranchId(SmartString<LazyCompact>);

impl BranchId {
	/// Make a new branch id
	pub fn new(id: &str) -> Self {
		Self(id.into())
	}

	/// get the id
	pub fn id(&self) -> &SmartString<LazyCompact> {
		&self.0
	}
}

impl Display for BranchId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

impl From<&str> for BranchId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

/// A dataflow edge's identity.
///
/// Fully determined by the edge's four endpoint fields,
/// so it is never serialized.
#[derive(Debug, Hash, PartialEq, Eq, Clone, PartialOrd, Ord)]
pub struct EdgeId(SmartString<LazyCompact>);

impl EdgeId {
	/// Derive the identity of the edge with the given endpoints
	pub fn derive(
		source_task: &TaskId,
		source_port: &PortName,
		target_task: &TaskId,
		target_port: &PortName,
	) -> Self {
		Self(format!("{source_task}[{source_port}] ==> {target_task}[{target_port}]").into())
	}

	/// get the id
	pub fn id(&self) -> &SmartString<LazyCompact> {
		&self.0
	}
}

impl Display for EdgeId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn edge_identity_format() {
		let id = EdgeId::derive(
			&TaskId::new("cond"),
			&PortName::new("b"),
			&TaskId::new("tb"),
			&PortName::all_ports(),
		);
		assert_eq!(id.to_string(), "cond[b] ==> tb[*]");
	}

	#[test]
	fn reserved_ports() {
		assert!(PortName::all_ports().is_all_ports());
		assert!(PortName::error_port().is_error_port());
		assert!(!PortName::new("out").is_all_ports());
		assert!(!PortName::new("out").is_error_port());
	}
}
