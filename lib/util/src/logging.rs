use std::{fmt::Display, str::FromStr};

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
pub enum LogLevel {
	Trace,
	Debug,
	Info,
	Warn,
	Error,
}

impl Default for LogLevel {
	fn default() -> Self {
		Self::Info
	}
}

impl Display for LogLevel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Trace => write!(f, "trace"),
			Self::Debug => write!(f, "debug"),
			Self::Info => write!(f, "info"),
			Self::Warn => write!(f, "warn"),
			Self::Error => write!(f, "error"),
		}
	}
}

#[derive(Debug, Deserialize)]
pub enum LoggingPreset {
	Default,
	Verbose,
	Develop,
	Trace,
}

impl Default for LoggingPreset {
	fn default() -> Self {
		return Self::Default;
	}
}

impl LoggingPreset {
	pub fn get_config(&self) -> LoggingConfig {
		match self {
			Self::Default => LoggingConfig {
				other: LogLevel::Warn,

				runner: LogLevel::Info,
				scheduler: LogLevel::Warn,
				graph: LogLevel::Warn,
				tasks: LogLevel::Warn,
			},

			Self::Verbose => LoggingConfig {
				other: LogLevel::Warn,

				runner: LogLevel::Debug,
				scheduler: LogLevel::Info,
				graph: LogLevel::Info,
				tasks: LogLevel::Warn,
			},

			Self::Develop => LoggingConfig {
				other: LogLevel::Debug,

				runner: LogLevel::Trace,
				scheduler: LogLevel::Debug,
				graph: LogLevel::Debug,
				tasks: LogLevel::Info,
			},

			Self::Trace => LoggingConfig {
				other: LogLevel::Trace,

				runner: LogLevel::Trace,
				scheduler: LogLevel::Trace,
				graph: LogLevel::Trace,
				tasks: LogLevel::Trace,
			},
		}
	}
}

pub struct LoggingConfig {
	other: LogLevel,

	runner: LogLevel,
	scheduler: LogLevel,
	graph: LogLevel,
	tasks: LogLevel,
}

impl Into<EnvFilter> for LoggingConfig {
	fn into(self) -> EnvFilter {
		EnvFilter::from_str(
			&[
				format!("gantry_flow::runner={}", self.runner),
				format!("gantry_flow::scheduler={}", self.scheduler),
				format!("gantry_flow::graph={}", self.graph),
				format!("tasks_basic={}", self.tasks),
				self.other.to_string(),
			]
			.join(","),
		)
		.unwrap()
	}
}
