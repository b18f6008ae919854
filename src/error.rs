use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("failed to read config file '{path}': {source}")]
	Read {
		path: String,
		#[source]
		source: io::Error,
	},

	#[error("invalid YAML in config file '{path}': {source}")]
	Parse {
		path: String,
		#[source]
		source: serde_yaml::Error,
	},

	#[error("invalid configuration: {0}")]
	Invalid(String),
}

/// Faults that end the probe loop. Probe failures are data and never appear here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
	#[error("engine already started")]
	AlreadyStarted,

	#[error("probe task failed: {0}")]
	TaskFailed(String),

	#[error("concurrency limiter closed")]
	LimiterClosed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
	#[error("subscriber limit of {0} reached")]
	TooManySubscribers(usize),

	#[error("failed to encode history: {0}")]
	Encode(String),
}

#[derive(Error, Debug)]
pub enum SinkError {
	#[error("log write failed: {0}")]
	Io(#[from] io::Error),

	#[error("failed to encode result: {0}")]
	Encode(#[from] serde_json::Error),
}
