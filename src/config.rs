use std::collections::HashSet;
use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domains::default_domains;
use crate::error::ConfigError;
use crate::resolver::default_servers;
use crate::transport::DnsServer;

/// Complete application configuration, as read from `config.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
	pub dns_servers: Vec<DnsServer>,
	pub domains: Vec<String>,
	#[serde(default)]
	pub testing: TestingConfig,
	#[serde(default)]
	pub logging: LoggingConfig,
	#[serde(default)]
	pub web: WebConfig,
}

const MIN_INTERVAL_SECONDS: f64 = 1.0;
const MIN_TIMEOUT_SECONDS: f64 = 0.5;
/// One day; also keeps both values convertible to a `Duration`
const MAX_SECONDS: f64 = 86_400.0;

/// Probe cadence and limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestingConfig {
	#[serde(default = "default_interval")]
	pub interval_seconds: f64,
	#[serde(default = "default_timeout")]
	pub timeout_seconds: f64,
	#[serde(default = "default_max_concurrent")]
	pub max_concurrent_queries: usize,
}

impl Default for TestingConfig {
	fn default() -> Self {
		Self {
			interval_seconds: default_interval(),
			timeout_seconds: default_timeout(),
			max_concurrent_queries: default_max_concurrent(),
		}
	}
}

impl TestingConfig {
	/// Out-of-range values are clamped, NaN falls back to the default.
	pub fn interval(&self) -> Duration {
		seconds(self.interval_seconds, MIN_INTERVAL_SECONDS, default_interval())
	}

	pub fn timeout(&self) -> Duration {
		seconds(self.timeout_seconds, MIN_TIMEOUT_SECONDS, default_timeout())
	}
}

fn seconds(value: f64, min: f64, fallback: f64) -> Duration {
	Duration::try_from_secs_f64(value.clamp(min, MAX_SECONDS))
		.unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

/// JSONL result log settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
	#[serde(default = "default_true")]
	pub enabled: bool,
	#[serde(default = "default_log_path")]
	pub file_path: String,
	#[serde(default = "default_max_file_size_mb")]
	pub max_file_size_mb: u64,
	#[serde(default = "default_rotation_count")]
	pub rotation_count: usize,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			file_path: default_log_path(),
			max_file_size_mb: default_max_file_size_mb(),
			rotation_count: default_rotation_count(),
		}
	}
}

impl LoggingConfig {
	pub fn max_file_size_bytes(&self) -> u64 {
		self.max_file_size_mb * 1024 * 1024
	}
}

/// Settings for the live-observer surface and the in-memory history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebConfig {
	#[serde(default = "default_host")]
	pub host: String,
	#[serde(default = "default_port")]
	pub port: u16,
	/// Upper bound on concurrent subscribers
	#[serde(default = "default_max_connections")]
	pub max_websocket_connections: usize,
	/// Number of results retained in memory
	#[serde(default = "default_history_size")]
	pub history_buffer_size: usize,
	/// Pending rounds a subscriber may fall behind before it is dropped
	#[serde(default = "default_subscriber_queue")]
	pub subscriber_queue_size: usize,
}

impl Default for WebConfig {
	fn default() -> Self {
		Self {
			host: default_host(),
			port: default_port(),
			max_websocket_connections: default_max_connections(),
			history_buffer_size: default_history_size(),
			subscriber_queue_size: default_subscriber_queue(),
		}
	}
}

fn default_interval() -> f64 { 5.0 }
fn default_timeout() -> f64 { 3.0 }
fn default_max_concurrent() -> usize { 10 }
fn default_true() -> bool { true }
fn default_log_path() -> String { "logs/dns_results.jsonl".to_string() }
fn default_max_file_size_mb() -> u64 { 100 }
fn default_rotation_count() -> usize { 5 }
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_max_connections() -> usize { 50 }
fn default_history_size() -> usize { 1000 }
fn default_subscriber_queue() -> usize { 32 }

/// Values from CLI flags or environment that win over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
	pub interval_seconds: Option<f64>,
	pub timeout_seconds: Option<f64>,
	pub max_concurrent_queries: Option<usize>,
	pub log_enabled: Option<bool>,
	pub log_file_path: Option<String>,
	pub web_host: Option<String>,
	pub web_port: Option<u16>,
}

impl Default for AppConfig {
	fn default() -> Self {
		Self {
			dns_servers: default_servers(),
			domains: default_domains(),
			testing: TestingConfig::default(),
			logging: LoggingConfig::default(),
			web: WebConfig::default(),
		}
	}
}

impl AppConfig {
	/// Parse a configuration from YAML text. `origin` names the source in errors.
	pub fn from_yaml(text: &str, origin: &str) -> Result<Self, ConfigError> {
		serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
			path: origin.to_string(),
			source,
		})
	}

	/// Load the configuration file, falling back to the built-in defaults
	/// when it does not exist. Overrides are applied, then the result is validated.
	pub fn load(path: &str, overrides: &Overrides) -> Result<Self, ConfigError> {
		let mut config = match std::fs::read_to_string(path) {
			Ok(text) => Self::from_yaml(&text, path)?,
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				warn!(config_file = path, "Config file not found, using default configuration");
				Self::default()
			}
			Err(source) => {
				return Err(ConfigError::Read { path: path.to_string(), source });
			}
		};
		config.apply_overrides(overrides);
		config.validate()?;
		Ok(config)
	}

	pub fn apply_overrides(&mut self, overrides: &Overrides) {
		if let Some(v) = overrides.interval_seconds {
			self.testing.interval_seconds = v;
		}
		if let Some(v) = overrides.timeout_seconds {
			self.testing.timeout_seconds = v;
		}
		if let Some(v) = overrides.max_concurrent_queries {
			self.testing.max_concurrent_queries = v;
		}
		if let Some(v) = overrides.log_enabled {
			self.logging.enabled = v;
		}
		if let Some(v) = &overrides.log_file_path {
			self.logging.file_path = v.clone();
		}
		if let Some(v) = &overrides.web_host {
			self.web.host = v.clone();
		}
		if let Some(v) = overrides.web_port {
			self.web.port = v;
		}
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.dns_servers.is_empty() {
			return Err(invalid("at least one DNS server is required"));
		}
		if self.domains.is_empty() {
			return Err(invalid("at least one domain is required"));
		}

		let mut names = HashSet::new();
		for server in &self.dns_servers {
			if server.socket_addr().is_none() {
				return Err(invalid(format!(
					"DNS server '{}' has invalid IP address '{}'", server.name, server.ip
				)));
			}
			// statistics group by server name
			if !names.insert(server.name.as_str()) {
				return Err(invalid(format!("duplicate DNS server name '{}'", server.name)));
			}
		}
		if self.domains.iter().any(|d| d.trim().is_empty()) {
			return Err(invalid("domain names must not be empty"));
		}

		let t = &self.testing;
		if !(MIN_INTERVAL_SECONDS..=MAX_SECONDS).contains(&t.interval_seconds) {
			return Err(invalid(format!(
				"testing.interval_seconds must be between {} and {}", MIN_INTERVAL_SECONDS, MAX_SECONDS
			)));
		}
		if !(MIN_TIMEOUT_SECONDS..=MAX_SECONDS).contains(&t.timeout_seconds) {
			return Err(invalid(format!(
				"testing.timeout_seconds must be between {} and {}", MIN_TIMEOUT_SECONDS, MAX_SECONDS
			)));
		}
		if t.max_concurrent_queries < 1 {
			return Err(invalid("testing.max_concurrent_queries must be >= 1"));
		}

		let l = &self.logging;
		if l.max_file_size_mb < 1 {
			return Err(invalid("logging.max_file_size_mb must be >= 1"));
		}
		if l.rotation_count < 1 {
			return Err(invalid("logging.rotation_count must be >= 1"));
		}

		let w = &self.web;
		if w.port == 0 {
			return Err(invalid("web.port must be between 1 and 65535"));
		}
		if w.max_websocket_connections < 1 {
			return Err(invalid("web.max_websocket_connections must be >= 1"));
		}
		if w.history_buffer_size < 1 {
			return Err(invalid("web.history_buffer_size must be >= 1"));
		}
		if w.subscriber_queue_size < 1 {
			return Err(invalid("web.subscriber_queue_size must be >= 1"));
		}
		Ok(())
	}
}

fn invalid(msg: impl Into<String>) -> ConfigError {
	ConfigError::Invalid(msg.into())
}
