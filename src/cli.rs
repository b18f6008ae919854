use clap::Parser;

use dns_watch::config::Overrides;

/// Continuous DNS resolution monitor
#[derive(Parser, Debug)]
#[command(name = "dns-watch")]
#[command(about = "Continuously probe domains against DNS servers and stream the results")]
pub struct Cli {
	/// YAML configuration file (built-in defaults are used if it does not exist)
	#[arg(short = 'c', long = "config", env = "CONFIG_FILE", default_value = "config.yaml")]
	pub config: String,

	/// Additional DNS server (repeatable, e.g. 1.1.1.1, 1.1.1.1:53 or name=9.9.9.9)
	#[arg(short = 's', long = "server")]
	pub servers: Vec<String>,

	/// File containing additional domains to probe (one per line)
	#[arg(short = 'd', long = "domains-file")]
	pub domains_file: Option<String>,

	/// Include system resolvers from /etc/resolv.conf
	#[arg(long = "system-resolvers")]
	pub system_resolvers: bool,

	/// Seconds between round starts
	#[arg(short = 'i', long = "interval", env = "DNS_TEST_INTERVAL")]
	pub interval: Option<f64>,

	/// Per-query timeout in seconds
	#[arg(short = 't', long = "timeout", env = "DNS_TEST_TIMEOUT")]
	pub timeout: Option<f64>,

	/// Maximum concurrent in-flight queries
	#[arg(long = "max-concurrent", env = "DNS_MAX_CONCURRENT")]
	pub max_concurrent: Option<usize>,

	/// Enable or disable the JSONL result log
	#[arg(long = "log-enabled", env = "LOG_ENABLED")]
	pub log_enabled: Option<bool>,

	/// Path of the JSONL result log
	#[arg(long = "log-file", env = "LOG_FILE_PATH")]
	pub log_file: Option<String>,

	/// Listen host handed to the web layer
	#[arg(long = "host", env = "WEB_HOST")]
	pub host: Option<String>,

	/// Listen port handed to the web layer
	#[arg(long = "port", env = "WEB_PORT")]
	pub port: Option<u16>,

	/// Diagnostic log level or filter directive (e.g. debug, dns_watch=trace)
	#[arg(long = "log-level", env = "DNS_WATCH_LOG", default_value = "info")]
	pub log_level: String,

	/// Do not print the per-round table
	#[arg(short = 'q', long = "quiet")]
	pub quiet: bool,

	/// Write the final per-server statistics to this CSV file on exit
	#[arg(short = 'o', long = "output")]
	pub output: Option<String>,
}

impl Cli {
	/// Values given on the command line or through the environment.
	pub fn overrides(&self) -> Overrides {
		Overrides {
			interval_seconds: self.interval,
			timeout_seconds: self.timeout,
			max_concurrent_queries: self.max_concurrent,
			log_enabled: self.log_enabled,
			log_file_path: self.log_file.clone(),
			web_host: self.host.clone(),
			web_port: self.port,
		}
	}
}
