use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A DNS server under test
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DnsServer {
	pub name: String,
	pub ip: String,
	#[serde(default = "default_port")]
	pub port: u16,
}

fn default_port() -> u16 {
	53
}

impl DnsServer {
	pub fn new(name: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
		Self { name: name.into(), ip: ip.into(), port }
	}

	/// Socket address of the server, or None if `ip` is not an IP literal.
	pub fn socket_addr(&self) -> Option<SocketAddr> {
		self.ip.parse::<IpAddr>().ok().map(|ip| SocketAddr::new(ip, self.port))
	}
}

/// One (domain, server) pair probed every round
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeTarget {
	pub domain: String,
	pub server: DnsServer,
}

/// Build the full domain x server cross-product, domain-major.
pub fn cross_product(domains: &[String], servers: &[DnsServer]) -> Vec<ProbeTarget> {
	let mut targets = Vec::with_capacity(domains.len() * servers.len());
	for domain in domains {
		for server in servers {
			targets.push(ProbeTarget {
				domain: domain.clone(),
				server: server.clone(),
			});
		}
	}
	targets
}

/// Classified reason a probe failed.
///
/// Statistics group by this value, so the set stays closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	Timeout,
	Nxdomain,
	/// NOERROR reply without any A record
	NoAnswer,
	Servfail,
	Refused,
	/// Any other non-NOERROR rcode
	ErrorResponse,
	/// Connection refused, host or network unreachable
	Unreachable,
	NetworkError,
	MalformedResponse,
	InvalidDomain,
}

impl ErrorKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ErrorKind::Timeout => "timeout",
			ErrorKind::Nxdomain => "nxdomain",
			ErrorKind::NoAnswer => "no_answer",
			ErrorKind::Servfail => "servfail",
			ErrorKind::Refused => "refused",
			ErrorKind::ErrorResponse => "error_response",
			ErrorKind::Unreachable => "unreachable",
			ErrorKind::NetworkError => "network_error",
			ErrorKind::MalformedResponse => "malformed_response",
			ErrorKind::InvalidDomain => "invalid_domain",
		}
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Outcome of a single probe. Never mutated after the resolver builds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
	pub timestamp: DateTime<Utc>,
	pub iteration: u64,
	pub domain: String,
	pub dns_server: DnsServer,
	pub success: bool,
	pub response_time_ms: Option<f64>,
	pub resolved_ips: Vec<String>,
	pub error: Option<ErrorKind>,
}

impl QueryResult {
	pub fn success(
		target: &ProbeTarget,
		iteration: u64,
		timestamp: DateTime<Utc>,
		elapsed: Duration,
		resolved_ips: Vec<String>,
	) -> Self {
		Self {
			timestamp,
			iteration,
			domain: target.domain.clone(),
			dns_server: target.server.clone(),
			success: true,
			response_time_ms: Some(round2(elapsed.as_secs_f64() * 1000.0)),
			resolved_ips,
			error: None,
		}
	}

	pub fn failure(
		target: &ProbeTarget,
		iteration: u64,
		timestamp: DateTime<Utc>,
		kind: ErrorKind,
	) -> Self {
		Self {
			timestamp,
			iteration,
			domain: target.domain.clone(),
			dns_server: target.server.clone(),
			success: false,
			response_time_ms: None,
			resolved_ips: Vec::new(),
			error: Some(kind),
		}
	}
}

/// Results of one orchestration cycle, all tagged with the same iteration
#[derive(Debug, Clone)]
pub struct Round {
	pub iteration: u64,
	pub timestamp: DateTime<Utc>,
	pub results: Vec<QueryResult>,
}

/// Round a value to two decimal places.
pub fn round2(value: f64) -> f64 {
	(value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
	use super::*;

	fn server(name: &str) -> DnsServer {
		DnsServer::new(name, "127.0.0.1", 53)
	}

	#[test]
	fn test_cross_product_size_and_order() {
		let domains = vec!["a.test".to_string(), "b.test".to_string()];
		let servers = vec![server("one"), server("two"), server("three")];
		let targets = cross_product(&domains, &servers);
		assert_eq!(targets.len(), 6);
		assert_eq!(targets[0].domain, "a.test");
		assert_eq!(targets[0].server.name, "one");
		assert_eq!(targets[3].domain, "b.test");
	}

	#[test]
	fn test_cross_product_empty() {
		let targets = cross_product(&[], &[server("one")]);
		assert!(targets.is_empty());
	}

	#[test]
	fn test_socket_addr() {
		let s = DnsServer::new("v6", "2606:4700::1111", 5353);
		let addr = s.socket_addr().unwrap();
		assert_eq!(addr.port(), 5353);
		assert!(addr.is_ipv6());
		assert!(DnsServer::new("bad", "dns.google", 53).socket_addr().is_none());
	}

	#[test]
	fn test_failure_json_shape() {
		let target = ProbeTarget { domain: "example.com".to_string(), server: server("local") };
		let result = QueryResult::failure(&target, 7, Utc::now(), ErrorKind::Timeout);
		let value = serde_json::to_value(&result).unwrap();
		assert_eq!(value["iteration"], 7);
		assert_eq!(value["success"], false);
		assert_eq!(value["error"], "timeout");
		assert!(value["response_time_ms"].is_null());
		assert_eq!(value["resolved_ips"].as_array().unwrap().len(), 0);
		assert_eq!(value["dns_server"]["name"], "local");
		assert_eq!(value["dns_server"]["port"], 53);
	}

	#[test]
	fn test_success_rounds_latency() {
		let target = ProbeTarget { domain: "example.com".to_string(), server: server("local") };
		let result = QueryResult::success(
			&target, 1, Utc::now(), Duration::from_micros(12_346),
			vec!["93.184.216.34".to_string()],
		);
		assert_eq!(result.response_time_ms, Some(12.35));
		assert!(result.error.is_none());
		let value = serde_json::to_value(&result).unwrap();
		assert!(value["error"].is_null());
	}

	#[test]
	fn test_error_kind_strings_match_serde() {
		for kind in [ErrorKind::NoAnswer, ErrorKind::MalformedResponse, ErrorKind::Nxdomain] {
			let json = serde_json::to_string(&kind).unwrap();
			assert_eq!(json, format!("\"{}\"", kind.as_str()));
		}
	}
}
