use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::net::UdpSocket;

use crate::dns::{build_query, parse_response};
use crate::transport::{DnsServer, ErrorKind, ProbeTarget, QueryResult};

/// Number of datagrams read per probe before giving up on a usable reply
const MAX_READS: usize = 3;

/// Executes one lookup for a (domain, server) pair.
///
/// Implementations never fail: every outcome, including a timeout, is a
/// `QueryResult`. The timeout bounds the whole lookup.
#[async_trait]
pub trait Resolve: Send + Sync {
	async fn resolve(&self, target: &ProbeTarget, iteration: u64, timeout: Duration) -> QueryResult;
}

/// Plain UDP resolver speaking directly to the target server.
///
/// Binds a dedicated socket per query so concurrent probes never read each
/// other's responses.
#[derive(Debug, Clone, Default)]
pub struct UdpResolver;

#[async_trait]
impl Resolve for UdpResolver {
	async fn resolve(&self, target: &ProbeTarget, iteration: u64, timeout: Duration) -> QueryResult {
		let timestamp = Utc::now();
		let outcome = match tokio::time::timeout(timeout, exchange(target)).await {
			Ok(outcome) => outcome,
			Err(_) => Err(ErrorKind::Timeout),
		};
		match outcome {
			Ok((elapsed, ips)) => QueryResult::success(target, iteration, timestamp, elapsed, ips),
			Err(kind) => QueryResult::failure(target, iteration, timestamp, kind),
		}
	}
}

/// Send the query and wait for the matching reply. Unbounded in time; the
/// caller wraps it in the probe timeout.
async fn exchange(target: &ProbeTarget) -> std::result::Result<(Duration, Vec<String>), ErrorKind> {
	let addr = target.server.socket_addr().ok_or(ErrorKind::NetworkError)?;
	let txid: u16 = rand::random();
	let query_bytes = build_query(&target.domain, txid)
		.map_err(|_| ErrorKind::InvalidDomain)?;

	let bind_addr = if addr.is_ipv4() {
		"0.0.0.0:0"
	} else {
		"[::]:0"
	};
	let socket = UdpSocket::bind(bind_addr).await.map_err(|e| classify_io(&e))?;
	// Connecting lets ICMP port-unreachable surface as an error on recv
	socket.connect(addr).await.map_err(|e| classify_io(&e))?;

	let start = Instant::now();
	socket.send(&query_bytes).await.map_err(|e| classify_io(&e))?;

	// 4096 bytes covers EDNS-sized replies
	let mut buf = vec![0u8; 4096];
	for _ in 0..MAX_READS {
		let len = socket.recv(&mut buf).await.map_err(|e| classify_io(&e))?;
		match parse_response(&buf[..len], txid) {
			Ok(response) => {
				let elapsed = start.elapsed();
				return response.classify().map(|ips| (elapsed, ips));
			}
			// stray or garbled datagram, read again
			Err(_) => continue,
		}
	}
	Err(ErrorKind::MalformedResponse)
}

fn classify_io(err: &io::Error) -> ErrorKind {
	match err.kind() {
		io::ErrorKind::ConnectionRefused
		| io::ErrorKind::HostUnreachable
		| io::ErrorKind::NetworkUnreachable => ErrorKind::Unreachable,
		_ => ErrorKind::NetworkError,
	}
}

/// Parse a server address string into a DnsServer.
///
/// Supports formats:
///   "1.1.1.1"                  -- IPv4, default port 53
///   "1.1.1.1:53"               -- IPv4 with explicit port
///   "2606:4700::1111"          -- bare IPv6, default port 53
///   "[2606:4700::1111]:53"     -- bracketed IPv6 with port
///   "Cloudflare=1.1.1.1:53"    -- any of the above with a display name
pub fn parse_server(input: &str) -> Result<DnsServer> {
	let trimmed = input.trim();
	let (name, address) = match trimmed.split_once('=') {
		Some((name, address)) => (Some(name.trim()), address.trim()),
		None => (None, trimmed),
	};
	if address.is_empty() {
		return Err(anyhow!("empty server address"));
	}

	let addr: SocketAddr = if address.starts_with('[') {
		address.parse()
			.map_err(|e| anyhow!("invalid bracketed IPv6 address '{}': {}", address, e))?
	} else if address.contains("::") || address.matches(':').count() > 1 {
		let ip = address.parse()
			.map_err(|e| anyhow!("invalid IPv6 address '{}': {}", address, e))?;
		SocketAddr::new(ip, 53)
	} else if let Ok(addr) = address.parse::<SocketAddr>() {
		addr
	} else {
		let ip = address.parse()
			.map_err(|e| anyhow!("invalid IP address '{}': {}", address, e))?;
		SocketAddr::new(ip, 53)
	};

	let ip = addr.ip().to_string();
	let name = match name {
		Some(n) if !n.is_empty() => n.to_string(),
		_ => ip.clone(),
	};
	Ok(DnsServer { name, ip, port: addr.port() })
}

/// Read system nameservers from /etc/resolv.conf (Unix only).
///
/// Returns an empty vec if the file cannot be read.
pub fn system_servers() -> Vec<DnsServer> {
	let content = match std::fs::read_to_string("/etc/resolv.conf") {
		Ok(c) => c,
		Err(_) => return Vec::new(),
	};
	parse_resolv_conf(&content)
}

fn parse_resolv_conf(content: &str) -> Vec<DnsServer> {
	let mut servers = Vec::new();
	for line in content.lines() {
		let trimmed = line.trim();
		if !trimmed.starts_with("nameserver") {
			continue;
		}
		let parts: Vec<&str> = trimmed.split_whitespace().collect();
		if parts.len() >= 2 {
			if let Ok(mut server) = parse_server(parts[1]) {
				server.name = format!("system {}", server.ip);
				servers.push(server);
			}
		}
	}
	servers
}

/// Servers probed when the configuration file is absent.
pub fn default_servers() -> Vec<DnsServer> {
	vec![
		DnsServer::new("Google DNS Primary", "8.8.8.8", 53),
		DnsServer::new("Cloudflare DNS", "1.1.1.1", 53),
	]
}
