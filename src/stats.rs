use std::collections::BTreeMap;

use serde::Serialize;

use crate::transport::{round2, ErrorKind, QueryResult};

/// Process-lifetime counters. Only ever incremented, never rebuilt from the
/// bounded buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalStatistics {
	pub total_queries: u64,
	pub successful_queries: u64,
	pub failed_queries: u64,
	pub iteration_count: u64,
	pub errors_by_kind: BTreeMap<ErrorKind, u64>,
	pub errors_by_domain: BTreeMap<String, u64>,
	pub errors_by_server: BTreeMap<String, u64>,
}

impl GlobalStatistics {
	/// Fold one result into the counters.
	pub fn record(&mut self, result: &QueryResult) {
		self.total_queries += 1;
		if result.success {
			self.successful_queries += 1;
			return;
		}
		self.failed_queries += 1;
		if let Some(kind) = result.error {
			*self.errors_by_kind.entry(kind).or_default() += 1;
		}
		*self.errors_by_domain.entry(result.domain.clone()).or_default() += 1;
		*self.errors_by_server.entry(result.dns_server.name.clone()).or_default() += 1;
	}

	/// Fold a complete round and count it.
	pub fn record_round(&mut self, results: &[QueryResult]) {
		self.iteration_count += 1;
		for result in results {
			self.record(result);
		}
	}
}

/// Per-server breakdown over the retained window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerStats {
	pub total: u64,
	pub successful: u64,
	pub failed: u64,
	pub success_rate: f64,
	pub avg_response_time_ms: f64,
	pub p95_ms: f64,
}

/// Per-domain breakdown over the retained window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DomainStats {
	pub total: u64,
	pub successful: u64,
	pub failed: u64,
	pub success_rate: f64,
}

/// Aggregates over the results currently held in the buffer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowedStatistics {
	pub total_queries: u64,
	pub successful_queries: u64,
	pub failed_queries: u64,
	pub success_rate: f64,
	pub avg_response_time_ms: f64,
	pub p50_ms: f64,
	pub p95_ms: f64,
	pub errors_by_kind: BTreeMap<ErrorKind, u64>,
	pub stats_by_server: BTreeMap<String, ServerStats>,
	pub stats_by_domain: BTreeMap<String, DomainStats>,
}

/// Calculate the p-th percentile from a sorted slice using nearest-rank method.
///
/// Args:
///   sorted_values: Pre-sorted slice of f64 values.
///   p: Percentile between 0.0 and 100.0 (e.g. 50.0 for median).
///
/// Returns:
///   None if the slice is empty, otherwise the percentile value.
pub fn percentile(sorted_values: &[f64], p: f64) -> Option<f64> {
	if sorted_values.is_empty() {
		return None;
	}
	if sorted_values.len() == 1 {
		return Some(sorted_values[0]);
	}
	// Nearest-rank: rank = ceil(p/100 * N)
	let n = sorted_values.len();
	let rank = ((p / 100.0) * n as f64).ceil() as usize;
	let rank = rank.clamp(1, n);
	Some(sorted_values[rank - 1])
}

/// Calculate the arithmetic mean of a slice of values.
pub fn mean(values: &[f64]) -> Option<f64> {
	if values.is_empty() {
		return None;
	}
	let sum: f64 = values.iter().sum();
	Some(sum / values.len() as f64)
}

/// Percentage of `part` in `total`, 0.0 when there is no data.
pub fn rate(part: u64, total: u64) -> f64 {
	if total == 0 {
		return 0.0;
	}
	round2(part as f64 / total as f64 * 100.0)
}

fn sort_latencies(values: &mut [f64]) {
	values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
}

#[derive(Default)]
struct ServerAccumulator {
	total: u64,
	successful: u64,
	latencies: Vec<f64>,
}

/// Recompute windowed statistics by scanning the retained results.
///
/// Latency figures only consider successful results; empty sets yield 0.0.
pub fn compute_windowed<'a, I>(results: I) -> WindowedStatistics
where
	I: IntoIterator<Item = &'a QueryResult>,
{
	let mut stats = WindowedStatistics::default();
	let mut latencies: Vec<f64> = Vec::new();
	let mut servers: BTreeMap<String, ServerAccumulator> = BTreeMap::new();

	for result in results {
		stats.total_queries += 1;

		let server = servers.entry(result.dns_server.name.clone()).or_default();
		server.total += 1;

		let domain = stats.stats_by_domain.entry(result.domain.clone()).or_default();
		domain.total += 1;

		if result.success {
			stats.successful_queries += 1;
			server.successful += 1;
			domain.successful += 1;
			if let Some(ms) = result.response_time_ms {
				latencies.push(ms);
				server.latencies.push(ms);
			}
		} else {
			stats.failed_queries += 1;
			domain.failed += 1;
			if let Some(kind) = result.error {
				*stats.errors_by_kind.entry(kind).or_default() += 1;
			}
		}
	}

	stats.success_rate = rate(stats.successful_queries, stats.total_queries);
	sort_latencies(&mut latencies);
	stats.avg_response_time_ms = round2(mean(&latencies).unwrap_or(0.0));
	stats.p50_ms = percentile(&latencies, 50.0).unwrap_or(0.0);
	stats.p95_ms = percentile(&latencies, 95.0).unwrap_or(0.0);

	for domain in stats.stats_by_domain.values_mut() {
		domain.success_rate = rate(domain.successful, domain.total);
	}

	for (name, mut acc) in servers {
		sort_latencies(&mut acc.latencies);
		stats.stats_by_server.insert(name, ServerStats {
			total: acc.total,
			successful: acc.successful,
			failed: acc.total - acc.successful,
			success_rate: rate(acc.successful, acc.total),
			avg_response_time_ms: round2(mean(&acc.latencies).unwrap_or(0.0)),
			p95_ms: percentile(&acc.latencies, 95.0).unwrap_or(0.0),
		});
	}

	stats
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::{DnsServer, ProbeTarget};
	use chrono::Utc;
	use std::time::Duration;

	fn ok(domain: &str, server: &str, ms: u64) -> QueryResult {
		let target = ProbeTarget {
			domain: domain.to_string(),
			server: DnsServer::new(server, "127.0.0.1", 53),
		};
		QueryResult::success(&target, 1, Utc::now(), Duration::from_millis(ms), vec!["192.0.2.1".to_string()])
	}

	fn failed(domain: &str, server: &str, kind: ErrorKind) -> QueryResult {
		let target = ProbeTarget {
			domain: domain.to_string(),
			server: DnsServer::new(server, "127.0.0.1", 53),
		};
		QueryResult::failure(&target, 1, Utc::now(), kind)
	}

	#[test]
	fn test_percentile_basic() {
		let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
		assert_eq!(percentile(&values, 50.0), Some(5.0));
		assert_eq!(percentile(&values, 95.0), Some(10.0));
		assert_eq!(percentile(&values, 10.0), Some(1.0));
	}

	#[test]
	fn test_percentile_empty() {
		let values: Vec<f64> = vec![];
		assert_eq!(percentile(&values, 50.0), None);
	}

	#[test]
	fn test_percentile_single() {
		let values = vec![42.0];
		assert_eq!(percentile(&values, 50.0), Some(42.0));
		assert_eq!(percentile(&values, 95.0), Some(42.0));
	}

	#[test]
	fn test_mean() {
		let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
		assert_eq!(mean(&values), Some(3.0));
		assert_eq!(mean(&[]), None);
	}

	#[test]
	fn test_rate_no_data() {
		assert_eq!(rate(0, 0), 0.0);
		assert_eq!(rate(1, 3), 33.33);
	}

	#[test]
	fn test_windowed_all_success() {
		let results: Vec<QueryResult> = (1..=4).map(|i| ok("a.example", "s1", i * 10)).collect();
		let stats = compute_windowed(&results);
		assert_eq!(stats.total_queries, 4);
		assert_eq!(stats.success_rate, 100.0);
		assert_eq!(stats.avg_response_time_ms, 25.0);
		assert_eq!(stats.p50_ms, 20.0);
		assert_eq!(stats.p95_ms, 40.0);
		assert!(stats.errors_by_kind.is_empty());
	}

	#[test]
	fn test_windowed_all_failure_has_defined_latency() {
		let results = vec![
			failed("a.example", "s1", ErrorKind::Timeout),
			failed("b.example", "s1", ErrorKind::Nxdomain),
		];
		let stats = compute_windowed(&results);
		assert_eq!(stats.success_rate, 0.0);
		assert_eq!(stats.avg_response_time_ms, 0.0);
		assert_eq!(stats.p95_ms, 0.0);
		assert!(!stats.avg_response_time_ms.is_nan());
		assert_eq!(stats.errors_by_kind[&ErrorKind::Timeout], 1);
		assert_eq!(stats.stats_by_server["s1"].avg_response_time_ms, 0.0);
	}

	#[test]
	fn test_windowed_empty() {
		let stats = compute_windowed(std::iter::empty());
		assert_eq!(stats, WindowedStatistics::default());
	}

	#[test]
	fn test_windowed_breakdowns() {
		let results = vec![
			ok("a.example", "fast", 10),
			ok("b.example", "fast", 30),
			failed("a.example", "down", ErrorKind::Timeout),
			failed("b.example", "down", ErrorKind::Timeout),
		];
		let stats = compute_windowed(&results);
		assert_eq!(stats.success_rate, 50.0);
		// failures do not drag the latency mean
		assert_eq!(stats.avg_response_time_ms, 20.0);

		let fast = &stats.stats_by_server["fast"];
		assert_eq!((fast.total, fast.successful, fast.failed), (2, 2, 0));
		assert_eq!(fast.success_rate, 100.0);
		assert_eq!(fast.p95_ms, 30.0);

		let down = &stats.stats_by_server["down"];
		assert_eq!(down.success_rate, 0.0);
		assert_eq!(down.failed, 2);

		let a = &stats.stats_by_domain["a.example"];
		assert_eq!((a.total, a.successful, a.failed), (2, 1, 1));
		assert_eq!(a.success_rate, 50.0);
	}

	#[test]
	fn test_globals_accumulate() {
		let mut globals = GlobalStatistics::default();
		let round = vec![
			ok("a.example", "fast", 10),
			failed("a.example", "down", ErrorKind::Timeout),
		];
		globals.record_round(&round);
		globals.record_round(&round);
		assert_eq!(globals.iteration_count, 2);
		assert_eq!(globals.total_queries, 4);
		assert_eq!(globals.successful_queries, 2);
		assert_eq!(globals.failed_queries, 2);
		assert_eq!(globals.errors_by_kind[&ErrorKind::Timeout], 2);
		assert_eq!(globals.errors_by_domain["a.example"], 2);
		assert_eq!(globals.errors_by_server["down"], 2);
		assert!(!globals.errors_by_server.contains_key("fast"));
	}

	#[test]
	fn test_globals_serialize_error_kinds_as_strings() {
		let mut globals = GlobalStatistics::default();
		globals.record(&failed("a.example", "down", ErrorKind::NoAnswer));
		let value = serde_json::to_value(&globals).unwrap();
		assert_eq!(value["errors_by_kind"]["no_answer"], 1);
	}
}
