use std::collections::VecDeque;

use crate::transport::QueryResult;

/// Bounded, insertion-ordered store of the most recent results.
///
/// Appending past capacity evicts the oldest entries first.
#[derive(Debug, Clone)]
pub struct ResultBuffer {
	entries: VecDeque<QueryResult>,
	capacity: usize,
}

impl ResultBuffer {
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			entries: VecDeque::with_capacity(capacity),
			capacity,
		}
	}

	/// Append a batch, then trim from the front back down to capacity.
	pub fn extend<I>(&mut self, results: I)
	where
		I: IntoIterator<Item = QueryResult>,
	{
		self.entries.extend(results);
		let excess = self.entries.len().saturating_sub(self.capacity);
		if excess > 0 {
			self.entries.drain(..excess);
		}
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn iter(&self) -> impl Iterator<Item = &QueryResult> {
		self.entries.iter()
	}

	/// Copy of the whole buffer in arrival order.
	pub fn snapshot(&self) -> Vec<QueryResult> {
		self.entries.iter().cloned().collect()
	}

	/// The newest `limit` results, oldest first.
	pub fn latest(&self, limit: usize) -> Vec<QueryResult> {
		let skip = self.entries.len().saturating_sub(limit);
		self.entries.iter().skip(skip).cloned().collect()
	}

	/// Results with the given outcome, in arrival order.
	pub fn filter_by_success(&self, success: bool) -> Vec<QueryResult> {
		self.entries.iter()
			.filter(|r| r.success == success)
			.cloned()
			.collect()
	}

	/// Iteration of the newest retained result, or 0 when empty.
	pub fn last_iteration(&self) -> u64 {
		self.entries.back().map(|r| r.iteration).unwrap_or(0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::{DnsServer, ErrorKind, ProbeTarget};
	use chrono::Utc;
	use std::time::Duration;

	fn result(iteration: u64, success: bool) -> QueryResult {
		let target = ProbeTarget {
			domain: format!("d{}.example", iteration),
			server: DnsServer::new("s", "127.0.0.1", 53),
		};
		if success {
			QueryResult::success(&target, iteration, Utc::now(), Duration::from_millis(5), vec![])
		} else {
			QueryResult::failure(&target, iteration, Utc::now(), ErrorKind::Timeout)
		}
	}

	#[test]
	fn test_never_exceeds_capacity() {
		let mut buffer = ResultBuffer::new(5);
		for i in 1..=3 {
			buffer.extend((0..4).map(|_| result(i, true)));
			assert!(buffer.len() <= 5);
		}
		assert_eq!(buffer.len(), 5);
	}

	#[test]
	fn test_keeps_most_recent_in_order() {
		let mut buffer = ResultBuffer::new(4);
		buffer.extend((1..=10).map(|i| result(i, true)));
		let iterations: Vec<u64> = buffer.iter().map(|r| r.iteration).collect();
		assert_eq!(iterations, vec![7, 8, 9, 10]);
		assert_eq!(buffer.last_iteration(), 10);
	}

	#[test]
	fn test_latest_limit() {
		let mut buffer = ResultBuffer::new(10);
		buffer.extend((1..=6).map(|i| result(i, true)));
		let latest: Vec<u64> = buffer.latest(2).iter().map(|r| r.iteration).collect();
		assert_eq!(latest, vec![5, 6]);
		assert_eq!(buffer.latest(100).len(), 6);
		assert!(buffer.latest(0).is_empty());
	}

	#[test]
	fn test_filter_does_not_mutate() {
		let mut buffer = ResultBuffer::new(10);
		buffer.extend(vec![result(1, true), result(1, false), result(2, false)]);
		assert_eq!(buffer.filter_by_success(false).len(), 2);
		assert_eq!(buffer.filter_by_success(true).len(), 1);
		assert_eq!(buffer.len(), 3);
	}

	#[test]
	fn test_zero_capacity_is_clamped() {
		let mut buffer = ResultBuffer::new(0);
		buffer.extend(vec![result(1, true), result(2, true)]);
		assert_eq!(buffer.capacity(), 1);
		assert_eq!(buffer.snapshot()[0].iteration, 2);
	}

	#[test]
	fn test_empty_buffer() {
		let buffer = ResultBuffer::new(3);
		assert!(buffer.is_empty());
		assert_eq!(buffer.last_iteration(), 0);
		assert!(buffer.snapshot().is_empty());
	}
}
