use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::error::{HubError, SinkError};
use crate::transport::{QueryResult, Round};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
	/// One-shot replay of the buffer at join time
	History,
	/// A round published after the subscriber joined
	Round,
}

/// A serialized payload delivered to subscribers.
///
/// Round payloads are encoded once and shared by every queue.
#[derive(Debug, Clone)]
pub struct Message {
	pub kind: MessageKind,
	/// Round number for live messages, last replayed round for history
	pub iteration: u64,
	pub payload: Arc<str>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Payload<'a> {
	TestResult {
		timestamp: &'a DateTime<Utc>,
		iteration: u64,
		results: &'a [QueryResult],
	},
	History {
		results: &'a [QueryResult],
	},
}

struct Slot {
	sender: mpsc::Sender<Message>,
	evicted: Arc<AtomicBool>,
	_permit: OwnedSemaphorePermit,
}

struct Shared {
	subscribers: DashMap<u64, Slot>,
	slots: Arc<Semaphore>,
	next_id: AtomicU64,
	dropped: AtomicU64,
	queue_capacity: usize,
	max_subscribers: usize,
}

/// Outcome of one publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
	pub delivered: usize,
	pub dropped: usize,
}

/// Fan-out of each round to any number of subscribers.
///
/// Every subscriber owns a bounded queue. Publishing never waits on a
/// consumer: a subscriber whose queue is full is dropped on the spot.
#[derive(Clone)]
pub struct BroadcastHub {
	shared: Arc<Shared>,
}

impl BroadcastHub {
	pub fn new(queue_capacity: usize, max_subscribers: usize) -> Self {
		let max_subscribers = max_subscribers.max(1);
		Self {
			shared: Arc::new(Shared {
				subscribers: DashMap::new(),
				slots: Arc::new(Semaphore::new(max_subscribers)),
				next_id: AtomicU64::new(1),
				dropped: AtomicU64::new(0),
				queue_capacity: queue_capacity.max(1),
				max_subscribers,
			}),
		}
	}

	/// Register a new subscriber. It receives every round published from
	/// this point on.
	pub fn subscribe(&self) -> Result<Subscription, HubError> {
		let permit = Arc::clone(&self.shared.slots)
			.try_acquire_owned()
			.map_err(|_| HubError::TooManySubscribers(self.shared.max_subscribers))?;

		let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
		let (sender, receiver) = mpsc::channel(self.shared.queue_capacity);
		let evicted = Arc::new(AtomicBool::new(false));
		self.shared.subscribers.insert(id, Slot {
			sender,
			evicted: Arc::clone(&evicted),
			_permit: permit,
		});
		info!(subscriber = id, active = self.subscriber_count(), "Subscriber connected");

		Ok(Subscription {
			id,
			history: None,
			replayed_through: 0,
			receiver,
			evicted,
			hub: self.clone(),
		})
	}

	pub fn unsubscribe(&self, id: u64) {
		if self.shared.subscribers.remove(&id).is_some() {
			info!(subscriber = id, active = self.subscriber_count(), "Subscriber disconnected");
		}
	}

	/// Enqueue the round for every registered subscriber without blocking.
	pub fn publish(&self, round: &Round) -> Result<PublishReport, SinkError> {
		let payload = serde_json::to_string(&Payload::TestResult {
			timestamp: &round.timestamp,
			iteration: round.iteration,
			results: &round.results,
		})?;
		let message = Message {
			kind: MessageKind::Round,
			iteration: round.iteration,
			payload: Arc::from(payload),
		};

		let mut report = PublishReport::default();
		let mut evicted = Vec::new();
		for entry in self.shared.subscribers.iter() {
			let slot = entry.value();
			match slot.sender.try_send(message.clone()) {
				Ok(()) => report.delivered += 1,
				Err(TrySendError::Full(_)) => {
					warn!(subscriber = *entry.key(), "Subscriber queue full, dropping subscriber");
					slot.evicted.store(true, Ordering::Release);
					evicted.push(*entry.key());
				}
				Err(TrySendError::Closed(_)) => {
					slot.evicted.store(true, Ordering::Release);
					evicted.push(*entry.key());
				}
			}
		}

		// removal must happen after the iterator releases its shard locks
		for id in evicted {
			if self.shared.subscribers.remove(&id).is_some() {
				report.dropped += 1;
				self.shared.dropped.fetch_add(1, Ordering::Relaxed);
			}
		}

		debug!(
			iteration = round.iteration,
			delivered = report.delivered,
			dropped = report.dropped,
			"Round published"
		);
		Ok(report)
	}

	pub fn subscriber_count(&self) -> usize {
		self.shared.subscribers.len()
	}

	/// Subscribers evicted for falling behind or disconnecting, since start
	pub fn dropped_count(&self) -> u64 {
		self.shared.dropped.load(Ordering::Relaxed)
	}
}

/// Handle held by one live observer.
///
/// Dropping the handle unsubscribes it. Once the hub evicts it, whatever is
/// still queued is discarded and `recv` returns None.
pub struct Subscription {
	id: u64,
	history: Option<Message>,
	replayed_through: u64,
	receiver: mpsc::Receiver<Message>,
	evicted: Arc<AtomicBool>,
	hub: BroadcastHub,
}

impl Subscription {
	pub fn id(&self) -> u64 {
		self.id
	}

	/// Attach the history replay. Live rounds up to and including
	/// `through_iteration` are already part of it and will be skipped.
	pub fn set_history(
		&mut self,
		results: &[QueryResult],
		through_iteration: u64,
	) -> Result<(), HubError> {
		let payload = serde_json::to_string(&Payload::History { results })
			.map_err(|e| HubError::Encode(e.to_string()))?;
		self.history = Some(Message {
			kind: MessageKind::History,
			iteration: through_iteration,
			payload: Arc::from(payload),
		});
		self.replayed_through = through_iteration;
		Ok(())
	}

	/// True once the hub has dropped this subscriber.
	pub fn is_evicted(&self) -> bool {
		self.evicted.load(Ordering::Acquire)
	}

	fn discard(&mut self) {
		self.history = None;
		self.receiver.close();
		while self.receiver.try_recv().is_ok() {}
	}

	/// Next message: the history replay first, then live rounds.
	///
	/// Returns None once the hub has dropped this subscriber.
	pub async fn recv(&mut self) -> Option<Message> {
		if self.is_evicted() {
			self.discard();
			return None;
		}
		if let Some(history) = self.history.take() {
			return Some(history);
		}
		while let Some(message) = self.receiver.recv().await {
			if self.is_evicted() {
				break;
			}
			if message.iteration > self.replayed_through {
				return Some(message);
			}
		}
		self.discard();
		None
	}

	/// Non-blocking variant of `recv`.
	pub fn try_recv(&mut self) -> Option<Message> {
		if self.is_evicted() {
			self.discard();
			return None;
		}
		if let Some(history) = self.history.take() {
			return Some(history);
		}
		while let Ok(message) = self.receiver.try_recv() {
			if self.is_evicted() {
				self.discard();
				return None;
			}
			if message.iteration > self.replayed_through {
				return Some(message);
			}
		}
		None
	}

	pub fn unsubscribe(self) {
		drop(self);
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.hub.unsubscribe(self.id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::{DnsServer, ProbeTarget};
	use std::time::Duration;

	fn round(iteration: u64) -> Round {
		let target = ProbeTarget {
			domain: "example.com".to_string(),
			server: DnsServer::new("s", "127.0.0.1", 53),
		};
		let timestamp = Utc::now();
		Round {
			iteration,
			timestamp,
			results: vec![QueryResult::success(&target, iteration, timestamp, Duration::from_millis(3), vec![])],
		}
	}

	fn payload_iteration(message: &Message) -> u64 {
		let value: serde_json::Value = serde_json::from_str(&message.payload).unwrap();
		value["iteration"].as_u64().unwrap()
	}

	#[test]
	fn test_publish_reaches_every_subscriber() {
		let hub = BroadcastHub::new(4, 10);
		let mut a = hub.subscribe().unwrap();
		let mut b = hub.subscribe().unwrap();
		let report = hub.publish(&round(1)).unwrap();
		assert_eq!(report, PublishReport { delivered: 2, dropped: 0 });

		let msg = a.try_recv().unwrap();
		assert_eq!(msg.kind, MessageKind::Round);
		assert_eq!(payload_iteration(&msg), 1);
		let value: serde_json::Value = serde_json::from_str(&msg.payload).unwrap();
		assert_eq!(value["type"], "test_result");
		assert_eq!(value["results"].as_array().unwrap().len(), 1);
		assert_eq!(b.try_recv().unwrap().iteration, 1);
	}

	#[test]
	fn test_stalled_subscriber_is_dropped() {
		let hub = BroadcastHub::new(2, 10);
		let mut fast = hub.subscribe().unwrap();
		let mut stalled = hub.subscribe().unwrap();

		for i in 1..=5 {
			hub.publish(&round(i)).unwrap();
			assert_eq!(fast.try_recv().unwrap().iteration, i);
		}

		assert_eq!(hub.subscriber_count(), 1);
		assert_eq!(hub.dropped_count(), 1);
		// rounds queued before the eviction are discarded with it
		assert!(stalled.is_evicted());
		assert!(stalled.try_recv().is_none());
		assert!(!fast.is_evicted());
	}

	#[tokio::test]
	async fn test_dropped_subscriber_recv_ends() {
		let hub = BroadcastHub::new(1, 10);
		let mut stalled = hub.subscribe().unwrap();
		hub.publish(&round(1)).unwrap();
		let report = hub.publish(&round(2)).unwrap();
		assert_eq!(report.dropped, 1);
		assert!(stalled.recv().await.is_none());
		assert!(stalled.recv().await.is_none());
	}

	#[test]
	fn test_history_first_then_skips_replayed_rounds() {
		let hub = BroadcastHub::new(8, 10);
		let mut sub = hub.subscribe().unwrap();
		// round 3 was committed before the snapshot was taken
		hub.publish(&round(3)).unwrap();
		sub.set_history(&round(3).results, 3).unwrap();
		hub.publish(&round(4)).unwrap();

		let history = sub.try_recv().unwrap();
		assert_eq!(history.kind, MessageKind::History);
		let value: serde_json::Value = serde_json::from_str(&history.payload).unwrap();
		assert_eq!(value["type"], "history");

		let live = sub.try_recv().unwrap();
		assert_eq!(live.kind, MessageKind::Round);
		assert_eq!(live.iteration, 4);
		assert!(sub.try_recv().is_none());
	}

	#[test]
	fn test_evicted_subscriber_loses_history_and_queue() {
		let hub = BroadcastHub::new(2, 10);
		let mut stalled = hub.subscribe().unwrap();
		stalled.set_history(&round(1).results, 0).unwrap();
		for i in 1..=3 {
			hub.publish(&round(i)).unwrap();
		}
		assert_eq!(hub.subscriber_count(), 0);
		let mut received = Vec::new();
		while let Some(message) = stalled.try_recv() {
			received.push(message.iteration);
		}
		assert!(received.is_empty());
	}

	#[test]
	fn test_subscriber_limit() {
		let hub = BroadcastHub::new(4, 2);
		let a = hub.subscribe().unwrap();
		let _b = hub.subscribe().unwrap();
		assert_eq!(hub.subscribe().err(), Some(HubError::TooManySubscribers(2)));

		drop(a);
		assert_eq!(hub.subscriber_count(), 1);
		assert!(hub.subscribe().is_ok());
	}

	#[test]
	fn test_eviction_frees_a_slot() {
		let hub = BroadcastHub::new(1, 1);
		let _stalled = hub.subscribe().unwrap();
		hub.publish(&round(1)).unwrap();
		hub.publish(&round(2)).unwrap();
		assert_eq!(hub.subscriber_count(), 0);
		assert!(hub.subscribe().is_ok());
	}

	#[test]
	fn test_unsubscribe() {
		let hub = BroadcastHub::new(4, 4);
		let sub = hub.subscribe().unwrap();
		assert_eq!(hub.subscriber_count(), 1);
		sub.unsubscribe();
		assert_eq!(hub.subscriber_count(), 0);
		assert_eq!(hub.publish(&round(1)).unwrap().delivered, 0);
	}
}
