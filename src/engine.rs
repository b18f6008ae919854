use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::ResultBuffer;
use crate::config::AppConfig;
use crate::error::{EngineError, HubError};
use crate::hub::{BroadcastHub, Subscription};
use crate::logger::JsonlLogger;
use crate::resolver::{Resolve, UdpResolver};
use crate::scheduler::QueryScheduler;
use crate::stats::{compute_windowed, GlobalStatistics, WindowedStatistics};
use crate::transport::{cross_product, ProbeTarget, QueryResult, Round};

/// Upper bound on a single `recent_results` read
pub const MAX_RESULT_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
	Idle,
	Running,
	Stopping,
	Stopped,
}

/// What an observer should conclude from the engine right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
	/// No round has completed yet
	NoData,
	Healthy,
	/// The latest round completed with zero successful probes
	AllFailing,
	Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
	pub state: EngineState,
	pub iteration: u64,
	pub fault: Option<String>,
	pub sink_failures: u64,
	pub subscribers: usize,
	pub dropped_subscribers: u64,
}

/// Consistent copy of lifetime and windowed statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
	pub global: GlobalStatistics,
	pub windowed: WindowedStatistics,
}

#[derive(Debug, Clone)]
struct Lifecycle {
	state: EngineState,
	fault: Option<EngineError>,
}

/// Everything written once per round. Only the loop task takes the write lock.
struct Window {
	buffer: ResultBuffer,
	globals: GlobalStatistics,
	windowed: WindowedStatistics,
	iteration: u64,
	last_round_total: usize,
	last_round_successful: usize,
}

/// Drives the probe loop: run a round, commit it to every sink, sleep until
/// the next tick measured from round start.
pub struct TestEngine {
	config: AppConfig,
	targets: Vec<ProbeTarget>,
	scheduler: QueryScheduler,
	logger: JsonlLogger,
	hub: BroadcastHub,
	window: RwLock<Window>,
	lifecycle: watch::Sender<Lifecycle>,
	sink_failures: AtomicU64,
	token: CancellationToken,
	task: Mutex<Option<JoinHandle<()>>>,
}

impl TestEngine {
	/// Engine probing over plain UDP.
	pub fn new(config: AppConfig) -> Self {
		Self::with_resolver(config, Arc::new(UdpResolver))
	}

	pub fn with_resolver(config: AppConfig, resolver: Arc<dyn Resolve>) -> Self {
		let targets = cross_product(&config.domains, &config.dns_servers);
		let scheduler = QueryScheduler::new(
			resolver,
			config.testing.max_concurrent_queries,
			config.testing.timeout(),
		);
		let logger = JsonlLogger::new(&config.logging);
		let hub = BroadcastHub::new(
			config.web.subscriber_queue_size,
			config.web.max_websocket_connections,
		);
		let window = Window {
			buffer: ResultBuffer::new(config.web.history_buffer_size),
			globals: GlobalStatistics::default(),
			windowed: WindowedStatistics::default(),
			iteration: 0,
			last_round_total: 0,
			last_round_successful: 0,
		};
		let (lifecycle, _) = watch::channel(Lifecycle {
			state: EngineState::Idle,
			fault: None,
		});

		Self {
			config,
			targets,
			scheduler,
			logger,
			hub,
			window: RwLock::new(window),
			lifecycle,
			sink_failures: AtomicU64::new(0),
			token: CancellationToken::new(),
			task: Mutex::new(None),
		}
	}

	/// Begin the probe loop. An engine runs at most once.
	pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
		let started = self.lifecycle.send_if_modified(|l| {
			if l.state == EngineState::Idle {
				l.state = EngineState::Running;
				true
			} else {
				false
			}
		});
		if !started {
			return Err(EngineError::AlreadyStarted);
		}

		info!(
			servers = self.config.dns_servers.len(),
			domains = self.config.domains.len(),
			targets = self.targets.len(),
			interval_s = self.config.testing.interval_seconds,
			"Test engine started"
		);

		// a concurrent stop() waits on this lock, so it always finds the handle
		let mut task = self.task.lock().await;
		let engine = Arc::clone(self);
		*task = Some(tokio::spawn(async move {
			let outcome = engine.run_loop().await;
			engine.finish(outcome);
		}));
		Ok(())
	}

	/// Request a stop and wait for the loop to exit. A round in flight is
	/// completed and committed first.
	pub async fn stop(&self) {
		self.lifecycle.send_if_modified(|l| {
			if l.state == EngineState::Running {
				l.state = EngineState::Stopping;
				true
			} else {
				false
			}
		});
		self.token.cancel();

		let handle = self.task.lock().await.take();
		if let Some(handle) = handle {
			if let Err(e) = handle.await {
				error!(error = %e, "Test engine task ended abnormally");
				self.lifecycle.send_modify(|l| {
					l.fault.get_or_insert(EngineError::TaskFailed(e.to_string()));
				});
			}
		}
		self.lifecycle.send_modify(|l| l.state = EngineState::Stopped);
	}

	/// Resolve once the loop has exited, whether stopped or faulted.
	pub async fn stopped(&self) {
		let mut rx = self.lifecycle.subscribe();
		let _ = rx.wait_for(|l| l.state == EngineState::Stopped).await;
	}

	async fn run_loop(&self) -> Result<(), EngineError> {
		let interval = self.config.testing.interval();
		loop {
			if self.token.is_cancelled() {
				return Ok(());
			}
			let round_start = Instant::now();
			let timestamp = Utc::now();
			let iteration = self.window.read().await.iteration + 1;

			let results = self.scheduler.run_round(&self.targets, iteration).await?;
			self.commit(Round { iteration, timestamp, results }).await;

			tokio::select! {
				_ = self.token.cancelled() => return Ok(()),
				_ = tokio::time::sleep_until(round_start + interval) => {}
			}
		}
	}

	/// Deliver a complete round to the buffer, statistics, log and hub.
	async fn commit(&self, round: Round) {
		let successful = round.results.iter().filter(|r| r.success).count();
		{
			let mut guard = self.window.write().await;
			let window = &mut *guard;
			window.buffer.extend(round.results.iter().cloned());
			window.globals.record_round(&round.results);
			window.windowed = compute_windowed(window.buffer.iter());
			window.iteration = round.iteration;
			window.last_round_total = round.results.len();
			window.last_round_successful = successful;
		}

		if let Err(e) = self.logger.log(&round.results).await {
			self.sink_failures.fetch_add(1, Ordering::Relaxed);
			warn!(iteration = round.iteration, error = %e, "Result log write failed");
		}

		match self.hub.publish(&round) {
			Ok(report) if report.dropped > 0 => {
				warn!(iteration = round.iteration, dropped = report.dropped, "Dropped slow subscribers");
			}
			Ok(_) => {}
			Err(e) => {
				self.sink_failures.fetch_add(1, Ordering::Relaxed);
				warn!(iteration = round.iteration, error = %e, "Round broadcast failed");
			}
		}

		debug!(
			iteration = round.iteration,
			results = round.results.len(),
			successful,
			"Round committed"
		);
	}

	fn finish(&self, outcome: Result<(), EngineError>) {
		match outcome {
			Ok(()) => info!("Test engine stopped"),
			Err(ref e) => error!(error = %e, "Test engine stopped on fault"),
		}
		self.lifecycle.send_modify(|l| {
			l.state = EngineState::Stopped;
			if let Err(e) = outcome {
				l.fault = Some(e);
			}
		});
	}

	/// Register an observer. It first receives the current buffer as a
	/// history replay, then every later round exactly once.
	pub async fn subscribe(&self) -> Result<Subscription, HubError> {
		// registering before the snapshot means no round can fall between the two
		let mut subscription = self.hub.subscribe()?;
		let window = self.window.read().await;
		subscription.set_history(&window.buffer.snapshot(), window.iteration)?;
		Ok(subscription)
	}

	pub async fn current_iteration(&self) -> u64 {
		self.window.read().await.iteration
	}

	pub async fn statistics(&self) -> StatisticsSnapshot {
		let window = self.window.read().await;
		StatisticsSnapshot {
			global: window.globals.clone(),
			windowed: window.windowed.clone(),
		}
	}

	/// The newest results, oldest first. `limit` is clamped to `1..=MAX_RESULT_LIMIT`.
	pub async fn recent_results(&self, limit: usize) -> Vec<QueryResult> {
		let limit = limit.clamp(1, MAX_RESULT_LIMIT);
		self.window.read().await.buffer.latest(limit)
	}

	pub async fn results_where(&self, success: bool) -> Vec<QueryResult> {
		self.window.read().await.buffer.filter_by_success(success)
	}

	pub async fn status(&self) -> EngineStatus {
		let iteration = self.current_iteration().await;
		let lifecycle = self.lifecycle.borrow().clone();
		EngineStatus {
			state: lifecycle.state,
			iteration,
			fault: lifecycle.fault.map(|e| e.to_string()),
			sink_failures: self.sink_failures.load(Ordering::Relaxed),
			subscribers: self.hub.subscriber_count(),
			dropped_subscribers: self.hub.dropped_count(),
		}
	}

	pub async fn health(&self) -> Health {
		if self.lifecycle.borrow().state == EngineState::Stopped {
			return Health::Stopped;
		}
		let window = self.window.read().await;
		if window.iteration == 0 || window.last_round_total == 0 {
			Health::NoData
		} else if window.last_round_successful == 0 {
			Health::AllFailing
		} else {
			Health::Healthy
		}
	}

	pub fn state(&self) -> EngineState {
		self.lifecycle.borrow().state
	}

	pub fn config(&self) -> &AppConfig {
		&self.config
	}

	pub fn logger(&self) -> &JsonlLogger {
		&self.logger
	}

	pub fn hub(&self) -> &BroadcastHub {
		&self.hub
	}
}
