use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::error::EngineError;
use crate::resolver::Resolve;
use crate::transport::{ProbeTarget, QueryResult};

/// Runs one round of probes with at most `max_concurrent` lookups in flight.
pub struct QueryScheduler {
	resolver: Arc<dyn Resolve>,
	semaphore: Arc<Semaphore>,
	timeout: Duration,
}

impl QueryScheduler {
	pub fn new(resolver: Arc<dyn Resolve>, max_concurrent: usize, timeout: Duration) -> Self {
		Self {
			resolver,
			semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
			timeout,
		}
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Probe every target once and return one result per target, in target order.
	///
	/// Lookup failures are results. An error here means the round itself
	/// could not complete.
	pub async fn run_round(
		&self,
		targets: &[ProbeTarget],
		iteration: u64,
	) -> Result<Vec<QueryResult>, EngineError> {
		let mut handles = Vec::with_capacity(targets.len());
		for target in targets {
			let sem = self.semaphore.clone();
			let resolver = self.resolver.clone();
			let target = target.clone();
			let timeout = self.timeout;

			handles.push(tokio::spawn(async move {
				let _permit = sem.acquire_owned().await
					.map_err(|_| EngineError::LimiterClosed)?;
				Ok::<_, EngineError>(resolver.resolve(&target, iteration, timeout).await)
			}));
		}

		let mut results = Vec::with_capacity(handles.len());
		let mut pending = handles.into_iter();
		while let Some(handle) = pending.next() {
			let fault = match handle.await {
				Ok(Ok(result)) => {
					results.push(result);
					continue;
				}
				Ok(Err(e)) => e,
				Err(e) => {
					error!(iteration, error = %e, "Probe task failed");
					EngineError::TaskFailed(e.to_string())
				}
			};
			// no lookup outlives an abandoned round
			for rest in pending {
				rest.abort();
			}
			return Err(fault);
		}

		debug!(
			iteration,
			total = results.len(),
			failed = results.iter().filter(|r| !r.success).count(),
			"Round complete"
		);
		Ok(results)
	}

	#[cfg(test)]
	pub(crate) fn close(&self) {
		self.semaphore.close();
	}
}
