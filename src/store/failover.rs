//! Backend Selection and Failover
//!
//! Wraps the distributed store with the local fallback behind the same
//! interface, so backend switching is invisible to the policy evaluator. A
//! failed or timed-out distributed call flips a health flag and routes
//! subsequent calls to the fallback; one degradation event is emitted per
//! switch, not per request. After a probe interval the distributed side is
//! tried again and a recovery event is emitted on success. The same probe
//! runs once at construction, so a backend that is down from the start is
//! reported and recovered like any later outage.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{now_ms, AttemptEntry, CounterStore, UnixMillis};
use crate::observe::{EventSink, GateEvent};
use crate::prelude::*;

pub struct FailoverStore {
	primary: Option<Arc<dyn CounterStore>>,
	fallback: Arc<dyn CounterStore>,
	sink: Arc<dyn EventSink>,
	call_timeout: Duration,
	probe_interval: Duration,
	primary_healthy: AtomicBool,
	last_probe: AtomicI64,
}

impl FailoverStore {
	pub fn new(
		primary: Option<Arc<dyn CounterStore>>,
		fallback: Arc<dyn CounterStore>,
		sink: Arc<dyn EventSink>,
		call_timeout: Duration,
		probe_interval: Duration,
	) -> Self {
		Self {
			primary,
			fallback,
			sink,
			call_timeout,
			probe_interval,
			primary_healthy: AtomicBool::new(true),
			last_probe: AtomicI64::new(now_ms()),
		}
	}

	/// Whether the distributed store is currently enforcing
	pub fn primary_active(&self) -> bool {
		self.primary.is_some() && self.primary_healthy.load(Ordering::SeqCst)
	}

	/// True when the primary is healthy, or unhealthy but due for a probe.
	/// At most one call wins the probe slot per interval.
	fn primary_usable(&self) -> bool {
		if self.primary_healthy.load(Ordering::SeqCst) {
			return true;
		}
		let now = now_ms();
		let last = self.last_probe.load(Ordering::SeqCst);
		now - last >= self.probe_interval.as_millis() as i64
			&& self
				.last_probe
				.compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
				.is_ok()
	}

	fn mark_unhealthy(&self, backend: &'static str) {
		self.last_probe.store(now_ms(), Ordering::SeqCst);
		if self.primary_healthy.swap(false, Ordering::SeqCst) {
			warn!("distributed counter store unavailable, falling back to local enforcement");
			self.emit(GateEvent::BackendDegraded { backend });
		}
	}

	fn mark_healthy(&self, backend: &'static str) {
		if !self.primary_healthy.swap(true, Ordering::SeqCst) {
			info!("distributed counter store recovered");
			self.emit(GateEvent::BackendRecovered { backend });
		}
	}

	fn emit(&self, event: GateEvent) {
		if let Err(err) = self.sink.publish(event) {
			warn!("event sink failure ignored: {}", err);
		}
	}

	/// Run a primary-store call under the timeout budget; returns None when
	/// the fallback should take over
	async fn run_primary<T>(
		&self,
		backend: &'static str,
		fut: impl Future<Output = Result<T>>,
	) -> Option<T> {
		match tokio::time::timeout(self.call_timeout, fut).await {
			Ok(Ok(value)) => {
				self.mark_healthy(backend);
				Some(value)
			}
			Ok(Err(err)) => {
				warn!("distributed counter store call failed: {}", err);
				self.mark_unhealthy(backend);
				None
			}
			Err(_) => {
				warn!("distributed counter store call timed out");
				self.mark_unhealthy(backend);
				None
			}
		}
	}

	fn usable_primary(&self) -> Option<&Arc<dyn CounterStore>> {
		self.primary.as_ref().filter(|_| self.primary_usable())
	}

	/// Check the distributed side with a cheap read, updating health state and
	/// emitting the degradation or recovery event on a switch. Returns whether
	/// the primary answered; false when none is configured.
	pub async fn probe_primary(&self) -> bool {
		match self.primary.as_ref() {
			Some(primary) => self
				.run_primary(primary.backend_name(), primary.get("health-probe"))
				.await
				.is_some(),
			None => false,
		}
	}
}

#[async_trait]
impl CounterStore for FailoverStore {
	async fn get(&self, key: &str) -> Result<Option<AttemptEntry>> {
		if let Some(primary) = self.usable_primary() {
			if let Some(value) = self.run_primary(primary.backend_name(), primary.get(key)).await {
				return Ok(value);
			}
		}
		self.fallback.get(key).await
	}

	async fn put(&self, key: &str, entry: &AttemptEntry, ttl: Option<Duration>) -> Result<()> {
		if let Some(primary) = self.usable_primary() {
			if let Some(()) =
				self.run_primary(primary.backend_name(), primary.put(key, entry, ttl)).await
			{
				return Ok(());
			}
		}
		self.fallback.put(key, entry, ttl).await
	}

	async fn delete(&self, key: &str) -> Result<()> {
		if let Some(primary) = self.usable_primary() {
			if let Some(()) = self.run_primary(primary.backend_name(), primary.delete(key)).await {
				// Delete from both sides; stale local state must not outlive
				// an administrative reset
				self.fallback.delete(key).await?;
				return Ok(());
			}
		}
		self.fallback.delete(key).await
	}

	async fn increment(&self, key: &str, window_ms: i64, now: UnixMillis) -> Result<AttemptEntry> {
		if let Some(primary) = self.usable_primary() {
			if let Some(entry) = self
				.run_primary(primary.backend_name(), primary.increment(key, window_ms, now))
				.await
			{
				return Ok(entry);
			}
		}
		self.fallback.increment(key, window_ms, now).await
	}

	async fn sweep(&self, now: UnixMillis) -> Result<u64> {
		// The local side always needs sweeping; the distributed side expires
		// natively but is swept too when reachable
		let mut removed = self.fallback.sweep(now).await?;
		if let Some(primary) = self.usable_primary() {
			if let Some(count) = self.run_primary(primary.backend_name(), primary.sweep(now)).await
			{
				removed += count;
			}
		}
		Ok(removed)
	}

	fn backend_name(&self) -> &'static str {
		"failover"
	}
}


// vim: ts=4
