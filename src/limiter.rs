//! Policy Evaluator
//!
//! Decides allow/deny for each attempt against the counter store, applying
//! the per-action policy table and the progressive block escalation ladder.
//! The evaluator is stateless beyond configuration; the counter store is the
//! only shared mutable resource and the source of per-key serialization.
//!
//! Per-key state machine: Fresh -> Counting -> Blocked(temporary) ->
//! Counting on expiry, or Blocked(permanent) which is terminal until an
//! administrative [`reset`](AuthRateLimiter::reset).

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::{ActionPolicy, ActionType, GateConfig, ESCALATION_LADDER};
use crate::key::{mask_identifier, RateLimitKey};
use crate::observe::{EventSink, GateEvent};
use crate::prelude::*;
use crate::store::failover::FailoverStore;
use crate::store::memory::MemoryStore;
use crate::store::redis::RedisStore;
use crate::store::{now_ms, AttemptEntry, BlockExpiry, CounterStore, UnixMillis, STALE_ENTRY_TTL};

/// Outcome of recording one attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
	pub allowed: bool,
	/// Attempts left in the window (allowed decisions only)
	pub remaining: Option<u32>,
	/// Block in force (denied decisions only)
	pub blocked_until: Option<BlockExpiry>,
	/// Escalation counter at decision time
	pub block_count: u32,
}

/// Remaining block time reported by read-only queries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockRemaining {
	Finite(Duration),
	Permanent,
}

pub struct AuthRateLimiter {
	store: Arc<dyn CounterStore>,
	sink: Arc<dyn EventSink>,
	key_prefix: Box<str>,
	enabled: bool,
}

impl AuthRateLimiter {
	/// Build a limiter with the standard dual-backend store: distributed
	/// when `config.store_url` is set, local fallback always. A distributed
	/// store that is unreachable at startup degrades through the sink and is
	/// re-probed like any later outage; only an unparseable URL drops it
	/// entirely.
	pub async fn new(config: GateConfig, sink: Arc<dyn EventSink>) -> Self {
		let fallback = Arc::new(MemoryStore::new(config.local_capacity));
		let primary: Option<Arc<dyn CounterStore>> = match config.store_url.as_deref() {
			Some(url) => match RedisStore::new(url) {
				Ok(store) => Some(Arc::new(store)),
				Err(err) => {
					warn!("invalid counter store URL ({}), local enforcement only", err);
					None
				}
			},
			None => {
				debug!("no distributed counter store configured, local enforcement only");
				None
			}
		};
		let store = Arc::new(FailoverStore::new(
			primary,
			fallback,
			sink.clone(),
			config.store_timeout,
			config.probe_interval,
		));
		store.probe_primary().await;
		Self::with_store(store, sink, &config)
	}

	/// Build a limiter over an explicit store (tests, custom backends)
	pub fn with_store(
		store: Arc<dyn CounterStore>,
		sink: Arc<dyn EventSink>,
		config: &GateConfig,
	) -> Self {
		Self { store, sink, key_prefix: config.key_prefix.clone(), enabled: config.enabled }
	}

	/// Master switch state; consulted by the gate middleware
	pub fn enabled(&self) -> bool {
		self.enabled
	}

	/// Record one attempt and decide whether it may proceed
	pub async fn record_attempt(&self, action: ActionType, identifier: &str) -> Result<Decision> {
		let policy = action.policy();
		let key = self.key(action, identifier);
		let now = now_ms();

		// An active block short-circuits without touching the counter
		if let Some(entry) = self.store.get(key.as_str()).await? {
			match entry.blocked_until {
				Some(expiry) if expiry.is_active(now) => {
					return Ok(self.deny(action, identifier, &entry, expiry, now, false));
				}
				Some(_) => {
					// Lapsed block: clear it but keep the escalation counter
					let cleared = AttemptEntry {
						attempts: 0,
						first_attempt: now,
						blocked_until: None,
						block_count: entry.block_count,
					};
					self.store.put(key.as_str(), &cleared, Some(STALE_ENTRY_TTL)).await?;
				}
				None => {}
			}
		}

		let entry = self.store.increment(key.as_str(), policy.window_ms(), now).await?;
		// A concurrent violator may have installed a block between the check
		// above and the increment; never count over it
		if let Some(expiry) = entry.blocked_until {
			return Ok(self.deny(action, identifier, &entry, expiry, now, false));
		}

		if entry.attempts > policy.max_attempts {
			let expiry = escalated_expiry(entry.block_count, &policy, now);
			let blocked = AttemptEntry {
				attempts: 0,
				first_attempt: now,
				blocked_until: Some(expiry),
				block_count: entry.block_count + 1,
			};
			let ttl = match expiry {
				BlockExpiry::Permanent => None,
				// Outlive the block itself so the lazy clear path still
				// sees the escalation counter
				BlockExpiry::At(ts) => {
					Some(Duration::from_millis((ts - now).max(0) as u64) + STALE_ENTRY_TTL)
				}
			};
			self.store.put(key.as_str(), &blocked, ttl).await?;
			return Ok(self.deny(action, identifier, &blocked, expiry, now, true));
		}

		let remaining = policy.max_attempts - entry.attempts;
		self.emit(GateEvent::Allowed {
			action,
			identifier: mask_identifier(identifier),
			remaining,
		});
		Ok(Decision {
			allowed: true,
			remaining: Some(remaining),
			blocked_until: None,
			block_count: entry.block_count,
		})
	}

	/// Read-only predicate; no mutation, lapsed blocks are cleared lazily by
	/// [`record_attempt`](AuthRateLimiter::record_attempt)
	pub async fn is_blocked(&self, action: ActionType, identifier: &str) -> Result<bool> {
		let key = self.key(action, identifier);
		let now = now_ms();
		Ok(self
			.store
			.get(key.as_str())
			.await?
			.and_then(|entry| entry.blocked_until)
			.is_some_and(|expiry| expiry.is_active(now)))
	}

	/// Time until the block lifts, if one is in force
	pub async fn block_remaining(
		&self,
		action: ActionType,
		identifier: &str,
	) -> Result<Option<BlockRemaining>> {
		let key = self.key(action, identifier);
		let now = now_ms();
		let Some(entry) = self.store.get(key.as_str()).await? else {
			return Ok(None);
		};
		Ok(match entry.blocked_until {
			Some(BlockExpiry::Permanent) => Some(BlockRemaining::Permanent),
			Some(BlockExpiry::At(ts)) if ts > now => {
				Some(BlockRemaining::Finite(Duration::from_millis((ts - now) as u64)))
			}
			_ => None,
		})
	}

	/// Administrative unconditional delete; the only way out of a permanent
	/// block
	pub async fn reset(&self, action: ActionType, identifier: &str) -> Result<()> {
		let key = self.key(action, identifier);
		self.store.delete(key.as_str()).await?;
		info!(
			action = %action,
			identifier = %mask_identifier(identifier),
			"rate limit state reset"
		);
		Ok(())
	}

	/// Sweep stale entries from the store; returns how many were removed.
	/// Invoke on a schedule, or use [`spawn_cleanup`].
	pub async fn cleanup(&self) -> Result<u64> {
		self.store.sweep(now_ms()).await
	}

	fn key(&self, action: ActionType, identifier: &str) -> RateLimitKey {
		RateLimitKey::new(&self.key_prefix, action, identifier)
	}

	fn deny(
		&self,
		action: ActionType,
		identifier: &str,
		entry: &AttemptEntry,
		expiry: BlockExpiry,
		now: UnixMillis,
		newly_blocked: bool,
	) -> Decision {
		let retry_after_secs = match expiry {
			BlockExpiry::At(ts) => Some(((ts - now).max(0) as u64).div_ceil(1000)),
			BlockExpiry::Permanent => None,
		};
		let permanent = matches!(expiry, BlockExpiry::Permanent);
		let identifier = mask_identifier(identifier);
		let event = if newly_blocked {
			GateEvent::Exceeded {
				action,
				identifier,
				block_count: entry.block_count,
				retry_after_secs,
				permanent,
			}
		} else {
			GateEvent::Blocked {
				action,
				identifier,
				block_count: entry.block_count,
				retry_after_secs,
				permanent,
			}
		};
		self.emit(event);
		Decision {
			allowed: false,
			remaining: None,
			blocked_until: Some(expiry),
			block_count: entry.block_count,
		}
	}

	fn emit(&self, event: GateEvent) {
		// Fire and forget; a broken sink never affects the decision
		if let Err(err) = self.sink.publish(event) {
			warn!("event sink failure ignored: {}", err);
		}
	}
}

/// Ladder entry for this violation, permanent once the ladder is exhausted.
/// Below ladder length, a missing entry falls back to the action's base
/// block duration.
fn escalated_expiry(block_count: u32, policy: &ActionPolicy, now: UnixMillis) -> BlockExpiry {
	let idx = block_count as usize;
	if idx >= ESCALATION_LADDER.len() {
		return BlockExpiry::Permanent;
	}
	let duration = ESCALATION_LADDER.get(idx).copied().unwrap_or(policy.block_duration);
	BlockExpiry::At(now + duration.as_millis() as i64)
}

/// Spawn a periodic cleanup sweep. Deployments driving cleanup from an
/// external cron can call [`AuthRateLimiter::cleanup`] directly instead.
pub fn spawn_cleanup(limiter: Arc<AuthRateLimiter>, every: Duration) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(every);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		loop {
			ticker.tick().await;
			match limiter.cleanup().await {
				Ok(0) => {}
				Ok(count) => info!("rate limit cleanup removed {} entries", count),
				Err(err) => warn!("rate limit cleanup failed: {}", err),
			}
		}
	})
}


// vim: ts=4
