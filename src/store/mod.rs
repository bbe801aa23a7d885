//! Counter Store
//!
//! Per-key attempt counters behind an interchangeable store interface. The
//! distributed backend (`RedisStore`) is authoritative when reachable; the
//! bounded local backend (`MemoryStore`) exists only for graceful
//! degradation and must not be treated as authoritative once more than one
//! process instance is running. `FailoverStore` selects between them at
//! call time.

pub mod failover;
pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Unix timestamp in milliseconds
pub type UnixMillis = i64;

/// Current wall-clock time in Unix milliseconds
pub fn now_ms() -> UnixMillis {
	chrono::Utc::now().timestamp_millis()
}

/// Non-blocked entries untouched for this long are eligible for garbage
/// collection (spec'd memory bound for the local store; TTL hint for Redis)
pub const STALE_ENTRY_TTL: Duration = Duration::from_secs(24 * 3600);

/// When a block lifts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockExpiry {
	/// Block lifts at this timestamp
	At(UnixMillis),
	/// Terminal; requires an administrative reset
	Permanent,
}

impl BlockExpiry {
	/// Whether the block is still in force at `now`
	pub fn is_active(self, now: UnixMillis) -> bool {
		match self {
			BlockExpiry::At(ts) => ts > now,
			BlockExpiry::Permanent => true,
		}
	}

	/// Hash-field encoding: -1 means permanent
	pub(crate) fn to_field(self) -> i64 {
		match self {
			BlockExpiry::At(ts) => ts,
			BlockExpiry::Permanent => -1,
		}
	}

	pub(crate) fn from_field(value: i64) -> Self {
		if value < 0 { BlockExpiry::Permanent } else { BlockExpiry::At(value) }
	}
}

/// One tracked `(action, identifier)` key
///
/// `block_count` drives escalation and never resets while the entry exists;
/// window resets only touch `attempts` and `first_attempt`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptEntry {
	/// Attempts in the current window
	pub attempts: u32,
	/// When the current window started
	pub first_attempt: UnixMillis,
	/// Active (or lapsed, until lazily cleared) block
	pub blocked_until: Option<BlockExpiry>,
	/// Times this key has been blocked before
	pub block_count: u32,
}

impl AttemptEntry {
	/// Entry for a key seen for the first time
	pub fn fresh(now: UnixMillis) -> Self {
		Self { attempts: 0, first_attempt: now, blocked_until: None, block_count: 0 }
	}

	/// Sweep predicate: unblocked and inactive for [`STALE_ENTRY_TTL`], or a
	/// temporary block that has already lapsed
	pub fn is_stale(&self, now: UnixMillis) -> bool {
		match self.blocked_until {
			None => now - self.first_attempt > STALE_ENTRY_TTL.as_millis() as i64,
			Some(BlockExpiry::At(ts)) => ts <= now,
			Some(BlockExpiry::Permanent) => false,
		}
	}
}

/// Keyed attempt counter storage
///
/// Implementations must make [`increment`](CounterStore::increment)
/// linearizable per key: concurrent calls must never lose updates, or two
/// simultaneous violating attempts could both be allowed.
#[async_trait]
pub trait CounterStore: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<AttemptEntry>>;

	/// Overwrite the entry. A `ttl` of None pins the entry (permanent blocks).
	async fn put(&self, key: &str, entry: &AttemptEntry, ttl: Option<Duration>) -> Result<()>;

	async fn delete(&self, key: &str) -> Result<()>;

	/// Atomic fetch-or-create, window reset and increment in one step.
	///
	/// A lapsed window (`now - first_attempt > window_ms`) resets `attempts`
	/// before counting, preserving `block_count`. Entries carrying any
	/// `blocked_until` are returned untouched so that a block installed by a
	/// concurrent violator is never counted over.
	async fn increment(&self, key: &str, window_ms: i64, now: UnixMillis) -> Result<AttemptEntry>;

	/// Remove stale entries; returns how many were removed. A backend with
	/// native expiry may make this a no-op.
	async fn sweep(&self, now: UnixMillis) -> Result<u64>;

	/// Short name used in logs and degradation events
	fn backend_name(&self) -> &'static str;
}


// vim: ts=4
