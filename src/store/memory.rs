//! Local Fallback Store
//!
//! Bounded in-process counter store. Used when the distributed backend is
//! unreachable; enforcement through it is best-effort under horizontal
//! scaling since every instance counts independently. The exclusive write
//! lock makes `increment` linearizable within the process.
//!
//! Permanently blocked keys are held outside the LRU bound: cache pressure
//! must never evict a lock whose only exit is an administrative reset.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::RwLock;

use super::{AttemptEntry, BlockExpiry, CounterStore, UnixMillis};
use crate::prelude::*;

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(100_000) {
	Some(v) => v,
	None => unreachable!(),
};

struct Entries {
	tracked: LruCache<Box<str>, AttemptEntry>,
	/// Permanent blocks, exempt from eviction and sweeping
	pinned: HashMap<Box<str>, AttemptEntry>,
}

pub struct MemoryStore {
	entries: RwLock<Entries>,
}

impl MemoryStore {
	/// Create a store holding at most `capacity` non-permanent keys; least
	/// recently used keys are evicted beyond that. Permanently blocked keys
	/// are pinned separately and only leave through `delete`.
	pub fn new(capacity: usize) -> Self {
		let cap = NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY);
		Self {
			entries: RwLock::new(Entries {
				tracked: LruCache::new(cap),
				pinned: HashMap::new(),
			}),
		}
	}

	/// Number of currently tracked keys, pinned included
	pub fn len(&self) -> usize {
		let entries = self.entries.read();
		entries.tracked.len() + entries.pinned.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Default for MemoryStore {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY.get())
	}
}

#[async_trait]
impl CounterStore for MemoryStore {
	async fn get(&self, key: &str) -> Result<Option<AttemptEntry>> {
		let mut entries = self.entries.write();
		if let Some(entry) = entries.pinned.get(key) {
			return Ok(Some(entry.clone()));
		}
		Ok(entries.tracked.get(key).cloned())
	}

	async fn put(&self, key: &str, entry: &AttemptEntry, _ttl: Option<Duration>) -> Result<()> {
		// TTL is owned by sweep() here; only Redis has native expiry
		let mut entries = self.entries.write();
		if matches!(entry.blocked_until, Some(BlockExpiry::Permanent)) {
			entries.tracked.pop(key);
			entries.pinned.insert(key.into(), entry.clone());
		} else {
			entries.pinned.remove(key);
			entries.tracked.put(key.into(), entry.clone());
		}
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<()> {
		let mut entries = self.entries.write();
		entries.tracked.pop(key);
		entries.pinned.remove(key);
		Ok(())
	}

	async fn increment(&self, key: &str, window_ms: i64, now: UnixMillis) -> Result<AttemptEntry> {
		let mut entries = self.entries.write();
		if let Some(entry) = entries.pinned.get(key) {
			// Permanently blocked; return untouched
			return Ok(entry.clone());
		}
		let entry = entries.tracked.get_or_insert_mut(key.into(), || AttemptEntry::fresh(now));

		if entry.blocked_until.is_some() {
			// Concurrent block; return untouched
			return Ok(entry.clone());
		}
		if now - entry.first_attempt > window_ms {
			entry.attempts = 0;
			entry.first_attempt = now;
		}
		entry.attempts += 1;
		Ok(entry.clone())
	}

	async fn sweep(&self, now: UnixMillis) -> Result<u64> {
		let mut entries = self.entries.write();
		let stale: Vec<Box<str>> = entries
			.tracked
			.iter()
			.filter(|(_, entry)| entry.is_stale(now))
			.map(|(key, _)| key.clone())
			.collect();
		for key in &stale {
			entries.tracked.pop(key);
		}
		if !stale.is_empty() {
			debug!("swept {} stale rate limit entries", stale.len());
		}
		Ok(stale.len() as u64)
	}

	fn backend_name(&self) -> &'static str {
		"memory"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::STALE_ENTRY_TTL;

	#[tokio::test]
	async fn test_increment_creates_and_counts() {
		let store = MemoryStore::new(16);
		let entry = store.increment("k", 1_000, 100).await.unwrap();
		assert_eq!(entry.attempts, 1);
		assert_eq!(entry.first_attempt, 100);
		assert_eq!(entry.block_count, 0);

		let entry = store.increment("k", 1_000, 200).await.unwrap();
		assert_eq!(entry.attempts, 2);
		assert_eq!(entry.first_attempt, 100);
	}

	#[tokio::test]
	async fn test_window_reset_preserves_block_count() {
		let store = MemoryStore::new(16);
		let seeded = AttemptEntry { attempts: 4, first_attempt: 0, blocked_until: None, block_count: 2 };
		store.put("k", &seeded, None).await.unwrap();

		let entry = store.increment("k", 1_000, 2_000).await.unwrap();
		assert_eq!(entry.attempts, 1);
		assert_eq!(entry.first_attempt, 2_000);
		assert_eq!(entry.block_count, 2);
	}

	#[tokio::test]
	async fn test_increment_leaves_blocked_entries_alone() {
		let store = MemoryStore::new(16);
		let blocked = AttemptEntry {
			attempts: 0,
			first_attempt: 0,
			blocked_until: Some(BlockExpiry::At(10_000)),
			block_count: 1,
		};
		store.put("k", &blocked, None).await.unwrap();

		let entry = store.increment("k", 1_000, 5_000).await.unwrap();
		assert_eq!(entry, blocked);
	}

	#[tokio::test]
	async fn test_sweep_removes_stale_and_lapsed() {
		let store = MemoryStore::new(16);
		let day_ms = STALE_ENTRY_TTL.as_millis() as i64;

		store.put("stale", &AttemptEntry::fresh(0), None).await.unwrap();
		store.put("live", &AttemptEntry::fresh(day_ms), None).await.unwrap();
		let lapsed = AttemptEntry {
			attempts: 0,
			first_attempt: day_ms,
			blocked_until: Some(BlockExpiry::At(day_ms + 1)),
			block_count: 1,
		};
		store.put("lapsed", &lapsed, None).await.unwrap();
		let permanent = AttemptEntry {
			blocked_until: Some(BlockExpiry::Permanent),
			..AttemptEntry::fresh(0)
		};
		store.put("permanent", &permanent, None).await.unwrap();

		let removed = store.sweep(day_ms + 10).await.unwrap();
		assert_eq!(removed, 2);
		assert!(store.get("stale").await.unwrap().is_none());
		assert!(store.get("lapsed").await.unwrap().is_none());
		assert!(store.get("live").await.unwrap().is_some());
		// Permanent blocks are never garbage collected
		assert!(store.get("permanent").await.unwrap().is_some());
	}

	#[tokio::test]
	async fn test_capacity_bound() {
		let store = MemoryStore::new(2);
		store.increment("a", 1_000, 0).await.unwrap();
		store.increment("b", 1_000, 0).await.unwrap();
		store.increment("c", 1_000, 0).await.unwrap();
		assert_eq!(store.len(), 2);
		assert!(store.get("a").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_eviction_spares_permanent_blocks() {
		let store = MemoryStore::new(2);
		let permanent = AttemptEntry {
			attempts: 0,
			first_attempt: 0,
			blocked_until: Some(BlockExpiry::Permanent),
			block_count: 3,
		};
		store.put("locked", &permanent, None).await.unwrap();

		// Churn far past capacity
		for key in ["a", "b", "c", "d", "e"] {
			store.increment(key, 1_000, 0).await.unwrap();
		}

		assert_eq!(store.get("locked").await.unwrap(), Some(permanent));
		let entry = store.increment("locked", 1_000, 0).await.unwrap();
		assert_eq!(entry.attempts, 0);
		assert_eq!(entry.blocked_until, Some(BlockExpiry::Permanent));

		// delete is still the way out
		store.delete("locked").await.unwrap();
		assert!(store.get("locked").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_reblock_after_reset_moves_back_to_tracked() {
		let store = MemoryStore::new(16);
		let permanent = AttemptEntry {
			attempts: 0,
			first_attempt: 0,
			blocked_until: Some(BlockExpiry::Permanent),
			block_count: 3,
		};
		store.put("k", &permanent, None).await.unwrap();

		// Overwriting with a non-permanent entry unpins the key
		let fresh = AttemptEntry::fresh(1_000);
		store.put("k", &fresh, None).await.unwrap();
		assert_eq!(store.get("k").await.unwrap(), Some(fresh));
		assert_eq!(store.len(), 1);

		let entry = store.increment("k", 1_000, 1_000).await.unwrap();
		assert_eq!(entry.attempts, 1);
	}
}

// vim: ts=4
