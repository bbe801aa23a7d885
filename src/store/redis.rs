//! Distributed Counter Store
//!
//! Redis-backed counter store, authoritative when reachable: entries are
//! visible to every process instance, so enforcement stays consistent under
//! horizontal scaling. Entries are hashes (`attempts`, `first_attempt`,
//! `blocked_until`, `block_count`) and the increment runs as a Lua script so
//! the fetch-or-create / window-reset / count step is atomic server-side.
//! Expiry is native TTL; `sweep` is a no-op.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::AsyncCommands;

use super::{AttemptEntry, BlockExpiry, CounterStore, UnixMillis, STALE_ENTRY_TTL};
use crate::prelude::*;

/// Sentinel returned by the script when `blocked_until` is unset
const NO_BLOCK: i64 = -2;

/// KEYS[1] = entry key, ARGV = [window_ms, now_ms, ttl_ms]
/// Returns {attempts, first_attempt, block_count, blocked_until | -2}
const INCREMENT_SCRIPT: &str = r#"
local bu = redis.call('HGET', KEYS[1], 'blocked_until')
if bu then
	local cur = redis.call('HMGET', KEYS[1], 'attempts', 'first_attempt', 'block_count')
	return {tonumber(cur[1]) or 0, tonumber(cur[2]) or tonumber(ARGV[2]), tonumber(cur[3]) or 0, tonumber(bu)}
end
local first = tonumber(redis.call('HGET', KEYS[1], 'first_attempt'))
if first == nil or tonumber(ARGV[2]) - first > tonumber(ARGV[1]) then
	redis.call('HSET', KEYS[1], 'first_attempt', ARGV[2], 'attempts', 0)
	redis.call('HSETNX', KEYS[1], 'block_count', 0)
	first = tonumber(ARGV[2])
end
local attempts = redis.call('HINCRBY', KEYS[1], 'attempts', 1)
redis.call('PEXPIRE', KEYS[1], ARGV[3])
local bc = tonumber(redis.call('HGET', KEYS[1], 'block_count')) or 0
return {attempts, first, bc, -2}
"#;

pub struct RedisStore {
	client: redis::Client,
	conn: RwLock<Option<redis::aio::MultiplexedConnection>>,
	increment_script: redis::Script,
}

impl RedisStore {
	/// Parse the URL and set up the store; no I/O happens until the first
	/// call, so a backend that is down at startup connects once it is back
	pub fn new(url: &str) -> Result<Self> {
		let client = redis::Client::open(url)?;
		Ok(Self {
			client,
			conn: RwLock::new(None),
			increment_script: redis::Script::new(INCREMENT_SCRIPT),
		})
	}

	/// Cached connection, established on first use and after invalidation
	async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
		if let Some(conn) = self.conn.read().clone() {
			return Ok(conn);
		}
		let conn = self.client.get_multiplexed_async_connection().await?;
		debug!("connected to distributed counter store");
		*self.conn.write() = Some(conn.clone());
		Ok(conn)
	}

	/// A failed call drops the cached connection; the next call (normally the
	/// health probe) re-establishes it
	fn invalidate(&self) {
		*self.conn.write() = None;
	}
}

fn parse_field(map: &HashMap<String, String>, field: &str) -> Result<Option<i64>> {
	match map.get(field) {
		None => Ok(None),
		Some(raw) => raw
			.parse::<i64>()
			.map(Some)
			.map_err(|_| Error::Encoding(format!("field {}: {}", field, raw).into())),
	}
}

#[async_trait]
impl CounterStore for RedisStore {
	async fn get(&self, key: &str) -> Result<Option<AttemptEntry>> {
		let mut conn = self.connection().await?;
		let map: HashMap<String, String> =
			conn.hgetall(key).await.inspect_err(|_| self.invalidate())?;
		if map.is_empty() {
			return Ok(None);
		}
		Ok(Some(AttemptEntry {
			attempts: parse_field(&map, "attempts")?.unwrap_or(0) as u32,
			first_attempt: parse_field(&map, "first_attempt")?.unwrap_or(0),
			blocked_until: parse_field(&map, "blocked_until")?.map(BlockExpiry::from_field),
			block_count: parse_field(&map, "block_count")?.unwrap_or(0) as u32,
		}))
	}

	async fn put(&self, key: &str, entry: &AttemptEntry, ttl: Option<Duration>) -> Result<()> {
		let mut conn = self.connection().await?;
		let mut fields: Vec<(&str, i64)> = vec![
			("attempts", i64::from(entry.attempts)),
			("first_attempt", entry.first_attempt),
			("block_count", i64::from(entry.block_count)),
		];
		if let Some(expiry) = entry.blocked_until {
			fields.push(("blocked_until", expiry.to_field()));
		}

		let mut pipe = redis::pipe();
		pipe.atomic().del(key).ignore().hset_multiple(key, &fields).ignore();
		// No TTL pins the entry (permanent blocks must survive)
		if let Some(ttl) = ttl {
			pipe.pexpire(key, ttl.as_millis() as i64).ignore();
		}
		let _: () = pipe.query_async(&mut conn).await.inspect_err(|_| self.invalidate())?;
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<()> {
		let mut conn = self.connection().await?;
		conn.del::<_, ()>(key).await.inspect_err(|_| self.invalidate())?;
		Ok(())
	}

	async fn increment(&self, key: &str, window_ms: i64, now: UnixMillis) -> Result<AttemptEntry> {
		let mut conn = self.connection().await?;
		let (attempts, first_attempt, block_count, blocked_until): (i64, i64, i64, i64) = self
			.increment_script
			.key(key)
			.arg(window_ms)
			.arg(now)
			.arg(STALE_ENTRY_TTL.as_millis() as i64)
			.invoke_async(&mut conn)
			.await
			.inspect_err(|_| self.invalidate())?;

		Ok(AttemptEntry {
			attempts: attempts.max(0) as u32,
			first_attempt,
			blocked_until: if blocked_until == NO_BLOCK {
				None
			} else {
				Some(BlockExpiry::from_field(blocked_until))
			},
			block_count: block_count.max(0) as u32,
		})
	}

	async fn sweep(&self, _now: UnixMillis) -> Result<u64> {
		// Per-key TTL owns expiry here
		Ok(0)
	}

	fn backend_name(&self) -> &'static str {
		"redis"
	}
}

// vim: ts=4
