//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use authgate::observe::SinkError;
use authgate::{AttemptEntry, CounterStore, Error, EventSink, GateEvent, UnixMillis};

/// Sink that records every published event
#[derive(Default)]
pub struct RecordingSink {
	pub events: Mutex<Vec<GateEvent>>,
}

impl EventSink for RecordingSink {
	fn publish(&self, event: GateEvent) -> Result<(), SinkError> {
		self.events.lock().push(event);
		Ok(())
	}
}

/// Store where every call fails, as if both backends were unreachable
pub struct FailingStore;

#[async_trait]
impl CounterStore for FailingStore {
	async fn get(&self, _key: &str) -> authgate::Result<Option<AttemptEntry>> {
		Err(Error::StoreUnavailable("connection refused".into()))
	}

	async fn put(
		&self,
		_key: &str,
		_entry: &AttemptEntry,
		_ttl: Option<Duration>,
	) -> authgate::Result<()> {
		Err(Error::StoreUnavailable("connection refused".into()))
	}

	async fn delete(&self, _key: &str) -> authgate::Result<()> {
		Err(Error::StoreUnavailable("connection refused".into()))
	}

	async fn increment(
		&self,
		_key: &str,
		_window_ms: i64,
		_now: UnixMillis,
	) -> authgate::Result<AttemptEntry> {
		Err(Error::StoreUnavailable("connection refused".into()))
	}

	async fn sweep(&self, _now: UnixMillis) -> authgate::Result<u64> {
		Err(Error::StoreUnavailable("connection refused".into()))
	}

	fn backend_name(&self) -> &'static str {
		"failing"
	}
}

// vim: ts=4
