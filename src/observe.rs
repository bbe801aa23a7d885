//! Observability Sink
//!
//! Structured, PII-masked events for gate decisions and backend health.
//! The sink is injected at construction and called fire-and-forget: a
//! failing sink is logged and ignored, it can never influence a decision.
//! Identifiers are masked before an event is built, so raw IPs and emails
//! never reach a sink implementation.

use serde::Serialize;

use crate::config::ActionType;
use crate::prelude::*;

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Event published for every gate decision and backend switch
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GateEvent {
	/// Attempt allowed; `remaining` attempts left in the window
	Allowed {
		#[serde(rename = "action_type")]
		action: ActionType,
		#[serde(rename = "masked_identifier")]
		identifier: Box<str>,
		remaining: u32,
	},
	/// Attempt denied by an existing block, counter untouched
	Blocked {
		#[serde(rename = "action_type")]
		action: ActionType,
		#[serde(rename = "masked_identifier")]
		identifier: Box<str>,
		block_count: u32,
		retry_after_secs: Option<u64>,
		permanent: bool,
	},
	/// Attempt ceiling crossed; a new (possibly escalated) block was imposed
	Exceeded {
		#[serde(rename = "action_type")]
		action: ActionType,
		#[serde(rename = "masked_identifier")]
		identifier: Box<str>,
		block_count: u32,
		retry_after_secs: Option<u64>,
		permanent: bool,
	},
	/// Distributed backend lost; local best-effort enforcement active
	BackendDegraded { backend: &'static str },
	/// Distributed backend reachable again
	BackendRecovered { backend: &'static str },
}

/// Receives gate events. Implementations must be cheap and non-blocking;
/// anything slow belongs behind a channel.
pub trait EventSink: Send + Sync {
	fn publish(&self, event: GateEvent) -> std::result::Result<(), SinkError>;
}

/// Default sink: structured tracing output
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
	fn publish(&self, event: GateEvent) -> std::result::Result<(), SinkError> {
		match &event {
			GateEvent::Allowed { action, identifier, remaining } => {
				debug!(action = %action, identifier = %identifier, remaining, "attempt allowed");
			}
			GateEvent::Blocked { action, identifier, block_count, retry_after_secs, permanent } => {
				info!(
					action = %action,
					identifier = %identifier,
					block_count,
					retry_after_secs,
					permanent,
					"attempt denied by active block"
				);
			}
			GateEvent::Exceeded { action, identifier, block_count, retry_after_secs, permanent } => {
				warn!(
					action = %action,
					identifier = %identifier,
					block_count,
					retry_after_secs,
					permanent,
					"attempt ceiling exceeded, block imposed"
				);
			}
			GateEvent::BackendDegraded { backend } => {
				warn!(backend, "counter store degraded to local fallback");
			}
			GateEvent::BackendRecovered { backend } => {
				info!(backend, "counter store recovered");
			}
		}
		Ok(())
	}
}

/// Sink that drops everything; for tests and opted-out deployments
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
	fn publish(&self, _event: GateEvent) -> std::result::Result<(), SinkError> {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_event_serialization_is_masked_shape() {
		let event = GateEvent::Exceeded {
			action: ActionType::Login,
			identifier: "203.0.113.x".into(),
			block_count: 1,
			retry_after_secs: Some(900),
			permanent: false,
		};
		let json = serde_json::to_value(&event).unwrap();
		assert_eq!(json["event"], "exceeded");
		assert_eq!(json["action_type"], "login");
		assert_eq!(json["masked_identifier"], "203.0.113.x");
		assert_eq!(json["retry_after_secs"], 900);
	}

	#[test]
	fn test_tracing_sink_accepts_all_events() {
		let sink = TracingSink;
		sink.publish(GateEvent::BackendDegraded { backend: "redis" }).unwrap();
		sink.publish(GateEvent::Allowed {
			action: ActionType::Signup,
			identifier: "a***@example.com".into(),
			remaining: 4,
		})
		.unwrap();
	}
}

// vim: ts=4
