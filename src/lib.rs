//! Progressive rate limiting and abuse gating for authentication flows.
//!
//! This crate protects a small, enumerated set of authentication-sensitive
//! actions (login, signup, magic-link request, password recovery, OAuth
//! exchange) against brute-force and enumeration abuse. Attempts are counted
//! per `(action, identifier)` key across a fixed window; repeated violations
//! escalate the lockout duration along a shared ladder up to a permanent
//! lock that only an administrative reset can clear.
//!
//! Counters live in a distributed store (Redis) when one is reachable so
//! enforcement is consistent across horizontally scaled instances, with a
//! bounded in-process fallback when it is not. The HTTP gate itself fails
//! open: a broken rate limiter must never become an outage for legitimate
//! traffic. This is the opposite of a feature-availability check and the two
//! must not be conflated.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod key;
pub mod limiter;
pub mod middleware;
pub mod observe;
pub mod prelude;
pub mod store;

pub use config::{ActionPolicy, ActionType, GateConfig, ESCALATION_LADDER};
pub use error::{Error, Result};
pub use key::{extract_client_ip, mask_identifier, RateLimitKey, ServerMode};
pub use limiter::{AuthRateLimiter, BlockRemaining, Decision};
pub use middleware::RateLimitGateLayer;
pub use observe::{EventSink, GateEvent, NullSink, TracingSink};
pub use store::failover::FailoverStore;
pub use store::memory::MemoryStore;
pub use store::redis::RedisStore;
pub use store::{AttemptEntry, BlockExpiry, CounterStore, UnixMillis};

// vim: ts=4
