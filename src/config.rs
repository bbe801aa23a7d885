//! Policy Configuration
//!
//! Compiled-in rate limit policies for the authentication flows the gate
//! protects, the shared block escalation ladder, and deployment-level
//! settings. The policy table is not runtime-editable; the only per
//! deployment knob for enforcement is the master switch.

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::Error;

const MINUTE: u64 = 60;
const HOUR: u64 = 3600;

/// Authentication flow protected by the gate
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
	Login,
	MagicLink,
	Oauth,
	PasswordReset,
	Signup,
}

impl ActionType {
	/// All protected action types
	pub const ALL: [ActionType; 5] = [
		ActionType::Login,
		ActionType::MagicLink,
		ActionType::Oauth,
		ActionType::PasswordReset,
		ActionType::Signup,
	];

	/// Snake-case name used in storage keys, events and logs
	pub fn as_str(self) -> &'static str {
		match self {
			ActionType::Login => "login",
			ActionType::MagicLink => "magic_link",
			ActionType::Oauth => "oauth",
			ActionType::PasswordReset => "password_reset",
			ActionType::Signup => "signup",
		}
	}

	/// Rate limit policy for this action
	pub fn policy(self) -> ActionPolicy {
		match self {
			// Login: short window, credential stuffing is the main threat
			ActionType::Login => ActionPolicy::new(15 * MINUTE, 5, 15 * MINUTE),
			// Magic link / password reset: each attempt sends an email
			ActionType::MagicLink => ActionPolicy::new(HOUR, 3, HOUR),
			ActionType::PasswordReset => ActionPolicy::new(HOUR, 3, HOUR),
			// OAuth: exchanges are retried legitimately, looser ceiling
			ActionType::Oauth => ActionPolicy::new(15 * MINUTE, 10, 15 * MINUTE),
			ActionType::Signup => ActionPolicy::new(HOUR, 5, HOUR),
		}
	}
}

impl std::fmt::Display for ActionType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ActionType {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"login" => Ok(ActionType::Login),
			"magic_link" => Ok(ActionType::MagicLink),
			"oauth" => Ok(ActionType::Oauth),
			"password_reset" => Ok(ActionType::PasswordReset),
			"signup" => Ok(ActionType::Signup),
			_ => Err(Error::UnknownAction(s.into())),
		}
	}
}

/// Rate limit policy for a single action type
///
/// Invariant: `max_attempts >= 1` and `window > 0`, guaranteed by
/// construction since the table is compiled in.
#[derive(Clone, Copy, Debug)]
pub struct ActionPolicy {
	/// Length of the attempt counting window
	pub window: Duration,
	/// Attempts allowed within the window before blocking
	pub max_attempts: u32,
	/// Block duration used when the escalation ladder has no entry
	pub block_duration: Duration,
}

impl ActionPolicy {
	const fn new(window_secs: u64, max_attempts: u32, block_secs: u64) -> Self {
		Self {
			window: Duration::from_secs(window_secs),
			max_attempts,
			block_duration: Duration::from_secs(block_secs),
		}
	}

	/// Window length in milliseconds
	pub fn window_ms(&self) -> i64 {
		self.window.as_millis() as i64
	}
}

/// Shared block escalation ladder, indexed by the block count at the moment
/// a block is imposed. A violation past the end of the ladder is permanent
/// and only an administrative reset clears it.
pub const ESCALATION_LADDER: [Duration; 3] = [
	Duration::from_secs(15 * MINUTE),
	Duration::from_secs(HOUR),
	Duration::from_secs(24 * HOUR),
];

/// Deployment-level gate settings
#[derive(Clone, Debug)]
pub struct GateConfig {
	/// Master switch; when false the gate middleware passes every request
	/// through without evaluation
	pub enabled: bool,
	/// Distributed counter store URL (e.g. `redis://127.0.0.1/`).
	/// Local-only best-effort enforcement when unset or unreachable.
	pub store_url: Option<Box<str>>,
	/// Prefix for storage keys
	pub key_prefix: Box<str>,
	/// Capacity bound of the local fallback store
	pub local_capacity: usize,
	/// Budget for a single distributed store round-trip; a slower call is
	/// treated as a store failure
	pub store_timeout: Duration,
	/// How long to wait before re-probing an unhealthy distributed store
	pub probe_interval: Duration,
}

impl Default for GateConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			store_url: None,
			key_prefix: "authgate".into(),
			local_capacity: 100_000,
			store_timeout: Duration::from_secs(2),
			probe_interval: Duration::from_secs(30),
		}
	}
}


// vim: ts=4
