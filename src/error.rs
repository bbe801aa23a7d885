//! Error Types
//!
//! Internal errors of the gating engine. None of these reach end users
//! through the middleware: store failures are absorbed by the fail-open
//! path, and rate-limited / permanently-blocked outcomes are ordinary
//! decision values, not errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// Action name outside the compiled-in policy table. Caller bug, never a
	/// silent allow.
	UnknownAction(Box<str>),
	/// Backing store rejected, failed or timed out a call
	StoreUnavailable(Box<str>),
	/// Malformed entry data read back from the backing store
	Encoding(Box<str>),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Error::UnknownAction(action) => write!(f, "unknown action type: {}", action),
			Error::StoreUnavailable(msg) => write!(f, "counter store unavailable: {}", msg),
			Error::Encoding(msg) => write!(f, "malformed counter store entry: {}", msg),
		}
	}
}

impl std::error::Error for Error {}

impl From<redis::RedisError> for Error {
	fn from(err: redis::RedisError) -> Self {
		Error::StoreUnavailable(err.to_string().into())
	}
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		// Internal errors only; no detail leaves the process
		let body = serde_json::json!({
			"success": false,
			"error": {
				"code": "E-INTERNAL",
				"message": "Internal error"
			}
		});
		(StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
	}
}

// vim: ts=4
