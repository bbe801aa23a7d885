//! Policy Gate Middleware
//!
//! Tower middleware applying an action's rate limit policy in front of the
//! downstream handler. Denials short-circuit with HTTP 429, a stable error
//! code and a retry hint.
//!
//! Failure contract: this gate FAILS OPEN. When evaluation itself errors
//! (both store backends down, timeout), the request proceeds and the failure
//! is logged at error severity; a broken rate limiter must not become an
//! outage. Feature-availability gates have the opposite (fail-closed)
//! philosophy and must not be confused with this one.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::BoxFuture;
use hyper::Request;
use tower::{Layer, Service};

use crate::config::ActionType;
use crate::key::{extract_client_ip, ServerMode};
use crate::limiter::{AuthRateLimiter, Decision};
use crate::prelude::*;
use crate::store::{now_ms, BlockExpiry};

/// Gate layer for one protected action
#[derive(Clone)]
pub struct RateLimitGateLayer {
	limiter: Arc<AuthRateLimiter>,
	action: ActionType,
	auth_type: &'static str,
	mode: ServerMode,
}

impl RateLimitGateLayer {
	/// `auth_type` names the credential flow behind the route (e.g.
	/// "password", "otp") and only appears in logs
	pub fn new(
		limiter: Arc<AuthRateLimiter>,
		action: ActionType,
		auth_type: &'static str,
		mode: ServerMode,
	) -> Self {
		Self { limiter, action, auth_type, mode }
	}
}

impl<S> Layer<S> for RateLimitGateLayer {
	type Service = RateLimitGateService<S>;

	fn layer(&self, inner: S) -> Self::Service {
		RateLimitGateService {
			inner,
			limiter: self.limiter.clone(),
			action: self.action,
			auth_type: self.auth_type,
			mode: self.mode,
		}
	}
}

#[derive(Clone)]
pub struct RateLimitGateService<S> {
	inner: S,
	limiter: Arc<AuthRateLimiter>,
	action: ActionType,
	auth_type: &'static str,
	mode: ServerMode,
}

impl<S> Service<Request<Body>> for RateLimitGateService<S>
where
	S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
	S::Future: Send + 'static,
{
	type Response = S::Response;
	type Error = S::Error;
	type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

	fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
		self.inner.poll_ready(cx)
	}

	fn call(&mut self, req: Request<Body>) -> Self::Future {
		let limiter = self.limiter.clone();
		let action = self.action;
		let auth_type = self.auth_type;
		let mode = self.mode;
		let mut inner = self.inner.clone();

		Box::pin(async move {
			// Master switch: administratively disabled gates bypass
			// evaluation entirely
			if !limiter.enabled() {
				return inner.call(req).await;
			}

			let Some(client_ip) = extract_client_ip(&req, mode) else {
				return inner.call(req).await;
			};

			match limiter.record_attempt(action, &client_ip.to_string()).await {
				Ok(decision) if decision.allowed => inner.call(req).await,
				Ok(decision) => {
					debug!(action = %action, auth_type, "request rate limited");
					Ok(rate_limited_response(&decision))
				}
				Err(err) => {
					// Fail open
					error!(
						action = %action,
						auth_type,
						"rate limit evaluation failed, failing open: {}",
						err
					);
					inner.call(req).await
				}
			}
		})
	}
}

/// 429 response for a denied decision
pub fn rate_limited_response(decision: &Decision) -> Response {
	let now = now_ms();
	let (retry_after_secs, permanent) = match decision.blocked_until {
		Some(BlockExpiry::At(ts)) => (Some(((ts - now).max(0) as u64).div_ceil(1000)), false),
		Some(BlockExpiry::Permanent) => (None, true),
		None => (None, false),
	};

	let mut error = serde_json::json!({
		"code": "AUTH_RATE_LIMITED",
		"retryable": !permanent,
	});
	if permanent {
		error["message"] = "Too many failed attempts. Contact support to restore access.".into();
	} else {
		error["message"] = "Too many attempts. Please try again later.".into();
		if let Some(secs) = retry_after_secs {
			error["retry_after_seconds"] = secs.into();
		}
	}
	let body = serde_json::json!({ "success": false, "error": error });

	let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
	if let Some(secs) = retry_after_secs {
		if let Ok(value) = secs.to_string().parse() {
			response.headers_mut().insert("Retry-After", value);
		}
	}
	response
}


// vim: ts=4
