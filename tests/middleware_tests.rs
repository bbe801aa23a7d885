//! Policy gate middleware integration tests
//!
//! Exercises the tower layer end to end against an axum router: allow and
//! deny responses, the master switch bypass, and the fail-open contract.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use authgate::{
	ActionType, AttemptEntry, AuthRateLimiter, BlockExpiry, CounterStore, GateConfig,
	MemoryStore, NullSink, RateLimitGateLayer, ServerMode,
};
use common::FailingStore;

fn login_app(limiter: Arc<AuthRateLimiter>) -> Router {
	Router::new()
		.route("/api/auth/login", post(|| async { "ok" }))
		.layer(RateLimitGateLayer::new(limiter, ActionType::Login, "password", ServerMode::Proxy))
}

fn login_request(client_ip: &str) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri("/api/auth/login")
		.header("x-forwarded-for", client_ip)
		.body(Body::empty())
		.unwrap()
}

fn default_limiter() -> Arc<AuthRateLimiter> {
	Arc::new(AuthRateLimiter::with_store(
		Arc::new(MemoryStore::new(1024)),
		Arc::new(NullSink),
		&GateConfig::default(),
	))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
	let bytes = response.into_body().collect().await.unwrap().to_bytes();
	serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_allows_within_ceiling() {
	let app = login_app(default_limiter());

	for _ in 0..5 {
		let response = app.clone().oneshot(login_request("203.0.113.5")).await.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
	}
}

#[tokio::test]
async fn test_denies_with_stable_error_shape() {
	let app = login_app(default_limiter());

	for _ in 0..5 {
		app.clone().oneshot(login_request("203.0.113.5")).await.unwrap();
	}
	let response = app.clone().oneshot(login_request("203.0.113.5")).await.unwrap();
	assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

	let retry_header: u64 = response
		.headers()
		.get("Retry-After")
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.parse().ok())
		.unwrap();
	assert!(retry_header > 0 && retry_header <= 15 * 60);

	let body = body_json(response).await;
	assert_eq!(body["success"], false);
	assert_eq!(body["error"]["code"], "AUTH_RATE_LIMITED");
	assert_eq!(body["error"]["retryable"], true);
	let retry_body = body["error"]["retry_after_seconds"].as_u64().unwrap();
	assert!(retry_body > 0 && retry_body <= 15 * 60);

	// Other clients are unaffected
	let response = app.oneshot(login_request("198.51.100.99")).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_permanent_block_directs_to_support() {
	let store = Arc::new(MemoryStore::new(64));
	let entry = AttemptEntry {
		attempts: 0,
		first_attempt: 0,
		blocked_until: Some(BlockExpiry::Permanent),
		block_count: 3,
	};
	store.put("authgate:login:203.0.113.5", &entry, None).await.unwrap();
	let limiter = Arc::new(AuthRateLimiter::with_store(
		store,
		Arc::new(NullSink),
		&GateConfig::default(),
	));

	let response = login_app(limiter).oneshot(login_request("203.0.113.5")).await.unwrap();
	assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
	assert!(response.headers().get("Retry-After").is_none());

	let body = body_json(response).await;
	assert_eq!(body["error"]["code"], "AUTH_RATE_LIMITED");
	assert_eq!(body["error"]["retryable"], false);
	assert!(body["error"]["retry_after_seconds"].is_null());
	let message = body["error"]["message"].as_str().unwrap();
	assert!(message.contains("support"));
}

#[tokio::test]
async fn test_master_switch_bypasses_evaluation() {
	let config = GateConfig { enabled: false, ..GateConfig::default() };
	let limiter = Arc::new(AuthRateLimiter::with_store(
		Arc::new(MemoryStore::new(1024)),
		Arc::new(NullSink),
		&config,
	));
	let app = login_app(limiter);

	// Way past the ceiling, still never limited
	for _ in 0..20 {
		let response = app.clone().oneshot(login_request("203.0.113.5")).await.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
	}
}

#[tokio::test]
async fn test_fails_open_when_store_is_down() {
	let limiter = Arc::new(AuthRateLimiter::with_store(
		Arc::new(FailingStore),
		Arc::new(NullSink),
		&GateConfig::default(),
	));
	let app = login_app(limiter);

	// Every evaluation errors; requests must reach the handler anyway
	for _ in 0..10 {
		let response = app.clone().oneshot(login_request("203.0.113.5")).await.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
	}
}

#[tokio::test]
async fn test_missing_identifier_passes_through() {
	// Standalone mode, no peer info, no trusted headers
	let limiter = default_limiter();
	let app = Router::new().route("/api/auth/login", post(|| async { "ok" })).layer(
		RateLimitGateLayer::new(limiter, ActionType::Login, "password", ServerMode::Standalone),
	);

	let request = Request::builder()
		.method("POST")
		.uri("/api/auth/login")
		.header("x-forwarded-for", "203.0.113.5")
		.body(Body::empty())
		.unwrap();
	let response = app.oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
}

// vim: ts=4
