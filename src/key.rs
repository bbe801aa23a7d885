//! Key Builder and Identifier Masking
//!
//! Derives stable storage keys from `(action, identifier)` pairs and masked
//! identifier forms for logging. Raw identifiers (client IPs, emails) are
//! personal data; the masked form is the only representation that may reach
//! logs or the observability sink.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use hyper::Request;

use crate::config::ActionType;

/// Stable rate limit key for an `(action, identifier)` pair
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct RateLimitKey {
	action: ActionType,
	storage: Box<str>,
}

impl RateLimitKey {
	pub fn new(prefix: &str, action: ActionType, identifier: &str) -> Self {
		let storage = format!("{}:{}:{}", prefix, action.as_str(), identifier).into();
		Self { action, storage }
	}

	pub fn action(&self) -> ActionType {
		self.action
	}

	/// Key string handed to the counter store
	pub fn as_str(&self) -> &str {
		&self.storage
	}
}

/// Mask an identifier for logging
///
/// - IPv4: drop the host octet (`203.0.113.x`)
/// - IPv6: keep the /64 prefix segments (`2001:db8:85a3:0::x`)
/// - Email: first character of the local part plus the domain (`a***@example.com`)
/// - Anything else: first two characters (`ab***`)
pub fn mask_identifier(identifier: &str) -> Box<str> {
	if let Ok(addr) = identifier.parse::<IpAddr>() {
		return match addr {
			IpAddr::V4(ip) => {
				let o = ip.octets();
				format!("{}.{}.{}.x", o[0], o[1], o[2]).into()
			}
			IpAddr::V6(ip) => {
				let s = ip.segments();
				format!("{:x}:{:x}:{:x}:{:x}::x", s[0], s[1], s[2], s[3]).into()
			}
		};
	}

	if let Some((local, domain)) = identifier.split_once('@') {
		return match local.chars().next() {
			Some(first) => format!("{}***@{}", first, domain).into(),
			None => format!("***@{}", domain).into(),
		};
	}

	let prefix: String = identifier.chars().take(2).collect();
	if prefix.len() < identifier.chars().count() {
		format!("{}***", prefix).into()
	} else {
		"***".into()
	}
}

/// How the server receives connections; decides which source of the client
/// IP can be trusted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServerMode {
	/// Direct connections; the peer address is the client
	#[default]
	Standalone,
	/// Behind a reverse proxy; forwarding headers carry the client address
	Proxy,
}

/// Extract the client IP from a request based on [`ServerMode`]
///
/// In proxy mode the forwarding headers are consulted first, falling back to
/// the peer address. Returns None when nothing usable is present (e.g. unit
/// tests without `ConnectInfo`).
pub fn extract_client_ip<B>(req: &Request<B>, mode: ServerMode) -> Option<IpAddr> {
	match mode {
		ServerMode::Standalone => peer_ip(req),
		ServerMode::Proxy => from_forwarded_for(req)
			.or_else(|| from_real_ip(req))
			.or_else(|| from_forwarded(req))
			.or_else(|| peer_ip(req)),
	}
}

fn peer_ip<B>(req: &Request<B>) -> Option<IpAddr> {
	req.extensions().get::<ConnectInfo<SocketAddr>>().map(|ci| ci.0.ip())
}

/// X-Forwarded-For: "client, proxy1, proxy2" - leftmost is the client
fn from_forwarded_for<B>(req: &Request<B>) -> Option<IpAddr> {
	req.headers()
		.get("x-forwarded-for")
		.and_then(|h| h.to_str().ok())
		.and_then(|s| s.split(',').next())
		.and_then(|ip| ip.trim().parse().ok())
}

fn from_real_ip<B>(req: &Request<B>) -> Option<IpAddr> {
	req.headers()
		.get("x-real-ip")
		.and_then(|h| h.to_str().ok())
		.and_then(|s| s.trim().parse().ok())
}

/// Forwarded header (RFC 7239): "for=192.0.2.60;proto=http;by=203.0.113.43"
fn from_forwarded<B>(req: &Request<B>) -> Option<IpAddr> {
	req.headers().get("forwarded").and_then(|h| h.to_str().ok()).and_then(|s| {
		s.split(';')
			.map(str::trim)
			.find(|part| part.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("for=")))
			.and_then(|part| {
				// Quoted IPv6 form: for="[2001:db8::1]"
				let value = part.get(4..)?.trim_matches('"').trim_matches('[').trim_matches(']');
				value.parse().ok()
			})
	})
}


// vim: ts=4
