//! Credential extraction from HTTP requests.
//!
//! Reads the bearer token from `Authorization`, the API key from
//! `X-API-Key`, the request path, and the peer address when the server
//! records [`ConnectInfo`].

use std::net::SocketAddr;

use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use tavern_authn::Credentials;

/// Header carrying an API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Returns the token of an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively. Other schemes, and headers that
/// are not valid visible ASCII, yield `None`.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim_start().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

/// Collects the credentials presented by a request.
///
/// The peer address is only known when the server was started with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
#[must_use]
pub fn credentials_from_parts(parts: &Parts) -> Credentials {
    let api_key = parts.headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    let remote_addr =
        parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(addr)| *addr);

    Credentials::builder()
        .maybe_bearer(bearer_token(&parts.headers))
        .maybe_api_key(api_key)
        .path(parts.uri.path())
        .maybe_remote_addr(remote_addr)
        .build()
}
