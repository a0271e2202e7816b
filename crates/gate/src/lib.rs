//! # Tavern Gate
//!
//! axum integration for the [`tavern_authn`] admission pipeline.
//!
//! - [`admit`]: middleware running the [`Gatekeeper`](tavern_authn::Gatekeeper) for the routes
//!   it wraps
//! - [`Authenticated`] and [`MaybeAuthenticated`]: extractors for the admitted identity
//! - [`GateError`]: status, header and JSON mapping of [`AuthError`](tavern_authn::AuthError)
//!
//! ## Status mapping
//!
//! | Status | Errors | Extra headers |
//! |--------|--------|---------------|
//! | 401 | missing or invalid credential, unauthenticated | `WWW-Authenticate: Bearer` |
//! | 403 | insufficient permissions, tier upgrade required, admin required | |
//! | 429 | rate limit exceeded | `X-RateLimit-*`, `Retry-After` |
//! | 500 | authentication infrastructure failure | |
//!
//! ## Example
//!
//! ```no_run
//! use std::{net::SocketAddr, sync::Arc};
//!
//! use axum::{Router, middleware, routing::get};
//! use tavern_authn::{AccessRequirement, Gatekeeper};
//! use tavern_gate::{Authenticated, GuardState, admit};
//!
//! async fn sheets(user: Authenticated) -> String {
//!     format!("sheets of {}", user.id)
//! }
//!
//! async fn serve(gatekeeper: Arc<Gatekeeper>) -> std::io::Result<()> {
//!     let guard = GuardState::new(gatekeeper, AccessRequirement::authenticated());
//!     let app = Router::new()
//!         .route("/sheets", get(sheets))
//!         .route_layer(middleware::from_fn_with_state(guard, admit));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Credential extraction from request headers.
pub mod credentials;
/// Identity extractors.
pub mod extract;
/// Admission middleware.
pub mod middleware;
/// Error responses and rate-limit headers.
pub mod response;

pub use credentials::{API_KEY_HEADER, bearer_token, credentials_from_parts};
pub use extract::{Authenticated, MaybeAuthenticated};
pub use middleware::{GuardState, admit};
pub use response::{GateError, apply_rate_limit_headers};
