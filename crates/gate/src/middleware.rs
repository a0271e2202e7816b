//! Admission middleware for axum routers.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tavern_authn::{AccessRequirement, Gatekeeper};

use crate::{
    credentials::credentials_from_parts,
    response::{GateError, apply_rate_limit_headers},
};

/// State of one [`admit`] layer: the shared pipeline plus the access rules
/// of the routes it wraps.
#[derive(Debug, Clone)]
pub struct GuardState {
    gatekeeper: Arc<Gatekeeper>,
    requirement: Arc<AccessRequirement>,
}

impl GuardState {
    /// Creates a guard enforcing `requirement`.
    pub fn new(gatekeeper: Arc<Gatekeeper>, requirement: AccessRequirement) -> Self {
        Self { gatekeeper, requirement: Arc::new(requirement) }
    }

    /// The same pipeline with different access rules.
    #[must_use]
    pub fn with_requirement(&self, requirement: AccessRequirement) -> Self {
        Self::new(Arc::clone(&self.gatekeeper), requirement)
    }

    /// Returns the pipeline.
    pub fn gatekeeper(&self) -> &Gatekeeper {
        &self.gatekeeper
    }

    /// Returns the access rules.
    pub fn requirement(&self) -> &AccessRequirement {
        &self.requirement
    }
}

/// Axum middleware that admits a request through the [`Gatekeeper`].
///
/// On success the [`Identity`](tavern_authn::Identity) (if any) and the
/// [`Admission`](tavern_authn::Admission) are inserted into request
/// extensions, and the response carries the `X-RateLimit-*` headers when the
/// request was metered.
///
/// # Errors
///
/// Returns a [`GateError`] rendering the pipeline's [`AuthError`](tavern_authn::AuthError).
pub async fn admit(
    State(guard): State<GuardState>,
    request: Request,
    next: Next,
) -> Result<Response, GateError> {
    let (mut parts, body) = request.into_parts();
    let credentials = credentials_from_parts(&parts);

    let admission = guard.gatekeeper.admit(&credentials, &guard.requirement).await.map_err(|e| {
        tracing::debug!(path = %credentials.path, code = e.code(), "request rejected");
        GateError(e)
    })?;

    if let Some(identity) = &admission.identity {
        parts.extensions.insert(identity.clone());
    }
    let quota = admission.rate_limit.quota;
    parts.extensions.insert(admission);

    let mut response = next.run(Request::from_parts(parts, body)).await;
    if let Some(quota) = quota {
        apply_rate_limit_headers(response.headers_mut(), &quota);
    }
    Ok(response)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::{
        Extension, Router,
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::get,
    };
    use tavern_authn::{
        Admission, AuthResolver, Identity, PolicyEngine, RateLimiter, TierPolicies, TierPolicy,
        audit::NoopAuditLogger, testutil::test_verifier,
    };
    use tavern_storage::{
        MemoryCache, Tier,
        testutil::{seeded_directory, test_user},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::response::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING};

    fn guard(requirement: AccessRequirement) -> GuardState {
        let cache = Arc::new(MemoryCache::new());
        let resolver = AuthResolver::builder()
            .cache(cache.clone())
            .directory(Arc::new(seeded_directory([test_user(1, Tier::Free)])))
            .verifier(Arc::new(test_verifier()))
            .build();
        let policies = TierPolicies::default()
            .with(Tier::Free, TierPolicy::new(2, std::time::Duration::from_secs(60)));
        let gatekeeper = Gatekeeper::new(
            resolver,
            PolicyEngine::new(Arc::new(NoopAuditLogger)),
            RateLimiter::new(cache, policies),
        );
        GuardState::new(Arc::new(gatekeeper), requirement)
    }

    async fn whoami(Extension(identity): Extension<Identity>) -> String {
        format!("user {}", identity.id)
    }

    async fn metered(Extension(admission): Extension<Admission>) -> String {
        admission.rate_limit.is_metered().to_string()
    }

    fn app(guard: GuardState) -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .route("/metered", get(metered))
            .layer(middleware::from_fn_with_state(guard, admit))
    }

    fn request(uri: &str, api_key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(key) = api_key {
            builder = builder.header("X-API-Key", key);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn inserts_identity_into_extensions() {
        let response = app(guard(AccessRequirement::authenticated()))
            .oneshot(request("/whoami", Some("key-1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "2");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "1");
        assert_eq!(body_string(response).await, "user 1");
    }

    #[tokio::test]
    async fn missing_credentials_are_rejected() {
        let response = app(guard(AccessRequirement::authenticated()))
            .oneshot(request("/whoami", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn optional_route_admits_anonymous_unmetered() {
        let response = app(guard(AccessRequirement::optional()))
            .oneshot(request("/metered", Some("no-such-key")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key(X_RATELIMIT_LIMIT));
        assert_eq!(body_string(response).await, "false");
    }

    #[tokio::test]
    async fn quota_exhaustion_returns_429() {
        let app = app(guard(AccessRequirement::authenticated()));
        for _ in 0..2 {
            let response = app.clone().oneshot(request("/whoami", Some("key-1"))).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app.oneshot(request("/whoami", Some("key-1"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "0");
    }

    #[tokio::test]
    async fn with_requirement_shares_the_pipeline() {
        let base = guard(AccessRequirement::optional());
        let admin = base.with_requirement(AccessRequirement::builder().admin(true).build());
        assert!(Arc::ptr_eq(&base.gatekeeper, &admin.gatekeeper));
        assert!(admin.requirement().admin);

        let response = app(admin).oneshot(request("/whoami", Some("key-1"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
