//! Extractors for the identity admitted by [`admit`](crate::admit).

use std::{convert::Infallible, ops::Deref};

use axum::{extract::FromRequestParts, http::request::Parts};
use tavern_authn::{AuthError, Identity};

use crate::response::GateError;

/// Extractor for requests admitted with an identity.
///
/// Reads the [`Identity`] stored by the [`admit`](crate::admit) middleware.
/// Rejects with 401 when the request is anonymous or was not routed through
/// the middleware.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Identity);

impl Deref for Authenticated {
    type Target = Identity;

    fn deref(&self) -> &Identity {
        &self.0
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Authenticated {
    type Rejection = GateError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(Self)
            .ok_or(GateError(AuthError::Unauthenticated))
    }
}

/// Optional identity extractor; never rejects.
#[derive(Debug, Clone)]
pub struct MaybeAuthenticated(pub Option<Identity>);

impl MaybeAuthenticated {
    /// The identity, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.0.as_ref()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for MaybeAuthenticated {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<Identity>().cloned()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        routing::get,
    };
    use tavern_authn::testutil::test_identity;
    use tavern_storage::Tier;
    use tower::ServiceExt;

    use super::*;

    async fn strict(Authenticated(identity): Authenticated) -> String {
        identity.email
    }

    async fn lenient(auth: MaybeAuthenticated) -> String {
        auth.identity().map_or_else(|| "anonymous".to_owned(), |i| i.email.clone())
    }

    fn app() -> Router {
        Router::new().route("/strict", get(strict)).route("/lenient", get(lenient))
    }

    async fn call(uri: &str, identity: Option<Identity>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri(uri);
        if let Some(identity) = identity {
            builder = builder.extension(identity);
        }
        let response = app().oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn authenticated_reads_extension() {
        let identity = test_identity(4, Tier::Pro);
        let (status, body) = call("/strict", Some(identity.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, identity.email);
    }

    #[tokio::test]
    async fn authenticated_rejects_anonymous() {
        let (status, body) = call("/strict", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("unauthenticated"));
    }

    #[tokio::test]
    async fn maybe_authenticated_never_rejects() {
        assert_eq!(call("/lenient", None).await, (StatusCode::OK, "anonymous".to_owned()));

        let identity = test_identity(5, Tier::Free);
        let (status, body) = call("/lenient", Some(identity.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, identity.email);
    }
}
