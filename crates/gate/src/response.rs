//! HTTP rendering of authentication errors.
//!
//! [`GateError`] maps each [`AuthError`] to its status code, a stable JSON
//! body and the challenge or rate-limit headers the status calls for.

use axum::{
    Json,
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{RETRY_AFTER, WWW_AUTHENTICATE},
    },
    response::{IntoResponse, Response},
};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use tavern_authn::{AuthError, Quota};

/// Requests allowed per window.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Requests left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Window end as Unix seconds.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Writes the `X-RateLimit-*` headers for `quota`.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, quota: &Quota) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(quota.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(quota.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(quota.reset_epoch_seconds()));
}

/// An [`AuthError`] rendered as an HTTP response.
///
/// Bodies have the shape `{"error": {"code": ..., "message": ..., ...}}`
/// where `code` is [`AuthError::code`]. Infrastructure failures are logged
/// here and answered with a generic message.
#[derive(Debug)]
pub struct GateError(pub AuthError);

impl GateError {
    /// HTTP status of the wrapped error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn body(&self) -> Value {
        let mut detail = Map::new();
        detail.insert("code".into(), self.0.code().into());

        match &self.0 {
            AuthError::AuthInfrastructureFailure { .. } => {
                detail.insert("message".into(), "Authentication is temporarily unavailable".into());
            },
            AuthError::InsufficientPermissions { required, .. } => {
                detail.insert("message".into(), self.0.to_string().into());
                detail.insert("required_roles".into(), json!(required));
            },
            AuthError::TierUpgradeRequired { current, required } => {
                detail.insert("message".into(), self.0.to_string().into());
                detail.insert("current_tier".into(), json!(current));
                detail.insert("required_tier".into(), json!(required));
            },
            AuthError::RateLimitExceeded { quota } => {
                detail.insert("message".into(), self.0.to_string().into());
                detail.insert("limit".into(), quota.limit.into());
                detail.insert("remaining".into(), quota.remaining.into());
                detail.insert(
                    "reset_at".into(),
                    quota.reset_at.to_rfc3339_opts(SecondsFormat::Secs, true).into(),
                );
                detail.insert("retry_after".into(), quota.retry_after_secs(Utc::now()).into());
            },
            other => {
                detail.insert("message".into(), other.to_string().into());
            },
        }

        json!({ "error": detail })
    }
}

impl From<AuthError> for GateError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        if self.0.is_infrastructure() {
            let source = std::error::Error::source(&self.0).map(ToString::to_string);
            tracing::error!(error = %self.0, source = ?source, "authentication infrastructure failure");
        }

        let status = self.status();
        let mut response = (status, Json(self.body())).into_response();
        let headers = response.headers_mut();

        match &self.0 {
            _ if status == StatusCode::UNAUTHORIZED => {
                headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            },
            AuthError::RateLimitExceeded { quota } => {
                apply_rate_limit_headers(headers, quota);
                headers.insert(RETRY_AFTER, HeaderValue::from(quota.retry_after_secs(Utc::now())));
            },
            _ => {},
        }

        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::Duration;
    use tavern_storage::{StorageError, Tier};

    use super::*;

    async fn render(err: AuthError) -> (StatusCode, HeaderMap, Value) {
        let response = GateError(err).into_response();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn missing_credential_is_401_with_challenge() {
        let (status, headers, body) = render(AuthError::MissingCredential).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(headers[WWW_AUTHENTICATE], "Bearer");
        assert_eq!(body["error"]["code"], "missing_credential");
        assert_eq!(body["error"]["message"], "Missing credential");
    }

    #[tokio::test]
    async fn invalid_credential_reports_reason() {
        let (status, headers, body) = render(AuthError::invalid_credential("Token expired")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(headers.contains_key(WWW_AUTHENTICATE));
        assert_eq!(body["error"]["message"], "Invalid credential: Token expired");
    }

    #[tokio::test]
    async fn forbidden_errors_carry_details() {
        let (status, headers, body) =
            render(AuthError::insufficient_permissions(["dm"], ["player"])).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!headers.contains_key(WWW_AUTHENTICATE));
        assert_eq!(body["error"]["required_roles"], json!(["dm"]));
        assert!(body["error"].get("actual_roles").is_none());

        let (status, _, body) = render(AuthError::tier_upgrade_required(Tier::Free, Tier::Pro)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["current_tier"], "free");
        assert_eq!(body["error"]["required_tier"], "pro");

        let (status, _, body) = render(AuthError::AdminRequired).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "admin_required");
    }

    #[tokio::test]
    async fn rate_limit_sets_headers() {
        let reset_at = Utc::now() + Duration::seconds(120);
        let quota = Quota { limit: 100, remaining: 0, reset_at };
        let (status, headers, body) = render(AuthError::RateLimitExceeded { quota }).await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(headers[X_RATELIMIT_LIMIT], "100");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "0");
        assert_eq!(headers[X_RATELIMIT_RESET], reset_at.timestamp().to_string().as_str());

        let retry_after: u64 = headers[RETRY_AFTER].to_str().unwrap().parse().unwrap();
        assert!((1..=120).contains(&retry_after), "retry after {retry_after}");
        assert_eq!(body["error"]["limit"], 100);
        assert_eq!(body["error"]["remaining"], 0);
    }

    #[tokio::test]
    async fn infrastructure_failure_hides_detail() {
        let err: AuthError = StorageError::connection("redis://10.0.0.3 refused").into();
        let (status, _, body) = render(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "auth_infrastructure_failure");
        assert!(!body.to_string().contains("10.0.0.3"));
    }
}
