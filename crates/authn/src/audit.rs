//! Audit logging for access denials and credential revocations.
//!
//! Every role or admin denial and every API-key revocation produces an
//! [`AuditEvent`] recording who was refused, what they asked for, and when.
//!
//! # Architecture
//!
//! The [`AuditLogger`] trait enables different audit backends:
//!
//! - [`TracingAuditLogger`]: Emits structured `tracing` events at INFO, suitable for log
//!   aggregation and SIEM integration.
//! - [`NoopAuditLogger`]: Discards events.
//! - Custom implementations can write to databases, external audit services, etc.
//!
//! # Usage
//!
//! ```
//! use tavern_authn::audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let logger = TracingAuditLogger;
//! let event = AuditEvent::builder()
//!     .actor("user:42")
//!     .action(AuditAction::AdminDenied)
//!     .resource("/admin/users")
//!     .result(AuditResult::Failure("not an administrator".to_owned()))
//!     .build();
//! logger.log(&event).await;
//! # });
//! ```

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Action recorded by an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// A role check refused an identity.
    RoleDenied,
    /// An admin-only check refused an identity.
    AdminDenied,
    /// A cached API-key mapping was revoked.
    ApiKeyRevoked,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoleDenied => write!(f, "role_denied"),
            Self::AdminDenied => write!(f, "admin_denied"),
            Self::ApiKeyRevoked => write!(f, "api_key_revoked"),
        }
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// Operation completed successfully.
    Success,
    /// Operation failed or was refused with the given reason.
    Failure(String),
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// Structured audit event.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the event occurred (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Identity of the actor (e.g. `user:42`).
    #[builder(into)]
    pub actor: String,
    /// The action that was performed.
    pub action: AuditAction,
    /// Resource identifier, usually the request path.
    #[builder(into)]
    pub resource: String,
    /// Outcome of the operation.
    pub result: AuditResult,
    /// Additional context (required roles, actual roles, ...).
    #[builder(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Trait for audit log backends.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records an audit event.
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger + ?Sized> AuditLogger for std::sync::Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Audit logger that emits structured `tracing` events.
///
/// Field mapping:
/// - `audit.timestamp`: RFC 3339 timestamp
/// - `audit.actor`: who performed the action
/// - `audit.action`: the operation (e.g., "role_denied")
/// - `audit.resource`: what was affected
/// - `audit.result`: "success" or "failure: ..."
/// - `audit.metadata`: `key=value` pairs, comma separated
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let metadata_str =
            event.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(", ");

        tracing::info!(
            audit.timestamp = %event.timestamp.to_rfc3339(),
            audit.actor = %event.actor,
            audit.action = %event.action,
            audit.resource = %event.resource,
            audit.result = %event.result,
            audit.metadata = %metadata_str,
            "audit_event"
        );
    }
}

/// No-op audit logger for environments where audit is not needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _event: &AuditEvent) {}
}

/// Formats the actor string for a user id.
pub fn user_actor(id: impl fmt::Display) -> String {
    format!("user:{id}")
}
