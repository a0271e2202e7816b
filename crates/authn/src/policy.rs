//! Role, tier and admin checks.
//!
//! Every check takes the optional identity of the request. An absent
//! identity always fails with [`AuthError::Unauthenticated`]; the checks
//! never resolve credentials themselves.
//!
//! Role and admin denials are written to the [`AuditLogger`]. Tier denials
//! are an ordinary upsell path and are not audited.

use std::{collections::BTreeMap, fmt, sync::Arc};

use tavern_storage::Tier;

use crate::{
    audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, user_actor},
    error::{AuthError, Result},
    identity::Identity,
};

/// Stateless access checks over resolved identities.
#[derive(Clone)]
pub struct PolicyEngine {
    audit: Arc<dyn AuditLogger>,
}

impl fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEngine").finish_non_exhaustive()
    }
}

impl PolicyEngine {
    /// Creates an engine that reports denials to `audit`.
    pub fn new(audit: Arc<dyn AuditLogger>) -> Self {
        Self { audit }
    }

    /// Allows the request if the identity holds at least one of
    /// `required_roles`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Unauthenticated`] if `identity` is `None`
    /// - [`AuthError::InsufficientPermissions`] if no role matches
    pub async fn check_role<S: AsRef<str>>(
        &self,
        identity: Option<&Identity>,
        required_roles: &[S],
        path: &str,
    ) -> Result<()> {
        let identity = identity.ok_or(AuthError::Unauthenticated)?;
        if identity.has_any_role(required_roles) {
            return Ok(());
        }

        let required: Vec<String> = required_roles.iter().map(|r| r.as_ref().to_owned()).collect();
        let actual: Vec<String> = identity.roles.iter().cloned().collect();

        tracing::info!(
            user_id = %identity.id,
            required = ?required,
            actual = ?actual,
            path,
            "role check denied"
        );

        let metadata = BTreeMap::from([
            ("required_roles".to_owned(), required.join(",")),
            ("actual_roles".to_owned(), actual.join(",")),
            ("path".to_owned(), path.to_owned()),
        ]);
        self.record(identity, AuditAction::RoleDenied, path, "insufficient permissions", metadata)
            .await;

        Err(AuthError::insufficient_permissions(required, actual))
    }

    /// Allows the request if the identity's tier ranks at least `min_tier`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Unauthenticated`] if `identity` is `None`
    /// - [`AuthError::TierUpgradeRequired`] if the tier ranks lower
    pub fn check_tier(&self, identity: Option<&Identity>, min_tier: Tier) -> Result<()> {
        let identity = identity.ok_or(AuthError::Unauthenticated)?;
        if identity.subscription_tier.satisfies(min_tier) {
            Ok(())
        } else {
            tracing::debug!(
                user_id = %identity.id,
                current = %identity.subscription_tier,
                required = %min_tier,
                "tier check denied"
            );
            Err(AuthError::tier_upgrade_required(identity.subscription_tier, min_tier))
        }
    }

    /// Allows the request only for administrators.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Unauthenticated`] if `identity` is `None`
    /// - [`AuthError::AdminRequired`] if the identity is not an administrator
    pub async fn require_admin(&self, identity: Option<&Identity>, path: &str) -> Result<()> {
        let identity = identity.ok_or(AuthError::Unauthenticated)?;
        if identity.is_admin {
            return Ok(());
        }

        tracing::info!(user_id = %identity.id, path, "admin check denied");
        let metadata = BTreeMap::from([("path".to_owned(), path.to_owned())]);
        self.record(identity, AuditAction::AdminDenied, path, "not an administrator", metadata)
            .await;

        Err(AuthError::AdminRequired)
    }

    async fn record(
        &self,
        identity: &Identity,
        action: AuditAction,
        path: &str,
        reason: &str,
        metadata: BTreeMap<String, String>,
    ) {
        let event = AuditEvent::builder()
            .actor(user_actor(identity.id))
            .action(action)
            .resource(path)
            .result(AuditResult::Failure(reason.to_owned()))
            .metadata(metadata)
            .build();
        self.audit.log(&event).await;
    }
}
