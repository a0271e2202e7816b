//! User records as stored in a [`UserDirectory`](crate::UserDirectory).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{Tier, UserId};

/// A user row in the directory.
///
/// Records are built with [`UserRecord::builder`]; only `id` and `email`
/// are required.
///
/// # Example
///
/// ```
/// use tavern_storage::{Tier, UserId, UserRecord};
///
/// let user = UserRecord::builder()
///     .id(UserId(7))
///     .email("wizard@example.com")
///     .subscription_tier(Tier::Pro)
///     .api_key("tk_live_abc")
///     .roles(["dm".to_owned()].into())
///     .build();
///
/// assert!(user.has_role("dm"));
/// assert!(!user.is_admin);
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct UserRecord {
    /// Primary key.
    pub id: UserId,

    /// Login email, unique across the directory.
    #[builder(into)]
    pub email: String,

    /// Subscription tier; new accounts start on [`Tier::Free`].
    ///
    /// Stored names are matched case-insensitively. An unknown name loads
    /// as [`Tier::Free`].
    #[builder(default)]
    #[serde(default, deserialize_with = "tier_or_free")]
    pub subscription_tier: Tier,

    /// API key for programmatic access, unique when present.
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Role names granted to the user.
    #[builder(default)]
    #[serde(default)]
    pub roles: BTreeSet<String>,

    /// Whether the user may use administrative operations.
    #[builder(default)]
    #[serde(default)]
    pub is_admin: bool,

    /// Account creation time.
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Returns `true` if the user holds `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

impl std::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("subscription_tier", &self.subscription_tier)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("roles", &self.roles)
            .field("is_admin", &self.is_admin)
            .field("created_at", &self.created_at)
            .finish()
    }
}

fn tier_or_free<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Tier, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(raw.parse().unwrap_or_else(|_| {
        tracing::warn!(tier = %raw, "unknown subscription tier, treating as free");
        Tier::Free
    }))
}
