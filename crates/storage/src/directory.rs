//! User directory trait and in-memory implementation.
//!
//! The [`UserDirectory`] is the system of record for users. The
//! authentication layer only reads from it; the lifecycle operations on
//! [`MemoryUserDirectory`] exist for seeding, administration and tests.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use fail::fail_point;
use parking_lot::RwLock;

use crate::{
    error::{StorageError, StorageResult},
    types::UserId,
    user::UserRecord,
};

/// Read access to user records.
///
/// Every method returns `Ok(None)` when no user matches; errors are reserved
/// for the directory itself being unreachable or broken.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Looks up a user by primary key.
    #[must_use = "directory lookups may fail and errors must be handled"]
    async fn find_by_id(&self, id: UserId) -> StorageResult<Option<UserRecord>>;

    /// Looks up a user by email (exact match).
    #[must_use = "directory lookups may fail and errors must be handled"]
    async fn find_by_email(&self, email: &str) -> StorageResult<Option<UserRecord>>;

    /// Looks up the user that owns `api_key`.
    #[must_use = "directory lookups may fail and errors must be handled"]
    async fn find_by_api_key(&self, api_key: &str) -> StorageResult<Option<UserRecord>>;
}

#[async_trait]
impl<D: UserDirectory + ?Sized> UserDirectory for Arc<D> {
    async fn find_by_id(&self, id: UserId) -> StorageResult<Option<UserRecord>> {
        (**self).find_by_id(id).await
    }

    async fn find_by_email(&self, email: &str) -> StorageResult<Option<UserRecord>> {
        (**self).find_by_email(email).await
    }

    async fn find_by_api_key(&self, api_key: &str) -> StorageResult<Option<UserRecord>> {
        (**self).find_by_api_key(api_key).await
    }
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, UserRecord>,
    by_email: HashMap<String, UserId>,
    by_api_key: HashMap<String, UserId>,
}

impl Tables {
    fn index(&mut self, user: &UserRecord) {
        self.by_email.insert(user.email.clone(), user.id);
        if let Some(key) = &user.api_key {
            self.by_api_key.insert(key.clone(), user.id);
        }
    }

    fn unindex(&mut self, user: &UserRecord) {
        self.by_email.remove(&user.email);
        if let Some(key) = &user.api_key {
            self.by_api_key.remove(key);
        }
    }

    /// Rejects `user` if its email or API key belongs to a different user.
    fn check_unique(&self, user: &UserRecord) -> StorageResult<()> {
        if self.by_email.get(&user.email).is_some_and(|owner| *owner != user.id) {
            return Err(StorageError::conflict(format!("email already registered: {}", user.email)));
        }
        if let Some(key) = &user.api_key
            && self.by_api_key.get(key).is_some_and(|owner| *owner != user.id)
        {
            return Err(StorageError::conflict("API key already assigned"));
        }
        Ok(())
    }
}

/// In-memory [`UserDirectory`] with secondary indexes on email and API key.
///
/// Cloning is cheap; clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryUserDirectory {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryUserDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory seeded with `users`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] if two users share an id, email or
    /// API key.
    pub fn with_users(users: impl IntoIterator<Item = UserRecord>) -> StorageResult<Self> {
        let directory = Self::new();
        for user in users {
            directory.insert(user)?;
        }
        Ok(directory)
    }

    fn insert(&self, user: UserRecord) -> StorageResult<()> {
        let mut tables = self.tables.write();
        if tables.users.contains_key(&user.id) {
            return Err(StorageError::conflict(format!("user id already exists: {}", user.id)));
        }
        tables.check_unique(&user)?;
        tables.index(&user);
        tables.users.insert(user.id, user);
        Ok(())
    }

    /// Adds a new user.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] if the id, email or API key is
    /// already taken.
    #[tracing::instrument(level = "debug", skip_all, fields(user_id = %user.id))]
    pub async fn create_user(&self, user: UserRecord) -> StorageResult<()> {
        self.insert(user)
    }

    /// Replaces an existing user record, reindexing email and API key.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no user has `user.id`
    /// - [`StorageError::Conflict`] if the new email or API key belongs to another user
    #[tracing::instrument(level = "debug", skip_all, fields(user_id = %user.id))]
    pub async fn update_user(&self, user: UserRecord) -> StorageResult<()> {
        let mut tables = self.tables.write();
        let previous = tables
            .users
            .get(&user.id)
            .cloned()
            .ok_or_else(|| StorageError::not_found(format!("user:{}", user.id)))?;
        tables.check_unique(&user)?;
        tables.unindex(&previous);
        tables.index(&user);
        tables.users.insert(user.id, user);
        Ok(())
    }

    /// Removes a user. Returns the removed record, if any.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_user(&self, id: UserId) -> StorageResult<Option<UserRecord>> {
        let mut tables = self.tables.write();
        let removed = tables.users.remove(&id);
        if let Some(user) = &removed {
            tables.unindex(user);
        }
        Ok(removed)
    }

    /// Replaces the API key of user `id` and returns the previous key.
    ///
    /// Callers that cache key mappings must evict the old key themselves.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no user has `id`
    /// - [`StorageError::Conflict`] if `new_key` belongs to another user
    #[tracing::instrument(level = "debug", skip(self, new_key))]
    pub async fn rotate_api_key(
        &self,
        id: UserId,
        new_key: impl Into<String> + Send,
    ) -> StorageResult<Option<String>> {
        let new_key = new_key.into();
        let mut tables = self.tables.write();
        if tables.by_api_key.get(&new_key).is_some_and(|owner| *owner != id) {
            return Err(StorageError::conflict("API key already assigned"));
        }
        let Tables { users, by_api_key, .. } = &mut *tables;
        let user = users.get_mut(&id).ok_or_else(|| StorageError::not_found(format!("user:{id}")))?;
        let old = user.api_key.replace(new_key.clone());
        if let Some(old_key) = &old {
            by_api_key.remove(old_key);
        }
        by_api_key.insert(new_key, id);
        Ok(old)
    }

    /// Number of users in the directory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().users.len()
    }

    /// Returns `true` if the directory holds no users.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.read().users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn find_by_id(&self, id: UserId) -> StorageResult<Option<UserRecord>> {
        fail_point!("directory-find", |_| {
            Err(StorageError::connection("injected directory failure"))
        });
        Ok(self.tables.read().users.get(&id).cloned())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn find_by_email(&self, email: &str) -> StorageResult<Option<UserRecord>> {
        let tables = self.tables.read();
        Ok(tables.by_email.get(email).and_then(|id| tables.users.get(id)).cloned())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn find_by_api_key(&self, api_key: &str) -> StorageResult<Option<UserRecord>> {
        fail_point!("directory-find", |_| {
            Err(StorageError::connection("injected directory failure"))
        });
        let tables = self.tables.read();
        Ok(tables.by_api_key.get(api_key).and_then(|id| tables.users.get(id)).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::Tier;

    fn user(id: i64, email: &str, key: Option<&str>) -> UserRecord {
        UserRecord::builder()
            .id(UserId(id))
            .email(email)
            .maybe_api_key(key.map(str::to_owned))
            .build()
    }

    #[tokio::test]
    async fn finds_by_every_index() {
        let dir = MemoryUserDirectory::new();
        dir.create_user(user(1, "a@example.com", Some("key-a"))).await.unwrap();

        assert_eq!(dir.find_by_id(UserId(1)).await.unwrap().unwrap().email, "a@example.com");
        assert_eq!(dir.find_by_email("a@example.com").await.unwrap().unwrap().id, UserId(1));
        assert_eq!(dir.find_by_api_key("key-a").await.unwrap().unwrap().id, UserId(1));

        assert!(dir.find_by_id(UserId(2)).await.unwrap().is_none());
        assert!(dir.find_by_email("nobody@example.com").await.unwrap().is_none());
        assert!(dir.find_by_api_key("key-z").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_rejects_duplicates() {
        let dir = MemoryUserDirectory::new();
        dir.create_user(user(1, "a@example.com", Some("key-a"))).await.unwrap();

        let dup_id = dir.create_user(user(1, "other@example.com", None)).await;
        assert!(matches!(dup_id, Err(StorageError::Conflict { .. })));

        let dup_email = dir.create_user(user(2, "a@example.com", None)).await;
        assert!(matches!(dup_email, Err(StorageError::Conflict { .. })));

        let dup_key = dir.create_user(user(3, "c@example.com", Some("key-a"))).await;
        assert!(matches!(dup_key, Err(StorageError::Conflict { .. })));

        assert_eq!(dir.len(), 1);
    }

    #[tokio::test]
    async fn update_reindexes() {
        let dir = MemoryUserDirectory::new();
        dir.create_user(user(1, "a@example.com", Some("key-a"))).await.unwrap();

        let mut updated = user(1, "new@example.com", Some("key-b"));
        updated.subscription_tier = Tier::Pro;
        dir.update_user(updated).await.unwrap();

        assert!(dir.find_by_email("a@example.com").await.unwrap().is_none());
        assert!(dir.find_by_api_key("key-a").await.unwrap().is_none());
        let found = dir.find_by_api_key("key-b").await.unwrap().unwrap();
        assert_eq!(found.subscription_tier, Tier::Pro);
    }

    #[tokio::test]
    async fn update_missing_user_is_not_found() {
        let dir = MemoryUserDirectory::new();
        let result = dir.update_user(user(9, "x@example.com", None)).await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn delete_removes_indexes() {
        let dir = MemoryUserDirectory::with_users([user(1, "a@example.com", Some("key-a"))]).unwrap();
        let removed = dir.delete_user(UserId(1)).await.unwrap();
        assert_eq!(removed.unwrap().id, UserId(1));
        assert!(dir.find_by_api_key("key-a").await.unwrap().is_none());
        assert!(dir.is_empty());
        assert!(dir.delete_user(UserId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rotate_api_key_returns_old_key() {
        let dir = MemoryUserDirectory::with_users([
            user(1, "a@example.com", Some("key-a")),
            user(2, "b@example.com", Some("key-b")),
        ])
        .unwrap();

        let old = dir.rotate_api_key(UserId(1), "key-a2").await.unwrap();
        assert_eq!(old.as_deref(), Some("key-a"));
        assert!(dir.find_by_api_key("key-a").await.unwrap().is_none());
        assert_eq!(dir.find_by_api_key("key-a2").await.unwrap().unwrap().id, UserId(1));

        let taken = dir.rotate_api_key(UserId(1), "key-b").await;
        assert!(matches!(taken, Err(StorageError::Conflict { .. })));

        let missing = dir.rotate_api_key(UserId(9), "key-z").await;
        assert!(matches!(missing, Err(StorageError::NotFound { .. })));
    }

    #[test]
    fn with_users_rejects_conflicts() {
        let result = MemoryUserDirectory::with_users([
            user(1, "a@example.com", None),
            user(2, "a@example.com", None),
        ]);
        assert!(matches!(result, Err(StorageError::Conflict { .. })));
    }
}
